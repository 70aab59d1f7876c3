//! Shared types: ID aliases, persisted entities and their status enums.
//! Use chrono types for timestamps and dates.

pub mod account;
pub mod bank_transaction;
pub mod connection;
pub mod ids;
pub mod invoice;
pub mod payment;

pub use account::Account;
pub use bank_transaction::{BankTransaction, TransactionStatus};
pub use connection::{Connection, ConnectionStatus};
pub use ids::{AccountId, BankTransactionId, ConnectionId, InvoiceId, PaymentId, UserId};
pub use invoice::{effective_status, Invoice, InvoiceStatus};
pub use payment::Payment;
