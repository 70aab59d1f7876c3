pub mod connections;
pub mod payments;
pub mod reconciliation;

pub use connections::{
    aggregator_callback, create_connect_session, delete_connection, get_connections,
    sync_connection, ConnectSessionResponse,
};
pub use payments::{
    delete_payment, get_payments, record_payment, RecordPaymentRequest, RecordPaymentResponse,
};
pub use reconciliation::{confirm_match, get_review, ignore_transaction, ConfirmMatchRequest};
