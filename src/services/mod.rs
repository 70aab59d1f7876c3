pub mod aggregator;
pub mod connections;
pub mod importer;
pub mod matcher;
pub mod payments;
pub mod reconciliation;
