pub mod reconciliation;

pub use reconciliation::ReconciliationJob;
