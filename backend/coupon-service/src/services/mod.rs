pub mod admin;
pub mod issuance;

pub use admin::{AdminService, InitializeOutcome};
pub use issuance::{IssuanceService, IssueResult, RejectReason};
