pub mod issuance_writer;

pub use issuance_writer::{IssuanceWriter, RetryPolicy};
