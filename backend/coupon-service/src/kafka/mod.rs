pub mod producer;

pub use producer::{IssuanceProducer, IssuancePublisher, PublishError, PublishRetryPolicy};
