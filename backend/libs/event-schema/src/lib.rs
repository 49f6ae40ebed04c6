use chrono::{DateTime, Utc};
/// Event schema registry for the coupon issuance log.
///
/// Defines versioned event payloads so producer and consumer can evolve
/// independently. Every record carries a `schema_version` field; consumers
/// reject versions they do not understand instead of guessing.
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current schema version for all events
pub const SCHEMA_VERSION: u32 = 1;

/// Kafka topic names used by the issuance pipeline.
pub mod topics {
    /// Issuance events, partitioned by `event_id:user_id`.
    pub const ISSUANCE: &str = "coupon.issuance";
    /// Terminal destination for records that exhausted the writer's retries.
    pub const ISSUANCE_DLQ: &str = "coupon.issuance.dlq";
}

/// Base event envelope for all Kafka messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    /// Unique event ID for idempotency and tracing
    pub event_id: Uuid,
    /// Event timestamp
    pub timestamp: DateTime<Utc>,
    /// Schema version for compatibility checking
    pub schema_version: u32,
    /// Source service that generated the event
    pub source: String,
    /// Actual event payload
    pub data: T,
}

impl<T> EventEnvelope<T> {
    pub fn new(source: impl Into<String>, data: T) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            schema_version: SCHEMA_VERSION,
            source: source.into(),
            data,
        }
    }
}

/// A successful issuance decision, emitted by the handler after the atomic
/// script passed and before the synchronous response is returned.
///
/// The `coupon_id` is the correlation token across the in-memory user cache,
/// this log record, and the persisted row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponIssuedEvent {
    pub coupon_id: Uuid,
    pub user_id: String,
    pub event_id: String,
    pub issued_at: DateTime<Utc>,
}

impl CouponIssuedEvent {
    /// Partition key guaranteeing per-user ordering within an event.
    pub fn partition_key(&self) -> String {
        format!("{}:{}", self.event_id, self.user_id)
    }
}
