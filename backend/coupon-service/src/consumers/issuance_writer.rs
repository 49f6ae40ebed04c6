//! Durable writer for issuance events.
//!
//! Consumes the issuance log and materializes one user_coupons row per
//! event. Offsets are committed only after the row is durable (or the
//! record was handed to the dead-letter topic), so a crash between the
//! database write and the offset commit replays at most one record,
//! which the uniqueness constraints absorb.

use chrono::{DateTime, Utc};
use event_schema::{CouponIssuedEvent, EventEnvelope, SCHEMA_VERSION};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Serialize;
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::db::{CouponRepository, InsertOutcome};
use crate::metrics;

/// Retry policy for transient database errors, per message.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff after `attempt` failed attempts (1-based), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_backoff * 2u32.pow(attempt.saturating_sub(1));
        exp.min(self.max_backoff)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Dead-letter payload: the original record plus why it was given up on.
#[derive(Debug, Serialize)]
struct DeadLetter<'a> {
    cause: &'a str,
    attempts: u32,
    failed_at: DateTime<Utc>,
    payload: &'a str,
}

/// Decode a log record into its issuance payload.
///
/// Version checking happens here so a rolled-forward producer cannot feed
/// the writer payloads it would silently misread.
fn decode_record(payload: &[u8]) -> Result<CouponIssuedEvent, String> {
    let envelope: EventEnvelope<CouponIssuedEvent> =
        serde_json::from_slice(payload).map_err(|e| format!("malformed envelope: {}", e))?;
    if envelope.schema_version > SCHEMA_VERSION {
        return Err(format!(
            "unsupported schema version {} (writer understands up to {})",
            envelope.schema_version, SCHEMA_VERSION
        ));
    }
    Ok(envelope.data)
}

pub struct IssuanceWriter {
    consumer: StreamConsumer,
    dlq_producer: FutureProducer,
    repo: CouponRepository,
    topic: String,
    dlq_topic: String,
    retry: RetryPolicy,
}

impl IssuanceWriter {
    pub fn new(config: &KafkaConfig, pool: PgPool, retry: RetryPolicy) -> anyhow::Result<Self> {
        // Manual commits: an offset is only safe to commit once the row it
        // covers is durable.
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "10000")
            .create()?;

        let dlq_producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", "coupon-issuance-writer-dlq")
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            consumer,
            dlq_producer,
            repo: CouponRepository::new(pool),
            topic: config.issuance_topic.clone(),
            dlq_topic: config.dlq_topic.clone(),
            retry,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        self.consumer
            .subscribe(&[self.topic.as_str()])
            .map_err(|e| anyhow::anyhow!("failed to subscribe to {}: {}", self.topic, e))?;

        info!(
            topic = %self.topic,
            dlq_topic = %self.dlq_topic,
            "Issuance writer started"
        );

        loop {
            match self.consumer.recv().await {
                Ok(message) => self.handle_message(&message).await,
                Err(e) => {
                    warn!("Issuance log consumer error: {}", e);
                }
            }
        }
    }

    async fn handle_message(&self, message: &BorrowedMessage<'_>) {
        let payload = match message.payload() {
            Some(p) => p,
            None => {
                warn!(
                    offset = message.offset(),
                    "Skipping issuance record with empty payload"
                );
                self.commit(message);
                return;
            }
        };

        match decode_record(payload) {
            Ok(event) => self.apply_with_retry(message, &event).await,
            Err(cause) => {
                // No number of retries fixes a malformed payload.
                warn!(
                    offset = message.offset(),
                    cause = %cause,
                    "Dead-lettering undecodable issuance record"
                );
                self.dead_letter(message, &cause, 0).await;
            }
        }

        self.commit(message);
    }

    async fn apply_with_retry(&self, message: &BorrowedMessage<'_>, event: &CouponIssuedEvent) {
        let mut attempt = 0u32;
        loop {
            match self.repo.insert_issuance(event).await {
                Ok(InsertOutcome::Inserted) => {
                    debug!(
                        coupon_id = %event.coupon_id,
                        user_id = %event.user_id,
                        event_id = %event.event_id,
                        "Issuance persisted"
                    );
                    metrics::record_writer("inserted");
                    return;
                }
                Ok(InsertOutcome::AlreadyApplied) => {
                    // Replayed record or concurrent writer; already durable.
                    debug!(
                        coupon_id = %event.coupon_id,
                        "Issuance already persisted, absorbing replay"
                    );
                    metrics::record_writer("replayed");
                    return;
                }
                Err(db_err) => {
                    attempt += 1;
                    if !self.retry.should_retry(attempt) {
                        error!(
                            coupon_id = %event.coupon_id,
                            attempts = attempt,
                            error = %db_err,
                            "Database retries exhausted, dead-lettering issuance record"
                        );
                        self.dead_letter(message, &db_err.to_string(), attempt).await;
                        return;
                    }
                    let backoff = self.retry.backoff(attempt);
                    warn!(
                        coupon_id = %event.coupon_id,
                        attempt = attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %db_err,
                        "Transient database error, backing off"
                    );
                    sleep(backoff).await;
                }
            }
        }
    }

    /// Hand the record to the dead-letter topic with its original key and
    /// the failure cause, so the partition is never blocked by one poison
    /// record.
    async fn dead_letter(&self, message: &BorrowedMessage<'_>, cause: &str, attempts: u32) {
        let key = message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default();
        let original = message
            .payload()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .unwrap_or_default();

        let dead_letter = DeadLetter {
            cause,
            attempts,
            failed_at: Utc::now(),
            payload: &original,
        };

        let body = match serde_json::to_string(&dead_letter) {
            Ok(b) => b,
            Err(e) => {
                error!("Failed to serialize dead letter: {}", e);
                return;
            }
        };

        let record = FutureRecord::to(&self.dlq_topic).key(&key).payload(&body);

        match self
            .dlq_producer
            .send(record, Duration::from_secs(5))
            .await
        {
            Ok(_) => {
                metrics::record_writer("dead_lettered");
                info!(
                    dlq_topic = %self.dlq_topic,
                    key = %key,
                    cause = %cause,
                    "Issuance record routed to dead letter topic"
                );
            }
            Err((e, _)) => {
                // The offset still commits; reconciliation surfaces the
                // missing row as a Gap for operator triage.
                error!(
                    key = %key,
                    error = %e,
                    "Failed to publish dead letter, record is lost to reconciliation"
                );
            }
        }
    }

    fn commit(&self, message: &BorrowedMessage<'_>) {
        if let Err(e) = self.consumer.commit_message(message, CommitMode::Async) {
            warn!("Failed to commit issuance log offset: {}", e);
        }
    }
}
