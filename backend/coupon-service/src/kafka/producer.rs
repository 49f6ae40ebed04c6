//! Issuance event producer.
//!
//! The handler publishes after the atomic decision and waits for broker
//! acknowledgement before answering the client, so a returned PASS always
//! has a durable record behind it. The retry budget is deliberately tiny:
//! this wait sits inside the synchronous request path.

use async_trait::async_trait;
use event_schema::{CouponIssuedEvent, EventEnvelope};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::KafkaConfig;

const SOURCE_SERVICE: &str = "coupon-service";

#[derive(Debug, Error)]
pub enum PublishError {
    /// All attempts within the retry budget failed. The decision must be
    /// compensated before the client hears anything.
    #[error("publish failed after {attempts} attempts: {reason}")]
    Exhausted { attempts: u32, reason: String },

    /// The producer itself is unusable (serialization, broker metadata).
    #[error("producer unavailable: {0}")]
    Unavailable(String),
}

/// Bounded retry policy for the synchronous publish.
///
/// The whole budget (every attempt plus every backoff) stays within
/// 100 ms so the publish wait cannot eat the request deadline.
#[derive(Debug, Clone)]
pub struct PublishRetryPolicy {
    pub max_attempts: u32,
    /// Per-attempt delivery timeout.
    pub attempt_timeout: Duration,
    /// Backoff before attempt N+1 is `base_backoff * 2^N`.
    pub base_backoff: Duration,
}

impl Default for PublishRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_millis(25),
            base_backoff: Duration::from_millis(8),
        }
    }
}

impl PublishRetryPolicy {
    pub fn backoff(&self, completed_attempts: u32) -> Duration {
        self.base_backoff * 2u32.pow(completed_attempts.saturating_sub(1))
    }

    /// Worst-case wall-clock cost of a publish that exhausts every attempt.
    pub fn total_budget(&self) -> Duration {
        let attempts = self.attempt_timeout * self.max_attempts;
        let backoffs: Duration = (1..self.max_attempts).map(|n| self.backoff(n)).sum();
        attempts + backoffs
    }
}

/// Publisher seam between the handler state machine and Kafka.
#[async_trait]
pub trait IssuancePublisher: Send + Sync {
    /// Append the event and wait for the broker's acknowledgement.
    async fn publish_issued(&self, event: &CouponIssuedEvent) -> Result<(), PublishError>;

    /// Liveness probe for the health endpoint.
    async fn check_connectivity(&self) -> Result<(), PublishError>;
}

pub struct IssuanceProducer {
    producer: Arc<FutureProducer>,
    topic: String,
    retry: PublishRetryPolicy,
}

impl IssuanceProducer {
    pub fn new(config: &KafkaConfig, retry: PublishRetryPolicy) -> anyhow::Result<Self> {
        let producer = rdkafka::config::ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", SOURCE_SERVICE)
            // Idempotency and reliability settings
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("max.in.flight.requests.per.connection", "5")
            .set("retries", "3")
            // The handler blocks on this ack; batching buys nothing here.
            .set("linger.ms", "0")
            .set(
                "message.timeout.ms",
                retry.attempt_timeout.as_millis().to_string(),
            )
            .create::<FutureProducer>()?;

        info!(
            brokers = %config.brokers,
            topic = %config.issuance_topic,
            budget_ms = retry.total_budget().as_millis() as u64,
            "Issuance Kafka producer initialized"
        );

        Ok(Self {
            producer: Arc::new(producer),
            topic: config.issuance_topic.clone(),
            retry,
        })
    }
}

#[async_trait]
impl IssuancePublisher for IssuanceProducer {
    async fn publish_issued(&self, event: &CouponIssuedEvent) -> Result<(), PublishError> {
        let envelope = EventEnvelope::new(SOURCE_SERVICE, event.clone());
        let payload =
            serde_json::to_string(&envelope).map_err(|e| PublishError::Unavailable(e.to_string()))?;
        let partition_key = event.partition_key();

        let mut attempts = 0u32;
        loop {
            let record = FutureRecord::to(&self.topic)
                .key(&partition_key)
                .payload(&payload);

            match self.producer.send(record, self.retry.attempt_timeout).await {
                Ok((partition, offset)) => {
                    debug!(
                        coupon_id = %event.coupon_id,
                        partition_key = %partition_key,
                        partition = partition,
                        offset = offset,
                        "Published issuance event"
                    );
                    return Ok(());
                }
                Err((err, _)) => {
                    attempts += 1;
                    if attempts >= self.retry.max_attempts {
                        warn!(
                            error = %err,
                            coupon_id = %event.coupon_id,
                            attempts = attempts,
                            "Publish retry budget exhausted"
                        );
                        return Err(PublishError::Exhausted {
                            attempts,
                            reason: err.to_string(),
                        });
                    }
                    let backoff = self.retry.backoff(attempts);
                    debug!(
                        error = %err,
                        coupon_id = %event.coupon_id,
                        attempt = attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "Publish attempt failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn check_connectivity(&self) -> Result<(), PublishError> {
        let producer = self.producer.clone();
        let topic = self.topic.clone();
        // fetch_metadata is a blocking librdkafka call
        tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(Some(&topic), Duration::from_millis(500))
                .map(|_| ())
                .map_err(|e| PublishError::Unavailable(e.to_string()))
        })
        .await
        .map_err(|e| PublishError::Unavailable(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = PublishRetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(8));
        assert_eq!(policy.backoff(2), Duration::from_millis(16));
    }

    #[test]
    fn retry_budget_stays_within_the_latency_goal() {
        let policy = PublishRetryPolicy::default();
        assert!(
            policy.total_budget() <= Duration::from_millis(100),
            "publish budget {}ms would blow the synchronous latency goal",
            policy.total_budget().as_millis()
        );
    }
}
