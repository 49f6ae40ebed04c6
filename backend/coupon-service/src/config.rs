/// Configuration management for the coupon service
///
/// Loads configuration from environment variables.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    pub app: AppConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Redis configuration
    pub redis: RedisConfig,
    /// Kafka configuration
    pub kafka: KafkaConfig,
    /// Issuance tuning knobs
    pub issuance: IssuanceConfig,
    /// Reconciliation job configuration
    pub reconciliation: ReconciliationConfig,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (dev, staging, prod)
    pub env: String,
    /// Server host to bind to
    pub host: String,
    /// HTTP port
    pub http_port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,
    /// Max connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Min connections in pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL (redis://host:port)
    pub url: String,
}

/// Kafka configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Comma-separated broker list
    pub brokers: String,
    /// Issuance event topic
    pub issuance_topic: String,
    /// Dead-letter topic for records the writer gave up on
    pub dlq_topic: String,
    /// Consumer group id for the durable writer
    pub consumer_group: String,
}

/// Issuance tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuanceConfig {
    /// TTL applied to the participant set and per-user cache slot. Must
    /// outlive the event's end time plus the maximum expected consumer lag,
    /// or reconciliation reports false gaps.
    pub participant_ttl_secs: i64,
    /// Deadline for the decision step of a single request, in milliseconds.
    /// A publish already in flight after a PASS is never cancelled.
    pub decision_deadline_ms: u64,
}

/// Reconciliation job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Seconds between reconciliation cycles
    pub interval_secs: u64,
}

// Default values
fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let app = AppConfig {
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: std::env::var("PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8080),
        };

        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL environment variable not set")?,
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_max_connections),
            min_connections: std::env::var("DB_MIN_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_min_connections),
        };

        let redis = RedisConfig {
            url: std::env::var("REDIS_URL").context("REDIS_URL environment variable not set")?,
        };

        let kafka = KafkaConfig {
            brokers: std::env::var("KAFKA_BROKERS")
                .context("KAFKA_BROKERS environment variable not set")?,
            issuance_topic: std::env::var("KAFKA_ISSUANCE_TOPIC")
                .unwrap_or_else(|_| event_schema::topics::ISSUANCE.to_string()),
            dlq_topic: std::env::var("KAFKA_ISSUANCE_DLQ_TOPIC")
                .unwrap_or_else(|_| event_schema::topics::ISSUANCE_DLQ.to_string()),
            consumer_group: std::env::var("KAFKA_CONSUMER_GROUP")
                .unwrap_or_else(|_| "coupon-issuance-writer".to_string()),
        };

        let issuance = IssuanceConfig {
            participant_ttl_secs: std::env::var("PARTICIPANT_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(48 * 3600),
            decision_deadline_ms: std::env::var("DECISION_DEADLINE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1_000),
        };

        let reconciliation = ReconciliationConfig {
            interval_secs: std::env::var("RECONCILIATION_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
        };

        Ok(Config {
            app,
            database,
            redis,
            kafka,
            issuance,
            reconciliation,
        })
    }
}
