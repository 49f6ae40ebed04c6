/// Domain models shared across repositories, services, and handlers.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A coupon campaign with finite stock.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CouponEvent {
    pub event_id: String,
    pub event_name: String,
    pub description: Option<String>,
    pub total_stock: i64,
    /// Advisory mirror of the in-memory counter, seeded at initialization.
    /// The Redis counter is authoritative for decisions.
    pub remaining_stock: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CouponEvent {
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now > self.end_time
    }
}

/// The durable record of a successful coupon grant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserCoupon {
    pub id: Uuid,
    pub coupon_id: Uuid,
    pub user_id: String,
    pub event_id: String,
    pub issued_at: DateTime<Utc>,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
}

/// Aggregated view of an event, combining in-memory counters with the
/// persisted issuance count.
#[derive(Debug, Clone, Serialize)]
pub struct EventStatus {
    pub event_id: String,
    pub remaining_stock: i64,
    pub total_participants: i64,
    pub total_issued: i64,
    pub is_active: bool,
}
