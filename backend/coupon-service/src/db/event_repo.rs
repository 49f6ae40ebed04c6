use crate::models::CouponEvent;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;

/// Metadata for a new coupon campaign.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCouponEvent {
    pub event_id: String,
    pub event_name: String,
    pub description: Option<String>,
    pub total_stock: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Repository for coupon_events rows.
#[derive(Clone)]
pub struct EventRepository {
    pool: PgPool,
}

impl EventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create an event (idempotent - re-running returns the existing row).
    pub async fn create(&self, new: &NewCouponEvent) -> Result<CouponEvent, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO coupon_events
                (event_id, event_name, description, total_stock, remaining_stock,
                 start_time, end_time, is_active)
            VALUES ($1, $2, $3, $4, $4, $5, $6, TRUE)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&new.event_id)
        .bind(&new.event_name)
        .bind(&new.description)
        .bind(new.total_stock)
        .bind(new.start_time)
        .bind(new.end_time)
        .execute(&self.pool)
        .await?;

        self.get(&new.event_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn get(&self, event_id: &str) -> Result<Option<CouponEvent>, sqlx::Error> {
        sqlx::query_as::<_, CouponEvent>(
            r#"
            SELECT event_id, event_name, description, total_stock, remaining_stock,
                   start_time, end_time, is_active, created_at, updated_at
            FROM coupon_events
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Record the initialized stock on the metadata row. `remaining_stock`
    /// is an advisory mirror of the in-memory counter, never decremented
    /// on the issuance path.
    pub async fn set_stock(&self, event_id: &str, total: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE coupon_events
            SET total_stock = $2, remaining_stock = $2, updated_at = NOW()
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .bind(total)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn deactivate(&self, event_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE coupon_events
            SET is_active = FALSE, updated_at = NOW()
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Events worth reconciling: still active, or ended recently enough
    /// that their in-memory keys have not aged out yet.
    pub async fn list_reconcilable(
        &self,
        horizon_secs: i64,
    ) -> Result<Vec<CouponEvent>, sqlx::Error> {
        sqlx::query_as::<_, CouponEvent>(
            r#"
            SELECT event_id, event_name, description, total_stock, remaining_stock,
                   start_time, end_time, is_active, created_at, updated_at
            FROM coupon_events
            WHERE is_active = TRUE
               OR end_time > NOW() - make_interval(secs => $1)
            ORDER BY event_id
            "#,
        )
        .bind(horizon_secs as f64)
        .fetch_all(&self.pool)
        .await
    }
}
