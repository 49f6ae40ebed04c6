use crate::models::UserCoupon;
use event_schema::CouponIssuedEvent;
use sqlx::PgPool;
use uuid::Uuid;

/// Result of applying an issuance event to the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was written.
    Inserted,
    /// A row matching the intended one already exists (replayed record or
    /// a concurrent writer got there first); nothing left to do.
    AlreadyApplied,
}

/// Result of a redemption attempt.
#[derive(Debug, Clone)]
pub enum RedeemOutcome {
    Redeemed(UserCoupon),
    AlreadyUsed,
    NotFound,
}

/// Repository for user_coupons rows.
///
/// Mutual exclusion on (user_id, event_id) is carried by the unique
/// indexes, not by application locks; the schema tolerates out-of-order
/// and replayed log records because of them.
#[derive(Clone)]
pub struct CouponRepository {
    pool: PgPool,
}

impl CouponRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Materialize an issuance event. Idempotent: a conflict on either
    /// uniqueness constraint means the record was already applied.
    pub async fn insert_issuance(
        &self,
        event: &CouponIssuedEvent,
    ) -> Result<InsertOutcome, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_coupons (id, coupon_id, user_id, event_id, issued_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.coupon_id)
        .bind(&event.user_id)
        .bind(&event.event_id)
        .bind(event.issued_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::AlreadyApplied)
        }
    }

    pub async fn count_for_event(&self, event_id: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM user_coupons
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get_by_coupon_id(
        &self,
        coupon_id: Uuid,
    ) -> Result<Option<UserCoupon>, sqlx::Error> {
        sqlx::query_as::<_, UserCoupon>(
            r#"
            SELECT id, coupon_id, user_id, event_id, issued_at, is_used, used_at
            FROM user_coupons
            WHERE coupon_id = $1
            "#,
        )
        .bind(coupon_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Mark a coupon used. The `is_used = FALSE` guard makes redemption
    /// single-shot under concurrent attempts.
    pub async fn redeem(&self, coupon_id: Uuid) -> Result<RedeemOutcome, sqlx::Error> {
        let redeemed = sqlx::query_as::<_, UserCoupon>(
            r#"
            UPDATE user_coupons
            SET is_used = TRUE, used_at = NOW()
            WHERE coupon_id = $1 AND is_used = FALSE
            RETURNING id, coupon_id, user_id, event_id, issued_at, is_used, used_at
            "#,
        )
        .bind(coupon_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(coupon) = redeemed {
            return Ok(RedeemOutcome::Redeemed(coupon));
        }

        match self.get_by_coupon_id(coupon_id).await? {
            Some(_) => Ok(RedeemOutcome::AlreadyUsed),
            None => Ok(RedeemOutcome::NotFound),
        }
    }
}
