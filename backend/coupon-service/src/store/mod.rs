/// In-memory store client for the issuance decision.
///
/// The store is the sole authority for *who wins*; the database is the
/// authority for *what happened*. All stock and participant mutations go
/// through the two server-side scripts in [`scripts`]; nothing else in
/// the service touches those keys directly.
pub mod scripts;

use async_trait::async_trait;
use redis::{RedisError, Script, Value};
use redis_utils::{with_timeout, SharedConnectionManager};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Key layout. The `{event_id}` hash tag co-locates all three keys on one
/// shard so the scripts can touch them in a single indivisible step.
pub fn stock_key(event_id: &str) -> String {
    format!("coupon:{{{}}}:stock", event_id)
}

pub fn participants_key(event_id: &str) -> String {
    format!("coupon:{{{}}}:participants", event_id)
}

pub fn user_coupon_key(event_id: &str, user_id: &str) -> String {
    format!("coupon:user:{{{}}}:{}", event_id, user_id)
}

/// Failure signals surfaced to the handler.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection or cluster failure before the decision could be
    /// evaluated. Fatal to the current request; the handler responds 503.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store replied with something the client cannot interpret.
    #[error("script error: {0}")]
    Script(String),
}

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Outcome of the atomic decision script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    /// PASS: the user is now a participant and stock was debited exactly
    /// once. `remaining` is the post-decrement value, never negative.
    Issued { coupon_id: Uuid, remaining: i64 },
    /// The user already holds a decision for this event.
    AlreadyParticipated,
    /// Stock reached zero before this request.
    SoldOut,
    /// The stock key was never seeded; initialization is an explicit
    /// admin action.
    NotInitialized,
}

/// The full client surface of the in-memory store.
///
/// A trait seam so the handler state machine and the admin surface can be
/// exercised against an in-memory fake with the same atomic semantics.
#[async_trait]
pub trait DecisionStore: Send + Sync {
    /// Seed the stock counter. Returns `true` if this call seeded it,
    /// `false` if it was already initialized (re-running is a no-op).
    async fn init_event(&self, event_id: &str, stock: i64, ttl_secs: i64)
        -> Result<bool, StoreError>;

    /// Run the atomic decision. Never retried by the client: one
    /// successful execution has already debited stock.
    async fn issue(
        &self,
        event_id: &str,
        user_id: &str,
        coupon_id: Uuid,
        ttl_secs: i64,
    ) -> Result<IssueOutcome, StoreError>;

    /// Roll back a PASS whose event could not be made durable. Returns
    /// `true` if a decision was undone, `false` if there was nothing to do.
    async fn compensate(&self, event_id: &str, user_id: &str) -> Result<bool, StoreError>;

    /// Current stock counter, `None` when not initialized (or expired).
    async fn remaining(&self, event_id: &str) -> Result<Option<i64>, StoreError>;

    /// Cardinality of the participant set.
    async fn participants_count(&self, event_id: &str) -> Result<i64, StoreError>;

    /// The coupon id cached for a user, if they won.
    async fn get_user_coupon(
        &self,
        event_id: &str,
        user_id: &str,
    ) -> Result<Option<Uuid>, StoreError>;

    /// Liveness probe for the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Redis-backed implementation.
///
/// Scripts are loaded once and invoked by precomputed hash; `redis::Script`
/// re-loads transparently when the server reports the script missing.
pub struct CouponStore {
    manager: SharedConnectionManager,
    issue_script: Script,
    compensate_script: Script,
}

impl CouponStore {
    pub fn new(manager: SharedConnectionManager) -> Self {
        Self {
            manager,
            issue_script: Script::new(scripts::ISSUE_SCRIPT),
            compensate_script: Script::new(scripts::COMPENSATE_SCRIPT),
        }
    }

    async fn connection(&self) -> redis::aio::ConnectionManager {
        let guard = self.manager.lock().await;
        guard.clone()
    }

    /// Run an idempotent read, retrying once after a connection error (the
    /// manager reconnects between attempts). Mutating commands never come
    /// through here.
    async fn query_read<T: redis::FromRedisValue>(
        &self,
        cmd: &redis::Cmd,
    ) -> Result<T, StoreError> {
        let mut conn = self.connection().await;
        match with_timeout(cmd.query_async(&mut conn)).await {
            Ok(value) => Ok(value),
            Err(err) => {
                debug!("retrying idempotent store read after: {}", err);
                let mut conn = self.connection().await;
                with_timeout(cmd.query_async(&mut conn))
                    .await
                    .map_err(|e| StoreError::Unavailable(e.to_string()))
            }
        }
    }
}

fn reply_str(value: &Value) -> Result<String, StoreError> {
    match value {
        Value::Data(bytes) => String::from_utf8(bytes.clone())
            .map_err(|_| StoreError::Script("non-utf8 string in script reply".to_string())),
        Value::Status(s) => Ok(s.clone()),
        other => Err(StoreError::Script(format!(
            "expected string in script reply, got {:?}",
            other
        ))),
    }
}

fn reply_int(value: &Value) -> Result<i64, StoreError> {
    match value {
        Value::Int(n) => Ok(*n),
        other => Err(StoreError::Script(format!(
            "expected integer in script reply, got {:?}",
            other
        ))),
    }
}

/// Decode the issue script's reply array into an [`IssueOutcome`].
fn parse_issue_reply(reply: &[Value]) -> Result<IssueOutcome, StoreError> {
    if reply.is_empty() {
        return Err(StoreError::Script("empty script reply".to_string()));
    }
    let passed = reply_int(&reply[0])? == 1;

    if passed {
        if reply.len() < 4 {
            return Err(StoreError::Script(format!(
                "truncated PASS reply of {} elements",
                reply.len()
            )));
        }
        let coupon_id = reply_str(&reply[2])?;
        let coupon_id = Uuid::parse_str(&coupon_id)
            .map_err(|_| StoreError::Script(format!("malformed coupon id: {}", coupon_id)))?;
        let remaining = reply_int(&reply[3])?;
        return Ok(IssueOutcome::Issued {
            coupon_id,
            remaining,
        });
    }

    if reply.len() < 2 {
        return Err(StoreError::Script("FAIL reply without reason".to_string()));
    }
    match reply_str(&reply[1])?.as_str() {
        "USER_ALREADY_PARTICIPATED" => Ok(IssueOutcome::AlreadyParticipated),
        "NO_STOCK_AVAILABLE" => Ok(IssueOutcome::SoldOut),
        "STOCK_NOT_INITIALIZED" => Ok(IssueOutcome::NotInitialized),
        other => Err(StoreError::Script(format!("unknown FAIL code: {}", other))),
    }
}

#[async_trait]
impl DecisionStore for CouponStore {
    async fn init_event(
        &self,
        event_id: &str,
        stock: i64,
        ttl_secs: i64,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection().await;
        // SET NX so concurrent (or repeated) initializations cannot clobber
        // a counter that is already being debited.
        let reply: Option<String> = with_timeout(
            redis::cmd("SET")
                .arg(stock_key(event_id))
                .arg(stock)
                .arg("NX")
                .arg("EX")
                .arg(ttl_secs)
                .query_async(&mut conn),
        )
        .await?;
        Ok(reply.is_some())
    }

    async fn issue(
        &self,
        event_id: &str,
        user_id: &str,
        coupon_id: Uuid,
        ttl_secs: i64,
    ) -> Result<IssueOutcome, StoreError> {
        let mut conn = self.connection().await;

        // Not retried on failure: the script is not idempotent, and a lost
        // reply does not tell us whether stock was already debited.
        let reply: Vec<Value> = with_timeout(
            self.issue_script
                .key(stock_key(event_id))
                .key(participants_key(event_id))
                .key(user_coupon_key(event_id, user_id))
                .arg(user_id)
                .arg(coupon_id.to_string())
                .arg(ttl_secs)
                .invoke_async(&mut conn),
        )
        .await?;
        parse_issue_reply(&reply)
    }

    async fn compensate(&self, event_id: &str, user_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await;
        let undone: i64 = with_timeout(
            self.compensate_script
                .key(stock_key(event_id))
                .key(participants_key(event_id))
                .key(user_coupon_key(event_id, user_id))
                .arg(user_id)
                .invoke_async(&mut conn),
        )
        .await?;
        Ok(undone == 1)
    }

    async fn remaining(&self, event_id: &str) -> Result<Option<i64>, StoreError> {
        self.query_read(redis::cmd("GET").arg(stock_key(event_id)))
            .await
    }

    async fn participants_count(&self, event_id: &str) -> Result<i64, StoreError> {
        self.query_read(redis::cmd("SCARD").arg(participants_key(event_id)))
            .await
    }

    async fn get_user_coupon(
        &self,
        event_id: &str,
        user_id: &str,
    ) -> Result<Option<Uuid>, StoreError> {
        let cached: Option<String> = self
            .query_read(redis::cmd("GET").arg(user_coupon_key(event_id, user_id)))
            .await?;
        match cached {
            None => Ok(None),
            Some(raw) => Uuid::parse_str(&raw)
                .map(Some)
                .map_err(|_| StoreError::Script(format!("malformed cached coupon id: {}", raw))),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await;
        let _: String = with_timeout(redis::cmd("PING").query_async(&mut conn)).await?;
        Ok(())
    }
}
