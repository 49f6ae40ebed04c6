//! The synchronous issuance state machine.
//!
//! validate → mint coupon id → atomic decision → publish-and-await →
//! respond. The coupon id is minted *before* the decision so it survives
//! as the correlation token across the in-memory cache, the log record,
//! and the persisted row. A PASS is only reported to the client after the
//! log append is acknowledged; if the append fails, the decision is
//! compensated so a client retry is safe.

use chrono::Utc;
use event_schema::CouponIssuedEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::kafka::IssuancePublisher;
use crate::metrics;
use crate::store::{DecisionStore, IssueOutcome};

const MAX_ID_LEN: usize = 128;

/// Terminal business rejections, returned to the client as 200 with
/// `success: false`. The HTTP call succeeded; the answer is no.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    AlreadyParticipated,
    SoldOut,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::AlreadyParticipated => "USER_ALREADY_PARTICIPATED",
            RejectReason::SoldOut => "NO_STOCK_AVAILABLE",
        }
    }
}

/// Outcome of a well-formed issuance request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueResult {
    Issued { coupon_id: Uuid, remaining: i64 },
    Rejected(RejectReason),
}

pub struct IssuanceService {
    store: Arc<dyn DecisionStore>,
    publisher: Arc<dyn IssuancePublisher>,
    participant_ttl_secs: i64,
    decision_deadline: Duration,
}

fn validate_id(field: &str, value: &str) -> Result<(), AppError> {
    if value.is_empty() {
        return Err(AppError::Validation(format!("{} must not be empty", field)));
    }
    if value.len() > MAX_ID_LEN {
        return Err(AppError::Validation(format!(
            "{} too long: {} characters (max {})",
            field,
            value.len(),
            MAX_ID_LEN
        )));
    }
    Ok(())
}

impl IssuanceService {
    pub fn new(
        store: Arc<dyn DecisionStore>,
        publisher: Arc<dyn IssuancePublisher>,
        participant_ttl_secs: i64,
        decision_deadline: Duration,
    ) -> Self {
        Self {
            store,
            publisher,
            participant_ttl_secs,
            decision_deadline,
        }
    }

    /// Run one issuance request end to end.
    ///
    /// The deadline covers the decision step only. Once the script has
    /// PASSed, the publish (and any compensation) runs to completion even
    /// if the client has given up: the record must exist, or the decision
    /// must be undone.
    pub async fn issue(&self, user_id: &str, event_id: &str) -> Result<IssueResult, AppError> {
        validate_id("user_id", user_id)?;
        validate_id("event_id", event_id)?;

        let coupon_id = Uuid::new_v4();

        let decision = match timeout(
            self.decision_deadline,
            self.store
                .issue(event_id, user_id, coupon_id, self.participant_ttl_secs),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                metrics::record_decision("deadline");
                return Err(AppError::StoreUnavailable(
                    "decision deadline exceeded".to_string(),
                ));
            }
        };

        match decision {
            IssueOutcome::AlreadyParticipated => {
                metrics::record_decision("duplicate");
                Ok(IssueResult::Rejected(RejectReason::AlreadyParticipated))
            }
            IssueOutcome::SoldOut => {
                metrics::record_decision("sold_out");
                Ok(IssueResult::Rejected(RejectReason::SoldOut))
            }
            IssueOutcome::NotInitialized => {
                metrics::record_decision("not_initialized");
                Err(AppError::StockNotInitialized(event_id.to_string()))
            }
            IssueOutcome::Issued {
                coupon_id,
                remaining,
            } => {
                self.make_durable(user_id, event_id, coupon_id, remaining)
                    .await
            }
        }
    }

    async fn make_durable(
        &self,
        user_id: &str,
        event_id: &str,
        coupon_id: Uuid,
        remaining: i64,
    ) -> Result<IssueResult, AppError> {
        let event = CouponIssuedEvent {
            coupon_id,
            user_id: user_id.to_string(),
            event_id: event_id.to_string(),
            issued_at: Utc::now(),
        };

        match self.publisher.publish_issued(&event).await {
            Ok(()) => {
                metrics::record_decision("issued");
                info!(
                    coupon_id = %coupon_id,
                    user_id = %user_id,
                    event_id = %event_id,
                    remaining = remaining,
                    "Coupon issued"
                );
                Ok(IssueResult::Issued {
                    coupon_id,
                    remaining,
                })
            }
            Err(publish_err) => {
                // The client must not be told it won when no record
                // survived. Roll the decision back so a retry is safe.
                match self.store.compensate(event_id, user_id).await {
                    Ok(true) => {
                        metrics::record_compensation("rolled_back");
                        warn!(
                            coupon_id = %coupon_id,
                            user_id = %user_id,
                            event_id = %event_id,
                            error = %publish_err,
                            "Publish failed, decision rolled back"
                        );
                    }
                    Ok(false) => {
                        metrics::record_compensation("nothing_to_undo");
                        warn!(
                            coupon_id = %coupon_id,
                            user_id = %user_id,
                            event_id = %event_id,
                            "Publish failed but no decision found to roll back"
                        );
                    }
                    Err(comp_err) => {
                        metrics::record_compensation("failed");
                        error!(
                            coupon_id = %coupon_id,
                            user_id = %user_id,
                            event_id = %event_id,
                            publish_error = %publish_err,
                            compensation_error = %comp_err,
                            "Compensation failed; reconciliation will surface the orphaned decision"
                        );
                    }
                }
                Err(AppError::PublishFailed(publish_err.to_string()))
            }
        }
    }
}
