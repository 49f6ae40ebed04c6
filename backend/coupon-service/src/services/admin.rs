//! Event lifecycle operations.
//!
//! Initialization is an explicit admin action, never a side effect of the
//! first issuance request: auto-seeding would let concurrent first
//! requests each seed the counter. Both halves of `initialize_stock` (the
//! metadata row and the in-memory seed) are safe to re-run, so a partial
//! failure is repaired by calling it again.

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::db::{CouponRepository, EventRepository, NewCouponEvent};
use crate::error::AppError;
use crate::models::{CouponEvent, EventStatus};
use crate::store::DecisionStore;

/// Result of an `initialize_stock` call.
#[derive(Debug, Clone, Serialize)]
pub struct InitializeOutcome {
    /// Whether this call seeded the counter (`false` means it was already
    /// initialized and the call was a no-op).
    pub seeded: bool,
    pub total_stock: i64,
}

pub struct AdminService {
    store: Arc<dyn DecisionStore>,
    events: EventRepository,
    coupons: CouponRepository,
    participant_ttl_secs: i64,
}

impl AdminService {
    pub fn new(
        store: Arc<dyn DecisionStore>,
        events: EventRepository,
        coupons: CouponRepository,
        participant_ttl_secs: i64,
    ) -> Self {
        Self {
            store,
            events,
            coupons,
            participant_ttl_secs,
        }
    }

    pub async fn create_event(&self, new: &NewCouponEvent) -> Result<CouponEvent, AppError> {
        if new.event_id.is_empty() {
            return Err(AppError::Validation("event_id must not be empty".into()));
        }
        if new.total_stock < 0 {
            return Err(AppError::Validation("total_stock must be >= 0".into()));
        }
        if new.end_time <= new.start_time {
            return Err(AppError::Validation(
                "end_time must be after start_time".into(),
            ));
        }

        let event = self.events.create(new).await?;
        info!(event_id = %event.event_id, total_stock = event.total_stock, "Event created");
        Ok(event)
    }

    /// Seed the in-memory stock counter and record it on the metadata row.
    ///
    /// Re-running with the same total is a no-op; re-running with a
    /// different total after the counter exists is a conflict: total
    /// stock is immutable once initialized.
    pub async fn initialize_stock(
        &self,
        event_id: &str,
        total: i64,
    ) -> Result<InitializeOutcome, AppError> {
        if total < 0 {
            return Err(AppError::Validation("initial_stock must be >= 0".into()));
        }

        let event = self
            .events
            .get(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("event {}", event_id)))?;

        let seeded = self
            .store
            .init_event(event_id, total, self.participant_ttl_secs)
            .await?;

        if seeded {
            self.events.set_stock(event_id, total).await?;
            info!(event_id = %event_id, total_stock = total, "Event stock initialized");
        } else if event.total_stock != total {
            return Err(AppError::Conflict(format!(
                "event {} already initialized with stock {}",
                event_id, event.total_stock
            )));
        }

        Ok(InitializeOutcome {
            seeded,
            total_stock: total,
        })
    }

    /// In-memory counters for stock and participants, persisted count for
    /// issuances. Each side is read from its own authority.
    pub async fn get_status(&self, event_id: &str) -> Result<EventStatus, AppError> {
        let event = self
            .events
            .get(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("event {}", event_id)))?;

        let remaining = self.store.remaining(event_id).await?.unwrap_or(0);
        let participants = self.store.participants_count(event_id).await?;
        let issued = self.coupons.count_for_event(event_id).await?;

        Ok(EventStatus {
            event_id: event.event_id,
            remaining_stock: remaining,
            total_participants: participants,
            total_issued: issued,
            is_active: event.is_active,
        })
    }

    /// Flip the active flag. In-memory keys are left to age out via TTL;
    /// deleting the counter would make subsequent requests look like an
    /// operator fault instead of a closed campaign.
    pub async fn deactivate_event(&self, event_id: &str) -> Result<(), AppError> {
        let updated = self.events.deactivate(event_id).await?;
        if !updated {
            return Err(AppError::NotFound(format!("event {}", event_id)));
        }
        info!(event_id = %event_id, "Event deactivated");
        Ok(())
    }
}
