//! Reconciliation background job.
//!
//! Periodically cross-checks the in-memory participant count against the
//! persisted issuance count for every event still worth watching. The
//! consumer may lag but must never overshoot: `issuances_in_db` above
//! `participants_in_store` means an invariant was violated somewhere.
//! The job reports; it never mutates either side.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::db::{CouponRepository, EventRepository};
use crate::metrics;
use crate::store::DecisionStore;

/// Classified difference between the store and the database for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discrepancy {
    /// Both sides agree.
    InSync,
    /// db < store and the gap is still moving: the consumer is draining.
    Lag { gap: i64 },
    /// db < store, the gap held steady across cycles, and the event has
    /// ended: dead-lettered or lost records, operator triage.
    Gap { gap: i64 },
    /// db > store: more durable rows than admitted participants.
    Overshoot { excess: i64 },
}

/// Pure classification, separated from I/O so the policy is testable.
///
/// `previous_gap` is the gap this event showed on the previous cycle, if
/// any; a repeat of the same value is what "stable" means.
pub fn classify(
    store_participants: i64,
    persisted: i64,
    previous_gap: Option<i64>,
    event_ended: bool,
) -> Discrepancy {
    if persisted > store_participants {
        return Discrepancy::Overshoot {
            excess: persisted - store_participants,
        };
    }
    if persisted == store_participants {
        return Discrepancy::InSync;
    }
    let gap = store_participants - persisted;
    if event_ended && previous_gap == Some(gap) {
        Discrepancy::Gap { gap }
    } else {
        Discrepancy::Lag { gap }
    }
}

pub struct ReconciliationJob {
    store: Arc<dyn DecisionStore>,
    events: EventRepository,
    coupons: CouponRepository,
    interval: Duration,
    /// How long after end_time an event is still reconciled; matches the
    /// participant TTL so tracking stops when the keys age out.
    horizon_secs: i64,
    last_gap: HashMap<String, i64>,
}

impl ReconciliationJob {
    pub fn new(
        store: Arc<dyn DecisionStore>,
        events: EventRepository,
        coupons: CouponRepository,
        interval: Duration,
        horizon_secs: i64,
    ) -> Self {
        Self {
            store,
            events,
            coupons,
            interval,
            horizon_secs,
            last_gap: HashMap::new(),
        }
    }

    pub async fn run(mut self) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Reconciliation job started"
        );

        loop {
            sleep(self.interval).await;

            match self.run_cycle().await {
                Ok(checked) => {
                    debug!(events_checked = checked, "Reconciliation cycle completed");
                }
                Err(e) => {
                    error!("Reconciliation cycle failed: {:#}", e);
                }
            }
        }
    }

    async fn run_cycle(&mut self) -> anyhow::Result<usize> {
        let events = self.events.list_reconcilable(self.horizon_secs).await?;
        let now = chrono::Utc::now();

        for event in &events {
            let participants = match self.store.participants_count(&event.event_id).await {
                Ok(count) => count,
                Err(e) => {
                    // A store outage is not a discrepancy; skip the event
                    // this cycle rather than mistrain the gap history.
                    warn!(
                        event_id = %event.event_id,
                        error = %e,
                        "Skipping reconciliation, store unreachable"
                    );
                    continue;
                }
            };
            let persisted = self.coupons.count_for_event(&event.event_id).await?;
            let previous_gap = self.last_gap.get(&event.event_id).copied();

            match classify(participants, persisted, previous_gap, event.has_ended(now)) {
                Discrepancy::InSync => {
                    metrics::record_reconciliation("in_sync");
                    self.last_gap.remove(&event.event_id);
                }
                Discrepancy::Lag { gap } => {
                    metrics::record_reconciliation("lag");
                    info!(
                        event_id = %event.event_id,
                        participants = participants,
                        persisted = persisted,
                        gap = gap,
                        "Consumer lagging behind the store"
                    );
                    self.last_gap.insert(event.event_id.clone(), gap);
                }
                Discrepancy::Gap { gap } => {
                    metrics::record_reconciliation("gap");
                    warn!(
                        event_id = %event.event_id,
                        participants = participants,
                        persisted = persisted,
                        gap = gap,
                        "Stable gap after event end, records dead-lettered or lost"
                    );
                    self.last_gap.insert(event.event_id.clone(), gap);
                }
                Discrepancy::Overshoot { excess } => {
                    metrics::record_reconciliation("overshoot");
                    error!(
                        event_id = %event.event_id,
                        participants = participants,
                        persisted = persisted,
                        excess = excess,
                        "More persisted issuances than admitted participants"
                    );
                }
            }
        }

        Ok(events.len())
    }
}
