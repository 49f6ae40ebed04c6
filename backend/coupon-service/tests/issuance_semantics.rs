//! Behavioral tests for the issuance state machine.
//!
//! Runs the real service logic against in-memory doubles that reproduce
//! the store's atomic semantics (one mutex around the whole decision, the
//! same shape the script gets from Redis's command queue). Covers the
//! stock ceiling, per-user uniqueness, exhaustion, and the
//! publish-failure compensation path.

use async_trait::async_trait;
use event_schema::CouponIssuedEvent;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use coupon_service::error::AppError;
use coupon_service::kafka::{IssuancePublisher, PublishError};
use coupon_service::services::{IssuanceService, IssueResult, RejectReason};
use coupon_service::store::{DecisionStore, IssueOutcome, StoreError};

#[derive(Default)]
struct FakeEventState {
    stock: Option<i64>,
    participants: HashSet<String>,
    coupons: HashMap<String, Uuid>,
}

/// In-memory decision store. A single mutex around the whole decision
/// gives the same linearization the Lua script gets from Redis.
#[derive(Default)]
struct InMemoryStore {
    events: Mutex<HashMap<String, FakeEventState>>,
}

#[async_trait]
impl DecisionStore for InMemoryStore {
    async fn init_event(
        &self,
        event_id: &str,
        stock: i64,
        _ttl_secs: i64,
    ) -> Result<bool, StoreError> {
        let mut events = self.events.lock().await;
        let state = events.entry(event_id.to_string()).or_default();
        if state.stock.is_some() {
            return Ok(false);
        }
        state.stock = Some(stock);
        Ok(true)
    }

    async fn issue(
        &self,
        event_id: &str,
        user_id: &str,
        coupon_id: Uuid,
        _ttl_secs: i64,
    ) -> Result<IssueOutcome, StoreError> {
        let mut events = self.events.lock().await;
        let state = events.entry(event_id.to_string()).or_default();

        if state.participants.contains(user_id) {
            return Ok(IssueOutcome::AlreadyParticipated);
        }
        match state.stock {
            None => Ok(IssueOutcome::NotInitialized),
            Some(stock) if stock <= 0 => Ok(IssueOutcome::SoldOut),
            Some(stock) => {
                state.participants.insert(user_id.to_string());
                state.stock = Some(stock - 1);
                state.coupons.insert(user_id.to_string(), coupon_id);
                Ok(IssueOutcome::Issued {
                    coupon_id,
                    remaining: stock - 1,
                })
            }
        }
    }

    async fn compensate(&self, event_id: &str, user_id: &str) -> Result<bool, StoreError> {
        let mut events = self.events.lock().await;
        let state = events.entry(event_id.to_string()).or_default();
        if state.participants.remove(user_id) {
            if let Some(stock) = state.stock {
                state.stock = Some(stock + 1);
            }
            state.coupons.remove(user_id);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn remaining(&self, event_id: &str) -> Result<Option<i64>, StoreError> {
        Ok(self
            .events
            .lock()
            .await
            .get(event_id)
            .and_then(|state| state.stock))
    }

    async fn participants_count(&self, event_id: &str) -> Result<i64, StoreError> {
        Ok(self
            .events
            .lock()
            .await
            .get(event_id)
            .map(|state| state.participants.len() as i64)
            .unwrap_or(0))
    }

    async fn get_user_coupon(
        &self,
        event_id: &str,
        user_id: &str,
    ) -> Result<Option<Uuid>, StoreError> {
        Ok(self
            .events
            .lock()
            .await
            .get(event_id)
            .and_then(|state| state.coupons.get(user_id).copied()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Publisher double: records every acknowledged event, and can be told to
/// fail to exercise the compensation path.
#[derive(Default)]
struct RecordingPublisher {
    fail: AtomicBool,
    published: Mutex<Vec<CouponIssuedEvent>>,
}

#[async_trait]
impl IssuancePublisher for RecordingPublisher {
    async fn publish_issued(&self, event: &CouponIssuedEvent) -> Result<(), PublishError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PublishError::Exhausted {
                attempts: 3,
                reason: "broker unreachable".to_string(),
            });
        }
        self.published.lock().await.push(event.clone());
        Ok(())
    }

    async fn check_connectivity(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

fn service_with(
    store: Arc<dyn DecisionStore>,
    publisher: Arc<RecordingPublisher>,
) -> IssuanceService {
    IssuanceService::new(store, publisher, 3600, Duration::from_secs(1))
}

fn setup() -> (
    Arc<InMemoryStore>,
    Arc<RecordingPublisher>,
    IssuanceService,
) {
    let store = Arc::new(InMemoryStore::default());
    let publisher = Arc::new(RecordingPublisher::default());
    let service = service_with(store.clone(), publisher.clone());
    (store, publisher, service)
}

#[tokio::test]
async fn single_winner_end_to_end() {
    let (store, publisher, service) = setup();
    store.init_event("e1", 1, 3600).await.unwrap();

    let result = service.issue("u1", "e1").await.unwrap();
    let coupon_id = match result {
        IssueResult::Issued {
            coupon_id,
            remaining,
        } => {
            assert_eq!(remaining, 0);
            coupon_id
        }
        other => panic!("expected a win, got {:?}", other),
    };

    // The acknowledged log record carries the same correlation token as
    // the response and the per-user cache slot.
    let published = publisher.published.lock().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].coupon_id, coupon_id);
    assert_eq!(published[0].user_id, "u1");
    assert_eq!(published[0].event_id, "e1");
    drop(published);

    assert_eq!(
        store.get_user_coupon("e1", "u1").await.unwrap(),
        Some(coupon_id)
    );
}

#[tokio::test]
async fn duplicate_user_is_rejected_without_consuming_stock() {
    let (store, publisher, service) = setup();
    store.init_event("e1", 5, 3600).await.unwrap();

    assert!(matches!(
        service.issue("u1", "e1").await.unwrap(),
        IssueResult::Issued { .. }
    ));
    assert_eq!(
        service.issue("u1", "e1").await.unwrap(),
        IssueResult::Rejected(RejectReason::AlreadyParticipated)
    );

    assert_eq!(store.remaining("e1").await.unwrap(), Some(4));
    assert_eq!(publisher.published.lock().await.len(), 1);
}

#[tokio::test]
async fn sold_out_sequence() {
    let (store, _publisher, service) = setup();
    store.init_event("e2", 2, 3600).await.unwrap();

    assert!(matches!(
        service.issue("u1", "e2").await.unwrap(),
        IssueResult::Issued { .. }
    ));
    assert!(matches!(
        service.issue("u2", "e2").await.unwrap(),
        IssueResult::Issued { .. }
    ));
    assert_eq!(
        service.issue("u3", "e2").await.unwrap(),
        IssueResult::Rejected(RejectReason::SoldOut)
    );
}

#[tokio::test]
async fn zero_stock_rejects_every_request() {
    let (store, publisher, service) = setup();
    store.init_event("e1", 0, 3600).await.unwrap();

    for user in ["u1", "u2", "u3"] {
        assert_eq!(
            service.issue(user, "e1").await.unwrap(),
            IssueResult::Rejected(RejectReason::SoldOut)
        );
    }
    assert!(publisher.published.lock().await.is_empty());
}

#[tokio::test]
async fn uninitialized_event_is_an_operator_fault() {
    let (_store, _publisher, service) = setup();

    match service.issue("u1", "ghost-event").await {
        Err(AppError::StockNotInitialized(event_id)) => assert_eq!(event_id, "ghost-event"),
        other => panic!("expected StockNotInitialized, got {:?}", other),
    }
}

#[tokio::test]
async fn malformed_ids_fail_validation() {
    let (_store, _publisher, service) = setup();

    assert!(matches!(
        service.issue("", "e1").await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        service.issue("u1", "").await,
        Err(AppError::Validation(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_contention_never_oversells() {
    let (store, publisher, service) = setup();
    store.init_event("e3", 10, 3600).await.unwrap();
    let service = Arc::new(service);

    let mut handles = Vec::new();
    for i in 0..100 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.issue(&format!("user-{}", i), "e3").await.unwrap()
        }));
    }

    let mut wins = 0;
    let mut sold_out = 0;
    for handle in handles {
        match handle.await.unwrap() {
            IssueResult::Issued { .. } => wins += 1,
            IssueResult::Rejected(RejectReason::SoldOut) => sold_out += 1,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(wins, 10);
    assert_eq!(sold_out, 90);
    assert_eq!(store.remaining("e3").await.unwrap(), Some(0));
    assert_eq!(store.participants_count("e3").await.unwrap(), 10);
    assert_eq!(publisher.published.lock().await.len(), 10);
}

#[tokio::test(flavor = "multi_thread")]
async fn same_user_concurrent_requests_win_at_most_once() {
    let (store, _publisher, service) = setup();
    store.init_event("e1", 5, 3600).await.unwrap();
    let service = Arc::new(service);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = service.clone();
        handles.push(tokio::spawn(
            async move { service.issue("u1", "e1").await.unwrap() },
        ));
    }

    let mut wins = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            IssueResult::Issued { .. } => wins += 1,
            IssueResult::Rejected(RejectReason::AlreadyParticipated) => duplicates += 1,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(wins, 1);
    assert_eq!(duplicates, 7);
    assert_eq!(store.remaining("e1").await.unwrap(), Some(4));
}

#[tokio::test]
async fn publish_failure_is_compensated_and_retry_succeeds() {
    let (store, publisher, service) = setup();
    store.init_event("e4", 1, 3600).await.unwrap();

    // Broker down: the client gets a 503 and the decision is rolled back.
    publisher.fail.store(true, Ordering::SeqCst);
    match service.issue("u1", "e4").await {
        Err(AppError::PublishFailed(_)) => {}
        other => panic!("expected PublishFailed, got {:?}", other),
    }
    assert_eq!(store.remaining("e4").await.unwrap(), Some(1));
    assert_eq!(store.participants_count("e4").await.unwrap(), 0);
    assert_eq!(store.get_user_coupon("e4", "u1").await.unwrap(), None);

    // Broker back: the same user retries and wins the single unit.
    publisher.fail.store(false, Ordering::SeqCst);
    match service.issue("u1", "e4").await.unwrap() {
        IssueResult::Issued { remaining, .. } => assert_eq!(remaining, 0),
        other => panic!("expected a win on retry, got {:?}", other),
    }
    assert_eq!(publisher.published.lock().await.len(), 1);
}

/// Store wrapper whose compensation path is down.
struct BrokenCompensationStore(InMemoryStore);

#[async_trait]
impl DecisionStore for BrokenCompensationStore {
    async fn init_event(
        &self,
        event_id: &str,
        stock: i64,
        ttl_secs: i64,
    ) -> Result<bool, StoreError> {
        self.0.init_event(event_id, stock, ttl_secs).await
    }

    async fn issue(
        &self,
        event_id: &str,
        user_id: &str,
        coupon_id: Uuid,
        ttl_secs: i64,
    ) -> Result<IssueOutcome, StoreError> {
        self.0.issue(event_id, user_id, coupon_id, ttl_secs).await
    }

    async fn compensate(&self, _event_id: &str, _user_id: &str) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("connection reset".to_string()))
    }

    async fn remaining(&self, event_id: &str) -> Result<Option<i64>, StoreError> {
        self.0.remaining(event_id).await
    }

    async fn participants_count(&self, event_id: &str) -> Result<i64, StoreError> {
        self.0.participants_count(event_id).await
    }

    async fn get_user_coupon(
        &self,
        event_id: &str,
        user_id: &str,
    ) -> Result<Option<Uuid>, StoreError> {
        self.0.get_user_coupon(event_id, user_id).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.0.ping().await
    }
}

#[tokio::test]
async fn failed_compensation_still_answers_503_and_leaves_evidence() {
    let store = Arc::new(BrokenCompensationStore(InMemoryStore::default()));
    let publisher = Arc::new(RecordingPublisher::default());
    publisher.fail.store(true, Ordering::SeqCst);
    let service = service_with(store.clone(), publisher.clone());

    store.init_event("e5", 1, 3600).await.unwrap();

    // The client still hears 503; the orphaned decision stays in the
    // store for reconciliation to surface.
    match service.issue("u1", "e5").await {
        Err(AppError::PublishFailed(_)) => {}
        other => panic!("expected PublishFailed, got {:?}", other),
    }
    assert_eq!(store.participants_count("e5").await.unwrap(), 1);
    assert_eq!(store.remaining("e5").await.unwrap(), Some(0));
}

/// Store wrapper that answers slower than the decision deadline.
struct SlowStore(InMemoryStore);

#[async_trait]
impl DecisionStore for SlowStore {
    async fn init_event(
        &self,
        event_id: &str,
        stock: i64,
        ttl_secs: i64,
    ) -> Result<bool, StoreError> {
        self.0.init_event(event_id, stock, ttl_secs).await
    }

    async fn issue(
        &self,
        event_id: &str,
        user_id: &str,
        coupon_id: Uuid,
        ttl_secs: i64,
    ) -> Result<IssueOutcome, StoreError> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.0.issue(event_id, user_id, coupon_id, ttl_secs).await
    }

    async fn compensate(&self, event_id: &str, user_id: &str) -> Result<bool, StoreError> {
        self.0.compensate(event_id, user_id).await
    }

    async fn remaining(&self, event_id: &str) -> Result<Option<i64>, StoreError> {
        self.0.remaining(event_id).await
    }

    async fn participants_count(&self, event_id: &str) -> Result<i64, StoreError> {
        self.0.participants_count(event_id).await
    }

    async fn get_user_coupon(
        &self,
        event_id: &str,
        user_id: &str,
    ) -> Result<Option<Uuid>, StoreError> {
        self.0.get_user_coupon(event_id, user_id).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.0.ping().await
    }
}

#[tokio::test]
async fn decision_deadline_maps_to_store_unavailable() {
    let store = Arc::new(SlowStore(InMemoryStore::default()));
    let publisher = Arc::new(RecordingPublisher::default());
    let service = IssuanceService::new(
        store.clone(),
        publisher,
        3600,
        Duration::from_millis(10),
    );

    store.init_event("e1", 1, 3600).await.unwrap();

    assert!(matches!(
        service.issue("u1", "e1").await,
        Err(AppError::StoreUnavailable(_))
    ));
}

#[tokio::test]
async fn reinitialization_is_a_noop() {
    let (store, _publisher, service) = setup();

    assert!(store.init_event("e1", 5, 3600).await.unwrap());
    assert!(!store.init_event("e1", 5, 3600).await.unwrap());
    assert_eq!(store.remaining("e1").await.unwrap(), Some(5));

    // Seeding again after a debit must not restock the counter.
    service.issue("u1", "e1").await.unwrap();
    assert!(!store.init_event("e1", 5, 3600).await.unwrap());
    assert_eq!(store.remaining("e1").await.unwrap(), Some(4));
}
