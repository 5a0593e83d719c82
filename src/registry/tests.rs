use super::*;
use crate::bus::BusError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Handle that tracks how many subscriptions are open.
struct FakeSubscription {
    open: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    fail_close: bool,
    live: bool,
}

#[async_trait]
impl Subscription for FakeSubscription {
    async fn close(self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.open.fetch_sub(1, Ordering::SeqCst);
        if self.fail_close {
            Err(BusError::Connection("close failed".to_string()))
        } else {
            Ok(())
        }
    }

    fn is_stale(&self) -> bool {
        !self.live
    }
}

#[derive(Default, Clone)]
struct Counters {
    open: Arc<AtomicUsize>,
    created: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl Counters {
    fn create(&self, fail_close: bool) -> impl Future<Output = Result<FakeSubscription>> {
        self.create_with(fail_close, false)
    }

    fn create_live(&self) -> impl Future<Output = Result<FakeSubscription>> {
        self.create_with(false, true)
    }

    fn create_with(
        &self,
        fail_close: bool,
        live: bool,
    ) -> impl Future<Output = Result<FakeSubscription>> {
        let counters = self.clone();
        async move {
            counters.created.fetch_add(1, Ordering::SeqCst);
            counters.open.fetch_add(1, Ordering::SeqCst);
            Ok(FakeSubscription {
                open: counters.open.clone(),
                closes: counters.closes.clone(),
                fail_close,
                live,
            })
        }
    }
}

#[tokio::test]
async fn test_subscribe_twice_creates_once() {
    let registry = SubscriptionRegistry::new();
    let counters = Counters::default();

    assert!(registry.subscribe("ORDER", || counters.create(false)).await.unwrap());
    assert!(!registry.subscribe("ORDER", || counters.create(false)).await.unwrap());

    assert_eq!(counters.created.load(Ordering::SeqCst), 1);
    assert_eq!(counters.open.load(Ordering::SeqCst), 1);
    assert!(registry.contains("ORDER").await);
}

#[tokio::test]
async fn test_unsubscribe_unknown_is_noop() {
    let registry: SubscriptionRegistry<FakeSubscription> = SubscriptionRegistry::new();
    assert!(!registry.unsubscribe("NOPE").await.unwrap());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_unsubscribe_closes_handle() {
    let registry = SubscriptionRegistry::new();
    let counters = Counters::default();

    registry.subscribe("ORDER", || counters.create(false)).await.unwrap();
    assert!(registry.unsubscribe("ORDER").await.unwrap());
    assert!(!registry.unsubscribe("ORDER").await.unwrap());

    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    assert_eq!(counters.open.load(Ordering::SeqCst), 0);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_unsubscribe_surfaces_close_error_but_removes_entry() {
    let registry = SubscriptionRegistry::new();
    let counters = Counters::default();

    registry.subscribe("ORDER", || counters.create(true)).await.unwrap();
    assert!(registry.unsubscribe("ORDER").await.is_err());
    assert!(!registry.contains("ORDER").await);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_failed_create_leaves_no_entry() {
    let registry: SubscriptionRegistry<FakeSubscription> = SubscriptionRegistry::new();
    let result = registry
        .subscribe("ORDER", || async {
            Err(BusError::Subscribe("broker down".to_string()))
        })
        .await;

    assert!(result.is_err());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_remove_all_is_total_when_a_close_fails() {
    let registry = SubscriptionRegistry::new();
    let counters = Counters::default();

    registry.subscribe("A", || counters.create(false)).await.unwrap();
    registry.subscribe("B", || counters.create(true)).await.unwrap();
    registry.subscribe("C", || counters.create(false)).await.unwrap();
    registry.subscribe("D", || counters.create(false)).await.unwrap();

    let closed = registry.remove_all().await;

    assert_eq!(closed, 3);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 4);
    assert_eq!(counters.open.load(Ordering::SeqCst), 0);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_concurrent_subscribe_same_name_creates_once() {
    let registry = Arc::new(SubscriptionRegistry::new());
    let counters = Counters::default();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let registry = registry.clone();
            let counters = counters.clone();
            tokio::spawn(async move {
                registry
                    .subscribe("ORDER", || async {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        counters.create(false).await
                    })
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut created = 0;
    for task in tasks {
        if task.await.unwrap() {
            created += 1;
        }
    }

    assert_eq!(created, 1);
    assert_eq!(counters.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reassert_recreates_every_entry() {
    let registry = SubscriptionRegistry::new();
    let counters = Counters::default();

    registry.subscribe("A", || counters.create(false)).await.unwrap();
    registry.subscribe("B", || counters.create(false)).await.unwrap();

    let restored = registry.reassert(|_| counters.create(false)).await;

    assert_eq!(restored, 2);
    assert_eq!(counters.created.load(Ordering::SeqCst), 4);
    assert_eq!(registry.names(), vec!["A".to_string(), "B".to_string()]);
}

#[tokio::test]
async fn test_reassert_stops_at_first_failure() {
    let registry = SubscriptionRegistry::new();
    let counters = Counters::default();

    registry.subscribe("A", || counters.create(false)).await.unwrap();
    registry.subscribe("B", || counters.create(false)).await.unwrap();

    let attempts = AtomicUsize::new(0);
    let restored = registry
        .reassert(|_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<FakeSubscription, _>(BusError::Connection("down".to_string())) }
        })
        .await;

    assert_eq!(restored, 0);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    // Names stay known so the next reassert retries them.
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn test_reassert_keeps_live_handles() {
    let registry = SubscriptionRegistry::new();
    let counters = Counters::default();

    registry.subscribe("A", || counters.create_live()).await.unwrap();
    registry.subscribe("B", || counters.create(false)).await.unwrap();

    let restored = registry.reassert(|_| counters.create_live()).await;

    assert_eq!(restored, 1);
    assert_eq!(counters.created.load(Ordering::SeqCst), 3);
}
