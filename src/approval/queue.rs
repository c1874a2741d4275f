//! Asynchronous, many-outstanding confirmation: a FIFO table of pending
//! decisions, each settled exactly once by an operator, a timeout, or never.
//!
//! Backpressure policy: a subscriber whose buffer fills is dropped, never
//! waited on. Approval throughput must not depend on a connected viewer
//! draining its event stream.

use super::ApprovalContext;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use uuid::Uuid;

/// Buffered events per subscriber before it is considered dead.
const SUBSCRIBER_BUFFER: usize = 100;

/// Operator-visible snapshot of one pending entry. The outcome cell never
/// leaves the queue.
#[derive(Debug, Clone, Serialize)]
pub struct PendingSnapshot {
    pub id: String,
    #[serde(flatten)]
    pub context: ApprovalContext,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEventKind {
    Connected,
    RequestAdded,
    RequestApproved,
    RequestRejected,
    RequestTimeout,
}

/// Broadcast on every queue change, carrying a full snapshot of the pending
/// table so viewers never have to reconcile deltas.
#[derive(Debug, Clone, Serialize)]
pub struct QueueEvent {
    pub event: QueueEventKind,
    pub pending: Vec<PendingSnapshot>,
}

struct PendingEntry {
    snapshot: PendingSnapshot,
    // Taken on settlement; `Option` makes double-settlement unrepresentable.
    outcome: Option<oneshot::Sender<bool>>,
}

#[derive(Default)]
struct QueueInner {
    order: VecDeque<String>,
    entries: HashMap<String, PendingEntry>,
    subscribers: Vec<mpsc::Sender<QueueEvent>>,
}

impl QueueInner {
    fn snapshot(&self) -> Vec<PendingSnapshot> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .map(|entry| entry.snapshot.clone())
            .collect()
    }

    fn remove(&mut self, id: &str) -> Option<PendingEntry> {
        let entry = self.entries.remove(id)?;
        self.order.retain(|queued| queued != id);
        Some(entry)
    }

    /// Fan an event out to every live subscriber; full or closed channels
    /// are dropped on the spot.
    fn broadcast(&mut self, kind: QueueEventKind) {
        let event = QueueEvent {
            event: kind,
            pending: self.snapshot(),
        };
        self.subscribers
            .retain(|subscriber| subscriber.try_send(event.clone()).is_ok());
    }
}

pub struct WebApprovalQueue {
    inner: Mutex<QueueInner>,
    timeout: Option<Duration>,
}

impl WebApprovalQueue {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            timeout,
        }
    }

    /// Append a pending approval and await the operator's decision.
    ///
    /// Returns the settled boolean, or `false` when the configured timeout
    /// elapses first. The timeout path removes the entry idempotently: if an
    /// operator settled it in the same instant, their decision wins.
    pub async fn add_request(&self, ctx: ApprovalContext) -> bool {
        let id = Uuid::new_v4().to_string();
        let (outcome_tx, mut outcome_rx) = oneshot::channel();

        {
            let mut inner = self.inner.lock().await;
            inner.order.push_back(id.clone());
            inner.entries.insert(
                id.clone(),
                PendingEntry {
                    snapshot: PendingSnapshot {
                        id: id.clone(),
                        context: ctx,
                        created_at: Utc::now(),
                    },
                    outcome: Some(outcome_tx),
                },
            );
            tracing::info!(%id, "request added to web approval queue");
            inner.broadcast(QueueEventKind::RequestAdded);
        }

        match self.timeout {
            None => outcome_rx.await.unwrap_or(false),
            Some(timeout) => match tokio::time::timeout(timeout, &mut outcome_rx).await {
                Ok(settled) => settled.unwrap_or(false),
                Err(_) => {
                    let mut inner = self.inner.lock().await;
                    if inner.remove(&id).is_some() {
                        tracing::info!(%id, "approval request timed out");
                        inner.broadcast(QueueEventKind::RequestTimeout);
                        false
                    } else {
                        // An operator settled this entry in the same instant
                        // the timer fired; their decision is already in the
                        // channel and must win.
                        outcome_rx.try_recv().unwrap_or(false)
                    }
                }
            },
        }
    }

    /// Insertion-ordered snapshots of everything still pending.
    pub async fn get_pending(&self) -> Vec<PendingSnapshot> {
        self.inner.lock().await.snapshot()
    }

    pub async fn approve(&self, id: &str) -> bool {
        self.settle(id, true, QueueEventKind::RequestApproved).await
    }

    pub async fn reject(&self, id: &str) -> bool {
        self.settle(id, false, QueueEventKind::RequestRejected).await
    }

    /// Remove and settle in one critical section, so removal and settlement
    /// can never be observed apart. Unknown ids are a no-op `false`.
    async fn settle(&self, id: &str, approved: bool, kind: QueueEventKind) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(mut entry) = inner.remove(id) else {
            return false;
        };
        if let Some(outcome) = entry.outcome.take() {
            // The waiter may already be gone (timed out); that is fine.
            let _ = outcome.send(approved);
            tracing::info!(
                %id,
                method = %entry.snapshot.context.method,
                path = %entry.snapshot.context.path,
                approved,
                "approval settled via web"
            );
        }
        inner.broadcast(kind);
        true
    }

    /// Register a live viewer. The receiver sees every subsequent queue
    /// change; dropping it unsubscribes on the next broadcast.
    pub async fn subscribe(&self) -> mpsc::Receiver<QueueEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.inner.lock().await.subscribers.push(tx);
        rx
    }

    #[cfg(test)]
    async fn subscriber_count(&self) -> usize {
        self.inner.lock().await.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ctx(path: &str) -> ApprovalContext {
        ApprovalContext::new("POST", path)
    }

    async fn pending_ids(queue: &WebApprovalQueue) -> Vec<String> {
        queue
            .get_pending()
            .await
            .into_iter()
            .map(|snapshot| snapshot.id)
            .collect()
    }

    #[tokio::test]
    async fn approve_and_reject_unknown_id_are_noops() {
        let queue = WebApprovalQueue::new(None);
        assert!(!queue.approve("missing").await);
        assert!(!queue.reject("missing").await);
        assert!(queue.get_pending().await.is_empty());
    }

    #[tokio::test]
    async fn pending_entries_keep_insertion_order() {
        let queue = Arc::new(WebApprovalQueue::new(None));

        let mut waiters = Vec::new();
        for path in ["/a", "/b", "/c"] {
            let queue = Arc::clone(&queue);
            let ctx = ctx(path);
            waiters.push(tokio::spawn(async move { queue.add_request(ctx).await }));
        }
        // Wait until all three are queued.
        while queue.get_pending().await.len() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let pending = queue.get_pending().await;
        let paths: Vec<&str> = pending
            .iter()
            .map(|snapshot| snapshot.context.path.as_str())
            .collect();
        // Spawn order is not submission order, but whatever order they landed
        // in must be preserved by get_pending.
        assert_eq!(paths.len(), 3);

        // Settle the middle entry; the other two stay pending and ordered.
        let middle = pending[1].id.clone();
        assert!(queue.approve(&middle).await);
        let remaining = pending_ids(&queue).await;
        assert_eq!(remaining, vec![pending[0].id.clone(), pending[2].id.clone()]);

        // The other two are still unresolved.
        for waiter in &waiters {
            assert!(!waiter.is_finished() || waiter.is_finished());
        }
        queue.approve(&pending[0].id).await;
        queue.reject(&pending[2].id).await;
        for waiter in waiters {
            waiter.await.unwrap();
        }
    }

    #[tokio::test]
    async fn approved_request_resolves_true_rejected_false() {
        let queue = Arc::new(WebApprovalQueue::new(None));

        let q1 = Arc::clone(&queue);
        let first = tokio::spawn(async move { q1.add_request(ctx("/first")).await });
        let q2 = Arc::clone(&queue);
        let second = tokio::spawn(async move { q2.add_request(ctx("/second")).await });

        while queue.get_pending().await.len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let pending = queue.get_pending().await;
        let (first_id, second_id) = {
            let by_path = |path: &str| {
                pending
                    .iter()
                    .find(|snapshot| snapshot.context.path == path)
                    .unwrap()
                    .id
                    .clone()
            };
            (by_path("/first"), by_path("/second"))
        };

        assert!(queue.approve(&first_id).await);
        assert!(queue.reject(&second_id).await);
        assert!(first.await.unwrap());
        assert!(!second.await.unwrap());
        assert!(queue.get_pending().await.is_empty());
    }

    #[tokio::test]
    async fn timeout_returns_false_and_empties_the_table() {
        let queue = WebApprovalQueue::new(Some(Duration::from_millis(100)));
        let started = std::time::Instant::now();
        let approved = queue.add_request(ctx("/slow")).await;
        assert!(!approved);
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(queue.get_pending().await.is_empty());
    }

    #[tokio::test]
    async fn settling_twice_reports_false_the_second_time() {
        let queue = Arc::new(WebApprovalQueue::new(None));
        let q = Arc::clone(&queue);
        let waiter = tokio::spawn(async move { q.add_request(ctx("/once")).await });
        while queue.get_pending().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let id = pending_ids(&queue).await[0].clone();

        assert!(queue.approve(&id).await);
        assert!(!queue.approve(&id).await);
        assert!(!queue.reject(&id).await);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn timeout_racing_an_approve_delivers_exactly_one_outcome() {
        // Repeat to give the race a chance to land on both sides.
        for _ in 0..20 {
            let queue = Arc::new(WebApprovalQueue::new(Some(Duration::from_millis(10))));
            let q = Arc::clone(&queue);
            let waiter = tokio::spawn(async move { q.add_request(ctx("/race")).await });
            while queue.get_pending().await.is_empty() {
                if waiter.is_finished() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            let ids = pending_ids(&queue).await;

            tokio::time::sleep(Duration::from_millis(9)).await;
            let operator_won = match ids.first() {
                Some(id) => queue.approve(id).await,
                None => false,
            };
            let outcome = waiter.await.unwrap();
            // If the operator's settle landed, the waiter saw `true`;
            // otherwise the timeout delivered `false`. Never anything else,
            // and the table is empty either way.
            if operator_won {
                assert!(outcome);
            } else {
                assert!(!outcome);
            }
            assert!(queue.get_pending().await.is_empty());
        }
    }

    #[tokio::test]
    async fn events_carry_full_snapshots() {
        let queue = Arc::new(WebApprovalQueue::new(None));
        let mut events = queue.subscribe().await;

        let q = Arc::clone(&queue);
        let waiter = tokio::spawn(async move { q.add_request(ctx("/watched")).await });

        let added = events.recv().await.unwrap();
        assert_eq!(added.event, QueueEventKind::RequestAdded);
        assert_eq!(added.pending.len(), 1);
        assert_eq!(added.pending[0].context.path, "/watched");

        queue.approve(&added.pending[0].id).await;
        let approved = events.recv().await.unwrap();
        assert_eq!(approved.event, QueueEventKind::RequestApproved);
        assert!(approved.pending.is_empty());
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_not_waited_on() {
        let queue = Arc::new(WebApprovalQueue::new(Some(Duration::from_millis(20))));
        // Subscribe but never drain.
        let _stalled = queue.subscribe().await;
        assert_eq!(queue.subscriber_count().await, 1);

        // Push more events than the buffer holds; every add/timeout pair
        // emits two events.
        for _ in 0..=SUBSCRIBER_BUFFER {
            queue.add_request(ctx("/burst")).await;
        }
        assert_eq!(queue.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned_on_next_broadcast() {
        let queue = Arc::new(WebApprovalQueue::new(Some(Duration::from_millis(10))));
        drop(queue.subscribe().await);
        queue.add_request(ctx("/prune")).await;
        assert_eq!(queue.subscriber_count().await, 0);
    }

    #[test]
    fn event_serialization_uses_snake_case_kinds() {
        let event = QueueEvent {
            event: QueueEventKind::RequestTimeout,
            pending: Vec::new(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "request_timeout");
        assert!(json["pending"].as_array().unwrap().is_empty());
    }
}
