//! The priority message bus: queue + per-owner routing + dedup +
//! persistence.
//!
//! Processing is single-flight: at most one task drains the queue at a
//! time. `enqueue` pushes under the queue's own lock and then kicks a
//! drain; a drain that finds the queue empty clears the in-progress flag
//! and immediately re-checks once more before returning, closing the
//! push/clear race window without needing a heavier scheduler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use conclave_store::models::{MessageId, QueueMessage};
use conclave_store::queries::queue as queue_db;
use conclave_store::Store;
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::queue::PriorityQueue;

/// Handler invoked for a dequeued message. Handlers own their own retry
/// policy: a returned `Err` is logged but never aborts the processing
/// loop, and the message is still marked processed.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: QueueMessage) -> anyhow::Result<()>;
}

/// Event fired as the bus's two lifecycle hooks (`onEnqueued`,
/// `onProcessed`). Exposed as a broadcast stream rather than ad hoc
/// callbacks so multiple observers can subscribe independently.
#[derive(Debug, Clone)]
pub enum BusEvent {
    Enqueued(QueueMessage),
    Processed(MessageId),
}

/// Key identifying a registered handler slot, returned inside a
/// [`HandlerSubscription`] so the caller can release it without the bus
/// exposing its internal maps.
#[derive(Debug, Clone)]
enum HandlerKey {
    Default,
    Owner(String),
}

/// An explicit, storable handle to a handler registration. Call
/// [`MessageBus::dispose`] to clear the slot -- modeled as an owned value
/// rather than a closure so callers can store, pass around, and drop it
/// independently of the registration call.
#[derive(Debug, Clone)]
pub struct HandlerSubscription(HandlerKey);

pub struct MessageBus {
    store: Arc<Store>,
    queue: Mutex<PriorityQueue>,
    processed: Mutex<std::collections::HashSet<MessageId>>,
    default_handler: Mutex<Option<Arc<dyn MessageHandler>>>,
    owner_handlers: Mutex<HashMap<String, Arc<dyn MessageHandler>>>,
    processing: AtomicBool,
    events: broadcast::Sender<BusEvent>,
}

impl MessageBus {
    /// Open a bus bound to `store`, restoring queued messages and the
    /// processed-id set from the persisted snapshot, so delivery stays
    /// at-most-once across restarts.
    pub fn new(store: Arc<Store>) -> Arc<Self> {
        let (queued, processed_ids) = queue_db::snapshot(&store);
        let (events, _rx) = broadcast::channel(256);
        Arc::new(Self {
            store,
            queue: Mutex::new(PriorityQueue::restore(queued)),
            processed: Mutex::new(processed_ids.into_iter().collect()),
            default_handler: Mutex::new(None),
            owner_handlers: Mutex::new(HashMap::new()),
            processing: AtomicBool::new(false),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.events.subscribe()
    }

    fn persist(&self) {
        let snapshot = self.queue.lock().unwrap().snapshot();
        let processed: Vec<MessageId> = self.processed.lock().unwrap().iter().cloned().collect();
        queue_db::replace_snapshot(&self.store, snapshot, processed);
    }

    pub fn is_processed(&self, id: &MessageId) -> bool {
        self.processed.lock().unwrap().contains(id)
    }

    pub fn mark_processed(&self, id: &MessageId) {
        self.processed.lock().unwrap().insert(id.clone());
        self.persist();
    }

    pub fn get_by_id(&self, id: &MessageId) -> Option<QueueMessage> {
        self.queue.lock().unwrap().get(id).cloned()
    }

    pub fn pending_for_owner(&self, owner_id: &str) -> Vec<QueueMessage> {
        self.queue.lock().unwrap().pending_for_owner(owner_id)
    }

    pub fn queue_size(&self) -> usize {
        self.queue.lock().unwrap().size()
    }

    /// Enqueue `message`. A no-op if its id is already processed or
    /// already sitting in the queue. Otherwise pushes, fires
    /// `onEnqueued`, persists, and schedules a drain.
    pub async fn enqueue(self: &Arc<Self>, message: QueueMessage) {
        {
            let processed = self.processed.lock().unwrap();
            if processed.contains(&message.id) {
                debug!(id = %message.id, "enqueue no-op: already processed");
                return;
            }
        }
        {
            let mut queue = self.queue.lock().unwrap();
            if queue.contains(&message.id) {
                debug!(id = %message.id, "enqueue no-op: already queued");
                return;
            }
            queue.enqueue(message.clone());
        }
        self.persist();
        let _ = self.events.send(BusEvent::Enqueued(message));
        self.process().await;
    }

    /// Register the fallback handler, used when a message has no owner
    /// or its owner has no registered handler. Returns a disposable
    /// subscription that clears the slot when passed to `dispose`.
    pub async fn register_default_handler(
        self: &Arc<Self>,
        handler: Arc<dyn MessageHandler>,
    ) -> HandlerSubscription {
        *self.default_handler.lock().unwrap() = Some(handler);
        self.process().await;
        HandlerSubscription(HandlerKey::Default)
    }

    /// Register a per-owner handler. Re-triggers processing so any
    /// messages already queued for this owner are picked up immediately.
    pub async fn register_owner_handler(
        self: &Arc<Self>,
        owner_id: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> HandlerSubscription {
        let owner_id = owner_id.into();
        self.owner_handlers
            .lock()
            .unwrap()
            .insert(owner_id.clone(), handler);
        self.process().await;
        HandlerSubscription(HandlerKey::Owner(owner_id))
    }

    /// Release a handler registration, clearing its slot.
    pub fn dispose(&self, subscription: HandlerSubscription) {
        match subscription.0 {
            HandlerKey::Default => {
                *self.default_handler.lock().unwrap() = None;
            }
            HandlerKey::Owner(owner_id) => {
                self.owner_handlers.lock().unwrap().remove(&owner_id);
            }
        }
    }

    fn handler_for(&self, message: &QueueMessage) -> Option<Arc<dyn MessageHandler>> {
        if let Some(owner) = &message.owner {
            if let Some(h) = self.owner_handlers.lock().unwrap().get(&owner.owner_id) {
                return Some(Arc::clone(h));
            }
        }
        self.default_handler.lock().unwrap().clone()
    }

    /// Drain the queue while a handler exists for the head message.
    /// Single-flight: if another drain is already in progress this call
    /// returns immediately, relying on that in-progress drain (or the
    /// post-drain re-check below) to pick up the work.
    pub async fn process(self: &Arc<Self>) {
        if self.processing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.drain_once().await;
        self.processing.store(false, Ordering::Release);

        // Close the race window: if something was enqueued or a handler
        // was registered in the instant between our last empty/missing
        // check and clearing the flag, make sure it still gets a drain.
        if self.has_processable_head() && !self.processing.swap(true, Ordering::AcqRel) {
            self.drain_once().await;
            self.processing.store(false, Ordering::Release);
        }
    }

    fn has_processable_head(&self) -> bool {
        let queue = self.queue.lock().unwrap();
        match queue.peek() {
            Some(msg) => self.handler_for(msg).is_some(),
            None => false,
        }
    }

    async fn drain_once(self: &Arc<Self>) {
        loop {
            let head = { self.queue.lock().unwrap().peek().cloned() };
            let Some(head) = head else { break };
            let Some(handler) = self.handler_for(&head) else {
                // HandlerMissing: leave the message in place. A later
                // registration call re-triggers processing.
                break;
            };
            {
                let mut queue = self.queue.lock().unwrap();
                queue.remove(&head.id);
            }
            self.persist();
            if let Err(err) = handler.handle(head.clone()).await {
                error!(id = %head.id, %err, "message handler failed; marking processed anyway");
            }
            self.processed.lock().unwrap().insert(head.id.clone());
            self.persist();
            let _ = self.events.send(BusEvent::Processed(head.id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conclave_store::models::{MessageType, Owner, OwnerType, Priority};
    use conclave_store::StorePaths;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    fn store() -> Arc<Store> {
        let dir = tempdir().unwrap();
        Store::open(StorePaths::new(dir.path())).unwrap()
    }

    fn msg(id: &str, priority: Priority, owner_id: Option<&str>) -> QueueMessage {
        QueueMessage {
            id: MessageId(id.to_string()),
            timestamp: Utc::now(),
            priority,
            plan_id: None,
            task_id: None,
            worker_id: None,
            worktree_path: None,
            parent_agent_id: None,
            sub_task_id: None,
            depth: None,
            owner: owner_id.map(|o| Owner {
                owner_type: OwnerType::Worker,
                owner_id: o.to_string(),
                session_uri: None,
            }),
            message_type: MessageType::StatusUpdate,
            content: serde_json::Value::Null,
        }
    }

    struct RecordingHandler {
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn handle(&self, message: QueueMessage) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(message.id.0.clone());
            Ok(())
        }
    }

    /// Priority then FIFO delivery order via a default handler.
    #[tokio::test]
    async fn priority_order_through_default_handler() {
        let bus = MessageBus::new(store());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = bus
            .register_default_handler(Arc::new(RecordingHandler { seen: seen.clone() }))
            .await;

        bus.enqueue(msg("a", Priority::Low, None)).await;
        bus.enqueue(msg("b", Priority::Normal, None)).await;
        bus.enqueue(msg("c", Priority::Critical, None)).await;
        bus.enqueue(msg("d", Priority::High, None)).await;

        assert_eq!(*seen.lock().unwrap(), vec!["c", "d", "b", "a"]);
    }

    /// Enqueueing the same id twice, separated by markProcessed, is a
    /// no-op the second time and the handler fires exactly once.
    #[tokio::test]
    async fn dedup_after_mark_processed() {
        let bus = MessageBus::new(store());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = bus
            .register_default_handler(Arc::new(RecordingHandler { seen: seen.clone() }))
            .await;

        bus.enqueue(msg("x", Priority::Normal, None)).await;
        assert!(bus.is_processed(&MessageId("x".into())));
        bus.enqueue(msg("x", Priority::Normal, None)).await;

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn owner_routing_falls_back_to_default() {
        let bus = MessageBus::new(store());
        let owner_seen = Arc::new(Mutex::new(Vec::new()));
        let default_seen = Arc::new(Mutex::new(Vec::new()));
        let _owner_sub = bus
            .register_owner_handler(
                "worker-1",
                Arc::new(RecordingHandler {
                    seen: owner_seen.clone(),
                }),
            )
            .await;
        let _default_sub = bus
            .register_default_handler(Arc::new(RecordingHandler {
                seen: default_seen.clone(),
            }))
            .await;

        bus.enqueue(msg("owned", Priority::Normal, Some("worker-1")))
            .await;
        bus.enqueue(msg("unowned", Priority::Normal, Some("worker-2")))
            .await;

        assert_eq!(*owner_seen.lock().unwrap(), vec!["owned"]);
        assert_eq!(*default_seen.lock().unwrap(), vec!["unowned"]);
    }

    #[tokio::test]
    async fn message_stays_queued_until_a_handler_is_registered() {
        let bus = MessageBus::new(store());
        bus.enqueue(msg("late", Priority::Normal, None)).await;
        assert_eq!(bus.queue_size(), 1);
        assert!(!bus.is_processed(&MessageId("late".into())));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = bus
            .register_default_handler(Arc::new(RecordingHandler { seen: seen.clone() }))
            .await;
        assert_eq!(*seen.lock().unwrap(), vec!["late"]);
        assert_eq!(bus.queue_size(), 0);
    }

    struct FailingHandler {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MessageHandler for FailingHandler {
        async fn handle(&self, _message: QueueMessage) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("boom")
        }
    }

    #[tokio::test]
    async fn handler_error_is_logged_but_message_still_marked_processed() {
        let bus = MessageBus::new(store());
        let calls = Arc::new(AtomicUsize::new(0));
        let _sub = bus
            .register_default_handler(Arc::new(FailingHandler {
                calls: calls.clone(),
            }))
            .await;

        bus.enqueue(msg("will-fail", Priority::Normal, None)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(bus.is_processed(&MessageId("will-fail".into())));
    }

    /// Restart fidelity -- pending messages and processed ids survive
    /// reconstructing the bus from the same store.
    #[tokio::test]
    async fn restart_fidelity() {
        let dir = tempdir().unwrap();
        let paths = StorePaths::new(dir.path());
        let store1 = Store::open(paths.clone()).unwrap();
        let bus1 = MessageBus::new(store1);
        // Two pending messages with no handler registered, three processed ids.
        bus1.enqueue(msg("p1", Priority::Normal, None)).await;
        bus1.enqueue(msg("p2", Priority::High, None)).await;
        bus1.mark_processed(&MessageId("done-1".into()));
        bus1.mark_processed(&MessageId("done-2".into()));
        bus1.mark_processed(&MessageId("done-3".into()));
        bus1.store.save_now().unwrap();

        let store2 = Store::open(paths).unwrap();
        let bus2 = MessageBus::new(store2);
        assert_eq!(bus2.queue_size(), 2);
        assert!(bus2.is_processed(&MessageId("done-1".into())));
        assert!(bus2.is_processed(&MessageId("done-2".into())));
        assert!(bus2.is_processed(&MessageId("done-3".into())));

        // The two pendings are eligible for processing again.
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = bus2
            .register_default_handler(Arc::new(RecordingHandler { seen: seen.clone() }))
            .await;
        let mut got = seen.lock().unwrap().clone();
        got.sort();
        assert_eq!(got, vec!["p1", "p2"]);
    }

    /// Throughput target: >=100 msg/s on a 500-message no-op workload.
    #[tokio::test]
    async fn throughput_meets_reference_workload() {
        let bus = MessageBus::new(store());
        struct Noop;
        #[async_trait]
        impl MessageHandler for Noop {
            async fn handle(&self, _message: QueueMessage) -> anyhow::Result<()> {
                Ok(())
            }
        }
        let _sub = bus.register_default_handler(Arc::new(Noop)).await;

        let start = std::time::Instant::now();
        for i in 0..500 {
            bus.enqueue(msg(&format!("m{i}"), Priority::Normal, None))
                .await;
        }
        let elapsed = start.elapsed();
        let rate = 500.0 / elapsed.as_secs_f64();
        assert!(rate >= 100.0, "throughput too low: {rate:.1} msg/s");
    }
}
