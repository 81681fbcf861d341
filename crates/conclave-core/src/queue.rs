//! The in-memory priority queue backing the message bus.
//!
//! Items are kept sorted by `(priority rank descending, enqueue index
//! ascending)`: dequeue always returns the highest-priority item, with
//! ties resolved by FIFO within equal priority. The queue itself is
//! synchronous and holds no lock -- `MessageBus` supplies that.

use conclave_store::models::{Priority, QueueMessage};

/// An entry paired with the order it was enqueued in, so that equal
/// priorities still compare by insertion order once the counter has
/// wrapped into the comparison.
struct Entry {
    seq: u64,
    message: QueueMessage,
}

/// Stable-ordered priority queue of [`QueueMessage`]s.
///
/// `enqueue`/`dequeue`/`peek` are O(n) in this implementation (a `Vec`
/// kept sorted on insert); the reference workload is 500 messages, far
/// below where a binary heap would pay for itself, and a flat `Vec`
/// keeps `snapshot()` trivial.
#[derive(Default)]
pub struct PriorityQueue {
    items: Vec<Entry>,
    next_seq: u64,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `message`, keeping the vector ordered by
    /// `(-priority_rank, seq)`.
    pub fn enqueue(&mut self, message: QueueMessage) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let entry = Entry { seq, message };
        let pos = self
            .items
            .partition_point(|e| Self::order_key(e) <= Self::order_key(&entry));
        self.items.insert(pos, entry);
    }

    fn order_key(e: &Entry) -> (std::cmp::Reverse<u8>, u64) {
        (std::cmp::Reverse(e.message.priority.rank()), e.seq)
    }

    /// Remove and return the highest-priority, earliest-enqueued item.
    pub fn dequeue(&mut self) -> Option<QueueMessage> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.items.remove(0).message)
        }
    }

    /// Look at the head without removing it.
    pub fn peek(&self) -> Option<&QueueMessage> {
        self.items.first().map(|e| &e.message)
    }

    /// Full contents in dequeue order, without consuming anything.
    pub fn snapshot(&self) -> Vec<QueueMessage> {
        self.items.iter().map(|e| e.message.clone()).collect()
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// True if a message with this id is currently queued.
    pub fn contains(&self, id: &conclave_store::models::MessageId) -> bool {
        self.items.iter().any(|e| &e.message.id == id)
    }

    /// Remove and return the message with this id, wherever it sits in
    /// the queue (used by the bus to pull a specific owner's message
    /// without disturbing ordering of the rest).
    pub fn remove(&mut self, id: &conclave_store::models::MessageId) -> Option<QueueMessage> {
        let pos = self.items.iter().position(|e| &e.message.id == id)?;
        Some(self.items.remove(pos).message)
    }

    pub fn get(&self, id: &conclave_store::models::MessageId) -> Option<&QueueMessage> {
        self.items.iter().find(|e| &e.message.id == id).map(|e| &e.message)
    }

    /// All currently-queued messages whose `owner.owner_id` matches.
    pub fn pending_for_owner(&self, owner_id: &str) -> Vec<QueueMessage> {
        self.items
            .iter()
            .filter(|e| {
                e.message
                    .owner
                    .as_ref()
                    .is_some_and(|o| o.owner_id == owner_id)
            })
            .map(|e| e.message.clone())
            .collect()
    }

    /// Restore a queue from a persisted snapshot, in the order it was
    /// stored. Used on bus restart; `seq` is reassigned in list order so
    /// relative FIFO ordering among equal priorities is preserved even
    /// though the original enqueue counter is not persisted.
    pub fn restore(messages: Vec<QueueMessage>) -> Self {
        let mut queue = Self::new();
        for m in messages {
            queue.enqueue(m);
        }
        queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conclave_store::models::{new_message_id, MessageType};

    fn msg(id: &str, priority: Priority) -> QueueMessage {
        QueueMessage {
            id: conclave_store::models::MessageId(id.to_string()),
            timestamp: Utc::now(),
            priority,
            plan_id: None,
            task_id: None,
            worker_id: None,
            worktree_path: None,
            parent_agent_id: None,
            sub_task_id: None,
            depth: None,
            owner: None,
            message_type: MessageType::StatusUpdate,
            content: serde_json::Value::Null,
        }
    }

    /// Higher priority always dequeues first, regardless of enqueue order.
    #[test]
    fn priority_then_fifo() {
        let mut q = PriorityQueue::new();
        q.enqueue(msg("a", Priority::Low));
        q.enqueue(msg("b", Priority::Normal));
        q.enqueue(msg("c", Priority::Critical));
        q.enqueue(msg("d", Priority::High));

        let order: Vec<String> = std::iter::from_fn(|| q.dequeue()).map(|m| m.id.0).collect();
        assert_eq!(order, vec!["c", "d", "b", "a"]);
    }

    #[test]
    fn fifo_within_equal_priority() {
        let mut q = PriorityQueue::new();
        q.enqueue(msg("first", Priority::Normal));
        q.enqueue(msg("second", Priority::Normal));
        q.enqueue(msg("third", Priority::Normal));
        let order: Vec<String> = std::iter::from_fn(|| q.dequeue()).map(|m| m.id.0).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut q = PriorityQueue::new();
        q.enqueue(msg("a", Priority::Normal));
        assert_eq!(q.peek().unwrap().id.0, "a");
        assert_eq!(q.size(), 1);
    }

    #[test]
    fn snapshot_and_restore_preserve_order() {
        let mut q = PriorityQueue::new();
        q.enqueue(msg("a", Priority::Low));
        q.enqueue(msg("b", Priority::Critical));
        let snap = q.snapshot();
        let restored = PriorityQueue::restore(snap);
        assert_eq!(restored.peek().unwrap().id.0, "b");
    }

    #[test]
    fn remove_by_id_preserves_rest_order() {
        let mut q = PriorityQueue::new();
        q.enqueue(msg("a", Priority::Normal));
        q.enqueue(msg("b", Priority::Normal));
        q.enqueue(msg("c", Priority::Normal));
        q.remove(&conclave_store::models::MessageId("b".into()));
        let order: Vec<String> = std::iter::from_fn(|| q.dequeue()).map(|m| m.id.0).collect();
        assert_eq!(order, vec!["a", "c"]);
    }

    #[test]
    fn clear_empties_queue() {
        let mut q = PriorityQueue::new();
        q.enqueue(msg("a", Priority::Normal));
        q.clear();
        assert!(q.is_empty());
    }
}
