//! Pending request queue.
//!
//! Requests are ordered by:
//! - Priority tier (critical first)
//! - Earliest eligible time (sooner first)
//! - Insertion order (stable tie-break)
//!
//! There is at most one pending request per task identifier. A newer request
//! supersedes the older one; the superseded heap entry is skipped lazily when
//! it reaches the top of the heap.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Priority, TaskId};

/// A task waiting to be handed to the OS scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub task_id: TaskId,
    pub priority: Priority,
    pub earliest_eligible: DateTime<Utc>,
}

impl PendingRequest {
    pub fn new(task_id: TaskId, priority: Priority, earliest_eligible: DateTime<Utc>) -> Self {
        Self {
            task_id,
            priority,
            earliest_eligible,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct HeapEntry {
    priority: Priority,
    earliest_eligible: DateTime<Utc>,
    seq: u64,
    task_id: TaskId,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: greater entries pop first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.earliest_eligible.cmp(&self.earliest_eligible))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue of pending requests keyed by task identifier.
#[derive(Debug, Default)]
pub struct PendingQueue {
    heap: BinaryHeap<HeapEntry>,
    live: HashMap<TaskId, (u64, PendingRequest)>,
    next_seq: u64,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a request, replacing any pending request for the same task.
    ///
    /// Returns true if an older request was superseded.
    pub fn upsert(&mut self, request: PendingRequest) -> bool {
        let seq = self.next_seq;
        self.next_seq += 1;

        self.heap.push(HeapEntry {
            priority: request.priority,
            earliest_eligible: request.earliest_eligible,
            seq,
            task_id: request.task_id.clone(),
        });
        let replaced = self.live.insert(request.task_id.clone(), (seq, request)).is_some();

        self.compact_if_needed();
        replaced
    }

    /// Pop the highest ordered live request.
    pub fn pop(&mut self) -> Option<PendingRequest> {
        while let Some(entry) = self.heap.pop() {
            let is_live = matches!(self.live.get(&entry.task_id), Some((seq, _)) if *seq == entry.seq);
            if is_live {
                return self.live.remove(&entry.task_id).map(|(_, request)| request);
            }
        }
        None
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.live.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
    }

    /// Remove and return every live request in queue order.
    pub fn drain_ordered(&mut self) -> Vec<PendingRequest> {
        let mut drained = Vec::with_capacity(self.live.len());
        while let Some(request) = self.pop() {
            drained.push(request);
        }
        self.heap.clear();
        drained
    }

    /// Live requests in queue order, without removing them.
    pub fn ordered(&self) -> Vec<PendingRequest> {
        let mut entries: Vec<&(u64, PendingRequest)> = self.live.values().collect();
        entries.sort_by(|(seq_a, a), (seq_b, b)| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.earliest_eligible.cmp(&b.earliest_eligible))
                .then_with(|| seq_a.cmp(seq_b))
        });
        entries.into_iter().map(|(_, request)| request.clone()).collect()
    }

    /// Rebuild the heap once superseded entries dominate it.
    fn compact_if_needed(&mut self) {
        if self.heap.len() <= self.live.len() * 2 + 16 {
            return;
        }
        self.heap = self
            .live
            .iter()
            .map(|(task_id, (seq, request))| HeapEntry {
                priority: request.priority,
                earliest_eligible: request.earliest_eligible,
                seq: *seq,
                task_id: task_id.clone(),
            })
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request(id: &str, priority: Priority, offset_secs: i64) -> PendingRequest {
        let base = DateTime::parse_from_rfc3339("2026-01-15T12:00:00Z").unwrap().with_timezone(&Utc);
        PendingRequest::new(TaskId::from(id), priority, base + Duration::seconds(offset_secs))
    }

    fn ids(requests: &[PendingRequest]) -> Vec<&str> {
        requests.iter().map(|r| r.task_id.as_str()).collect()
    }

    #[test]
    fn test_drain_in_priority_order() {
        let mut queue = PendingQueue::new();
        queue.upsert(request("low", Priority::Low, 0));
        queue.upsert(request("critical", Priority::Critical, 0));
        queue.upsert(request("medium", Priority::Medium, 0));

        let drained = queue.drain_ordered();
        assert_eq!(ids(&drained), vec!["critical", "medium", "low"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_same_priority_orders_by_eligible_time() {
        let mut queue = PendingQueue::new();
        queue.upsert(request("later", Priority::High, 600));
        queue.upsert(request("sooner", Priority::High, 60));

        assert_eq!(queue.pop().unwrap().task_id.as_str(), "sooner");
        assert_eq!(queue.pop().unwrap().task_id.as_str(), "later");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_full_tie_keeps_insertion_order() {
        let mut queue = PendingQueue::new();
        queue.upsert(request("first", Priority::Medium, 0));
        queue.upsert(request("second", Priority::Medium, 0));
        queue.upsert(request("third", Priority::Medium, 0));

        assert_eq!(ids(&queue.ordered()), vec!["first", "second", "third"]);
        assert_eq!(ids(&queue.drain_ordered()), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_upsert_replaces_existing_request() {
        let mut queue = PendingQueue::new();
        assert!(!queue.upsert(request("sync", Priority::Medium, 600)));
        assert!(queue.upsert(request("sync", Priority::Medium, 60)));

        assert_eq!(queue.len(), 1);
        let popped = queue.pop().unwrap();
        assert_eq!(popped.earliest_eligible, request("sync", Priority::Medium, 60).earliest_eligible);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_superseded_entry_is_skipped() {
        let mut queue = PendingQueue::new();
        queue.upsert(request("a", Priority::Critical, 600));
        queue.upsert(request("b", Priority::Critical, 300));
        queue.upsert(request("a", Priority::Critical, 60));

        assert_eq!(queue.pop().unwrap().task_id.as_str(), "a");
        assert_eq!(queue.pop().unwrap().task_id.as_str(), "b");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_repeated_upserts_stay_bounded() {
        let mut queue = PendingQueue::new();
        for i in 0..1_000 {
            queue.upsert(request("analysis", Priority::High, i));
        }
        assert_eq!(queue.len(), 1);
        assert!(queue.heap.len() <= 2 + 16 + 1);
        assert_eq!(
            queue.ordered()[0].earliest_eligible,
            request("x", Priority::High, 999).earliest_eligible
        );
    }

    #[test]
    fn test_clear() {
        let mut queue = PendingQueue::new();
        queue.upsert(request("a", Priority::High, 0));
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }
}
