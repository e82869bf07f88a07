use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::admin::topic_table::TopicTable;
use crate::admin::worker_table::WorkerTable;
use crate::registry::Registry;

pub mod partition;
pub mod topic;
pub mod worker;

/// Everything one controller instance owns. Several instances can live in one
/// process (tests run a pair of replicas against a shared registry).
#[derive(Debug)]
pub struct ControllerState {
    pub topics: TopicTable,
    pub workers: WorkerTable,
    pub registry: Arc<dyn Registry>,
    /// Takeover time in ms, 0 while this replica is not master.
    leader_since_ms: AtomicI64,
}

impl ControllerState {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            topics: TopicTable::new(),
            workers: WorkerTable::new(),
            registry,
            leader_since_ms: AtomicI64::new(0),
        }
    }

    pub fn leader_since_ms(&self) -> i64 {
        self.leader_since_ms.load(Ordering::SeqCst)
    }

    pub fn set_leader_since_ms(&self, now_ms: i64) {
        self.leader_since_ms.store(now_ms, Ordering::SeqCst)
    }

    /// Drops all in-memory state after losing mastership.
    pub fn reset(&self) {
        self.topics.clear();
        self.workers.clear();
        self.leader_since_ms.store(0, Ordering::SeqCst);
    }
}
