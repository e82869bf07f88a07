//! Authoritative in-memory map from topic name to its metadata and partition
//! assignment. No I/O happens while the lock is held; callers persist copies
//! first and commit here afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::admin::state::partition::{PartitionInfo, PartitionStatus};
use crate::admin::state::topic::TopicMeta;
use crate::error::{Result, SluiceError};
use crate::registry::{paths, Registry};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicInfo {
    pub meta: Arc<TopicMeta>,
    pub partitions: Vec<PartitionInfo>,
}

impl TopicInfo {
    fn new(meta: TopicMeta) -> Self {
        let partitions = if meta.kind.has_own_partitions() {
            (0..meta.partition_count)
                .map(|idx| PartitionInfo::waiting(&meta.name, idx))
                .collect()
        } else {
            vec![]
        };
        Self {
            meta: Arc::new(meta),
            partitions,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMetrics {
    pub topic_count: usize,
    pub partition_count: usize,
    pub running_partitions: usize,
    pub waiting_partitions: usize,
    /// Topics whose partitions are all running.
    pub running_topics: usize,
    /// Topics with no running partition.
    pub waiting_topics: usize,
    /// Topics with some, but not all, partitions running.
    pub partial_running_topics: usize,
}

#[derive(Debug, Default)]
pub struct TopicTable {
    topics: RwLock<HashMap<String, TopicInfo>>,
}

impl TopicTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, meta: TopicMeta) -> Result<()> {
        let mut topics = self.topics.write();
        if topics.contains_key(&meta.name) {
            return Err(SluiceError::TopicExists(meta.name));
        }
        topics.insert(meta.name.clone(), TopicInfo::new(meta));
        Ok(())
    }

    /// Rebuilds an entry from persisted state. Partition info is advisory and
    /// only kept when it matches the topic's partition count.
    pub fn restore(&self, meta: TopicMeta, partitions: Option<Vec<PartitionInfo>>) {
        let mut info = TopicInfo::new(meta);
        if let Some(partitions) = partitions {
            if partitions.len() == info.partitions.len() {
                info.partitions = partitions;
            } else {
                tracing::warn!(
                    topic = %info.meta.name,
                    persisted = partitions.len(),
                    expected = info.partitions.len(),
                    "dropping stale partition info"
                );
            }
        }
        self.topics.write().insert(info.meta.name.clone(), info);
    }

    /// Replaces a topic's metadata. A partition count change on a topic that
    /// owns partitions is ignored, since that only happens through a reshard.
    pub fn update(&self, mut meta: TopicMeta) -> Result<()> {
        let mut topics = self.topics.write();
        let info = topics
            .get_mut(&meta.name)
            .ok_or_else(|| SluiceError::TopicNotFound(meta.name.clone()))?;

        if meta.kind.has_own_partitions() && meta.partition_count != info.meta.partition_count {
            tracing::warn!(
                topic = %meta.name,
                from = info.meta.partition_count,
                to = meta.partition_count,
                "partition count cannot change on a topic with its own partitions"
            );
            meta.partition_count = info.meta.partition_count;
        }
        if meta.kind.has_own_partitions() && info.partitions.is_empty() {
            info.partitions = (0..meta.partition_count)
                .map(|idx| PartitionInfo::waiting(&meta.name, idx))
                .collect();
        }
        info.meta = Arc::new(meta);
        Ok(())
    }

    /// Removes a topic. With `delete_data` its registry subtree is removed too,
    /// best effort and after the lock is released.
    pub fn delete(
        &self,
        name: &str,
        delete_data: bool,
        registry: &dyn Registry,
    ) -> Option<Arc<TopicMeta>> {
        let removed = self.topics.write().remove(name)?;
        if delete_data {
            if let Err(err) = registry.remove(&paths::topic_data(name)) {
                tracing::warn!(topic = name, %err, "failed to remove topic data");
            }
        }
        Some(removed.meta)
    }

    pub fn find(&self, name: &str) -> Option<TopicInfo> {
        self.topics.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.topics.read().contains_key(name)
    }

    pub fn metas(&self) -> HashMap<String, TopicMeta> {
        self.topics
            .read()
            .iter()
            .map(|(name, info)| (name.clone(), (*info.meta).clone()))
            .collect()
    }

    pub fn snapshot(&self) -> Vec<TopicInfo> {
        let mut topics: Vec<TopicInfo> = self.topics.read().values().cloned().collect();
        topics.sort_by(|a, b| a.meta.name.cmp(&b.meta.name));
        topics
    }

    pub fn partitions(&self) -> HashMap<String, Vec<PartitionInfo>> {
        self.topics
            .read()
            .iter()
            .map(|(name, info)| (name.clone(), info.partitions.clone()))
            .collect()
    }

    /// Splits topics into those the scheduler must place and those it must not
    /// touch (logic topics, topics opted out of scheduling).
    pub fn split_by_schedule(&self) -> (Vec<TopicInfo>, Vec<TopicInfo>) {
        self.snapshot().into_iter().partition(|info| {
            info.meta.need_schedule
                && info.meta.kind.has_own_partitions()
                && !info.partitions.is_empty()
        })
    }

    /// Copies of the topics to schedule with every target moved into
    /// `last_target`, so an unplaced partition carries no previous target.
    /// The table itself keeps serving the old targets until the new decision
    /// is applied.
    pub fn prepare_decision(&self) -> Vec<TopicInfo> {
        let (mut scheduled, _) = self.split_by_schedule();
        for partition in scheduled.iter_mut().flat_map(|info| info.partitions.iter_mut()) {
            partition.last_target = partition.target.take();
        }
        scheduled
    }

    /// Commits scheduled partitions. Results for a topic that was deleted or
    /// recreated since the snapshot (different incarnation id) are dropped.
    pub fn apply_decision(&self, topic: &str, id: Uuid, partitions: Vec<PartitionInfo>) -> bool {
        let mut topics = self.topics.write();
        match topics.get_mut(topic) {
            Some(info) if info.meta.id == id && info.partitions.len() == partitions.len() => {
                info.partitions = partitions;
                true
            }
            _ => {
                tracing::debug!(topic, "dropping decision for changed topic");
                false
            }
        }
    }

    pub fn collect_metrics(&self) -> TopicMetrics {
        let topics = self.topics.read();
        let mut metrics = TopicMetrics {
            topic_count: topics.len(),
            ..Default::default()
        };
        for info in topics.values() {
            if info.partitions.is_empty() {
                continue;
            }
            let running = info
                .partitions
                .iter()
                .filter(|p| p.status == PartitionStatus::Running)
                .count();
            let waiting = info
                .partitions
                .iter()
                .filter(|p| p.status == PartitionStatus::Waiting)
                .count();
            metrics.partition_count += info.partitions.len();
            metrics.running_partitions += running;
            metrics.waiting_partitions += waiting;
            if running == info.partitions.len() {
                metrics.running_topics += 1;
            } else if running == 0 {
                metrics.waiting_topics += 1;
            } else {
                metrics.partial_running_topics += 1;
            }
        }
        metrics
    }

    pub fn clear(&self) {
        self.topics.write().clear();
    }

    pub fn len(&self) -> usize {
        self.topics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
