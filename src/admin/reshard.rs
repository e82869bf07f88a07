//! Partition-count changes on logic topics.
//!
//! A logic topic never changes its partition count in place. The generation
//! taking writes is sealed, and once every broker echoes the seal for every
//! partition of that generation a new physic generation with the requested
//! count is linked into the parent. A task stays pending for as long as some
//! broker does not echo the seal.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::admin::state::partition::PartitionId;
use crate::admin::state::topic::{physic_topic_name, TopicKind, TopicMeta};
use crate::error::Result;
use crate::registry::{self, paths, Registry};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ReshardStage {
    Pending,
    /// `generation` is sealed, waiting for brokers to echo it.
    Sealed { generation: String },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PartitionCountTask {
    pub topic: String,
    /// Request time in ms.
    pub task_id: i64,
    pub target_count: u32,
    pub stage: ReshardStage,
}

/// Outstanding tasks keyed by logic topic; at most one per topic.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReshardTasks(BTreeMap<String, PartitionCountTask>);

impl ReshardTasks {
    pub fn load(registry: &dyn Registry) -> Result<Self> {
        Ok(registry::get(registry, paths::CHANGE_PARTITION_TASKS)?.unwrap_or_default())
    }

    pub fn persist(&self, registry: &dyn Registry) -> Result<()> {
        registry::put(registry, paths::CHANGE_PARTITION_TASKS, self)
    }

    /// Queues a change. A second request for the same topic only replaces the
    /// target count; the stage already reached is kept.
    pub fn submit(&mut self, topic: &str, target_count: u32, now_ms: i64) {
        match self.0.get_mut(topic) {
            Some(task) => {
                tracing::info!(topic, from = task.target_count, to = target_count, "replacing reshard target");
                task.target_count = target_count;
            }
            None => {
                self.0.insert(
                    topic.to_string(),
                    PartitionCountTask {
                        topic: topic.to_string(),
                        task_id: now_ms,
                        target_count,
                        stage: ReshardStage::Pending,
                    },
                );
            }
        }
    }

    pub fn remove(&mut self, topic: &str) -> Option<PartitionCountTask> {
        self.0.remove(topic)
    }

    pub fn get(&self, topic: &str) -> Option<&PartitionCountTask> {
        self.0.get(topic)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn set_stage(&mut self, topic: &str, stage: ReshardStage) {
        if let Some(task) = self.0.get_mut(topic) {
            task.stage = stage;
        }
    }

    /// Applies a planned step to the queue.
    pub fn apply(&mut self, step: &ReshardStep) {
        match step {
            ReshardStep::Seal { topic, generation } => self.set_stage(
                topic,
                ReshardStage::Sealed {
                    generation: generation.name.clone(),
                },
            ),
            ReshardStep::Split { parent, .. } => {
                self.remove(&parent.name);
            }
            ReshardStep::Drop { topic } => {
                self.remove(topic);
            }
        }
    }
}

/// One step of the state machine. Metas carried here are the new versions to
/// persist and commit.
#[derive(Clone, Debug, PartialEq)]
pub enum ReshardStep {
    Seal {
        topic: String,
        generation: TopicMeta,
    },
    Split {
        parent: TopicMeta,
        physic: TopicMeta,
    },
    /// The logic topic is gone.
    Drop { topic: String },
}

/// Plans the next step of every task. `sealed` holds the partitions that some
/// live broker reports as sealed.
pub fn plan(
    tasks: &ReshardTasks,
    metas: &HashMap<String, TopicMeta>,
    sealed: &HashSet<PartitionId>,
    now_ms: i64,
) -> Vec<ReshardStep> {
    let mut steps = vec![];
    for task in tasks.0.values() {
        let parent = match metas.get(&task.topic) {
            Some(parent) if parent.kind.is_logic() => parent,
            _ => {
                steps.push(ReshardStep::Drop {
                    topic: task.topic.clone(),
                });
                continue;
            }
        };

        match &task.stage {
            ReshardStage::Pending => {
                let generation = match metas.get(parent.current_generation()) {
                    Some(generation) => generation,
                    // nothing to seal yet, link the first generation directly
                    None => {
                        steps.push(split(parent, task.target_count, now_ms));
                        continue;
                    }
                };
                let mut generation = generation.clone();
                generation.sealed = true;
                generation.modify_time_ms = now_ms;
                steps.push(ReshardStep::Seal {
                    topic: task.topic.clone(),
                    generation,
                });
            }
            ReshardStage::Sealed { generation } => {
                let echoed = match metas.get(generation) {
                    Some(meta) => (0..meta.partition_count)
                        .all(|idx| sealed.contains(&PartitionId::new(generation, idx))),
                    None => true,
                };
                if echoed {
                    steps.push(split(parent, task.target_count, now_ms));
                } else {
                    tracing::debug!(topic = %task.topic, %generation, "waiting for seal echo");
                }
            }
        }
    }
    steps
}

fn split(parent: &TopicMeta, target_count: u32, now_ms: i64) -> ReshardStep {
    let physic = TopicMeta {
        name: physic_topic_name(&parent.name, now_ms, target_count),
        kind: TopicKind::Physic,
        partition_count: target_count,
        partition_limit: parent.partition_limit,
        resource: parent.resource,
        group_name: parent.group_name.clone(),
        storage_root: parent.storage_root.clone(),
        extend_storage_roots: parent.extend_storage_roots.clone(),
        schema_versions: parent.schema_versions.clone(),
        owners: parent.owners.clone(),
        expired_time_secs: parent.expired_time_secs,
        create_time_ms: now_ms,
        modify_time_ms: now_ms,
        ..TopicMeta::default()
    };

    let mut parent = parent.clone();
    parent.physic_topics.push(physic.name.clone());
    if parent.kind == TopicKind::Logic {
        parent.partition_count = target_count;
    }
    parent.modify_time_ms = now_ms;
    ReshardStep::Split { parent, physic }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logic(name: &str, count: u32) -> (TopicMeta, TopicMeta) {
        let mut parent = TopicMeta::new(name, count);
        parent.kind = TopicKind::Logic;
        let first = physic_topic_name(name, 1, count);
        parent.physic_topics.push(first.clone());
        let mut physic = TopicMeta::new(&first, count);
        physic.kind = TopicKind::Physic;
        (parent, physic)
    }

    fn metas(list: Vec<TopicMeta>) -> HashMap<String, TopicMeta> {
        list.into_iter().map(|m| (m.name.clone(), m)).collect()
    }

    #[test]
    fn resubmission_replaces_target() {
        let mut tasks = ReshardTasks::default();
        tasks.submit("l", 8, 100);
        tasks.submit("l", 16, 200);
        assert_eq!(1, tasks.len());
        let task = tasks.get("l").unwrap();
        assert_eq!(16, task.target_count);
        assert_eq!(100, task.task_id);
    }

    #[test]
    fn seal_then_split_once_echoed() {
        let (parent, physic) = logic("l", 2);
        let mut metas = metas(vec![parent, physic.clone()]);
        let mut tasks = ReshardTasks::default();
        tasks.submit("l", 4, 10);

        let steps = plan(&tasks, &metas, &HashSet::new(), 20);
        let generation = match &steps[..] {
            [ReshardStep::Seal { generation, .. }] => generation.clone(),
            other => panic!("unexpected {:?}", other),
        };
        assert!(generation.sealed);
        assert_eq!(physic.name, generation.name);
        tasks.apply(&steps[0]);
        metas.insert(generation.name.clone(), generation);

        // one partition echoed: keep waiting
        let mut sealed = HashSet::from([PartitionId::new(&physic.name, 0)]);
        assert!(plan(&tasks, &metas, &sealed, 30).is_empty());

        sealed.insert(PartitionId::new(&physic.name, 1));
        let steps = plan(&tasks, &metas, &sealed, 40);
        match &steps[..] {
            [ReshardStep::Split { parent, physic: next }] => {
                assert_eq!("l-40-4", next.name);
                assert_eq!(TopicKind::Physic, next.kind);
                assert_eq!(4, next.partition_count);
                assert_eq!(vec![physic.name.clone(), next.name.clone()], parent.physic_topics);
                assert_eq!(4, parent.partition_count);
            }
            other => panic!("unexpected {:?}", other),
        }
        tasks.apply(&steps[0]);
        assert!(tasks.is_empty());
    }

    #[test]
    fn logic_physic_keeps_own_count() {
        let mut lp = TopicMeta::new("lp", 3);
        lp.kind = TopicKind::LogicPhysic;
        lp.sealed = true;
        let metas = metas(vec![lp]);
        let mut tasks = ReshardTasks::default();
        tasks.submit("lp", 6, 1);
        tasks.apply(&ReshardStep::Seal {
            topic: "lp".to_string(),
            generation: metas["lp"].clone(),
        });

        let sealed: HashSet<PartitionId> = (0..3).map(|i| PartitionId::new("lp", i)).collect();
        match &plan(&tasks, &metas, &sealed, 50)[..] {
            [ReshardStep::Split { parent, physic }] => {
                assert_eq!(3, parent.partition_count);
                assert_eq!(TopicKind::LogicPhysic, parent.kind);
                assert_eq!(vec![physic.name.clone()], parent.physic_topics);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn deleted_topic_drops_task() {
        let mut tasks = ReshardTasks::default();
        tasks.submit("gone", 4, 1);
        let steps = plan(&tasks, &HashMap::new(), &HashSet::new(), 2);
        assert_eq!(
            vec![ReshardStep::Drop {
                topic: "gone".to_string()
            }],
            steps
        );
    }

    #[test]
    fn persisted() -> Result<()> {
        let registry = crate::registry::MemoryRegistry::new();
        let mut tasks = ReshardTasks::default();
        tasks.submit("l", 4, 1);
        tasks.persist(&registry)?;
        assert_eq!(tasks, ReshardTasks::load(&registry)?);
        Ok(())
    }
}
