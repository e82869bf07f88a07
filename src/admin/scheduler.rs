//! Partition placement and the per-partition lifecycle.
//!
//! [`decide`] is a pure function from a topic snapshot and worker views to a
//! [`Decision`]. It never touches a lock or the registry, so every scenario in
//! the tests below runs without timers. The controller applies the decision
//! and persists it.
//!
//! Placement has two passes. The first keeps every partition on its incumbent
//! (the worker serving it, then the previous target) as long as that worker may
//! still hold it. The second hashes whatever is left onto a consistent-hash ring
//! of the eligible brokers of the topic's group.

use std::collections::HashMap;

use conhash::ConsistentHash;
use uuid::Uuid;

use crate::admin::state::partition::{PartitionId, PartitionInfo, PartitionStatus};
use crate::admin::state::worker::{PartitionReport, WorkerAddr, WorkerInfo, WorkerStatus};
use crate::admin::topic_table::TopicInfo;
use crate::admin::worker_table::FULL_RESOURCE_RATIO;

/// Virtual nodes per broker on the placement ring.
pub const VIRTUAL_NODES: usize = 150;

/// Upper bound of transitions one partition may take in a single tick
/// (`STOPPING -> WAITING -> STARTING` is the longest useful chain).
const MAX_TRANSITIONS_PER_TICK: usize = 4;

/// What the scheduler needs to know about one broker.
#[derive(Clone, Debug)]
pub struct WorkerView {
    pub addr: WorkerAddr,
    pub group: String,
    pub status: WorkerStatus,
    pub unknown_since_ms: Option<i64>,
    /// Resource units this broker may hold.
    pub capacity: u32,
    pub reports: HashMap<PartitionId, PartitionReport>,
}

impl WorkerView {
    pub fn new(info: &WorkerInfo, ratio: u32, broker_partition_limit: u32) -> Self {
        let capacity = (broker_partition_limit as u64 * ratio as u64 / FULL_RESOURCE_RATIO as u64) as u32;
        Self {
            addr: info.addr.clone(),
            group: info.group.clone(),
            status: info.status,
            unknown_since_ms: info.unknown_since_ms,
            capacity,
            reports: info
                .heartbeat
                .partitions
                .iter()
                .map(|report| (report.id.clone(), report.clone()))
                .collect(),
        }
    }

    fn reports_running(&self, partition: &PartitionInfo) -> bool {
        self.reports
            .get(&partition.id)
            .map(|report| report.running && report.version >= partition.version)
            .unwrap_or(false)
    }
}

/// Builds views keyed by role from the broker table and operator ratios.
pub fn worker_views(
    brokers: &[WorkerInfo],
    ratios: &HashMap<String, u32>,
    broker_partition_limit: u32,
) -> HashMap<String, WorkerView> {
    brokers
        .iter()
        .map(|info| {
            let ratio = ratios
                .get(&info.addr.role)
                .copied()
                .unwrap_or(FULL_RESOURCE_RATIO);
            (
                info.addr.role.clone(),
                WorkerView::new(info, ratio, broker_partition_limit),
            )
        })
        .collect()
}

#[derive(Clone, Debug)]
pub struct ScheduleContext {
    pub master_version: u64,
    pub now_ms: i64,
    /// When this replica took over; workers it has never heard from count as
    /// unknown since then.
    pub leader_since_ms: i64,
    pub force_schedule_timeout_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub id: PartitionId,
    pub from: PartitionStatus,
    pub to: PartitionStatus,
    pub worker: Option<WorkerAddr>,
}

#[derive(Clone, Debug)]
pub struct ScheduledTopic {
    pub name: String,
    pub id: Uuid,
    pub partitions: Vec<PartitionInfo>,
    /// Anything differs from the snapshot, including targets.
    pub changed: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Decision {
    pub topics: Vec<ScheduledTopic>,
    pub transitions: Vec<Transition>,
    /// Partitions no broker could take this tick.
    pub unassigned: Vec<PartitionId>,
}

impl Decision {
    pub fn changed(&self) -> bool {
        self.topics.iter().any(|t| t.changed)
    }
}

struct Placement<'a> {
    workers: &'a HashMap<String, WorkerView>,
    ctx: &'a ScheduleContext,
    load: HashMap<String, u32>,
    topic_load: HashMap<(String, String), u32>,
    rings: HashMap<String, ConsistentHash<WorkerAddr>>,
}

impl<'a> Placement<'a> {
    fn new(workers: &'a HashMap<String, WorkerView>, ctx: &'a ScheduleContext) -> Self {
        Self {
            workers,
            ctx,
            load: HashMap::new(),
            topic_load: HashMap::new(),
            rings: HashMap::new(),
        }
    }

    /// Whether `addr` still owns what it serves. A dead worker never does; an
    /// unknown one does until the force-schedule timeout runs out.
    fn holds(&self, addr: &WorkerAddr) -> bool {
        let unknown_since = match self.workers.get(&addr.role) {
            Some(view) => match view.status {
                WorkerStatus::Alive => return true,
                WorkerStatus::Dead => return false,
                WorkerStatus::Unknown => view.unknown_since_ms.unwrap_or(self.ctx.leader_since_ms),
            },
            None => self.ctx.leader_since_ms,
        };
        self.ctx.now_ms - unknown_since < self.ctx.force_schedule_timeout_ms
    }

    fn has_room(&self, view: &WorkerView, meta_name: &str, resource: u32, partition_limit: u32) -> bool {
        let load = self.load.get(&view.addr.role).copied().unwrap_or(0);
        let topic_load = self
            .topic_load
            .get(&(view.addr.role.clone(), meta_name.to_string()))
            .copied()
            .unwrap_or(0);
        load + resource <= view.capacity && (partition_limit == 0 || topic_load < partition_limit)
    }

    fn take(&mut self, role: &str, topic: &str, resource: u32) {
        *self.load.entry(role.to_string()).or_insert(0) += resource;
        *self
            .topic_load
            .entry((role.to_string(), topic.to_string()))
            .or_insert(0) += 1;
    }

    /// Keeps a partition on its incumbent when possible.
    fn keep_incumbent(&mut self, info: &TopicInfo, partition: &PartitionInfo) -> Option<WorkerAddr> {
        let meta = &info.meta;
        let workers = self.workers;
        let incumbents = [partition.current.as_ref(), partition.last_target.as_ref()];
        for addr in incumbents.into_iter().flatten() {
            if !self.holds(addr) {
                continue;
            }
            match workers.get(&addr.role) {
                Some(view) if view.status == WorkerStatus::Alive => {
                    if view.group == meta.group_name
                        && self.has_room(view, &meta.name, meta.resource, meta.partition_limit)
                    {
                        let addr = view.addr.clone();
                        self.take(&addr.role, &meta.name, meta.resource);
                        return Some(addr);
                    }
                }
                // unknown or never seen yet: holds what it has, capacity is not re-checked
                _ => {
                    let addr = workers
                        .get(&addr.role)
                        .map(|view| view.addr.clone())
                        .unwrap_or_else(|| addr.clone());
                    self.take(&addr.role, &meta.name, meta.resource);
                    return Some(addr);
                }
            }
        }
        None
    }

    fn ring(&mut self, group: &str) -> &mut ConsistentHash<WorkerAddr> {
        let workers = self.workers;
        let load = &self.load;
        self.rings.entry(group.to_string()).or_insert_with(|| {
            let mut ring = ConsistentHash::new();
            let mut eligible: Vec<&WorkerView> = workers
                .values()
                .filter(|view| view.status == WorkerStatus::Alive && view.group == group)
                .filter(|view| load.get(&view.addr.role).copied().unwrap_or(0) < view.capacity)
                .collect();
            eligible.sort_by(|a, b| a.addr.cmp(&b.addr));
            for view in eligible {
                ring.add(&view.addr, VIRTUAL_NODES);
            }
            ring
        })
    }

    /// Hashes a partition onto the ring. When the hashed broker hit the
    /// topic's per-broker limit, the least loaded eligible broker is used.
    fn place(&mut self, info: &TopicInfo, id: &PartitionId) -> Option<WorkerAddr> {
        let meta = &info.meta;
        let workers = self.workers;
        let hashed = self.ring(&meta.group_name).get_str(&id.hash_key()).cloned();
        let chosen = match hashed {
            Some(addr)
                if workers
                    .get(&addr.role)
                    .map(|view| self.has_room(view, &meta.name, meta.resource, meta.partition_limit))
                    .unwrap_or(false) =>
            {
                Some(addr)
            }
            _ => {
                let mut candidates: Vec<&WorkerView> = workers
                    .values()
                    .filter(|view| view.status == WorkerStatus::Alive && view.group == meta.group_name)
                    .filter(|view| self.has_room(view, &meta.name, meta.resource, meta.partition_limit))
                    .collect();
                candidates.sort_by_key(|view| {
                    (
                        self.load.get(&view.addr.role).copied().unwrap_or(0),
                        view.addr.clone(),
                    )
                });
                candidates.first().map(|view| view.addr.clone())
            }
        }?;

        self.take(&chosen.role, &meta.name, meta.resource);
        if let Some(view) = workers.get(&chosen.role) {
            if self.load.get(&chosen.role).copied().unwrap_or(0) + meta.resource > view.capacity {
                self.ring(&meta.group_name).remove(&chosen);
            }
        }
        Some(chosen)
    }
}

/// Computes targets and status transitions for every partition in `topics`.
///
/// `topics` must come from `TopicTable::prepare_decision`, so previous targets
/// sit in `last_target`.
pub fn decide(
    mut topics: Vec<TopicInfo>,
    workers: &HashMap<String, WorkerView>,
    ctx: &ScheduleContext,
) -> Decision {
    topics.sort_by(|a, b| a.meta.name.cmp(&b.meta.name));
    let originals: Vec<Vec<PartitionInfo>> = topics.iter().map(|t| t.partitions.clone()).collect();

    let mut placement = Placement::new(workers, ctx);
    let mut decision = Decision::default();

    for info in topics.iter_mut() {
        let kept: Vec<Option<WorkerAddr>> = info
            .partitions
            .iter()
            .map(|partition| placement.keep_incumbent(info, partition))
            .collect();
        for (partition, target) in info.partitions.iter_mut().zip(kept) {
            partition.target = target;
        }
    }

    for info in topics.iter_mut() {
        for idx in 0..info.partitions.len() {
            if info.partitions[idx].target.is_some() {
                continue;
            }
            let id = info.partitions[idx].id.clone();
            match placement.place(info, &id) {
                Some(addr) => info.partitions[idx].target = Some(addr),
                None => decision.unassigned.push(id),
            }
        }
    }

    for (info, original) in topics.into_iter().zip(originals) {
        let mut partitions = info.partitions;
        for partition in partitions.iter_mut() {
            advance(partition, &placement, ctx, &mut decision.transitions);
        }
        // the snapshot carries the previous target in `last_target`
        let changed = partitions.iter().zip(original.iter()).any(|(now, before)| {
            now.target != before.last_target
                || now.current != before.current
                || now.status != before.status
                || now.version != before.version
        });
        decision.topics.push(ScheduledTopic {
            name: info.meta.name.clone(),
            id: info.meta.id,
            partitions,
            changed,
        });
    }
    decision
}

fn advance(
    partition: &mut PartitionInfo,
    placement: &Placement,
    ctx: &ScheduleContext,
    transitions: &mut Vec<Transition>,
) {
    for _ in 0..MAX_TRANSITIONS_PER_TICK {
        let next = match partition.status {
            PartitionStatus::Waiting => partition.target.clone().map(|target| {
                partition.version = partition.version.next(ctx.master_version);
                partition.current = Some(target);
                PartitionStatus::Starting
            }),
            PartitionStatus::Starting => match (&partition.target, &partition.current) {
                (Some(target), Some(current)) if target == current => placement
                    .workers
                    .get(&target.role)
                    .filter(|view| view.reports_running(partition))
                    .map(|_| PartitionStatus::Running),
                _ => Some(PartitionStatus::Stopping),
            },
            PartitionStatus::Running => match (&partition.target, &partition.current) {
                (Some(target), Some(current)) if target == current => {
                    match placement.workers.get(&current.role) {
                        // lost the partition without being told to stop
                        Some(view)
                            if view.status == WorkerStatus::Alive
                                && !view.reports_running(partition) =>
                        {
                            Some(PartitionStatus::Stopping)
                        }
                        _ => None,
                    }
                }
                _ => Some(PartitionStatus::Stopping),
            },
            PartitionStatus::Stopping => {
                let stopped = match &partition.current {
                    None => true,
                    Some(current) => {
                        !placement.holds(current)
                            || !placement
                                .workers
                                .get(&current.role)
                                .map(|view| view.reports.get(&partition.id).map(|r| r.running).unwrap_or(false))
                                .unwrap_or(false)
                    }
                };
                stopped.then(|| {
                    partition.current = None;
                    PartitionStatus::Waiting
                })
            }
        };

        let Some(next) = next else {
            break;
        };
        debug_assert!(partition.status.can_transition(next));
        transitions.push(Transition {
            id: partition.id.clone(),
            from: partition.status,
            to: next,
            worker: partition.target.clone(),
        });
        partition.status = next;
    }
}
