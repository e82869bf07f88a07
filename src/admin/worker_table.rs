//! Liveness and heartbeat snapshots for brokers and admin replicas.
//!
//! A worker is `Alive` while heartbeats keep coming, turns `Unknown` once
//! `unknown_timeout` passes without one (or it announces it is leaving) and
//! `Dead` after `dead_timeout`. A heartbeat before the dead timeout brings it
//! back to `Alive`. Workers are never removed, only marked.

use std::collections::{HashMap, HashSet};

use parking_lot::{Mutex, RwLock};

use crate::admin::state::partition::PartitionId;
use crate::admin::state::worker::{BrokerVersion, Heartbeat, RoleType, WorkerInfo, WorkerStatus};

pub const FULL_RESOURCE_RATIO: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessChange {
    pub role: String,
    pub from: WorkerStatus,
    pub to: WorkerStatus,
}

#[derive(Debug, Default)]
struct Workers {
    brokers: HashMap<String, WorkerInfo>,
    admins: HashMap<String, WorkerInfo>,
    /// Operator resource ratio in percent, by broker role.
    resource_ratios: HashMap<String, u32>,
}

impl Workers {
    fn map(&mut self, role_type: RoleType) -> &mut HashMap<String, WorkerInfo> {
        match role_type {
            RoleType::Broker => &mut self.brokers,
            RoleType::Admin => &mut self.admins,
        }
    }
}

#[derive(Debug, Default)]
pub struct WorkerTable {
    workers: Mutex<Workers>,
    versions: RwLock<HashMap<String, BrokerVersion>>,
}

impl WorkerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a heartbeat and returns the worker's resulting status.
    pub fn update_worker(&self, heartbeat: Heartbeat, now_ms: i64) -> WorkerStatus {
        if let Some(version) = &heartbeat.version {
            let mut versions = self.versions.write();
            if versions.get(&heartbeat.addr.role) != Some(version) {
                tracing::info!(role = %heartbeat.addr.role, version = %version.version, "broker version changed");
                versions.insert(heartbeat.addr.role.clone(), version.clone());
            }
        }

        let mut workers = self.workers.lock();
        let role = heartbeat.addr.role.clone();
        let status = if heartbeat.alive {
            WorkerStatus::Alive
        } else {
            WorkerStatus::Unknown
        };
        let map = workers.map(heartbeat.role_type);
        match map.get_mut(&role) {
            Some(worker) => {
                if worker.status != status {
                    tracing::info!(%role, from = %worker.status, to = %status, "worker status changed");
                }
                worker.unknown_since_ms = match status {
                    WorkerStatus::Alive => None,
                    _ => worker.unknown_since_ms.or(Some(now_ms)),
                };
                worker.status = status;
                worker.addr = heartbeat.addr.clone();
                worker.group = heartbeat.group.clone();
                worker.last_heartbeat_ms = now_ms;
                worker.heartbeat = heartbeat;
            }
            None => {
                tracing::info!(%role, %status, "new worker");
                map.insert(
                    role,
                    WorkerInfo {
                        addr: heartbeat.addr.clone(),
                        role_type: heartbeat.role_type,
                        group: heartbeat.group.clone(),
                        status,
                        last_heartbeat_ms: now_ms,
                        unknown_since_ms: (status != WorkerStatus::Alive).then_some(now_ms),
                        heartbeat,
                    },
                );
            }
        }
        status
    }

    /// Re-classifies every worker by heartbeat age.
    pub fn check_liveness(
        &self,
        now_ms: i64,
        unknown_timeout_ms: i64,
        dead_timeout_ms: i64,
    ) -> Vec<LivenessChange> {
        let mut changes = Vec::new();
        let mut workers = self.workers.lock();
        let Workers {
            brokers, admins, ..
        } = &mut *workers;
        for worker in brokers.values_mut().chain(admins.values_mut()) {
            let silent_ms = now_ms - worker.last_heartbeat_ms;
            let status = if silent_ms >= dead_timeout_ms {
                WorkerStatus::Dead
            } else if silent_ms >= unknown_timeout_ms || worker.status == WorkerStatus::Unknown {
                WorkerStatus::Unknown
            } else {
                worker.status
            };
            if status != worker.status {
                match status {
                    WorkerStatus::Dead => {
                        tracing::warn!(role = %worker.addr.role, silent_ms, "worker declared dead")
                    }
                    _ => tracing::info!(role = %worker.addr.role, silent_ms, "worker unknown"),
                }
                changes.push(LivenessChange {
                    role: worker.addr.role.clone(),
                    from: worker.status,
                    to: status,
                });
                if worker.unknown_since_ms.is_none() {
                    worker.unknown_since_ms =
                        Some(worker.last_heartbeat_ms + unknown_timeout_ms.min(silent_ms));
                }
                worker.status = status;
            }
        }
        changes
    }

    /// Brokers that are alive, or with `alive_only == false`, the ones that
    /// are not (unknown or dead).
    pub fn filter_workers(&self, alive_only: bool) -> Vec<WorkerInfo> {
        let workers = self.workers.lock();
        let mut filtered: Vec<WorkerInfo> = workers
            .brokers
            .values()
            .filter(|w| w.is_alive() == alive_only)
            .cloned()
            .collect();
        filtered.sort_by(|a, b| a.addr.cmp(&b.addr));
        filtered
    }

    pub fn brokers(&self) -> Vec<WorkerInfo> {
        let mut brokers: Vec<WorkerInfo> = self.workers.lock().brokers.values().cloned().collect();
        brokers.sort_by(|a, b| a.addr.cmp(&b.addr));
        brokers
    }

    pub fn admins(&self) -> Vec<WorkerInfo> {
        let mut admins: Vec<WorkerInfo> = self.workers.lock().admins.values().cloned().collect();
        admins.sort_by(|a, b| a.addr.cmp(&b.addr));
        admins
    }

    pub fn get(&self, role: &str) -> Option<WorkerInfo> {
        self.workers.lock().brokers.get(role).cloned()
    }

    /// Alive brokers whose storage commit lags by more than
    /// `commit_delay_threshold_ms`, or whose last self-check is older than
    /// `check_timeout_ms`.
    pub fn find_error_brokers(
        &self,
        now_ms: i64,
        commit_delay_threshold_ms: u64,
        check_timeout_ms: i64,
    ) -> Vec<String> {
        let workers = self.workers.lock();
        let mut errors: Vec<String> = workers
            .brokers
            .values()
            .filter(|w| w.is_alive())
            .filter(|w| {
                w.heartbeat.commit_delay_ms > commit_delay_threshold_ms
                    || (w.heartbeat.last_check_ms > 0
                        && now_ms - w.heartbeat.last_check_ms > check_timeout_ms)
            })
            .map(|w| w.addr.role.clone())
            .collect();
        errors.sort();
        errors
    }

    /// Applies operator resource ratios (percent, 0 drains the broker). A ratio
    /// of 100 restores the default.
    pub fn adjust_worker_resource(&self, ratios: HashMap<String, u32>) {
        let mut workers = self.workers.lock();
        for (role, ratio) in ratios {
            tracing::info!(%role, ratio, "adjust worker resource");
            if ratio >= FULL_RESOURCE_RATIO {
                workers.resource_ratios.remove(&role);
            } else {
                workers.resource_ratios.insert(role, ratio);
            }
        }
    }

    pub fn resource_ratios(&self) -> HashMap<String, u32> {
        self.workers.lock().resource_ratios.clone()
    }

    pub fn versions(&self) -> HashMap<String, BrokerVersion> {
        self.versions.read().clone()
    }

    /// Topics with partitions served by, or sessions open on, any worker that
    /// is not dead.
    pub fn loaded_topics(&self) -> HashSet<String> {
        let workers = self.workers.lock();
        workers
            .brokers
            .values()
            .filter(|w| w.status != WorkerStatus::Dead)
            .flat_map(|w| {
                w.heartbeat
                    .partitions
                    .iter()
                    .map(|p| p.id.topic.clone())
                    .chain(w.heartbeat.session_topics.iter().cloned())
            })
            .collect()
    }

    /// Partitions that some broker that is not dead reports as sealed.
    pub fn sealed_partitions(&self) -> HashSet<PartitionId> {
        let workers = self.workers.lock();
        workers
            .brokers
            .values()
            .filter(|w| w.status != WorkerStatus::Dead)
            .flat_map(|w| w.heartbeat.partitions.iter())
            .filter(|report| report.sealed)
            .map(|report| report.id.clone())
            .collect()
    }

    /// Latest (read, write) timestamps per topic across all brokers.
    pub fn topic_access(&self) -> HashMap<String, (i64, i64)> {
        let workers = self.workers.lock();
        let mut access: HashMap<String, (i64, i64)> = HashMap::new();
        for stat in workers.brokers.values().flat_map(|w| w.heartbeat.topic_access.iter()) {
            let entry = access.entry(stat.topic.clone()).or_insert((0, 0));
            entry.0 = entry.0.max(stat.last_read_ms);
            entry.1 = entry.1.max(stat.last_write_ms);
        }
        access
    }

    pub fn clear(&self) {
        let mut workers = self.workers.lock();
        workers.brokers.clear();
        workers.admins.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::state::partition::InlineVersion;
    use crate::admin::state::worker::TopicAccess;

    #[test]
    fn liveness_cycle() {
        let table = WorkerTable::new();
        assert_eq!(
            WorkerStatus::Alive,
            table.update_worker(Heartbeat::broker("b1", "h:1", "default"), 0)
        );

        assert!(table.check_liveness(1_000, 5_000, 30_000).is_empty());
        let changes = table.check_liveness(6_000, 5_000, 30_000);
        assert_eq!(WorkerStatus::Unknown, changes[0].to);
        assert_eq!(Some(5_000), table.get("b1").unwrap().unknown_since_ms);

        // back before the dead timeout
        table.update_worker(Heartbeat::broker("b1", "h:1", "default"), 10_000);
        let worker = table.get("b1").unwrap();
        assert_eq!(WorkerStatus::Alive, worker.status);
        assert_eq!(None, worker.unknown_since_ms);

        let changes = table.check_liveness(40_000, 5_000, 30_000);
        assert_eq!(WorkerStatus::Dead, changes[0].to);
        assert_eq!(1, table.filter_workers(false).len());
        assert!(table.filter_workers(true).is_empty());
        // marked, never removed
        assert!(table.get("b1").is_some());
    }

    #[test]
    fn leaving_worker_is_unknown() {
        let table = WorkerTable::new();
        let mut hb = Heartbeat::broker("b1", "h:1", "default");
        table.update_worker(hb.clone(), 0);
        hb.alive = false;
        assert_eq!(WorkerStatus::Unknown, table.update_worker(hb, 100));
        assert_eq!(Some(100), table.get("b1").unwrap().unknown_since_ms);
        // stays unknown while heartbeats keep saying so
        assert!(table.check_liveness(200, 5_000, 30_000).is_empty());
    }

    #[test]
    fn admins_are_kept_apart() {
        let table = WorkerTable::new();
        table.update_worker(Heartbeat::admin("a:1"), 0);
        table.update_worker(Heartbeat::broker("b1", "h:1", "default"), 0);
        assert_eq!(1, table.admins().len());
        assert_eq!(1, table.brokers().len());
    }

    #[test]
    fn error_brokers() {
        let table = WorkerTable::new();
        let mut slow = Heartbeat::broker("slow", "h:1", "default");
        slow.commit_delay_ms = 90_000;
        let mut stuck = Heartbeat::broker("stuck", "h:2", "default");
        stuck.last_check_ms = 1_000;
        let mut fine = Heartbeat::broker("fine", "h:3", "default");
        fine.last_check_ms = 299_000;
        for hb in [slow, stuck, fine] {
            table.update_worker(hb, 300_000);
        }
        assert_eq!(
            vec!["slow".to_string(), "stuck".to_string()],
            table.find_error_brokers(300_000, 60_000, 120_000)
        );
    }

    #[test]
    fn resource_ratios() {
        let table = WorkerTable::new();
        table.adjust_worker_resource(HashMap::from([("b1".to_string(), 0), ("b2".to_string(), 50)]));
        assert_eq!(Some(&0), table.resource_ratios().get("b1"));
        table.adjust_worker_resource(HashMap::from([("b1".to_string(), 100)]));
        assert_eq!(None, table.resource_ratios().get("b1"));
        assert_eq!(Some(&50), table.resource_ratios().get("b2"));
    }

    #[test]
    fn versions_side_table() {
        let table = WorkerTable::new();
        let mut hb = Heartbeat::broker("b1", "h:1", "default");
        hb.version = Some(BrokerVersion {
            version: "1.2.0".to_string(),
            protocol_version: 3,
        });
        table.update_worker(hb, 0);
        let versions = table.versions();
        assert_eq!("1.2.0", versions["b1"].version);
        assert!(!versions.contains_key("b2"));
    }

    #[test]
    fn loaded_topics_and_access() {
        let table = WorkerTable::new();
        let mut hb = Heartbeat::broker("b1", "h:1", "default")
            .running(PartitionId::new("served", 0), InlineVersion::default());
        hb.session_topics = vec!["reading".to_string()];
        hb.topic_access = vec![TopicAccess {
            topic: "served".to_string(),
            last_read_ms: 5,
            last_write_ms: 7,
        }];
        table.update_worker(hb, 0);

        let loaded = table.loaded_topics();
        assert!(loaded.contains("served"));
        assert!(loaded.contains("reading"));
        assert_eq!(Some(&(5, 7)), table.topic_access().get("served"));

        assert!(table.sealed_partitions().is_empty());

        table.check_liveness(100_000, 5_000, 30_000);
        assert!(table.loaded_topics().is_empty());
    }
}
