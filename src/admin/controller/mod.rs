//! The orchestrator of one admin replica.
//!
//! Every control tick stamps this replica, settles mastership, re-classifies
//! workers, advances reshard tasks and runs a scheduling pass. Topic commands
//! and heartbeats arrive through [`SysController::handle_request`] on the
//! blocking pool. All registry writes follow the same order: copy under lock,
//! persist, then commit in memory.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::admin::config::AdminConfig;
use crate::admin::lifecycle::{CleanAtDeleteManager, DataStore, NoUseTopicModule};
use crate::admin::master::{self, AdminInfo, Campaign, LeaderInfo, LeaderPublisher, MasterVersion};
use crate::admin::module::{ModuleKind, ModuleRegistry};
use crate::admin::reshard::{self, ReshardStep, ReshardTasks};
use crate::admin::rpc::{AdminRequest, AdminResponse, ResponseBody, SysMetrics};
use crate::admin::scheduler::{self, ScheduleContext};
use crate::admin::state::partition::PartitionInfo;
use crate::admin::state::topic::TopicMeta;
use crate::admin::state::worker::Heartbeat;
use crate::admin::state::ControllerState;
use crate::error::{Result, SluiceError};
use crate::registry::{self, paths, Registry};

mod heartbeat;
mod schema;
mod topics;

/// What one control tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub is_master: bool,
    pub took_over: bool,
    pub transitions: usize,
    pub unassigned: usize,
}

pub struct SysController {
    config: AdminConfig,
    address: String,
    state: ControllerState,
    master: MasterVersion,
    publisher: LeaderPublisher,
    modules: ModuleRegistry,
    reshard: Mutex<ReshardTasks>,
    /// Serializes every persist-then-commit sequence on topic state.
    write_lock: Mutex<()>,
}

impl Debug for SysController {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SysController {{ address: {} }}", self.address)
    }
}

impl SysController {
    pub fn new(
        config: AdminConfig,
        registry: Arc<dyn Registry>,
        store: Arc<dyn DataStore>,
    ) -> Result<Self> {
        let mut modules = ModuleRegistry::new();
        if config.enable_clean_at_delete {
            let manager = CleanAtDeleteManager::new(registry.clone(), store, &config)?;
            modules.register(ModuleKind::CleanAtDelete, Arc::new(manager))?;
        }
        if config.enable_nouse_topic {
            let module = NoUseTopicModule::new(registry.clone(), &config);
            modules.register(ModuleKind::NoUseTopic, Arc::new(module))?;
        }
        registry.create_path(paths::ADMIN_REPLICAS)?;

        Ok(Self {
            address: config.address(),
            config,
            state: ControllerState::new(registry.clone()),
            master: MasterVersion::new(registry.clone()),
            publisher: LeaderPublisher::new(registry),
            modules,
            reshard: Mutex::new(ReshardTasks::default()),
            write_lock: Mutex::new(()),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn config(&self) -> &AdminConfig {
        &self.config
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn is_master(&self) -> bool {
        self.master.is_master()
    }

    fn registry(&self) -> &dyn Registry {
        self.state.registry.as_ref()
    }

    fn ensure_master(&self) -> Result<()> {
        if self.is_master() {
            Ok(())
        } else {
            Err(SluiceError::NotLeader)
        }
    }

    fn clean_manager(&self) -> Option<&CleanAtDeleteManager> {
        self.modules.loaded(ModuleKind::CleanAtDelete)
    }

    #[tracing::instrument(skip(self, req), fields(address = %self.address))]
    pub fn handle_request(&self, req: AdminRequest, now_ms: i64) -> AdminResponse {
        tracing::debug!(?req, "handle_request");
        let result = match req {
            AdminRequest::CreateTopic(spec) => self.create_topic(spec, now_ms),
            AdminRequest::CreateTopicBatch {
                topics,
                ignore_exist,
            } => self.create_topic_batch(topics, ignore_exist, now_ms),
            AdminRequest::DeleteTopic { name, delete_data } => {
                self.delete_topic(&name, delete_data, now_ms)
            }
            AdminRequest::DeleteTopicBatch {
                names,
                delete_data,
                ignore_not_exist,
            } => self.delete_topic_batch(names, delete_data, ignore_not_exist, now_ms),
            AdminRequest::ModifyTopic(patch) => self.modify_topic(patch, now_ms),
            AdminRequest::GetTopicInfo { name } => self.get_topic_info(&name),
            AdminRequest::GetAllTopicInfo => self.get_all_topic_info(),
            AdminRequest::RegisterSchema { topic, schema } => {
                self.register_schema(&topic, schema, now_ms)
            }
            AdminRequest::GetSchema { topic, version } => self.get_schema(&topic, version),
            AdminRequest::TransferPartition { ratios } => self.transfer_partition(ratios),
            AdminRequest::Heartbeat(heartbeat) => self.heartbeat(heartbeat, now_ms),
            AdminRequest::GetWorkerStatus => self.worker_status(now_ms),
            AdminRequest::GetLeaderInfo => {
                master::read_leader(self.registry()).map(ResponseBody::Leader)
            }
            AdminRequest::GetSysMetrics => self.sys_metrics(),
        };
        if let Err(err) = &result {
            tracing::info!(%err, "request rejected");
        }
        result.into()
    }

    /// One control tick.
    pub fn control_tick(&self, now_ms: i64) -> Result<TickReport> {
        let mut report = TickReport::default();
        if let Err(err) = master::touch_replica(self.registry(), &self.address, now_ms) {
            tracing::warn!(%err, "failed to stamp replica");
        }

        report.took_over = self.settle_mastership(now_ms)?;
        if !self.is_master() {
            return Ok(report);
        }
        report.is_master = true;

        let failed = self.modules.load_all();
        if !failed.is_empty() {
            tracing::warn!(?failed, "modules not loaded");
        }

        if let Err(err) = self.refresh_admins() {
            tracing::warn!(%err, "failed to read admin replicas");
        }
        for change in self.state.workers.check_liveness(
            now_ms,
            self.config.worker_unknown_timeout_ms,
            self.config.worker_dead_timeout_ms,
        ) {
            tracing::info!(role = %change.role, from = %change.from, to = %change.to, "worker liveness changed");
        }
        self.publish_leader();

        for role in self.state.workers.find_error_brokers(
            now_ms,
            self.config.commit_delay_threshold_ms,
            self.config.broker_check_timeout_ms,
        ) {
            tracing::warn!(%role, "broker reports storage errors");
        }

        self.advance_reshard(now_ms)?;

        if now_ms - self.state.leader_since_ms() >= self.config.schedule_delay_ms {
            let (transitions, unassigned) = self.schedule(now_ms);
            report.transitions = transitions;
            report.unassigned = unassigned;
        }

        let metrics = self.state.topics.collect_metrics();
        tracing::debug!(?metrics, "topic metrics");
        Ok(report)
    }

    /// Verifies or acquires mastership. Returns true on takeover.
    fn settle_mastership(&self, now_ms: i64) -> Result<bool> {
        if self.is_master() {
            match self.master.verify() {
                Ok(true) => return Ok(false),
                Ok(false) => {
                    self.step_down();
                    return Ok(false);
                }
                Err(err) => {
                    // cannot prove we are still master
                    tracing::warn!(%err, "failed to verify master version");
                    self.master.abdicate();
                    self.step_down();
                    return Ok(false);
                }
            }
        }

        let campaign = master::should_campaign(
            self.registry(),
            &self.address,
            now_ms,
            self.config.leader_lease_ms,
        )
        .and_then(|should| should.then(|| self.master.campaign()).transpose());
        match campaign {
            Ok(Some(Campaign::Elected(version))) => match self.take_over(now_ms) {
                Ok(()) => {
                    tracing::info!(version, "took over as master");
                    Ok(true)
                }
                Err(err) => {
                    tracing::warn!(%err, "takeover failed");
                    self.master.abdicate();
                    self.step_down();
                    Ok(false)
                }
            },
            Ok(_) => Ok(false),
            Err(err) => {
                tracing::warn!(%err, "campaign failed");
                Ok(false)
            }
        }
    }

    /// Loads persisted state after winning an election. Topic meta decides
    /// which topics exist; partition info is only a hint.
    fn take_over(&self, now_ms: i64) -> Result<()> {
        let _write = self.write_lock.lock();
        let metas: BTreeMap<String, TopicMeta> =
            registry::get(self.registry(), paths::TOPIC_META)?.unwrap_or_default();
        let mut partitions: BTreeMap<String, Vec<PartitionInfo>> =
            registry::get(self.registry(), paths::PARTITION_INFO)?.unwrap_or_default();
        let tasks = ReshardTasks::load(self.registry())?;

        self.state.reset();
        for (name, meta) in metas {
            self.state.topics.restore(meta, partitions.remove(&name));
        }
        if !partitions.is_empty() {
            tracing::info!(stale = partitions.len(), "ignoring partition info of unknown topics");
        }
        self.state.set_leader_since_ms(now_ms);
        *self.reshard.lock() = tasks;
        self.publisher.reset();

        let failed = self.modules.load_all();
        if !failed.is_empty() {
            tracing::warn!(?failed, "modules not loaded at takeover");
        }
        tracing::info!(topics = self.state.topics.len(), "loaded controller state");
        Ok(())
    }

    fn step_down(&self) {
        tracing::warn!("lost mastership");
        self.modules.unload_all();
        self.state.reset();
        *self.reshard.lock() = ReshardTasks::default();
        self.publisher.reset();
    }

    /// Feeds admin replica stamps into the worker table.
    fn refresh_admins(&self) -> Result<()> {
        let known: HashMap<String, i64> = self
            .state
            .workers
            .admins()
            .into_iter()
            .map(|w| (w.addr.address, w.last_heartbeat_ms))
            .collect();
        for (address, stamp) in master::replica_stamps(self.registry())? {
            if known.get(&address).map_or(true, |last| stamp > *last) {
                self.state
                    .workers
                    .update_worker(Heartbeat::admin(&address), stamp);
            }
        }
        Ok(())
    }

    fn leader_info(&self) -> LeaderInfo {
        LeaderInfo {
            address: self.address.clone(),
            is_primary: true,
            alive: true,
            master_version: self.master.version(),
            admins: self
                .state
                .workers
                .admins()
                .into_iter()
                .map(|w| AdminInfo {
                    alive: w.is_alive(),
                    address: w.addr.address,
                })
                .collect(),
        }
    }

    fn publish_leader(&self) {
        match self.publisher.publish(&self.leader_info()) {
            Ok(published) if published.raw || published.json => {
                tracing::debug!(?published, "published leader info")
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(%err, "failed to publish leader info"),
        }
    }

    /// Runs the scheduler over a snapshot and commits the result. Returns the
    /// number of transitions and of partitions left without a broker.
    fn schedule(&self, now_ms: i64) -> (usize, usize) {
        let prepared = self.state.topics.prepare_decision();
        let views = scheduler::worker_views(
            &self.state.workers.brokers(),
            &self.state.workers.resource_ratios(),
            self.config.broker_partition_limit,
        );
        let ctx = ScheduleContext {
            master_version: self.master.version(),
            now_ms,
            leader_since_ms: self.state.leader_since_ms(),
            force_schedule_timeout_ms: self.config.force_schedule_timeout_ms,
        };
        let decision = scheduler::decide(prepared, &views, &ctx);

        for transition in &decision.transitions {
            tracing::info!(
                partition = %transition.id,
                from = %transition.from,
                to = %transition.to,
                worker = ?transition.worker.as_ref().map(|w| w.to_string()),
                "partition transition"
            );
        }
        if !decision.unassigned.is_empty() {
            tracing::warn!(count = decision.unassigned.len(), "partitions without a broker");
        }

        let transitions = decision.transitions.len();
        let unassigned = decision.unassigned.len();
        if !decision.changed() {
            return (transitions, unassigned);
        }
        for topic in decision.topics.into_iter().filter(|t| t.changed) {
            self.state
                .topics
                .apply_decision(&topic.name, topic.id, topic.partitions);
        }
        let partitions: BTreeMap<String, Vec<PartitionInfo>> =
            self.state.topics.partitions().into_iter().collect();
        if let Err(err) = registry::put(self.registry(), paths::PARTITION_INFO, &partitions) {
            tracing::warn!(%err, "failed to persist partition info");
        }
        (transitions, unassigned)
    }

    fn advance_reshard(&self, now_ms: i64) -> Result<()> {
        let _write = self.write_lock.lock();
        let tasks = self.reshard.lock().clone();
        if tasks.is_empty() {
            return Ok(());
        }
        let metas = self.state.topics.metas();
        let steps = reshard::plan(&tasks, &metas, &self.state.workers.sealed_partitions(), now_ms);
        if steps.is_empty() {
            return Ok(());
        }

        let mut next_tasks = tasks;
        let mut next_metas: BTreeMap<String, TopicMeta> = metas.into_iter().collect();
        for step in &steps {
            next_tasks.apply(step);
            match step {
                ReshardStep::Seal { generation, .. } => {
                    next_metas.insert(generation.name.clone(), generation.clone());
                }
                ReshardStep::Split { parent, physic } => {
                    next_metas.insert(parent.name.clone(), parent.clone());
                    next_metas.insert(physic.name.clone(), physic.clone());
                }
                ReshardStep::Drop { .. } => {}
            }
        }
        if let Err(err) = self.persist_metas(&next_metas).and_then(|_| next_tasks.persist(self.registry())) {
            tracing::warn!(%err, "failed to persist reshard progress");
            return Ok(());
        }

        for step in steps {
            match step {
                ReshardStep::Seal { topic, generation } => {
                    tracing::info!(%topic, generation = %generation.name, "sealed generation");
                    self.state.topics.update(generation)?;
                }
                ReshardStep::Split { parent, physic } => {
                    tracing::info!(topic = %parent.name, physic = %physic.name, count = physic.partition_count, "linked new generation");
                    self.state.topics.add(physic)?;
                    self.state.topics.update(parent)?;
                }
                ReshardStep::Drop { topic } => {
                    tracing::info!(%topic, "dropped reshard task of deleted topic");
                }
            }
        }
        *self.reshard.lock() = next_tasks;
        Ok(())
    }

    fn persist_metas(&self, metas: &BTreeMap<String, TopicMeta>) -> Result<()> {
        registry::put(self.registry(), paths::TOPIC_META, metas)
    }

    /// One reclaim pass, master only.
    pub fn clean_tick(&self, now_ms: i64) -> Result<()> {
        if !self.is_master() {
            return Ok(());
        }
        if let Some(manager) = self.clean_manager() {
            let report = manager.tick(&self.state.workers.loaded_topics(), now_ms)?;
            if !report.finished.is_empty() || !report.failed.is_empty() {
                tracing::info!(finished = ?report.finished, failed = ?report.failed, "reclaim pass");
            }
        }
        Ok(())
    }

    /// One unused-topic pass, master only. Expired topics are deleted.
    pub fn nouse_tick(&self, now_ms: i64) -> Result<()> {
        if !self.is_master() {
            return Ok(());
        }
        let module = match self.modules.loaded::<NoUseTopicModule>(ModuleKind::NoUseTopic) {
            Some(module) => module,
            None => return Ok(()),
        };
        let expired = module.tick(
            &self.state.topics.metas(),
            &self.state.workers.topic_access(),
            &self.state.workers.loaded_topics(),
            now_ms,
        )?;
        for name in expired {
            tracing::info!(topic = %name, "deleting unused topic");
            if let Err(err) = self.delete_topic(&name, self.config.nouse_delete_data, now_ms) {
                tracing::warn!(topic = %name, %err, "failed to delete unused topic");
            }
        }
        Ok(())
    }

    fn sys_metrics(&self) -> Result<ResponseBody> {
        self.ensure_master()?;
        Ok(ResponseBody::Metrics(SysMetrics {
            topics: self.state.topics.collect_metrics(),
            master_version: self.master.version(),
            alive_brokers: self.state.workers.filter_workers(true).len(),
            non_alive_brokers: self.state.workers.filter_workers(false).len(),
            reshard_tasks: self.reshard.lock().len(),
            clean_tasks: self.clean_manager().map(|m| m.tasks().len()).unwrap_or(0),
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::admin::lifecycle::LocalDataStore;
    use crate::admin::rpc::{TopicPatch, TopicSpec};
    use crate::admin::state::partition::{PartitionId, PartitionStatus};
    use crate::admin::state::topic::TopicKind;
    use crate::admin::state::worker::PartitionReport;
    use crate::admin::test::{config, elect, new_controller};
    use crate::error::ErrorCode;
    use crate::registry::MemoryRegistry;

    #[test]
    fn non_master_rejects_commands() {
        let (_, _, ctrl) = new_controller();
        let res = ctrl.handle_request(AdminRequest::CreateTopic(TopicSpec::new("t1", 1)), 0);
        assert_eq!(ErrorCode::NotLeader, res.code());
    }

    #[test]
    fn first_tick_elects_and_publishes() -> Result<()> {
        let (registry, _, ctrl) = new_controller();
        let report = ctrl.control_tick(1_000)?;
        assert!(report.is_master);
        assert!(report.took_over);
        let leader = master::read_leader(registry.as_ref())?.unwrap();
        assert_eq!(ctrl.address(), leader.address);
        assert_eq!(1, leader.master_version);
        assert_eq!(1, leader.admins.len());
        Ok(())
    }

    #[test]
    #[tracing_test::traced_test]
    fn standby_waits_for_lease() -> Result<()> {
        let registry = Arc::new(MemoryRegistry::new());
        let store = Arc::new(LocalDataStore);
        let mut a_config = config();
        a_config.advertised_address = Some("a:1".to_string());
        let mut b_config = config();
        b_config.advertised_address = Some("b:1".to_string());
        let a = SysController::new(a_config, registry.clone(), store.clone())?;
        let b = SysController::new(b_config, registry, store)?;

        a.control_tick(1_000)?;
        assert!(a.is_master());
        assert!(!b.control_tick(2_000)?.is_master);

        // a goes quiet; b first catches up with the version, then wins
        assert!(!b.control_tick(20_000)?.is_master);
        assert!(b.control_tick(20_100)?.took_over);
        assert!(!a.control_tick(20_500)?.is_master);
        assert!(a.state().topics.is_empty());
        assert!(logs_contain("lost mastership"));
        Ok(())
    }

    #[test]
    fn takeover_restores_topics_and_hints() -> Result<()> {
        let (registry, store, ctrl) = new_controller();
        elect(&ctrl);
        ctrl.create_topic(TopicSpec::new("t1", 2), 1_000)?;
        ctrl.state().workers.update_worker(Heartbeat::broker("b1", "h:1", "default"), 1_000);
        ctrl.control_tick(1_500)?;
        let before = ctrl.state().topics.find("t1").unwrap();
        assert!(before.partitions.iter().all(|p| p.status == PartitionStatus::Starting));

        let mut other_config = config();
        other_config.advertised_address = Some("other:1".to_string());
        let other = SysController::new(other_config, registry, store)?;
        other.control_tick(60_000)?;
        assert!(other.control_tick(60_100)?.took_over);
        let after = other.state().topics.find("t1").unwrap();
        assert_eq!(before.partitions, after.partitions);
        assert_eq!(before.meta.id, after.meta.id);
        Ok(())
    }

    #[test]
    fn takeover_drops_mismatched_partition_info() -> Result<()> {
        let registry = Arc::new(MemoryRegistry::new());
        let metas = BTreeMap::from([("t1".to_string(), TopicMeta::new("t1", 3))]);
        registry::put(registry.as_ref(), paths::TOPIC_META, &metas)?;
        let partitions = BTreeMap::from([(
            "t1".to_string(),
            vec![PartitionInfo::waiting("t1", 0)],
        )]);
        registry::put(registry.as_ref(), paths::PARTITION_INFO, &partitions)?;

        let ctrl = SysController::new(config(), registry, Arc::new(LocalDataStore))?;
        ctrl.control_tick(1_000)?;
        assert_eq!(3, ctrl.state().topics.find("t1").unwrap().partitions.len());
        Ok(())
    }

    #[test]
    #[tracing_test::traced_test]
    fn dead_broker_partitions_move_within_one_tick() -> Result<()> {
        let (_, _, ctrl) = new_controller();
        elect(&ctrl);
        ctrl.create_topic(TopicSpec::new("t1", 4), 1_000)?;
        ctrl.state().workers.update_worker(Heartbeat::broker("b1", "h:1", "default"), 1_000);
        ctrl.control_tick(1_100)?;

        // b1 takes everything it was given
        let mut hb = Heartbeat::broker("b1", "h:1", "default");
        for p in ctrl.state().topics.find("t1").unwrap().partitions {
            hb = hb.running(p.id.clone(), p.version);
        }
        ctrl.state().workers.update_worker(hb, 1_200);
        ctrl.control_tick(1_300)?;
        assert!(ctrl
            .state()
            .topics
            .find("t1")
            .unwrap()
            .partitions
            .iter()
            .all(|p| p.status == PartitionStatus::Running));

        // b2 joins, b1 goes silent past the dead timeout
        let dead_at = 1_200 + ctrl.config().worker_dead_timeout_ms;
        ctrl.state().workers.update_worker(Heartbeat::broker("b2", "h:2", "default"), dead_at);
        ctrl.control_tick(dead_at)?;
        for p in ctrl.state().topics.find("t1").unwrap().partitions {
            assert_eq!("b2", p.target.unwrap().role);
            assert_eq!(PartitionStatus::Starting, p.status);
        }
        assert!(logs_contain("worker declared dead"));
        match ctrl.sys_metrics()? {
            ResponseBody::Metrics(metrics) => {
                assert_eq!(1, metrics.alive_brokers);
                assert_eq!(1, metrics.non_alive_brokers);
            }
            other => panic!("unexpected body {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn reshard_links_new_generation() -> Result<()> {
        let (_, _, ctrl) = new_controller();
        elect(&ctrl);
        let spec = TopicSpec {
            kind: TopicKind::Logic,
            ..TopicSpec::new("l", 2)
        };
        ctrl.create_topic(spec, 1_000)?;
        let first = ctrl.state().topics.find("l").unwrap().meta.physic_topics[0].clone();

        let mut patch = TopicPatch::new("l");
        patch.partition_count = Some(4);
        ctrl.modify_topic(patch, 2_000)?;
        ctrl.control_tick(3_000)?;
        assert!(ctrl.state().topics.find(&first).unwrap().meta.sealed);

        // brokers echo the seal for both partitions
        let mut hb = Heartbeat::broker("b1", "h:1", "default");
        for idx in 0..2 {
            hb.partitions.push(PartitionReport {
                id: PartitionId::new(&first, idx),
                version: Default::default(),
                running: false,
                sealed: true,
            });
        }
        ctrl.state().workers.update_worker(hb, 3_500);
        ctrl.control_tick(4_000)?;

        let parent = ctrl.state().topics.find("l").unwrap();
        assert_eq!(4, parent.meta.partition_count);
        assert_eq!(2, parent.meta.physic_topics.len());
        let next = ctrl.state().topics.find(&parent.meta.physic_topics[1]).unwrap();
        assert_eq!(4, next.partitions.len());
        assert_eq!(TopicKind::Physic, next.meta.kind);
        Ok(())
    }
}
