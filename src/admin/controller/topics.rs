use std::collections::{BTreeMap, HashSet};

use uuid::Uuid;

use crate::admin::controller::SysController;
use crate::admin::lifecycle::CleanTask;
use crate::admin::rpc::{ResponseBody, TopicPatch, TopicSpec, TopicView};
use crate::admin::state::topic::{physic_topic_name, TopicKind, TopicMeta};
use crate::error::{Result, SluiceError};

const MAX_TOPIC_NAME_LEN: usize = 128;
const DEFAULT_GROUP: &str = "default";

fn invalid<T>(msg: impl Into<String>) -> Result<T> {
    Err(SluiceError::InvalidParameter(msg.into()))
}

impl SysController {
    fn check_partition_count(&self, count: u32) -> Result<()> {
        if count == 0 || count > self.config.max_partition_count {
            return invalid(format!(
                "partition count {} outside 1..={}",
                count, self.config.max_partition_count
            ));
        }
        Ok(())
    }

    /// Validates a create request and returns the metas it adds: the topic
    /// itself, plus the first generation of a logic topic.
    fn build_metas(&self, mut spec: TopicSpec, now_ms: i64) -> Result<Vec<TopicMeta>> {
        let name = spec.name.as_str();
        if name.is_empty() || name.len() > MAX_TOPIC_NAME_LEN {
            return invalid(format!("topic name length must be 1..={}", MAX_TOPIC_NAME_LEN));
        }
        if name.contains('/') || name.chars().any(char::is_whitespace) {
            return invalid(format!("topic name [{}] has illegal characters", name));
        }
        if spec.kind == TopicKind::Physic {
            return invalid("physic topics are only created by resharding");
        }
        self.check_partition_count(spec.partition_count)?;
        if spec.resource == 0 {
            return invalid("resource must be at least 1");
        }
        if spec.group_name.is_empty() {
            spec.group_name = DEFAULT_GROUP.to_string();
        }

        let meta = TopicMeta {
            name: spec.name,
            kind: spec.kind,
            partition_count: spec.partition_count,
            partition_limit: spec.partition_limit,
            resource: spec.resource,
            group_name: spec.group_name,
            storage_root: spec.storage_root,
            extend_storage_roots: spec.extend_storage_roots,
            owners: spec.owners,
            need_schedule: spec.need_schedule,
            enable_merge: spec.enable_merge,
            expired_time_secs: spec.expired_time_secs,
            create_time_ms: now_ms,
            modify_time_ms: now_ms,
            ..TopicMeta::default()
        };
        if meta.kind != TopicKind::Logic {
            return Ok(vec![meta]);
        }

        let physic = TopicMeta {
            id: Uuid::new_v4(),
            name: physic_topic_name(&meta.name, now_ms, meta.partition_count),
            kind: TopicKind::Physic,
            ..meta.clone()
        };
        let mut parent = meta;
        parent.physic_topics = vec![physic.name.clone()];
        Ok(vec![parent, physic])
    }

    fn check_creatable(&self, name: &str) -> Result<()> {
        if self.state.topics.contains(name) {
            return Err(SluiceError::TopicExists(name.to_string()));
        }
        if self.clean_manager().map_or(false, |m| m.is_cleaning(name)) {
            return Err(SluiceError::TopicInCleaning(name.to_string()));
        }
        Ok(())
    }

    pub(super) fn persisted_metas(&self) -> BTreeMap<String, TopicMeta> {
        self.state.topics.metas().into_iter().collect()
    }

    fn commit_created(&self, created: Vec<TopicMeta>) -> Result<()> {
        for meta in created {
            tracing::info!(topic = %meta.name, kind = ?meta.kind, partitions = meta.partition_count, "created topic");
            self.state.topics.add(meta)?;
        }
        Ok(())
    }

    pub fn create_topic(&self, spec: TopicSpec, now_ms: i64) -> Result<ResponseBody> {
        self.ensure_master()?;
        let _write = self.write_lock.lock();
        let name = spec.name.clone();
        let created = self.build_metas(spec, now_ms)?;
        for meta in &created {
            self.check_creatable(&meta.name)?;
        }

        let mut metas = self.persisted_metas();
        metas.extend(created.iter().map(|m| (m.name.clone(), m.clone())));
        self.persist_metas(&metas)?;
        self.commit_created(created)?;
        self.topic_view(&name)
    }

    /// Creates all topics or none. With `ignore_exist`, topics that already
    /// exist are skipped instead of failing the batch.
    pub fn create_topic_batch(
        &self,
        specs: Vec<TopicSpec>,
        ignore_exist: bool,
        now_ms: i64,
    ) -> Result<ResponseBody> {
        self.ensure_master()?;
        let _write = self.write_lock.lock();
        let mut metas = self.persisted_metas();
        let mut created = vec![];
        let mut names = vec![];
        for spec in specs {
            if ignore_exist && self.state.topics.contains(&spec.name) {
                tracing::debug!(topic = %spec.name, "skipping existing topic");
                continue;
            }
            names.push(spec.name.clone());
            for meta in self.build_metas(spec, now_ms)? {
                self.check_creatable(&meta.name)?;
                if metas.contains_key(&meta.name) {
                    return Err(SluiceError::TopicExists(meta.name));
                }
                metas.insert(meta.name.clone(), meta.clone());
                created.push(meta);
            }
        }
        if created.is_empty() {
            return Ok(ResponseBody::Topics(vec![]));
        }

        self.persist_metas(&metas)?;
        self.commit_created(created)?;
        let views = names
            .iter()
            .filter_map(|name| self.state.topics.find(name))
            .map(TopicView::from)
            .collect();
        Ok(ResponseBody::Topics(views))
    }

    /// The topic and, for logic topics, every generation it owns.
    fn deletion_set(&self, name: &str) -> Result<Vec<TopicMeta>> {
        let info = self
            .state
            .topics
            .find(name)
            .ok_or_else(|| SluiceError::TopicNotFound(name.to_string()))?;
        if info.meta.kind == TopicKind::Physic {
            let owned = self
                .state
                .topics
                .metas()
                .values()
                .any(|m| m.physic_topics.iter().any(|p| p == name));
            if owned {
                return invalid(format!("topic [{}] is a generation of a logic topic", name));
            }
        }
        let mut victims = vec![(*info.meta).clone()];
        for physic in &info.meta.physic_topics {
            if let Some(child) = self.state.topics.find(physic) {
                victims.push((*child.meta).clone());
            }
        }
        Ok(victims)
    }

    /// Removes already-validated topics with a single registry write, then
    /// queues reclaim and commits. A failed write changes nothing.
    fn delete_locked(&self, victims: Vec<TopicMeta>, delete_data: bool, now_ms: i64) -> Result<()> {
        let mut metas = self.persisted_metas();
        for victim in &victims {
            metas.remove(&victim.name);
        }
        self.persist_metas(&metas)?;

        let mut tasks = self.reshard.lock().clone();
        let dropped: Vec<&str> = victims
            .iter()
            .map(|victim| victim.name.as_str())
            .filter(|name| tasks.remove(name).is_some())
            .collect();
        if !dropped.is_empty() {
            if let Err(err) = tasks.persist(self.registry()) {
                tracing::warn!(topics = ?dropped, %err, "failed to persist reshard tasks");
            }
            *self.reshard.lock() = tasks;
        }

        for victim in victims {
            let clean = self
                .clean_manager()
                .map_or(false, |m| m.should_clean(&victim.name, delete_data));
            if let Some(manager) = self.clean_manager().filter(|_| clean) {
                let paths = victim.data_paths();
                if !paths.is_empty() {
                    if let Err(err) = manager.push(CleanTask::new(&victim.name, paths, now_ms)) {
                        tracing::warn!(topic = %victim.name, %err, "failed to queue data reclaim");
                    }
                }
            }
            self.state
                .topics
                .delete(&victim.name, delete_data || clean, self.registry());
            tracing::info!(topic = %victim.name, delete_data, "deleted topic");
        }
        Ok(())
    }

    pub fn delete_topic(&self, name: &str, delete_data: bool, now_ms: i64) -> Result<ResponseBody> {
        self.ensure_master()?;
        let _write = self.write_lock.lock();
        let victims = self.deletion_set(name)?;
        self.delete_locked(victims, delete_data, now_ms)?;
        Ok(ResponseBody::Empty)
    }

    /// Deletes all topics or none. With `ignore_not_exist`, unknown names are
    /// skipped instead of failing the batch. Repeated names count once.
    pub fn delete_topic_batch(
        &self,
        names: Vec<String>,
        delete_data: bool,
        ignore_not_exist: bool,
        now_ms: i64,
    ) -> Result<ResponseBody> {
        self.ensure_master()?;
        let _write = self.write_lock.lock();
        let mut seen = HashSet::new();
        let mut victims = vec![];
        for name in &names {
            if seen.contains(name) {
                continue;
            }
            match self.deletion_set(name) {
                Ok(set) => victims.extend(set.into_iter().filter(|meta| seen.insert(meta.name.clone()))),
                Err(SluiceError::TopicNotFound(_)) if ignore_not_exist => continue,
                Err(err) => return Err(err),
            }
        }
        if !victims.is_empty() {
            self.delete_locked(victims, delete_data, now_ms)?;
        }
        Ok(ResponseBody::Empty)
    }

    pub fn modify_topic(&self, patch: TopicPatch, now_ms: i64) -> Result<ResponseBody> {
        self.ensure_master()?;
        let _write = self.write_lock.lock();
        let info = self
            .state
            .topics
            .find(&patch.name)
            .ok_or_else(|| SluiceError::TopicNotFound(patch.name.clone()))?;
        let old = (*info.meta).clone();

        if old.sealed && !old.kind.is_logic() {
            let name = old.name.clone();
            if patch.partition_count.map_or(false, |c| c != old.partition_count) {
                return Err(SluiceError::SealedTopic(name, "partition count"));
            }
            if patch.storage_root.as_ref().map_or(false, |r| *r != old.storage_root) {
                return Err(SluiceError::SealedTopic(name, "storage root"));
            }
            if patch
                .extend_storage_roots
                .as_ref()
                .map_or(false, |r| *r != old.extend_storage_roots)
            {
                return Err(SluiceError::SealedTopic(name, "extend storage roots"));
            }
            if patch.sealed == Some(false) {
                return Err(SluiceError::SealedTopic(name, "sealed flag"));
            }
        }

        let mut meta = old.clone();
        let mut reshard_target = None;
        if let Some(count) = patch.partition_count.filter(|c| *c != old.partition_count) {
            self.check_partition_count(count)?;
            if old.kind.is_logic() {
                reshard_target = Some(count);
            } else {
                tracing::warn!(topic = %old.name, from = old.partition_count, to = count, "partition count of a plain topic cannot change, ignored");
            }
        }
        if let Some(resource) = patch.resource {
            if resource == 0 {
                return invalid("resource must be at least 1");
            }
            meta.resource = resource;
        }
        if let Some(group) = patch.group_name {
            meta.group_name = if group.is_empty() {
                DEFAULT_GROUP.to_string()
            } else {
                group
            };
        }
        if let Some(limit) = patch.partition_limit {
            meta.partition_limit = limit;
        }
        if let Some(root) = patch.storage_root {
            meta.storage_root = root;
        }
        if let Some(roots) = patch.extend_storage_roots {
            meta.extend_storage_roots = roots;
        }
        if let Some(sealed) = patch.sealed {
            meta.sealed = sealed;
        }
        if let Some(owners) = patch.owners {
            meta.owners = owners;
        }
        if let Some(need_schedule) = patch.need_schedule {
            meta.need_schedule = need_schedule;
        }
        if let Some(enable_merge) = patch.enable_merge {
            meta.enable_merge = enable_merge;
        }
        if let Some(expired) = patch.expired_time_secs {
            meta.expired_time_secs = expired;
        }

        let unchanged = meta.same_content(&old);
        if unchanged && reshard_target.is_none() {
            tracing::debug!(topic = %old.name, "modify is a no-op");
            return self.topic_view(&old.name);
        }

        let mut updated = vec![];
        if !unchanged {
            meta.modify_time_ms = now_ms;
            updated.push(meta.clone());
            if meta.kind.is_logic() {
                updated.extend(self.propagate_to_generations(&meta, now_ms));
            }
        }
        let next_tasks = reshard_target.map(|count| {
            let mut tasks = self.reshard.lock().clone();
            tasks.submit(&old.name, count, now_ms);
            tasks
        });

        // both records are written before either is committed
        let previous = self.persisted_metas();
        if !updated.is_empty() {
            let mut metas = previous.clone();
            metas.extend(updated.iter().map(|m| (m.name.clone(), m.clone())));
            self.persist_metas(&metas)?;
        }
        if let Some(tasks) = &next_tasks {
            if let Err(err) = tasks.persist(self.registry()) {
                if !updated.is_empty() {
                    if let Err(restore) = self.persist_metas(&previous) {
                        tracing::warn!(topic = %old.name, err = %restore, "failed to restore topic metas");
                    }
                }
                return Err(err);
            }
        }

        if !updated.is_empty() {
            for meta in updated {
                self.state.topics.update(meta)?;
            }
            tracing::info!(topic = %old.name, "modified topic");
        }
        if let Some(tasks) = next_tasks {
            *self.reshard.lock() = tasks;
            tracing::info!(topic = %old.name, from = old.partition_count, to = reshard_target, "queued partition count change");
        }
        self.topic_view(&old.name)
    }

    /// Scheduling attributes a logic topic hands down to its generations.
    fn propagate_to_generations(&self, parent: &TopicMeta, now_ms: i64) -> Vec<TopicMeta> {
        parent
            .physic_topics
            .iter()
            .filter_map(|name| self.state.topics.find(name))
            .filter_map(|child| {
                let mut meta = (*child.meta).clone();
                meta.resource = parent.resource;
                meta.group_name = parent.group_name.clone();
                meta.partition_limit = parent.partition_limit;
                meta.need_schedule = parent.need_schedule;
                meta.owners = parent.owners.clone();
                meta.expired_time_secs = parent.expired_time_secs;
                if meta.same_content(&child.meta) {
                    return None;
                }
                meta.modify_time_ms = now_ms;
                Some(meta)
            })
            .collect()
    }

    fn topic_view(&self, name: &str) -> Result<ResponseBody> {
        let info = self
            .state
            .topics
            .find(name)
            .ok_or_else(|| SluiceError::TopicNotFound(name.to_string()))?;
        Ok(ResponseBody::Topic(info.into()))
    }

    pub fn get_topic_info(&self, name: &str) -> Result<ResponseBody> {
        self.ensure_master()?;
        self.topic_view(name)
    }

    pub fn get_all_topic_info(&self) -> Result<ResponseBody> {
        self.ensure_master()?;
        let mut views: Vec<TopicView> = self
            .state
            .topics
            .snapshot()
            .into_iter()
            .map(TopicView::from)
            .collect();
        views.sort_by(|a, b| a.meta.name.cmp(&b.meta.name));
        Ok(ResponseBody::Topics(views))
    }
}
