//! Finds topics nobody reads or writes and deletes them after a grace cycle.
//!
//! Every pass writes the set of currently unused topics as a new snapshot
//! under `nouse_topics/<unix secs>`. A topic is only deleted when it was
//! already in the previous snapshot and is still unused now, so it has to stay
//! idle for two whole cycles. Loaded topics are never reported.

use std::any::Any;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::admin::config::AdminConfig;
use crate::admin::module::AdminModule;
use crate::admin::state::topic::{TopicKind, TopicMeta};
use crate::error::Result;
use crate::registry::{self, paths, Registry};

#[derive(Debug)]
pub struct NoUseTopicModule {
    registry: Arc<dyn Registry>,
    expire_ms: i64,
    history_limit: usize,
    loaded: AtomicBool,
}

impl NoUseTopicModule {
    pub fn new(registry: Arc<dyn Registry>, config: &AdminConfig) -> Self {
        Self {
            registry,
            expire_ms: config.nouse_expire_ms,
            history_limit: config.nouse_history_limit,
            loaded: AtomicBool::new(false),
        }
    }

    /// Snapshot timestamps in seconds, oldest first.
    fn history(&self) -> Result<Vec<i64>> {
        let mut history: Vec<i64> = self
            .registry
            .list(paths::NOUSE_TOPICS)?
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        history.sort_unstable();
        Ok(history)
    }

    /// Topics idle for longer than the expiry. Physic generations belong to
    /// their logic parent and are never reported on their own. A logic topic
    /// is protected while any of its generations is loaded.
    fn unused(
        &self,
        metas: &HashMap<String, TopicMeta>,
        access: &HashMap<String, (i64, i64)>,
        protected: &HashSet<String>,
        now_ms: i64,
    ) -> BTreeSet<String> {
        metas
            .values()
            .filter(|meta| meta.kind != TopicKind::Physic)
            .filter(|meta| {
                !protected.contains(&meta.name)
                    && !meta.physic_topics.iter().any(|physic| protected.contains(physic))
            })
            .filter(|meta| {
                let own = access.get(&meta.name).copied().unwrap_or((0, 0));
                let generations = meta
                    .physic_topics
                    .iter()
                    .filter_map(|physic| access.get(physic).copied());
                let last_used = std::iter::once(own)
                    .chain(generations)
                    .map(|(read, write)| read.max(write))
                    .fold(meta.create_time_ms, i64::max);
                now_ms - last_used > self.expire_ms
            })
            .map(|meta| meta.name.clone())
            .collect()
    }

    /// Runs one pass and returns the topics to delete now.
    pub fn tick(
        &self,
        metas: &HashMap<String, TopicMeta>,
        access: &HashMap<String, (i64, i64)>,
        protected: &HashSet<String>,
        now_ms: i64,
    ) -> Result<Vec<String>> {
        if !self.is_loaded() {
            return Ok(vec![]);
        }
        let unused = self.unused(metas, access, protected, now_ms);
        let history = self.history()?;
        let previous: BTreeSet<String> = match history.last() {
            Some(secs) => registry::get(self.registry.as_ref(), &paths::nouse_snapshot(*secs))?
                .unwrap_or_default(),
            None => BTreeSet::new(),
        };

        let expired: Vec<String> = previous.intersection(&unused).cloned().collect();

        let secs = now_ms / 1_000;
        registry::put(self.registry.as_ref(), &paths::nouse_snapshot(secs), &unused)?;
        tracing::info!(unused = unused.len(), expired = expired.len(), "recorded unused topics");

        let mut history = history;
        if !history.contains(&secs) {
            history.push(secs);
        }
        if history.len() > self.history_limit {
            for old in &history[..history.len() - self.history_limit] {
                if let Err(err) = self.registry.remove(&paths::nouse_snapshot(*old)) {
                    tracing::warn!(snapshot = old, %err, "failed to trim unused-topic history");
                }
            }
        }
        Ok(expired)
    }
}

impl AdminModule for NoUseTopicModule {
    fn name(&self) -> &'static str {
        "nouse_topic"
    }

    fn init(&self) -> Result<()> {
        self.registry.create_path(paths::NOUSE_TOPICS)
    }

    fn load(&self) -> Result<()> {
        // fails early when the history is unreadable
        let history = self.history()?;
        tracing::debug!(snapshots = history.len(), "loaded unused-topic history");
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn unload(&self) {
        self.loaded.store(false, Ordering::SeqCst);
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
