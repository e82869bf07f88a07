//! Reclaims the storage of deleted topics.
//!
//! Tasks are persisted before they are visible in memory and removed only
//! once every path reported `Ok` or `NotFound`. Failed paths stay queued and
//! are retried on the next pass, forever. A topic that some worker still has
//! loaded is never touched.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;

use crate::admin::config::AdminConfig;
use crate::admin::lifecycle::storage::{DataStore, RemoveStatus};
use crate::admin::module::AdminModule;
use crate::error::Result;
use crate::registry::{self, paths, Registry};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CleanTask {
    pub topic: String,
    pub paths: Vec<String>,
    pub delete_time_ms: i64,
    /// Passes that left some path behind.
    pub retries: u32,
}

impl CleanTask {
    pub fn new(topic: &str, paths: Vec<String>, delete_time_ms: i64) -> Self {
        Self {
            topic: topic.to_string(),
            paths,
            delete_time_ms,
            retries: 0,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanReport {
    /// Topics whose data is fully gone.
    pub finished: Vec<String>,
    /// Skipped because a worker still has the topic loaded.
    pub suspended: Vec<String>,
    /// Skipped because the task is younger than the safety interval.
    pub deferred: Vec<String>,
    /// Some path failed and was re-queued.
    pub failed: Vec<String>,
}

#[derive(Debug, Default)]
struct CleanQueue {
    tasks: Vec<CleanTask>,
    cleaning: HashSet<String>,
}

#[derive(Debug)]
pub struct CleanAtDeleteManager {
    registry: Arc<dyn Registry>,
    store: Arc<dyn DataStore>,
    patterns: Vec<Regex>,
    safety_interval_ms: i64,
    queue: Mutex<CleanQueue>,
    /// Held across persist-then-commit so concurrent writers cannot lose
    /// each other's tasks.
    write_lock: Mutex<()>,
    loaded: AtomicBool,
}

impl CleanAtDeleteManager {
    pub fn new(
        registry: Arc<dyn Registry>,
        store: Arc<dyn DataStore>,
        config: &AdminConfig,
    ) -> Result<Self> {
        let patterns = config
            .clean_at_delete_patterns
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self {
            registry,
            store,
            patterns,
            safety_interval_ms: config.clean_safety_interval_ms,
            queue: Mutex::new(CleanQueue::default()),
            write_lock: Mutex::new(()),
            loaded: AtomicBool::new(false),
        })
    }

    /// Whether deleting `topic` must reclaim its data.
    pub fn should_clean(&self, topic: &str, delete_data: bool) -> bool {
        delete_data || self.patterns.iter().any(|p| p.is_match(topic))
    }

    pub fn is_cleaning(&self, topic: &str) -> bool {
        self.queue.lock().cleaning.contains(topic)
    }

    pub fn tasks(&self) -> Vec<CleanTask> {
        self.queue.lock().tasks.clone()
    }

    /// Queues a task. A second task for the same topic is merged into the
    /// first one.
    pub fn push(&self, task: CleanTask) -> Result<()> {
        let _write = self.write_lock.lock();
        let mut tasks = self.tasks();
        match tasks.iter_mut().find(|t| t.topic == task.topic) {
            Some(existing) => {
                for path in task.paths {
                    if !existing.paths.contains(&path) {
                        existing.paths.push(path);
                    }
                }
                existing.delete_time_ms = existing.delete_time_ms.max(task.delete_time_ms);
            }
            None => tasks.push(task),
        }
        self.persist_and_commit(tasks)
    }

    fn persist_and_commit(&self, tasks: Vec<CleanTask>) -> Result<()> {
        registry::put(self.registry.as_ref(), paths::CLEAN_AT_DELETE_TASKS, &tasks)?;
        let mut queue = self.queue.lock();
        queue.cleaning = tasks.iter().map(|t| t.topic.clone()).collect();
        queue.tasks = tasks;
        Ok(())
    }

    /// Runs one reclaim pass. Path removal happens without any lock held.
    pub fn tick(&self, loaded_topics: &HashSet<String>, now_ms: i64) -> Result<CleanReport> {
        let mut report = CleanReport::default();
        if !self.is_loaded() {
            return Ok(report);
        }

        let mut outcomes: HashMap<(String, i64), Vec<String>> = HashMap::new();
        for task in self.tasks() {
            if loaded_topics.contains(&task.topic) {
                tracing::debug!(topic = %task.topic, "topic still loaded, reclaim suspended");
                report.suspended.push(task.topic);
                continue;
            }
            if now_ms - task.delete_time_ms < self.safety_interval_ms {
                report.deferred.push(task.topic);
                continue;
            }

            let mut failed = vec![];
            for path in &task.paths {
                let status = self.store.remove(path);
                match &status {
                    RemoveStatus::Ok => tracing::info!(topic = %task.topic, %path, "removed topic data"),
                    RemoveStatus::NotFound => {
                        tracing::debug!(topic = %task.topic, %path, "topic data already gone")
                    }
                    RemoveStatus::Failed(err) => {
                        tracing::warn!(topic = %task.topic, %path, %err, "failed to remove topic data")
                    }
                }
                if !status.is_done() {
                    failed.push(path.clone());
                }
            }
            if failed.is_empty() {
                report.finished.push(task.topic.clone());
            } else {
                report.failed.push(task.topic.clone());
            }
            outcomes.insert((task.topic, task.delete_time_ms), failed);
        }

        if outcomes.is_empty() {
            return Ok(report);
        }

        let _write = self.write_lock.lock();
        let tasks = self
            .tasks()
            .into_iter()
            .filter_map(|mut task| {
                match outcomes.get(&(task.topic.clone(), task.delete_time_ms)) {
                    Some(failed) if failed.is_empty() => None,
                    Some(failed) => {
                        task.paths.retain(|path| failed.contains(path));
                        task.retries += 1;
                        Some(task)
                    }
                    // merged or pushed during the pass
                    None => Some(task),
                }
            })
            .collect();
        self.persist_and_commit(tasks)?;
        Ok(report)
    }
}

impl AdminModule for CleanAtDeleteManager {
    fn name(&self) -> &'static str {
        "clean_at_delete"
    }

    fn init(&self) -> Result<()> {
        self.registry.create_path(paths::CLEAN_AT_DELETE_TASKS)
    }

    fn load(&self) -> Result<()> {
        let tasks: Vec<CleanTask> =
            registry::get(self.registry.as_ref(), paths::CLEAN_AT_DELETE_TASKS)?.unwrap_or_default();
        tracing::info!(tasks = tasks.len(), "loaded reclaim tasks");
        let mut queue = self.queue.lock();
        queue.cleaning = tasks.iter().map(|t| t.topic.clone()).collect();
        queue.tasks = tasks;
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn unload(&self) {
        self.loaded.store(false, Ordering::SeqCst);
        *self.queue.lock() = CleanQueue::default();
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
