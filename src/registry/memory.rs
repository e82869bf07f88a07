use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::{Result, SluiceError};
use crate::registry::{normalize, CasOutcome, Registry};

/// In-process registry. Writes can be made to fail on demand to exercise the
/// "backend unavailable" paths.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    nodes: Mutex<BTreeMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
    /// Writes left per path before it starts failing.
    write_budgets: Mutex<HashMap<String, usize>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Lets `allowed` more writes to `path` through, then fails every
    /// following one. Other paths are unaffected.
    pub fn fail_writes_after(&self, path: &str, allowed: usize) {
        self.write_budgets
            .lock()
            .insert(normalize(path).to_string(), allowed);
    }

    fn check_writable(&self, path: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SluiceError::registry(path, "injected write failure"));
        }
        if let Some(left) = self.write_budgets.lock().get_mut(normalize(path)) {
            if *left == 0 {
                return Err(SluiceError::registry(path, "injected write failure"));
            }
            *left -= 1;
        }
        Ok(())
    }
}

impl Registry for MemoryRegistry {
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.nodes.lock().get(normalize(path)).cloned())
    }

    fn write(&self, path: &str, value: &[u8]) -> Result<()> {
        self.check_writable(path)?;
        self.nodes
            .lock()
            .insert(normalize(path).to_string(), value.to_vec());
        Ok(())
    }

    fn create_path(&self, path: &str) -> Result<()> {
        self.check_writable(path)?;
        self.nodes
            .lock()
            .entry(normalize(path).to_string())
            .or_default();
        Ok(())
    }

    fn compare_and_swap(&self, path: &str, old: Option<&[u8]>, new: &[u8]) -> Result<CasOutcome> {
        self.check_writable(path)?;
        let mut nodes = self.nodes.lock();
        let key = normalize(path).to_string();
        let current = nodes.get(&key).cloned();
        if current.as_deref() != old {
            return Ok(CasOutcome::Conflict { current });
        }
        nodes.insert(key, new.to_vec());
        Ok(CasOutcome::Swapped)
    }

    fn remove(&self, path: &str) -> Result<()> {
        self.check_writable(path)?;
        let key = normalize(path);
        let prefix = format!("{}/", key);
        self.nodes
            .lock()
            .retain(|k, _| k != key && !k.starts_with(&prefix));
        Ok(())
    }

    fn list(&self, path: &str) -> Result<Vec<String>> {
        let key = normalize(path);
        let nodes = self.nodes.lock();
        let children: BTreeSet<String> = nodes
            .keys()
            .filter_map(|k| {
                let rest = k.strip_prefix(key)?.strip_prefix('/')?;
                rest.split('/').next().map(str::to_string)
            })
            .collect();
        Ok(children.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_children() -> Result<()> {
        let registry = MemoryRegistry::new();
        registry.write("nouse_topics/100", b"")?;
        registry.write("nouse_topics/200", b"")?;
        registry.write("topics/a/schema", b"")?;
        assert_eq!(vec!["100", "200"], registry.list("nouse_topics")?);
        assert_eq!(vec!["a"], registry.list("topics")?);
        Ok(())
    }

    #[test]
    fn cas_conflict_reports_current() -> Result<()> {
        let registry = MemoryRegistry::new();
        registry.write("v", b"5")?;
        assert_eq!(
            CasOutcome::Conflict {
                current: Some(b"5".to_vec())
            },
            registry.compare_and_swap("v", Some(b"4"), b"5")?
        );
        assert_eq!(CasOutcome::Swapped, registry.compare_and_swap("v", Some(b"5"), b"6")?);
        Ok(())
    }

    #[test]
    fn injected_failure() {
        let registry = MemoryRegistry::new();
        registry.fail_writes(true);
        assert!(registry.write("topic_meta", b"x").is_err());
        registry.fail_writes(false);
        assert!(registry.write("topic_meta", b"x").is_ok());
    }

    #[test]
    fn failure_after_budget() {
        let registry = MemoryRegistry::new();
        registry.fail_writes_after("/topic_meta", 1);
        assert!(registry.write("topic_meta", b"x").is_ok());
        assert!(registry.write("topic_meta", b"y").is_err());
        assert!(registry.write("worker_info", b"z").is_ok());
        assert_eq!(Some(b"x".to_vec()), registry.read("topic_meta").unwrap());
    }
}
