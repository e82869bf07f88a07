//! Client side of the hierarchical key-value store that holds every piece of
//! controller state that must survive a failover.
//!
//! Paths are `/`-separated. Removing a path removes its whole subtree, and
//! listing a path returns the names of its direct children only.

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, SluiceError};

pub mod config;
pub mod memory;
pub mod store;

pub use self::memory::MemoryRegistry;
pub use self::store::SledRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    Swapped,
    /// The stored value did not match the expected one.
    Conflict { current: Option<Vec<u8>> },
}

pub trait Registry: Send + Sync + Debug {
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>>;

    fn write(&self, path: &str, value: &[u8]) -> Result<()>;

    fn create_path(&self, path: &str) -> Result<()>;

    fn compare_and_swap(&self, path: &str, old: Option<&[u8]>, new: &[u8]) -> Result<CasOutcome>;

    fn remove(&self, path: &str) -> Result<()>;

    fn list(&self, path: &str) -> Result<Vec<String>>;
}

pub mod paths {
    pub const TOPIC_META: &str = "topic_meta";
    pub const PARTITION_INFO: &str = "partition_info";
    pub const CHANGE_PARTITION_TASKS: &str = "change_partition_tasks";
    pub const CLEAN_AT_DELETE_TASKS: &str = "clean_at_delete_tasks";
    pub const NOUSE_TOPICS: &str = "nouse_topics";
    pub const SELF_MASTER_VERSION: &str = "self_master_version";
    pub const LEADER_INFO: &str = "admin/leader_info";
    pub const LEADER_INFO_JSON: &str = "admin/leader_info.json";
    pub const ADMIN_REPLICAS: &str = "admin/replicas";
    pub const TOPICS: &str = "topics";

    pub fn topic_data(topic: &str) -> String {
        format!("{}/{}", TOPICS, topic)
    }

    pub fn topic_schema(topic: &str) -> String {
        format!("{}/{}/schema", TOPICS, topic)
    }

    pub fn nouse_snapshot(timestamp_secs: i64) -> String {
        format!("{}/{}", NOUSE_TOPICS, timestamp_secs)
    }

    pub fn admin_replica(address: &str) -> String {
        format!("{}/{}", ADMIN_REPLICAS, address)
    }
}

/// Reads and decodes a bincode value, `None` when the path does not exist.
pub fn get<T: DeserializeOwned>(registry: &dyn Registry, path: &str) -> Result<Option<T>> {
    registry
        .read(path)?
        .filter(|bytes| !bytes.is_empty())
        .map(|bytes| bincode::deserialize(&bytes).map_err(SluiceError::from))
        .transpose()
}

pub fn put<T: Serialize>(registry: &dyn Registry, path: &str, value: &T) -> Result<()> {
    registry.write(path, &bincode::serialize(value)?)
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn typed_round_trip() -> Result<()> {
        let registry = MemoryRegistry::new();
        let mut topics = HashMap::new();
        topics.insert("t1".to_string(), 6u32);
        put(&registry, paths::TOPIC_META, &topics)?;

        let read: Option<HashMap<String, u32>> = get(&registry, paths::TOPIC_META)?;
        assert_eq!(Some(topics), read);

        let missing: Option<HashMap<String, u32>> = get(&registry, paths::PARTITION_INFO)?;
        assert!(missing.is_none());
        Ok(())
    }

    #[test]
    fn normalized_paths() {
        assert_eq!("a/b", normalize("/a/b/"));
        assert_eq!("topics/t1/schema", paths::topic_schema("t1"));
        assert_eq!("nouse_topics/1700000000", paths::nouse_snapshot(1_700_000_000));
    }
}
