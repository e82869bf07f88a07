use std::fmt::{Display, Formatter};

use crate::admin::state::partition::{InlineVersion, PartitionId};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerAddr {
    pub role: String,
    pub address: String,
}

impl WorkerAddr {
    pub fn new(role: &str, address: &str) -> Self {
        Self {
            role: role.to_string(),
            address: address.to_string(),
        }
    }
}

impl Display for WorkerAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.role, self.address)
    }
}

impl conhash::Node for WorkerAddr {
    fn name(&self) -> String {
        self.to_string()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RoleType {
    Broker,
    Admin,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, derive_more::Display)]
pub enum WorkerStatus {
    Alive,
    Unknown,
    Dead,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BrokerVersion {
    pub version: String,
    pub protocol_version: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionReport {
    pub id: PartitionId,
    pub version: InlineVersion,
    pub running: bool,
    /// The broker has stopped taking writes for this partition.
    pub sealed: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicAccess {
    pub topic: String,
    pub last_read_ms: i64,
    pub last_write_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Heartbeat {
    pub addr: WorkerAddr,
    pub role_type: RoleType,
    pub group: String,
    /// False when the worker announces it is going away.
    pub alive: bool,
    pub partitions: Vec<PartitionReport>,
    /// Topics with open client readers or writers.
    pub session_topics: Vec<String>,
    pub topic_access: Vec<TopicAccess>,
    pub commit_delay_ms: u64,
    pub last_check_ms: i64,
    pub version: Option<BrokerVersion>,
}

impl Heartbeat {
    pub fn broker(role: &str, address: &str, group: &str) -> Self {
        Self {
            addr: WorkerAddr::new(role, address),
            role_type: RoleType::Broker,
            group: group.to_string(),
            alive: true,
            partitions: vec![],
            session_topics: vec![],
            topic_access: vec![],
            commit_delay_ms: 0,
            last_check_ms: 0,
            version: None,
        }
    }

    pub fn admin(address: &str) -> Self {
        Self {
            role_type: RoleType::Admin,
            ..Self::broker(address, address, "")
        }
    }

    pub fn running(mut self, id: PartitionId, version: InlineVersion) -> Self {
        self.partitions.push(PartitionReport {
            id,
            version,
            running: true,
            sealed: false,
        });
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerInfo {
    pub addr: WorkerAddr,
    pub role_type: RoleType,
    pub group: String,
    pub status: WorkerStatus,
    pub last_heartbeat_ms: i64,
    /// When the worker was last seen turning unknown.
    pub unknown_since_ms: Option<i64>,
    pub heartbeat: Heartbeat,
}

impl WorkerInfo {
    pub fn is_alive(&self) -> bool {
        self.status == WorkerStatus::Alive
    }
}
