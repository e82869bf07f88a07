//! Requests and responses exchanged with brokers and admin clients.

use std::collections::HashMap;

use crate::admin::master::LeaderInfo;
use crate::admin::state::partition::{InlineVersion, PartitionId, PartitionInfo};
use crate::admin::state::topic::{TopicKind, TopicMeta};
use crate::admin::state::worker::{BrokerVersion, Heartbeat, WorkerAddr, WorkerInfo, WorkerStatus};
use crate::admin::topic_table::{TopicInfo, TopicMetrics};
use crate::error::{ErrorCode, SluiceError};

/// Attributes of a topic to create.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TopicSpec {
    pub name: String,
    pub kind: TopicKind,
    pub partition_count: u32,
    pub partition_limit: u32,
    pub resource: u32,
    pub group_name: String,
    pub storage_root: String,
    pub extend_storage_roots: Vec<String>,
    pub owners: Vec<String>,
    pub need_schedule: bool,
    pub enable_merge: bool,
    pub expired_time_secs: i64,
}

impl Default for TopicSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: TopicKind::Normal,
            partition_count: 1,
            partition_limit: 0,
            resource: 1,
            group_name: "default".to_string(),
            storage_root: String::new(),
            extend_storage_roots: vec![],
            owners: vec![],
            need_schedule: true,
            enable_merge: false,
            expired_time_secs: -1,
        }
    }
}

impl TopicSpec {
    pub fn new(name: &str, partition_count: u32) -> Self {
        Self {
            name: name.to_string(),
            partition_count,
            ..Default::default()
        }
    }
}

/// Fields a modify request may change; `None` leaves a field alone.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct TopicPatch {
    pub name: String,
    pub partition_count: Option<u32>,
    pub partition_limit: Option<u32>,
    pub resource: Option<u32>,
    pub group_name: Option<String>,
    pub storage_root: Option<String>,
    pub extend_storage_roots: Option<Vec<String>>,
    pub sealed: Option<bool>,
    pub owners: Option<Vec<String>>,
    pub need_schedule: Option<bool>,
    pub enable_merge: Option<bool>,
    pub expired_time_secs: Option<i64>,
}

impl TopicPatch {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum AdminRequest {
    CreateTopic(TopicSpec),
    CreateTopicBatch {
        topics: Vec<TopicSpec>,
        ignore_exist: bool,
    },
    DeleteTopic {
        name: String,
        delete_data: bool,
    },
    DeleteTopicBatch {
        names: Vec<String>,
        delete_data: bool,
        ignore_not_exist: bool,
    },
    ModifyTopic(TopicPatch),
    GetTopicInfo {
        name: String,
    },
    GetAllTopicInfo,
    RegisterSchema {
        topic: String,
        schema: String,
    },
    GetSchema {
        topic: String,
        version: Option<i32>,
    },
    /// Resource ratio in percent by broker role; 0 drains, 100 restores.
    TransferPartition {
        ratios: HashMap<String, u32>,
    },
    Heartbeat(Heartbeat),
    GetWorkerStatus,
    GetLeaderInfo,
    GetSysMetrics,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn ok() -> Self {
        Self {
            code: ErrorCode::None,
            message: String::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == ErrorCode::None
    }
}

impl From<&SluiceError> for ErrorInfo {
    fn from(err: &SluiceError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TopicView {
    pub meta: TopicMeta,
    pub partitions: Vec<PartitionInfo>,
}

impl From<TopicInfo> for TopicView {
    fn from(info: TopicInfo) -> Self {
        Self {
            meta: (*info.meta).clone(),
            partitions: info.partitions,
        }
    }
}

/// A partition a broker is told to serve.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub id: PartitionId,
    pub version: InlineVersion,
    /// Stop taking writes and echo the seal back.
    pub sealed: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WorkerSummary {
    pub addr: WorkerAddr,
    pub group: String,
    pub status: WorkerStatus,
    pub last_heartbeat_ms: i64,
}

impl From<WorkerInfo> for WorkerSummary {
    fn from(info: WorkerInfo) -> Self {
        Self {
            addr: info.addr,
            group: info.group,
            status: info.status,
            last_heartbeat_ms: info.last_heartbeat_ms,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStatusView {
    pub brokers: Vec<WorkerSummary>,
    pub admins: Vec<WorkerSummary>,
    pub error_brokers: Vec<String>,
    pub resource_ratios: HashMap<String, u32>,
    pub versions: HashMap<String, BrokerVersion>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SysMetrics {
    pub topics: TopicMetrics,
    pub master_version: u64,
    pub alive_brokers: usize,
    pub non_alive_brokers: usize,
    pub reshard_tasks: usize,
    pub clean_tasks: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    Empty,
    Topic(TopicView),
    Topics(Vec<TopicView>),
    Schema { version: i32, schema: String },
    SchemaVersion(i32),
    Assignments(Vec<Assignment>),
    Workers(WorkerStatusView),
    Leader(Option<LeaderInfo>),
    Metrics(SysMetrics),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AdminResponse {
    pub error: ErrorInfo,
    pub body: ResponseBody,
}

impl AdminResponse {
    pub fn ok(body: ResponseBody) -> Self {
        Self {
            error: ErrorInfo::ok(),
            body,
        }
    }

    pub fn error(err: &SluiceError) -> Self {
        Self {
            error: err.into(),
            body: ResponseBody::Empty,
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.error.code
    }
}

impl From<crate::error::Result<ResponseBody>> for AdminResponse {
    fn from(result: crate::error::Result<ResponseBody>) -> Self {
        match result {
            Ok(body) => AdminResponse::ok(body),
            Err(err) => AdminResponse::error(&err),
        }
    }
}
