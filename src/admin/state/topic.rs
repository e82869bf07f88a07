use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TopicKind {
    #[default]
    Normal,
    /// Stable external name; owns no partitions, only a list of physic generations.
    Logic,
    /// One generation behind a logic topic.
    Physic,
    /// Logic topic whose first generation is its own partitions.
    LogicPhysic,
}

impl TopicKind {
    pub fn has_own_partitions(&self) -> bool {
        !matches!(self, TopicKind::Logic)
    }

    pub fn is_logic(&self) -> bool {
        matches!(self, TopicKind::Logic | TopicKind::LogicPhysic)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TopicMeta {
    /// Incarnation id; a topic deleted and created again gets a new one.
    pub id: Uuid,
    pub name: String,
    pub kind: TopicKind,
    pub partition_count: u32,
    /// Most partitions of this topic a single broker may serve. 0 = unlimited.
    pub partition_limit: u32,
    /// Relative weight of one partition when filling broker capacity.
    pub resource: u32,
    pub group_name: String,
    pub storage_root: String,
    pub extend_storage_roots: Vec<String>,
    pub sealed: bool,
    /// Ordered physic generations of a logic topic, oldest first.
    pub physic_topics: Vec<String>,
    /// Registered schema versions, oldest first.
    pub schema_versions: Vec<i32>,
    pub owners: Vec<String>,
    pub need_schedule: bool,
    pub enable_merge: bool,
    pub create_time_ms: i64,
    pub modify_time_ms: i64,
    /// Messages older than this many seconds are expired; -1 keeps forever.
    pub expired_time_secs: i64,
}

impl Default for TopicMeta {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            kind: TopicKind::Normal,
            partition_count: 1,
            partition_limit: 0,
            resource: 1,
            group_name: "default".to_string(),
            storage_root: String::new(),
            extend_storage_roots: vec![],
            sealed: false,
            physic_topics: vec![],
            schema_versions: vec![],
            owners: vec![],
            need_schedule: true,
            enable_merge: false,
            create_time_ms: 0,
            modify_time_ms: 0,
            expired_time_secs: -1,
        }
    }
}

impl TopicMeta {
    pub fn new(name: &str, partition_count: u32) -> Self {
        Self {
            name: name.to_string(),
            partition_count,
            ..Default::default()
        }
    }

    /// Directories holding this topic's messages.
    pub fn data_paths(&self) -> Vec<String> {
        std::iter::once(&self.storage_root)
            .chain(self.extend_storage_roots.iter())
            .filter(|root| !root.is_empty())
            .map(|root| format!("{}/{}", root.trim_end_matches('/'), self.name))
            .collect()
    }

    /// The generation that currently takes writes.
    pub fn current_generation(&self) -> &str {
        match self.physic_topics.last() {
            Some(physic) if self.kind.is_logic() => physic,
            _ => &self.name,
        }
    }

    /// Equality that ignores the modification stamp.
    pub fn same_content(&self, other: &TopicMeta) -> bool {
        let mut other = other.clone();
        other.modify_time_ms = self.modify_time_ms;
        *self == other
    }
}

pub fn physic_topic_name(logic: &str, timestamp_ms: i64, partition_count: u32) -> String {
    format!("{}-{}-{}", logic, timestamp_ms, partition_count)
}
