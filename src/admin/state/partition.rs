use std::fmt::{Display, Formatter};

use crate::admin::state::worker::WorkerAddr;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId {
    pub topic: String,
    pub idx: u32,
}

impl PartitionId {
    pub fn new(topic: &str, idx: u32) -> Self {
        Self {
            topic: topic.to_string(),
            idx,
        }
    }

    /// Key hashed onto the broker ring.
    pub fn hash_key(&self) -> String {
        format!("{}:{}", self.topic, self.idx)
    }
}

impl Display for PartitionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.topic, self.idx)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, derive_more::Display)]
pub enum PartitionStatus {
    Waiting,
    Starting,
    Running,
    Stopping,
}

impl PartitionStatus {
    pub fn can_transition(&self, to: PartitionStatus) -> bool {
        use PartitionStatus::*;
        matches!(
            (self, to),
            (Waiting, Starting)
                | (Starting, Running)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Stopping, Waiting)
        )
    }
}

/// (master version, part version). A broker holding an older version than the
/// one assigned is serving a stale assignment.
#[derive(
    Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct InlineVersion {
    pub master_version: u64,
    pub part_version: u64,
}

impl InlineVersion {
    pub fn new(master_version: u64, part_version: u64) -> Self {
        Self {
            master_version,
            part_version,
        }
    }

    pub fn next(&self, master_version: u64) -> Self {
        Self {
            master_version: master_version.max(self.master_version),
            part_version: self.part_version + 1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionInfo {
    pub id: PartitionId,
    pub target: Option<WorkerAddr>,
    pub current: Option<WorkerAddr>,
    /// Target of the previous decision, kept across `prepare_decision`.
    pub last_target: Option<WorkerAddr>,
    pub status: PartitionStatus,
    pub version: InlineVersion,
}

impl PartitionInfo {
    pub fn waiting(topic: &str, idx: u32) -> Self {
        Self {
            id: PartitionId::new(topic, idx),
            target: None,
            current: None,
            last_target: None,
            status: PartitionStatus::Waiting,
            version: InlineVersion::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PartitionStatus::*;

    #[test]
    fn transitions() {
        assert!(Waiting.can_transition(Starting));
        assert!(Starting.can_transition(Running));
        assert!(Running.can_transition(Stopping));
        assert!(Stopping.can_transition(Waiting));
        assert!(!Waiting.can_transition(Running));
        assert!(!Running.can_transition(Starting));
        assert!(!Stopping.can_transition(Running));
    }

    #[test]
    fn versions_order_by_master_first() {
        let old = InlineVersion::new(3, 9);
        let new = old.next(4);
        assert_eq!(InlineVersion::new(4, 10), new);
        assert!(new > old);
        assert!(InlineVersion::new(4, 0) > InlineVersion::new(3, 100));
    }
}
