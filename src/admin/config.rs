use std::net::{IpAddr, Ipv4Addr};

use crate::error::{Result, SluiceError};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
/// Settings of one admin replica.
pub struct AdminConfig {
    /// The ip address to listen for requests on.
    pub ip: IpAddr,
    /// The port to listen for requests on.
    pub port: u16,
    /// Address other replicas and brokers know this replica by. Defaults to `ip:port`.
    pub advertised_address: Option<String>,
    /// Period of the control tick (scheduling, leadership, reshard).
    pub schedule_interval_ms: u64,
    pub clean_interval_ms: u64,
    pub nouse_interval_ms: u64,
    /// Silence after which a worker turns unknown.
    pub worker_unknown_timeout_ms: i64,
    /// Silence after which a worker is dead.
    pub worker_dead_timeout_ms: i64,
    /// An unknown worker loses its partitions after this long.
    pub force_schedule_timeout_ms: i64,
    /// A leader whose replica stamp is older than this may be replaced.
    pub leader_lease_ms: i64,
    /// Grace period after takeover before the first scheduling pass.
    pub schedule_delay_ms: i64,
    /// Resource units one broker holds at a resource ratio of 100.
    pub broker_partition_limit: u32,
    pub max_partition_count: u32,
    /// Brokers lagging storage commits by more than this are reported.
    pub commit_delay_threshold_ms: u64,
    /// Brokers whose last self-check is older than this are reported.
    pub broker_check_timeout_ms: i64,
    pub enable_clean_at_delete: bool,
    /// Topics matching any of these are always reclaimed on delete.
    pub clean_at_delete_patterns: Vec<String>,
    /// Reclaim tasks younger than this are left alone.
    pub clean_safety_interval_ms: i64,
    pub enable_nouse_topic: bool,
    /// Topics neither read nor written for this long are unused.
    pub nouse_expire_ms: i64,
    /// Unused-topic snapshots kept in the registry.
    pub nouse_history_limit: usize,
    /// Whether deleting an unused topic also reclaims its data.
    pub nouse_delete_data: bool,
    pub max_schema_versions: usize,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 7070,
            advertised_address: None,
            schedule_interval_ms: 1_000,
            clean_interval_ms: 10_000,
            nouse_interval_ms: 3_600_000,
            worker_unknown_timeout_ms: 5_000,
            worker_dead_timeout_ms: 60_000,
            force_schedule_timeout_ms: 20_000,
            leader_lease_ms: 10_000,
            schedule_delay_ms: 5_000,
            broker_partition_limit: 1_000,
            max_partition_count: 10_000,
            commit_delay_threshold_ms: 60_000,
            broker_check_timeout_ms: 120_000,
            enable_clean_at_delete: true,
            clean_at_delete_patterns: vec![],
            clean_safety_interval_ms: 60_000,
            enable_nouse_topic: false,
            nouse_expire_ms: 7 * 24 * 3_600_000,
            nouse_history_limit: 10,
            nouse_delete_data: false,
            max_schema_versions: 10,
        }
    }
}

impl AdminConfig {
    pub fn address(&self) -> String {
        self.advertised_address
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.ip, self.port))
    }

    /// Validates the configuration, ensuring all values make sense.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(SluiceError::Config(msg.to_string()));
        if self.schedule_interval_ms == 0 || self.clean_interval_ms == 0 || self.nouse_interval_ms == 0 {
            return invalid("tick intervals must be positive");
        }
        if self.worker_unknown_timeout_ms <= 0 {
            return invalid("worker unknown timeout must be positive");
        }
        if self.worker_dead_timeout_ms <= self.worker_unknown_timeout_ms {
            return invalid("worker dead timeout must exceed the unknown timeout");
        }
        if self.force_schedule_timeout_ms < 0 {
            return invalid("force schedule timeout cannot be negative");
        }
        if self.leader_lease_ms <= self.schedule_interval_ms as i64 {
            return invalid("leader lease must exceed the schedule interval");
        }
        if self.max_partition_count == 0 {
            return invalid("max partition count cannot be 0");
        }
        if self.nouse_history_limit < 2 {
            return invalid("nouse history must keep at least two snapshots");
        }
        if self.max_schema_versions == 0 {
            return invalid("max schema versions cannot be 0");
        }
        for pattern in &self.clean_at_delete_patterns {
            regex::Regex::new(pattern)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        AdminConfig::default().validate().unwrap();
        assert_eq!("127.0.0.1:7070", AdminConfig::default().address());
    }

    #[test]
    fn rejects() {
        let config = AdminConfig {
            worker_dead_timeout_ms: 1_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AdminConfig {
            clean_at_delete_patterns: vec!["(".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
