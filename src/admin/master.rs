//! Split-brain-safe mastership.
//!
//! Every admin replica caches the master version it last saw. Becoming master
//! means bumping the shared counter from exactly that value with a single
//! compare-and-swap, so at most one replica wins any given round. The master
//! re-reads the counter every tick and steps down as soon as it moved.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::registry::{self, paths, CasOutcome, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Campaign {
    /// This replica bumped the counter and is master at this version.
    Elected(u64),
    /// The counter was already ahead of the local copy.
    Resynced(u64),
    /// Another replica bumped the counter first.
    LostRace(u64),
}

#[derive(Debug)]
pub struct MasterVersion {
    registry: Arc<dyn Registry>,
    self_version: AtomicU64,
    is_master: AtomicBool,
}

impl MasterVersion {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            self_version: AtomicU64::new(0),
            is_master: AtomicBool::new(false),
        }
    }

    pub fn version(&self) -> u64 {
        self.self_version.load(Ordering::SeqCst)
    }

    pub fn is_master(&self) -> bool {
        self.is_master.load(Ordering::SeqCst)
    }

    fn remote(&self) -> Result<(Option<Vec<u8>>, u64)> {
        let bytes = self.registry.read(paths::SELF_MASTER_VERSION)?;
        let version = match &bytes {
            Some(bytes) if !bytes.is_empty() => bincode::deserialize(bytes)?,
            _ => 0,
        };
        Ok((bytes, version))
    }

    fn resync(&self, version: u64) {
        self.self_version.store(version, Ordering::SeqCst);
        self.is_master.store(false, Ordering::SeqCst);
    }

    pub fn campaign(&self) -> Result<Campaign> {
        let (_, remote) = self.remote()?;
        let local = self.version();
        if remote > local {
            tracing::info!(local, remote, "master version behind, resyncing");
            self.resync(remote);
            return Ok(Campaign::Resynced(remote));
        }

        let old = if local == 0 {
            None
        } else {
            Some(bincode::serialize(&local)?)
        };
        let new = local + 1;
        match self.registry.compare_and_swap(
            paths::SELF_MASTER_VERSION,
            old.as_deref(),
            &bincode::serialize(&new)?,
        )? {
            CasOutcome::Swapped => {
                tracing::info!(version = new, "elected master");
                self.self_version.store(new, Ordering::SeqCst);
                self.is_master.store(true, Ordering::SeqCst);
                Ok(Campaign::Elected(new))
            }
            CasOutcome::Conflict { current } => {
                let current = match current {
                    Some(bytes) if !bytes.is_empty() => bincode::deserialize(&bytes)?,
                    _ => 0,
                };
                tracing::info!(local, current, "lost master race");
                self.resync(current);
                Ok(Campaign::LostRace(current))
            }
        }
    }

    /// Checks that nobody bumped the counter behind our back. Returns false,
    /// and steps down, if someone did.
    pub fn verify(&self) -> Result<bool> {
        if !self.is_master() {
            return Ok(false);
        }
        let (_, remote) = self.remote()?;
        let local = self.version();
        if remote != local {
            tracing::warn!(local, remote, "master version moved, stepping down");
            self.resync(remote);
            return Ok(false);
        }
        Ok(true)
    }

    pub fn abdicate(&self) {
        self.is_master.store(false, Ordering::SeqCst);
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AdminInfo {
    pub address: String,
    pub alive: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LeaderInfo {
    pub address: String,
    pub is_primary: bool,
    pub alive: bool,
    pub master_version: u64,
    pub admins: Vec<AdminInfo>,
}

pub fn read_leader(registry: &dyn Registry) -> Result<Option<LeaderInfo>> {
    registry::get(registry, paths::LEADER_INFO)
}

/// Stamps this replica as alive.
pub fn touch_replica(registry: &dyn Registry, address: &str, now_ms: i64) -> Result<()> {
    registry::put(registry, &paths::admin_replica(address), &now_ms)
}

/// Last stamp of every admin replica, by address.
pub fn replica_stamps(registry: &dyn Registry) -> Result<Vec<(String, i64)>> {
    let mut stamps = vec![];
    for address in registry.list(paths::ADMIN_REPLICAS)? {
        if let Some(stamp) = registry::get::<i64>(registry, &paths::admin_replica(&address))? {
            stamps.push((address, stamp));
        }
    }
    Ok(stamps)
}

/// A replica only campaigns while there is no leader, the recorded leader is
/// itself, or the leader's stamp is older than the lease.
pub fn should_campaign(
    registry: &dyn Registry,
    self_address: &str,
    now_ms: i64,
    lease_ms: i64,
) -> Result<bool> {
    let leader = match read_leader(registry)? {
        Some(leader) => leader,
        None => return Ok(true),
    };
    if leader.address == self_address {
        return Ok(true);
    }
    let stamp = registry::get::<i64>(registry, &paths::admin_replica(&leader.address))?;
    Ok(stamp.map(|stamp| now_ms - stamp > lease_ms).unwrap_or(true))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Published {
    pub raw: bool,
    pub json: bool,
}

#[derive(Debug, Default)]
struct PublishedCopies {
    raw: Option<Vec<u8>>,
    json: Option<Vec<u8>>,
}

/// Writes the leader record as bincode and as a JSON mirror, each only when
/// its bytes differ from what was last published.
#[derive(Debug)]
pub struct LeaderPublisher {
    registry: Arc<dyn Registry>,
    last: Mutex<PublishedCopies>,
}

impl LeaderPublisher {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            last: Mutex::new(PublishedCopies::default()),
        }
    }

    pub fn publish(&self, info: &LeaderInfo) -> Result<Published> {
        let raw = bincode::serialize(info)?;
        let json = serde_json::to_vec_pretty(info)?;

        let (last_raw, last_json) = {
            let last = self.last.lock();
            (last.raw.clone(), last.json.clone())
        };
        // after a restart the cache is empty; compare with what is stored
        let last_raw = match last_raw {
            Some(raw) => Some(raw),
            None => self.registry.read(paths::LEADER_INFO)?,
        };
        let last_json = match last_json {
            Some(json) => Some(json),
            None => self.registry.read(paths::LEADER_INFO_JSON)?,
        };

        let mut published = Published::default();
        if last_raw.as_ref() != Some(&raw) {
            self.registry.write(paths::LEADER_INFO, &raw)?;
            published.raw = true;
        }
        self.last.lock().raw = Some(raw);

        if last_json.as_ref() != Some(&json) {
            self.registry.write(paths::LEADER_INFO_JSON, &json)?;
            published.json = true;
        }
        self.last.lock().json = Some(json);

        if published.raw || published.json {
            tracing::info!(address = %info.address, version = info.master_version, "published leader info");
        }
        Ok(published)
    }

    /// Forgets the cached copies so the next publish compares with the registry.
    pub fn reset(&self) {
        *self.last.lock() = PublishedCopies::default();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use super::*;
    use crate::registry::MemoryRegistry;

    #[test]
    fn first_campaign_elects() -> Result<()> {
        let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
        let master = MasterVersion::new(registry);
        assert_eq!(Campaign::Elected(1), master.campaign()?);
        assert!(master.is_master());
        assert!(master.verify()?);
        Ok(())
    }

    #[test]
    fn behind_replica_resyncs_then_wins() -> Result<()> {
        let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
        let a = MasterVersion::new(registry.clone());
        let b = MasterVersion::new(registry);
        a.campaign()?;
        a.campaign()?;

        assert_eq!(Campaign::Resynced(2), b.campaign()?);
        assert!(!b.is_master());
        assert_eq!(Campaign::Elected(3), b.campaign()?);

        // a notices on its next check
        assert!(!a.verify()?);
        assert!(!a.is_master());
        assert_eq!(3, a.version());
        Ok(())
    }

    #[test]
    fn concurrent_cas_has_one_winner() -> Result<()> {
        let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
        registry.write(paths::SELF_MASTER_VERSION, &bincode::serialize(&5u64)?)?;
        let replicas: Vec<Arc<MasterVersion>> = (0..2)
            .map(|_| Arc::new(MasterVersion::new(registry.clone())))
            .collect();
        for replica in &replicas {
            replica.campaign()?;
        }

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = replicas
            .iter()
            .cloned()
            .map(|replica| {
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    replica.campaign().unwrap()
                })
            })
            .collect();
        let outcomes: Vec<Campaign> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(
            1,
            outcomes
                .iter()
                .filter(|c| matches!(c, Campaign::Elected(6)))
                .count()
        );
        assert!(outcomes.contains(&Campaign::LostRace(6)));
        Ok(())
    }

    #[test]
    fn lease() -> Result<()> {
        let registry = MemoryRegistry::new();
        assert!(should_campaign(&registry, "a:1", 0, 10_000)?);

        let leader = LeaderInfo {
            address: "a:1".to_string(),
            is_primary: true,
            alive: true,
            master_version: 1,
            admins: vec![],
        };
        registry::put(&registry, paths::LEADER_INFO, &leader)?;
        touch_replica(&registry, "a:1", 1_000)?;

        assert!(should_campaign(&registry, "a:1", 2_000, 10_000)?);
        assert!(!should_campaign(&registry, "b:1", 2_000, 10_000)?);
        assert!(should_campaign(&registry, "b:1", 12_000, 10_000)?);
        assert_eq!(vec![("a:1".to_string(), 1_000)], replica_stamps(&registry)?);
        Ok(())
    }

    #[test]
    fn publish_only_on_change() -> Result<()> {
        let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
        let publisher = LeaderPublisher::new(registry.clone());
        let mut info = LeaderInfo {
            address: "a:1".to_string(),
            is_primary: true,
            alive: true,
            master_version: 1,
            admins: vec![AdminInfo {
                address: "a:1".to_string(),
                alive: true,
            }],
        };

        assert_eq!(Published { raw: true, json: true }, publisher.publish(&info)?);
        assert_eq!(Published::default(), publisher.publish(&info)?);

        // restart: nothing to write either
        let restarted = LeaderPublisher::new(registry.clone());
        assert_eq!(Published::default(), restarted.publish(&info)?);

        info.master_version = 2;
        assert_eq!(Published { raw: true, json: true }, publisher.publish(&info)?);
        let json: LeaderInfo =
            serde_json::from_slice(&registry.read(paths::LEADER_INFO_JSON)?.unwrap())?;
        assert_eq!(info, json);
        Ok(())
    }

    #[test]
    fn representations_are_published_independently() -> Result<()> {
        let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
        let publisher = LeaderPublisher::new(registry.clone());
        let info = LeaderInfo {
            address: "a:1".to_string(),
            is_primary: true,
            alive: true,
            master_version: 1,
            admins: vec![],
        };
        publisher.publish(&info)?;
        // someone clobbered only the mirror
        registry.write(paths::LEADER_INFO_JSON, b"{}")?;
        publisher.reset();
        assert_eq!(Published { raw: false, json: true }, publisher.publish(&info)?);
        Ok(())
    }
}
