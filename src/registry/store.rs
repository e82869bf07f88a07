use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};

use sled::Db;

use crate::error::{Result, SluiceError};
use crate::registry::{normalize, CasOutcome, Registry};

/// Registry backed by an embedded sled database. Every path is stored as one
/// key under `root`.
#[derive(Clone)]
pub struct SledRegistry {
    db: Db,
    root: String,
}

impl Debug for SledRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SledRegistry {{ root: {} }}", self.root)
    }
}

impl SledRegistry {
    pub fn new(db: Db, root: &str) -> Self {
        Self {
            db,
            root: normalize(root).to_string(),
        }
    }

    pub fn open(config: &crate::registry::config::RegistryConfig) -> Result<Self> {
        let db = sled::open(&config.file)?;
        Ok(Self::new(db, &config.root))
    }

    fn key(&self, path: &str) -> String {
        format!("{}/{}", self.root, normalize(path))
    }

    fn err(&self, path: &str, err: sled::Error) -> SluiceError {
        SluiceError::registry(self.key(path), err)
    }
}

impl Registry for SledRegistry {
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .db
            .get(self.key(path))
            .map_err(|e| self.err(path, e))?
            .map(|v| v.to_vec()))
    }

    fn write(&self, path: &str, value: &[u8]) -> Result<()> {
        self.db
            .insert(self.key(path), value)
            .map_err(|e| self.err(path, e))?;
        self.db.flush().map_err(|e| self.err(path, e))?;
        Ok(())
    }

    fn create_path(&self, path: &str) -> Result<()> {
        // an existing node is left as is
        let _ = self
            .db
            .compare_and_swap(self.key(path), None as Option<&[u8]>, Some(Vec::<u8>::new()))
            .map_err(|e| self.err(path, e))?;
        Ok(())
    }

    fn compare_and_swap(&self, path: &str, old: Option<&[u8]>, new: &[u8]) -> Result<CasOutcome> {
        let res = self
            .db
            .compare_and_swap(self.key(path), old, Some(new))
            .map_err(|e| self.err(path, e))?;
        self.db.flush().map_err(|e| self.err(path, e))?;
        Ok(match res {
            Ok(()) => CasOutcome::Swapped,
            Err(conflict) => CasOutcome::Conflict {
                current: conflict.current.map(|v| v.to_vec()),
            },
        })
    }

    fn remove(&self, path: &str) -> Result<()> {
        let key = self.key(path);
        self.db.remove(&key).map_err(|e| self.err(path, e))?;
        let prefix = format!("{}/", key);
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (child, _) = entry.map_err(|e| self.err(path, e))?;
            self.db.remove(child).map_err(|e| self.err(path, e))?;
        }
        self.db.flush().map_err(|e| self.err(path, e))?;
        Ok(())
    }

    fn list(&self, path: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", self.key(path));
        let mut children = BTreeSet::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry.map_err(|e| self.err(path, e))?;
            let key = String::from_utf8_lossy(&key);
            if let Some(child) = key[prefix.len()..].split('/').next() {
                children.insert(child.to_string());
            }
        }
        Ok(children.into_iter().collect())
    }
}
