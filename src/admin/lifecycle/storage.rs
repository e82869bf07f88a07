use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveStatus {
    Ok,
    NotFound,
    Failed(String),
}

impl RemoveStatus {
    /// Nothing is left at the path.
    pub fn is_done(&self) -> bool {
        matches!(self, RemoveStatus::Ok | RemoveStatus::NotFound)
    }
}

/// The storage holding topic data, as far as reclaiming it goes.
pub trait DataStore: Send + Sync + Debug {
    fn remove(&self, path: &str) -> RemoveStatus;
}

/// Data directories on a local or mounted filesystem.
#[derive(Debug, Default, Clone)]
pub struct LocalDataStore;

impl DataStore for LocalDataStore {
    fn remove(&self, path: &str) -> RemoveStatus {
        let path = Path::new(path);
        let result = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
        match result {
            Ok(()) => RemoveStatus::Ok,
            Err(err) if err.kind() == ErrorKind::NotFound => RemoveStatus::NotFound,
            Err(err) => RemoveStatus::Failed(err.to_string()),
        }
    }
}
