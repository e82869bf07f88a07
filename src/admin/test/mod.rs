use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::admin::config::AdminConfig;
use crate::admin::controller::SysController;
use crate::admin::lifecycle::{DataStore, RemoveStatus};
use crate::registry::MemoryRegistry;

/// Data store that records removals and answers from a script, `Ok` unless
/// told otherwise.
#[derive(Debug, Default)]
pub struct ScriptedDataStore {
    responses: Mutex<HashMap<String, RemoveStatus>>,
    removed: Mutex<Vec<String>>,
}

impl ScriptedDataStore {
    pub fn respond(&self, path: &str, status: RemoveStatus) {
        self.responses.lock().insert(path.to_string(), status);
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().clone()
    }
}

impl DataStore for ScriptedDataStore {
    fn remove(&self, path: &str) -> RemoveStatus {
        self.removed.lock().push(path.to_string());
        self.responses
            .lock()
            .get(path)
            .cloned()
            .unwrap_or(RemoveStatus::Ok)
    }
}

pub fn config() -> AdminConfig {
    AdminConfig {
        advertised_address: Some("admin-0:7070".to_string()),
        schedule_delay_ms: 0,
        clean_safety_interval_ms: 10,
        clean_at_delete_patterns: vec!["^tmp_".to_string()],
        enable_nouse_topic: true,
        ..Default::default()
    }
}

pub fn new_controller() -> (Arc<MemoryRegistry>, Arc<ScriptedDataStore>, SysController) {
    let registry = Arc::new(MemoryRegistry::new());
    let store = Arc::new(ScriptedDataStore::default());
    let controller = SysController::new(config(), registry.clone(), store.clone()).unwrap();
    (registry, store, controller)
}

/// Runs the first control tick, which elects the only replica.
pub fn elect(controller: &SysController) {
    let report = controller.control_tick(0).unwrap();
    assert!(report.is_master);
}
