//! Optional admin features that are switched on by config and live only
//! while this replica is master.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum ModuleKind {
    CleanAtDelete,
    NoUseTopic,
}

pub trait AdminModule: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// One-time setup when the replica starts.
    fn init(&self) -> Result<()>;

    /// Reads persisted state on takeover.
    fn load(&self) -> Result<()>;

    /// Drops in-memory state on abdication.
    fn unload(&self);

    fn is_loaded(&self) -> bool;

    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<ModuleKind, Arc<dyn AdminModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: ModuleKind, module: Arc<dyn AdminModule>) -> Result<()> {
        module.init()?;
        tracing::info!(module = module.name(), "registered module");
        self.modules.insert(kind, module);
        Ok(())
    }

    /// The module registered under `kind`, if it is a `T`.
    pub fn get<T: AdminModule + 'static>(&self, kind: ModuleKind) -> Option<&T> {
        self.modules.get(&kind)?.as_any().downcast_ref::<T>()
    }

    /// Like [`get`](Self::get), but only while the module is loaded.
    pub fn loaded<T: AdminModule + 'static>(&self, kind: ModuleKind) -> Option<&T> {
        self.get::<T>(kind).filter(|module| module.is_loaded())
    }

    /// Loads every module. A module that fails stays unloaded and is retried
    /// on the next call.
    pub fn load_all(&self) -> Vec<ModuleKind> {
        let mut failed = vec![];
        for (kind, module) in &self.modules {
            if module.is_loaded() {
                continue;
            }
            match module.load() {
                Ok(()) => tracing::info!(module = module.name(), "loaded module"),
                Err(err) => {
                    tracing::warn!(module = module.name(), %err, "failed to load module");
                    failed.push(*kind);
                }
            }
        }
        failed
    }

    pub fn unload_all(&self) {
        for module in self.modules.values().filter(|m| m.is_loaded()) {
            module.unload();
            tracing::info!(module = module.name(), "unloaded module");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::error::SluiceError;

    #[derive(Debug, Default)]
    struct Toggle {
        loaded: AtomicBool,
        broken: AtomicBool,
    }

    impl AdminModule for Toggle {
        fn name(&self) -> &'static str {
            "toggle"
        }

        fn init(&self) -> Result<()> {
            Ok(())
        }

        fn load(&self) -> Result<()> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(SluiceError::Internal("broken".to_string()));
            }
            self.loaded.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn unload(&self) {
            self.loaded.store(false, Ordering::SeqCst);
        }

        fn is_loaded(&self) -> bool {
            self.loaded.load(Ordering::SeqCst)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn lifecycle() {
        let mut modules = ModuleRegistry::new();
        modules
            .register(ModuleKind::NoUseTopic, Arc::new(Toggle::default()))
            .unwrap();
        assert!(modules.loaded::<Toggle>(ModuleKind::NoUseTopic).is_none());
        assert!(modules.get::<Toggle>(ModuleKind::CleanAtDelete).is_none());

        assert!(modules.load_all().is_empty());
        assert!(modules.loaded::<Toggle>(ModuleKind::NoUseTopic).is_some());

        modules.unload_all();
        assert!(modules.loaded::<Toggle>(ModuleKind::NoUseTopic).is_none());
    }

    #[test]
    fn failed_load_is_reported() {
        let mut modules = ModuleRegistry::new();
        let module = Toggle::default();
        module.broken.store(true, Ordering::SeqCst);
        modules
            .register(ModuleKind::CleanAtDelete, Arc::new(module))
            .unwrap();
        assert_eq!(vec![ModuleKind::CleanAtDelete], modules.load_all());
    }
}
