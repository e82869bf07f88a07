//! Schemas are registered per topic and addressed by a content hash, so
//! registering the same schema twice yields the same version. The schema
//! bodies live at `topics/<name>/schema`; their order lives in the topic meta.

use std::collections::BTreeMap;

use crate::admin::controller::SysController;
use crate::admin::rpc::ResponseBody;
use crate::error::{Result, SluiceError};
use crate::registry::{self, paths};

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a of the schema text.
pub fn schema_version(schema: &str) -> i32 {
    schema
        .bytes()
        .fold(FNV_OFFSET, |hash, b| (hash ^ b as u32).wrapping_mul(FNV_PRIME)) as i32
}

impl SysController {
    pub fn register_schema(&self, topic: &str, schema: String, now_ms: i64) -> Result<ResponseBody> {
        self.ensure_master()?;
        if schema.trim().is_empty() {
            return Err(SluiceError::InvalidParameter("schema is empty".to_string()));
        }
        let _write = self.write_lock.lock();
        let info = self
            .state
            .topics
            .find(topic)
            .ok_or_else(|| SluiceError::TopicNotFound(topic.to_string()))?;
        let version = schema_version(&schema);
        if info.meta.schema_versions.contains(&version) {
            return Ok(ResponseBody::SchemaVersion(version));
        }

        let path = paths::topic_schema(topic);
        let mut schemas: BTreeMap<i32, String> =
            registry::get(self.registry(), &path)?.unwrap_or_default();
        let mut meta = (*info.meta).clone();
        meta.schema_versions.push(version);
        schemas.insert(version, schema);
        while meta.schema_versions.len() > self.config.max_schema_versions {
            let evicted = meta.schema_versions.remove(0);
            schemas.remove(&evicted);
            tracing::debug!(topic, version = evicted, "evicted schema version");
        }
        meta.modify_time_ms = now_ms;

        registry::put(self.registry(), &path, &schemas)?;
        let mut metas = self.persisted_metas();
        metas.insert(meta.name.clone(), meta.clone());
        self.persist_metas(&metas)?;
        self.state.topics.update(meta)?;
        tracing::info!(topic, version, "registered schema");
        Ok(ResponseBody::SchemaVersion(version))
    }

    /// Returns the requested schema version, or the latest one.
    pub fn get_schema(&self, topic: &str, version: Option<i32>) -> Result<ResponseBody> {
        self.ensure_master()?;
        let info = self
            .state
            .topics
            .find(topic)
            .ok_or_else(|| SluiceError::TopicNotFound(topic.to_string()))?;
        let not_found = |version| SluiceError::SchemaNotFound {
            topic: topic.to_string(),
            version,
        };
        let version = match version {
            Some(version) => version,
            None => *info.meta.schema_versions.last().ok_or_else(|| not_found(-1))?,
        };
        let schemas: BTreeMap<i32, String> =
            registry::get(self.registry(), &paths::topic_schema(topic))?.unwrap_or_default();
        let schema = schemas.get(&version).cloned().ok_or_else(|| not_found(version))?;
        Ok(ResponseBody::Schema { version, schema })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::admin::config::AdminConfig;
    use crate::admin::rpc::{AdminRequest, TopicSpec};
    use crate::admin::test::{config, elect, new_controller, ScriptedDataStore};
    use crate::error::ErrorCode;
    use crate::registry::MemoryRegistry;

    fn version(body: ResponseBody) -> i32 {
        match body {
            ResponseBody::SchemaVersion(v) => v,
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn fnv1a() {
        assert_eq!(0x811c_9dc5_u32 as i32, schema_version(""));
        assert_eq!(0xe40c_292c_u32 as i32, schema_version("a"));
    }

    #[test]
    fn register_is_idempotent() -> Result<()> {
        let (_, _, ctrl) = new_controller();
        elect(&ctrl);
        ctrl.create_topic(TopicSpec::new("t1", 1), 1_000)?;
        let v1 = version(ctrl.register_schema("t1", "{\"a\":1}".to_string(), 2_000)?);
        let again = version(ctrl.register_schema("t1", "{\"a\":1}".to_string(), 3_000)?);
        assert_eq!(v1, again);
        let meta = ctrl.state().topics.find("t1").unwrap().meta;
        assert_eq!(vec![v1], meta.schema_versions);
        assert_eq!(2_000, meta.modify_time_ms);
        Ok(())
    }

    #[test]
    fn latest_and_missing() -> Result<()> {
        let (_, _, ctrl) = new_controller();
        elect(&ctrl);
        ctrl.create_topic(TopicSpec::new("t1", 1), 1_000)?;
        let res = ctrl.handle_request(
            AdminRequest::GetSchema {
                topic: "t1".to_string(),
                version: None,
            },
            1_000,
        );
        assert_eq!(ErrorCode::SchemaNotFound, res.code());

        ctrl.register_schema("t1", "one".to_string(), 2_000)?;
        let v2 = version(ctrl.register_schema("t1", "two".to_string(), 3_000)?);
        assert_eq!(
            ResponseBody::Schema {
                version: v2,
                schema: "two".to_string()
            },
            ctrl.get_schema("t1", None)?
        );
        let res = ctrl.handle_request(
            AdminRequest::GetSchema {
                topic: "t1".to_string(),
                version: Some(42),
            },
            3_000,
        );
        assert_eq!(ErrorCode::SchemaNotFound, res.code());
        Ok(())
    }

    #[test]
    fn oldest_versions_are_evicted() -> Result<()> {
        let config = AdminConfig {
            max_schema_versions: 2,
            ..config()
        };
        let ctrl = SysController::new(
            config,
            Arc::new(MemoryRegistry::new()),
            Arc::new(ScriptedDataStore::default()),
        )?;
        elect(&ctrl);
        ctrl.create_topic(TopicSpec::new("t1", 1), 1_000)?;
        let first = version(ctrl.register_schema("t1", "one".to_string(), 2_000)?);
        ctrl.register_schema("t1", "two".to_string(), 3_000)?;
        ctrl.register_schema("t1", "three".to_string(), 4_000)?;

        assert_eq!(2, ctrl.state().topics.find("t1").unwrap().meta.schema_versions.len());
        let res = ctrl.handle_request(
            AdminRequest::GetSchema {
                topic: "t1".to_string(),
                version: Some(first),
            },
            5_000,
        );
        assert_eq!(ErrorCode::SchemaNotFound, res.code());
        Ok(())
    }
}
