use crate::admin::config::AdminConfig;
use crate::error::Result;
use crate::logger::LogConfig;
use crate::registry::config::RegistryConfig;

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SluiceConfig {
    pub admin: AdminConfig,
    pub registry: RegistryConfig,
    pub log: LogConfig,
}

/// Reads the TOML file at `config_path`, overlaid with `SLUICE_*` environment
/// variables (`SLUICE_ADMIN__PORT=7071`).
pub fn config<P: AsRef<std::path::Path>>(config_path: P) -> Result<SluiceConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::from(config_path.as_ref()))
        .add_source(
            config::Environment::with_prefix("SLUICE")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: SluiceConfig = settings.try_deserialize()?;
    config.admin.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sluice.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[admin]\nport = 7171\nclean_at_delete_patterns = [\"^tmp_\"]\n\n[registry]\nroot = \"test\""
        )
        .unwrap();

        let config = config(&path).unwrap();
        assert_eq!(7171, config.admin.port);
        assert_eq!(vec!["^tmp_".to_string()], config.admin.clean_at_delete_patterns);
        assert_eq!("test", config.registry.root);
        assert_eq!("info", config.log.level);
    }
}
