use std::path::PathBuf;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directory of the sled database.
    pub file: PathBuf,
    /// Namespace prefixed to every path, so several clusters can share one store.
    pub root: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            file: std::env::temp_dir().join("sluice-registry"),
            root: "sluice".to_string(),
        }
    }
}
