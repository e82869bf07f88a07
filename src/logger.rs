use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Result, SluiceError};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default directive when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for a daily rolling log file. Logs go to stdout when absent.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "sluice.log".to_string(),
        }
    }
}

/// Installs the global subscriber. The returned guard must be held for the
/// life of the process so buffered lines are flushed.
pub fn init(config: &LogConfig) -> Result<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| SluiceError::Config(e.to_string()))?;

    let (writer, guard) = match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            tracing_appender::non_blocking(appender)
        }
        None => tracing_appender::non_blocking(std::io::stdout()),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::Layer::new().compact().with_writer(writer))
        .try_init()
        .map_err(|e| SluiceError::Config(e.to_string()))?;

    Ok(guard)
}
