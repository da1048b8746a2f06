//! 設定ファイル（YAML）
//!
//! ```yaml
//! server:
//!   bind: 0.0.0.0:8080
//!   log_level: info
//! scheduler:
//!   bulk_limit: 100000
//!   default_site: unknown
//!   tuning:
//!     quantity_margin: 1.5
//! ```
//!
//! どのセクションも省略可能で、省略時はデフォルト値になります。

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use shuttle_core::SchedulerConfig;

pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// `RUST_LOG` が未設定のときに使うフィルタ
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    /// Read and validate `path`.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;
        let config: AppConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;
        config
            .scheduler
            .validate()
            .with_context(|| format!("Invalid scheduler section in {}", path.display()))?;
        Ok(config)
    }

    /// File if given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_yaml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file = write_yaml(
            r#"
server:
  bind: 0.0.0.0:9000
scheduler:
  default_site: Madison
  tuning:
    quantity_margin: 2.0
"#,
        );
        let config = AppConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.server.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.scheduler.default_site, "Madison");
        assert_eq!(config.scheduler.bulk_limit, 100_000);
        assert_eq!(config.scheduler.tuning.quantity_margin, 2.0);
        assert_eq!(config.scheduler.tuning.cpu_ceiling, 20.0);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = AppConfig::load_from_file(Path::new("/nonexistent/shuttle.yaml")).unwrap_err();
        assert!(format!("{err:#}").contains("Cannot open configuration file"));
    }

    #[test]
    fn invalid_scheduler_values_are_rejected() {
        let file = write_yaml("scheduler:\n  bulk_limit: 0\n");
        let err = AppConfig::load_from_file(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid scheduler section"));
    }

    #[test]
    fn no_path_means_defaults() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.server.bind, DEFAULT_BIND);
        assert_eq!(config.scheduler.default_site, "unknown");
    }
}
