//! Configuration for the pipeline server
//!
//! Loaded from a TOML file. Every section except `[stages.*]` has defaults,
//! so a minimal file only names the three stage commands.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub registry: RegistrySection,
    pub stages: StagesSection,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Single path segment all pipeline routes live under
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    /// Allowed CORS origins; empty means any origin
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_prefix: default_api_prefix(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_api_prefix() -> String {
    "api".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://127.0.0.1:3000".to_string(),
    ]
}

/// Where uploads are read from and artifacts written to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSection {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
    /// Create the three directories at startup
    #[serde(default = "default_create_dirs")]
    pub create_dirs: bool,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            output_dir: default_output_dir(),
            reports_dir: default_reports_dir(),
            create_dirs: default_create_dirs(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_create_dirs() -> bool {
    true
}

/// Task retention; without `retention_secs` records are kept forever
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistrySection {
    pub retention_secs: Option<u64>,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            retention_secs: None,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    300 // 5 minutes
}

impl RegistrySection {
    pub fn retention(&self) -> Option<Duration> {
        self.retention_secs.map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// External programs implementing each stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StagesSection {
    pub segmentation: StageCommandConfig,
    pub features: StageCommandConfig,
    pub reports: StageCommandConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageCommandConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Kill the program after this many seconds; unlimited when unset
    pub timeout_secs: Option<u64>,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid value for {name}: {value}")]
    InvalidOverride { name: String, value: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineConfig {
    /// Load, apply environment overrides and validate
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse without overrides or validation
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment overrides read through `lookup`
    ///
    /// Only `PORT` is recognized.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = port.trim().parse().map_err(|_| ConfigError::InvalidOverride {
                name: "PORT".to_string(),
                value: port.clone(),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "server.port must be non-zero".to_string(),
            ));
        }

        let prefix = &self.server.api_prefix;
        if prefix.is_empty() || prefix.contains('/') {
            return Err(ConfigError::InvalidConfig(format!(
                "server.api_prefix '{prefix}' must be a single non-empty path segment"
            )));
        }

        for origin in &self.server.cors_origins {
            if !is_valid_origin(origin) {
                return Err(ConfigError::InvalidConfig(format!(
                    "server.cors_origins entry '{origin}' must be '*' or scheme://host[:port]"
                )));
            }
        }

        if self.registry.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "registry.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }

        for (name, stage) in [
            ("segmentation", &self.stages.segmentation),
            ("features", &self.stages.features),
            ("reports", &self.stages.reports),
        ] {
            if stage.command.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "stages.{name}.command must not be empty"
                )));
            }
            if stage.timeout_secs == Some(0) {
                return Err(ConfigError::InvalidConfig(format!(
                    "stages.{name}.timeout_secs must be greater than zero"
                )));
            }
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.server.host.parse().map_err(|_| {
            ConfigError::InvalidConfig(format!(
                "server.host '{}' is not an IP address",
                self.server.host
            ))
        })?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    /// Create the storage directories when `create_dirs` is set
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        if !self.storage.create_dirs {
            return Ok(());
        }
        for dir in [
            &self.storage.upload_dir,
            &self.storage.output_dir,
            &self.storage.reports_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Minimal configuration for unit tests
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[stages.segmentation]
command = "segment"

[stages.features]
command = "extract"

[stages.reports]
command = "report"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

fn is_valid_origin(origin: &str) -> bool {
    if origin == "*" {
        return true;
    }
    match origin.split_once("://") {
        Some((scheme, authority)) => {
            !scheme.is_empty()
                && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
                && !authority.is_empty()
                && !authority.contains(['/', ' ', '?', '#'])
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = PipelineConfig::test_config();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.api_prefix, "api");
        assert_eq!(config.storage.upload_dir, PathBuf::from("uploads"));
        assert!(config.storage.create_dirs);
        assert_eq!(config.registry.retention(), None);
        assert_eq!(config.registry.sweep_interval(), Duration::from_secs(300));
        assert_eq!(config.stages.segmentation.command, "segment");
        assert!(config.stages.segmentation.args.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[server]
host = "127.0.0.1"
port = 9000
api_prefix = "v1"
cors_origins = ["https://clinic.example"]

[storage]
upload_dir = "/data/uploads"
output_dir = "/data/outputs"
reports_dir = "/data/reports"
create_dirs = false

[registry]
retention_secs = 86400
sweep_interval_secs = 60

[stages.segmentation]
command = "python3"
args = ["-m", "stages.segment"]
timeout_secs = 600

[stages.features]
command = "python3"
args = ["-m", "stages.features"]

[stages.reports]
command = "python3"
args = ["-m", "stages.report"]
timeout_secs = 300
"#;
        let config = PipelineConfig::from_toml_str(toml_content).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.socket_addr().unwrap(), "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.server.cors_origins, vec!["https://clinic.example"]);
        assert_eq!(config.registry.retention(), Some(Duration::from_secs(86400)));
        assert_eq!(config.stages.segmentation.args, vec!["-m", "stages.segment"]);
        assert_eq!(config.stages.features.timeout_secs, None);
    }

    #[test]
    fn test_missing_stages_is_parse_error() {
        let result = PipelineConfig::from_toml_str("[server]\nport = 8000\n");
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_port_override() {
        let mut config = PipelineConfig::test_config();
        config
            .apply_overrides(|name| (name == "PORT").then(|| "8123".to_string()))
            .unwrap();
        assert_eq!(config.server.port, 8123);
    }

    #[test]
    fn test_invalid_port_override() {
        let mut config = PipelineConfig::test_config();
        let result = config.apply_overrides(|_| Some("not-a-port".to_string()));
        assert!(matches!(result, Err(ConfigError::InvalidOverride { .. })));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = PipelineConfig::test_config();
        config.stages.features.command = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::test_config();
        config.server.api_prefix = "api/v1".to_string();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::test_config();
        config.registry.sweep_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::test_config();
        config.stages.reports.timeout_secs = Some(0);
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::test_config();
        config.server.cors_origins = vec!["http://localhost:3000/app".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_origin_validation() {
        assert!(is_valid_origin("*"));
        assert!(is_valid_origin("http://localhost:3000"));
        assert!(is_valid_origin("https://clinic.example"));
        assert!(!is_valid_origin("localhost:3000"));
        assert!(!is_valid_origin("https://"));
    }

    #[test]
    fn test_invalid_host() {
        let mut config = PipelineConfig::test_config();
        config.server.host = "localhost".to_string();
        assert!(config.socket_addr().is_err());
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = PipelineConfig::test_config();
        let rendered = toml::to_string_pretty(&config).unwrap();
        assert_eq!(PipelineConfig::from_toml_str(&rendered).unwrap(), config);
    }
}
