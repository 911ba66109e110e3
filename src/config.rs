//! Service configuration.
//!
//! Configuration comes from a YAML file, environment overrides, or both:
//!
//! ```yaml
//! node_id: preview-1
//! storage:
//!   engine: postgres
//!   database_url: postgres://localhost/preview
//! render_agents:
//!   imageMagickRenderAgent:
//!     count: 4
//!     supported_file_types: [jpg, jpeg, png, gif, pdf]
//! uploader:
//!   engine: local
//!   base_path: /var/lib/preview/assets
//! ```
//!
//! A `render_agents` section replaces the built-in agent table as a whole.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scheduler::{DEFAULT_BURST_MULTIPLIER, DEFAULT_QUEUE_CAPACITY};
use crate::template::{kinds, Template, DOCUMENT_TEMPLATE_ID, LEGACY_TEMPLATE_IDS, VIDEO_TEMPLATE_ID};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid YAML for this schema.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// ===== Storage =====

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageEngine {
    #[default]
    Memory,
    Postgres,
    Redis,
}

impl std::str::FromStr for StorageEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "redis" => Ok(Self::Redis),
            other => Err(format!("unknown storage engine '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub engine: StorageEngine,
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Connection pool size for PostgreSQL.
    pub max_connections: u32,
    pub redis_url: String,
    /// Prefix for every Redis key.
    pub key_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            engine: StorageEngine::Memory,
            database_url: "postgres://localhost/preview".to_string(),
            max_connections: 10,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "preview".to_string(),
        }
    }
}

// ===== Render agents =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderAgentConfig {
    pub enabled: bool,
    /// Number of workers. Zero keeps the agent's file types routable
    /// while this node renders none of its work.
    pub count: usize,
    pub supported_file_types: Vec<String>,
    /// Free-form settings passed to the renderer.
    pub params: BTreeMap<String, String>,
}

impl Default for RenderAgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            count: 1,
            supported_file_types: Vec::new(),
            params: BTreeMap::new(),
        }
    }
}

impl RenderAgentConfig {
    pub fn new(count: usize, supported_file_types: &[&str]) -> Self {
        Self {
            count,
            supported_file_types: supported_file_types.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }

    /// The built-in agents and the file types each one renders.
    pub fn defaults() -> BTreeMap<String, RenderAgentConfig> {
        let mut agents = BTreeMap::new();
        agents.insert(
            kinds::IMAGE_MAGICK.to_string(),
            Self::new(4, &["jpg", "jpeg", "png", "gif", "pdf"]),
        );
        agents.insert(
            kinds::DOCUMENT.to_string(),
            Self::new(2, &["doc", "docx", "ppt", "pptx"]),
        );
        agents.insert(kinds::VIDEO.to_string(), Self::new(1, &["mp4"]));
        agents
    }
}

// ===== Transfer =====

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploaderEngine {
    #[default]
    Local,
    S3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    pub engine: UploaderEngine,
    /// Root directory for `local:///` destinations.
    pub base_path: PathBuf,
    /// Bucket named in `s3://` destinations.
    pub bucket: Option<String>,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            engine: UploaderEngine::Local,
            base_path: PathBuf::from("./assets"),
            bucket: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Root directory that `local:///` source URLs resolve against.
    pub base_path: PathBuf,
    pub http_timeout_secs: u64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./assets"),
            http_timeout_secs: 60,
        }
    }
}

impl DownloaderConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

// ===== Scheduler =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub sweep_interval_secs: u64,
    /// Grace window for in-flight renders on stop.
    pub stop_grace_secs: u64,
    pub queue_capacity: usize,
    /// Buffer of the scheduler's status subscription.
    pub status_buffer: usize,
    pub burst_multiplier: usize,
    pub document_template_ids: Vec<String>,
    pub video_template_ids: Vec<String>,
    /// Templates for every other supported file type.
    pub legacy_template_ids: Vec<String>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 5,
            stop_grace_secs: 5,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            status_buffer: 100,
            burst_multiplier: DEFAULT_BURST_MULTIPLIER,
            document_template_ids: vec![DOCUMENT_TEMPLATE_ID.to_string()],
            video_template_ids: vec![VIDEO_TEMPLATE_ID.to_string()],
            legacy_template_ids: LEGACY_TEMPLATE_IDS.iter().map(|id| id.to_string()).collect(),
        }
    }
}

impl SchedulerSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

// ===== Top level =====

/// Configuration for one preview node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub node_id: String,
    pub storage: StorageConfig,
    /// Render agents keyed by kind.
    pub render_agents: BTreeMap<String, RenderAgentConfig>,
    /// Templates added to the built-in catalog.
    pub templates: Vec<Template>,
    pub uploader: UploaderConfig,
    pub downloader: DownloaderConfig,
    pub scheduler: SchedulerSettings,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            node_id: "preview".to_string(),
            storage: StorageConfig::default(),
            render_agents: RenderAgentConfig::defaults(),
            templates: Vec::new(),
            uploader: UploaderConfig::default(),
            downloader: DownloaderConfig::default(),
            scheduler: SchedulerSettings::default(),
        }
    }
}

/// Environment variable prefix for each built-in agent.
const AGENT_ENV_NAMES: [(&str, &str); 3] = [
    ("IMAGE", kinds::IMAGE_MAGICK),
    ("DOCUMENT", kinds::DOCUMENT),
    ("VIDEO", kinds::VIDEO),
];

impl PreviewConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a YAML file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed, or the
    /// result fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Creates configuration from defaults and environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PREVIEW_NODE_ID`: Node name (default: preview)
    /// - `PREVIEW_STORAGE_ENGINE`: memory, postgres or redis (default: memory)
    /// - `DATABASE_URL`: PostgreSQL connection URL
    /// - `REDIS_URL`: Redis connection URL
    /// - `PREVIEW_SWEEP_INTERVAL_SECS`: Sweep interval (default: 5)
    /// - `PREVIEW_STOP_GRACE_SECS`: Stop grace window (default: 5)
    /// - `PREVIEW_QUEUE_CAPACITY`: Dispatch queue capacity (default: 200)
    /// - `PREVIEW_UPLOAD_PATH`: Local uploader root (default: ./assets)
    /// - `PREVIEW_DOWNLOAD_PATH`: Local downloader root (default: ./assets)
    /// - `PREVIEW_{IMAGE,DOCUMENT,VIDEO}_ENABLED`: Enable an agent
    /// - `PREVIEW_{IMAGE,DOCUMENT,VIDEO}_COUNT`: Worker count for an agent
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;

        // Durable engines have no usable default address
        let required = match config.storage.engine {
            StorageEngine::Postgres => Some("DATABASE_URL"),
            StorageEngine::Redis => Some("REDIS_URL"),
            StorageEngine::Memory => None,
        };
        if let Some(key) = required {
            if std::env::var(key).is_err() {
                return Err(ConfigError::MissingEnvVar(key.to_string()));
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reads `path` when given, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                serde_yaml::from_str(&content)?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("PREVIEW_NODE_ID") {
            self.node_id = val;
        }

        // Storage settings
        if let Ok(val) = std::env::var("PREVIEW_STORAGE_ENGINE") {
            self.storage.engine = parse_env_value(&val, "PREVIEW_STORAGE_ENGINE")?;
        }

        if let Ok(val) = std::env::var("DATABASE_URL") {
            self.storage.database_url = val;
        }

        if let Ok(val) = std::env::var("REDIS_URL") {
            self.storage.redis_url = val;
        }

        // Scheduler settings
        if let Ok(val) = std::env::var("PREVIEW_SWEEP_INTERVAL_SECS") {
            self.scheduler.sweep_interval_secs = parse_env_value(&val, "PREVIEW_SWEEP_INTERVAL_SECS")?;
        }

        if let Ok(val) = std::env::var("PREVIEW_STOP_GRACE_SECS") {
            self.scheduler.stop_grace_secs = parse_env_value(&val, "PREVIEW_STOP_GRACE_SECS")?;
        }

        if let Ok(val) = std::env::var("PREVIEW_QUEUE_CAPACITY") {
            self.scheduler.queue_capacity = parse_env_value(&val, "PREVIEW_QUEUE_CAPACITY")?;
        }

        // Transfer settings
        if let Ok(val) = std::env::var("PREVIEW_UPLOAD_PATH") {
            self.uploader.base_path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("PREVIEW_DOWNLOAD_PATH") {
            self.downloader.base_path = PathBuf::from(val);
        }

        // Agent settings
        for (name, kind) in AGENT_ENV_NAMES {
            let enabled_key = format!("PREVIEW_{}_ENABLED", name);
            if let Ok(val) = std::env::var(&enabled_key) {
                let enabled = parse_env_bool(&val, &enabled_key)?;
                self.render_agents.entry(kind.to_string()).or_default().enabled = enabled;
            }

            let count_key = format!("PREVIEW_{}_COUNT", name);
            if let Ok(val) = std::env::var(&count_key) {
                let count = parse_env_value(&val, &count_key)?;
                self.render_agents.entry(kind.to_string()).or_default().count = count;
            }
        }

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "node_id cannot be empty".to_string(),
            ));
        }

        // Storage validation
        match self.storage.engine {
            StorageEngine::Postgres if self.storage.database_url.is_empty() => {
                return Err(ConfigError::ValidationFailed(
                    "database_url cannot be empty for the postgres engine".to_string(),
                ));
            }
            StorageEngine::Redis if self.storage.redis_url.is_empty() => {
                return Err(ConfigError::ValidationFailed(
                    "redis_url cannot be empty for the redis engine".to_string(),
                ));
            }
            _ => {}
        }

        if self.storage.max_connections == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_connections must be greater than 0".to_string(),
            ));
        }

        // Agent validation
        for (kind, agent) in &self.render_agents {
            if agent.enabled && agent.supported_file_types.is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "render agent '{}' must support at least one file type",
                    kind
                )));
            }
        }

        // Transfer validation
        if self.uploader.engine == UploaderEngine::S3 && self.uploader.bucket.is_none() {
            return Err(ConfigError::ValidationFailed(
                "uploader bucket is required for the s3 engine".to_string(),
            ));
        }

        if self.downloader.http_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "http_timeout_secs must be greater than 0".to_string(),
            ));
        }

        // Scheduler validation
        let scheduler = &self.scheduler;
        if scheduler.sweep_interval_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "sweep_interval_secs must be greater than 0".to_string(),
            ));
        }

        if scheduler.queue_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }

        if scheduler.status_buffer == 0 {
            return Err(ConfigError::ValidationFailed(
                "status_buffer must be greater than 0".to_string(),
            ));
        }

        if scheduler.burst_multiplier == 0 {
            return Err(ConfigError::ValidationFailed(
                "burst_multiplier must be greater than 0".to_string(),
            ));
        }

        if scheduler.legacy_template_ids.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "legacy_template_ids cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the node id.
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    /// Builder method to set the storage engine.
    pub fn with_storage_engine(mut self, engine: StorageEngine) -> Self {
        self.storage.engine = engine;
        self
    }

    /// Builder method to set database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.storage.database_url = url.into();
        self
    }

    /// Builder method to add or replace a render agent.
    pub fn with_render_agent(mut self, kind: impl Into<String>, agent: RenderAgentConfig) -> Self {
        self.render_agents.insert(kind.into(), agent);
        self
    }

    /// Builder method to add a template to the catalog.
    pub fn with_template(mut self, template: Template) -> Self {
        self.templates.push(template);
        self
    }

    /// Builder method to set the uploader root.
    pub fn with_upload_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.uploader.base_path = path.into();
        self
    }

    /// Builder method to set the downloader root.
    pub fn with_download_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.downloader.base_path = path.into();
        self
    }

    /// Builder method to set the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.scheduler.sweep_interval_secs = interval.as_secs();
        self
    }

    /// Builder method to set the stop grace window.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.scheduler.stop_grace_secs = grace.as_secs();
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = PreviewConfig::default();
        assert_eq!(config.node_id, "preview");
        assert_eq!(config.storage.engine, StorageEngine::Memory);
        assert_eq!(config.render_agents.len(), 3);
        assert_eq!(config.scheduler.sweep_interval(), Duration::from_secs(5));
        assert_eq!(config.scheduler.stop_grace(), Duration::from_secs(5));
        assert_eq!(config.scheduler.queue_capacity, 200);
        assert_eq!(config.scheduler.burst_multiplier, 4);
        assert_eq!(config.scheduler.legacy_template_ids.len(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_agents() {
        let agents = RenderAgentConfig::defaults();
        assert!(agents[kinds::IMAGE_MAGICK]
            .supported_file_types
            .contains(&"pdf".to_string()));
        assert_eq!(agents[kinds::DOCUMENT].supported_file_types.len(), 4);
        assert_eq!(agents[kinds::VIDEO].supported_file_types, vec!["mp4".to_string()]);
    }

    #[test]
    fn test_config_builder() {
        let config = PreviewConfig::new()
            .with_node_id("node-7")
            .with_storage_engine(StorageEngine::Postgres)
            .with_database_url("postgres://test/db")
            .with_render_agent(kinds::VIDEO, RenderAgentConfig::new(0, &["mp4", "mov"]))
            .with_sweep_interval(Duration::from_secs(10))
            .with_stop_grace(Duration::from_secs(30));

        assert_eq!(config.node_id, "node-7");
        assert_eq!(config.storage.database_url, "postgres://test/db");
        assert_eq!(config.render_agents[kinds::VIDEO].count, 0);
        assert_eq!(config.scheduler.sweep_interval_secs, 10);
        assert_eq!(config.scheduler.stop_grace_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_empty_node_id() {
        let config = PreviewConfig::default().with_node_id("");
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("node_id"));
    }

    #[test]
    fn test_validation_postgres_requires_url() {
        let config = PreviewConfig::default()
            .with_storage_engine(StorageEngine::Postgres)
            .with_database_url("");
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("database_url"));
    }

    #[test]
    fn test_validation_s3_requires_bucket() {
        let mut config = PreviewConfig::default();
        config.uploader.engine = UploaderEngine::S3;
        assert!(config.validate().unwrap_err().to_string().contains("bucket"));

        config.uploader.bucket = Some("previews".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_sweep_interval() {
        let config = PreviewConfig::default().with_sweep_interval(Duration::from_secs(0));
        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("sweep_interval_secs"));
    }

    #[test]
    fn test_validation_agent_without_file_types() {
        let config =
            PreviewConfig::default().with_render_agent("customRenderAgent", RenderAgentConfig::new(1, &[]));
        assert!(config.validate().unwrap_err().to_string().contains("customRenderAgent"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
node_id: node-a
storage:
  engine: redis
  redis_url: redis://cache:6379
render_agents:
  imageMagickRenderAgent:
    count: 8
    supported_file_types: [jpg, png]
templates:
  - id: custom-thumb
    renderAgent: imageMagickRenderAgent
    group: 4C96
    attributes:
      width: ["100"]
      height: ["100"]
scheduler:
  sweep_interval_secs: 2
"#
        )
        .unwrap();

        let config = PreviewConfig::from_file(file.path()).unwrap();
        assert_eq!(config.node_id, "node-a");
        assert_eq!(config.storage.engine, StorageEngine::Redis);
        assert_eq!(config.storage.key_prefix, "preview");
        assert_eq!(config.render_agents.len(), 1);
        assert_eq!(config.render_agents[kinds::IMAGE_MAGICK].count, 8);
        assert!(config.render_agents[kinds::IMAGE_MAGICK].enabled);
        assert_eq!(config.templates[0].width(), Some(100));
        assert_eq!(config.scheduler.sweep_interval_secs, 2);
        assert_eq!(config.scheduler.queue_capacity, 200);
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "storage: [not, a, map]").unwrap();
        assert!(matches!(
            PreviewConfig::from_file(file.path()),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_storage_engine_from_str() {
        assert_eq!("Postgres".parse::<StorageEngine>(), Ok(StorageEngine::Postgres));
        assert_eq!("redis".parse::<StorageEngine>(), Ok(StorageEngine::Redis));
        assert!("sqlite".parse::<StorageEngine>().is_err());
    }

    #[test]
    fn test_parse_env_helpers() {
        assert_eq!(parse_env_value::<usize>("12", "K").unwrap(), 12);
        assert!(matches!(
            parse_env_value::<usize>("x", "K"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(parse_env_bool("YES", "K").unwrap());
        assert!(!parse_env_bool("off", "K").unwrap());
        assert!(parse_env_bool("maybe", "K").is_err());
    }
}
