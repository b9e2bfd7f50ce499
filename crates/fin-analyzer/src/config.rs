//! Configuration for the analysis service

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable naming an optional TOML config file
pub const CONFIG_PATH_ENV: &str = "FIN_ANALYZER_CONFIG";

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Broker and result backend configuration
    pub broker: BrokerConfig,
    /// Worker pool configuration
    pub worker: WorkerConfig,
    /// Upload storage configuration
    pub storage: StorageConfig,
    /// Ollama/LLM configuration
    pub llm: LlmConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Maximum upload size in bytes (default: 50MB)
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_size: 50 * 1024 * 1024,
        }
    }
}

/// Which broker implementation backs the job queue
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackend {
    /// In-process queue; API and workers must share one process
    #[default]
    Memory,
    /// Redis lists and keys (requires the `redis` feature)
    Redis,
}

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub backend: BrokerBackend,
    /// Connection endpoint for networked brokers
    pub url: String,
    /// How long terminal results stay queryable, in seconds
    pub result_ttl_secs: u64,
    /// How often expired results are purged, in seconds
    pub reaper_interval_secs: u64,
    /// Unacknowledged deliveries older than this are redelivered, in seconds
    pub visibility_timeout_secs: u64,
    /// Key prefix for networked brokers
    pub namespace: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: BrokerBackend::Memory,
            url: "redis://localhost:6379/0".to_string(),
            result_ttl_secs: 3600,
            reaper_interval_secs: 60,
            visibility_timeout_secs: 3600,
            namespace: "fin-analyzer".to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs.max(1))
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of workers; each runs one job at a time (default: CPU count, max 4)
    pub count: usize,
    /// Retries after the first failed attempt
    pub max_retries: u32,
    /// Fixed delay between attempts, in seconds
    pub retry_delay_secs: u64,
    /// Upper bound for a single analysis call, in seconds (None = unbounded)
    pub analysis_timeout_secs: Option<u64>,
    /// Also retry errors classified as permanent
    pub retry_permanent_failures: bool,
    /// How long a claim waits for a message before re-checking shutdown, in seconds
    pub claim_wait_secs: u64,
    /// Run workers inside the API process
    pub embedded: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: num_cpus::get().min(4),
            max_retries: 2,
            retry_delay_secs: 15,
            analysis_timeout_secs: Some(600),
            retry_permanent_failures: false,
            claim_wait_secs: 5,
            embedded: true,
        }
    }
}

impl WorkerConfig {
    /// Total attempts including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn analysis_timeout(&self) -> Option<Duration> {
        self.analysis_timeout_secs.map(Duration::from_secs)
    }

    pub fn claim_wait(&self) -> Duration {
        Duration::from_secs(self.claim_wait_secs.max(1))
    }

    /// Longest a single job can legitimately stay unacknowledged
    pub fn worst_case_job_duration(&self) -> Option<Duration> {
        let per_attempt = self.analysis_timeout()? + self.retry_delay();
        Some(per_attempt * self.max_attempts())
    }
}

/// Upload storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Working directory for uploaded documents
    pub upload_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("data"),
        }
    }
}

/// LLM (Ollama) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Ollama base URL
    pub base_url: String,
    /// Generation model name
    pub model: String,
    /// Temperature for generation
    pub temperature: f32,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Document characters included in the prompt
    pub max_document_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1:8b".to_string(),
            temperature: 0.1,
            timeout_secs: 300,
            max_document_chars: 24_000,
        }
    }
}

impl AnalyzerConfig {
    /// Load configuration: defaults, then an optional TOML file, then environment
    ///
    /// The file is `path` if given, else `$FIN_ANALYZER_CONFIG` if set.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(env_path) {
            Some(file) => Self::from_file(&file)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file; missing sections keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Override settings from environment-style lookups
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("BROKER_URL").or_else(|| lookup("REDIS_URL")) {
            self.broker.url = url;
        }
        if let Some(backend) = lookup("BROKER_BACKEND") {
            self.broker.backend = match backend.to_lowercase().as_str() {
                "memory" => BrokerBackend::Memory,
                "redis" => BrokerBackend::Redis,
                other => {
                    return Err(Error::Config(format!("Unknown broker backend: {}", other)))
                }
            };
        }
        if let Some(v) = lookup("RESULT_TTL_SECS") {
            self.broker.result_ttl_secs = parse_env("RESULT_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("VISIBILITY_TIMEOUT_SECS") {
            self.broker.visibility_timeout_secs = parse_env("VISIBILITY_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("MAX_RETRIES") {
            self.worker.max_retries = parse_env("MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("RETRY_DELAY_SECS") {
            self.worker.retry_delay_secs = parse_env("RETRY_DELAY_SECS", &v)?;
        }
        if let Some(v) = lookup("WORKER_COUNT") {
            self.worker.count = parse_env("WORKER_COUNT", &v)?;
        }
        if let Some(v) = lookup("ANALYSIS_TIMEOUT_SECS") {
            let secs: u64 = parse_env("ANALYSIS_TIMEOUT_SECS", &v)?;
            self.worker.analysis_timeout_secs = (secs > 0).then_some(secs);
        }
        if let Some(v) = lookup("UPLOAD_DIR") {
            self.storage.upload_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("OLLAMA_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = lookup("OLLAMA_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = lookup("HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("PORT") {
            self.server.port = parse_env("PORT", &v)?;
        }
        Ok(())
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.worker.count == 0 {
            return Err(Error::Config("worker.count must be at least 1".to_string()));
        }
        if self.broker.result_ttl_secs == 0 {
            return Err(Error::Config("broker.result_ttl_secs must be positive".to_string()));
        }
        if self.broker.visibility_timeout_secs == 0 {
            return Err(Error::Config(
                "broker.visibility_timeout_secs must be positive".to_string(),
            ));
        }
        if self.server.max_upload_size == 0 {
            return Err(Error::Config("server.max_upload_size must be positive".to_string()));
        }
        if self.broker.backend == BrokerBackend::Redis && !cfg!(feature = "redis") {
            return Err(Error::Config(
                "Redis broker selected but the redis feature is not enabled. \
                 Rebuild with --features redis"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("Invalid value for {}: {:?}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_service_contract() {
        let config = AnalyzerConfig::default();
        assert_eq!(config.broker.result_ttl_secs, 3600);
        assert_eq!(config.broker.url, "redis://localhost:6379/0");
        assert_eq!(config.worker.max_retries, 2);
        assert_eq!(config.worker.max_attempts(), 3);
        assert_eq!(config.worker.retry_delay(), Duration::from_secs(15));
        assert!(config.worker.count >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AnalyzerConfig::from_toml(
            r#"
            [worker]
            max_retries = 5

            [storage]
            upload_dir = "/tmp/uploads"
            "#,
        )
        .unwrap();
        assert_eq!(config.worker.max_retries, 5);
        assert_eq!(config.worker.retry_delay_secs, 15);
        assert_eq!(config.storage.upload_dir, PathBuf::from("/tmp/uploads"));
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("REDIS_URL", "redis://cache:6380/1"),
            ("RESULT_TTL_SECS", "60"),
            ("MAX_RETRIES", "0"),
            ("RETRY_DELAY_SECS", "1"),
            ("ANALYSIS_TIMEOUT_SECS", "0"),
            ("PORT", "9000"),
        ]
        .into_iter()
        .collect();

        let mut config = AnalyzerConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.broker.url, "redis://cache:6380/1");
        assert_eq!(config.broker.result_ttl_secs, 60);
        assert_eq!(config.worker.max_attempts(), 1);
        assert_eq!(config.worker.retry_delay_secs, 1);
        assert_eq!(config.worker.analysis_timeout(), None);
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = AnalyzerConfig::default();
        let err = config
            .apply_env(|k| (k == "MAX_RETRIES").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("MAX_RETRIES"));
    }

    #[test]
    fn test_worst_case_job_duration() {
        let mut worker = WorkerConfig::default();
        // 3 attempts of (600s analysis + 15s delay)
        assert_eq!(worker.worst_case_job_duration(), Some(Duration::from_secs(1845)));
        assert!(BrokerConfig::default().visibility_timeout() > Duration::from_secs(1845));

        worker.analysis_timeout_secs = None;
        assert_eq!(worker.worst_case_job_duration(), None);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = AnalyzerConfig::default();
        config.worker.count = 0;
        assert!(config.validate().is_err());
    }
}
