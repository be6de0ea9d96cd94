use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::Path, path::PathBuf};
use tracing::{debug, info};

use crate::error::{NexaError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Absolute prefix of task self links
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
    #[serde(default = "default_cursor_ttl")]
    pub cursor_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_script_directory")]
    pub script_directory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_dir")]
    pub directory: PathBuf,
    #[serde(default = "default_true")]
    pub file: bool,
    #[serde(default = "default_true")]
    pub console: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            pagination: PaginationConfig::default(),
            provisioning: ProvisioningConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: default_base_url(),
        }
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            cursor_ttl_secs: default_cursor_ttl(),
        }
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
            attempt_timeout_secs: default_attempt_timeout(),
            script_directory: default_script_directory(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: default_log_dir(),
            file: default_true(),
            console: default_true(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_base_url() -> String {
    format!("http://{}:{}", default_host(), default_port())
}

fn default_page_size() -> usize {
    10
}

fn default_max_page_size() -> usize {
    100
}

fn default_cursor_ttl() -> u64 {
    600
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    500
}

fn default_attempt_timeout() -> u64 {
    120
}

fn default_script_directory() -> String {
    "/etc/nexa-clusters/scripts".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_true() -> bool {
    true
}

impl ApiConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl PaginationConfig {
    /// Resolve a requested page size, falling back to the default.
    pub fn resolve_page_size(&self, requested: Option<usize>) -> Result<usize> {
        let size = requested.unwrap_or(self.default_page_size);
        if size < 1 || size > self.max_page_size {
            return Err(NexaError::InvalidPageSize {
                requested: size,
                min: 1,
                max: self.max_page_size,
            });
        }
        Ok(size)
    }

    pub fn cursor_ttl(&self) -> Duration {
        Duration::from_secs(self.cursor_ttl_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_page_size == 0 || self.max_page_size == 0 {
            return Err(NexaError::Config("page sizes must be positive".to_string()));
        }
        if self.default_page_size > self.max_page_size {
            return Err(NexaError::Config(format!(
                "default page size {} exceeds max page size {}",
                self.default_page_size, self.max_page_size
            )));
        }
        Ok(())
    }
}

impl ProvisioningConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(NexaError::Config("worker count must be positive".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(NexaError::Config("max attempts must be positive".to_string()));
        }
        if self.attempt_timeout_secs == 0 {
            return Err(NexaError::Config("attempt timeout must be positive".to_string()));
        }
        Ok(())
    }
}

impl ServerConfig {
    /// Candidate config files, first match wins
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.yml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("nexa-clusters/config.yml"));
        }
        paths.push(PathBuf::from("/etc/nexa-clusters/config.yml"));
        paths
    }

    /// Load from the first existing search path, or defaults when none exists.
    pub fn load() -> Result<Self> {
        for path in Self::search_paths() {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }
        debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| NexaError::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| NexaError::Config(format!("Failed to parse config file {}: {}", path.display(), e)))?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| NexaError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| NexaError::Config(format!("Failed to create config directory: {}", e)))?;
            }
        }

        // Write atomically using a temporary file
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, yaml).map_err(|e| NexaError::Config(format!("Failed to write config: {}", e)))?;
        fs::rename(&temp_path, path).map_err(|e| NexaError::Config(format!("Failed to save config: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.pagination.validate()?;
        self.provisioning.validate()?;
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(NexaError::Config(format!(
                "base url '{}' must be absolute",
                self.api.base_url
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.pagination.default_page_size, 10);
        assert_eq!(config.pagination.max_page_size, 100);
        assert_eq!(config.provisioning.max_attempts, 3);
        assert!(config.provisioning.worker_count >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_page_size() {
        let pagination = PaginationConfig::default();
        assert_eq!(pagination.resolve_page_size(None).unwrap(), 10);
        assert_eq!(pagination.resolve_page_size(Some(100)).unwrap(), 100);
        let err = pagination.resolve_page_size(Some(200)).unwrap_err();
        assert_eq!(err.to_string(), "The page size '200' is not between '1' and '100'");
        assert!(pagination.resolve_page_size(Some(0)).is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: ServerConfig = serde_yaml::from_str("pagination:\n  max_page_size: 50\n").unwrap();
        assert_eq!(config.pagination.max_page_size, 50);
        assert_eq!(config.pagination.default_page_size, 10);
        assert_eq!(config.api.port, 9000);
    }

    #[test]
    fn test_inconsistent_pagination_rejected() {
        let mut config = ServerConfig::default();
        config.pagination.default_page_size = 20;
        config.pagination.max_page_size = 5;
        assert!(matches!(config.validate(), Err(NexaError::Config(_))));
    }
}
