use crate::errors::ConfigError;
use std::time::Duration;

type Result<T> = std::result::Result<T, ConfigError>;

/// HTTP server port configuration.
///
/// Wraps a u16 port number for the HTTP server. Provides type safety
/// and validation for port values.
#[derive(Clone, Debug)]
pub struct HttpPort(u16);

impl Default for HttpPort {
    fn default() -> Self {
        Self(8080)
    }
}

impl TryFrom<String> for HttpPort {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        let port = value
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPortNumber {
                port: value.clone(),
            })?;
        Ok(Self(port))
    }
}

impl AsRef<u16> for HttpPort {
    fn as_ref(&self) -> &u16 {
        &self.0
    }
}

/// Default timeout for outbound HTTP requests made by the service.
#[derive(Clone, Debug)]
pub struct HttpClientTimeout(Duration);

impl Default for HttpClientTimeout {
    fn default() -> Self {
        Self(Duration::from_secs(30))
    }
}

impl TryFrom<String> for HttpClientTimeout {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        let millis = value
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidTimeout {
                value: value.clone(),
            })?;

        if millis == 0 {
            return Err(ConfigError::InvalidTimeout { value });
        }

        Ok(Self(Duration::from_millis(millis)))
    }
}

impl AsRef<Duration> for HttpClientTimeout {
    fn as_ref(&self) -> &Duration {
        &self.0
    }
}

/// Bounded capacity of the in-memory execution work queue.
#[derive(Clone, Debug)]
pub struct QueueCapacity(usize);

impl Default for QueueCapacity {
    fn default() -> Self {
        Self(1000)
    }
}

impl TryFrom<String> for QueueCapacity {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        let capacity = value
            .parse::<usize>()
            .map_err(|_| ConfigError::InvalidNumber {
                details: format!("Invalid queue capacity: {}", value),
            })?;

        if capacity == 0 {
            return Err(ConfigError::InvalidNumber {
                details: "Queue capacity must be greater than 0".to_string(),
            });
        }

        Ok(Self(capacity))
    }
}

impl AsRef<usize> for QueueCapacity {
    fn as_ref(&self) -> &usize {
        &self.0
    }
}

/// Maximum number of executions processed concurrently by the worker pool.
#[derive(Clone, Debug)]
pub struct MaxConcurrent(usize);

impl Default for MaxConcurrent {
    fn default() -> Self {
        Self(10)
    }
}

impl TryFrom<String> for MaxConcurrent {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        let count = value
            .parse::<usize>()
            .map_err(|_| ConfigError::InvalidNumber {
                details: format!("Invalid worker concurrency: {}", value),
            })?;

        if count == 0 {
            return Err(ConfigError::InvalidNumber {
                details: "Worker concurrency must be greater than 0".to_string(),
            });
        }

        Ok(Self(count))
    }
}

impl AsRef<usize> for MaxConcurrent {
    fn as_ref(&self) -> &usize {
        &self.0
    }
}

/// Execution store backend selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Filesystem,
    Postgres,
}

impl Default for StoreBackend {
    fn default() -> Self {
        Self::Memory
    }
}

impl TryFrom<String> for StoreBackend {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "filesystem" => Ok(Self::Filesystem),
            "postgres" => Ok(Self::Postgres),
            _ => Err(ConfigError::InvalidStoreBackend { value }),
        }
    }
}

/// Service configuration loaded from environment variables.
#[derive(Clone, Debug)]
pub struct Config {
    /// Service version, compiled in.
    pub version: String,

    /// HTTP server port (`HTTP_PORT`).
    pub http_port: HttpPort,

    /// Default outbound HTTP timeout (`HTTP_CLIENT_TIMEOUT_MS`).
    pub http_client_timeout: HttpClientTimeout,

    /// Allowed CORS origin (`EXTERNAL_BASE`).
    pub external_base: String,

    /// Execution work queue capacity (`EXECUTION_QUEUE_CAPACITY`).
    pub queue_capacity: QueueCapacity,

    /// Worker pool concurrency (`EXECUTION_MAX_CONCURRENT`).
    pub max_concurrent: MaxConcurrent,

    /// In-execution stage retry budget (`EXECUTION_MAX_RETRIES`).
    pub max_retries: u32,

    /// Initial stage retry delay in milliseconds (`EXECUTION_RETRY_DELAY_MS`).
    pub retry_delay_ms: u64,

    /// Default per-stage timeout in milliseconds (`EXECUTION_DEFAULT_TIMEOUT_MS`),
    /// used when a task does not configure its own.
    pub default_stage_timeout_ms: u64,

    /// Execution store backend (`STORE_BACKEND`: memory, filesystem, postgres).
    pub store_backend: StoreBackend,

    /// Base directory for the filesystem store (`STORE_DIRECTORY`).
    pub store_directory: Option<String>,

    /// PostgreSQL connection string (`DATABASE_URL`), required for the
    /// postgres store backend.
    pub database_url: Option<String>,

    /// Project API base URL (`PROJECT_API_BASE`).
    pub project_api_base: String,

    /// Project plugin credentials (`PROJECT_PLUGIN_ID` / `PROJECT_PLUGIN_SECRET`).
    pub project_plugin_id: String,
    pub project_plugin_secret: String,

    /// Operator user key sent with project API requests (`PROJECT_USER_KEY`).
    pub project_user_key: String,

    /// Path to the JSON file holding task, model, and credential
    /// configuration (`TASKS_FILE`).
    pub tasks_file: Option<String>,
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| ConfigError::EnvVarRequired {
        var_name: name.to_string(),
    })
}

fn default_env(name: &str, default_value: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default_value.to_string())
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl Config {
    pub fn new() -> Result<Self> {
        let version = option_env!("CARGO_PKG_VERSION")
            .unwrap_or("dev")
            .to_string();

        let http_port = optional_env("HTTP_PORT")
            .map(HttpPort::try_from)
            .transpose()?
            .unwrap_or_default();

        let http_client_timeout = optional_env("HTTP_CLIENT_TIMEOUT_MS")
            .map(HttpClientTimeout::try_from)
            .transpose()?
            .unwrap_or_default();

        let external_base = default_env("EXTERNAL_BASE", "http://localhost:8080");

        let queue_capacity = optional_env("EXECUTION_QUEUE_CAPACITY")
            .map(QueueCapacity::try_from)
            .transpose()?
            .unwrap_or_default();

        let max_concurrent = optional_env("EXECUTION_MAX_CONCURRENT")
            .map(MaxConcurrent::try_from)
            .transpose()?
            .unwrap_or_default();

        let max_retries = default_env("EXECUTION_MAX_RETRIES", "3")
            .parse::<u32>()
            .map_err(|e| ConfigError::InvalidNumber {
                details: format!("Invalid EXECUTION_MAX_RETRIES: {}", e),
            })?;

        let retry_delay_ms = default_env("EXECUTION_RETRY_DELAY_MS", "1000")
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidNumber {
                details: format!("Invalid EXECUTION_RETRY_DELAY_MS: {}", e),
            })?;

        let default_stage_timeout_ms = default_env("EXECUTION_DEFAULT_TIMEOUT_MS", "30000")
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidTimeout {
                value: e.to_string(),
            })?;

        let store_backend = optional_env("STORE_BACKEND")
            .map(StoreBackend::try_from)
            .transpose()?
            .unwrap_or_default();

        let store_directory = optional_env("STORE_DIRECTORY");
        let database_url = optional_env("DATABASE_URL");

        let project_api_base = default_env("PROJECT_API_BASE", "https://project.feishu.cn");
        let project_plugin_id = require_env("PROJECT_PLUGIN_ID")?;
        let project_plugin_secret = require_env("PROJECT_PLUGIN_SECRET")?;
        let project_user_key = require_env("PROJECT_USER_KEY")?;

        let tasks_file = optional_env("TASKS_FILE");

        let config = Self {
            version,
            http_port,
            http_client_timeout,
            external_base,
            queue_capacity,
            max_concurrent,
            max_retries,
            retry_delay_ms,
            default_stage_timeout_ms,
            store_backend,
            store_directory,
            database_url,
            project_api_base,
            project_plugin_id,
            project_plugin_secret,
            project_user_key,
            tasks_file,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store_backend == StoreBackend::Postgres && self.database_url.is_none() {
            return Err(ConfigError::EnvVarRequired {
                var_name: "DATABASE_URL".to_string(),
            });
        }

        if self.store_backend == StoreBackend::Filesystem && self.store_directory.is_none() {
            return Err(ConfigError::EnvVarRequired {
                var_name: "STORE_DIRECTORY".to_string(),
            });
        }

        if self.default_stage_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout {
                value: "0".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_port_parsing() {
        let port = HttpPort::try_from("9000".to_string()).unwrap();
        assert_eq!(*port.as_ref(), 9000);

        assert!(HttpPort::try_from("not-a-port".to_string()).is_err());
        assert!(HttpPort::try_from("70000".to_string()).is_err());
    }

    #[test]
    fn test_http_client_timeout_parsing() {
        let timeout = HttpClientTimeout::try_from("5000".to_string()).unwrap();
        assert_eq!(*timeout.as_ref(), Duration::from_millis(5000));

        assert!(HttpClientTimeout::try_from("0".to_string()).is_err());
        assert!(HttpClientTimeout::try_from("soon".to_string()).is_err());
    }

    #[test]
    fn test_queue_capacity_parsing() {
        let capacity = QueueCapacity::try_from("250".to_string()).unwrap();
        assert_eq!(*capacity.as_ref(), 250);

        assert!(QueueCapacity::try_from("0".to_string()).is_err());
    }

    #[test]
    fn test_max_concurrent_parsing() {
        let concurrent = MaxConcurrent::try_from("4".to_string()).unwrap();
        assert_eq!(*concurrent.as_ref(), 4);

        assert!(MaxConcurrent::try_from("0".to_string()).is_err());
    }

    #[test]
    fn test_store_backend_parsing() {
        assert_eq!(
            StoreBackend::try_from("memory".to_string()).unwrap(),
            StoreBackend::Memory
        );
        assert_eq!(
            StoreBackend::try_from("Filesystem".to_string()).unwrap(),
            StoreBackend::Filesystem
        );
        assert_eq!(
            StoreBackend::try_from("POSTGRES".to_string()).unwrap(),
            StoreBackend::Postgres
        );
        assert!(StoreBackend::try_from("redis".to_string()).is_err());
    }
}
