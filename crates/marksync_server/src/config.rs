use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 4040)
    pub port: u16,
    /// Database file path (default: ./marksync.db)
    pub database_path: PathBuf,
    /// Heartbeat ping interval in seconds (default: 20)
    pub heartbeat_interval_secs: u64,
    /// Read deadline in seconds; must exceed the heartbeat interval
    /// (default: 60)
    pub read_timeout_secs: u64,
    /// Deadline for a single socket write in seconds (default: 10)
    pub write_timeout_secs: u64,
    /// Per-session outbound queue capacity (default: 64)
    pub session_buffer: usize,
    /// Maximum serialized event payload in bytes (default: 65536)
    pub max_payload_bytes: usize,
    /// Days to keep delivered events before pruning (default: 30)
    pub retention_days: i64,
    /// CORS allowed origins (comma-separated)
    pub cors_origins: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "4040".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_path = PathBuf::from(
            env::var("DATABASE_PATH").unwrap_or_else(|_| "./marksync.db".to_string()),
        );

        let heartbeat_interval_secs = env::var("HEARTBEAT_INTERVAL_SECS")
            .unwrap_or_else(|_| "20".to_string())
            .parse()
            .unwrap_or(20);

        let read_timeout_secs = env::var("READ_TIMEOUT_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .unwrap_or(60);

        if read_timeout_secs <= heartbeat_interval_secs {
            return Err(ConfigError::HeartbeatExceedsReadTimeout);
        }

        let write_timeout_secs = env::var("WRITE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let session_buffer = env::var("SESSION_BUFFER")
            .unwrap_or_else(|_| "64".to_string())
            .parse()
            .unwrap_or(64);

        let max_payload_bytes = env::var("MAX_PAYLOAD_BYTES")
            .unwrap_or_else(|_| "65536".to_string())
            .parse()
            .unwrap_or(65536);

        let retention_days = env::var("EVENT_RETENTION_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config {
            host,
            port,
            database_path,
            heartbeat_interval_secs,
            read_timeout_secs,
            write_timeout_secs,
            session_buffer,
            max_payload_bytes,
            retention_days,
            cors_origins,
        })
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    HeartbeatExceedsReadTimeout,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "Invalid PORT environment variable"),
            ConfigError::HeartbeatExceedsReadTimeout => write!(
                f,
                "HEARTBEAT_INTERVAL_SECS must be shorter than READ_TIMEOUT_SECS"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
