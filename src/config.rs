use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Analyzer connection settings
    pub server: ServerConfig,

    /// Frame sampling and backpressure settings
    pub streaming: StreamingConfig,

    /// Angle chart settings
    pub chart: ChartConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Analyzer address to connect to
    pub address: String,

    /// Analyzer port
    pub port: u16,

    /// TLS server name presented during the handshake
    pub server_name: String,

    /// Connection timeout
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub connection_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Sampling period while a video file is the active source
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub video_sampling_period: Duration,

    /// Sampling period while the camera is the active source
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub camera_sampling_period: Duration,

    /// How long an unanswered frame may block the pipeline before the
    /// watchdog force-releases it
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub watchdog_timeout: Duration,

    /// Cap on the longer spatial dimension of an encoded frame
    pub max_frame_dimension: u32,

    /// Mirror camera frames horizontally before encoding (selfie view)
    pub mirror_camera: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartConfig {
    /// Push every Nth angle sample to the chart sink
    pub angle_downsample: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            streaming: StreamingConfig::default(),
            chart: ChartConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 4433,
            server_name: "localhost".to_string(),
            connection_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            // Empirically chosen periods: bound bandwidth while keeping the
            // feed perceptibly real-time.
            video_sampling_period: Duration::from_millis(40),
            camera_sampling_period: Duration::from_millis(50),
            watchdog_timeout: Duration::from_millis(1000),
            max_frame_dimension: 480,
            mirror_camera: true,
        }
    }
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self { angle_downsample: 3 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn server_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.server.address, self.server.port)
            .parse()
            .map_err(|e| ConfigError::Invalid {
                message: format!("Invalid server address: {}", e),
            })
    }
}

/// Configuration manager for loading, saving, and validating configurations
pub struct ConfigManager {
    config_path: PathBuf,
    config: AppConfig,
}

impl ConfigManager {
    /// Create a new configuration manager
    pub fn new(config_path: PathBuf) -> Self {
        Self {
            config_path,
            config: AppConfig::default(),
        }
    }

    /// Load configuration from file, creating a default file if none exists
    pub async fn load(&mut self) -> Result<(), ConfigError> {
        if !self.config_path.exists() {
            self.save().await?;
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&self.config_path).await?;
        self.config = toml::from_str(&content)?;
        self.validate()?;
        Ok(())
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(&self.config)?;

        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        tokio::fs::write(&self.config_path, content).await?;
        Ok(())
    }

    /// Get the current configuration
    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    /// Get a mutable reference to the configuration
    pub fn get_config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let config = &self.config;

        if config.server.address.is_empty() {
            return Err(ConfigError::Invalid {
                message: "Server address cannot be empty".to_string(),
            });
        }

        if config.server.port == 0 {
            return Err(ConfigError::Invalid {
                message: "Server port must be greater than 0".to_string(),
            });
        }

        if config.streaming.video_sampling_period.is_zero()
            || config.streaming.camera_sampling_period.is_zero()
        {
            return Err(ConfigError::Invalid {
                message: "Sampling periods must be greater than 0".to_string(),
            });
        }

        if config.streaming.watchdog_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                message: "Watchdog timeout must be greater than 0".to_string(),
            });
        }

        if config.streaming.max_frame_dimension == 0 {
            return Err(ConfigError::Invalid {
                message: "Max frame dimension must be greater than 0".to_string(),
            });
        }

        if config.chart.angle_downsample == 0 {
            return Err(ConfigError::Invalid {
                message: "Chart downsample factor must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Environment-based configuration override
pub struct EnvConfigOverride;

impl EnvConfigOverride {
    /// Apply environment variable overrides to configuration
    pub fn apply_overrides(config: &mut AppConfig) {
        use std::env;

        if let Ok(addr) = env::var("MOTION_CLIENT_SERVER_ADDRESS") {
            config.server.address = addr;
        }
        if let Ok(port) = env::var("MOTION_CLIENT_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.server.port = port;
            }
        }

        if let Ok(timeout) = env::var("MOTION_CLIENT_WATCHDOG_MS") {
            if let Ok(millis) = timeout.parse::<u64>() {
                config.streaming.watchdog_timeout = Duration::from_millis(millis);
            }
        }

        if let Ok(level) = env::var("MOTION_CLIENT_LOG_LEVEL") {
            config.logging.level = level;
        }
    }
}
