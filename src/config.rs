//! 配置管理模块
//! 支持从环境变量和配置文件加载配置

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::service::transaction_retry::RetryPolicy;

/// 应用配置结构体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 批量派发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub batch_size: usize,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub attempt_timeout_secs: u64,
}

/// RPC 网络配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub validation_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// 开启后，节点自报的 chain id 与目录不符时拒绝该节点
    pub strict_chain_id: bool,
    /// 自定义链目录（TOML，可选）
    #[serde(default)]
    pub chains_file: Option<String>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
    pub enable_file_logging: bool,
    pub log_file_path: Option<String>,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: env_parse("DISPERSE_BATCH_SIZE").unwrap_or(5),
            max_attempts: env_parse("DISPERSE_MAX_ATTEMPTS").unwrap_or(3),
            retry_base_delay_ms: env_parse("DISPERSE_RETRY_BASE_DELAY_MS").unwrap_or(1000),
            attempt_timeout_secs: env_parse("DISPERSE_ATTEMPT_TIMEOUT_SECS").unwrap_or(30),
        }
    }
}

impl DispatchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_secs(self.attempt_timeout_secs),
        )
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            validation_timeout_secs: env_parse("RPC_VALIDATION_TIMEOUT_SECS").unwrap_or(10),
            request_timeout_secs: env_parse("RPC_REQUEST_TIMEOUT_SECS").unwrap_or(10),
            strict_chain_id: env_flag("RPC_STRICT_CHAIN_ID").unwrap_or(false),
            chains_file: std::env::var("DISPERSE_CHAINS_FILE").ok(),
        }
    }
}

impl NetworkConfig {
    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
            enable_file_logging: env_flag("LOG_FILE_ENABLED").unwrap_or(false),
            log_file_path: std::env::var("LOG_FILE_PATH").ok(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            network: NetworkConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        Ok(Self::default())
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// 从环境变量和配置文件合并加载（配置文件优先级更高）
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = Self::from_env()?;

        if let Some(path) = path {
            if path.as_ref().exists() {
                config = Self::from_file(path)?;
            }
        }

        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.batch_size == 0 {
            anyhow::bail!("DISPERSE_BATCH_SIZE must be at least 1");
        }

        if self.dispatch.max_attempts == 0 {
            anyhow::bail!("DISPERSE_MAX_ATTEMPTS must be at least 1");
        }

        if self.dispatch.attempt_timeout_secs == 0
            || self.network.validation_timeout_secs == 0
            || self.network.request_timeout_secs == 0
        {
            anyhow::bail!("timeouts must be greater than zero");
        }

        // 单端点超时必须短于单次尝试超时，否则卡住的端点会耗尽整次尝试
        if self.network.request_timeout_secs >= self.dispatch.attempt_timeout_secs {
            anyhow::bail!(
                "RPC_REQUEST_TIMEOUT_SECS ({}) must be less than DISPERSE_ATTEMPT_TIMEOUT_SECS ({})",
                self.network.request_timeout_secs,
                self.dispatch.attempt_timeout_secs
            );
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("LOG_LEVEL must be one of: {:?}", valid_levels);
        }

        if self.logging.format != "json" && self.logging.format != "text" {
            anyhow::bail!("LOG_FORMAT must be 'json' or 'text'");
        }

        Ok(())
    }
}
