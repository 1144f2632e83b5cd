//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - 服务监听地址
//! - JWT认证
//! - 数据库连接（可选，未配置时使用内存存储）
//! - 媒体文件存储
//! - 日志过滤
//!
//! 加载顺序：内置默认值 → YAML 配置文件 → `CHAT_` 前缀环境变量，
//! 嵌套字段使用 `__` 分隔，例如 `CHAT_JWT__SECRET`。

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// 默认配置文件路径，可通过 `CHAT_CONFIG` 覆盖
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务配置
    pub server: ServerConfig,
    /// JWT认证配置
    pub jwt: JwtConfig,
    /// 数据库配置
    pub database: DatabaseConfig,
    /// 媒体存储配置
    pub media: MediaConfig,
    /// 日志配置
    pub log: LogConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: "dev-secret-key-not-for-production-use-minimum-32-chars".to_string(),
            expiration_hours: 24,
        }
    }
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// 为空时使用内存存储
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

/// 媒体存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// 媒体文件根目录
    pub root: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            root: "media".to_string(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` 语法，`RUST_LOG` 存在时以其为准
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// 按默认值、配置文件、环境变量的顺序加载配置
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CHAT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::figment(&path).extract().map_err(ConfigError::from)
    }

    /// 构建配置来源，便于测试时替换
    pub fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("CHAT_").split("__"))
    }

    /// 监听地址
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 验证JWT密钥长度（至少256位/32字节）
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        if self.jwt.expiration_hours <= 0 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT expiration must be positive".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidServerConfig(
                "Server port must be greater than 0".to_string(),
            ));
        }

        if let Some(url) = &self.database.url {
            if url.trim().is_empty() {
                return Err(ConfigError::InvalidDatabaseConfig(
                    "Database URL cannot be empty".to_string(),
                ));
            }
        }

        // 验证连接数
        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidDatabaseConfig(
                "Max connections must be greater than 0".to_string(),
            ));
        }

        if self.media.root.trim().is_empty() {
            return Err(ConfigError::InvalidServerConfig(
                "Media root cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid database configuration: {0}")]
    InvalidDatabaseConfig(String),
    #[error("Invalid server configuration: {0}")]
    InvalidServerConfig(String),
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}
