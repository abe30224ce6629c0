//! 传输配置和持久化
//!
//! 配置文件位于 `<config_dir>/filetransfer/config.toml`，缺失或无法解析时使用默认值。

use crate::logging::LogLevel;
use crate::transfer::url::DEFAULT_SCHEMES;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 默认分块大小 (8 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// 传输配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// 上传时每块的最大字节数
    pub chunk_size: usize,
    /// 允许的 URL 协议
    pub allowed_schemes: Vec<String>,
    /// 是否接受无效的 TLS 证书（自签名服务器）
    pub accept_invalid_certs: bool,
    /// 是否使用系统代理设置
    pub use_system_proxy: bool,
    pub user_agent: String,
    /// 每个传输的事件通道容量
    pub event_buffer: usize,
    /// 日志级别
    pub log_level: LogLevel,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            allowed_schemes: DEFAULT_SCHEMES.iter().map(ToString::to_string).collect(),
            accept_invalid_certs: false,
            use_system_proxy: true,
            user_agent: format!("filetransfer/{}", env!("CARGO_PKG_VERSION")),
            event_buffer: 32,
            log_level: LogLevel::Info,
        }
    }
}

impl TransferConfig {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("filetransfer");
        config_dir.join("config.toml")
    }

    /// 从默认位置加载配置
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// 加载配置（如果文件不存在则使用默认值）
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<Self>(&content) {
                    Ok(config) => {
                        debug!("Loaded config from {:?}", path);
                        return config.sanitized();
                    }
                    Err(e) => {
                        log::warn!("Failed to parse config: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read config file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存到默认位置
    pub fn save(&self) -> anyhow::Result<PathBuf> {
        let path = Self::config_path();
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        debug!("Saved config to {:?}", path);
        Ok(())
    }

    /// 修正不合法的取值
    pub fn sanitized(mut self) -> Self {
        self.chunk_size = self.chunk_size.max(1);
        self.event_buffer = self.event_buffer.max(1);
        if self.allowed_schemes.is_empty() {
            self.allowed_schemes = Self::default().allowed_schemes;
        }
        self
    }
}
