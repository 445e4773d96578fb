//! CLI 配置
//!
//! 日志配置，以及可选的 host.json

use std::path::{Path, PathBuf};
use tracing::Level;
use vmhost_config::HostConfig;

/// 默认配置文件名
pub const DEFAULT_CONFIG: &str = "host.json";

/// Target the host logger's records are forwarded under
pub const HOST_TARGET: &str = "vmhost";

/// CLI 日志配置
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub global: Level,
    /// Records of the host crates (`--host-log-level`); falls back to `global`
    pub host: Option<Level>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            global: Level::WARN,
            host: None,
        }
    }
}

impl LogConfig {
    pub fn new(level: vmhost_log::Level, host: Option<vmhost_log::Level>) -> Self {
        Self {
            global: tracing_level(level),
            host: host.map(tracing_level),
        }
    }

    /// Get log level for a specific target
    pub fn level_for(&self, target: &str) -> Level {
        match target {
            HOST_TARGET => self.host.unwrap_or(self.global),
            _ => self.global,
        }
    }
}

pub fn tracing_level(level: vmhost_log::Level) -> Level {
    match level {
        vmhost_log::Level::Trace => Level::TRACE,
        vmhost_log::Level::Debug => Level::DEBUG,
        vmhost_log::Level::Info => Level::INFO,
        vmhost_log::Level::Warn => Level::WARN,
        vmhost_log::Level::Error => Level::ERROR,
    }
}

/// Read the host configuration.
///
/// Without `--config`, a missing `./host.json` means defaults. A relative
/// `root` is taken relative to the directory of the config file.
pub fn load_host_config(path: Option<&Path>) -> Result<HostConfig, String> {
    let (path, explicit) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG), false),
    };

    if !path.exists() {
        if explicit {
            return Err(format!("未找到 '{}'", path.display()));
        }
        return Ok(HostConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("无法读取 '{}': {}", path.display(), e))?;
    let mut config: HostConfig = serde_json::from_str(&content)
        .map_err(|e| format!("解析 '{}' 失败: {}", path.display(), e))?;

    if Path::new(&config.root).is_relative() {
        let base_dir = path.parent().unwrap_or(Path::new("."));
        config.root = base_dir.join(&config.root).to_string_lossy().into_owned();
    }
    Ok(config)
}
