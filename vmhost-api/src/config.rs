//! API 层配置
//!
//! `HostOptions` 把纯数据的 `HostConfig` 和显式传递的 logger 组合在一起。

use std::sync::Arc;
use vmhost_config::HostConfig;
use vmhost_log::Logger;

/// Everything an `Interpreter` is built from besides its collaborators
#[derive(Clone)]
pub struct HostOptions {
    pub config: HostConfig,
    pub logger: Arc<Logger>,
}

impl HostOptions {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            logger: Logger::noop(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<Logger>) -> Self {
        self.logger = logger;
        self
    }
}

impl std::fmt::Debug for HostOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostOptions")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for HostOptions {
    fn default() -> Self {
        Self::new(HostConfig::default())
    }
}

impl From<HostConfig> for HostOptions {
    fn from(config: HostConfig) -> Self {
        Self::new(config)
    }
}
