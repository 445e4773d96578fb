//! CLI 日志系统初始化
//!
//! 基于 `tracing-subscriber`。host 各 crate 使用显式传递的 `Logger`，
//! 其记录通过 [`TracingSink`] 转发到 tracing。

use crate::config::{LogConfig, HOST_TARGET};
use std::io;
use tracing_subscriber::{
    filter::Targets, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer,
};
use vmhost_log::{Level, LogSink, Record};

/// 日志输出格式
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// 彩色格式化（开发使用）
    Pretty,
    /// 紧凑格式
    Compact,
    /// JSON 格式（工具集成）
    Json,
}

/// 初始化日志系统，输出到 stderr（stdout 留给命令结果）
pub fn init(log_config: &LogConfig, format: LogFormat) {
    let targets = Targets::new()
        .with_default(log_config.global)
        .with_target(HOST_TARGET, log_config.level_for(HOST_TARGET))
        .with_target("vmhost_cli", log_config.global);

    let layer = create_format_layer(format, io::stderr).with_filter(targets);
    tracing_subscriber::registry().with(layer).init();
}

/// Create formatter layer based on format
fn create_format_layer<W, F>(format: LogFormat, make_writer: F) -> impl Layer<tracing_subscriber::Registry>
where
    W: io::Write + Send + Sync + 'static,
    F: Fn() -> W + Send + Sync + 'static,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_target(true)
            .with_timer(fmt::time::time())
            .with_writer(make_writer)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .without_time()
            .with_writer(make_writer)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_timer(fmt::time::time())
            .with_writer(make_writer)
            .boxed(),
    }
}

/// Forwards host log records to `tracing`, keeping the module path as a field
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, record: &Record) {
        let module = record.target;
        let message = record.message.as_str();
        match record.level {
            Level::Trace => tracing::trace!(target: "vmhost", module, "{}", message),
            Level::Debug => tracing::debug!(target: "vmhost", module, "{}", message),
            Level::Info => tracing::info!(target: "vmhost", module, "{}", message),
            Level::Warn => tracing::warn!(target: "vmhost", module, "{}", message),
            Level::Error => tracing::error!(target: "vmhost", module, "{}", message),
        }
    }
}
