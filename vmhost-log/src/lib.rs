//! vmhost-log - 结构化日志系统
//!
//! Logging for the VM host, built around three rules:
//! - **显式传递**: there is no global logger; an `Arc<Logger>` travels with
//!   the configuration of every component that logs.
//! - **非阻塞**: sinks never block the caller for long; the ring buffer
//!   overwrites its oldest record when full.
//! - **可捕获**: `LogRingBuffer` keeps the last N records so tests and crash
//!   reports can inspect what the host did.
//!
//! # 快速开始
//!
//! ```
//! use vmhost_log::{debug, Level, LogRingBuffer, Logger};
//!
//! let ring = LogRingBuffer::new(64);
//! let logger = Logger::new(Level::Debug).with_sink(ring.clone());
//! debug!(logger, "fetching {}", "pypy.vm.js");
//! assert_eq!(ring.len(), 1);
//! ```

mod logger;
mod macros;
mod record;
mod ring_buffer;

pub use logger::{LogSink, Logger, StderrSink, StdoutSink};
pub use record::{Level, Record};
pub use ring_buffer::{LogRingBuffer, RingBufferStats};

/// 日志系统错误类型
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Level name that does not map to a `Level`
    #[error("unknown log level '{0}'")]
    UnknownLevel(String),
}
