//! API 错误类型
//!
//! 启动失败（`BootError`）对实例是终结性的；单次调用的失败（`HostError`）只影响该调用。

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use vmhost_core::{IndexError, LoadError, TransportError, VmError};
use vmhost_vfs::VfsError;

/// Text could not be placed in VM linear memory
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarshalError {
    #[error("text contains a NUL byte at offset {0}")]
    InteriorNul(usize),

    #[error("VM could not allocate {0} bytes")]
    Allocation(usize),
}

/// A stage of the readiness pipeline failed
#[derive(Error, Debug)]
pub enum BootError {
    #[error("fetching VM payload: {0}")]
    Payload(#[source] TransportError),

    #[error("linking VM payload: {0}")]
    Link(#[source] VmError),

    #[error("fetching memory initializer '{path}': {source}")]
    MemoryInitFetch {
        path: String,
        #[source]
        source: TransportError,
    },

    #[error("applying memory initializer: {0}")]
    MemoryInit(#[source] VmError),

    #[error("initializing filesystem: {0}")]
    Filesystem(#[source] VmError),

    #[error("creating search directory '{path}': {source}")]
    SearchDir {
        path: String,
        #[source]
        source: VfsError,
    },

    #[error("starting VM: {0}")]
    Startup(#[source] VmError),

    #[error("marshaling startup text: {0}")]
    Marshal(#[from] MarshalError),

    #[error("setting home path failed with status {0}")]
    Home(i32),

    #[error("bootstrap snippet failed with status {0}")]
    Bootstrap(i32),

    #[error("fetching module index: {0}")]
    IndexFetch(#[source] TransportError),

    #[error("parsing module index: {0}")]
    Index(#[source] IndexError),

    #[error("installing eager module '{module}': {source}")]
    Eager {
        module: String,
        #[source]
        source: VfsError,
    },

    /// 启动 future 在完成前被丢弃
    #[error("boot was interrupted before it finished")]
    Interrupted,
}

impl BootError {
    /// Pipeline stage the error belongs to
    pub fn stage(&self) -> &'static str {
        match self {
            BootError::Payload(_) => "fetching",
            BootError::Link(_) | BootError::MemoryInitFetch { .. } | BootError::MemoryInit(_) => {
                "linking"
            }
            BootError::Filesystem(_) | BootError::SearchDir { .. } => "initializing_filesystem",
            BootError::Startup(_)
            | BootError::Marshal(_)
            | BootError::Home(_)
            | BootError::Bootstrap(_) => "running_startup",
            BootError::IndexFetch(_) | BootError::Index(_) => "fetching_index",
            BootError::Eager { .. } => "installing_eager",
            BootError::Interrupted => "interrupted",
        }
    }
}

/// Error of one `Interpreter` call
#[derive(Error, Debug, Clone)]
pub enum HostError {
    /// 启动失败后所有调用都返回这个
    #[error("interpreter is not ready: {0}")]
    NotReady(Arc<BootError>),

    #[error("could not allocate {bytes} bytes of VM memory")]
    Allocation { bytes: usize },

    #[error("text contains a NUL byte at offset {offset}")]
    InteriorNul { offset: usize },

    #[error("execution failed with status {status}")]
    Execution { status: i32 },

    #[error("no value was delivered for '{0}'")]
    MissingResult(String),

    #[error("{0} requires the full-language variant")]
    Unsupported(&'static str),

    #[error(transparent)]
    Load(#[from] LoadError),
}

impl From<MarshalError> for HostError {
    fn from(err: MarshalError) -> Self {
        match err {
            MarshalError::InteriorNul(offset) => HostError::InteriorNul { offset },
            MarshalError::Allocation(bytes) => HostError::Allocation { bytes },
        }
    }
}

impl HostError {
    /// 错误类别名称
    pub fn kind(&self) -> &'static str {
        match self {
            HostError::NotReady(_) => "NotReady",
            HostError::Allocation { .. } => "Allocation",
            HostError::InteriorNul { .. } => "InteriorNul",
            HostError::Execution { .. } => "Execution",
            HostError::MissingResult(_) => "MissingResult",
            HostError::Unsupported(_) => "Unsupported",
            HostError::Load(_) => "Load",
        }
    }

    /// 错误发生的阶段
    pub fn phase(&self) -> &'static str {
        match self {
            HostError::NotReady(boot) => boot.stage(),
            HostError::Load(_) => "loading",
            _ => "execution",
        }
    }

    /// 转换为结构化错误报告
    ///
    /// CLI 直接打印，上层应用可以序列化为 JSON。
    pub fn to_report(&self) -> ErrorReport {
        ErrorReport {
            phase: self.phase(),
            error_kind: self.kind(),
            module: match self {
                HostError::Load(err) => Some(err.module().to_string()),
                _ => None,
            },
            message: self.to_string(),
        }
    }
}

/// 结构化错误报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub phase: &'static str,
    pub error_kind: &'static str,
    /// 加载失败的模块名（如果有）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub message: String,
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.module {
            Some(module) => write!(f, "[{}] {} ({}): {}", self.phase, self.error_kind, module, self.message),
            None => write!(f, "[{}] {}: {}", self.phase, self.error_kind, self.message),
        }
    }
}

impl ErrorReport {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_error_stage() {
        let err = BootError::Payload(TransportError::NotFound {
            path: String::from("pypy.vm.js"),
        });
        assert_eq!(err.stage(), "fetching");
        assert_eq!(err.to_string(), "fetching VM payload: not found: pypy.vm.js");

        assert_eq!(BootError::Bootstrap(1).stage(), "running_startup");
        assert_eq!(BootError::Interrupted.stage(), "interrupted");
    }

    #[test]
    fn test_marshal_error_into_host_error() {
        assert!(matches!(
            HostError::from(MarshalError::Allocation(12)),
            HostError::Allocation { bytes: 12 }
        ));
        assert!(matches!(
            HostError::from(MarshalError::InteriorNul(3)),
            HostError::InteriorNul { offset: 3 }
        ));
    }

    #[test]
    fn test_not_ready_report() {
        let boot = Arc::new(BootError::Index(IndexError::Malformed(String::from("eof"))));
        let report = HostError::NotReady(boot).to_report();

        assert_eq!(report.phase, "fetching_index");
        assert_eq!(report.error_kind, "NotReady");
        assert_eq!(
            report.to_string(),
            "[fetching_index] NotReady: interpreter is not ready: parsing module index: malformed module index: eof"
        );
    }

    #[test]
    fn test_load_report_json() {
        let err = HostError::Load(LoadError::Unknown(String::from("json")));
        let json: serde_json::Value = serde_json::from_str(&err.to_report().to_json()).unwrap();

        assert_eq!(json["phase"], "loading");
        assert_eq!(json["error_kind"], "Load");
        assert_eq!(json["module"], "json");
        assert_eq!(json["message"], "module 'json' is not in the index");
    }

    #[test]
    fn test_execution_report_omits_module() {
        let report = HostError::Execution { status: 1 }.to_report();
        assert_eq!(report.to_string(), "[execution] Execution: execution failed with status 1");
        assert!(!report.to_json().contains("module"));
    }
}
