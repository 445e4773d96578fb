//! Error types for the module subsystem and the VM ABI

use std::sync::Arc;
use thiserror::Error;
use vmhost_vfs::VfsError;

/// Failure of a `Transport::fetch`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("fetch '{path}' failed: {message}")]
    Failed { path: String, message: String },
}

impl TransportError {
    pub fn path(&self) -> &str {
        match self {
            TransportError::NotFound { path } | TransportError::Failed { path, .. } => path,
        }
    }
}

/// Module index document could not be turned into a registry
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    #[error("malformed module index: {0}")]
    Malformed(String),

    #[error("eager module '{0}' is not listed under \"modules\"")]
    UnknownEager(String),
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        IndexError::Malformed(err.to_string())
    }
}

/// Failure while bringing a module to `Loaded`
#[derive(Error, Debug, Clone)]
pub enum LoadError {
    #[error("module '{0}' is not in the index")]
    Unknown(String),

    #[error("fetching module '{module}': {source}")]
    Fetch {
        module: String,
        #[source]
        source: TransportError,
    },

    #[error("installing module '{module}': {source}")]
    Install {
        module: String,
        #[source]
        source: VfsError,
    },

    /// 等待中的请求所依附的加载失败了
    #[error("module '{module}' failed in a concurrent load: {source}")]
    Dependent {
        module: String,
        #[source]
        source: Arc<LoadError>,
    },
}

impl LoadError {
    /// Name of the module whose load failed
    pub fn module(&self) -> &str {
        match self {
            LoadError::Unknown(module) => module,
            LoadError::Fetch { module, .. }
            | LoadError::Install { module, .. }
            | LoadError::Dependent { module, .. } => module,
        }
    }
}

/// Error reported by a VM collaborator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VmError {
    #[error("link failed: {0}")]
    Link(String),

    #[error("memory initializer rejected: {0}")]
    MemoryInit(String),

    #[error("filesystem init failed: {0}")]
    Filesystem(String),

    #[error("startup failed: {0}")]
    Startup(String),
}
