//! Transports: where the VM payload, the index and module files come from

use crate::error::TransportError;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use vmhost_vfs::{VfsError, VirtualFileSystem};

/// Fetches bytes by path relative to the configured root.
pub trait Transport: Send + Sync {
    fn fetch(&self, path: &str) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn fetch(&self, path: &str) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send {
        (**self).fetch(path)
    }
}

/// Reads files from a local directory
#[derive(Debug, Clone)]
pub struct FileTransport {
    root: PathBuf,
}

impl FileTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join `path` onto the root; `..` may not climb above it
    fn resolve(&self, path: &str) -> Result<PathBuf, TransportError> {
        let mut resolved = self.root.clone();
        let mut depth = 0usize;
        for component in Path::new(path).components() {
            match component {
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::ParentDir => {
                    if depth == 0 {
                        return Err(TransportError::Failed {
                            path: path.to_string(),
                            message: String::from("escapes the transport root"),
                        });
                    }
                    resolved.pop();
                    depth -= 1;
                }
            }
        }
        Ok(resolved)
    }
}

impl Transport for FileTransport {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, TransportError> {
        let full = self.resolve(path)?;
        tokio::fs::read(&full).await.map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => TransportError::NotFound {
                path: path.to_string(),
            },
            _ => TransportError::Failed {
                path: path.to_string(),
                message: err.to_string(),
            },
        })
    }
}

/// Reads files out of a virtual filesystem, e.g. an in-memory bundle
#[derive(Debug, Clone)]
pub struct VfsTransport<F> {
    fs: F,
    root: String,
}

impl<F: VirtualFileSystem> VfsTransport<F> {
    pub fn new(fs: F, root: impl Into<String>) -> Self {
        Self {
            fs,
            root: root.into(),
        }
    }

    pub fn filesystem(&self) -> &F {
        &self.fs
    }
}

impl<F: VirtualFileSystem> Transport for VfsTransport<F> {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, TransportError> {
        let full = format!(
            "{}/{}",
            self.root.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        self.fs.read_file(Path::new(&full)).map_err(|err| match err {
            VfsError::NotFound { .. } => TransportError::NotFound {
                path: path.to_string(),
            },
            other => TransportError::Failed {
                path: path.to_string(),
                message: other.to_string(),
            },
        })
    }
}
