//! Native file system implementation

use crate::error::{VfsError, VfsResult};
use crate::VirtualFileSystem;
use std::path::{Component, Path, PathBuf};

/// A native OS file system implementation.
///
/// Without a base directory, paths are passed to `std::fs` unchanged. With a
/// base directory, every path (absolute or relative) is resolved beneath it,
/// so the VM-style path `/lib/pypyjs/lib_pypy/json.py` lands at
/// `<base>/lib/pypyjs/lib_pypy/json.py`.
#[derive(Debug, Clone, Default)]
pub struct NativeFileSystem {
    base: Option<PathBuf>,
}

impl NativeFileSystem {
    pub fn new() -> Self {
        Self { base: None }
    }

    /// Confine all operations to `base`.
    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self {
            base: Some(base.into()),
        }
    }

    pub fn base(&self) -> Option<&Path> {
        self.base.as_deref()
    }

    fn resolve(&self, path: &Path) -> VfsResult<PathBuf> {
        let Some(base) = &self.base else {
            return Ok(path.to_path_buf());
        };

        let mut resolved = base.clone();
        let mut depth = 0usize;
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::ParentDir => {
                    if depth == 0 {
                        return Err(VfsError::InvalidPath {
                            path: path.to_string_lossy().into_owned(),
                            reason: String::from("escapes the base directory"),
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

impl VirtualFileSystem for NativeFileSystem {
    fn read_file(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let resolved = self.resolve(path)?;
        std::fs::read(&resolved).map_err(|e| VfsError::from_io(e, path))
    }

    fn write_file(&self, path: &Path, content: &[u8]) -> VfsResult<()> {
        let resolved = self.resolve(path)?;
        std::fs::write(&resolved, content).map_err(|e| VfsError::from_io(e, path))
    }

    fn create_dir_all(&self, path: &Path) -> VfsResult<()> {
        let resolved = self.resolve(path)?;
        if resolved.is_file() {
            return Err(VfsError::NotADirectory {
                path: path.to_string_lossy().into_owned(),
            });
        }
        std::fs::create_dir_all(&resolved).map_err(|e| VfsError::from_io(e, path))
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.resolve(path).map(|p| p.is_dir()).unwrap_or(false)
    }
}
