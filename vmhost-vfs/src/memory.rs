//! In-memory file system implementation

use crate::error::{VfsError, VfsResult};
use crate::VirtualFileSystem;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug)]
struct Tree {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

impl Tree {
    fn new() -> Self {
        let mut dirs = BTreeSet::new();
        dirs.insert(String::from("/"));
        Self {
            files: BTreeMap::new(),
            dirs,
        }
    }

    fn mkdirs(&mut self, path: &str) -> VfsResult<()> {
        for ancestor in ancestors(path) {
            if self.files.contains_key(&ancestor) {
                return Err(VfsError::NotADirectory { path: ancestor });
            }
            self.dirs.insert(ancestor);
        }
        Ok(())
    }
}

/// An in-memory file system with directory entries.
///
/// Paths are normalized to absolute, slash-separated form; relative paths are
/// taken relative to `/`. Clones share the same tree.
///
/// # Example
/// ```
/// use vmhost_vfs::{MemoryFileSystem, VirtualFileSystem};
/// use std::path::Path;
///
/// let fs = MemoryFileSystem::new();
/// fs.create_dir_all(Path::new("/lib")).unwrap();
/// fs.write_file(Path::new("/lib/test.py"), b"hello").unwrap();
/// assert_eq!(fs.read_file(Path::new("lib/test.py")).unwrap(), b"hello");
/// ```
#[derive(Debug, Clone)]
pub struct MemoryFileSystem {
    tree: Arc<RwLock<Tree>>,
}

impl MemoryFileSystem {
    /// Create a new file system holding only the root directory.
    pub fn new() -> Self {
        Self {
            tree: Arc::new(RwLock::new(Tree::new())),
        }
    }

    /// Create a file system pre-populated with files; parent directories are
    /// created as needed.
    pub fn with_files<I, S>(files: I) -> VfsResult<Self>
    where
        I: IntoIterator<Item = (S, Vec<u8>)>,
        S: AsRef<str>,
    {
        let fs = Self::new();
        {
            let mut tree = fs.write();
            for (path, content) in files {
                let normalized = normalize(Path::new(path.as_ref()))?;
                if let Some(parent) = parent_of(&normalized) {
                    tree.mkdirs(&parent)?;
                }
                tree.files.insert(normalized, content);
            }
        }
        Ok(fs)
    }

    /// Every file path currently stored, sorted.
    pub fn files(&self) -> Vec<String> {
        self.read().files.keys().cloned().collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tree> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tree> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// `a/./b/../c` -> `/a/c`
fn normalize(path: &Path) -> VfsResult<String> {
    let mut parts: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(part) => parts.push(part.to_string_lossy().replace('\\', "/")),
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(VfsError::InvalidPath {
                        path: path.to_string_lossy().into_owned(),
                        reason: String::from("escapes the root directory"),
                    });
                }
            }
            Component::Prefix(_) => {
                return Err(VfsError::InvalidPath {
                    path: path.to_string_lossy().into_owned(),
                    reason: String::from("drive prefixes are not supported"),
                })
            }
        }
    }
    Ok(format!("/{}", parts.join("/")))
}

fn parent_of(normalized: &str) -> Option<String> {
    if normalized == "/" {
        return None;
    }
    match normalized.rfind('/') {
        Some(0) => Some(String::from("/")),
        Some(idx) => Some(normalized[..idx].to_string()),
        None => None,
    }
}

/// `/a/b` -> [`/`, `/a`, `/a/b`]
fn ancestors(normalized: &str) -> Vec<String> {
    let mut out = vec![String::from("/")];
    let mut current = String::new();
    for part in normalized.split('/').filter(|p| !p.is_empty()) {
        current.push('/');
        current.push_str(part);
        out.push(current.clone());
    }
    out
}

impl VirtualFileSystem for MemoryFileSystem {
    fn read_file(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let normalized = normalize(path)?;
        let tree = self.read();

        if tree.dirs.contains(&normalized) {
            return Err(VfsError::IsADirectory { path: normalized });
        }
        tree.files
            .get(&normalized)
            .cloned()
            .ok_or(VfsError::NotFound { path: normalized })
    }

    fn write_file(&self, path: &Path, content: &[u8]) -> VfsResult<()> {
        let normalized = normalize(path)?;
        let mut tree = self.write();

        if tree.dirs.contains(&normalized) {
            return Err(VfsError::IsADirectory { path: normalized });
        }
        if let Some(parent) = parent_of(&normalized) {
            if tree.files.contains_key(&parent) {
                return Err(VfsError::NotADirectory { path: parent });
            }
            if !tree.dirs.contains(&parent) {
                return Err(VfsError::NotFound { path: parent });
            }
        }
        tree.files.insert(normalized, content.to_vec());
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> VfsResult<()> {
        let normalized = normalize(path)?;
        self.write().mkdirs(&normalized)
    }

    fn exists(&self, path: &Path) -> bool {
        self.is_file(path) || self.is_dir(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        match normalize(path) {
            Ok(normalized) => self.read().files.contains_key(&normalized),
            Err(_) => false,
        }
    }

    fn is_dir(&self, path: &Path) -> bool {
        match normalize(path) {
            Ok(normalized) => self.read().dirs.contains(&normalized),
            Err(_) => false,
        }
    }
}
