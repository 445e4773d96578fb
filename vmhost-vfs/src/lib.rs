//! vmhost virtual file system
//!
//! The VM sees its library tree through [`VirtualFileSystem`]. Two backends
//! ship with the crate:
//! - [`MemoryFileSystem`]: an in-memory tree with real directory entries,
//!   used as the simulated filesystem of test VMs and for bundles.
//! - [`NativeFileSystem`]: the host OS filesystem, optionally confined to a
//!   base directory (used by `vmhost install`).
//!
//! # Usage
//! ```
//! use vmhost_vfs::{MemoryFileSystem, VirtualFileSystem};
//! use std::path::Path;
//!
//! let fs = MemoryFileSystem::new();
//! fs.create_dir_all(Path::new("/lib/pypyjs/lib_pypy")).unwrap();
//! fs.write_file(Path::new("/lib/pypyjs/lib_pypy/json.py"), b"x = 1").unwrap();
//! assert!(fs.is_file(Path::new("/lib/pypyjs/lib_pypy/json.py")));
//! ```

mod error;
mod memory;
mod native;
mod r#trait;

pub use error::{VfsError, VfsResult};
pub use memory::MemoryFileSystem;
pub use native::NativeFileSystem;
pub use r#trait::VirtualFileSystem;
