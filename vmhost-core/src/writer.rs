//! Filesystem writer: puts module bytes into the VM's library tree

use crate::registry::ModuleDescriptor;
use std::path::Path;
use std::sync::Arc;
use vmhost_log::{debug, Logger};
use vmhost_vfs::{VfsError, VirtualFileSystem};

/// Destination the load scheduler installs fetched modules into
pub trait ModuleInstaller {
    fn install(&self, descriptor: &ModuleDescriptor, contents: &[u8]) -> Result<(), VfsError>;
}

/// Writes module files beneath the VM library root
#[derive(Debug, Clone)]
pub struct FilesystemWriter {
    lib_root: String,
    logger: Arc<Logger>,
}

impl FilesystemWriter {
    pub fn new(lib_root: impl Into<String>, logger: Arc<Logger>) -> Self {
        Self {
            lib_root: lib_root.into(),
            logger,
        }
    }

    /// Absolute VM path of a module file
    pub fn install_path(&self, file: &str) -> String {
        format!(
            "{}/{}",
            self.lib_root.trim_end_matches('/'),
            file.trim_start_matches('/')
        )
    }

    /// Create the containing directory, then the file.
    ///
    /// A failure to create the directory is only logged; the file write
    /// reports it if it matters.
    pub fn write<F>(&self, fs: &F, descriptor: &ModuleDescriptor, contents: &[u8]) -> Result<(), VfsError>
    where
        F: VirtualFileSystem + ?Sized,
    {
        let path = self.install_path(&descriptor.file);
        if let Some((dir, _)) = path.rsplit_once('/') {
            if !dir.is_empty() {
                if let Err(err) = fs.create_dir_all(Path::new(dir)) {
                    debug!(self.logger, "creating {} for {}: {}", dir, descriptor.name, err);
                }
            }
        }

        fs.write_file(Path::new(&path), contents)?;
        debug!(self.logger, "created file {} ({} bytes)", path, contents.len());
        Ok(())
    }

    /// Pair the writer with a concrete filesystem
    pub fn target<'a, F>(&'a self, fs: &'a F) -> WriterTarget<'a, F>
    where
        F: VirtualFileSystem + ?Sized,
    {
        WriterTarget { writer: self, fs }
    }
}

/// A `FilesystemWriter` bound to one filesystem
pub struct WriterTarget<'a, F: ?Sized> {
    writer: &'a FilesystemWriter,
    fs: &'a F,
}

impl<F: VirtualFileSystem + ?Sized> ModuleInstaller for WriterTarget<'_, F> {
    fn install(&self, descriptor: &ModuleDescriptor, contents: &[u8]) -> Result<(), VfsError> {
        self.writer.write(self.fs, descriptor, contents)
    }
}
