//! vmhost core
//!
//! Everything between the public `Interpreter` and the VM collaborator:
//!
//! - [`registry`]: module index parsed from the index document
//! - [`resolver`]: dependency closure of requested names
//! - [`scanner`]: heuristic import extraction from guest source
//! - [`transport`]: byte fetching relative to the configured root
//! - [`scheduler`]: load-once bookkeeping for module installs
//! - [`writer`]: installs module files into the VM filesystem
//! - [`streams`]: stdin/stdout/stderr multiplexing
//! - [`vm`]: the VM call interface and result correlation

pub mod error;
pub mod registry;
pub mod resolver;
pub mod scanner;
pub mod scheduler;
pub mod streams;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod transport;
pub mod vm;
pub mod writer;

pub use error::{IndexError, LoadError, TransportError, VmError};
pub use registry::{ModuleDescriptor, ModuleIndex};
pub use resolver::{resolve_closure, DependencyClosure};
pub use scanner::{scan_imports, HeuristicScanner, ImportScanner};
pub use scheduler::{LoadScheduler, LoadState};
pub use streams::{
    BytesInput, ClosedInput, InputSource, MemorySink, OutputSink, ProcessStderr, ProcessStdout,
    StreamMultiplexer, STDOUT_FLUSH_THRESHOLD,
};
pub use transport::{FileTransport, Transport, VfsTransport};
pub use vm::{ExecutionContext, Handle, HostValue, Linker, PendingResult, ResultBridge, VmInstance, VmPtr};
pub use writer::{FilesystemWriter, ModuleInstaller, WriterTarget};
