//! Call interface of the embedded VM
//!
//! The VM is an opaque collaborator. A [`Linker`] turns the fetched payload
//! into a [`VmInstance`]; the instance exposes the entry points the host
//! drives (startup, allocation, source execution, handles) and its simulated
//! filesystem.

use crate::error::VmError;
use crate::streams::StreamMultiplexer;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use vmhost_config::HostConfig;
use vmhost_vfs::VirtualFileSystem;

/// A host value crossing the boundary
pub type HostValue = serde_json::Value;

/// Address in VM linear memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VmPtr(pub u32);

/// Opaque reference the VM uses to address a host value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u32);

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything a payload is linked against
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub total_memory: usize,
    /// Do not run the program's main on link
    pub no_initial_run: bool,
    /// Keep the runtime alive after main returns
    pub no_exit_runtime: bool,
    /// The host initializes the filesystem itself
    pub no_fs_init: bool,
    pub this_program: String,
    /// Root location auxiliary files (e.g. the memory initializer) resolve against
    pub prefix: String,
    /// Where the VM delivers values requested by `get`
    pub results: Arc<ResultBridge>,
}

impl ExecutionContext {
    pub fn for_config(config: &HostConfig, results: Arc<ResultBridge>) -> Self {
        Self {
            total_memory: config.total_memory,
            no_initial_run: true,
            no_exit_runtime: true,
            no_fs_init: true,
            this_program: config.this_program.clone(),
            prefix: config.normalized_root(),
            results,
        }
    }
}

/// Links a VM payload into a runnable instance
pub trait Linker: Send + Sync {
    type Instance: VmInstance;

    fn link(&self, payload: &[u8], context: ExecutionContext) -> Result<Self::Instance, VmError>;
}

/// Entry points of a linked VM.
///
/// All calls are synchronous and run to completion.
pub trait VmInstance: Send {
    /// Auxiliary file the instance still needs before it can start
    fn pending_dependency(&self) -> Option<String>;

    fn fulfil_dependency(&mut self, contents: Vec<u8>) -> Result<(), VmError>;

    /// Set up the simulated filesystem with `streams` as stdio
    fn init_filesystem(&mut self, streams: Arc<StreamMultiplexer>) -> Result<(), VmError>;

    fn filesystem(&self) -> &dyn VirtualFileSystem;

    fn startup(&mut self) -> Result<(), VmError>;

    /// Set the home path from a NUL-terminated string in linear memory
    fn setup_home(&mut self, path: VmPtr) -> i32;

    /// Copy `bytes` into linear memory; `None` when memory is exhausted
    fn allocate(&mut self, bytes: &[u8]) -> Option<VmPtr>;

    fn free(&mut self, ptr: VmPtr);

    /// Run NUL-terminated source at `code`; non-zero means a guest error
    fn execute_source(&mut self, code: VmPtr) -> i32;

    fn make_handle(&mut self, value: HostValue) -> Handle;

    fn free_handle(&mut self, handle: Handle);
}

/// Correlates values delivered by the VM with the `get` call waiting for them
#[derive(Debug, Default)]
pub struct ResultBridge {
    slots: Mutex<HashMap<u64, oneshot::Sender<HostValue>>>,
    next_id: AtomicU64,
}

impl ResultBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<HostValue>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a single-use slot
    pub fn open(self: &Arc<Self>) -> PendingResult {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.slots().insert(id, sender);
        PendingResult {
            id,
            receiver,
            bridge: Arc::clone(self),
        }
    }

    /// Called by the VM. Returns false if nobody is waiting on `id`.
    pub fn deliver(&self, id: u64, value: HostValue) -> bool {
        match self.slots().remove(&id) {
            Some(sender) => sender.send(value).is_ok(),
            None => false,
        }
    }

    /// Slots opened and not yet delivered or dropped
    pub fn open_slots(&self) -> usize {
        self.slots().len()
    }
}

/// One outstanding `get`; its slot is released when dropped.
#[derive(Debug)]
pub struct PendingResult {
    id: u64,
    receiver: oneshot::Receiver<HostValue>,
    bridge: Arc<ResultBridge>,
}

impl PendingResult {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The delivered value, if the VM delivered one
    pub fn take(&mut self) -> Option<HostValue> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for PendingResult {
    fn drop(&mut self) {
        self.bridge.slots().remove(&self.id);
    }
}
