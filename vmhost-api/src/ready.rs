//! Readiness pipeline
//!
//! Boots the VM in fixed stages:
//!
//! ```text
//! Uninitialized -> Fetching -> Linking -> InitializingFilesystem
//!   -> RunningStartup -> FetchingIndex -> InstallingEager -> Ready
//! ```
//!
//! Any stage may end in `Failed`. The state only moves forward; the minimal
//! variant skips the two index stages.

use crate::bridge::VmBuffer;
use crate::error::BootError;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use vmhost_config::HostConfig;
use vmhost_core::{
    ExecutionContext, FilesystemWriter, Linker, LoadScheduler, ModuleIndex, ResultBridge,
    StreamMultiplexer, Transport, VmInstance,
};
use vmhost_log::{debug, info, Logger};

/// Where the boot sequence currently is
#[derive(Debug, Clone)]
pub enum ReadinessState {
    Uninitialized,
    Fetching,
    Linking,
    InitializingFilesystem,
    RunningStartup,
    FetchingIndex,
    InstallingEager,
    Ready,
    Failed(Arc<BootError>),
}

impl ReadinessState {
    fn rank(&self) -> u8 {
        match self {
            ReadinessState::Uninitialized => 0,
            ReadinessState::Fetching => 1,
            ReadinessState::Linking => 2,
            ReadinessState::InitializingFilesystem => 3,
            ReadinessState::RunningStartup => 4,
            ReadinessState::FetchingIndex => 5,
            ReadinessState::InstallingEager => 6,
            ReadinessState::Ready => 7,
            ReadinessState::Failed(_) => 8,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessState::Ready)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ReadinessState::Failed(_))
    }

    /// `Ready` and `Failed` are never left
    pub fn is_terminal(&self) -> bool {
        self.is_ready() || self.is_failed()
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReadinessState::Uninitialized => "uninitialized",
            ReadinessState::Fetching => "fetching",
            ReadinessState::Linking => "linking",
            ReadinessState::InitializingFilesystem => "initializing_filesystem",
            ReadinessState::RunningStartup => "running_startup",
            ReadinessState::FetchingIndex => "fetching_index",
            ReadinessState::InstallingEager => "installing_eager",
            ReadinessState::Ready => "ready",
            ReadinessState::Failed(_) => "failed",
        }
    }
}

impl PartialEq for ReadinessState {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ReadinessState::Failed(a), ReadinessState::Failed(b)) => Arc::ptr_eq(a, b),
            _ => self.rank() == other.rank(),
        }
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessState::Failed(err) => write!(f, "failed: {err}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Publishes the readiness state; only the pipeline advances it.
#[derive(Debug)]
pub(crate) struct ReadinessTracker {
    tx: watch::Sender<ReadinessState>,
}

impl ReadinessTracker {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(ReadinessState::Uninitialized);
        Self { tx }
    }

    /// Move forward to `next`. Backward moves and moves out of a terminal
    /// state are ignored.
    pub(crate) fn advance(&self, next: ReadinessState) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_terminal() || next.rank() <= current.rank() {
                return false;
            }
            *current = next;
            true
        })
    }

    pub(crate) fn current(&self) -> ReadinessState {
        self.tx.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ReadinessState> {
        self.tx.subscribe()
    }
}

/// A booted VM and the registry fetched for it
pub(crate) struct Runtime<I> {
    vm: Mutex<I>,
    pub(crate) index: ModuleIndex,
    pub(crate) results: Arc<ResultBridge>,
}

impl<I> Runtime<I> {
    /// 所有 VM 调用都经过这把锁，互不重入
    pub(crate) fn lock(&self) -> MutexGuard<'_, I> {
        self.vm.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Borrowed collaborators of one boot run
pub(crate) struct Boot<'a, L, T> {
    pub(crate) config: &'a HostConfig,
    pub(crate) logger: &'a Arc<Logger>,
    pub(crate) linker: &'a L,
    pub(crate) transport: &'a T,
    pub(crate) streams: &'a Arc<StreamMultiplexer>,
    pub(crate) writer: &'a FilesystemWriter,
    pub(crate) scheduler: &'a LoadScheduler,
    pub(crate) readiness: &'a ReadinessTracker,
}

impl<L: Linker, T: Transport> Boot<'_, L, T> {
    fn enter(&self, state: ReadinessState) {
        debug!(self.logger, "boot stage: {}", state);
        self.readiness.advance(state);
    }

    pub(crate) async fn run(self) -> Result<Runtime<L::Instance>, BootError> {
        let config = self.config;

        self.enter(ReadinessState::Fetching);
        info!(self.logger, "fetching VM payload {}", config.vm_file);
        let payload = self
            .transport
            .fetch(&config.vm_file)
            .await
            .map_err(BootError::Payload)?;

        self.enter(ReadinessState::Linking);
        let results = ResultBridge::new();
        let context = ExecutionContext::for_config(config, Arc::clone(&results));
        let mut vm = self.linker.link(&payload, context).map_err(BootError::Link)?;
        drop(payload);

        if let Some(path) = vm.pending_dependency() {
            info!(self.logger, "fetching memory initializer {}", path);
            let contents = match self.transport.fetch(&path).await {
                Ok(contents) => contents,
                Err(source) => return Err(BootError::MemoryInitFetch { path, source }),
            };
            vm.fulfil_dependency(contents).map_err(BootError::MemoryInit)?;
        }

        self.enter(ReadinessState::InitializingFilesystem);
        vm.init_filesystem(Arc::clone(self.streams))
            .map_err(BootError::Filesystem)?;
        for dir in &config.search_dirs {
            let path = format!("/{}", dir.trim_start_matches('/'));
            if let Err(source) = vm.filesystem().create_dir_all(Path::new(&path)) {
                return Err(BootError::SearchDir { path, source });
            }
        }

        self.enter(ReadinessState::RunningStartup);
        vm.startup().map_err(BootError::Startup)?;

        let Some(full) = config.full_options() else {
            return Ok(Runtime {
                vm: Mutex::new(vm),
                index: ModuleIndex::new(),
                results,
            });
        };

        let status = VmBuffer::allocate(&mut vm, &full.home_path)?.setup_home();
        if status != 0 {
            return Err(BootError::Home(status));
        }
        let status = VmBuffer::allocate(&mut vm, &full.bootstrap_source)?.execute();
        if status != 0 {
            return Err(BootError::Bootstrap(status));
        }

        self.enter(ReadinessState::FetchingIndex);
        info!(self.logger, "fetching module index {}", config.index_file);
        let bytes = self
            .transport
            .fetch(&config.index_file)
            .await
            .map_err(BootError::IndexFetch)?;
        let index = ModuleIndex::from_json(&bytes).map_err(BootError::Index)?;
        debug!(self.logger, "module index lists {} modules", index.len());

        self.enter(ReadinessState::InstallingEager);
        for (descriptor, contents) in index.eager() {
            info!(self.logger, "loading eager module {}", descriptor.name);
            if let Err(source) = self
                .writer
                .write(vm.filesystem(), descriptor, contents.as_bytes())
            {
                return Err(BootError::Eager {
                    module: descriptor.name.clone(),
                    source,
                });
            }
            self.scheduler.mark_installed(&descriptor.name);
        }

        Ok(Runtime {
            vm: Mutex::new(vm),
            index,
            results,
        })
    }
}
