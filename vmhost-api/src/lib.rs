//! vmhost API
//!
//! The `Interpreter` handle ties the pieces of `vmhost-core` together:
//! - a memoized readiness pipeline (`ready`)
//! - on-demand module loading driven by the import scanner (`eval`, `load_modules`)
//! - variable exchange through the execution bridge (`get`, `set`)
//!
//! Every registry and load map is a field of the instance; nothing is global.

mod bridge;
pub mod config;
pub mod error;
pub mod ready;
pub mod types;

use crate::ready::{Boot, ReadinessTracker, Runtime};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, OnceCell};
use vmhost_log::{debug, error, info, Logger};
use vmhost_vfs::VfsError;

pub use config::HostOptions;
pub use error::{BootError, ErrorReport, HostError, MarshalError};
pub use ready::ReadinessState;
pub use types::ExecStatus;

// Re-export config types from vmhost_config
pub use vmhost_config::{FullOptions, HostConfig, Variant, DEFAULT_TOTAL_MEMORY};

// Re-export core types
pub use vmhost_core::{
    HeuristicScanner, HostValue, ImportScanner, Linker, LoadError, LoadState, ModuleDescriptor,
    ModuleIndex, StreamMultiplexer, Transport, VmInstance,
};
pub use vmhost_core;
pub use vmhost_log;

use vmhost_core::{resolve_closure, FilesystemWriter, LoadScheduler, ModuleInstaller};

type BootOutcome<I> = Result<Runtime<I>, Arc<BootError>>;

/// A host for one VM instance
pub struct Interpreter<L: Linker, T: Transport> {
    config: Arc<HostConfig>,
    logger: Arc<Logger>,
    linker: L,
    transport: T,
    scanner: Box<dyn ImportScanner>,
    streams: Arc<StreamMultiplexer>,
    scheduler: LoadScheduler,
    writer: FilesystemWriter,
    readiness: ReadinessTracker,
    runtime: OnceCell<BootOutcome<L::Instance>>,
    boot_started: AtomicBool,
}

impl<L: Linker, T: Transport> Interpreter<L, T> {
    /// Create an interpreter; nothing is fetched until the first call.
    pub fn new(options: HostOptions, linker: L, transport: T) -> Self {
        let HostOptions { config, logger } = options;
        let config = Arc::new(config);
        Self {
            scheduler: LoadScheduler::new(Arc::clone(&config), Arc::clone(&logger)),
            writer: FilesystemWriter::new(config.lib_root.clone(), Arc::clone(&logger)),
            config,
            logger,
            linker,
            transport,
            scanner: Box::new(HeuristicScanner),
            streams: Arc::new(StreamMultiplexer::new()),
            readiness: ReadinessTracker::new(),
            runtime: OnceCell::new(),
            boot_started: AtomicBool::new(false),
        }
    }

    /// Replace the import scanner used by `eval`
    pub fn with_scanner(mut self, scanner: impl ImportScanner + 'static) -> Self {
        self.scanner = Box::new(scanner);
        self
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }

    /// stdio of the VM; sinks can be swapped at any time
    pub fn streams(&self) -> &Arc<StreamMultiplexer> {
        &self.streams
    }

    pub fn state(&self) -> ReadinessState {
        self.readiness.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReadinessState> {
        self.readiness.subscribe()
    }

    /// Boot the VM, or wait for the boot already under way.
    ///
    /// Every caller sees the same outcome.
    pub async fn ready(&self) -> Result<(), HostError> {
        self.runtime().await.map(|_| ())
    }

    async fn runtime(&self) -> Result<&Runtime<L::Instance>, HostError> {
        self.runtime
            .get_or_init(|| self.boot())
            .await
            .as_ref()
            .map_err(|err| HostError::NotReady(Arc::clone(err)))
    }

    async fn boot(&self) -> BootOutcome<L::Instance> {
        // 上一次启动的 future 中途被丢弃
        if self.boot_started.swap(true, Ordering::SeqCst) {
            let err = Arc::new(BootError::Interrupted);
            self.readiness.advance(ReadinessState::Failed(Arc::clone(&err)));
            return Err(err);
        }

        let guard = InterruptGuard {
            readiness: &self.readiness,
            armed: true,
        };
        let outcome = Boot {
            config: &self.config,
            logger: &self.logger,
            linker: &self.linker,
            transport: &self.transport,
            streams: &self.streams,
            writer: &self.writer,
            scheduler: &self.scheduler,
            readiness: &self.readiness,
        }
        .run()
        .await;
        guard.disarm();

        match outcome {
            Ok(runtime) => {
                info!(self.logger, "interpreter ready");
                self.readiness.advance(ReadinessState::Ready);
                Ok(runtime)
            }
            Err(err) => {
                error!(self.logger, "boot failed while {}: {}", err.stage(), err);
                let err = Arc::new(err);
                self.readiness.advance(ReadinessState::Failed(Arc::clone(&err)));
                Err(err)
            }
        }
    }

    /// Evaluate guest source.
    ///
    /// With `auto_load_modules` on, the modules the source imports are loaded
    /// first. A guest exception is a failed `ExecStatus`, not an `Err`.
    pub async fn eval(&self, code: &str) -> Result<ExecStatus, HostError> {
        let runtime = self.runtime().await?;
        if self.config.auto_load_modules {
            let names = self.scanner.scan(code);
            debug!(self.logger, "eval imports {:?}", names);
            self.load_into(runtime, &names).await?;
        }

        let mut vm = runtime.lock();
        let status = bridge::execute(&mut *vm, code)?;
        if !status.is_success() {
            debug!(self.logger, "eval {}", status);
        }
        Ok(status)
    }

    /// Load `names` and everything they need, without running code
    pub async fn load_modules<I, S>(&self, names: I) -> Result<(), HostError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let runtime = self.runtime().await?;
        let names: Vec<S> = names.into_iter().collect();
        self.load_into(runtime, &names).await
    }

    async fn load_into<S: AsRef<str>>(
        &self,
        runtime: &Runtime<L::Instance>,
        names: &[S],
    ) -> Result<(), HostError> {
        let closure = resolve_closure(&runtime.index, names);
        if closure.is_empty() {
            return Ok(());
        }
        let installer = VmInstaller {
            runtime,
            writer: &self.writer,
        };
        self.scheduler
            .ensure_loaded(&runtime.index, &closure, &self.transport, &installer)
            .await?;
        Ok(())
    }

    /// Read a guest global, converted to a host value
    pub async fn get(&self, name: &str) -> Result<HostValue, HostError> {
        let full = self.full_options("get")?;
        let runtime = self.runtime().await?;
        let mut vm = runtime.lock();
        bridge::get(&mut *vm, &runtime.results, &full.bridge_module, name)
    }

    /// Bind a guest global to a host value
    pub async fn set(&self, name: &str, value: impl Into<HostValue>) -> Result<(), HostError> {
        let full = self.full_options("set")?;
        let runtime = self.runtime().await?;
        let mut vm = runtime.lock();
        bridge::set(&mut *vm, &full.bridge_module, name, value.into())
    }

    fn full_options(&self, operation: &'static str) -> Result<&FullOptions, HostError> {
        self.config
            .full_options()
            .ok_or(HostError::Unsupported(operation))
    }

    /// Module index, once the boot has succeeded
    pub fn module_index(&self) -> Option<&ModuleIndex> {
        match self.runtime.get() {
            Some(Ok(runtime)) => Some(&runtime.index),
            _ => None,
        }
    }

    pub fn module_state(&self, name: &str) -> LoadState {
        self.scheduler.state_of(name)
    }

    /// Names of loaded modules, sorted
    pub fn loaded_modules(&self) -> Vec<String> {
        self.scheduler.loaded_modules()
    }
}

impl<L: Linker, T: Transport> std::fmt::Debug for Interpreter<L, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("config", &self.config)
            .field("state", &self.readiness.current())
            .finish_non_exhaustive()
    }
}

/// Installs into the booted VM's filesystem, holding the VM lock per write
struct VmInstaller<'a, I> {
    runtime: &'a Runtime<I>,
    writer: &'a FilesystemWriter,
}

impl<I: VmInstance> ModuleInstaller for VmInstaller<'_, I> {
    fn install(&self, descriptor: &ModuleDescriptor, contents: &[u8]) -> Result<(), VfsError> {
        let vm = self.runtime.lock();
        self.writer.write(vm.filesystem(), descriptor, contents)
    }
}

/// Marks the boot as interrupted if its future is dropped mid-way
struct InterruptGuard<'a> {
    readiness: &'a ReadinessTracker,
    armed: bool,
}

impl InterruptGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InterruptGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.readiness
                .advance(ReadinessState::Failed(Arc::new(BootError::Interrupted)));
        }
    }
}
