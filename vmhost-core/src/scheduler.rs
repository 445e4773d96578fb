//! Load scheduler
//!
//! Owns the per-module load state. A module goes `NotLoaded -> Pending ->
//! Loaded` once; while it is `Pending`, other requests wait on the in-flight
//! load instead of fetching again. A failed load reverts the module to
//! `NotLoaded` so a later request retries it.

use crate::error::LoadError;
use crate::registry::{ModuleDescriptor, ModuleIndex};
use crate::resolver::DependencyClosure;
use crate::transport::Transport;
use crate::writer::ModuleInstaller;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use vmhost_config::HostConfig;
use vmhost_log::{debug, info, warn, Logger};

/// Read-only view of one module's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    NotLoaded,
    Pending,
    Loaded,
}

type LoadOutcome = Option<Result<(), Arc<LoadError>>>;

enum Slot {
    Pending(watch::Receiver<LoadOutcome>),
    Loaded,
}

enum Next {
    Done,
    Wait(watch::Receiver<LoadOutcome>),
    Lead(watch::Sender<LoadOutcome>),
}

/// Deduplicates fetch + install of modules
pub struct LoadScheduler {
    slots: Mutex<HashMap<String, Slot>>,
    config: Arc<HostConfig>,
    logger: Arc<Logger>,
}

impl LoadScheduler {
    pub fn new(config: Arc<HostConfig>, logger: Arc<Logger>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            config,
            logger,
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bring every module of `closure` to `Loaded`, one after another.
    ///
    /// Stops at the first failure.
    pub async fn ensure_loaded<T, M>(
        &self,
        index: &ModuleIndex,
        closure: &DependencyClosure,
        transport: &T,
        installer: &M,
    ) -> Result<(), LoadError>
    where
        T: Transport,
        M: ModuleInstaller,
    {
        for name in closure.iter() {
            let descriptor = index
                .get(name)
                .ok_or_else(|| LoadError::Unknown(name.to_string()))?;
            self.ensure_module(descriptor, transport, installer).await?;
        }
        Ok(())
    }

    async fn ensure_module<T, M>(
        &self,
        descriptor: &ModuleDescriptor,
        transport: &T,
        installer: &M,
    ) -> Result<(), LoadError>
    where
        T: Transport,
        M: ModuleInstaller,
    {
        let name = descriptor.name.as_str();
        loop {
            let next = {
                let mut slots = self.slots();
                match slots.get(name) {
                    Some(Slot::Loaded) => Next::Done,
                    Some(Slot::Pending(rx)) => Next::Wait(rx.clone()),
                    None if descriptor.is_package => {
                        // 包目录本身没有文件可取
                        slots.insert(name.to_string(), Slot::Loaded);
                        Next::Done
                    }
                    None => {
                        let (tx, rx) = watch::channel(None);
                        slots.insert(name.to_string(), Slot::Pending(rx));
                        Next::Lead(tx)
                    }
                }
            };

            match next {
                Next::Done => return Ok(()),
                Next::Lead(tx) => return self.lead(descriptor, tx, transport, installer).await,
                Next::Wait(rx) => {
                    if let Some(result) = self.wait_for(name, rx).await {
                        return result;
                    }
                    // 领头的请求被取消，槽位已回到 NotLoaded，由本请求接手
                    debug!(self.logger, "load of module {} was dropped, taking it over", name);
                }
            }
        }
    }

    /// `None` when the leader went away without an outcome
    async fn wait_for(
        &self,
        name: &str,
        mut rx: watch::Receiver<LoadOutcome>,
    ) -> Option<Result<(), LoadError>> {
        debug!(self.logger, "module {} is pending, waiting", name);
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };

        outcome.map(|result| {
            result.map_err(|source| LoadError::Dependent {
                module: name.to_string(),
                source,
            })
        })
    }

    async fn lead<T, M>(
        &self,
        descriptor: &ModuleDescriptor,
        tx: watch::Sender<LoadOutcome>,
        transport: &T,
        installer: &M,
    ) -> Result<(), LoadError>
    where
        T: Transport,
        M: ModuleInstaller,
    {
        let name = descriptor.name.as_str();
        let mut revert = RevertOnDrop {
            scheduler: self,
            name,
            armed: true,
        };

        let path = self.config.module_path(&descriptor.file);
        info!(self.logger, "loading module {} from {}", name, path);

        let result = match transport.fetch(&path).await {
            Ok(contents) => installer
                .install(descriptor, &contents)
                .map_err(|source| LoadError::Install {
                    module: name.to_string(),
                    source,
                }),
            Err(source) => Err(LoadError::Fetch {
                module: name.to_string(),
                source,
            }),
        };

        revert.armed = false;
        match result {
            Ok(()) => {
                self.slots().insert(name.to_string(), Slot::Loaded);
                let _ = tx.send(Some(Ok(())));
                Ok(())
            }
            Err(err) => {
                warn!(self.logger, "{}", err);
                self.slots().remove(name);
                let _ = tx.send(Some(Err(Arc::new(err.clone()))));
                Err(err)
            }
        }
    }

    /// Record a module installed outside the scheduler (eager modules)
    pub fn mark_installed(&self, name: &str) {
        self.slots().insert(name.to_string(), Slot::Loaded);
    }

    pub fn state_of(&self, name: &str) -> LoadState {
        match self.slots().get(name) {
            None => LoadState::NotLoaded,
            Some(Slot::Pending(_)) => LoadState::Pending,
            Some(Slot::Loaded) => LoadState::Loaded,
        }
    }

    /// Names of all loaded modules, sorted
    pub fn loaded_modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .slots()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Loaded))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for LoadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadScheduler")
            .field("modules", &self.slots().len())
            .finish_non_exhaustive()
    }
}

/// Puts a pending module back to `NotLoaded` if its leader is dropped mid-load
struct RevertOnDrop<'a> {
    scheduler: &'a LoadScheduler,
    name: &'a str,
    armed: bool,
}

impl Drop for RevertOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut slots = self.scheduler.slots();
            if matches!(slots.get(self.name), Some(Slot::Pending(_))) {
                slots.remove(self.name);
            }
        }
    }
}
