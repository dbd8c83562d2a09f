//! Toolchain store
//!
//! Read-mostly registry of the compilers known on this host, keyed by
//! their resolved executable path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use kubecc_core::Toolchain;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::ToolchainError;

/// Determines the properties of a compiler executable
#[async_trait]
pub trait Querier: Send + Sync {
    /// Builds a descriptor for `executable` (kind, language, arch, version, PIC default).
    async fn query(&self, executable: &Path) -> Result<Toolchain, ToolchainError>;

    fn mod_time(&self, executable: &Path) -> std::io::Result<SystemTime> {
        std::fs::metadata(executable)?.modified()
    }
}

/// Querier that answers from a fixed template, for toolchains that are not
/// real compilers
#[derive(Debug, Clone)]
pub struct StaticQuerier {
    template: Toolchain,
}

impl StaticQuerier {
    pub fn new(template: Toolchain) -> Self {
        Self { template }
    }
}

#[async_trait]
impl Querier for StaticQuerier {
    async fn query(&self, executable: &Path) -> Result<Toolchain, ToolchainError> {
        let mut tc = self.template.clone();
        tc.executable = executable.to_path_buf();
        Ok(tc)
    }

    fn mod_time(&self, executable: &Path) -> std::io::Result<SystemTime> {
        match std::fs::metadata(executable) {
            Ok(meta) => meta.modified(),
            Err(_) => Ok(SystemTime::UNIX_EPOCH),
        }
    }
}

struct Entry {
    toolchain: Toolchain,
    mod_time: SystemTime,
    querier: Arc<dyn Querier>,
}

fn eval_path(executable: &Path) -> PathBuf {
    std::fs::canonicalize(executable).unwrap_or_else(|_| executable.to_path_buf())
}

#[derive(Default)]
pub struct ToolchainStore {
    toolchains: RwLock<HashMap<PathBuf, Entry>>,
}

impl ToolchainStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the (symlink-resolved) executable is in the store.
    pub fn contains(&self, executable: &Path) -> bool {
        self.toolchains.read().contains_key(&eval_path(executable))
    }

    /// Copies of every toolchain in the store.
    pub fn items(&self) -> Vec<Toolchain> {
        self.toolchains
            .read()
            .values()
            .map(|entry| entry.toolchain.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.toolchains.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queries `executable` and adds it to the store.
    pub async fn add(
        &self,
        executable: &Path,
        querier: Arc<dyn Querier>,
    ) -> Result<Toolchain, ToolchainError> {
        let executable = eval_path(executable);
        if self.contains(&executable) {
            return Err(ToolchainError::AlreadyExists(executable));
        }

        let mut toolchain = querier.query(&executable).await?;
        toolchain.executable = executable.clone();
        let mod_time = querier
            .mod_time(&executable)
            .map_err(|e| ToolchainError::Query {
                path: executable.clone(),
                message: format!("could not determine modification time: {e}"),
            })?;

        let mut toolchains = self.toolchains.write();
        if toolchains.contains_key(&executable) {
            return Err(ToolchainError::AlreadyExists(executable));
        }
        info!(toolchain = %toolchain, "Toolchain added");
        toolchains.insert(
            executable,
            Entry {
                toolchain: toolchain.clone(),
                mod_time,
                querier,
            },
        );
        Ok(toolchain)
    }

    /// Looks up a toolchain by path, dereferencing symlinks if the exact
    /// path is not registered.
    pub fn find(&self, executable: &Path) -> Result<Toolchain, ToolchainError> {
        let toolchains = self.toolchains.read();
        toolchains
            .get(executable)
            .or_else(|| toolchains.get(&eval_path(executable)))
            .map(|entry| entry.toolchain.clone())
            .ok_or_else(|| ToolchainError::NotFound(executable.to_path_buf()))
    }

    /// Finds a toolchain, adding it with `querier` if it is not known yet.
    pub async fn find_or_add(
        &self,
        executable: &Path,
        querier: Arc<dyn Querier>,
    ) -> Result<Toolchain, ToolchainError> {
        match self.find(executable) {
            Ok(tc) => Ok(tc),
            Err(ToolchainError::NotFound(_)) => match self.add(executable, querier).await {
                // Lost a race with another request adding the same compiler.
                Err(ToolchainError::AlreadyExists(_)) => self.find(executable),
                other => other,
            },
            Err(e) => Err(e),
        }
    }

    pub fn remove(&self, toolchain: &Toolchain) -> bool {
        self.toolchains
            .write()
            .remove(&toolchain.executable)
            .is_some()
    }

    /// Re-queries a toolchain whose executable changed on disk.
    ///
    /// Returns `Ok(true)` if the stored descriptor was refreshed and
    /// `Ok(false)` if nothing changed. A toolchain whose executable no
    /// longer exists is removed and reported as an error.
    pub async fn update_if_needed(&self, toolchain: &Toolchain) -> Result<bool, ToolchainError> {
        let (querier, known_mod_time) = {
            let toolchains = self.toolchains.read();
            let entry = toolchains
                .get(&toolchain.executable)
                .ok_or_else(|| ToolchainError::NotFound(toolchain.executable.clone()))?;
            (entry.querier.clone(), entry.mod_time)
        };

        let mod_time = match querier.mod_time(&toolchain.executable) {
            Ok(t) => t,
            Err(e) => {
                debug!(executable = %toolchain.executable.display(), error = %e, "Toolchain executable is gone");
                self.toolchains.write().remove(&toolchain.executable);
                return Err(ToolchainError::NotFound(toolchain.executable.clone()));
            }
        };
        if mod_time == known_mod_time {
            return Ok(false);
        }

        let mut refreshed = querier.query(&toolchain.executable).await?;
        refreshed.executable = toolchain.executable.clone();
        if let Some(entry) = self.toolchains.write().get_mut(&toolchain.executable) {
            info!(toolchain = %refreshed, "Toolchain updated");
            entry.toolchain = refreshed;
            entry.mod_time = mod_time;
        }
        Ok(true)
    }

    /// Finds the local toolchain equivalent to one described by another host.
    pub fn try_match(&self, remote: &Toolchain) -> Result<Toolchain, ToolchainError> {
        self.toolchains
            .read()
            .values()
            .find(|entry| entry.toolchain.equivalent_to(remote))
            .map(|entry| entry.toolchain.clone())
            .ok_or_else(|| ToolchainError::NoMatch(remote.to_string()))
    }
}
