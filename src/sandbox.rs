//! Contract towards the pod sandbox subsystem.
//!
//! Containers running inside a sandbox carry a [`SandboxInfo`] in their
//! configuration; for all others the hooks are never consulted. The default
//! implementations are no-ops so builds without pod support wire in
//! [`NoopSandbox`].

use crate::{
    oci_spec::runtime::{Process, Spec},
    runtime::ConsoleFifos,
};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize)]
/// Association between a container and the sandbox hosting it.
pub struct SandboxInfo {
    /// The sandbox identifier.
    pub id: String,

    /// Address of the sandbox task service; a `vsock://` address routes exec
    /// I/O over vsock instead of host FIFOs.
    pub task_address: Option<String>,
}

/// Whether a container is managed by a sandbox. Sandbox managed containers
/// keep their id/name reservations on deletion since the sandbox owns them.
pub fn is_sandbox_container(info: Option<&SandboxInfo>) -> bool {
    info.is_some()
}

#[async_trait]
/// SandboxHooks is the set of pod level callouts issued by the lifecycle
/// pipelines.
pub trait SandboxHooks: Send + Sync {
    /// Prepare the sandbox for a container about to be created.
    async fn prepare_container(
        &self,
        _info: &SandboxInfo,
        _spec: &Spec,
        _console_fifos: &ConsoleFifos,
        _terminal: bool,
    ) -> Result<()> {
        Ok(())
    }

    /// Prepare the sandbox for an exec process about to run.
    async fn prepare_exec(
        &self,
        _info: &SandboxInfo,
        _exec_id: &str,
        _process: &Process,
        _console_fifos: &ConsoleFifos,
        _terminal: bool,
    ) -> Result<()> {
        Ok(())
    }

    /// Remove a stopped container from its sandbox.
    async fn purge_container(&self, _info: &SandboxInfo) -> Result<()> {
        Ok(())
    }

    /// Remove a finished exec process from its sandbox.
    async fn purge_exec(&self, _info: &SandboxInfo, _exec_id: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
/// Hooks used when pod support is disabled.
pub struct NoopSandbox;

impl SandboxHooks for NoopSandbox {}
