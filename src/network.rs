//! Contract towards the network subsystem plus network mode helpers.
//!
//! The engine never wires networks itself; during deletion it asks the
//! adapter to tear down whatever the network module built, and it interprets
//! the textual namespace modes stored in a container's host configuration.

use crate::container::NetworkSettings;
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
/// NetworkAdapter is the interface for tearing down container networking.
/// Every method is a no-op by default so the engine works without a network
/// subsystem.
pub trait NetworkAdapter: Send + Sync {
    /// Remove a natively managed network endpoint.
    async fn remove_native_network(
        &self,
        _id: &str,
        _settings: &NetworkSettings,
    ) -> Result<()> {
        Ok(())
    }

    /// Tear down the network namespace mount behind the given netns path.
    async fn remove_namespace(&self, _netns_path: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
/// Adapter used when no network subsystem is wired in.
pub struct NoopNetwork;

impl NetworkAdapter for NoopNetwork {}

/// Whether the mode refers to a network managed natively by the daemon.
pub fn is_native_mode(mode: &str) -> bool {
    matches!(mode, "bridge")
}

/// Whether the mode delegates network setup to CNI plugins.
pub fn is_cni_mode(mode: &str) -> bool {
    mode == "cni"
}

/// Whether the mode shares the host namespace.
pub fn is_host_mode(mode: &str) -> bool {
    mode == "host"
}

/// Whether the mode disables namespace setup entirely.
pub fn is_none_mode(mode: &str) -> bool {
    mode.is_empty() || mode == "none"
}

/// The peer container id for `container:<id>` modes.
pub fn connected_container(mode: &str) -> Option<&str> {
    mode.strip_prefix("container:").filter(|id| !id.is_empty())
}

/// Whether an IPC mode allows the namespace to be shared with peers. An
/// unset mode defaults to shareable.
pub fn is_shareable_ipc(mode: &str) -> bool {
    mode.is_empty() || mode == "shareable"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes() {
        assert!(is_native_mode("bridge"));
        assert!(!is_native_mode("cni"));
        assert!(is_cni_mode("cni"));
        assert!(is_host_mode("host"));
        assert!(is_none_mode(""));
        assert!(is_none_mode("none"));
        assert_eq!(connected_container("container:abc"), Some("abc"));
        assert_eq!(connected_container("container:"), None);
        assert_eq!(connected_container("host"), None);
        assert!(is_shareable_ipc(""));
        assert!(is_shareable_ipc("shareable"));
        assert!(!is_shareable_ipc("private"));
    }
}
