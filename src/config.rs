//! Configuration related structures
use crate::container::Ulimit;
use derive_builder::Builder;
use getset::{CopyGetters, Getters};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Cgroup parent applied when neither the container nor the daemon sets one.
pub const DEFAULT_CGROUP_PARENT: &str = "/cradled";

#[derive(Builder, Clone, Debug, CopyGetters, Getters, Deserialize, Serialize)]
#[builder(default, pattern = "owned", setter(into))]
#[serde(rename_all = "kebab-case")]
/// Daemon level configuration consumed by the lifecycle engine.
pub struct Config {
    #[get = "pub"]
    /// Root directory for persistent per-container state (bundles, records).
    root_path: PathBuf,

    #[get = "pub"]
    /// Root directory for ephemeral per-container state (pid files, FIFOs).
    state_path: PathBuf,

    #[get = "pub"]
    /// Directory holding per-container client console FIFO homes.
    client_run_dir: PathBuf,

    #[get = "pub"]
    /// Path of the engine log file handed to the low-level runtime.
    engine_log_path: Option<PathBuf>,

    #[get_copy = "pub"]
    /// The logging level handed to the low-level runtime.
    log_level: LevelFilter,

    #[get_copy = "pub"]
    /// Seconds the low-level runtime may take to start a container.
    start_timeout_secs: u64,

    #[get = "pub"]
    /// Cgroup parent for containers which do not configure their own.
    cgroup_parent: Option<String>,

    #[get = "pub"]
    /// Ulimits applied to every container unless overridden per container.
    default_ulimits: Vec<Ulimit>,

    #[get_copy = "pub"]
    /// Seconds to wait for a SIGKILLed container before escalating to its
    /// monitor process.
    force_kill_wait_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("/var/lib/cradled/engines"),
            state_path: PathBuf::from("/var/run/cradled"),
            client_run_dir: PathBuf::from("/var/run/cradled-client"),
            engine_log_path: None,
            log_level: LevelFilter::Info,
            start_timeout_secs: 120,
            cgroup_parent: None,
            default_ulimits: Vec::new(),
            force_kill_wait_secs: 90,
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn default_config() {
        let c = Config::default();
        assert_eq!(c.log_level(), LevelFilter::Info);
        assert_eq!(c.force_kill_wait_secs(), 90);
        assert!(c.cgroup_parent().is_none());
    }

    #[test]
    fn build_config() -> Result<()> {
        let c = ConfigBuilder::default()
            .log_level(LevelFilter::Warn)
            .root_path("/some/path")
            .cgroup_parent(Some("/custom".to_string()))
            .build()?;

        assert_eq!(c.log_level(), LevelFilter::Warn);
        assert_eq!(&c.root_path().display().to_string(), "/some/path");
        assert_eq!(c.cgroup_parent().as_deref(), Some("/custom"));

        Ok(())
    }
}
