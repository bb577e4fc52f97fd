//! The container record: the unit of ownership inside the engine.
//!
//! A record pairs immutable identity (id, name, runtime, paths) with a
//! mutable configuration block behind the record lock and the word-atomic
//! state machine. Records persist as JSON next to the OCI configuration in
//! the container's bundle.

pub mod state;
pub mod store;

use crate::{
    defaults,
    error::Result,
    sandbox::SandboxInfo,
};
use serde::{Deserialize, Serialize};
use state::{ContainerState, StateInfo};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::SystemTime,
};
use tokio::sync::{Mutex, MutexGuard};

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
/// The user-supplied container configuration.
pub struct ContainerConfig {
    /// Hostname inside the container.
    pub hostname: Option<String>,

    /// User the init process runs as, resolved against the image.
    pub user: Option<String>,

    /// Environment entries in `KEY=VALUE` form.
    pub env: Vec<String>,

    /// Working directory of the init process.
    pub working_dir: Option<String>,

    /// Allocate a terminal.
    pub tty: bool,

    /// Keep stdin open even when not attached.
    pub open_stdin: bool,

    /// Symbolic or numeric signal used for graceful stops.
    pub stop_signal: Option<String>,

    /// Arbitrary metadata shared with the OCI spec annotations.
    pub annotations: BTreeMap<String, String>,

    /// User labels.
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
/// A materialised mount of the container, recorded at creation.
pub struct MountPoint {
    /// Mount kind, `volume` or `bind`.
    pub typ: String,

    /// Volume name; absent for plain binds.
    pub name: Option<String>,

    /// Whether the volume name was picked by the user. Anonymous volumes die
    /// with the container when removal asks for it.
    pub named: bool,

    /// Source path on the host.
    pub source: PathBuf,

    /// Destination path inside the container.
    pub destination: PathBuf,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
/// A tmpfs shared between host and container.
pub struct HostChannel {
    pub path_on_host: PathBuf,
    pub path_in_container: PathBuf,
    pub size: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
/// A single resource limit entry, merged into the OCI spec as an rlimit.
pub struct Ulimit {
    /// Limit name without the `RLIMIT_` prefix, e.g. `nofile`.
    pub name: String,
    pub soft: i64,
    pub hard: i64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
/// A host device exposed to the container.
pub struct DeviceMapping {
    pub path_on_host: PathBuf,
    pub path_in_container: PathBuf,
    /// Cgroup access permissions, some combination of `rwm`.
    pub cgroup_permissions: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
/// Host-level configuration of a container.
pub struct HostConfig {
    /// Memory limit in bytes, zero meaning unlimited.
    pub memory: i64,

    /// Per-container ulimits, overriding the daemon defaults by name.
    pub ulimits: Vec<Ulimit>,

    /// Cgroup parent of the container's cgroup.
    pub cgroup_parent: Option<String>,

    /// Network namespace mode.
    pub network_mode: String,

    /// IPC namespace mode.
    pub ipc_mode: String,

    /// PID namespace mode.
    pub pid_mode: String,

    /// UTS namespace mode.
    pub uts_mode: String,

    /// `uid:gid:size` remap applied to host paths created for the container.
    pub user_remap: Option<String>,

    /// Remove the container as soon as it stops.
    pub auto_remove: bool,

    /// Original auto remove value; restarts temporarily clear `auto_remove`
    /// and restore it from here.
    pub auto_remove_bak: bool,

    /// Shared tmpfs channel between host and container.
    pub host_channel: Option<HostChannel>,

    /// File inside the rootfs receiving the container environment.
    pub env_target_file: Option<String>,

    /// Whether this is a system container.
    pub system_container: bool,

    /// Rootfs supplied from outside the image store.
    pub external_rootfs: Option<PathBuf>,

    /// Host devices exposed to the container.
    pub devices: Vec<DeviceMapping>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
/// Network state attached to the record by the network subsystem.
pub struct NetworkSettings {
    /// Bind-mounted network namespace path.
    pub sandbox_key: Option<String>,

    /// Opaque CNI result data.
    pub cni_info: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
/// Container-wide configuration shared by every operation.
pub struct CommonConfig {
    /// Image backend type, e.g. `oci`, `external`, `embedded`.
    pub image_type: String,

    /// Image reference the container was created from.
    pub image: String,

    /// Base filesystem of the container.
    pub base_fs: PathBuf,

    /// User supplied configuration.
    pub config: ContainerConfig,

    /// Materialised mounts.
    pub mount_points: Vec<MountPoint>,

    /// Path of the container's `/dev/shm` tmpfs on the host.
    pub shm_path: Option<PathBuf>,

    /// Sandbox this container belongs to, if any.
    pub sandbox: Option<SandboxInfo>,

    /// Creation timestamp.
    pub created_at: SystemTime,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            image_type: "oci".into(),
            image: String::new(),
            base_fs: PathBuf::new(),
            config: ContainerConfig::default(),
            mount_points: Vec::new(),
            shm_path: None,
            sandbox: None,
            created_at: SystemTime::now(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
/// Hooks into the restart policy evaluator. The evaluator itself lives
/// outside the engine; the record only tracks whether the next exit must not
/// trigger a restart.
pub struct RestartManager {
    suppressed: bool,
}

impl RestartManager {
    /// Suppress the restart that would follow the next exit. Called before a
    /// signal is delivered deliberately.
    pub fn cancel_next_restart(&mut self) {
        self.suppressed = true;
    }

    /// Forget a previous suppression, done when a start is allowed to reset
    /// the manager.
    pub fn reset(&mut self) {
        self.suppressed = false;
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }
}

#[derive(Clone, Debug, Default)]
/// Cancellation handle of the external health prober.
pub struct HealthProbe {
    cancelled: Arc<AtomicBool>,
}

impl HealthProbe {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
/// The mutable part of a record, guarded by the record lock.
pub struct ContainerInner {
    pub common_config: CommonConfig,
    pub host_config: HostConfig,
    pub network_settings: NetworkSettings,
    pub restart_manager: RestartManager,
    pub health_probe: Option<HealthProbe>,
    /// Remove anonymous volumes together with the container.
    pub rm_anonymous_volumes: bool,
}

#[derive(Deserialize, Serialize)]
/// On-disk form of a container record.
struct PersistedContainer {
    id: String,
    name: String,
    runtime: String,
    common_config: CommonConfig,
    host_config: HostConfig,
    network_settings: NetworkSettings,
    rm_anonymous_volumes: bool,
    state: StateInfo,
}

/// A container record. Identity and paths are immutable; configuration is
/// guarded by the record lock and state by the state machine.
pub struct Container {
    id: String,
    name: String,
    runtime: String,
    root_path: PathBuf,
    state_path: PathBuf,
    pub state: ContainerState,
    inner: Mutex<ContainerInner>,
}

impl Container {
    pub fn new(
        id: &str,
        name: &str,
        runtime: &str,
        root_path: impl Into<PathBuf>,
        state_path: impl Into<PathBuf>,
        common_config: CommonConfig,
        host_config: HostConfig,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            runtime: runtime.to_string(),
            root_path: root_path.into(),
            state_path: state_path.into(),
            state: ContainerState::new(),
            inner: Mutex::new(ContainerInner {
                common_config,
                host_config,
                network_settings: NetworkSettings::default(),
                restart_manager: RestartManager::default(),
                health_probe: None,
                rm_anonymous_volumes: false,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// The bundle directory of this container.
    pub fn bundle_path(&self) -> PathBuf {
        self.root_path.join(&self.id)
    }

    /// The ephemeral state directory of this container.
    pub fn state_dir(&self) -> PathBuf {
        self.state_path.join(&self.id)
    }

    pub fn spec_path(&self) -> PathBuf {
        self.bundle_path().join(defaults::OCI_CONFIG_JSON)
    }

    pub fn record_path(&self) -> PathBuf {
        self.bundle_path().join(defaults::CONTAINER_RECORD_JSON)
    }

    pub fn pid_file_path(&self) -> PathBuf {
        self.state_dir().join(defaults::PID_FILE)
    }

    pub fn exit_fifo_path(&self) -> PathBuf {
        self.state_dir().join(defaults::EXIT_FIFO)
    }

    /// Take the record lock.
    pub async fn lock(&self) -> MutexGuard<'_, ContainerInner> {
        self.inner.lock().await
    }

    /// Persist the record, including the current state snapshot, to the
    /// bundle directory. Callers hold the record lock.
    pub fn to_disk(&self, inner: &ContainerInner) -> Result<()> {
        let persisted = PersistedContainer {
            id: self.id.clone(),
            name: self.name.clone(),
            runtime: self.runtime.clone(),
            common_config: inner.common_config.clone(),
            host_config: inner.host_config.clone(),
            network_settings: inner.network_settings.clone(),
            rm_anonymous_volumes: inner.rm_anonymous_volumes,
            state: self.state.snapshot(),
        };
        fs::create_dir_all(self.bundle_path())?;
        let data = serde_json::to_vec(&persisted)?;
        fs::write(self.record_path(), data)?;
        Ok(())
    }

    /// Load a persisted record back from a bundle directory.
    pub fn load(root_path: &Path, state_path: &Path, id: &str) -> Result<Self> {
        let record = root_path.join(id).join(defaults::CONTAINER_RECORD_JSON);
        let persisted: PersistedContainer = serde_json::from_slice(&fs::read(record)?)?;
        Ok(Self {
            id: persisted.id,
            name: persisted.name,
            runtime: persisted.runtime,
            root_path: root_path.to_path_buf(),
            state_path: state_path.to_path_buf(),
            state: ContainerState::from_snapshot(&persisted.state),
            inner: Mutex::new(ContainerInner {
                common_config: persisted.common_config,
                host_config: persisted.host_config,
                network_settings: persisted.network_settings,
                restart_manager: RestartManager::default(),
                health_probe: None,
                rm_anonymous_volumes: persisted.rm_anonymous_volumes,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_paths() {
        let container = Container::new(
            "abc",
            "web",
            "runc",
            "/var/lib/engine",
            "/var/run/engine",
            CommonConfig::default(),
            HostConfig::default(),
        );

        assert_eq!(
            container.spec_path(),
            PathBuf::from("/var/lib/engine/abc/config.json")
        );
        assert_eq!(
            container.record_path(),
            PathBuf::from("/var/lib/engine/abc/container.json")
        );
        assert_eq!(
            container.exit_fifo_path(),
            PathBuf::from("/var/run/engine/abc/exit.fifo")
        );
        assert_eq!(
            container.pid_file_path(),
            PathBuf::from("/var/run/engine/abc/pid.file")
        );
    }

    #[tokio::test]
    async fn persistence_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("root");
        let state = dir.path().join("state");

        let mut common = CommonConfig::default();
        common.image = "busybox:latest".into();
        common.config.env = vec!["FOO=bar".into()];
        let mut host = HostConfig::default();
        host.auto_remove = true;
        host.network_mode = "bridge".into();

        let container = Container::new("abc", "web", "runc", &root, &state, common, host);
        container.state.set_error("last failure");
        {
            let inner = container.lock().await;
            container.to_disk(&inner).expect("persist");
        }

        let loaded = Container::load(&root, &state, "abc").expect("load");
        assert_eq!(loaded.id(), "abc");
        assert_eq!(loaded.name(), "web");
        assert_eq!(loaded.runtime(), "runc");
        let inner = loaded.lock().await;
        assert_eq!(inner.common_config.image, "busybox:latest");
        assert!(inner.host_config.auto_remove);
        assert_eq!(
            loaded.state.snapshot().error.as_deref(),
            Some("last failure")
        );
    }

    #[test]
    fn restart_manager_suppression() {
        let mut rm = RestartManager::default();
        assert!(!rm.is_suppressed());
        rm.cancel_next_restart();
        assert!(rm.is_suppressed());
        rm.reset();
        assert!(!rm.is_suppressed());
    }
}
