//! OCI runtime spec
//!
//! The data model for the container configuration document stored as
//! `config.json` inside a bundle. Only the sections this engine reads or
//! rewrites are modeled as typed fields; everything else round-trips
//! untouched through flattened maps so a renewed spec never loses keys a
//! sibling component wrote.

use crate::error::Result;
use derive_builder::Builder;
use getset::{CopyGetters, Getters, MutGetters, Setters};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fs::File,
    path::{Path, PathBuf},
};

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug, Builder, Getters, MutGetters, Setters)]
#[builder(default, pattern = "owned", setter(into, strip_option))]
/// Spec is the base configuration for the container.
pub struct Spec {
    #[getset(get = "pub")]
    #[serde(rename = "ociVersion")]
    /// Version of the Open Container Initiative Runtime Specification with
    /// which the bundle complies.
    version: String,

    #[getset(get = "pub", get_mut = "pub", set = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Process configures the container process.
    process: Option<Process>,

    #[getset(get = "pub", set = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Root configures the container's root filesystem.
    root: Option<Root>,

    #[getset(get = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Hostname configures the container's hostname.
    hostname: Option<String>,

    #[getset(get = "pub", get_mut = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Mounts configures additional mounts (on top of Root).
    mounts: Option<Vec<Mount>>,

    #[getset(get = "pub", get_mut = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Annotations contains arbitrary metadata for the container.
    annotations: Option<BTreeMap<String, String>>,

    #[getset(get = "pub", get_mut = "pub", set = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Linux is platform-specific configuration for Linux based containers.
    linux: Option<Linux>,

    #[getset(get = "pub")]
    #[serde(flatten)]
    /// Sections this engine does not interpret.
    extra: BTreeMap<String, Value>,
}

impl Default for Spec {
    fn default() -> Self {
        Self {
            version: "1.0.1".into(),
            process: None,
            root: None,
            hostname: None,
            mounts: None,
            annotations: None,
            linux: None,
            extra: BTreeMap::new(),
        }
    }
}

impl Spec {
    /// Load a spec from the provided file `Path`.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    /// Save the spec into the provided file `Path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut file = File::create(path)?;
        serde_json::to_writer(&mut file, self)?;
        Ok(())
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug, Builder, Getters, MutGetters, Setters)]
#[builder(default, pattern = "owned", setter(into, strip_option))]
/// Process contains information to start a specific application inside the
/// container.
pub struct Process {
    #[getset(get = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Terminal creates an interactive terminal for the container.
    terminal: Option<bool>,

    #[getset(get = "pub", set = "pub")]
    /// User specifies user information for the process.
    user: User,

    #[getset(get = "pub", get_mut = "pub", set = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Args specifies the binary and arguments for the application to execute.
    args: Option<Vec<String>>,

    #[getset(get = "pub", get_mut = "pub", set = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Env populates the process environment for the process.
    env: Option<Vec<String>>,

    #[getset(get = "pub", set = "pub")]
    /// Cwd is the current working directory for the process and must be
    /// relative to the container's root.
    cwd: String,

    #[getset(get = "pub", set = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Rlimits specifies rlimit options to apply to the process.
    rlimits: Option<Vec<PosixRlimit>>,

    #[getset(get = "pub", set = "pub")]
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "noNewPrivileges"
    )]
    /// NoNewPrivileges controls whether additional privileges could be gained
    /// by processes in the container.
    no_new_privileges: Option<bool>,

    #[getset(get = "pub")]
    #[serde(flatten)]
    /// Process settings this engine does not interpret.
    extra: BTreeMap<String, Value>,
}

impl Default for Process {
    fn default() -> Self {
        Self {
            terminal: None,
            user: User::default(),
            args: None,
            env: None,
            cwd: "/".into(),
            rlimits: None,
            no_new_privileges: None,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(
    Clone, Default, PartialEq, Serialize, Deserialize, Debug, Builder, CopyGetters, Getters,
)]
#[builder(default, pattern = "owned", setter(into, strip_option))]
/// User specifies specific user (and group) information for the container
/// process.
pub struct User {
    #[getset(get_copy = "pub")]
    /// UID is the user id.
    uid: u32,

    #[getset(get_copy = "pub")]
    /// GID is the group id.
    gid: u32,

    #[getset(get = "pub")]
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "additionalGids"
    )]
    /// AdditionalGids are additional group ids set for the container's
    /// process.
    additional_gids: Option<Vec<u32>>,

    #[getset(get = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Username is the user name.
    username: Option<String>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug, Builder, Getters)]
#[builder(pattern = "owned", setter(into, strip_option))]
/// Root contains information about the container's root filesystem on the
/// host.
pub struct Root {
    #[getset(get = "pub")]
    /// Path is the absolute path to the container's root filesystem.
    path: PathBuf,

    #[getset(get = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    /// Readonly makes the root filesystem for the container readonly before
    /// the process is executed.
    readonly: Option<bool>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug, Builder, Getters)]
#[builder(pattern = "owned", setter(into, strip_option))]
/// Mount specifies a mount for a container.
pub struct Mount {
    #[getset(get = "pub")]
    /// Destination is the absolute path where the mount will be placed in the
    /// container.
    destination: PathBuf,

    #[getset(get = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "type")]
    #[builder(default)]
    /// Type specifies the mount kind.
    typ: Option<String>,

    #[getset(get = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    /// Source specifies the source path of the mount.
    source: Option<PathBuf>,

    #[getset(get = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    /// Options are fstab style mount options.
    options: Option<Vec<String>>,
}

#[derive(
    Clone, Default, PartialEq, Serialize, Deserialize, Debug, Builder, Getters, MutGetters, Setters,
)]
#[builder(default, pattern = "owned", setter(into, strip_option))]
/// Linux contains platform-specific configuration for Linux based containers.
pub struct Linux {
    #[getset(get = "pub", set = "pub")]
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "cgroupsPath"
    )]
    /// CgroupsPath specifies the path to cgroups that are created and/or
    /// joined by the container.
    cgroups_path: Option<PathBuf>,

    #[getset(get = "pub", get_mut = "pub", set = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Resources contain cgroup information for handling resource constraints
    /// for the container.
    resources: Option<LinuxResources>,

    #[getset(get = "pub", get_mut = "pub", set = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Namespaces contains the namespaces that are created and/or joined by
    /// the container.
    namespaces: Option<Vec<LinuxNamespace>>,

    #[getset(get = "pub", get_mut = "pub", set = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Devices are a list of device nodes that are created for the container.
    devices: Option<Vec<LinuxDevice>>,

    #[getset(get = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Seccomp specifies the seccomp security settings for the container.
    /// Handed to the runtime verbatim.
    seccomp: Option<Value>,

    #[getset(get = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Sysctl are a set of key value pairs that are set for the container on
    /// start.
    sysctl: Option<BTreeMap<String, String>>,

    #[getset(get = "pub")]
    #[serde(flatten)]
    /// Linux settings this engine does not interpret.
    extra: BTreeMap<String, Value>,
}

#[derive(
    Clone, Default, PartialEq, Serialize, Deserialize, Debug, Builder, Getters, MutGetters, Setters,
)]
#[builder(default, pattern = "owned", setter(into, strip_option))]
/// LinuxResources has container runtime resource constraints.
pub struct LinuxResources {
    #[getset(get = "pub", get_mut = "pub", set = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Devices configures the device allowlist.
    devices: Option<Vec<LinuxDeviceCgroup>>,

    #[getset(get = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Memory restriction configuration.
    memory: Option<LinuxMemory>,

    #[getset(get = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// CPU resource restriction configuration.
    cpu: Option<LinuxCpu>,

    #[getset(get = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Task resource restriction configuration.
    pids: Option<LinuxPids>,

    #[getset(get = "pub")]
    #[serde(flatten)]
    /// Resource sections this engine does not interpret.
    extra: BTreeMap<String, Value>,
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Debug, Builder, Getters)]
#[builder(default, pattern = "owned", setter(into, strip_option))]
/// LinuxMemory for Linux cgroup 'memory' resource management.
pub struct LinuxMemory {
    #[getset(get = "pub")]
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Memory limit (in bytes).
    limit: Option<i64>,

    #[getset(get = "pub")]
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Memory reservation or soft_limit (in bytes).
    reservation: Option<i64>,

    #[getset(get = "pub")]
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Total memory limit (memory + swap).
    swap: Option<i64>,

    #[getset(get = "pub")]
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Kernel memory limit (in bytes).
    kernel: Option<i64>,

    #[getset(get = "pub")]
    #[serde(skip_serializing_if = "Option::is_none", rename = "kernelTCP")]
    /// Kernel memory limit for tcp (in bytes).
    kernel_tcp: Option<i64>,

    #[getset(get = "pub")]
    #[serde(skip_serializing_if = "Option::is_none")]
    /// How aggressive the kernel will swap memory pages.
    swappiness: Option<u64>,

    #[getset(get = "pub")]
    #[serde(skip_serializing_if = "Option::is_none", rename = "disableOOMKiller")]
    /// DisableOOMKiller disables the OOM killer for out of memory conditions.
    disable_oom_killer: Option<bool>,
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Debug, Builder, Getters)]
#[builder(default, pattern = "owned", setter(into, strip_option))]
/// LinuxCpu for Linux cgroup 'cpu' resource management.
pub struct LinuxCpu {
    #[getset(get = "pub")]
    #[serde(skip_serializing_if = "Option::is_none")]
    /// CPU shares (relative weight (ratio) vs. other cgroups with cpu shares).
    shares: Option<u64>,

    #[getset(get = "pub")]
    #[serde(skip_serializing_if = "Option::is_none")]
    /// CPU hardcap limit (in usecs). Allowed cpu time in a given period.
    quota: Option<i64>,

    #[getset(get = "pub")]
    #[serde(skip_serializing_if = "Option::is_none")]
    /// CPU period to be used for hardcapping (in usecs).
    period: Option<u64>,

    #[getset(get = "pub")]
    #[serde(skip_serializing_if = "Option::is_none", rename = "realtimeRuntime")]
    /// How much time realtime scheduling may use (in usecs).
    realtime_runtime: Option<i64>,

    #[getset(get = "pub")]
    #[serde(skip_serializing_if = "Option::is_none", rename = "realtimePeriod")]
    /// CPU period to be used for realtime scheduling (in usecs).
    realtime_period: Option<u64>,

    #[getset(get = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// CPUs to use within the cpuset. Default is to use any CPU available.
    cpus: Option<String>,

    #[getset(get = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// List of memory nodes in the cpuset. Default is to use any available
    /// memory node.
    mems: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug, Builder, CopyGetters)]
#[builder(pattern = "owned", setter(into))]
/// LinuxPids for Linux cgroup 'pids' resource management (Linux 4.3).
pub struct LinuxPids {
    #[getset(get_copy = "pub")]
    /// Maximum number of PIDs. Default is "no limit".
    limit: i64,
}

#[derive(
    Clone, PartialEq, Eq, Serialize, Deserialize, Debug, Builder, CopyGetters, Getters, Setters,
)]
#[builder(pattern = "owned", setter(into, strip_option))]
/// LinuxNamespace is the configuration for a Linux namespace.
pub struct LinuxNamespace {
    #[getset(get_copy = "pub")]
    #[serde(rename = "type")]
    /// Type is the type of namespace.
    typ: LinuxNamespaceType,

    #[getset(get = "pub", set = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    /// Path is a path to an existing namespace persisted on disk that can be
    /// joined and is of the same type.
    path: Option<PathBuf>,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub enum LinuxNamespaceType {
    #[serde(rename = "pid")]
    /// For isolating process IDs.
    Pid,

    #[serde(rename = "network")]
    /// For isolating network devices, stacks, ports, etc..
    Network,

    #[serde(rename = "mount")]
    /// For isolating mount points.
    Mount,

    #[serde(rename = "ipc")]
    /// For isolating System V IPC, POSIX message queues.
    Ipc,

    #[serde(rename = "uts")]
    /// For isolating hostname and NIS domain name.
    Uts,

    #[serde(rename = "user")]
    /// For isolating user and group IDs.
    User,

    #[serde(rename = "cgroup")]
    /// For isolating cgroup hierarchies.
    Cgroup,
}

impl LinuxNamespaceType {
    /// The entry under `/proc/<pid>/ns` backing this namespace type.
    pub fn proc_entry(self) -> &'static str {
        match self {
            LinuxNamespaceType::Pid => "pid",
            LinuxNamespaceType::Network => "net",
            LinuxNamespaceType::Mount => "mnt",
            LinuxNamespaceType::Ipc => "ipc",
            LinuxNamespaceType::Uts => "uts",
            LinuxNamespaceType::User => "user",
            LinuxNamespaceType::Cgroup => "cgroup",
        }
    }
}

#[derive(
    Clone, PartialEq, Eq, Serialize, Deserialize, Debug, Builder, CopyGetters, Getters,
)]
#[builder(pattern = "owned", setter(into, strip_option))]
/// POSIX rlimit type and restrictions.
pub struct PosixRlimit {
    #[getset(get = "pub")]
    #[serde(rename = "type")]
    /// Type of the rlimit to set.
    typ: String,

    #[getset(get_copy = "pub")]
    /// Hard is the hard limit for the specified type.
    hard: u64,

    #[getset(get_copy = "pub")]
    /// Soft is the soft limit for the specified type.
    soft: u64,
}

#[derive(
    Clone, PartialEq, Eq, Serialize, Deserialize, Debug, Builder, CopyGetters, Getters,
)]
#[builder(pattern = "owned", setter(into, strip_option))]
/// LinuxDevice represents the mknod information for a Linux special device
/// file.
pub struct LinuxDevice {
    #[getset(get = "pub")]
    /// Path to the device.
    path: PathBuf,

    #[getset(get = "pub")]
    #[serde(rename = "type")]
    /// Device type, block, char, etc..
    typ: String,

    #[getset(get_copy = "pub")]
    /// Major is the device's major number.
    major: i64,

    #[getset(get_copy = "pub")]
    /// Minor is the device's minor number.
    minor: i64,

    #[getset(get = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "fileMode")]
    #[builder(default)]
    /// FileMode permission bits for the device.
    file_mode: Option<u32>,

    #[getset(get = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    /// UID of the device.
    uid: Option<u32>,

    #[getset(get = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    /// Gid of the device.
    gid: Option<u32>,
}

#[derive(
    Clone, PartialEq, Eq, Serialize, Deserialize, Debug, Builder, CopyGetters, Getters,
)]
#[builder(pattern = "owned", setter(into, strip_option))]
/// LinuxDeviceCgroup represents a device rule for the devices specified to
/// the device controller.
pub struct LinuxDeviceCgroup {
    #[getset(get_copy = "pub")]
    /// Allow or deny.
    allow: bool,

    #[getset(get = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "type")]
    #[builder(default)]
    /// Device type, block, char, etc..
    typ: Option<String>,

    #[getset(get = "pub")]
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    /// Major is the device's major number.
    major: Option<i64>,

    #[getset(get = "pub")]
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    /// Minor is the device's minor number.
    minor: Option<i64>,

    #[getset(get = "pub")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    /// Cgroup access permissions format, rwm.
    access: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;

    fn minimal_spec() -> Result<Spec> {
        let process = ProcessBuilder::default()
            .args(vec!["/bin/sh".to_string()])
            .cwd("/")
            .build()
            .map_err(|e| crate::error::EngineError::InvalidArgument(e.to_string()))?;
        let root = RootBuilder::default()
            .path("rootfs")
            .build()
            .map_err(|e| crate::error::EngineError::InvalidArgument(e.to_string()))?;
        Ok(SpecBuilder::default()
            .process(process)
            .root(root)
            .build()
            .map_err(|e| crate::error::EngineError::InvalidArgument(e.to_string()))?)
    }

    #[test]
    fn load_save_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");

        let spec = minimal_spec()?;
        spec.save(&path)?;
        let loaded = Spec::load(&path)?;

        assert_eq!(spec, loaded);
        Ok(())
    }

    #[test]
    fn unknown_keys_survive_save() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");

        let raw = serde_json::json!({
            "ociVersion": "1.0.1",
            "process": { "cwd": "/", "user": { "uid": 0, "gid": 0 }, "capabilities": { "bounding": ["CAP_CHOWN"] } },
            "root": { "path": "rootfs" },
            "linux": { "maskedPaths": ["/proc/kcore"] },
            "hooks": { "poststop": [] }
        });
        std::fs::write(&path, serde_json::to_vec(&raw)?)?;

        let spec = Spec::load(&path)?;
        spec.save(&path)?;
        let reread: serde_json::Value = serde_json::from_slice(&std::fs::read(&path)?)?;

        assert_eq!(reread["hooks"], raw["hooks"]);
        assert_eq!(
            reread["process"]["capabilities"],
            raw["process"]["capabilities"]
        );
        assert_eq!(reread["linux"]["maskedPaths"], raw["linux"]["maskedPaths"]);
        Ok(())
    }

    #[test]
    fn namespace_type_serialization() -> Result<()> {
        let ns = LinuxNamespaceBuilder::default()
            .typ(LinuxNamespaceType::Uts)
            .path("/proc/1/ns/uts")
            .build()
            .map_err(|e| crate::error::EngineError::InvalidArgument(e.to_string()))?;

        let json = serde_json::to_string(&ns)?;
        assert_eq!(json, r#"{"type":"uts","path":"/proc/1/ns/uts"}"#);
        assert_eq!(LinuxNamespaceType::Network.proc_entry(), "net");
        Ok(())
    }
}
