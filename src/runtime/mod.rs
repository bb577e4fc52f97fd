//! The contract between the lifecycle engine and a low-level OCI runtime,
//! the component which actually creates namespaces/cgroups and executes the
//! container's first process.

use crate::oci_spec::runtime::{Process, Spec};
use anyhow::Result;
use async_trait::async_trait;
use derive_builder::Builder;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum::{AsRefStr, Display};

/// Console FIFO names for stdin, stdout and stderr, in that order.
pub type ConsoleFifos = [Option<String>; 3];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Identification of a started container process, together with the start
/// times used to guard against PID reuse.
pub struct PidInfo {
    /// The container init process.
    pub pid: i32,

    /// The parent of the init process, the runtime's monitor.
    pub ppid: i32,

    /// Kernel start time of `pid`.
    pub start_time: u64,

    /// Kernel start time of `ppid`.
    pub pstart_time: u64,
}

#[derive(AsRefStr, Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
/// The runtime families this engine distinguishes. The family decides how an
/// exec process spec is synthesised and whether host conveniences like the
/// mtab symlink apply.
pub enum RuntimeFamily {
    /// An embedded runtime which keeps the container configuration in its own
    /// config file.
    Lcr,

    /// A VM based runtime reached through a task address.
    Kata,

    /// Any generic OCI command line runtime.
    Oci,
}

impl RuntimeFamily {
    /// Classify a runtime by its configured name.
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("lcr") {
            RuntimeFamily::Lcr
        } else if name.eq_ignore_ascii_case("kata-runtime") {
            RuntimeFamily::Kata
        } else {
            RuntimeFamily::Oci
        }
    }
}

#[derive(Builder, Clone, Debug, Getters, CopyGetters)]
#[builder(pattern = "owned", setter(into, strip_option))]
/// Parameters for creating a container.
pub struct CreateParams {
    #[get = "pub"]
    /// Bundle directory holding the OCI configuration and rootfs.
    bundle: PathBuf,

    #[get = "pub"]
    /// Ephemeral state directory root.
    state: PathBuf,

    #[get = "pub"]
    /// The renewed OCI configuration.
    spec: Spec,

    #[get_copy = "pub"]
    #[builder(default)]
    /// Allocate a terminal for the container.
    terminal: bool,

    #[get_copy = "pub"]
    #[builder(default)]
    /// Keep stdin open even when not attached.
    open_stdin: bool,

    #[get = "pub"]
    #[builder(default)]
    /// Console FIFOs for stdin, stdout and stderr.
    console_fifos: ConsoleFifos,

    #[get = "pub"]
    /// FIFO through which the runtime monitor reports the exit code.
    exit_fifo: PathBuf,

    #[get = "pub"]
    #[builder(default)]
    /// Task address of the sandbox hosting this container, if any.
    task_address: Option<String>,
}

#[derive(Builder, Clone, Debug, Getters, CopyGetters)]
#[builder(pattern = "owned", setter(into, strip_option))]
/// Parameters for starting a created container.
pub struct StartParams {
    #[get = "pub"]
    /// Persistent state directory root.
    rootpath: PathBuf,

    #[get = "pub"]
    /// Ephemeral state directory root.
    state: PathBuf,

    #[get_copy = "pub"]
    #[builder(default)]
    /// Allocate a terminal for the container.
    terminal: bool,

    #[get_copy = "pub"]
    #[builder(default)]
    /// Keep stdin open even when not attached.
    open_stdin: bool,

    #[get = "pub"]
    #[builder(default)]
    /// Engine log file handed to the runtime.
    logpath: Option<PathBuf>,

    #[get = "pub"]
    /// Engine log level handed to the runtime.
    loglevel: String,

    #[get = "pub"]
    #[builder(default)]
    /// Console FIFOs for stdin, stdout and stderr.
    console_fifos: ConsoleFifos,

    #[get_copy = "pub"]
    /// Seconds the runtime may take before the start is considered failed.
    start_timeout: u64,

    #[get = "pub"]
    /// File the runtime writes the container init pid into.
    pid_file: PathBuf,

    #[get = "pub"]
    /// FIFO through which the runtime monitor reports the exit code.
    exit_fifo: PathBuf,

    #[get_copy = "pub"]
    #[builder(default)]
    /// Whether the container image is an OCI image.
    image_type_oci: bool,
}

#[derive(Builder, Clone, Copy, Debug, CopyGetters)]
#[builder(pattern = "owned", setter(into))]
#[getset(get_copy = "pub")]
/// Parameters for delivering a signal to a container process.
pub struct KillParams {
    /// The container init process.
    pid: i32,

    /// Kernel start time of `pid`, validated before delivery.
    start_time: u64,

    /// The signal to deliver.
    signal: u32,

    /// The container's configured stop signal.
    stop_signal: u32,
}

#[derive(Builder, Clone, Debug, Getters)]
#[builder(pattern = "owned", setter(into))]
#[getset(get = "pub")]
/// Parameters for pausing a running container.
pub struct PauseParams {
    /// Persistent state directory root.
    rootpath: PathBuf,

    /// Ephemeral state directory root.
    state: PathBuf,
}

#[derive(Builder, Clone, Debug, Getters)]
#[builder(pattern = "owned", setter(into))]
#[getset(get = "pub")]
/// Parameters for resuming a paused container.
pub struct ResumeParams {
    /// Persistent state directory root.
    rootpath: PathBuf,

    /// Ephemeral state directory root.
    state: PathBuf,
}

#[derive(Builder, Clone, Debug, Getters, CopyGetters)]
#[builder(pattern = "owned", setter(into, strip_option))]
/// Parameters for executing an additional process inside a running container.
pub struct ExecParams {
    #[get = "pub"]
    #[builder(default)]
    /// Engine log file handed to the runtime.
    logpath: Option<PathBuf>,

    #[get = "pub"]
    /// Engine log level handed to the runtime.
    loglevel: String,

    #[get = "pub"]
    #[builder(default)]
    /// Console endpoints for stdin, stdout and stderr.
    console_fifos: ConsoleFifos,

    #[get = "pub"]
    /// Persistent state directory root.
    rootpath: PathBuf,

    #[get = "pub"]
    /// Ephemeral state directory root.
    state: PathBuf,

    #[get_copy = "pub"]
    #[builder(default)]
    /// Seconds until the exec is aborted, zero meaning no limit.
    timeout: i64,

    #[get = "pub"]
    /// Unique suffix identifying this exec invocation.
    suffix: String,

    #[get = "pub"]
    /// The synthesised process specification.
    spec: Process,

    #[get_copy = "pub"]
    #[builder(default)]
    /// Whether stdin is attached.
    attach_stdin: bool,

    #[get = "pub"]
    #[builder(default)]
    /// Working directory override from the request.
    workdir: Option<String>,
}

#[derive(Builder, Clone, Debug, Getters, CopyGetters)]
#[builder(pattern = "owned", setter(into, strip_option))]
/// Parameters for reclaiming the runtime resources of an exited container.
pub struct CleanParams {
    #[get = "pub"]
    /// Persistent state directory root.
    rootpath: PathBuf,

    #[get = "pub"]
    /// Ephemeral state directory root.
    state: PathBuf,

    #[get = "pub"]
    #[builder(default)]
    /// Engine log file handed to the runtime.
    logpath: Option<PathBuf>,

    #[get = "pub"]
    /// Engine log level handed to the runtime.
    loglevel: String,

    #[get_copy = "pub"]
    #[builder(default)]
    /// The exited init pid, zero when the container never ran.
    pid: i32,
}

#[derive(Builder, Clone, Debug, Getters)]
#[builder(pattern = "owned", setter(into))]
#[getset(get = "pub")]
/// Parameters for removing the runtime's on-disk container directory.
pub struct RmParams {
    /// Persistent state directory root.
    rootpath: PathBuf,
}

#[async_trait]
/// ContainerRuntime is the trait every supported low-level runtime family
/// implements. All operations are keyed by container id.
pub trait ContainerRuntime: Send + Sync {
    /// Create the container, leaving it ready to be started.
    async fn create(&self, id: &str, params: &CreateParams) -> Result<()>;

    /// Execute the user defined process in a created container and report the
    /// identification of the started process.
    async fn start(&self, id: &str, params: &StartParams) -> Result<PidInfo>;

    /// Send the specified signal to the container's init process.
    async fn kill(&self, id: &str, params: &KillParams) -> Result<()>;

    /// Suspend all processes inside the container.
    async fn pause(&self, id: &str, params: &PauseParams) -> Result<()>;

    /// Resume all processes that have been previously paused.
    async fn resume(&self, id: &str, params: &ResumeParams) -> Result<()>;

    /// Execute an additional process inside the container and return its exit
    /// code.
    async fn exec(&self, id: &str, params: &ExecParams) -> Result<i32>;

    /// Reclaim resources held for an exited or failed container.
    async fn clean_resource(&self, id: &str, params: &CleanParams) -> Result<()>;

    /// Remove the runtime's container directory.
    async fn rm(&self, id: &str, params: &RmParams) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_family_from_name() {
        assert_eq!(RuntimeFamily::from_name("lcr"), RuntimeFamily::Lcr);
        assert_eq!(RuntimeFamily::from_name("LCR"), RuntimeFamily::Lcr);
        assert_eq!(
            RuntimeFamily::from_name("kata-runtime"),
            RuntimeFamily::Kata
        );
        assert_eq!(RuntimeFamily::from_name("runc"), RuntimeFamily::Oci);
        assert_eq!(RuntimeFamily::from_name("crun"), RuntimeFamily::Oci);
        assert_eq!(&RuntimeFamily::Kata.to_string(), "kata");
    }

    #[test]
    fn build_kill_params() {
        let params = KillParamsBuilder::default()
            .pid(42)
            .start_time(100u64)
            .signal(15u32)
            .stop_signal(15u32)
            .build()
            .expect("build kill params");

        assert_eq!(params.pid(), 42);
        assert_eq!(params.signal(), 15);
    }
}
