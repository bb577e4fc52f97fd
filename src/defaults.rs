//! Crate-wide constants: file modes, identifier widths and hard limits.

/// Mode for cgroup related files.
pub const CGROUP_FILE_MODE: u32 = 0o644;

/// Mode for cgroup related directories.
pub const CGROUP_DIR_MODE: u32 = 0o755;

/// Mode for files carrying credentials or other sensitive state.
pub const SECURE_FILE_MODE: u32 = 0o640;

/// Mode for directories carrying sensitive state.
pub const SECURE_DIR_MODE: u32 = 0o750;

/// Mode for persisted configuration files.
pub const CONFIG_FILE_MODE: u32 = 0o640;

/// Mode for per-container state directories.
pub const TEMP_DIR_MODE: u32 = 0o700;

/// Mode for debug output files.
pub const DEBUG_FILE_MODE: u32 = 0o640;

/// Mode for the `/etc` directory created for the mtab symlink.
pub const ETC_DIR_MODE: u32 = 0o755;

/// Mode of the exit FIFO inside the state directory.
pub const EXIT_FIFO_MODE: u32 = 0o600;

/// Length of a container identifier in hex characters.
pub const CONTAINER_ID_LEN: usize = 64;

/// Length of an exec invocation suffix in hex characters.
pub const EXEC_SUFFIX_LEN: usize = 64;

/// Length of a generated network namespace name.
pub const NETNS_NAME_LEN: usize = 16;

/// Upper bound on the number of environment entries handed to a process.
pub const LIST_ENV_SIZE_MAX: usize = 200;

/// Upper bound on the byte length of a single environment entry written to
/// an env target file.
pub const ENV_ENTRY_SIZE_MAX: usize = 4096;

/// Exit code reported when a container failed before its process ran.
pub const EXIT_CODE_START_FAILED: i32 = 125;

/// Exit code reported when the exit FIFO closed without carrying a code.
pub const EXIT_CODE_SIGKILLED: i32 = 137;

/// Seconds to wait for the runtime monitor after a failed start.
pub const FAILED_START_FIFO_WAIT_SECS: u64 = 3;

/// Default PATH for processes spawned inside a container.
pub const DEFAULT_PATH_ENV: &str =
    "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Image backend type for OCI images.
pub const IMAGE_TYPE_OCI: &str = "oci";

/// Image backend type for embedded images.
pub const IMAGE_TYPE_EMBEDDED: &str = "embedded";

/// Image backend type for external rootfs containers.
pub const IMAGE_TYPE_EXTERNAL: &str = "external";

/// Size of the `/dev/shm` tmpfs mounted for shareable IPC containers.
pub const DEFAULT_SHM_SIZE: u64 = 64 * 1024 * 1024;

/// Name of the OCI configuration document inside a bundle.
pub const OCI_CONFIG_JSON: &str = "config.json";

/// Name of the persisted container record inside a bundle.
pub const CONTAINER_RECORD_JSON: &str = "container.json";

/// Name of the pid file inside a state directory.
pub const PID_FILE: &str = "pid.file";

/// Name of the exit FIFO inside a state directory.
pub const EXIT_FIFO: &str = "exit.fifo";
