//! Error handling helpers and primitives.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    InvalidTransition(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("no such container: {0}")]
    NotFound(String),

    #[error("runtime failure: {0}")]
    RuntimeFailure(String),

    #[error("failed to mount {target}: {source}")]
    MountFailure { target: String, source: nix::Error },

    #[error("failed to umount {target}: {source}")]
    UmountFailure { target: String, source: nix::Error },

    #[error("failed to create symlink {link}: {source}")]
    SymlinkFailure {
        link: String,
        source: std::io::Error,
    },

    #[error("failed to renew container spec: {0}")]
    SpecRenewalFailure(String),

    #[error("too many environment variables, the limit is {0}")]
    EnvTooLong(usize),

    #[error("unable to resolve user {0}")]
    UserResolution(String),

    #[error("no command specified")]
    EmptyArgv,

    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("process (pid={pid}) is not alive, can not kill with signal {signal}")]
    NotAlive { pid: i32, signal: u32 },

    #[error("failed to auto remove container {0}")]
    AutoRemoveFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Chain creates a string from an error stack.
pub fn chain(res: anyhow::Error) -> String {
    res.chain()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}

/// Extract a process exit code from the tail of a runtime error message.
///
/// Low level runtimes report a failed container process as
/// `... exit status <n>`; when present that code is propagated as the
/// container's exit code instead of the generic start failure code.
pub fn exit_code_from_message(msg: &str) -> Option<i32> {
    let (_, tail) = msg.rsplit_once("exit status ")?;
    let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
