//! The exit monitor: a single background task owning the exit FIFO of every
//! running container. When a FIFO becomes readable the runtime's monitor
//! process has reported the container exit; the supervisor finalises the
//! state machine, persists the record and hands auto-remove containers to
//! the reaper.

use crate::{
    container::Container,
    defaults,
    error::{EngineError, Result},
};
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, error, warn};
use nix::{
    fcntl::{open, OFlag},
    sys::stat::Mode,
    unistd,
};
use std::{
    io,
    os::unix::io::{AsRawFd, RawFd},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{io::unix::AsyncFd, sync::mpsc};

/// An open exit FIFO. The descriptor is opened read/write so the FIFO never
/// reports end-of-file before the runtime monitor attaches, and is closed on
/// drop.
pub(crate) struct ExitFifo {
    fd: RawFd,
}

impl ExitFifo {
    /// Create the exit FIFO inside a container state directory. An already
    /// existing FIFO from a previous start is reused.
    pub fn create(state_dir: &Path) -> Result<PathBuf> {
        let path = state_dir.join(defaults::EXIT_FIFO);
        match unistd::mkfifo(&path, Mode::from_bits_truncate(defaults::EXIT_FIFO_MODE)) {
            Ok(()) | Err(nix::Error::EEXIST) => Ok(path),
            Err(e) => Err(EngineError::Io(io::Error::from_raw_os_error(e as i32))),
        }
    }

    /// Open the exit FIFO. The engine holds a read/write descriptor before
    /// the FIFO name is handed to the runtime.
    pub fn open(path: &Path) -> Result<Self> {
        let fd = open(
            path,
            OFlag::O_RDWR | OFlag::O_NONBLOCK | OFlag::O_CLOEXEC,
            Mode::empty(),
        )
        .map_err(|e| EngineError::Io(io::Error::from_raw_os_error(e as i32)))?;
        Ok(Self { fd })
    }
}

impl AsRawFd for ExitFifo {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for ExitFifo {
    fn drop(&mut self) {
        let _ = unistd::close(self.fd);
    }
}

/// Read the little-endian exit code from the FIFO. A descriptor which closes
/// or errors without carrying a full code reads as SIGKILL.
async fn read_exit_code(fifo: ExitFifo) -> i32 {
    let afd = match AsyncFd::new(fifo) {
        Ok(afd) => afd,
        Err(e) => {
            error!("Failed to watch exit fifo: {}", e);
            return defaults::EXIT_CODE_SIGKILLED;
        }
    };

    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        let mut guard = match afd.readable().await {
            Ok(guard) => guard,
            Err(e) => {
                error!("Failed to wait for exit fifo: {}", e);
                return defaults::EXIT_CODE_SIGKILLED;
            }
        };
        match guard.try_io(|inner| {
            unistd::read(inner.get_ref().as_raw_fd(), &mut buf[filled..])
                .map_err(|e| io::Error::from_raw_os_error(e as i32))
        }) {
            Ok(Ok(0)) => return defaults::EXIT_CODE_SIGKILLED,
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) => {
                error!("Failed to read exit fifo: {}", e);
                return defaults::EXIT_CODE_SIGKILLED;
            }
            Err(_would_block) => continue,
        }
    }
    i32::from_le_bytes(buf)
}

struct Watch {
    fifo: ExitFifo,
    record: Arc<Container>,
}

/// Handle to the process-wide exit monitor task.
pub struct Supervisor {
    tx: mpsc::UnboundedSender<Watch>,
}

impl Supervisor {
    /// Spawn the monitor task. Ids of exited auto-remove containers are sent
    /// to `reaper`.
    pub fn spawn(reaper: mpsc::UnboundedSender<String>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Watch>();
        tokio::spawn(async move {
            let mut exits = FuturesUnordered::new();
            loop {
                tokio::select! {
                    watch = rx.recv() => match watch {
                        Some(watch) => exits.push(handle_exit(watch, reaper.clone())),
                        None => break,
                    },
                    Some(()) = exits.next() => {}
                }
            }
            // drain remaining watches on shutdown
            while exits.next().await.is_some() {}
        });
        Self { tx }
    }

    /// Register an exit FIFO. Ownership of the descriptor moves to the
    /// monitor, which closes it after the exit code is consumed.
    pub(crate) fn add_exit_monitor(&self, fifo: ExitFifo, record: Arc<Container>) -> Result<()> {
        self.tx
            .send(Watch { fifo, record })
            .map_err(|_| EngineError::RuntimeFailure("exit monitor is not running".into()))
    }
}

async fn handle_exit(watch: Watch, reaper: mpsc::UnboundedSender<String>) {
    let Watch { fifo, record } = watch;
    let exit_code = read_exit_code(fifo).await;
    debug!(
        "Monitor of container {} reported exit code {}",
        record.id(),
        exit_code
    );

    let inner = record.lock().await;
    record.state.set_stopped(exit_code);
    if let Err(e) = record.to_disk(&inner) {
        // in-memory state is authoritative from here on
        error!("Failed to persist stopped container {}: {}", record.id(), e);
    }
    let auto_remove = inner.host_config.auto_remove;
    drop(inner);

    if auto_remove && reaper.send(record.id().to_string()).is_err() {
        warn!(
            "Reaper is gone, container {} will not be auto removed",
            record.id()
        );
    }
}

/// After a failed `runtime start` the monitor may still be tearing down
/// cgroups and processes. Give it a bounded window to report before cleanup
/// proceeds; the descriptor is closed either way.
pub(crate) async fn wait_exit_fifo(id: &str, fifo: ExitFifo) {
    let window = Duration::from_secs(defaults::FAILED_START_FIFO_WAIT_SECS);
    match tokio::time::timeout(window, read_exit_code(fifo)).await {
        Ok(code) => error!("The monitor of container {} has exited: {}", id, code),
        Err(_) => error!("Wait for the monitor of container {} timed out", id),
    }
}
