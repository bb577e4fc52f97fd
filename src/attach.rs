//! I/O wiring for exec sessions.
//!
//! Requested streams are bridged between the caller and the runtime either
//! over a per-exec trio of named pipes or, for sandboxes reachable through a
//! vsock task address, over per-stream vsock endpoint names. One worker task
//! pumps all streams and is cancelled and joined when the exec finishes.

use crate::{
    defaults,
    error::{EngineError, Result},
    mount::ensure_dir,
    runtime::ConsoleFifos,
};
use log::warn;
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
};
use tokio::{
    io::{unix::AsyncFd, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Interest},
    sync::Notify,
    task::JoinHandle,
};

/// Caller-side endpoints of an exec session.
#[derive(Default)]
pub struct ExecStreams {
    pub stdin: Option<Box<dyn AsyncRead + Send + Unpin>>,
    pub stdout: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    pub stderr: Option<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl ExecStreams {
    pub fn attaches_anything(&self) -> bool {
        self.stdin.is_some() || self.stdout.is_some() || self.stderr.is_some()
    }
}

/// Create the per-exec FIFO trio below `fifo_home` for each attached stream.
/// Returns the endpoint names in stdin/stdout/stderr order.
pub fn create_exec_fifos(fifo_home: &Path, attach: [bool; 3]) -> Result<ConsoleFifos> {
    ensure_dir(fifo_home, defaults::TEMP_DIR_MODE)?;

    let mut fifos: ConsoleFifos = Default::default();
    for (slot, name) in ["stdin", "stdout", "stderr"].iter().enumerate() {
        if !attach[slot] {
            continue;
        }
        let path = fifo_home.join(format!("{}.fifo", name));
        match unistd::mkfifo(&path, Mode::from_bits_truncate(defaults::EXIT_FIFO_MODE)) {
            Ok(()) | Err(nix::Error::EEXIST) => {}
            Err(e) => return Err(EngineError::Io(io::Error::from_raw_os_error(e as i32))),
        }
        fifos[slot] = Some(path.display().to_string());
    }
    Ok(fifos)
}

/// Remove a per-exec FIFO home. Failure only costs disk space.
pub fn delete_exec_fifos(fifo_home: &Path) {
    if let Err(e) = std::fs::remove_dir_all(fifo_home) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(
                "Failed to delete exec fifo home {}: {}",
                fifo_home.display(),
                e
            );
        }
    }
}

/// Whether a sandbox task address routes I/O over vsock.
pub fn is_vsock_address(addr: &str) -> bool {
    addr.starts_with("vsock://")
}

/// Parse `vsock://<cid>:<port>` into its context id and port.
pub fn parse_vsock_address(addr: &str) -> Option<(u32, u32)> {
    let rest = addr.strip_prefix("vsock://")?;
    let (cid, port) = rest.split_once(':')?;
    Some((cid.parse().ok()?, port.parse().ok()?))
}

/// Build the per-stream vsock endpoint names for an exec session.
pub fn vsock_io_names(sandbox_id: &str, cid: u32, attach: [bool; 3], suffix: &str) -> ConsoleFifos {
    let mut names: ConsoleFifos = Default::default();
    for (slot, stream) in ["in", "out", "err"].iter().enumerate() {
        if attach[slot] {
            names[slot] = Some(format!("{}-{}-{}-{}", sandbox_id, cid, stream, suffix));
        }
    }
    names
}

/// A FIFO endpoint opened read/write and non-blocking, so neither side can
/// wedge on a missing peer and the pumps stay cancellable.
struct FifoEndpoint {
    fd: RawFd,
}

impl FifoEndpoint {
    fn open(path: &Path) -> io::Result<Self> {
        let fd = open(
            path,
            OFlag::O_RDWR | OFlag::O_NONBLOCK | OFlag::O_CLOEXEC,
            Mode::empty(),
        )
        .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
        Ok(Self { fd })
    }
}

impl AsRawFd for FifoEndpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for FifoEndpoint {
    fn drop(&mut self) {
        let _ = unistd::close(self.fd);
    }
}

fn nix_to_io(e: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

/// Pump the caller's stdin into the FIFO.
async fn pump_stdin(reader: Option<Box<dyn AsyncRead + Send + Unpin>>, path: Option<PathBuf>) {
    let (mut reader, path) = match (reader, path) {
        (Some(reader), Some(path)) => (reader, path),
        _ => return,
    };
    let afd = match FifoEndpoint::open(&path)
        .and_then(|fifo| AsyncFd::with_interest(fifo, Interest::WRITABLE))
    {
        Ok(afd) => afd,
        Err(e) => {
            warn!("Failed to open stdin endpoint {}: {}", path.display(), e);
            return;
        }
    };

    let mut buf = [0u8; 8192];
    loop {
        let filled = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        let mut written = 0;
        while written < filled {
            let mut guard = match afd.writable().await {
                Ok(guard) => guard,
                Err(_) => return,
            };
            match guard.try_io(|inner| {
                unistd::write(inner.get_ref().as_raw_fd(), &buf[written..filled])
                    .map_err(nix_to_io)
            }) {
                Ok(Ok(n)) => written += n,
                Ok(Err(_)) => return,
                Err(_would_block) => continue,
            }
        }
    }
}

/// Pump a FIFO into the caller's stdout or stderr.
async fn pump_output(writer: Option<Box<dyn AsyncWrite + Send + Unpin>>, path: Option<PathBuf>) {
    let (mut writer, path) = match (writer, path) {
        (Some(writer), Some(path)) => (writer, path),
        _ => return,
    };
    let afd = match FifoEndpoint::open(&path)
        .and_then(|fifo| AsyncFd::with_interest(fifo, Interest::READABLE))
    {
        Ok(afd) => afd,
        Err(e) => {
            warn!("Failed to open output endpoint {}: {}", path.display(), e);
            return;
        }
    };

    let mut buf = [0u8; 8192];
    loop {
        let mut guard = match afd.readable().await {
            Ok(guard) => guard,
            Err(_) => return,
        };
        match guard.try_io(|inner| {
            unistd::read(inner.get_ref().as_raw_fd(), &mut buf).map_err(nix_to_io)
        }) {
            Ok(Ok(0)) | Ok(Err(_)) => break,
            Ok(Ok(n)) => {
                if writer.write_all(&buf[..n]).await.is_err() {
                    return;
                }
                let _ = writer.flush().await;
            }
            Err(_would_block) => continue,
        }
    }
    let _ = writer.flush().await;
}

/// The per-exec I/O copy worker: a single task running a pump per attached
/// stream until the exec finishes or the worker is cancelled.
pub struct IoCopy {
    cancel: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl IoCopy {
    pub fn spawn(streams: ExecStreams, endpoints: &ConsoleFifos) -> Self {
        let cancel = Arc::new(Notify::new());
        let cancelled = cancel.clone();
        let paths: Vec<Option<PathBuf>> = endpoints
            .iter()
            .map(|e| e.as_ref().map(PathBuf::from))
            .collect();

        let handle = tokio::spawn(async move {
            let ExecStreams {
                stdin,
                stdout,
                stderr,
            } = streams;
            let pumps = async {
                futures::join!(
                    pump_stdin(stdin, paths[0].clone()),
                    pump_output(stdout, paths[1].clone()),
                    pump_output(stderr, paths[2].clone()),
                );
            };
            tokio::select! {
                _ = pumps => {}
                _ = cancelled.notified() => {}
            }
        });

        Self { cancel, handle }
    }

    /// Signal the worker to stop and join it.
    pub async fn shutdown(self) {
        self.cancel.notify_one();
        if let Err(e) = self.handle.await {
            warn!("Failed to join io copy worker: {}", e);
        }
    }
}
