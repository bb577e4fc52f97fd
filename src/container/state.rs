//! The container state machine.
//!
//! Status is kept word-atomic so readers never take a lock; the remaining
//! fields (pid tuple, timestamps, last error) sit behind a short-lived mutex
//! which is never held across an await point. Stop and removal completions
//! are fanned out through broadcast channels so every waiter wakes up.

use crate::{
    error::{EngineError, Result},
    runtime::PidInfo,
};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Mutex,
    },
    time::{Duration, SystemTime},
};
use strum::{AsRefStr, Display, EnumString};
use tokio::sync::broadcast;

#[derive(
    AsRefStr,
    Clone,
    Copy,
    Debug,
    Display,
    EnumString,
    Eq,
    PartialEq,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
/// Possible container states.
pub enum ContainerStatus {
    /// State could not be determined.
    Unknown = 0,

    /// The container exists but its process was never started.
    Created = 1,

    /// The start pipeline is materialising the container.
    Starting = 2,

    /// The container process is running.
    Running = 3,

    /// The container process exited.
    Stopped = 4,

    /// All processes inside the container are suspended.
    Paused = 5,

    /// The container stopped and a restart has been elected.
    Restarting = 6,

    /// The container state was lost beyond recovery.
    Dead = 7,
}

impl ContainerStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ContainerStatus::Created,
            2 => ContainerStatus::Starting,
            3 => ContainerStatus::Running,
            4 => ContainerStatus::Stopped,
            5 => ContainerStatus::Paused,
            6 => ContainerStatus::Restarting,
            7 => ContainerStatus::Dead,
            _ => ContainerStatus::Unknown,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
/// Serializable snapshot of the full state tuple, persisted as part of the
/// container record.
pub struct StateInfo {
    pub status: ContainerStatus,
    pub removal_in_progress: bool,
    pub pid_info: PidInfo,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
    pub exit_code: i32,
    pub error: Option<String>,
    pub has_been_manual_stopped: bool,
}

impl Default for ContainerStatus {
    fn default() -> Self {
        ContainerStatus::Created
    }
}

#[derive(Debug, Default)]
struct StateInner {
    pid_info: PidInfo,
    started_at: Option<SystemTime>,
    finished_at: Option<SystemTime>,
    exit_code: i32,
    error: Option<String>,
    has_been_manual_stopped: bool,
}

#[derive(Debug)]
/// The state machine of a single container.
pub struct ContainerState {
    status: AtomicU8,
    removal_in_progress: AtomicBool,
    inner: Mutex<StateInner>,
    stopped_tx: broadcast::Sender<i32>,
    removed_tx: broadcast::Sender<()>,
}

impl Default for ContainerState {
    fn default() -> Self {
        let (stopped_tx, _) = broadcast::channel(16);
        let (removed_tx, _) = broadcast::channel(16);
        Self {
            status: AtomicU8::new(ContainerStatus::Created as u8),
            removal_in_progress: AtomicBool::new(false),
            inner: Mutex::new(StateInner::default()),
            stopped_tx,
            removed_tx,
        }
    }
}

impl ContainerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the state machine from a persisted snapshot.
    pub fn from_snapshot(info: &StateInfo) -> Self {
        let state = Self::default();
        state.status.store(info.status as u8, Ordering::SeqCst);
        state
            .removal_in_progress
            .store(info.removal_in_progress, Ordering::SeqCst);
        {
            let mut inner = state.inner.lock().expect("state lock");
            inner.pid_info = info.pid_info;
            inner.started_at = info.started_at;
            inner.finished_at = info.finished_at;
            inner.exit_code = info.exit_code;
            inner.error = info.error.clone();
            inner.has_been_manual_stopped = info.has_been_manual_stopped;
        }
        state
    }

    pub fn status(&self) -> ContainerStatus {
        ContainerStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Whether the container process is alive. Paused containers count as
    /// running since their process still exists.
    pub fn is_running(&self) -> bool {
        matches!(
            self.status(),
            ContainerStatus::Running | ContainerStatus::Paused
        )
    }

    pub fn is_paused(&self) -> bool {
        self.status() == ContainerStatus::Paused
    }

    pub fn is_restarting(&self) -> bool {
        self.status() == ContainerStatus::Restarting
    }

    pub fn is_dead(&self) -> bool {
        self.status() == ContainerStatus::Dead
    }

    pub fn is_removal_in_progress(&self) -> bool {
        self.removal_in_progress.load(Ordering::SeqCst)
    }

    /// Mark the start pipeline as owning the container.
    pub fn set_starting(&self) -> Result<()> {
        match self.status() {
            ContainerStatus::Created
            | ContainerStatus::Stopped
            | ContainerStatus::Restarting => {
                self.status
                    .store(ContainerStatus::Starting as u8, Ordering::SeqCst);
                Ok(())
            }
            status => Err(EngineError::InvalidTransition(format!(
                "cannot start a {} container",
                status
            ))),
        }
    }

    /// Record the started process and transition to running.
    pub fn set_running(&self, pid_info: &PidInfo, initial: bool) -> Result<()> {
        match self.status() {
            ContainerStatus::Created
            | ContainerStatus::Starting
            | ContainerStatus::Stopped
            | ContainerStatus::Restarting => {}
            status => {
                return Err(EngineError::InvalidTransition(format!(
                    "cannot mark a {} container as running",
                    status
                )))
            }
        }

        let mut inner = self.inner.lock().expect("state lock");
        inner.pid_info = *pid_info;
        inner.started_at = Some(SystemTime::now());
        if initial {
            inner.finished_at = None;
            inner.exit_code = 0;
            inner.error = None;
        }
        self.status
            .store(ContainerStatus::Running as u8, Ordering::SeqCst);
        Ok(())
    }

    /// Record the container exit and wake every stop waiter. Idempotent for
    /// already stopped containers.
    pub fn set_stopped(&self, exit_code: i32) {
        if self.status() == ContainerStatus::Stopped {
            return;
        }

        {
            let mut inner = self.inner.lock().expect("state lock");
            inner.exit_code = exit_code;
            inner.finished_at = Some(SystemTime::now());
            inner.pid_info = PidInfo::default();
        }
        self.status
            .store(ContainerStatus::Stopped as u8, Ordering::SeqCst);
        // nobody waiting is fine
        let _ = self.stopped_tx.send(exit_code);
    }

    pub fn set_paused(&self) -> Result<()> {
        match self.status() {
            ContainerStatus::Running => {
                self.status
                    .store(ContainerStatus::Paused as u8, Ordering::SeqCst);
                Ok(())
            }
            status => Err(EngineError::InvalidTransition(format!(
                "cannot pause a {} container",
                status
            ))),
        }
    }

    pub fn set_resumed(&self) -> Result<()> {
        match self.status() {
            ContainerStatus::Paused => {
                self.status
                    .store(ContainerStatus::Running as u8, Ordering::SeqCst);
                Ok(())
            }
            status => Err(EngineError::InvalidTransition(format!(
                "cannot resume a {} container",
                status
            ))),
        }
    }

    pub fn set_restarting(&self) -> Result<()> {
        match self.status() {
            ContainerStatus::Stopped => {
                self.status
                    .store(ContainerStatus::Restarting as u8, Ordering::SeqCst);
                Ok(())
            }
            status => Err(EngineError::InvalidTransition(format!(
                "cannot restart a {} container",
                status
            ))),
        }
    }

    /// Declare the container state unrecoverable.
    pub fn set_dead(&self) {
        self.status
            .store(ContainerStatus::Dead as u8, Ordering::SeqCst);
    }

    /// Mark the container as being removed. Returns true when the flag was
    /// already set, which callers use to detect a concurrent removal.
    pub fn set_removal_in_progress(&self) -> bool {
        self.removal_in_progress.swap(true, Ordering::SeqCst)
    }

    /// Clear the removal flag on a delete abort.
    pub fn reset_removal_in_progress(&self) {
        self.removal_in_progress.store(false, Ordering::SeqCst);
    }

    pub fn set_has_been_manual_stopped(&self) {
        self.inner
            .lock()
            .expect("state lock")
            .has_been_manual_stopped = true;
    }

    pub fn reset_has_been_manual_stopped(&self) {
        self.inner
            .lock()
            .expect("state lock")
            .has_been_manual_stopped = false;
    }

    pub fn has_been_manual_stopped(&self) -> bool {
        self.inner.lock().expect("state lock").has_been_manual_stopped
    }

    /// Record the message of the last failed operation, mirrored into the
    /// persisted state for inspection.
    pub fn set_error(&self, msg: &str) {
        self.inner.lock().expect("state lock").error = Some(msg.to_string());
    }

    pub fn pid_info(&self) -> PidInfo {
        self.inner.lock().expect("state lock").pid_info
    }

    pub fn exit_code(&self) -> i32 {
        self.inner.lock().expect("state lock").exit_code
    }

    /// Wake every removal waiter.
    pub fn broadcast_removed(&self) {
        let _ = self.removed_tx.send(());
    }

    /// Wait until the container stops, returning its exit code, or `None` on
    /// timeout. Containers which already stopped return immediately.
    pub async fn wait_stopped(&self, timeout: Option<Duration>) -> Option<i32> {
        let mut rx = self.stopped_tx.subscribe();
        if !self.is_running() && self.status() != ContainerStatus::Starting {
            return Some(self.exit_code());
        }

        let recv = async move {
            loop {
                match rx.recv().await {
                    Ok(code) => return Some(code),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, recv).await.ok().flatten(),
            None => recv.await,
        }
    }

    /// Wait until the container is removed from the store. Callers check the
    /// store before waiting; this only blocks on the broadcast.
    pub async fn wait_removed(&self, timeout: Option<Duration>) -> bool {
        let mut rx = self.removed_tx.subscribe();
        let recv = async move { rx.recv().await.is_ok() };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, recv).await.unwrap_or(false),
            None => recv.await,
        }
    }

    /// Produce a serializable snapshot of the full state tuple.
    pub fn snapshot(&self) -> StateInfo {
        let inner = self.inner.lock().expect("state lock");
        StateInfo {
            status: self.status(),
            removal_in_progress: self.is_removal_in_progress(),
            pid_info: inner.pid_info,
            started_at: inner.started_at,
            finished_at: inner.finished_at,
            exit_code: inner.exit_code,
            error: inner.error.clone(),
            has_been_manual_stopped: inner.has_been_manual_stopped,
        }
    }
}
