//! The stop/kill pipeline: graceful signal, bounded wait, SIGKILL and the
//! monitor-kill fallback for containers whose monitor is stuck.

use super::LifecycleService;
use crate::{
    container::{Container, ContainerInner},
    error::{chain, EngineError, Result},
    runtime::{KillParamsBuilder, ResumeParamsBuilder},
};
use log::{error, info, warn};
use nix::sys::signal::Signal;
use std::{convert::TryFrom, fs, sync::Arc, time::Duration};

const SIGKILL: u32 = libc::SIGKILL as u32;
const SIGTERM: u32 = libc::SIGTERM as u32;

/// Parse a symbolic or numeric signal name; `SIG` prefixes are optional and
/// realtime signals are given relative to RTMIN/RTMAX.
pub fn sig_parse(name: &str) -> Option<u32> {
    if let Ok(num) = name.parse::<u32>() {
        return (num > 0 && num < 64).then(|| num);
    }

    let name = name.trim().to_uppercase();
    let name = name.strip_prefix("SIG").unwrap_or(&name);

    if let Some(offset) = name.strip_prefix("RTMIN+") {
        let offset: i32 = offset.parse().ok()?;
        return Some((libc::SIGRTMIN() + offset) as u32);
    }
    if let Some(offset) = name.strip_prefix("RTMAX-") {
        let offset: i32 = offset.parse().ok()?;
        return Some((libc::SIGRTMAX() - offset) as u32);
    }
    if name == "RTMIN" {
        return Some(libc::SIGRTMIN() as u32);
    }
    if name == "RTMAX" {
        return Some(libc::SIGRTMAX() as u32);
    }

    let sig = match name {
        "HUP" => libc::SIGHUP,
        "INT" => libc::SIGINT,
        "QUIT" => libc::SIGQUIT,
        "ILL" => libc::SIGILL,
        "TRAP" => libc::SIGTRAP,
        "ABRT" => libc::SIGABRT,
        "BUS" => libc::SIGBUS,
        "FPE" => libc::SIGFPE,
        "KILL" => libc::SIGKILL,
        "USR1" => libc::SIGUSR1,
        "SEGV" => libc::SIGSEGV,
        "USR2" => libc::SIGUSR2,
        "PIPE" => libc::SIGPIPE,
        "ALRM" => libc::SIGALRM,
        "TERM" => libc::SIGTERM,
        "CHLD" => libc::SIGCHLD,
        "CONT" => libc::SIGCONT,
        "STOP" => libc::SIGSTOP,
        "TSTP" => libc::SIGTSTP,
        "TTIN" => libc::SIGTTIN,
        "TTOU" => libc::SIGTTOU,
        "URG" => libc::SIGURG,
        "XCPU" => libc::SIGXCPU,
        "XFSZ" => libc::SIGXFSZ,
        "VTALRM" => libc::SIGVTALRM,
        "PROF" => libc::SIGPROF,
        "WINCH" => libc::SIGWINCH,
        "IO" => libc::SIGIO,
        "PWR" => libc::SIGPWR,
        "SYS" => libc::SIGSYS,
        _ => return None,
    };
    Some(sig as u32)
}

/// The signal used for graceful stops, falling back to SIGTERM.
fn stop_signal_of(inner: &ContainerInner) -> u32 {
    inner
        .common_config
        .config
        .stop_signal
        .as_deref()
        .and_then(sig_parse)
        .unwrap_or(SIGTERM)
}

/// Whether the process behind `(pid, start_time)` is still the one the
/// record saw: both the pid and its kernel start time must match, which
/// rules out signalling a recycled pid.
pub(crate) fn process_alive(pid: i32, start_time: u64) -> bool {
    if pid <= 0 {
        return false;
    }
    let stat = match fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat,
        Err(_) => return false,
    };
    // starttime is the 22nd field, but the comm field may contain spaces;
    // skip past the closing parenthesis first
    let rest = match stat.rsplit_once(')') {
        Some((_, rest)) => rest,
        None => return false,
    };
    rest.split_whitespace()
        .nth(19)
        .and_then(|field| field.parse::<u64>().ok())
        .map_or(false, |observed| observed == start_time)
}

/// Deliver a signal to a raw process after validating it is still alive.
/// Dead targets are fine for the stop signal and SIGKILL.
fn send_signal_to_process(pid: i32, start_time: u64, stop_signal: u32, signal: u32) -> Result<()> {
    if !process_alive(pid, start_time) {
        if signal == stop_signal || signal == SIGKILL {
            warn!("Process {} is not alive", pid);
            return Ok(());
        }
        return Err(EngineError::NotAlive { pid, signal });
    }

    let sig = Signal::try_from(signal as i32)
        .map_err(|_| EngineError::InvalidArgument(format!("invalid signal {}", signal)))?;
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), sig).map_err(|e| {
        EngineError::Io(std::io::Error::from_raw_os_error(e as i32))
    })
}

impl LifecycleService {
    /// Deliver `signal` to the container init process through the runtime.
    /// The restart that would follow the exit is suppressed first, and a
    /// paused container is resumed so the signal can be acted upon.
    pub(crate) async fn kill_with_signal(
        &self,
        cont: &Arc<Container>,
        inner: &mut ContainerInner,
        signal: u32,
    ) -> Result<()> {
        inner.restart_manager.cancel_next_restart();
        cont.state.set_has_been_manual_stopped();
        if let Err(e) = cont.to_disk(inner) {
            warn!("Failed to save container {} to disk: {}", cont.id(), e);
        }

        if !cont.state.is_running() {
            info!("Container {} is already stopped", cont.id());
            return Ok(());
        }
        if cont.state.is_restarting() {
            info!(
                "Container {} is currently restarting, no need to send the signal",
                cont.id()
            );
            return Ok(());
        }

        let stop_signal = stop_signal_of(inner);
        let pid_info = cont.state.pid_info();
        let need_unpause = cont.state.is_paused();
        let runtime = self.runtime_for(cont.runtime())?;

        let params = KillParamsBuilder::default()
            .pid(pid_info.pid)
            .start_time(pid_info.start_time)
            .signal(signal)
            .stop_signal(stop_signal)
            .build()
            .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;
        let delivery = runtime
            .kill(cont.id(), &params)
            .await
            .map_err(|e| EngineError::RuntimeFailure(chain(e)));
        if let Err(e) = &delivery {
            error!(
                "Failed to send signal {} to container {}: {}",
                signal,
                cont.id(),
                e
            );
        }

        if need_unpause {
            let resume = ResumeParamsBuilder::default()
                .rootpath(cont.root_path())
                .state(cont.state_path())
                .build()
                .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;
            runtime
                .resume(cont.id(), &resume)
                .await
                .map_err(|e| EngineError::RuntimeFailure(chain(e)))?;
            let _ = cont.state.set_resumed();
        }

        delivery
    }

    /// SIGKILL escalation: kill, wait a bounded window, then kill the
    /// runtime monitor itself (validated against its recorded start time)
    /// and wait without limit.
    pub(crate) async fn force_kill(&self, cont: &Arc<Container>) -> Result<()> {
        let stop_signal;
        {
            let mut guard = cont.lock().await;
            stop_signal = stop_signal_of(&guard);
            if let Err(e) = self.kill_with_signal(cont, &mut guard, SIGKILL).await {
                warn!(
                    "Failed to kill container {}, waiting for it to stop: {}",
                    cont.id(),
                    e
                );
            }
        }

        let window = Duration::from_secs(self.config.force_kill_wait_secs());
        if cont.state.wait_stopped(Some(window)).await.is_some() {
            return Ok(());
        }

        error!(
            "Container {} stuck for {}s, killing the monitor of the container",
            cont.id(),
            self.config.force_kill_wait_secs()
        );
        let pid_info = cont.state.pid_info();
        send_signal_to_process(pid_info.ppid, pid_info.pstart_time, stop_signal, SIGKILL)?;
        cont.state.wait_stopped(None).await;
        Ok(())
    }

    /// Stop a container: graceful signal, bounded wait, then force kill.
    /// `restart` marks stops issued as part of a restart; auto remove is
    /// parked for their duration so the container is not removed mid-restart.
    pub async fn stop_container(
        &self,
        id: &str,
        timeout: i64,
        force: bool,
        restart: bool,
    ) -> Result<()> {
        let cont = self.must_get(id)?;

        let result = self.do_stop(&cont, timeout, force, restart).await;

        if restart {
            let mut guard = cont.lock().await;
            guard.host_config.auto_remove = guard.host_config.auto_remove_bak;
        }
        result
    }

    async fn do_stop(
        &self,
        cont: &Arc<Container>,
        timeout: i64,
        force: bool,
        restart: bool,
    ) -> Result<()> {
        let mut graceful = false;
        {
            let mut guard = cont.lock().await;
            if !cont.state.is_running() {
                info!("Container {} is already stopped", cont.id());
                return Ok(());
            }
            if let Some(probe) = &guard.health_probe {
                probe.cancel();
            }
            // park auto remove so a restart does not lose the container
            if restart {
                guard.host_config.auto_remove = false;
            }

            if !force {
                let stop_signal = stop_signal_of(&guard);
                if let Err(e) = self.kill_with_signal(cont, &mut guard, stop_signal).await {
                    error!("Failed to grace shutdown container {}: {}", cont.id(), e);
                }
                graceful = true;
            }
        }

        if graceful {
            let stopped = match timeout {
                t if t > 0 => {
                    cont.state
                        .wait_stopped(Some(Duration::from_secs(t as u64)))
                        .await
                        .is_some()
                }
                0 => false,
                _ => {
                    cont.state.wait_stopped(None).await;
                    true
                }
            };
            if !stopped {
                error!(
                    "Failed to wait container {} 'stopped' for {} seconds, force killing",
                    cont.id(),
                    timeout
                );
                self.force_kill(cont).await?;
            }
        } else {
            self.force_kill(cont).await?;
        }

        let guard = cont.lock().await;
        if let Some(sandbox_info) = &guard.common_config.sandbox {
            self.sandbox
                .purge_container(sandbox_info)
                .await
                .map_err(|e| EngineError::RuntimeFailure(chain(e)))?;
        }
        Ok(())
    }

    /// Deliver an arbitrary signal to a running container. Signal 0 and
    /// SIGKILL go through the force kill escalation.
    pub async fn kill_container(&self, id: &str, signal: u32) -> Result<()> {
        let cont = self.must_get(id)?;
        {
            let mut guard = cont.lock().await;
            if !cont.state.is_running() {
                return Err(EngineError::InvalidTransition(format!(
                    "cannot kill container: container {} is not running",
                    cont.id()
                )));
            }
            if signal != 0 && signal != SIGKILL {
                return self.kill_with_signal(&cont, &mut guard, signal).await;
            }
        }
        self.force_kill(&cont).await
    }
}
