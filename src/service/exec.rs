//! The exec pipeline: synthesise a process spec for the container's runtime
//! family, wire the requested streams over FIFOs or vsock, run the process
//! and hand back its exit code.

use super::LifecycleService;
use crate::{
    attach::{
        create_exec_fifos, delete_exec_fifos, is_vsock_address, parse_vsock_address,
        vsock_io_names, ExecStreams, IoCopy,
    },
    container::ContainerConfig,
    defaults,
    error::{chain, EngineError, Result},
    oci_spec::runtime::{Process, ProcessBuilder, Spec, User},
    runtime::{ConsoleFifos, ExecParamsBuilder, RuntimeFamily},
};
use log::{debug, error};
use std::path::PathBuf;

/// An exec invocation.
#[derive(Default)]
pub struct ExecRequest {
    /// Command and arguments; must not be empty.
    pub argv: Vec<String>,

    /// Extra environment entries, applied last so they win on duplicates.
    pub env: Vec<String>,

    /// User to run as, resolved against the image; inherits the container
    /// user when absent.
    pub user: Option<String>,

    /// Allocate a terminal.
    pub tty: bool,

    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,

    /// Working directory override.
    pub workdir: Option<String>,

    /// Unique 64 hex character suffix identifying this invocation;
    /// generated when absent.
    pub suffix: Option<String>,

    /// Seconds until the exec is aborted, zero meaning no limit.
    pub timeout: i64,
}

/// Compressed argv echo for event reporting, at most 255 bytes.
fn exec_command_echo(argv: &[String]) -> String {
    let joined = argv.join(" ");
    if joined.len() <= 255 {
        return joined;
    }
    let mut cut = 252;
    while !joined.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut echo = joined[..cut].to_string();
    echo.push_str("...");
    echo
}

fn env_key(entry: &str) -> &str {
    entry.split('=').next().unwrap_or(entry)
}

/// Guard the total environment size before appending `adding` entries.
fn ensure_env_capacity(current: usize, adding: usize) -> Result<()> {
    if current + adding > defaults::LIST_ENV_SIZE_MAX {
        return Err(EngineError::EnvTooLong(defaults::LIST_ENV_SIZE_MAX));
    }
    Ok(())
}

/// Build the process spec of an exec invocation.
///
/// Embedded runtimes keep the container environment in their own config
/// file, so only the request environment applies. Generic OCI runtimes start
/// from the container environment, gain the default PATH/HOSTNAME/TERM
/// entries for keys not already present, and inherit rlimits and
/// no-new-privileges from the container's OCI configuration. The request
/// environment is appended last in both cases so it wins on duplicates.
fn make_exec_process_spec(
    config: &ContainerConfig,
    user: Option<User>,
    family: RuntimeFamily,
    request: &ExecRequest,
    container_spec: Option<&Spec>,
) -> Result<Process> {
    let mut env: Vec<String> = Vec::new();
    let mut rlimits = None;
    let mut no_new_privileges = None;

    if family != RuntimeFamily::Lcr {
        ensure_env_capacity(env.len(), config.env.len())?;
        env.extend(config.env.iter().cloned());

        let mut default_env = vec![defaults::DEFAULT_PATH_ENV.to_string()];
        if let Some(hostname) = &config.hostname {
            default_env.push(format!("HOSTNAME={}", hostname));
        }
        if request.tty {
            default_env.push("TERM=xterm".to_string());
        }
        let missing: Vec<String> = default_env
            .into_iter()
            .filter(|d| !env.iter().any(|e| env_key(e) == env_key(d)))
            .collect();
        ensure_env_capacity(env.len(), missing.len())?;
        env.extend(missing);

        if let Some(process) = container_spec.and_then(|s| s.process().as_ref()) {
            rlimits = process.rlimits().clone();
            no_new_privileges = *process.no_new_privileges();
        }
    }

    ensure_env_capacity(env.len(), request.env.len())?;
    env.extend(request.env.iter().cloned());

    let cwd = request
        .workdir
        .clone()
        .filter(|w| !w.is_empty())
        .or_else(|| config.working_dir.clone().filter(|w| !w.is_empty()))
        .unwrap_or_else(|| "/".to_string());

    let mut builder = ProcessBuilder::default()
        .args(request.argv.clone())
        .env(env)
        .cwd(cwd)
        .terminal(request.tty);
    if let Some(user) = user {
        builder = builder.user(user);
    }
    if let Some(rlimits) = rlimits {
        builder = builder.rlimits(rlimits);
    }
    if let Some(no_new_privileges) = no_new_privileges {
        builder = builder.no_new_privileges(no_new_privileges);
    }
    builder
        .build()
        .map_err(|e| EngineError::InvalidArgument(e.to_string()))
}

impl LifecycleService {
    /// Execute an additional process inside a running container, returning
    /// its exit code.
    pub async fn exec_container(
        &self,
        id: &str,
        request: ExecRequest,
        streams: ExecStreams,
    ) -> Result<i32> {
        let cont = self.must_get(id)?;
        let id = cont.id().to_string();
        debug!(
            "Execing {} in container {}",
            exec_command_echo(&request.argv),
            id
        );

        if self.store.is_in_gc_progress(&id) {
            return Err(EngineError::InvalidTransition(format!(
                "cannot exec container {} in garbage collector progress",
                id
            )));
        }
        if !cont.state.is_running() {
            return Err(EngineError::InvalidTransition(format!(
                "container {} is not running",
                id
            )));
        }
        if cont.state.is_paused() {
            return Err(EngineError::InvalidTransition(format!(
                "container {} is paused, unpause the container before exec",
                id
            )));
        }
        if cont.state.is_restarting() {
            return Err(EngineError::InvalidTransition(format!(
                "container {} is currently restarting, wait until the container is running",
                id
            )));
        }
        if request.argv.is_empty() {
            return Err(EngineError::EmptyArgv);
        }

        let (common, host_config) = {
            let guard = cont.lock().await;
            (guard.common_config.clone(), guard.host_config.clone())
        };

        // resolve the requested user, or inherit the container's
        let username = request.user.clone().or_else(|| common.config.user.clone());
        let user = match &username {
            Some(name) => Some(
                self.image
                    .user_conf(
                        &common.image_type,
                        &common.base_fs,
                        &host_config,
                        Some(name),
                    )
                    .await
                    .map_err(|_| EngineError::UserResolution(name.clone()))?,
            ),
            None => None,
        };

        let family = RuntimeFamily::from_name(cont.runtime());
        // embedded runtimes read their config file instead of the OCI spec
        let container_spec = if family != RuntimeFamily::Lcr {
            Some(Spec::load(&cont.spec_path())?)
        } else {
            None
        };
        let process = make_exec_process_spec(
            &common.config,
            user,
            family,
            &request,
            container_spec.as_ref(),
        )?;

        let suffix = request.suffix.clone().unwrap_or_else(Self::generate_id);

        let attach = [
            request.attach_stdin,
            request.attach_stdout,
            request.attach_stderr,
        ];
        let mut endpoints: ConsoleFifos = Default::default();
        let mut fifo_home: Option<PathBuf> = None;
        let mut worker: Option<IoCopy> = None;

        if attach.iter().any(|a| *a) {
            let vsock = common
                .sandbox
                .as_ref()
                .and_then(|s| s.task_address.as_deref())
                .filter(|addr| is_vsock_address(addr))
                .map(|addr| {
                    parse_vsock_address(addr).ok_or_else(|| {
                        EngineError::InvalidArgument(format!("malformed task address {}", addr))
                    })
                })
                .transpose()?;

            if let (Some((cid, _)), Some(sandbox)) = (vsock, common.sandbox.as_ref()) {
                endpoints = vsock_io_names(&sandbox.id, cid, attach, &suffix);
            } else {
                let home = self.config.state_path().join("exec").join(&suffix);
                endpoints = create_exec_fifos(&home, attach)?;
                fifo_home = Some(home);
            }
            worker = Some(IoCopy::spawn(streams, &endpoints));
        }

        let exec_result = async {
            if let Some(sandbox_info) = &common.sandbox {
                self.sandbox
                    .prepare_exec(sandbox_info, &suffix, &process, &endpoints, request.tty)
                    .await
                    .map_err(|e| EngineError::RuntimeFailure(chain(e)))?;
            }

            let mut builder = ExecParamsBuilder::default()
                .loglevel(self.loglevel())
                .console_fifos(endpoints.clone())
                .rootpath(cont.root_path())
                .state(cont.state_path())
                .timeout(request.timeout)
                .suffix(suffix.clone())
                .spec(process.clone())
                .attach_stdin(request.attach_stdin);
            if let Some(logpath) = self.config.engine_log_path() {
                builder = builder.logpath(logpath.clone());
            }
            if let Some(workdir) = &request.workdir {
                builder = builder.workdir(workdir.clone());
            }
            let params = builder
                .build()
                .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;

            self.runtime_for(cont.runtime())?
                .exec(&id, &params)
                .await
                .map_err(|e| EngineError::RuntimeFailure(chain(e)))
        }
        .await;

        if let Some(sandbox_info) = &common.sandbox {
            if let Err(e) = self.sandbox.purge_exec(sandbox_info, &suffix).await {
                error!("Failed to purge exec {} from sandbox: {}", suffix, chain(e));
            }
        }
        if let Some(worker) = worker {
            worker.shutdown().await;
        }
        if let Some(home) = fifo_home {
            delete_exec_fifos(&home);
        }

        exec_result
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(argv: &[&str]) -> ExecRequest {
        ExecRequest {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn command_echo_is_bounded_in_bytes() {
        assert_eq!(
            exec_command_echo(&["/bin/ls".into(), "-l".into()]),
            "/bin/ls -l"
        );

        let long = vec!["x".repeat(300)];
        let echo = exec_command_echo(&long);
        assert_eq!(echo.len(), 255);
        assert!(echo.ends_with("..."));

        // multi-byte content still truncates on byte length, at a character
        // boundary
        let wide = vec!["é".repeat(200)];
        let echo = exec_command_echo(&wide);
        assert!(echo.len() <= 255);
        assert!(echo.ends_with("..."));
    }

    #[test]
    fn lcr_family_uses_request_env_only() {
        let mut config = ContainerConfig::default();
        config.env = vec!["FROM_CONTAINER=1".into()];
        let mut req = request(&["/bin/sh"]);
        req.env = vec!["FROM_REQUEST=1".into()];

        let process =
            make_exec_process_spec(&config, None, RuntimeFamily::Lcr, &req, None).expect("spec");

        assert_eq!(
            process.env().as_ref().expect("env"),
            &vec!["FROM_REQUEST=1".to_string()]
        );
    }

    #[test]
    fn oci_family_merges_container_and_default_env() {
        let mut config = ContainerConfig::default();
        config.env = vec!["FROM_CONTAINER=1".into(), "TERM=screen".into()];
        config.hostname = Some("box".into());
        let mut req = request(&["/bin/sh"]);
        req.tty = true;
        req.env = vec!["FROM_REQUEST=1".into()];

        let process =
            make_exec_process_spec(&config, None, RuntimeFamily::Oci, &req, None).expect("spec");
        let env = process.env().as_ref().expect("env");

        assert!(env.contains(&"FROM_CONTAINER=1".to_string()));
        assert!(env.contains(&defaults::DEFAULT_PATH_ENV.to_string()));
        assert!(env.contains(&"HOSTNAME=box".to_string()));
        // the container already sets TERM, the default must not duplicate it
        assert!(!env.contains(&"TERM=xterm".to_string()));
        // request env comes last so it wins
        assert_eq!(env.last(), Some(&"FROM_REQUEST=1".to_string()));
    }

    #[test]
    fn env_limit_boundaries() {
        let config = ContainerConfig::default();
        let mut req = request(&["/bin/sh"]);

        req.env = (0..defaults::LIST_ENV_SIZE_MAX - 1)
            .map(|i| format!("E{}=1", i))
            .collect();
        assert!(
            make_exec_process_spec(&config, None, RuntimeFamily::Lcr, &req, None).is_ok()
        );

        req.env = (0..defaults::LIST_ENV_SIZE_MAX + 1)
            .map(|i| format!("E{}=1", i))
            .collect();
        assert!(matches!(
            make_exec_process_spec(&config, None, RuntimeFamily::Lcr, &req, None),
            Err(EngineError::EnvTooLong(_))
        ));
    }

    #[test]
    fn cwd_fallback_chain() {
        let mut config = ContainerConfig::default();
        let req = request(&["/bin/sh"]);
        let process =
            make_exec_process_spec(&config, None, RuntimeFamily::Lcr, &req, None).expect("spec");
        assert_eq!(process.cwd(), "/");

        config.working_dir = Some("/srv".into());
        let process =
            make_exec_process_spec(&config, None, RuntimeFamily::Lcr, &req, None).expect("spec");
        assert_eq!(process.cwd(), "/srv");

        let mut req = request(&["/bin/sh"]);
        req.workdir = Some("/data".into());
        let process =
            make_exec_process_spec(&config, None, RuntimeFamily::Lcr, &req, None).expect("spec");
        assert_eq!(process.cwd(), "/data");
    }

    #[test]
    fn exec_suffix_is_64_hex() {
        let suffix = LifecycleService::generate_id();
        assert_eq!(suffix.len(), defaults::EXEC_SUFFIX_LEN);
        assert!(suffix.bytes().all(|b| b.is_ascii_hexdigit()));
    }
}
