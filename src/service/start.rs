//! The start pipeline: mount preparation, state files, OCI spec renewal,
//! runtime create/start and exit monitor registration, with the reverse
//! actions that run when a later step fails.

use super::LifecycleService;
use crate::{
    container::{Container, ContainerInner, HealthProbe},
    defaults,
    error::{chain, exit_code_from_message, EngineError, Result},
    mount,
    network::is_shareable_ipc,
    oci_spec::runtime::Spec,
    runtime::{
        ConsoleFifos, CreateParamsBuilder, PidInfo, RuntimeFamily, StartParamsBuilder,
    },
    spec_update, supervisor,
    supervisor::ExitFifo,
};
use log::{debug, error, warn};
use nix::mount::MsFlags;
use std::{
    fs,
    io::{self, Write},
    os::unix::fs::OpenOptionsExt,
    sync::Arc,
};

/// Reverse actions of the start pipeline, executed only when a later step
/// fails. The exit FIFO descriptor lives here until its ownership moves to
/// the exit monitor.
#[derive(Default)]
struct StartRollback {
    exit_fifo: Option<ExitFifo>,
    clean_resources: bool,
    umount_rootfs: bool,
    umount_dev_tmpfs: bool,
}

impl StartRollback {
    async fn unwind(self, service: &LifecycleService, cont: &Arc<Container>, inner: &ContainerInner) {
        drop(self.exit_fifo);

        if self.clean_resources {
            if let (Ok(runtime), Ok(params)) = (
                service.runtime_for(cont.runtime()),
                service.clean_params(
                    0,
                    cont.root_path().to_path_buf(),
                    cont.state_path().to_path_buf(),
                ),
            ) {
                if let Err(e) = runtime.clean_resource(cont.id(), &params).await {
                    error!(
                        "Failed to clean failed started container {}: {}",
                        cont.id(),
                        chain(e)
                    );
                }
            }
        }

        if self.umount_rootfs {
            if let Err(e) = service
                .image
                .umount_container_rootfs(
                    &inner.common_config.image_type,
                    &inner.common_config.image,
                    cont.id(),
                )
                .await
            {
                warn!("Failed to umount rootfs for container {}: {}", cont.id(), chain(e));
            }
        }

        if self.umount_dev_tmpfs {
            umount_dev_tmpfs(inner);
        }
    }
}

/// Mount a tmpfs over `<base_fs>/dev` for system containers running on an
/// external rootfs, sized at half the memory limit.
fn mount_dev_tmpfs_for_system_container(inner: &ContainerInner) -> Result<()> {
    if !inner.host_config.system_container || inner.host_config.external_rootfs.is_none() {
        return Ok(());
    }
    let dev = inner.common_config.base_fs.join("dev");
    mount::ensure_dir(&dev, defaults::SECURE_DIR_MODE)?;

    let data = if inner.host_config.memory > 0 {
        format!("size={},mode=755", inner.host_config.memory / 2)
    } else {
        "mode=755".to_string()
    };
    mount::mount_tmpfs(&dev, MsFlags::empty(), &data)?;

    if let Some(remap) = &inner.host_config.user_remap {
        let (uid, gid, _) = mount::parse_user_remap(remap)?;
        mount::chown_path(&dev, uid, gid)?;
    }
    Ok(())
}

/// Reverse of the dev tmpfs mount; tolerates a container without one.
pub(crate) fn umount_dev_tmpfs(inner: &ContainerInner) {
    if !inner.host_config.system_container || inner.host_config.external_rootfs.is_none() {
        return;
    }
    let dev = inner.common_config.base_fs.join("dev");
    if let Err(e) = mount::umount_detach(&dev) {
        warn!("Failed to umount dev tmpfs {}: {}", dev.display(), e);
    }
}

/// Mount the host channel tmpfs unless it is already mounted.
fn mount_host_channel(inner: &ContainerInner) -> Result<()> {
    let channel = match &inner.host_config.host_channel {
        Some(channel) => channel,
        None => return Ok(()),
    };
    if mount::detect_mounted(&channel.path_on_host)? {
        return Ok(());
    }
    mount::ensure_dir(&channel.path_on_host, defaults::TEMP_DIR_MODE)?;

    let data = format!("mode=1777,size={}", channel.size);
    mount::mount_tmpfs(
        &channel.path_on_host,
        MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        &data,
    )?;

    if let Some(remap) = &inner.host_config.user_remap {
        let (uid, gid, _) = mount::parse_user_remap(remap)?;
        mount::chown_path(&channel.path_on_host, uid, gid)?;
    }
    Ok(())
}

/// Write the container environment as `KEY=VALUE` lines into the configured
/// target file inside the rootfs of a system container.
fn write_env_target_file(inner: &ContainerInner, spec: &Spec) -> Result<()> {
    let target = match &inner.host_config.env_target_file {
        Some(target) => target,
        None => return Ok(()),
    };
    if !inner.host_config.system_container || inner.host_config.external_rootfs.is_none() {
        return Ok(());
    }

    let env_path = inner
        .common_config
        .base_fs
        .join(target.trim_start_matches('/'));
    if let Some(dir) = env_path.parent() {
        mount::ensure_dir(dir, defaults::SECURE_DIR_MODE)?;
    }

    let mut content = String::new();
    if let Some(env) = spec.process().as_ref().and_then(|p| p.env().as_ref()) {
        for entry in env {
            if entry.len() > defaults::ENV_ENTRY_SIZE_MAX {
                return Err(EngineError::InvalidArgument(format!(
                    "environment entry in {} is too long",
                    target
                )));
            }
            content.push_str(entry);
            content.push('\n');
        }
    }

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(defaults::SECURE_FILE_MODE)
        .open(&env_path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

/// Ensure `<root>/etc/mtab` points at `/proc/mounts`. Read-only roots only
/// warn; an existing link is kept.
fn create_mtab_link(spec: &Spec) -> Result<()> {
    let root = spec
        .root()
        .as_ref()
        .ok_or_else(|| EngineError::SpecRenewalFailure("spec has no root".into()))?;
    let slink = root.path().join("etc/mtab");
    let dir = match slink.parent() {
        Some(dir) => dir,
        None => return Ok(()),
    };

    // a symlinked /etc would divert the directory creation
    if let Ok(meta) = fs::symlink_metadata(dir) {
        if meta.file_type().is_symlink() {
            let _ = fs::remove_file(dir);
        }
    }
    mount::ensure_dir(dir, defaults::ETC_DIR_MODE)?;

    if fs::symlink_metadata(&slink).is_ok() {
        return Ok(());
    }
    match std::os::unix::fs::symlink("/proc/mounts", &slink) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EROFS) => {
            warn!(
                "Failed to create link {} for target /proc/mounts: read-only filesystem",
                slink.display()
            );
            Ok(())
        }
        Err(e) => Err(EngineError::SymlinkFailure {
            link: slink.display().to_string(),
            source: e,
        }),
    }
}

/// Every volume mount source must still exist on the host.
fn verify_mounts(inner: &ContainerInner) -> Result<()> {
    for mp in &inner.common_config.mount_points {
        if mp.typ != "volume" {
            continue;
        }
        if let Err(e) = fs::symlink_metadata(&mp.source) {
            return Err(EngineError::InvalidArgument(format!(
                "check mount source {} failed: {}",
                mp.source.display(),
                e
            )));
        }
    }
    Ok(())
}

/// Mount the `/dev/shm` tmpfs for containers with a shareable IPC namespace.
fn setup_ipc_dirs(inner: &ContainerInner) -> Result<()> {
    let shm = match &inner.common_config.shm_path {
        Some(shm) => shm,
        None => return Ok(()),
    };
    if inner.host_config.system_container || !is_shareable_ipc(&inner.host_config.ipc_mode) {
        return Ok(());
    }
    if mount::detect_mounted(shm)? {
        return Ok(());
    }
    mount::ensure_dir(shm, defaults::TEMP_DIR_MODE)?;
    mount::mount_tmpfs(
        shm,
        MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        &format!("mode=1777,size={}", defaults::DEFAULT_SHM_SIZE),
    )
}

impl LifecycleService {
    /// Start a container. `console_fifos` carries the server-side console
    /// endpoints; `reset_rm` marks starts issued by the restart manager,
    /// which are idempotent for already running containers and reset the
    /// manager state.
    pub async fn start_container(
        &self,
        id: &str,
        console_fifos: &ConsoleFifos,
        reset_rm: bool,
    ) -> Result<()> {
        let cont = self.must_get(id)?;
        let mut guard = cont.lock().await;

        if reset_rm && cont.state.is_running() {
            return Ok(());
        }
        if cont.state.is_paused() {
            return Err(EngineError::InvalidTransition(
                "cannot start a paused container, try unpause instead".into(),
            ));
        }
        if cont.state.is_removal_in_progress() || cont.state.is_dead() {
            return Err(EngineError::InvalidTransition(
                "container is marked for removal and cannot be started".into(),
            ));
        }
        if self.store.is_in_gc_progress(cont.id()) {
            return Err(EngineError::InvalidTransition(format!(
                "cannot start container {} in garbage collector progress",
                cont.id()
            )));
        }

        cont.state.set_starting()?;

        match self.do_start(&cont, &mut guard, console_fifos, reset_rm).await {
            Ok(pid_info) => {
                cont.state.set_running(&pid_info, true)?;
                cont.state.reset_has_been_manual_stopped();
                guard.health_probe = Some(HealthProbe::default());
                cont.to_disk(&guard)?;
                Ok(())
            }
            Err(e) => {
                error!("Failed to start container {}: {}", cont.id(), e);
                let msg = e.to_string();
                cont.state.set_error(&msg);
                let exit_code =
                    exit_code_from_message(&msg).unwrap_or(defaults::EXIT_CODE_START_FAILED);
                cont.state.set_stopped(exit_code);

                if guard.host_config.auto_remove {
                    if cont.state.set_removal_in_progress() {
                        warn!("Container {} is already in removal progress", cont.id());
                    } else {
                        // the record lock cannot be held across the removal
                        drop(guard);
                        match self.delete_flagged(cont.clone(), true).await {
                            Ok(()) => return Err(e),
                            Err(del) => error!(
                                "{}",
                                EngineError::AutoRemoveFailed(format!(
                                    "{}: {}",
                                    cont.id(),
                                    del
                                ))
                            ),
                        }
                        guard = cont.lock().await;
                    }
                }

                if let Err(p) = cont.to_disk(&guard) {
                    error!("Failed to save container {} to disk: {}", cont.id(), p);
                }
                Err(e)
            }
        }
    }

    async fn do_start(
        &self,
        cont: &Arc<Container>,
        inner: &mut ContainerInner,
        console_fifos: &ConsoleFifos,
        reset_rm: bool,
    ) -> Result<PidInfo> {
        let mut rollback = StartRollback::default();
        match self
            .do_start_steps(cont, inner, console_fifos, reset_rm, &mut rollback)
            .await
        {
            Ok(pid_info) => Ok(pid_info),
            Err(e) => {
                rollback.unwind(self, cont, inner).await;
                Err(e)
            }
        }
    }

    async fn do_start_steps(
        &self,
        cont: &Arc<Container>,
        inner: &mut ContainerInner,
        console_fifos: &ConsoleFifos,
        reset_rm: bool,
        rollback: &mut StartRollback,
    ) -> Result<PidInfo> {
        let id = cont.id().to_string();
        let bundle = cont.bundle_path();
        debug!(
            "bundle: {}, state: {}",
            bundle.display(),
            cont.state_path().display()
        );

        rollback.umount_dev_tmpfs = true;
        rollback.umount_rootfs = true;
        mount_dev_tmpfs_for_system_container(inner)?;
        mount_host_channel(inner)?;

        if reset_rm {
            inner.restart_manager.reset();
        }

        let state_dir = cont.state_dir();
        mount::ensure_dir(&state_dir, defaults::TEMP_DIR_MODE)?;
        let pid_file = cont.pid_file_path();
        let exit_fifo_path = ExitFifo::create(&state_dir)?;
        rollback.exit_fifo = Some(ExitFifo::open(&exit_fifo_path)?);
        rollback.clean_resources = true;

        let mut spec = Spec::load(&cont.spec_path())?;

        write_env_target_file(inner, &spec)?;

        self.image
            .mount_container_rootfs(
                &inner.common_config.image_type,
                &inner.common_config.image,
                &id,
            )
            .await
            .map_err(|e| EngineError::RuntimeFailure(chain(e)))?;

        // renew daemon-controlled parts of the spec
        let cgroup_parent = spec_update::resolve_cgroup_parent(
            &inner.host_config,
            self.config.cgroup_parent().as_deref(),
        )
        .to_string();
        spec_update::update_annotations(
            &mut spec,
            &mut inner.common_config.config,
            &cgroup_parent,
        );
        spec_update::update_cgroups_path(&id, &mut spec, &cgroup_parent);
        spec_update::update_devices(&mut spec, &inner.host_config)?;
        spec_update::update_ulimits(&mut spec, self.config.default_ulimits(), &inner.host_config)?;

        cont.to_disk(inner)?;

        setup_ipc_dirs(inner)?;

        // embedded rootfs is read-only and kata's guest has no host mtab
        if inner.common_config.image_type != defaults::IMAGE_TYPE_EMBEDDED
            && RuntimeFamily::from_name(cont.runtime()) != RuntimeFamily::Kata
        {
            create_mtab_link(&spec)?;
        }

        verify_mounts(inner)?;

        let username = inner.common_config.config.user.clone();
        let user = self
            .image
            .user_conf(
                &inner.common_config.image_type,
                &inner.common_config.base_fs,
                &inner.host_config,
                username.as_deref(),
            )
            .await
            .map_err(|e| EngineError::SpecRenewalFailure(chain(e)))?;
        spec_update::update_process_user(&mut spec, &user)?;

        let store = &self.store;
        spec_update::merge_share_namespaces(
            &mut spec,
            &inner.host_config,
            &inner.network_settings,
            &|peer| {
                store
                    .resolve(peer)
                    .filter(|p| p.state.is_running())
                    .map(|p| p.state.pid_info().pid)
            },
        )?;

        spec_update::verify_spec(&spec)?;
        spec.save(&cont.spec_path())?;

        let tty = inner.common_config.config.tty;
        let open_stdin = inner.common_config.config.open_stdin;

        if let Err(e) = self.plugins.container_pre_start(&id).await {
            let _ = self.plugins.container_post_stop(&id).await;
            return Err(EngineError::RuntimeFailure(chain(e)));
        }

        if let Some(sandbox_info) = &inner.common_config.sandbox {
            self.sandbox
                .prepare_container(sandbox_info, &spec, console_fifos, tty)
                .await
                .map_err(|e| EngineError::RuntimeFailure(chain(e)))?;
        }

        let runtime = self.runtime_for(cont.runtime())?;

        let mut create_builder = CreateParamsBuilder::default()
            .bundle(bundle)
            .state(cont.state_path())
            .spec(spec)
            .terminal(tty)
            .open_stdin(open_stdin)
            .console_fifos(console_fifos.clone())
            .exit_fifo(exit_fifo_path.clone());
        if let Some(addr) = inner
            .common_config
            .sandbox
            .as_ref()
            .and_then(|s| s.task_address.clone())
        {
            create_builder = create_builder.task_address(addr);
        }
        let create_params = create_builder
            .build()
            .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;
        runtime
            .create(&id, &create_params)
            .await
            .map_err(|e| EngineError::RuntimeFailure(chain(e)))?;

        let mut start_builder = StartParamsBuilder::default()
            .rootpath(cont.root_path())
            .state(cont.state_path())
            .terminal(tty)
            .open_stdin(open_stdin)
            .loglevel(self.loglevel())
            .console_fifos(console_fifos.clone())
            .start_timeout(self.config.start_timeout_secs())
            .pid_file(pid_file)
            .exit_fifo(exit_fifo_path)
            .image_type_oci(inner.common_config.image_type == defaults::IMAGE_TYPE_OCI);
        if let Some(logpath) = self.config.engine_log_path() {
            start_builder = start_builder.logpath(logpath.clone());
        }
        let start_params = start_builder
            .build()
            .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;

        match runtime.start(&id, &start_params).await {
            Ok(pid_info) => {
                let fifo = rollback
                    .exit_fifo
                    .take()
                    .ok_or_else(|| EngineError::RuntimeFailure("exit fifo was lost".into()))?;
                self.supervisor.add_exit_monitor(fifo, cont.clone())?;
                Ok(pid_info)
            }
            Err(e) => {
                // the monitor may still be tearing down cgroups; give it a
                // bounded window to report before cleanup
                if let Some(fifo) = rollback.exit_fifo.take() {
                    supervisor::wait_exit_fifo(&id, fifo).await;
                }
                Err(EngineError::RuntimeFailure(chain(e)))
            }
        }
    }
}
