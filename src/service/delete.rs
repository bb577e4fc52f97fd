//! The delete pipeline: idempotent teardown of a container's network,
//! state, mounts, runtime directory, rootfs and registry entries.

use super::LifecycleService;
use crate::{
    container::{Container, ContainerInner},
    error::{chain, EngineError, Result},
    mount, network,
    runtime::RmParamsBuilder,
    sandbox::is_sandbox_container,
};
use log::{error, info, warn};
use std::{fs, io, path::Path, sync::Arc};

/// Remove the bind-mount file backing a network namespace.
fn remove_namespace_file(netns_path: &str) {
    if let Err(e) = fs::remove_file(netns_path) {
        if e.kind() != io::ErrorKind::NotFound {
            error!("Failed to remove network ns file {}: {}", netns_path, e);
        }
    }
}

/// Unmount the container's shared `/dev/shm`, unless the container brings
/// its own, is a system container or keeps its IPC namespace private.
fn umount_share_shm(inner: &ContainerInner) {
    if inner
        .common_config
        .mount_points
        .iter()
        .any(|mp| mp.destination == Path::new("/dev/shm"))
    {
        return;
    }
    if inner.host_config.system_container {
        return;
    }
    if !network::is_shareable_ipc(&inner.host_config.ipc_mode) {
        return;
    }
    if let Some(shm_path) = &inner.common_config.shm_path {
        info!("Umounting share shm: {}", shm_path.display());
        if let Err(e) = mount::umount_detach(shm_path) {
            error!("{}", e);
        }
    }
}

/// Unmount and remove the host channel directory.
fn umount_host_channel(inner: &ContainerInner) {
    let channel = match &inner.host_config.host_channel {
        Some(channel) => channel,
        None => return,
    };
    match mount::detect_mounted(&channel.path_on_host) {
        Ok(true) => {
            if let Err(e) = mount::umount_detach(&channel.path_on_host) {
                error!("{}", e);
            }
        }
        Ok(false) => {}
        Err(e) => warn!("Failed to scan mounts: {}", e),
    }
    if let Err(e) = fs::remove_dir_all(&channel.path_on_host) {
        if e.kind() != io::ErrorKind::NotFound {
            error!(
                "Failed to delete host channel path {}: {}",
                channel.path_on_host.display(),
                e
            );
        }
    }
}

impl LifecycleService {
    /// Remove a container. Running containers require `force`, which stops
    /// them first. `remove_anonymous_volumes` additionally deletes the
    /// container's anonymous volumes once their references are dropped. A
    /// second delete of the same id reports `NotFound`.
    pub async fn delete_container(
        &self,
        id: &str,
        force: bool,
        remove_anonymous_volumes: bool,
    ) -> Result<()> {
        let cont = self.must_get(id)?;
        if cont.state.set_removal_in_progress() {
            return Err(EngineError::InvalidTransition(format!(
                "container {} was already in removal progress",
                cont.id()
            )));
        }
        if remove_anonymous_volumes {
            let mut guard = cont.lock().await;
            guard.rm_anonymous_volumes = true;
        }
        self.delete_flagged(cont, force).await
    }

    /// Delete a container whose removal flag the caller already set. The
    /// flag is cleared again when the removal aborts.
    pub(crate) async fn delete_flagged(&self, cont: Arc<Container>, force: bool) -> Result<()> {
        let result = self.do_delete_guarded(&cont, force).await;
        if result.is_err() {
            cont.state.reset_removal_in_progress();
        }
        result
    }

    async fn do_delete_guarded(&self, cont: &Arc<Container>, force: bool) -> Result<()> {
        if cont.state.is_running() {
            if !force {
                if cont.state.is_paused() {
                    return Err(EngineError::InvalidTransition(format!(
                        "you cannot remove a paused container {}, unpause and stop the \
                         container before removal or force remove",
                        cont.id()
                    )));
                }
                return Err(EngineError::InvalidTransition(format!(
                    "you cannot remove a running container {}, stop the container before \
                     removal or force remove",
                    cont.id()
                )));
            }
            if let Err(e) = self.stop_container(cont.id(), 3, true, false).await {
                return Err(EngineError::RuntimeFailure(format!(
                    "could not stop running container {}, cannot remove: {}",
                    cont.id(),
                    e
                )));
            }
        }

        if let Err(e) = self.plugins.container_post_remove(cont.id()).await {
            warn!(
                "Post remove event for container {} failed: {}",
                cont.id(),
                chain(e)
            );
        }

        self.do_delete(cont).await
    }

    async fn do_delete(&self, cont: &Arc<Container>) -> Result<()> {
        let inner = cont.lock().await;
        let id = cont.id();

        // a start that was already past its precondition checks may have
        // finished while we waited for the record lock
        if cont.state.is_running() {
            return Err(EngineError::InvalidTransition(format!(
                "container {} became running during removal",
                id
            )));
        }

        // a concurrent removal may have deregistered the container already
        if self.store.get(id).is_none() {
            return Ok(());
        }

        if let Err(e) = cont.to_disk(&inner) {
            warn!("Failed to save container {} to disk: {}", id, e);
        }

        if self.store.is_in_gc_progress(id) {
            return Err(EngineError::InvalidTransition(format!(
                "cannot remove container {} in garbage collector progress",
                id
            )));
        }

        self.do_delete_network(cont, &inner).await;

        match fs::remove_dir_all(cont.state_dir()) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(EngineError::RuntimeFailure(format!(
                    "failed to delete state directory {}: {}",
                    cont.state_dir().display(),
                    e
                )))
            }
        }

        umount_share_shm(&inner);
        umount_host_channel(&inner);

        if let Err(e) = mount::cleanup_mounts_by_id(id, cont.root_path()) {
            warn!("Failed to clean up residual mounts of {}: {}", id, e);
        }

        let runtime = self.runtime_for(cont.runtime())?;
        let rm_params = RmParamsBuilder::default()
            .rootpath(cont.root_path())
            .build()
            .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;
        runtime
            .rm(id, &rm_params)
            .await
            .map_err(|e| EngineError::RuntimeFailure(chain(e)))?;

        self.image
            .remove_container_rootfs(&inner.common_config.image_type, id)
            .await
            .map_err(|e| EngineError::RuntimeFailure(chain(e)))?;

        let rm_anonymous =
            inner.rm_anonymous_volumes || inner.host_config.auto_remove_bak;
        self.release_volumes(&inner, id, rm_anonymous).await?;

        cont.state.broadcast_removed();

        if !self.store.remove(id) {
            return Err(EngineError::NotFound(id.to_string()));
        }
        if !self.store.name_index_remove(cont.name()) {
            error!("Failed to remove {} from the name index", cont.name());
        }
        let sandbox_managed = is_sandbox_container(inner.common_config.sandbox.as_ref());
        if !sandbox_managed && !self.store.release_id_name(id, cont.name()) {
            error!(
                "Failed to release id {} and name {} reservations",
                id,
                cont.name()
            );
        }

        // console FIFOs created for the client survive an auto-removed
        // container; reclaim them here
        if inner.host_config.auto_remove_bak {
            let fifo_home = self.config.client_run_dir().join(id);
            if fifo_home.exists() {
                if let Err(e) = fs::remove_dir_all(&fifo_home) {
                    warn!(
                        "Failed to delete client fifo home {}: {}",
                        fifo_home.display(),
                        e
                    );
                }
            }
        }

        Ok(())
    }

    async fn do_delete_network(&self, cont: &Arc<Container>, inner: &ContainerInner) {
        let sandbox_key = match inner.network_settings.sandbox_key.as_deref() {
            Some(key) if !key.is_empty() => key,
            _ => return,
        };

        if network::is_native_mode(&inner.host_config.network_mode) {
            if let Err(e) = self
                .network
                .remove_native_network(cont.id(), &inner.network_settings)
                .await
            {
                warn!(
                    "Failed to remove network when deleting container {}: {}",
                    cont.id(),
                    chain(e)
                );
            }
            remove_namespace_file(sandbox_key);
            return;
        }

        if !network::is_cni_mode(&inner.host_config.network_mode) {
            return;
        }
        // the sandbox owns the netns of its pod containers
        if is_sandbox_container(inner.common_config.sandbox.as_ref()) {
            return;
        }

        if let Err(e) = self.network.remove_namespace(sandbox_key).await {
            warn!(
                "Failed to remove network ns when deleting container {}: {}",
                cont.id(),
                chain(e)
            );
        }
        remove_namespace_file(sandbox_key);
    }

    /// Drop every volume reference the container holds; anonymous volumes
    /// are removed entirely when requested.
    async fn release_volumes(
        &self,
        inner: &ContainerInner,
        id: &str,
        rm_anonymous: bool,
    ) -> Result<()> {
        let mut result = Ok(());
        for mp in &inner.common_config.mount_points {
            let name = match &mp.name {
                Some(name) => name,
                None => continue,
            };
            if let Err(e) = self.volumes.del_ref(name, id).await {
                error!("Failed to delete reference {} to volume {}: {}", id, name, chain(e));
                result = Err(EngineError::RuntimeFailure(format!(
                    "failed to release volume {}",
                    name
                )));
                continue;
            }
            if !mp.named && rm_anonymous {
                if let Err(e) = self.volumes.remove(name).await {
                    error!("Failed to remove anonymous volume {}: {}", name, chain(e));
                    result = Err(EngineError::RuntimeFailure(format!(
                        "failed to remove anonymous volume {}",
                        name
                    )));
                }
            }
        }
        result
    }
}
