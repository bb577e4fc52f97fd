//! The lifecycle service: the aggregate the server embeds. It owns the
//! container store, the supervisor and the collaborator handles, and exposes
//! one entry point per container operation, each keyed by container id.

pub mod delete;
pub mod exec;
pub mod start;
pub mod stop;

use crate::{
    config::Config,
    container::{
        state::StateInfo, store::ContainerStore, CommonConfig, Container, ContainerConfig,
        HostConfig, MountPoint,
    },
    defaults,
    error::{chain, EngineError, Result},
    image::ImageStore,
    mount,
    network::{self, NetworkAdapter, NoopNetwork},
    oci_spec::runtime::Spec,
    plugin::{NoopPlugins, PluginHooks},
    runtime::{CleanParams, CleanParamsBuilder, ContainerRuntime, PauseParamsBuilder, ResumeParamsBuilder},
    sandbox::{NoopSandbox, SandboxHooks},
    supervisor::Supervisor,
    volume::VolumeStore,
};
use log::{debug, error, warn};
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use tokio::sync::mpsc;

/// Request for registering a new container.
#[derive(Default)]
pub struct CreateRequest {
    /// Explicit 64 hex character id; generated when absent.
    pub id: Option<String>,

    /// Unique human readable name; derived from the id when absent.
    pub name: Option<String>,

    /// Name of the low-level runtime driving this container.
    pub runtime: String,

    /// Image backend type.
    pub image_type: String,

    /// Image reference.
    pub image: String,

    /// User supplied configuration.
    pub config: ContainerConfig,

    /// Host level configuration.
    pub host_config: HostConfig,

    /// Materialised mounts.
    pub mount_points: Vec<MountPoint>,

    /// Initial OCI configuration written into the bundle, when the caller
    /// already assembled one.
    pub spec: Option<Spec>,
}

/// Builder wiring the collaborators into a [`LifecycleService`].
pub struct LifecycleServiceBuilder {
    config: Config,
    runtimes: HashMap<String, Arc<dyn ContainerRuntime>>,
    image: Option<Arc<dyn ImageStore>>,
    volumes: Option<Arc<dyn VolumeStore>>,
    network: Arc<dyn NetworkAdapter>,
    sandbox: Arc<dyn SandboxHooks>,
    plugins: Arc<dyn PluginHooks>,
}

impl LifecycleServiceBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Register a low-level runtime under its configured name.
    pub fn runtime(mut self, name: &str, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtimes.insert(name.to_string(), runtime);
        self
    }

    pub fn image(mut self, image: Arc<dyn ImageStore>) -> Self {
        self.image = Some(image);
        self
    }

    pub fn volumes(mut self, volumes: Arc<dyn VolumeStore>) -> Self {
        self.volumes = Some(volumes);
        self
    }

    pub fn network(mut self, network: Arc<dyn NetworkAdapter>) -> Self {
        self.network = network;
        self
    }

    pub fn sandbox(mut self, sandbox: Arc<dyn SandboxHooks>) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn plugins(mut self, plugins: Arc<dyn PluginHooks>) -> Self {
        self.plugins = plugins;
        self
    }

    /// Spawn the supervisor and the auto-remove reaper and assemble the
    /// service. Must run inside a tokio runtime.
    pub fn build(self) -> Result<Arc<LifecycleService>> {
        if self.runtimes.is_empty() {
            return Err(EngineError::InvalidArgument(
                "no container runtime registered".into(),
            ));
        }
        let image = self
            .image
            .ok_or_else(|| EngineError::InvalidArgument("no image store wired".into()))?;
        let volumes = self
            .volumes
            .ok_or_else(|| EngineError::InvalidArgument("no volume store wired".into()))?;

        let (reaper_tx, mut reaper_rx) = mpsc::unbounded_channel::<String>();
        let service = Arc::new(LifecycleService {
            config: self.config,
            store: ContainerStore::new(),
            runtimes: self.runtimes,
            image,
            volumes,
            network: self.network,
            sandbox: self.sandbox,
            plugins: self.plugins,
            supervisor: Supervisor::spawn(reaper_tx),
        });

        let weak = Arc::downgrade(&service);
        tokio::spawn(async move {
            while let Some(id) = reaper_rx.recv().await {
                let service = match weak.upgrade() {
                    Some(service) => service,
                    None => break,
                };
                debug!("Auto removing container {}", id);
                if let Err(e) = service.delete_container(&id, true, false).await {
                    error!("{}", EngineError::AutoRemoveFailed(format!("{}: {}", id, e)));
                }
            }
        });

        Ok(service)
    }
}

pub struct LifecycleService {
    config: Config,
    store: ContainerStore,
    runtimes: HashMap<String, Arc<dyn ContainerRuntime>>,
    image: Arc<dyn ImageStore>,
    volumes: Arc<dyn VolumeStore>,
    network: Arc<dyn NetworkAdapter>,
    sandbox: Arc<dyn SandboxHooks>,
    plugins: Arc<dyn PluginHooks>,
    supervisor: Supervisor,
}

impl LifecycleService {
    pub fn builder() -> LifecycleServiceBuilder {
        LifecycleServiceBuilder {
            config: Config::default(),
            runtimes: HashMap::new(),
            image: None,
            volumes: None,
            network: Arc::new(NoopNetwork),
            sandbox: Arc::new(NoopSandbox),
            plugins: Arc::new(NoopPlugins),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ContainerStore {
        &self.store
    }

    pub(crate) fn must_get(&self, id: &str) -> Result<Arc<Container>> {
        self.store
            .resolve(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    pub(crate) fn runtime_for(&self, name: &str) -> Result<Arc<dyn ContainerRuntime>> {
        self.runtimes
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::InvalidArgument(format!("unknown runtime {}", name)))
    }

    pub(crate) fn loglevel(&self) -> String {
        self.config.log_level().to_string().to_lowercase()
    }

    pub(crate) fn clean_params(
        &self,
        pid: i32,
        root_path: PathBuf,
        state_path: PathBuf,
    ) -> Result<CleanParams> {
        let mut builder = CleanParamsBuilder::default()
            .rootpath(root_path)
            .state(state_path)
            .loglevel(self.loglevel())
            .pid(pid);
        if let Some(logpath) = self.config.engine_log_path() {
            builder = builder.logpath(logpath.clone());
        }
        builder
            .build()
            .map_err(|e| EngineError::InvalidArgument(e.to_string()))
    }

    pub(crate) fn generate_id() -> String {
        let mut id = String::with_capacity(defaults::CONTAINER_ID_LEN);
        while id.len() < defaults::CONTAINER_ID_LEN {
            id.push_str(&uuid::Uuid::new_v4().to_simple().to_string());
        }
        id.truncate(defaults::CONTAINER_ID_LEN);
        id
    }

    /// Register a new container: claim id and name, materialise the bundle
    /// directory, persist the initial record and insert it into the store in
    /// `Created` state.
    pub async fn create_container(&self, request: CreateRequest) -> Result<String> {
        if request.runtime.is_empty() {
            return Err(EngineError::InvalidArgument("runtime name is empty".into()));
        }
        self.runtime_for(&request.runtime)?;

        let id = match request.id {
            Some(id) => {
                if id.len() != defaults::CONTAINER_ID_LEN
                    || !id.bytes().all(|b| b.is_ascii_hexdigit())
                {
                    return Err(EngineError::InvalidArgument(format!(
                        "malformed container id {}",
                        id
                    )));
                }
                id
            }
            None => Self::generate_id(),
        };
        let name = request.name.unwrap_or_else(|| id[..12].to_string());

        self.store.reserve_id_name(&id, &name)?;

        let result = self
            .register_container(&id, &name, request.runtime, request.image_type, request.image,
                request.config, request.host_config, request.mount_points, request.spec)
            .await;
        if result.is_err() {
            self.store.release_id_name(&id, &name);
        }
        result?;
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn register_container(
        &self,
        id: &str,
        name: &str,
        runtime: String,
        image_type: String,
        image: String,
        config: ContainerConfig,
        host_config: HostConfig,
        mount_points: Vec<MountPoint>,
        spec: Option<Spec>,
    ) -> Result<()> {
        let mut host_config = host_config;
        host_config.auto_remove_bak = host_config.auto_remove;

        let bundle = self.config.root_path().join(id);
        mount::ensure_dir(&bundle, defaults::SECURE_DIR_MODE)?;

        let base_fs = host_config
            .external_rootfs
            .clone()
            .unwrap_or_else(|| bundle.join("rootfs"));

        let common_config = CommonConfig {
            image_type,
            image,
            base_fs,
            config,
            mount_points,
            shm_path: None,
            sandbox: None,
            created_at: std::time::SystemTime::now(),
        };

        let container = Arc::new(Container::new(
            id,
            name,
            &runtime,
            self.config.root_path(),
            self.config.state_path(),
            common_config,
            host_config,
        ));

        if let Some(spec) = spec {
            spec.save(&container.spec_path())?;
        }
        {
            let inner = container.lock().await;
            container.to_disk(&inner)?;
        }
        self.store.add(container)
    }

    /// Snapshot of the container's state tuple.
    pub fn container_status(&self, id: &str) -> Result<StateInfo> {
        Ok(self.must_get(id)?.state.snapshot())
    }

    /// Wait until a container stops; `None` on timeout.
    pub async fn wait_container_stop(
        &self,
        id: &str,
        timeout: Option<std::time::Duration>,
    ) -> Result<Option<i32>> {
        let cont = self.must_get(id)?;
        Ok(cont.state.wait_stopped(timeout).await)
    }

    /// Wait until a container is removed from the store. An id which no
    /// longer resolves reports as already removed.
    pub async fn wait_container_removed(
        &self,
        id: &str,
        timeout: Option<std::time::Duration>,
    ) -> bool {
        let cont = match self.store.resolve(id) {
            Some(cont) => cont,
            None => return true,
        };
        cont.state.wait_removed(timeout).await
    }

    /// Suspend all processes of a running container.
    pub async fn pause_container(&self, id: &str) -> Result<()> {
        let cont = self.must_get(id)?;
        let inner = cont.lock().await;

        if !cont.state.is_running() {
            return Err(EngineError::InvalidTransition(format!(
                "cannot pause container {}: not running",
                cont.id()
            )));
        }
        if cont.state.is_paused() {
            return Err(EngineError::InvalidTransition(format!(
                "container {} is already paused",
                cont.id()
            )));
        }

        let runtime = self.runtime_for(cont.runtime())?;
        let params = PauseParamsBuilder::default()
            .rootpath(cont.root_path())
            .state(cont.state_path())
            .build()
            .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;
        runtime
            .pause(cont.id(), &params)
            .await
            .map_err(|e| EngineError::RuntimeFailure(chain(e)))?;

        cont.state.set_paused()?;
        cont.to_disk(&inner)?;
        Ok(())
    }

    /// Resume a paused container.
    pub async fn resume_container(&self, id: &str) -> Result<()> {
        let cont = self.must_get(id)?;
        let inner = cont.lock().await;

        if !cont.state.is_paused() {
            return Err(EngineError::InvalidTransition(format!(
                "cannot resume container {}: not paused",
                cont.id()
            )));
        }

        let runtime = self.runtime_for(cont.runtime())?;
        let params = ResumeParamsBuilder::default()
            .rootpath(cont.root_path())
            .state(cont.state_path())
            .build()
            .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;
        runtime
            .resume(cont.id(), &params)
            .await
            .map_err(|e| EngineError::RuntimeFailure(chain(e)))?;

        cont.state.set_resumed()?;
        cont.to_disk(&inner)?;
        Ok(())
    }

    /// Reclaim the resources of an exited container: runtime resources, the
    /// mounted rootfs and the dev tmpfs of system containers.
    pub async fn clean_container_resource(&self, id: &str, pid: i32) -> Result<()> {
        let cont = match self.store.resolve(id) {
            Some(cont) => cont,
            None => {
                warn!("No such container: {}", id);
                return Ok(());
            }
        };
        let inner = cont.lock().await;

        let runtime = self.runtime_for(cont.runtime())?;
        let params = self.clean_params(
            pid,
            cont.root_path().to_path_buf(),
            cont.state_path().to_path_buf(),
        )?;
        runtime
            .clean_resource(cont.id(), &params)
            .await
            .map_err(|e| EngineError::RuntimeFailure(chain(e)))?;

        self.image
            .umount_container_rootfs(&inner.common_config.image_type, &inner.common_config.image, cont.id())
            .await
            .map_err(|e| EngineError::RuntimeFailure(chain(e)))?;

        start::umount_dev_tmpfs(&inner);

        if network::is_native_mode(&inner.host_config.network_mode) {
            if let Err(e) = self
                .network
                .remove_native_network(cont.id(), &inner.network_settings)
                .await
            {
                error!("Failed to remove network of container {}: {}", cont.id(), chain(e));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests;
