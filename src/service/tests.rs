//! Scenario tests for the lifecycle pipelines, driven through mock
//! collaborators standing in for the low-level runtime, the image store and
//! the volume store.

use super::*;
use crate::{
    attach::ExecStreams,
    container::{HostConfig, MountPoint, Ulimit},
    image::{ImageStore, ImageSummary},
    oci_spec::runtime::{
        ProcessBuilder, RootBuilder, Spec, SpecBuilder, User, UserBuilder,
    },
    runtime::{
        ContainerRuntime, CreateParams, ExecParams, KillParams, PauseParams, PidInfo,
        ResumeParams, RmParams, StartParams,
    },
    service::exec::ExecRequest,
    volume::{VolumeRemoveStatus, VolumeStore},
};
use anyhow::{bail, Result as AnyResult};
use async_trait::async_trait;
use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

const SIGKILL: u32 = libc::SIGKILL as u32;

#[derive(Default)]
struct MockRuntime {
    calls: Mutex<Vec<String>>,
    exit_fifo: Mutex<Option<PathBuf>>,
    fail_start: AtomicBool,
    ignore_stop_signal: AtomicBool,
}

impl MockRuntime {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().expect("calls lock").push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Play the runtime monitor: report an exit code over the exit FIFO.
    fn report_exit(&self, code: i32) {
        let path = self
            .exit_fifo
            .lock()
            .expect("fifo lock")
            .clone()
            .expect("exit fifo was handed to create");
        let mut fifo = std::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .expect("open exit fifo");
        fifo.write_all(&code.to_le_bytes()).expect("report exit");
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create(&self, _id: &str, params: &CreateParams) -> AnyResult<()> {
        self.record("create");
        *self.exit_fifo.lock().expect("fifo lock") = Some(params.exit_fifo().clone());
        Ok(())
    }

    async fn start(&self, _id: &str, _params: &StartParams) -> AnyResult<PidInfo> {
        self.record("start");
        if self.fail_start.load(Ordering::SeqCst) {
            bail!("oci runtime error: exit status 2");
        }
        Ok(PidInfo {
            pid: 4242,
            ppid: 4241,
            start_time: 10,
            pstart_time: 9,
        })
    }

    async fn kill(&self, _id: &str, params: &KillParams) -> AnyResult<()> {
        self.record(format!("kill {}", params.signal()));
        let lethal = params.signal() == SIGKILL
            || (params.signal() == params.stop_signal()
                && !self.ignore_stop_signal.load(Ordering::SeqCst));
        if lethal {
            let code = if params.signal() == SIGKILL { 137 } else { 0 };
            self.report_exit(code);
        }
        Ok(())
    }

    async fn pause(&self, _id: &str, _params: &PauseParams) -> AnyResult<()> {
        self.record("pause");
        Ok(())
    }

    async fn resume(&self, _id: &str, _params: &ResumeParams) -> AnyResult<()> {
        self.record("resume");
        Ok(())
    }

    async fn exec(&self, _id: &str, params: &ExecParams) -> AnyResult<i32> {
        self.record(format!("exec {}", params.suffix()));
        Ok(0)
    }

    async fn clean_resource(&self, id: &str, params: &crate::runtime::CleanParams) -> AnyResult<()> {
        self.record("clean_resource");
        let _ = std::fs::remove_dir_all(params.state().join(id));
        Ok(())
    }

    async fn rm(&self, id: &str, params: &RmParams) -> AnyResult<()> {
        self.record("rm");
        let _ = std::fs::remove_dir_all(params.rootpath().join(id));
        Ok(())
    }
}

#[derive(Default)]
struct MockImage {
    calls: Mutex<Vec<String>>,
    fail_mount: AtomicBool,
}

impl MockImage {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl ImageStore for MockImage {
    async fn mount_container_rootfs(
        &self,
        _image_type: &str,
        _image: &str,
        _id: &str,
    ) -> AnyResult<()> {
        self.calls.lock().expect("calls lock").push("mount".into());
        if self.fail_mount.load(Ordering::SeqCst) {
            bail!("driver overlay: mount failed");
        }
        Ok(())
    }

    async fn umount_container_rootfs(
        &self,
        _image_type: &str,
        _image: &str,
        _id: &str,
    ) -> AnyResult<()> {
        self.calls.lock().expect("calls lock").push("umount".into());
        Ok(())
    }

    async fn remove_container_rootfs(&self, _image_type: &str, _id: &str) -> AnyResult<()> {
        self.calls.lock().expect("calls lock").push("remove".into());
        Ok(())
    }

    async fn user_conf(
        &self,
        _image_type: &str,
        _base_fs: &Path,
        _host_config: &HostConfig,
        username: Option<&str>,
    ) -> AnyResult<User> {
        if let Some("missing") = username {
            bail!("no such user");
        }
        Ok(UserBuilder::default()
            .uid(0u32)
            .gid(0u32)
            .build()
            .expect("build user"))
    }

    async fn image_summary(&self, _image_type: &str, _image: &str) -> AnyResult<ImageSummary> {
        Ok(ImageSummary::default())
    }
}

#[derive(Default)]
struct MockVolumes {
    dropped_refs: Mutex<Vec<(String, String)>>,
    removed: Mutex<Vec<String>>,
}

#[async_trait]
impl VolumeStore for MockVolumes {
    async fn del_ref(&self, name: &str, container_id: &str) -> AnyResult<()> {
        self.dropped_refs
            .lock()
            .expect("refs lock")
            .push((name.into(), container_id.into()));
        Ok(())
    }

    async fn remove(&self, name: &str) -> AnyResult<VolumeRemoveStatus> {
        self.removed.lock().expect("removed lock").push(name.into());
        Ok(VolumeRemoveStatus::Removed)
    }
}

struct Fixture {
    service: Arc<LifecycleService>,
    runtime: Arc<MockRuntime>,
    image: Arc<MockImage>,
    volumes: Arc<MockVolumes>,
    root: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let root = tempfile::tempdir().expect("tempdir");
    let runtime = Arc::new(MockRuntime::default());
    let image = Arc::new(MockImage::default());
    let volumes = Arc::new(MockVolumes::default());

    let config = crate::config::ConfigBuilder::default()
        .root_path(root.path().join("engine"))
        .state_path(root.path().join("run"))
        .client_run_dir(root.path().join("client"))
        .force_kill_wait_secs(5u64)
        .build()
        .expect("build config");

    let service = LifecycleService::builder()
        .config(config)
        .runtime("runc", runtime.clone())
        .image(image.clone())
        .volumes(volumes.clone())
        .build()
        .expect("build service");

    Fixture {
        service,
        runtime,
        image,
        volumes,
        root,
    }
}

fn minimal_spec(rootfs: &Path) -> Spec {
    SpecBuilder::default()
        .process(
            ProcessBuilder::default()
                .args(vec!["/bin/true".to_string()])
                .build()
                .expect("build process"),
        )
        .root(
            RootBuilder::default()
                .path(rootfs)
                .build()
                .expect("build root"),
        )
        .build()
        .expect("build spec")
}

async fn create(fx: &Fixture, host_config: HostConfig) -> String {
    let rootfs = fx.root.path().join("rootfs");
    std::fs::create_dir_all(&rootfs).expect("rootfs dir");
    fx.service
        .create_container(CreateRequest {
            runtime: "runc".into(),
            image_type: defaults::IMAGE_TYPE_OCI.into(),
            image: "busybox:latest".into(),
            host_config,
            spec: Some(minimal_spec(&rootfs)),
            ..Default::default()
        })
        .await
        .expect("create container")
}

#[tokio::test]
async fn clean_start_and_natural_exit() {
    let fx = fixture();
    let id = create(&fx, HostConfig::default()).await;

    fx.service
        .start_container(&id, &Default::default(), false)
        .await
        .expect("start");

    let status = fx.service.container_status(&id).expect("status");
    assert!(fx.service.store().get(&id).expect("record").state.is_running());
    assert_eq!(status.pid_info.pid, 4242);
    assert_eq!(fx.runtime.count("create"), 1);
    assert_eq!(fx.runtime.count("start"), 1);

    // the runtime monitor reports a natural exit
    fx.runtime.report_exit(0);
    let code = fx
        .service
        .wait_container_stop(&id, Some(Duration::from_secs(5)))
        .await
        .expect("wait");
    assert_eq!(code, Some(0));

    let status = fx.service.container_status(&id).expect("status");
    assert_eq!(
        status.status,
        crate::container::state::ContainerStatus::Stopped
    );
    assert_eq!(status.exit_code, 0);
}

#[tokio::test]
async fn failed_rootfs_mount_unwinds_the_start() {
    let fx = fixture();
    let id = create(&fx, HostConfig::default()).await;
    fx.image.fail_mount.store(true, Ordering::SeqCst);

    let err = fx
        .service
        .start_container(&id, &Default::default(), false)
        .await
        .expect_err("start must fail");
    assert!(err.to_string().contains("mount failed"));

    let status = fx.service.container_status(&id).expect("status");
    assert_eq!(
        status.status,
        crate::container::state::ContainerStatus::Stopped
    );
    assert_eq!(status.exit_code, defaults::EXIT_CODE_START_FAILED);
    assert!(status.error.expect("error").contains("mount failed"));

    // the runtime reclaimed the state directory, including the exit FIFO
    let state_dir = fx.service.config().state_path().join(&id);
    assert!(!state_dir.join(defaults::EXIT_FIFO).exists());
    assert_eq!(fx.runtime.count("clean_resource"), 1);
    assert!(fx.image.calls().contains(&"umount".to_string()));

    // without auto remove the record stays registered
    assert!(fx.service.store().get(&id).is_some());
}

#[tokio::test]
async fn auto_remove_cleans_up_after_failed_start() {
    let fx = fixture();
    let mut host_config = HostConfig::default();
    host_config.auto_remove = true;
    let id = create(&fx, host_config).await;
    fx.image.fail_mount.store(true, Ordering::SeqCst);

    // a client fifo home exists for auto removed containers
    let fifo_home = fx.service.config().client_run_dir().join(&id);
    std::fs::create_dir_all(&fifo_home).expect("client fifo home");

    let err = fx
        .service
        .start_container(&id, &Default::default(), false)
        .await
        .expect_err("start must fail");
    assert!(err.to_string().contains("mount failed"));

    assert!(fx.service.store().get(&id).is_none());
    assert!(!fx.service.config().state_path().join(&id).exists());
    assert!(!fifo_home.exists());
    assert_eq!(fx.runtime.count("rm"), 1);
}

#[tokio::test]
async fn graceful_stop_escalates_after_timeout() {
    let fx = fixture();
    let id = create(&fx, HostConfig::default()).await;
    fx.runtime.ignore_stop_signal.store(true, Ordering::SeqCst);

    fx.service
        .start_container(&id, &Default::default(), false)
        .await
        .expect("start");

    fx.service
        .stop_container(&id, 1, false, false)
        .await
        .expect("stop");

    let status = fx.service.container_status(&id).expect("status");
    assert_eq!(
        status.status,
        crate::container::state::ContainerStatus::Stopped
    );
    // the monitor reported the SIGKILL exit
    assert_eq!(status.exit_code, 137);
    assert!(fx.runtime.count("kill 15") >= 1);
    assert!(fx.runtime.count("kill 9") >= 1);
    assert!(status.has_been_manual_stopped);
}

#[tokio::test]
async fn stop_with_zero_timeout_escalates_immediately() {
    let fx = fixture();
    let id = create(&fx, HostConfig::default()).await;
    fx.runtime.ignore_stop_signal.store(true, Ordering::SeqCst);

    fx.service
        .start_container(&id, &Default::default(), false)
        .await
        .expect("start");
    fx.service
        .stop_container(&id, 0, false, false)
        .await
        .expect("stop");

    assert_eq!(fx.service.container_status(&id).expect("status").exit_code, 137);
}

#[tokio::test]
async fn stop_is_idempotent_for_stopped_containers() {
    let fx = fixture();
    let id = create(&fx, HostConfig::default()).await;

    // never started: stop succeeds and leaves the state alone
    fx.service
        .stop_container(&id, 1, false, false)
        .await
        .expect("stop created");
    assert_eq!(
        fx.service.container_status(&id).expect("status").status,
        crate::container::state::ContainerStatus::Created
    );

    fx.service
        .start_container(&id, &Default::default(), false)
        .await
        .expect("start");
    fx.runtime.report_exit(0);
    fx.service
        .wait_container_stop(&id, Some(Duration::from_secs(5)))
        .await
        .expect("wait");

    fx.service
        .stop_container(&id, 1, false, false)
        .await
        .expect("stop stopped");
    assert_eq!(fx.service.container_status(&id).expect("status").exit_code, 0);
}

#[tokio::test]
async fn concurrent_starts_reach_the_runtime_once() {
    let fx = fixture();
    let id = create(&fx, HostConfig::default()).await;

    let opts = Default::default();
    let (a, b) = tokio::join!(
        fx.service.start_container(&id, &opts, true),
        fx.service.start_container(&id, &opts, true),
    );
    a.expect("first start");
    b.expect("second start is idempotent");

    assert_eq!(fx.runtime.count("create"), 1);
    assert_eq!(fx.runtime.count("start"), 1);
}

#[tokio::test]
async fn second_start_without_reset_is_rejected() {
    let fx = fixture();
    let id = create(&fx, HostConfig::default()).await;

    fx.service
        .start_container(&id, &Default::default(), false)
        .await
        .expect("start");
    assert!(matches!(
        fx.service
            .start_container(&id, &Default::default(), false)
            .await,
        Err(EngineError::InvalidTransition(_))
    ));
}

#[tokio::test]
async fn exec_into_paused_container_is_rejected() {
    let fx = fixture();
    let id = create(&fx, HostConfig::default()).await;

    fx.service
        .start_container(&id, &Default::default(), false)
        .await
        .expect("start");
    fx.service.pause_container(&id).await.expect("pause");

    let err = fx
        .service
        .exec_container(
            &id,
            ExecRequest {
                argv: vec!["/bin/ls".into()],
                ..Default::default()
            },
            ExecStreams::default(),
        )
        .await
        .expect_err("exec must fail");
    assert!(err.to_string().contains("paused"));
    // the runtime was never asked to exec
    assert_eq!(fx.runtime.count("exec"), 0);
}

#[tokio::test]
async fn exec_returns_the_exit_code() {
    let fx = fixture();
    let id = create(&fx, HostConfig::default()).await;

    fx.service
        .start_container(&id, &Default::default(), false)
        .await
        .expect("start");

    let code = fx
        .service
        .exec_container(
            &id,
            ExecRequest {
                argv: vec!["/bin/true".into()],
                ..Default::default()
            },
            ExecStreams::default(),
        )
        .await
        .expect("exec");
    assert_eq!(code, 0);
    assert_eq!(fx.runtime.count("exec"), 1);
}

#[tokio::test]
async fn exec_with_unresolvable_user_is_rejected() {
    let fx = fixture();
    let id = create(&fx, HostConfig::default()).await;
    fx.service
        .start_container(&id, &Default::default(), false)
        .await
        .expect("start");

    let err = fx
        .service
        .exec_container(
            &id,
            ExecRequest {
                argv: vec!["/bin/ls".into()],
                user: Some("missing".into()),
                ..Default::default()
            },
            ExecStreams::default(),
        )
        .await
        .expect_err("exec must fail");
    assert!(matches!(err, EngineError::UserResolution(_)));
}

#[tokio::test]
async fn delete_requires_force_for_running_containers() {
    let fx = fixture();
    let id = create(&fx, HostConfig::default()).await;
    fx.service
        .start_container(&id, &Default::default(), false)
        .await
        .expect("start");

    let err = fx
        .service
        .delete_container(&id, false, false)
        .await
        .expect_err("delete must fail");
    assert!(err.to_string().contains("running"));
    // the abort cleared the removal flag, so a forced delete still works
    fx.service
        .delete_container(&id, true, false)
        .await
        .expect("forced delete");
    assert!(fx.service.store().get(&id).is_none());
}

#[tokio::test]
async fn delete_releases_volumes_and_deregisters() {
    let fx = fixture();
    let rootfs = fx.root.path().join("rootfs");
    std::fs::create_dir_all(&rootfs).expect("rootfs dir");
    let volume_src = fx.root.path().join("volumes/anon1");
    std::fs::create_dir_all(&volume_src).expect("volume dir");

    let mut host_config = HostConfig::default();
    host_config.auto_remove = true;
    let id = fx
        .service
        .create_container(CreateRequest {
            runtime: "runc".into(),
            image_type: defaults::IMAGE_TYPE_OCI.into(),
            image: "busybox:latest".into(),
            host_config,
            mount_points: vec![
                MountPoint {
                    typ: "volume".into(),
                    name: Some("anon1".into()),
                    named: false,
                    source: volume_src,
                    destination: "/data".into(),
                },
                MountPoint {
                    typ: "bind".into(),
                    name: None,
                    named: false,
                    source: "/tmp".into(),
                    destination: "/host-tmp".into(),
                },
            ],
            spec: Some(minimal_spec(&rootfs)),
            ..Default::default()
        })
        .await
        .expect("create");

    fx.service.delete_container(&id, false, false).await.expect("delete");

    let refs = fx.volumes.dropped_refs.lock().expect("refs lock").clone();
    assert_eq!(refs, vec![("anon1".to_string(), id.clone())]);
    let removed = fx.volumes.removed.lock().expect("removed lock").clone();
    assert_eq!(removed, vec!["anon1".to_string()]);

    assert!(fx.service.store().get(&id).is_none());
    assert!(matches!(
        fx.service.delete_container(&id, true, false).await,
        Err(EngineError::NotFound(_))
    ));
    // the name is free again
    fx.service
        .store()
        .reserve_id_name(&id, &id[..12])
        .expect("id and name are released");
}

#[tokio::test]
async fn delete_time_volume_flag_removes_anonymous_volumes() {
    let fx = fixture();
    let rootfs = fx.root.path().join("rootfs");
    std::fs::create_dir_all(&rootfs).expect("rootfs dir");
    let anon_src = fx.root.path().join("volumes/anon2");
    let named_src = fx.root.path().join("volumes/data");
    std::fs::create_dir_all(&anon_src).expect("volume dir");
    std::fs::create_dir_all(&named_src).expect("volume dir");

    let id = fx
        .service
        .create_container(CreateRequest {
            runtime: "runc".into(),
            image_type: defaults::IMAGE_TYPE_OCI.into(),
            image: "busybox:latest".into(),
            mount_points: vec![
                MountPoint {
                    typ: "volume".into(),
                    name: Some("anon2".into()),
                    named: false,
                    source: anon_src,
                    destination: "/scratch".into(),
                },
                MountPoint {
                    typ: "volume".into(),
                    name: Some("data".into()),
                    named: true,
                    source: named_src,
                    destination: "/data".into(),
                },
            ],
            spec: Some(minimal_spec(&rootfs)),
            ..Default::default()
        })
        .await
        .expect("create");

    // no auto remove in play; the delete request itself asks for volumes
    fx.service
        .delete_container(&id, false, true)
        .await
        .expect("delete");

    let refs = fx.volumes.dropped_refs.lock().expect("refs lock").clone();
    assert_eq!(
        refs,
        vec![
            ("anon2".to_string(), id.clone()),
            ("data".to_string(), id.clone()),
        ]
    );
    // only the anonymous volume is removed, the named one survives
    let removed = fx.volumes.removed.lock().expect("removed lock").clone();
    assert_eq!(removed, vec!["anon2".to_string()]);
    assert!(fx.service.store().get(&id).is_none());
}

#[tokio::test]
async fn delete_racing_a_start_settles_consistently() {
    let fx = fixture();
    let id = create(&fx, HostConfig::default()).await;

    let start_opts = Default::default();
    let (started, deleted) = tokio::join!(
        fx.service.start_container(&id, &start_opts, false),
        fx.service.delete_container(&id, false, false),
    );

    match deleted {
        Ok(()) => {
            // removal won: the record is gone and the start lost
            assert!(fx.service.store().get(&id).is_none());
            assert!(started.is_err());
        }
        Err(_) => {
            // the start won: the container runs and is still registered
            started.expect("start");
            let record = fx.service.store().get(&id).expect("record");
            assert!(record.state.is_running());
            assert!(!record.state.is_removal_in_progress());
        }
    }
}

#[tokio::test]
async fn kill_requires_a_running_container() {
    let fx = fixture();
    let id = create(&fx, HostConfig::default()).await;

    assert!(matches!(
        fx.service.kill_container(&id, 15).await,
        Err(EngineError::InvalidTransition(_))
    ));

    fx.service
        .start_container(&id, &Default::default(), false)
        .await
        .expect("start");
    fx.runtime.ignore_stop_signal.store(true, Ordering::SeqCst);
    fx.service
        .kill_container(&id, 10)
        .await
        .expect("custom signal");
    assert_eq!(fx.runtime.count("kill 10"), 1);
    assert!(fx.service.store().get(&id).expect("record").state.is_running());
}

#[tokio::test]
async fn duplicate_names_are_rejected() {
    let fx = fixture();
    let rootfs = fx.root.path().join("rootfs");
    std::fs::create_dir_all(&rootfs).expect("rootfs dir");

    let request = |name: &str| CreateRequest {
        name: Some(name.into()),
        runtime: "runc".into(),
        image_type: defaults::IMAGE_TYPE_OCI.into(),
        image: "busybox:latest".into(),
        spec: Some(minimal_spec(&rootfs)),
        ..Default::default()
    };

    fx.service
        .create_container(request("web"))
        .await
        .expect("first create");
    assert!(matches!(
        fx.service.create_container(request("web")).await,
        Err(EngineError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn pause_and_resume_round_trip() {
    let fx = fixture();
    let id = create(&fx, HostConfig::default()).await;
    fx.service
        .start_container(&id, &Default::default(), false)
        .await
        .expect("start");

    fx.service.pause_container(&id).await.expect("pause");
    assert_eq!(
        fx.service.container_status(&id).expect("status").status,
        crate::container::state::ContainerStatus::Paused
    );
    assert!(matches!(
        fx.service.pause_container(&id).await,
        Err(EngineError::InvalidTransition(_))
    ));

    fx.service.resume_container(&id).await.expect("resume");
    assert_eq!(
        fx.service.container_status(&id).expect("status").status,
        crate::container::state::ContainerStatus::Running
    );
}

#[tokio::test]
async fn daemon_ulimits_reach_the_renewed_spec() {
    let root = tempfile::tempdir().expect("tempdir");
    let runtime = Arc::new(MockRuntime::default());
    let image = Arc::new(MockImage::default());

    let config = crate::config::ConfigBuilder::default()
        .root_path(root.path().join("engine"))
        .state_path(root.path().join("run"))
        .client_run_dir(root.path().join("client"))
        .default_ulimits(vec![Ulimit {
            name: "nofile".into(),
            soft: 1024,
            hard: 2048,
        }])
        .build()
        .expect("build config");
    let service = LifecycleService::builder()
        .config(config)
        .runtime("runc", runtime)
        .image(image)
        .volumes(Arc::new(MockVolumes::default()))
        .build()
        .expect("build service");

    let rootfs = root.path().join("rootfs");
    std::fs::create_dir_all(&rootfs).expect("rootfs dir");
    let id = service
        .create_container(CreateRequest {
            runtime: "runc".into(),
            image_type: defaults::IMAGE_TYPE_OCI.into(),
            image: "busybox:latest".into(),
            spec: Some(minimal_spec(&rootfs)),
            ..Default::default()
        })
        .await
        .expect("create");

    service
        .start_container(&id, &Default::default(), false)
        .await
        .expect("start");

    let renewed = Spec::load(&root.path().join("engine").join(&id).join("config.json"))
        .expect("load renewed spec");
    let rlimits = renewed
        .process()
        .as_ref()
        .and_then(|p| p.rlimits().clone())
        .expect("rlimits");
    assert!(rlimits
        .iter()
        .any(|r| r.typ() == "RLIMIT_NOFILE" && r.soft() == 1024 && r.hard() == 2048));
    let cgroups_path = renewed
        .linux()
        .as_ref()
        .and_then(|l| l.cgroups_path().clone())
        .expect("cgroups path");
    assert_eq!(
        cgroups_path,
        PathBuf::from(format!("{}/{}", crate::config::DEFAULT_CGROUP_PARENT, id))
    );
}
