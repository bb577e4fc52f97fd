//! Renewal of the mutable parts of an OCI spec, applied just before each
//! start so daemon-level defaults and host configuration changes reach the
//! runtime: annotations, cgroup path, the device list, ulimits, the resolved
//! process user and shared namespaces. Renewal is idempotent; feeding it the
//! same inputs twice yields a byte-identical document.

use crate::{
    config::DEFAULT_CGROUP_PARENT,
    container::{ContainerConfig, HostConfig, NetworkSettings, Ulimit},
    error::{EngineError, Result},
    network,
    oci_spec::runtime::{
        Linux, LinuxDevice, LinuxDeviceCgroup, LinuxDeviceCgroupBuilder, LinuxDeviceBuilder,
        LinuxNamespaceType, LinuxResources, PosixRlimit, PosixRlimitBuilder, Spec, User,
    },
};
use lazy_static::lazy_static;
use nix::sys::stat::{stat, SFlag};
use std::{collections::BTreeMap, path::Path};

/// Annotation carrying the container's cgroup directory; embedded runtimes
/// read it to place the container cgroup.
pub const CGROUP_DIR_ANNOTATION: &str = "cgroup.dir";

lazy_static! {
    /// Device nodes granted to every container.
    static ref DEFAULT_DEVICES: Vec<(&'static str, i64, i64)> = vec![
        ("/dev/null", 1, 3),
        ("/dev/zero", 1, 5),
        ("/dev/full", 1, 7),
        ("/dev/random", 1, 8),
        ("/dev/urandom", 1, 9),
        ("/dev/tty", 5, 0),
    ];
}

/// The effective cgroup parent: per-container setting, then the daemon
/// default, then the built-in fallback.
pub fn resolve_cgroup_parent<'a>(
    host_config: &'a HostConfig,
    daemon_parent: Option<&'a str>,
) -> &'a str {
    host_config
        .cgroup_parent
        .as_deref()
        .filter(|p| !p.is_empty())
        .or(daemon_parent)
        .unwrap_or(DEFAULT_CGROUP_PARENT)
}

/// Synchronise runtime-consumed annotations between the container config and
/// the OCI spec.
pub fn update_annotations(
    spec: &mut Spec,
    config: &mut ContainerConfig,
    cgroup_parent: &str,
) {
    config
        .annotations
        .insert(CGROUP_DIR_ANNOTATION.into(), cgroup_parent.into());
    spec.annotations_mut()
        .get_or_insert_with(BTreeMap::new)
        .insert(CGROUP_DIR_ANNOTATION.into(), cgroup_parent.into());
}

/// Rewrite the cgroup path as `<parent>/<id>`.
pub fn update_cgroups_path(id: &str, spec: &mut Spec, cgroup_parent: &str) {
    let linux = spec.linux_mut().get_or_insert_with(Linux::default);
    linux.set_cgroups_path(Some(format!("{}/{}", cgroup_parent, id).into()));
}

/// Linux dev_t encoding.
fn major(dev: u64) -> i64 {
    (((dev >> 8) & 0xfff) | ((dev >> 32) & !0xfffu64)) as i64
}

fn minor(dev: u64) -> i64 {
    ((dev & 0xff) | ((dev >> 12) & !0xffu64)) as i64
}

fn host_device(path: &Path, in_container: &Path) -> Result<LinuxDevice> {
    let st = stat(path).map_err(|e| {
        EngineError::SpecRenewalFailure(format!(
            "cannot stat device {}: {}",
            path.display(),
            e
        ))
    })?;
    let fmt = SFlag::from_bits_truncate(st.st_mode) & SFlag::S_IFMT;
    let kind = if fmt == SFlag::S_IFBLK {
        "b"
    } else if fmt == SFlag::S_IFCHR {
        "c"
    } else {
        return Err(EngineError::SpecRenewalFailure(format!(
            "{} is not a device node",
            path.display()
        )));
    };
    LinuxDeviceBuilder::default()
        .path(in_container)
        .typ(kind)
        .major(major(st.st_rdev))
        .minor(minor(st.st_rdev))
        .file_mode(st.st_mode & 0o777)
        .uid(st.st_uid)
        .gid(st.st_gid)
        .build()
        .map_err(|e| EngineError::SpecRenewalFailure(e.to_string()))
}

fn allow_rule(typ: &str, major: i64, minor: i64, access: &str) -> Result<LinuxDeviceCgroup> {
    LinuxDeviceCgroupBuilder::default()
        .allow(true)
        .typ(typ)
        .major(major)
        .minor(minor)
        .access(access)
        .build()
        .map_err(|e| EngineError::SpecRenewalFailure(e.to_string()))
}

/// Purge the current device list and rebuild it from the read-only default
/// whitelist plus the user-configured host devices. The device cgroup rules
/// are rebuilt alongside: deny everything, then allow the listed nodes.
pub fn update_devices(spec: &mut Spec, host_config: &HostConfig) -> Result<()> {
    let mut devices = Vec::new();
    let mut rules = vec![LinuxDeviceCgroupBuilder::default()
        .allow(false)
        .access("rwm")
        .build()
        .map_err(|e| EngineError::SpecRenewalFailure(e.to_string()))?];

    for (path, major, minor) in DEFAULT_DEVICES.iter() {
        devices.push(
            LinuxDeviceBuilder::default()
                .path(*path)
                .typ("c")
                .major(*major)
                .minor(*minor)
                .file_mode(0o666u32)
                .build()
                .map_err(|e| EngineError::SpecRenewalFailure(e.to_string()))?,
        );
        rules.push(allow_rule("c", *major, *minor, "rwm")?);
    }

    for mapping in &host_config.devices {
        let device = host_device(&mapping.path_on_host, &mapping.path_in_container)?;
        rules.push(allow_rule(
            device.typ(),
            device.major(),
            device.minor(),
            &mapping.cgroup_permissions,
        )?);
        devices.push(device);
    }

    let linux = spec.linux_mut().get_or_insert_with(Linux::default);
    linux.set_devices(Some(devices));
    linux
        .resources_mut()
        .get_or_insert_with(LinuxResources::default)
        .set_devices(Some(rules));
    Ok(())
}

fn rlimit_from_ulimit(ulimit: &Ulimit) -> Result<PosixRlimit> {
    if ulimit.name.is_empty() {
        return Err(EngineError::SpecRenewalFailure(
            "empty ulimit name".into(),
        ));
    }
    PosixRlimitBuilder::default()
        .typ(format!("RLIMIT_{}", ulimit.name.to_uppercase()))
        .soft(ulimit.soft as u64)
        .hard(ulimit.hard as u64)
        .build()
        .map_err(|e| EngineError::SpecRenewalFailure(e.to_string()))
}

/// Merge daemon default ulimits with the container's own; container entries
/// win on name clashes. The resulting rlimits replace whatever the spec
/// carried.
pub fn update_ulimits(
    spec: &mut Spec,
    daemon_defaults: &[Ulimit],
    host_config: &HostConfig,
) -> Result<()> {
    let mut merged: Vec<&Ulimit> = Vec::new();
    for ulimit in daemon_defaults.iter().chain(host_config.ulimits.iter()) {
        merged.retain(|existing| !existing.name.eq_ignore_ascii_case(&ulimit.name));
        merged.push(ulimit);
    }
    if merged.is_empty() {
        return Ok(());
    }

    let rlimits = merged
        .into_iter()
        .map(rlimit_from_ulimit)
        .collect::<Result<Vec<_>>>()?;
    let process = spec
        .process_mut()
        .as_mut()
        .ok_or_else(|| EngineError::SpecRenewalFailure("spec has no process".into()))?;
    process.set_rlimits(Some(rlimits));
    Ok(())
}

/// Replace the process user with the resolved `{uid, gid, additional_gids}`.
pub fn update_process_user(spec: &mut Spec, user: &User) -> Result<()> {
    let process = spec
        .process_mut()
        .as_mut()
        .ok_or_else(|| EngineError::SpecRenewalFailure("spec has no process".into()))?;
    process.set_user(user.clone());
    Ok(())
}

/// Rewrite namespace entries according to the configured sharing modes.
///
/// `host` modes drop the namespace entry so the container inherits the host
/// namespace; `container:<peer>` modes join the peer's namespace through its
/// `/proc/<pid>/ns` entry; a CNI or natively wired network joins the netns
/// behind the record's sandbox key.
pub fn merge_share_namespaces(
    spec: &mut Spec,
    host_config: &HostConfig,
    settings: &NetworkSettings,
    peer_pid: &dyn Fn(&str) -> Option<i32>,
) -> Result<()> {
    let shares = [
        (host_config.ipc_mode.as_str(), LinuxNamespaceType::Ipc),
        (host_config.uts_mode.as_str(), LinuxNamespaceType::Uts),
        (host_config.network_mode.as_str(), LinuxNamespaceType::Network),
        (host_config.pid_mode.as_str(), LinuxNamespaceType::Pid),
    ];

    let linux = spec.linux_mut().get_or_insert_with(Linux::default);
    let namespaces = match linux.namespaces_mut().as_mut() {
        Some(ns) => ns,
        None => return Ok(()),
    };

    for (mode, typ) in shares.iter() {
        if network::is_host_mode(mode) {
            namespaces.retain(|ns| ns.typ() != *typ);
            continue;
        }

        let path = if let Some(peer) = network::connected_container(mode) {
            let pid = peer_pid(peer).ok_or_else(|| {
                EngineError::SpecRenewalFailure(format!(
                    "cannot join namespaces of container {}: not running",
                    peer
                ))
            })?;
            Some(format!("/proc/{}/ns/{}", pid, typ.proc_entry()))
        } else if *typ == LinuxNamespaceType::Network
            && (network::is_cni_mode(mode) || network::is_native_mode(mode))
        {
            settings.sandbox_key.clone()
        } else {
            None
        };

        if let Some(path) = path {
            for ns in namespaces.iter_mut() {
                if ns.typ() == *typ {
                    ns.set_path(Some(path.clone().into()));
                }
            }
        }
    }
    Ok(())
}

/// Runtime-agnostic validation of the final spec before it is handed to
/// `create`.
pub fn verify_spec(spec: &Spec) -> Result<()> {
    let process = spec
        .process()
        .as_ref()
        .ok_or_else(|| EngineError::SpecRenewalFailure("spec has no process".into()))?;
    if process.args().as_ref().map_or(true, |args| args.is_empty()) {
        return Err(EngineError::SpecRenewalFailure(
            "process has no arguments".into(),
        ));
    }
    if spec.root().is_none() {
        return Err(EngineError::SpecRenewalFailure("spec has no root".into()));
    }
    if let Some(path) = spec.linux().as_ref().and_then(|l| l.cgroups_path().as_ref()) {
        if !path.is_absolute() {
            return Err(EngineError::SpecRenewalFailure(format!(
                "cgroups path {} is not absolute",
                path.display()
            )));
        }
    }
    Ok(())
}
