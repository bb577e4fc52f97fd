//! Mount plumbing: tmpfs setup, lazy unmounts and `/proc/self/mountinfo`
//! scans used to reclaim residual mount points.

use crate::error::{EngineError, Result};
use log::warn;
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use std::{
    fs::DirBuilder,
    io::{self, BufRead},
    os::unix::fs::DirBuilderExt,
    path::Path,
};

/// Create a directory and all of its parents with the provided mode.
pub fn ensure_dir(path: &Path, mode: u32) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(path)
        .map_err(EngineError::from)
}

/// Mount a tmpfs with the provided data string (`size=...,mode=...`).
pub fn mount_tmpfs(target: &Path, flags: MsFlags, data: &str) -> Result<()> {
    mount(
        Some("tmpfs"),
        target,
        Some("tmpfs"),
        flags,
        Some(data),
    )
    .map_err(|source| EngineError::MountFailure {
        target: target.display().to_string(),
        source,
    })
}

/// Lazily detach a mount point. Unmounted or vanished targets are fine.
pub fn umount_detach(target: &Path) -> Result<()> {
    match umount2(target, MntFlags::MNT_DETACH) {
        Ok(()) => Ok(()),
        Err(nix::Error::ENOENT) | Err(nix::Error::EINVAL) => Ok(()),
        Err(source) => Err(EngineError::UmountFailure {
            target: target.display().to_string(),
            source,
        }),
    }
}

/// Change the owner of a path.
pub fn chown_path(path: &Path, uid: u32, gid: u32) -> Result<()> {
    nix::unistd::chown(
        path,
        Some(nix::unistd::Uid::from_raw(uid)),
        Some(nix::unistd::Gid::from_raw(gid)),
    )
    .map_err(|e| EngineError::Io(io::Error::from_raw_os_error(e as i32)))
}

/// Parse a `uid:gid:size` user remap string.
pub fn parse_user_remap(remap: &str) -> Result<(u32, u32, u32)> {
    let parts: Vec<&str> = remap.split(':').collect();
    if parts.len() != 3 {
        return Err(EngineError::InvalidArgument(format!(
            "invalid user remap: {}",
            remap
        )));
    }
    let parse = |s: &str| {
        s.parse::<u32>().map_err(|_| {
            EngineError::InvalidArgument(format!("invalid user remap: {}", remap))
        })
    };
    Ok((parse(parts[0])?, parse(parts[1])?, parse(parts[2])?))
}

/// Undo the octal escaping applied to mount points in mountinfo.
fn unescape_mountinfo(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let code: String = chars.by_ref().take(3).collect();
        match u8::from_str_radix(&code, 8) {
            Ok(b) => out.push(b as char),
            Err(_) => {
                out.push('\\');
                out.push_str(&code);
            }
        }
    }
    out
}

/// Extract all mount points from a mountinfo stream.
fn parse_mount_points<R: BufRead>(reader: R) -> io::Result<Vec<String>> {
    let mut points = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if let Some(field) = line.split_whitespace().nth(4) {
            points.push(unescape_mountinfo(field));
        }
    }
    Ok(points)
}

fn mount_points() -> io::Result<Vec<String>> {
    let file = std::fs::File::open("/proc/self/mountinfo")?;
    parse_mount_points(io::BufReader::new(file))
}

/// Whether the path is currently a mount point.
pub fn detect_mounted(path: &Path) -> Result<bool> {
    let needle = path.display().to_string();
    Ok(mount_points()?.iter().any(|p| *p == needle))
}

/// Lazily unmount every residual mount target below `<root_path>/<id>`,
/// deepest first.
pub fn cleanup_mounts_by_id(id: &str, root_path: &Path) -> Result<()> {
    let prefix = root_path.join(id).display().to_string();
    let mut targets: Vec<String> = mount_points()?
        .into_iter()
        .filter(|p| p == &prefix || p.starts_with(&format!("{}/", prefix)))
        .collect();
    targets.sort_by_key(|p| std::cmp::Reverse(p.len()));

    for target in targets {
        if let Err(e) = umount_detach(Path::new(&target)) {
            warn!("Failed to umount residual target {}: {}", target, e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const MOUNTINFO: &str = "\
22 26 0:20 / /sys rw,relatime shared:7 - sysfs sysfs rw
26 0 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
94 26 0:39 / /var/lib/engine/abc/rootfs rw shared:40 - overlay overlay rw
95 94 0:40 / /var/lib/engine/abc/rootfs/dev rw - tmpfs tmpfs rw
96 26 0:41 / /var/lib/engine/with\\040space rw - tmpfs tmpfs rw
";

    #[test]
    fn parse_mountinfo() {
        let points = parse_mount_points(Cursor::new(MOUNTINFO)).expect("parse");
        assert_eq!(points.len(), 5);
        assert_eq!(points[0], "/sys");
        assert_eq!(points[4], "/var/lib/engine/with space");
    }

    #[test]
    fn user_remap() {
        assert_eq!(parse_user_remap("1000:1000:65536").unwrap(), (1000, 1000, 65536));
        assert!(parse_user_remap("1000:1000").is_err());
        assert!(parse_user_remap("a:b:c").is_err());
    }

    #[test]
    fn ensure_dir_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("a/b/c");
        ensure_dir(&target, 0o700).expect("create");
        ensure_dir(&target, 0o700).expect("recreate");
        assert!(target.is_dir());
    }
}
