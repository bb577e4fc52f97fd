//! Contract towards the image store, the component owning layered root
//! filesystems and the user databases baked into images.

use crate::{container::HostConfig, oci_spec::runtime::User};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
/// Condensed description of an image as reported by the store.
pub struct ImageSummary {
    /// The image identifier.
    pub id: String,

    /// Total size of the image in bytes.
    pub size: u64,
}

#[async_trait]
/// ImageStore is the set of image operations the lifecycle engine consumes.
pub trait ImageStore: Send + Sync {
    /// Mount the writable rootfs of the container.
    async fn mount_container_rootfs(
        &self,
        image_type: &str,
        image: &str,
        id: &str,
    ) -> Result<()>;

    /// Unmount the writable rootfs of the container.
    async fn umount_container_rootfs(
        &self,
        image_type: &str,
        image: &str,
        id: &str,
    ) -> Result<()>;

    /// Reclaim the container's writable layer.
    async fn remove_container_rootfs(&self, image_type: &str, id: &str) -> Result<()>;

    /// Resolve a user name against the image's passwd/group databases. An
    /// empty or absent name resolves to uid 0.
    async fn user_conf(
        &self,
        image_type: &str,
        base_fs: &Path,
        host_config: &HostConfig,
        username: Option<&str>,
    ) -> Result<User>;

    /// Describe the image backing a container.
    async fn image_summary(&self, image_type: &str, image: &str) -> Result<ImageSummary>;
}
