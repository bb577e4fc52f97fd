//! Contract towards the volume store.

use anyhow::Result;
use async_trait::async_trait;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
/// Outcome of a volume removal request.
pub enum VolumeRemoveStatus {
    /// The volume was removed.
    Removed,

    /// The volume did not exist; removal during container deletion treats
    /// this as success.
    NotFound,
}

#[async_trait]
/// VolumeStore is the set of volume operations the lifecycle engine consumes.
pub trait VolumeStore: Send + Sync {
    /// Drop the reference a container holds on a volume.
    async fn del_ref(&self, name: &str, container_id: &str) -> Result<()>;

    /// Remove a volume which no longer has references.
    async fn remove(&self, name: &str) -> Result<VolumeRemoveStatus>;
}
