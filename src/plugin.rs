//! Contract towards the plugin event bus.

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
/// PluginHooks carries the lifecycle events forwarded to registered plugins.
/// All events default to no-ops for builds without the plugin subsystem.
pub trait PluginHooks: Send + Sync {
    /// A container is about to be started.
    async fn container_pre_start(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    /// A container stopped or failed to start.
    async fn container_post_stop(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    /// A container was removed.
    async fn container_post_remove(&self, _id: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
/// Hooks used when the plugin subsystem is disabled.
pub struct NoopPlugins;

impl PluginHooks for NoopPlugins {}
