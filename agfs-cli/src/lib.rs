//! Library half of the `agfs` binary: configuration, router assembly and
//! command execution.

pub mod commands;
pub mod config;

use agfs_mount::{MountRouter, RouterConfig};
use agfs_plugin_host::{PluginHost, PolicyEngine};
use agfs_types::FsError;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

pub use commands::{Command, execute};
pub use config::CliConfig;

/// Builds a router and mounts everything `config` lists, in file order.
pub async fn build_router(config: &CliConfig) -> Result<MountRouter> {
    let mut router = MountRouter::new(RouterConfig {
        unmount_grace: config.router.unmount_grace(),
    });

    if config.uses_plugins() {
        let policy = match &config.policy {
            Some(path) => PolicyEngine::load_from(path.clone()),
            None => PolicyEngine::load(),
        };
        let host = PluginHost::with_policy(policy).context("failed to start the plugin host")?;
        router = router.with_plugin_host(Arc::new(host));
    }

    for mount in &config.mounts {
        let spec = mount.provider_spec()?;
        let mount_config = mount.mount_config()?;
        router
            .mount(&mount.path, spec, mount_config)
            .await
            .with_context(|| format!("failed to mount {}", mount.path))?;
    }
    info!(mounts = config.mounts.len(), "Router ready");
    Ok(router)
}

/// Process exit code for a failed run: the error kind's code when the
/// failure is a filesystem error, 1 otherwise.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<FsError>()
        .map(|e| e.kind.exit_code())
        .unwrap_or(1)
}
