//! The CLI mount configuration file.
//!
//! ```toml
//! policy = "policy.toml"
//!
//! [router]
//! unmount_grace_ms = 5000
//!
//! [[mount]]
//! path = "/mem"
//! provider = "memfs"
//!
//! [[mount]]
//! path = "/web"
//! plugin = "plugins/webfs.wasm"
//! capabilities = ["host.http"]
//! instances = 2
//!
//! [mount.config]
//! base_url = "https://example.com"
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use agfs_mount::ProviderSpec;
use agfs_plugin_host::{CapabilitySet, PluginSpec};
use agfs_types::MountConfig;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_UNMOUNT_GRACE_MS: u64 = 5000;

fn default_grace_ms() -> u64 {
    DEFAULT_UNMOUNT_GRACE_MS
}

fn default_instances() -> usize {
    1
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CliConfig {
    /// Plugin policy file. Defaults to `~/.agfs/policy.toml`.
    pub policy: Option<PathBuf>,
    #[serde(default)]
    pub router: RouterSection,
    #[serde(default, rename = "mount")]
    pub mounts: Vec<MountSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterSection {
    #[serde(default = "default_grace_ms")]
    pub unmount_grace_ms: u64,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            unmount_grace_ms: DEFAULT_UNMOUNT_GRACE_MS,
        }
    }
}

impl RouterSection {
    pub fn unmount_grace(&self) -> Duration {
        Duration::from_millis(self.unmount_grace_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountSection {
    pub path: String,
    /// Registered native provider kind.
    pub provider: Option<String>,
    /// Plugin module (`.wasm`, or `.wat` text).
    pub plugin: Option<PathBuf>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_instances")]
    pub instances: usize,
    pub host_fs_root: Option<PathBuf>,
    #[serde(default)]
    pub config: toml::Table,
}

impl MountSection {
    pub fn provider_spec(&self) -> Result<ProviderSpec> {
        match (&self.provider, &self.plugin) {
            (Some(kind), None) => Ok(ProviderSpec::native(kind.clone())),
            (None, Some(plugin)) => {
                let capabilities = CapabilitySet::parse(&self.capabilities)
                    .with_context(|| format!("mount {}: bad capabilities", self.path))?;
                let mut spec = PluginSpec::from_path(plugin)
                    .with_capabilities(capabilities)
                    .with_instances(self.instances);
                if let Some(root) = &self.host_fs_root {
                    spec = spec.with_host_fs_root(root);
                }
                Ok(ProviderSpec::Plugin(spec))
            }
            (Some(_), Some(_)) => bail!("mount {}: set either provider or plugin, not both", self.path),
            (None, None) => bail!("mount {}: needs a provider or a plugin", self.path),
        }
    }

    pub fn mount_config(&self) -> Result<MountConfig> {
        match serde_json::to_value(&self.config)
            .with_context(|| format!("mount {}: config table", self.path))?
        {
            serde_json::Value::Object(map) => Ok(MountConfig::from(map)),
            other => bail!("mount {}: config must be a table, got {other}", self.path),
        }
    }

    fn resolve_paths(&mut self, base: &Path) {
        if let Some(plugin) = &mut self.plugin {
            *plugin = resolve(base, plugin);
        }
        if let Some(root) = &mut self.host_fs_root {
            *root = resolve(base, root);
        }
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

impl CliConfig {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid configuration")
    }

    /// Reads `path` and resolves relative paths against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let mut config = Self::parse(&text).with_context(|| format!("in {}", path.display()))?;
        let base = path.parent().unwrap_or(Path::new("."));
        if let Some(policy) = &mut config.policy {
            *policy = resolve(base, policy);
        }
        for mount in &mut config.mounts {
            mount.resolve_paths(base);
        }
        Ok(config)
    }

    /// `~/.agfs/config.toml` if it exists, else an empty configuration.
    pub fn load_default() -> Result<Self> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn uses_plugins(&self) -> bool {
        self.mounts.iter().any(|m| m.plugin.is_some())
    }
}

fn default_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".agfs").join("config.toml"))
}
