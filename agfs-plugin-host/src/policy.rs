//! Host policy: reads `~/.agfs/policy.toml` and enforces the operator's
//! plugin allowlist, capability denials and resource limits.

use crate::capabilities::{Capability, CapabilitySet};
use crate::http::HttpTimeouts;
use crate::sandbox::ResourceLimits;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Which plugins may be mounted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Only listed plugins may be mounted.
    Allowlist,
    /// Every plugin except the listed ones may be mounted.
    Denylist,
    #[default]
    Unrestricted,
}

/// Limits applied to every plugin instance unless the mount overrides them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyLimits {
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: usize,
    #[serde(default = "default_fuel_per_call")]
    pub fuel_per_call: u64,
    #[serde(default = "default_http_timeout")]
    pub http_default_timeout_secs: u64,
    #[serde(default = "default_http_max_timeout")]
    pub http_max_timeout_secs: u64,
}

fn default_max_memory_mb() -> usize {
    64
}

fn default_fuel_per_call() -> u64 {
    1_000_000_000
}

fn default_http_timeout() -> u64 {
    30
}

fn default_http_max_timeout() -> u64 {
    120
}

impl Default for PolicyLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: default_max_memory_mb(),
            fuel_per_call: default_fuel_per_call(),
            http_default_timeout_secs: default_http_timeout(),
            http_max_timeout_secs: default_http_max_timeout(),
        }
    }
}

/// Policy configuration parsed from `policy.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub mode: PolicyMode,
    /// Plugin names the mode applies to.
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub denied_capabilities: BTreeSet<Capability>,
    #[serde(default)]
    pub limits: PolicyLimits,
}

/// Enforces policy decisions for the plugin host.
pub struct PolicyEngine {
    config: PolicyConfig,
    policy_path: Option<PathBuf>,
}

impl PolicyEngine {
    /// Loads policy from `~/.agfs/policy.toml` if it exists.
    /// Falls back to unrestricted mode with a warning on parse errors.
    pub fn load() -> Self {
        Self::load_from(dirs_path().join("policy.toml"))
    }

    /// Loads policy from an explicit path.
    pub fn load_from(policy_path: PathBuf) -> Self {
        if !policy_path.exists() {
            info!(path = %policy_path.display(), "No policy file found, running unrestricted");
            return Self::unrestricted();
        }

        let config = match std::fs::read_to_string(&policy_path) {
            Ok(contents) => match toml::from_str::<PolicyFile>(&contents) {
                Ok(file) => {
                    info!(path = %policy_path.display(), "Loaded plugin policy");
                    file.into_config()
                }
                Err(e) => {
                    warn!(
                        path = %policy_path.display(),
                        error = %e,
                        "Failed to parse policy file, falling back to unrestricted mode"
                    );
                    PolicyConfig::default()
                }
            },
            Err(e) => {
                warn!(path = %policy_path.display(), error = %e, "Failed to read policy file");
                PolicyConfig::default()
            }
        };

        Self {
            config,
            policy_path: Some(policy_path),
        }
    }

    pub fn unrestricted() -> Self {
        Self::with_config(PolicyConfig::default())
    }

    pub fn with_config(config: PolicyConfig) -> Self {
        Self {
            config,
            policy_path: None,
        }
    }

    /// Check if a plugin with this name may be mounted.
    pub fn is_plugin_allowed(&self, plugin: &str) -> bool {
        let listed = self.config.plugins.iter().any(|p| p == plugin);
        match self.config.mode {
            PolicyMode::Unrestricted => true,
            PolicyMode::Allowlist => listed,
            PolicyMode::Denylist => !listed,
        }
    }

    pub fn is_capability_denied(&self, capability: Capability) -> bool {
        self.config.denied_capabilities.contains(&capability)
    }

    /// The capabilities a plugin actually receives: its request minus what
    /// policy denies.
    pub fn grant(&self, plugin: &str, requested: &CapabilitySet) -> CapabilitySet {
        for cap in requested.iter().filter(|c| self.is_capability_denied(*c)) {
            warn!(plugin = %plugin, capability = %cap, "Capability withheld by policy");
        }
        requested.without(&self.config.denied_capabilities)
    }

    pub fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            max_memory_bytes: self.config.limits.max_memory_mb * 1024 * 1024,
            fuel_per_call: self.config.limits.fuel_per_call,
        }
    }

    pub fn http_timeouts(&self) -> HttpTimeouts {
        HttpTimeouts::new(
            self.config.limits.http_default_timeout_secs,
            self.config.limits.http_max_timeout_secs,
        )
    }

    /// Returns whether a policy file was found.
    pub fn has_policy_file(&self) -> bool {
        self.policy_path.is_some()
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }
}

/// Raw TOML structure matching the policy.toml format.
#[derive(Deserialize)]
struct PolicyFile {
    #[serde(default)]
    policy: PolicySection,
}

#[derive(Deserialize, Default)]
struct PolicySection {
    #[serde(default)]
    mode: PolicyMode,
    #[serde(default)]
    plugins: PluginList,
    #[serde(default, rename = "denied-capabilities")]
    denied_capabilities: DeniedCapabilities,
    #[serde(default)]
    limits: PolicyLimits,
}

#[derive(Deserialize, Default)]
struct PluginList {
    #[serde(default)]
    names: Vec<String>,
}

#[derive(Deserialize, Default)]
struct DeniedCapabilities {
    #[serde(default)]
    fs: bool,
    #[serde(default)]
    http: bool,
}

impl PolicyFile {
    fn into_config(self) -> PolicyConfig {
        let mut denied = BTreeSet::new();
        if self.policy.denied_capabilities.fs {
            denied.insert(Capability::HostFs);
        }
        if self.policy.denied_capabilities.http {
            denied.insert(Capability::HostHttp);
        }

        PolicyConfig {
            mode: self.policy.mode,
            plugins: self.policy.plugins.names,
            denied_capabilities: denied,
            limits: self.policy.limits,
        }
    }
}

/// Resolve the AGFS config directory.
fn dirs_path() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        Path::new(&home).join(".agfs")
    } else if let Ok(home) = std::env::var("USERPROFILE") {
        Path::new(&home).join(".agfs")
    } else {
        PathBuf::from(".agfs")
    }
}
