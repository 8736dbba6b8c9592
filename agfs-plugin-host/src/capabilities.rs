//! Capability model for plugin instances.
//!
//! A plugin declares the host services it needs at mount time. The granted
//! set is the declared set minus whatever policy denies, and it never changes
//! for the lifetime of the instance. The gate checks it on every host call.

use crate::error::PluginHostError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A host service a guest may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    /// Local filesystem passthrough (`env.host_fs`).
    #[serde(rename = "host.fs")]
    HostFs,
    /// Outbound HTTP (`env.host_http`).
    #[serde(rename = "host.http")]
    HostHttp,
}

impl Capability {
    pub const ALL: [Capability; 2] = [Self::HostFs, Self::HostHttp];

    pub fn name(&self) -> &'static str {
        match self {
            Self::HostFs => "host.fs",
            Self::HostHttp => "host.http",
        }
    }

    /// Name of the `env` import this capability gates.
    pub fn import_name(&self) -> &'static str {
        match self {
            Self::HostFs => agfs_types::abi::HOST_FS,
            Self::HostHttp => agfs_types::abi::HOST_HTTP,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Capability {
    type Err = PluginHostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host.fs" | "fs" => Ok(Self::HostFs),
            "host.http" | "http" => Ok(Self::HostHttp),
            other => Err(PluginHostError::Load(format!("unknown capability '{other}'"))),
        }
    }
}

/// Immutable set of capabilities held by one plugin instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// No host services at all.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Capability::ALL.into_iter().collect()
    }

    /// Parses capability names such as `host.fs` or `http`.
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self, PluginHostError> {
        names.iter().map(|n| n.as_ref().parse()).collect()
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Fails with `PermissionDenied` unless `capability` is held.
    pub fn check(&self, capability: Capability, plugin: &str) -> Result<(), PluginHostError> {
        if self.contains(capability) {
            Ok(())
        } else {
            Err(PluginHostError::PermissionDenied {
                plugin: plugin.to_string(),
                capability: capability.name().to_string(),
            })
        }
    }

    /// This set with every capability in `denied` removed.
    #[must_use]
    pub fn without(&self, denied: &BTreeSet<Capability>) -> Self {
        Self(self.0.difference(denied).copied().collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(|c| c.name()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
