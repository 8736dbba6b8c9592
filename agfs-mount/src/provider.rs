//! Provider variants and the native provider registry.

use crate::memfs::MemFs;
use agfs_plugin_host::{PluginSpec, WasmFileSystem};
use agfs_types::{FileSystem, FsError, FsResult, MountConfig, ReadOnlyFileSystem};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A mounted provider. Native and sandboxed providers are siblings behind
/// the same capability traits.
#[derive(Clone)]
pub enum ProviderHandle {
    ReadOnly(Arc<dyn ReadOnlyFileSystem>),
    ReadWrite(Arc<dyn FileSystem>),
    Sandboxed(Arc<WasmFileSystem>),
}

impl ProviderHandle {
    pub fn read_only(provider: impl ReadOnlyFileSystem + 'static) -> Self {
        Self::ReadOnly(Arc::new(provider))
    }

    pub fn read_write(provider: impl FileSystem + 'static) -> Self {
        Self::ReadWrite(Arc::new(provider))
    }

    pub fn sandboxed(provider: WasmFileSystem) -> Self {
        Self::Sandboxed(Arc::new(provider))
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::ReadOnly(_) => ProviderKind::ReadOnly,
            Self::ReadWrite(_) => ProviderKind::ReadWrite,
            Self::Sandboxed(_) => ProviderKind::Sandboxed,
        }
    }

    pub fn name(&self) -> &str {
        self.reader().name()
    }

    pub fn reader(&self) -> &dyn ReadOnlyFileSystem {
        match self {
            Self::ReadOnly(p) => p.as_ref(),
            Self::ReadWrite(p) => p.as_ref(),
            Self::Sandboxed(p) => p.as_ref(),
        }
    }

    /// The write side, or `Unsupported` for read-only providers.
    pub fn writer(&self) -> FsResult<&dyn FileSystem> {
        match self {
            Self::ReadOnly(p) => Err(FsError::unsupported(format!("{} is read-only", p.name()))),
            Self::ReadWrite(p) => Ok(p.as_ref()),
            Self::Sandboxed(p) => Ok(p.as_ref()),
        }
    }

    pub fn as_sandboxed(&self) -> Option<&WasmFileSystem> {
        match self {
            Self::Sandboxed(p) => Some(p),
            _ => None,
        }
    }

    /// True when both handles point at the same provider object.
    pub fn same_provider(&self, other: &ProviderHandle) -> bool {
        std::ptr::addr_eq(self.data_ptr(), other.data_ptr())
    }

    fn data_ptr(&self) -> *const () {
        match self {
            Self::ReadOnly(p) => Arc::as_ptr(p) as *const (),
            Self::ReadWrite(p) => Arc::as_ptr(p) as *const (),
            Self::Sandboxed(p) => Arc::as_ptr(p) as *const (),
        }
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    ReadOnly,
    ReadWrite,
    Sandboxed,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ReadOnly => "read-only",
            Self::ReadWrite => "read-write",
            Self::Sandboxed => "sandboxed",
        })
    }
}

/// What to mount.
#[derive(Debug, Clone)]
pub enum ProviderSpec {
    /// A registered native provider, built with the mount config.
    Native { kind: String },
    /// An already constructed provider.
    Instance(ProviderHandle),
    /// A sandboxed plugin, loaded by the router's plugin host.
    Plugin(PluginSpec),
}

impl ProviderSpec {
    pub fn native(kind: impl Into<String>) -> Self {
        Self::Native { kind: kind.into() }
    }
}

/// Builds a native provider for `(prefix, config)`.
pub type ProviderFactory = Arc<dyn Fn(&str, &MountConfig) -> FsResult<ProviderHandle> + Send + Sync>;

/// Named native provider constructors.
#[derive(Clone)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// A registry with no providers.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry with the built-in providers (`memfs`).
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(MemFs::KIND, |_, _| Ok(ProviderHandle::read_write(MemFs::new())));
        registry
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&str, &MountConfig) -> FsResult<ProviderHandle> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn build(&self, kind: &str, prefix: &str, config: &MountConfig) -> FsResult<ProviderHandle> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| FsError::invalid_argument(format!("unknown provider kind '{kind}'")))?;
        factory(prefix, config)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}
