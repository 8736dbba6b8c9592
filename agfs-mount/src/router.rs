//! The mount router.
//!
//! The table is an immutable [`MountSnapshot`] behind an `ArcSwap`: every
//! dispatch loads the current snapshot without locking, and `mount`/`unmount`
//! build a new snapshot and swap it in under a mutation lock. Each entry
//! counts the operations routed to it so `unmount` can drain them before the
//! provider is torn down.

use crate::inflight::{InFlight, InFlightGuard};
use crate::path::{basename, child_toward, normalize, strip_mount};
use crate::provider::{ProviderHandle, ProviderKind, ProviderRegistry, ProviderSpec};
use agfs_plugin_host::PluginHost;
use agfs_types::{ErrorKind, FileInfo, FsError, FsResult, MountConfig, MountId, WriteFlag};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long `unmount` waits for in-flight operations by default.
pub const DEFAULT_UNMOUNT_GRACE: Duration = Duration::from_secs(5);

const VIRTUAL_DIR_MODE: u32 = 0o755;

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub unmount_grace: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            unmount_grace: DEFAULT_UNMOUNT_GRACE,
        }
    }
}

struct MountEntry {
    id: MountId,
    prefix: String,
    provider: ProviderHandle,
    mounted_at: DateTime<Utc>,
    inflight: Arc<InFlight>,
}

impl MountEntry {
    fn info(&self) -> MountInfo {
        MountInfo {
            id: self.id,
            prefix: self.prefix.clone(),
            provider: self.provider.name().to_string(),
            kind: self.provider.kind(),
            mounted_at: self.mounted_at,
        }
    }
}

/// One published version of the mount table. Entries are sorted by prefix.
#[derive(Default)]
struct MountSnapshot {
    version: u64,
    entries: Vec<Arc<MountEntry>>,
}

impl MountSnapshot {
    fn find_exact(&self, prefix: &str) -> Option<&Arc<MountEntry>> {
        self.entries
            .binary_search_by(|e| e.prefix.as_str().cmp(prefix))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Longest mounted prefix covering `path`, with the path relative to it.
    fn route(&self, path: &str) -> Option<(Arc<MountEntry>, String)> {
        self.entries
            .iter()
            .filter_map(|e| strip_mount(&e.prefix, path).map(|rel| (e, rel)))
            .max_by_key(|(e, _)| e.prefix.len())
            .map(|(e, rel)| (Arc::clone(e), rel))
    }

    fn with_entry(&self, entry: Arc<MountEntry>) -> Self {
        let mut entries = self.entries.clone();
        let at = entries.partition_point(|e| e.prefix < entry.prefix);
        entries.insert(at, entry);
        Self {
            version: self.version + 1,
            entries,
        }
    }

    fn without(&self, prefix: &str) -> Self {
        Self {
            version: self.version + 1,
            entries: self.entries.iter().filter(|e| e.prefix != prefix).cloned().collect(),
        }
    }

    /// Names of the next segment toward every mount strictly below `dir`.
    fn child_mounts(&self, dir: &str) -> BTreeSet<String> {
        self.entries
            .iter()
            .filter(|e| e.prefix != dir)
            .filter_map(|e| child_toward(dir, &e.prefix))
            .collect()
    }

    /// `/` and every strict ancestor of a mount prefix exist as directories.
    fn is_virtual_dir(&self, path: &str) -> bool {
        path == "/"
            || self
                .entries
                .iter()
                .any(|e| e.prefix != path && strip_mount(path, &e.prefix).is_some())
    }
}

/// A mount as reported by [`MountRouter::mounts`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MountInfo {
    pub id: MountId,
    pub prefix: String,
    pub provider: String,
    pub kind: ProviderKind,
    pub mounted_at: DateTime<Utc>,
}

/// A filesystem operation on an absolute path.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Stat { path: String },
    Read { path: String, offset: i64, size: i64 },
    ReadDir { path: String },
    Write { path: String, data: Vec<u8>, offset: i64, flags: WriteFlag },
    Create { path: String },
    Mkdir { path: String, mode: u32 },
    Remove { path: String, recursive: bool },
    Rename { from: String, to: String },
    Chmod { path: String, mode: u32 },
}

impl Operation {
    /// The path the operation is routed by. For a rename, the source.
    pub fn path(&self) -> &str {
        match self {
            Self::Stat { path }
            | Self::Read { path, .. }
            | Self::ReadDir { path }
            | Self::Write { path, .. }
            | Self::Create { path }
            | Self::Mkdir { path, .. }
            | Self::Remove { path, .. }
            | Self::Chmod { path, .. } => path,
            Self::Rename { from, .. } => from,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Stat { .. } => "stat",
            Self::Read { .. } => "read",
            Self::ReadDir { .. } => "readdir",
            Self::Write { .. } => "write",
            Self::Create { .. } => "create",
            Self::Mkdir { .. } => "mkdir",
            Self::Remove { .. } => "remove",
            Self::Rename { .. } => "rename",
            Self::Chmod { .. } => "chmod",
        }
    }
}

/// Result of a dispatched [`Operation`].
#[derive(Debug, Clone, PartialEq)]
pub enum OpOutput {
    Info(FileInfo),
    Data(Vec<u8>),
    Entries(Vec<FileInfo>),
    Written(u64),
    Done,
}

impl OpOutput {
    pub fn into_info(self) -> FsResult<FileInfo> {
        match self {
            Self::Info(info) => Ok(info),
            other => Err(mismatch("file info", &other)),
        }
    }

    pub fn into_data(self) -> FsResult<Vec<u8>> {
        match self {
            Self::Data(data) => Ok(data),
            other => Err(mismatch("data", &other)),
        }
    }

    pub fn into_entries(self) -> FsResult<Vec<FileInfo>> {
        match self {
            Self::Entries(entries) => Ok(entries),
            other => Err(mismatch("directory entries", &other)),
        }
    }

    pub fn into_written(self) -> FsResult<u64> {
        match self {
            Self::Written(n) => Ok(n),
            other => Err(mismatch("byte count", &other)),
        }
    }
}

fn mismatch(expected: &str, got: &OpOutput) -> FsError {
    FsError::internal(format!("expected {expected}, got {got:?}"))
}

fn virtual_dir(path: &str) -> FileInfo {
    FileInfo::dir(basename(path), VIRTUAL_DIR_MODE)
}

/// An operation's hold on a mount entry. Keeps the entry counted as in
/// flight until dropped.
struct Routed {
    entry: Arc<MountEntry>,
    relative: String,
    _guard: InFlightGuard,
}

pub struct MountRouter {
    snapshot: ArcSwap<MountSnapshot>,
    mutation: tokio::sync::Mutex<()>,
    registry: ProviderRegistry,
    plugins: Option<Arc<PluginHost>>,
    config: RouterConfig,
}

impl fmt::Debug for MountRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot.load();
        let prefixes: Vec<&str> = snapshot.entries.iter().map(|e| e.prefix.as_str()).collect();
        f.debug_struct("MountRouter")
            .field("version", &snapshot.version)
            .field("mounts", &prefixes)
            .field("plugins", &self.plugins.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl MountRouter {
    /// A router with the built-in native providers and no plugin host.
    pub fn new(config: RouterConfig) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(MountSnapshot::default()),
            mutation: tokio::sync::Mutex::new(()),
            registry: ProviderRegistry::with_builtins(),
            plugins: None,
            config,
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Enables [`ProviderSpec::Plugin`] mounts.
    #[must_use]
    pub fn with_plugin_host(mut self, host: Arc<PluginHost>) -> Self {
        self.plugins = Some(host);
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Version of the published table. Bumped by every mount and unmount.
    pub fn version(&self) -> u64 {
        self.snapshot.load().version
    }

    /// Current mounts in prefix order.
    pub fn mounts(&self) -> Vec<MountInfo> {
        self.snapshot.load().entries.iter().map(|e| e.info()).collect()
    }

    /// Builds and initializes a provider, then publishes it at `prefix`.
    pub async fn mount(&self, prefix: &str, spec: ProviderSpec, config: MountConfig) -> FsResult<MountId> {
        let prefix = normalize(prefix)?;
        let _lock = self.mutation.lock().await;

        if self.snapshot.load().find_exact(&prefix).is_some() {
            return Err(FsError::already_exists(format!("{prefix}: already mounted")));
        }

        let provider = self.build_provider(&prefix, spec, &config).await?;
        if let Err(e) = provider.reader().init(&config).await {
            warn!(prefix = %prefix, provider = provider.name(), error = %e, "Provider init failed, mount aborted");
            if let Err(e) = provider.reader().shutdown().await {
                debug!(prefix = %prefix, error = %e, "Shutdown after failed init");
            }
            return Err(e);
        }

        let entry = Arc::new(MountEntry {
            id: MountId::new(),
            prefix: prefix.clone(),
            provider,
            mounted_at: Utc::now(),
            inflight: Arc::new(InFlight::new()),
        });
        let id = entry.id;
        let kind = entry.provider.kind();
        let name = entry.provider.name().to_string();

        let next = self.snapshot.load().with_entry(entry);
        let version = next.version;
        self.snapshot.store(Arc::new(next));

        info!(prefix = %prefix, mount_id = %id, provider = %name, kind = %kind, version, "Mounted");
        Ok(id)
    }

    async fn build_provider(
        &self,
        prefix: &str,
        spec: ProviderSpec,
        config: &MountConfig,
    ) -> FsResult<ProviderHandle> {
        match spec {
            ProviderSpec::Instance(handle) => Ok(handle),
            ProviderSpec::Native { kind } => self.registry.build(&kind, prefix, config),
            ProviderSpec::Plugin(spec) => {
                let host = self
                    .plugins
                    .clone()
                    .ok_or_else(|| FsError::unsupported("plugin mounts need a plugin host"))?;
                let loaded = tokio::task::spawn_blocking(move || host.load(&spec))
                    .await
                    .map_err(|e| FsError::internal(format!("plugin load task failed: {e}")))?;
                match loaded {
                    Ok(fs) => Ok(ProviderHandle::sandboxed(fs)),
                    Err(e) => {
                        warn!(prefix = %prefix, error = %e, "Plugin load failed");
                        Err(e.into())
                    }
                }
            }
        }
    }

    /// Unpublishes `prefix`, drains in-flight operations for up to the grace
    /// period, then shuts the provider down.
    pub async fn unmount(&self, prefix: &str) -> FsResult<()> {
        let prefix = normalize(prefix)?;
        let entry = {
            let _lock = self.mutation.lock().await;
            let current = self.snapshot.load();
            let entry = current
                .find_exact(&prefix)
                .cloned()
                .ok_or_else(|| FsError::not_found(format!("{prefix}: not mounted")))?;
            let next = current.without(&prefix);
            let version = next.version;
            self.snapshot.store(Arc::new(next));
            debug!(prefix = %prefix, version, "Mount unpublished");
            entry
        };

        entry.inflight.retire();
        if let Some(plugin) = entry.provider.as_sandboxed() {
            plugin.begin_drain();
        }

        let outstanding = entry.inflight.count();
        if outstanding > 0 {
            debug!(prefix = %prefix, outstanding, "Waiting for in-flight operations");
            let grace = self.config.unmount_grace;
            if tokio::time::timeout(grace, entry.inflight.drained()).await.is_err() {
                warn!(
                    prefix = %prefix,
                    abandoned = entry.inflight.count(),
                    grace_ms = grace.as_millis() as u64,
                    "Unmount grace period elapsed, abandoning in-flight operations"
                );
            }
        }

        if let Err(e) = entry.provider.reader().shutdown().await {
            warn!(prefix = %prefix, error = %e, "Provider shutdown failed");
        }
        info!(prefix = %prefix, mount_id = %entry.id, "Unmounted");
        Ok(())
    }

    /// Unmounts everything, deepest prefixes first.
    pub async fn shutdown(&self) {
        let mut prefixes: Vec<String> = self
            .snapshot
            .load()
            .entries
            .iter()
            .map(|e| e.prefix.clone())
            .collect();
        prefixes.sort_by_key(|p| std::cmp::Reverse(p.len()));
        for prefix in prefixes {
            if let Err(e) = self.unmount(&prefix).await
                && e.kind != ErrorKind::NotFound
            {
                warn!(prefix = %prefix, error = %e, "Unmount during shutdown failed");
            }
        }
    }

    /// The provider mounted at the longest prefix of `path`, and `path`
    /// relative to that mount.
    pub fn resolve(&self, path: &str) -> FsResult<(ProviderHandle, String)> {
        let path = normalize(path)?;
        self.snapshot
            .load()
            .route(&path)
            .map(|(entry, rel)| (entry.provider.clone(), rel))
            .ok_or_else(|| FsError::not_found(format!("{path}: no mount")))
    }

    /// Routes `path` and registers the operation as in flight. An entry
    /// retired after the snapshot was loaded is skipped; its unmount has
    /// already published a newer snapshot.
    fn route(&self, path: &str) -> FsResult<Routed> {
        loop {
            let snapshot = self.snapshot.load();
            let (entry, relative) = snapshot
                .route(path)
                .ok_or_else(|| FsError::not_found(format!("{path}: no mount")))?;
            if let Some(guard) = entry.inflight.enter() {
                return Ok(Routed {
                    entry,
                    relative,
                    _guard: guard,
                });
            }
        }
    }

    fn is_virtual_dir(&self, path: &str) -> bool {
        self.snapshot.load().is_virtual_dir(path)
    }

    pub async fn dispatch(&self, op: Operation) -> FsResult<OpOutput> {
        let name = op.name();
        let result = match op {
            Operation::Stat { path } => self.stat_at(&path).await.map(OpOutput::Info),
            Operation::ReadDir { path } => self.readdir_at(&path).await.map(OpOutput::Entries),
            Operation::Rename { from, to } => self.rename_at(&from, &to).await.map(|()| OpOutput::Done),
            op => self.dispatch_routed(op).await,
        };
        if let Err(e) = &result {
            debug!(op = name, error = %e, "Operation failed");
        }
        result
    }

    async fn dispatch_routed(&self, op: Operation) -> FsResult<OpOutput> {
        let name = op.name();
        let path = normalize(op.path())?;
        let routed = self.route(&path)?;
        let provider = &routed.entry.provider;
        let rel = routed.relative.as_str();

        match op {
            Operation::Read { offset, size, .. } => provider.reader().read(rel, offset, size).await.map(OpOutput::Data),
            Operation::Write {
                data, offset, flags, ..
            } => provider
                .writer()?
                .write(rel, &data, offset, flags)
                .await
                .map(OpOutput::Written),
            Operation::Create { .. } => provider.writer()?.create(rel).await.map(|()| OpOutput::Done),
            Operation::Mkdir { mode, .. } => provider.writer()?.mkdir(rel, mode).await.map(|()| OpOutput::Done),
            Operation::Remove { recursive, .. } => {
                if rel == "/" {
                    return Err(FsError::invalid_argument(format!(
                        "{path}: is a mount point, unmount it instead"
                    )));
                }
                provider.writer()?.remove(rel, recursive).await.map(|()| OpOutput::Done)
            }
            Operation::Chmod { mode, .. } => provider.writer()?.chmod(rel, mode).await.map(|()| OpOutput::Done),
            Operation::Stat { .. } | Operation::ReadDir { .. } | Operation::Rename { .. } => {
                Err(FsError::internal(format!("{name} is not a routed operation")))
            }
        }
    }

    async fn stat_at(&self, path: &str) -> FsResult<FileInfo> {
        let path = normalize(path)?;
        let routed = match self.route(&path) {
            Ok(routed) => routed,
            Err(_) if self.is_virtual_dir(&path) => return Ok(virtual_dir(&path)),
            Err(e) => return Err(e),
        };
        match routed.entry.provider.reader().stat(&routed.relative).await {
            Ok(mut info) => {
                if routed.relative == "/" {
                    info.name = basename(&path).to_string();
                }
                Ok(info)
            }
            Err(e) if e.kind == ErrorKind::NotFound && self.is_virtual_dir(&path) => Ok(virtual_dir(&path)),
            Err(e) => Err(e),
        }
    }

    async fn readdir_at(&self, path: &str) -> FsResult<Vec<FileInfo>> {
        let path = normalize(path)?;
        let mut entries = match self.route(&path) {
            Ok(routed) => match routed.entry.provider.reader().readdir(&routed.relative).await {
                Ok(entries) => entries,
                Err(e) if e.kind == ErrorKind::NotFound && self.is_virtual_dir(&path) => Vec::new(),
                Err(e) => return Err(e),
            },
            Err(_) if self.is_virtual_dir(&path) => Vec::new(),
            Err(e) => return Err(e),
        };

        let children = self.snapshot.load().child_mounts(&path);
        entries.retain(|e| !children.contains(&e.name));
        entries.extend(children.into_iter().map(|name| FileInfo::dir(name, VIRTUAL_DIR_MODE)));
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn rename_at(&self, from: &str, to: &str) -> FsResult<()> {
        let from = normalize(from)?;
        let to = normalize(to)?;
        let source = self.route(&from)?;
        let target = self.route(&to)?;
        if !Arc::ptr_eq(&source.entry, &target.entry) {
            return Err(FsError::unsupported(format!(
                "rename across mounts: {} -> {}",
                source.entry.prefix, target.entry.prefix
            )));
        }
        if source.relative == "/" || target.relative == "/" {
            return Err(FsError::invalid_argument(format!("{from}: cannot rename a mount point")));
        }
        source
            .entry
            .provider
            .writer()?
            .rename(&source.relative, &target.relative)
            .await
    }

    pub async fn stat(&self, path: &str) -> FsResult<FileInfo> {
        self.dispatch(Operation::Stat { path: path.to_string() })
            .await?
            .into_info()
    }

    pub async fn read(&self, path: &str, offset: i64, size: i64) -> FsResult<Vec<u8>> {
        self.dispatch(Operation::Read {
            path: path.to_string(),
            offset,
            size,
        })
        .await?
        .into_data()
    }

    pub async fn readdir(&self, path: &str) -> FsResult<Vec<FileInfo>> {
        self.dispatch(Operation::ReadDir { path: path.to_string() })
            .await?
            .into_entries()
    }

    /// Creates or replaces the file with `data`.
    pub async fn write(&self, path: &str, data: &[u8]) -> FsResult<u64> {
        self.write_at(path, data, -1, WriteFlag::CREATE | WriteFlag::TRUNCATE)
            .await
    }

    pub async fn write_at(&self, path: &str, data: &[u8], offset: i64, flags: WriteFlag) -> FsResult<u64> {
        self.dispatch(Operation::Write {
            path: path.to_string(),
            data: data.to_vec(),
            offset,
            flags,
        })
        .await?
        .into_written()
    }

    pub async fn create(&self, path: &str) -> FsResult<()> {
        self.dispatch(Operation::Create { path: path.to_string() })
            .await
            .map(drop)
    }

    pub async fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        self.dispatch(Operation::Mkdir {
            path: path.to_string(),
            mode,
        })
        .await
        .map(drop)
    }

    pub async fn remove(&self, path: &str, recursive: bool) -> FsResult<()> {
        self.dispatch(Operation::Remove {
            path: path.to_string(),
            recursive,
        })
        .await
        .map(drop)
    }

    pub async fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        self.dispatch(Operation::Rename {
            from: from.to_string(),
            to: to.to_string(),
        })
        .await
        .map(drop)
    }

    pub async fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        self.dispatch(Operation::Chmod {
            path: path.to_string(),
            mode,
        })
        .await
        .map(drop)
    }
}

impl Default for MountRouter {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memfs::MemFs;

    fn entry(prefix: &str) -> Arc<MountEntry> {
        Arc::new(MountEntry {
            id: MountId::new(),
            prefix: prefix.to_string(),
            provider: ProviderHandle::read_write(MemFs::new()),
            mounted_at: Utc::now(),
            inflight: Arc::new(InFlight::new()),
        })
    }

    fn snapshot(prefixes: &[&str]) -> MountSnapshot {
        prefixes
            .iter()
            .fold(MountSnapshot::default(), |s, p| s.with_entry(entry(p)))
    }

    #[test]
    fn entries_stay_sorted() {
        let s = snapshot(&["/z", "/a/b", "/a", "/m"]);
        let prefixes: Vec<&str> = s.entries.iter().map(|e| e.prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["/a", "/a/b", "/m", "/z"]);
        assert_eq!(s.version, 4);
        assert!(s.find_exact("/a/b").is_some());
        assert!(s.find_exact("/a/c").is_none());
    }

    #[test]
    fn route_takes_longest_prefix() {
        let s = snapshot(&["/", "/a", "/a/b"]);
        let (e, rel) = s.route("/a/b/c").unwrap();
        assert_eq!((e.prefix.as_str(), rel.as_str()), ("/a/b", "/c"));
        let (e, rel) = s.route("/a/bc").unwrap();
        assert_eq!((e.prefix.as_str(), rel.as_str()), ("/a", "/bc"));
        let (e, rel) = s.route("/q").unwrap();
        assert_eq!((e.prefix.as_str(), rel.as_str()), ("/", "/q"));
    }

    #[test]
    fn without_drops_one_entry() {
        let s = snapshot(&["/a", "/b"]);
        let next = s.without("/a");
        assert_eq!(next.entries.len(), 1);
        assert_eq!(next.version, s.version + 1);
        assert!(next.route("/a/x").is_none());
    }

    #[test]
    fn virtual_directories() {
        let s = snapshot(&["/data/mem", "/data/queue/q1"]);
        assert!(s.is_virtual_dir("/"));
        assert!(s.is_virtual_dir("/data"));
        assert!(s.is_virtual_dir("/data/queue"));
        assert!(!s.is_virtual_dir("/data/mem"));
        assert!(!s.is_virtual_dir("/dat"));
        assert_eq!(
            s.child_mounts("/data").into_iter().collect::<Vec<_>>(),
            vec!["mem".to_string(), "queue".to_string()]
        );
        assert_eq!(s.child_mounts("/").into_iter().collect::<Vec<_>>(), vec!["data".to_string()]);
    }

    #[test]
    fn op_output_accessors() {
        assert_eq!(OpOutput::Written(3).into_written().unwrap(), 3);
        assert_eq!(OpOutput::Done.into_data().unwrap_err().kind, ErrorKind::Internal);
    }
}
