//! Sandboxed provider: adapts a pool of guest instances to the Capability
//! Interface.
//!
//! Every method marshals a [`FsRequest`] into the matching guest export.
//! Calls run on the blocking pool, so the async caller can be dropped without
//! interrupting a guest mid-call; the call finishes and its result is
//! discarded. An instance serves one call at a time.

use crate::capabilities::CapabilitySet;
use crate::error::PluginHostError;
use crate::sandbox::{CALL_EXPORTS, InstanceMetrics, InstanceState, PluginInstance};
use agfs_types::{
    FileInfo, FileSystem, FsError, FsRequest, FsResult, MountConfig, Payload, ReadOnlyFileSystem,
    Reply, WriteFlag, abi,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use tracing::{debug, info, warn};

struct Slot {
    /// Lifecycle as seen from outside the instance lock. Only moves forward
    /// (Ready, Draining, Unloaded), so it can be raised while a call is
    /// running and the call picks it up when it returns.
    state: AtomicU8,
    instance: Mutex<PluginInstance>,
}

impl Slot {
    fn state(&self) -> InstanceState {
        InstanceState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Raises the published state without touching the instance.
    fn mark(&self, state: InstanceState) {
        self.state.fetch_max(state.as_u8(), Ordering::AcqRel);
    }

    /// Reconciles the published state and the instance's own, keeping
    /// whichever is further along.
    fn sync(&self, instance: &mut PluginInstance) {
        let own = instance.state().as_u8();
        let merged = self.state.fetch_max(own, Ordering::AcqRel).max(own);
        instance.set_state(InstanceState::from_u8(merged));
    }
}

struct Pool {
    name: String,
    readme: String,
    capabilities: CapabilitySet,
    exports: HashSet<&'static str>,
    slots: Vec<Slot>,
    next: AtomicUsize,
}

impl Pool {
    /// Runs `f` on an idle serving instance, or waits for a busy one.
    fn with_instance<R>(
        &self,
        f: impl FnOnce(&mut PluginInstance) -> Result<R, PluginHostError>,
    ) -> Result<R, PluginHostError> {
        let n = self.slots.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % n;

        for i in 0..n {
            let slot = &self.slots[(start + i) % n];
            if !slot.state().is_serving() {
                continue;
            }
            if let Some(mut guard) = slot.instance.try_lock() {
                return Self::run(slot, &mut guard, f);
            }
        }

        // Everything serving is busy: queue on the first one that still serves.
        for i in 0..n {
            let slot = &self.slots[(start + i) % n];
            if slot.state().is_serving() {
                let mut guard = slot.instance.lock();
                slot.sync(&mut guard);
                if guard.state().is_serving() {
                    return Self::run(slot, &mut guard, f);
                }
            }
        }

        Err(PluginHostError::Unavailable {
            plugin: self.name.clone(),
        })
    }

    fn run<R>(
        slot: &Slot,
        instance: &mut PluginInstance,
        f: impl FnOnce(&mut PluginInstance) -> Result<R, PluginHostError>,
    ) -> Result<R, PluginHostError> {
        slot.sync(instance);
        let result = f(instance);
        slot.sync(instance);
        result
    }

    fn invoke<Resp: DeserializeOwned>(&self, export: &str, request: &FsRequest) -> FsResult<Resp> {
        if !self.exports.contains(export) {
            return Err(FsError::unsupported(format!("{}: {export} not implemented", self.name)));
        }
        let reply = self.with_instance(|inst| inst.call::<_, Resp>(export, request))?;
        reply.into_result()
    }

    /// Runs `export` on every serving instance, stopping at the first error.
    fn broadcast(&self, export: &str, request: &FsRequest) -> FsResult<()> {
        if !self.exports.contains(export) {
            return Ok(());
        }
        for slot in &self.slots {
            let mut guard = slot.instance.lock();
            slot.sync(&mut guard);
            if !guard.state().is_serving() {
                continue;
            }
            let reply = guard.call::<_, ()>(export, request);
            slot.sync(&mut guard);
            reply.map_err(FsError::from)?.into_result()?;
        }
        Ok(())
    }

    /// Runs the shutdown export on every idle serving instance and unloads
    /// all of them. Busy instances are marked and skipped: the running call
    /// finishes, its result is discarded by the caller, and the instance
    /// never serves again.
    fn shutdown(&self, request: &FsRequest) -> FsResult<()> {
        let mut first_error = None;
        for slot in &self.slots {
            let Some(mut guard) = slot.instance.try_lock() else {
                debug!(plugin = %self.name, "Instance busy at shutdown, abandoning it");
                slot.mark(InstanceState::Unloaded);
                continue;
            };
            slot.sync(&mut guard);
            if guard.state().is_serving() && self.exports.contains(abi::SHUTDOWN) {
                let reply = guard.call::<_, ()>(abi::SHUTDOWN, request);
                if let Err(e) = reply.map_err(FsError::from).and_then(Reply::into_result) {
                    first_error.get_or_insert(e);
                }
            }
            guard.set_state(InstanceState::Unloaded);
            slot.sync(&mut guard);
        }
        first_error.map_or(Ok(()), Err)
    }

    fn mark_all(&self, state: InstanceState) {
        for slot in &self.slots {
            slot.mark(state);
        }
    }
}

/// A mounted plugin.
#[derive(Clone)]
pub struct WasmFileSystem {
    inner: Arc<Pool>,
}

impl WasmFileSystem {
    pub(crate) fn new(
        name: String,
        readme: String,
        capabilities: CapabilitySet,
        instances: Vec<PluginInstance>,
    ) -> Self {
        let exports = CALL_EXPORTS
            .into_iter()
            .filter(|e| instances.first().is_some_and(|i| i.has_export(e)))
            .collect();
        let slots = instances
            .into_iter()
            .map(|instance| Slot {
                state: AtomicU8::new(instance.state().as_u8()),
                instance: Mutex::new(instance),
            })
            .collect();
        Self {
            inner: Arc::new(Pool {
                name,
                readme,
                capabilities,
                exports,
                slots,
                next: AtomicUsize::new(0),
            }),
        }
    }

    /// Capabilities granted to every instance of this plugin.
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.inner.capabilities
    }

    pub fn instance_count(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn instance_states(&self) -> Vec<InstanceState> {
        self.inner.slots.iter().map(Slot::state).collect()
    }

    /// Snapshot of per-instance metrics. Waits for busy instances.
    pub fn metrics(&self) -> Vec<InstanceMetrics> {
        self.inner.slots.iter().map(|s| s.instance.lock().metrics()).collect()
    }

    /// Marks every instance as draining. They keep serving calls that were
    /// already routed here.
    pub fn begin_drain(&self) {
        debug!(plugin = %self.inner.name, "Draining plugin instances");
        self.inner.mark_all(InstanceState::Draining);
    }

    async fn call<Resp>(&self, export: &'static str, request: FsRequest) -> FsResult<Resp>
    where
        Resp: DeserializeOwned + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.invoke::<Resp>(export, &request))
            .await
            .map_err(|e| FsError::internal(format!("guest call task failed: {e}")))?
    }

    async fn broadcast(&self, export: &'static str, request: FsRequest) -> FsResult<()> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.broadcast(export, &request))
            .await
            .map_err(|e| FsError::internal(format!("guest call task failed: {e}")))?
    }
}

#[async_trait]
impl ReadOnlyFileSystem for WasmFileSystem {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn readme(&self) -> String {
        self.inner.readme.clone()
    }

    async fn init(&self, config: &MountConfig) -> FsResult<()> {
        self.broadcast(abi::INIT, FsRequest::init(config)).await?;
        info!(plugin = %self.inner.name, instances = self.inner.slots.len(), "Plugin initialised");
        Ok(())
    }

    async fn read(&self, path: &str, offset: i64, size: i64) -> FsResult<Vec<u8>> {
        let payload: Payload = self.call(abi::FS_READ, FsRequest::read(path, offset, size)).await?;
        Ok(payload.into_inner())
    }

    async fn stat(&self, path: &str) -> FsResult<FileInfo> {
        self.call(abi::FS_STAT, FsRequest::at(path)).await
    }

    async fn readdir(&self, path: &str) -> FsResult<Vec<FileInfo>> {
        self.call(abi::FS_READDIR, FsRequest::at(path)).await
    }

    async fn shutdown(&self) -> FsResult<()> {
        let inner = Arc::clone(&self.inner);
        let result = tokio::task::spawn_blocking(move || inner.shutdown(&FsRequest::default()))
            .await
            .map_err(|e| FsError::internal(format!("guest shutdown task failed: {e}")))
            .and_then(|r| r);
        if let Err(e) = &result {
            warn!(plugin = %self.inner.name, error = %e, "Plugin shutdown reported an error");
        }
        self.inner.mark_all(InstanceState::Unloaded);
        info!(plugin = %self.inner.name, "Plugin unloaded");
        result
    }
}

#[async_trait]
impl FileSystem for WasmFileSystem {
    async fn write(&self, path: &str, data: &[u8], offset: i64, flags: WriteFlag) -> FsResult<u64> {
        self.call(abi::FS_WRITE, FsRequest::write(path, data, offset, flags)).await
    }

    async fn create(&self, path: &str) -> FsResult<()> {
        self.call(abi::FS_CREATE, FsRequest::at(path)).await
    }

    async fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        self.call(abi::FS_MKDIR, FsRequest::at(path).with_mode(mode)).await
    }

    async fn remove(&self, path: &str, recursive: bool) -> FsResult<()> {
        self.call(abi::FS_REMOVE, FsRequest::at(path).with_recursive(recursive)).await
    }

    async fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        self.call(abi::FS_RENAME, FsRequest::rename(from, to)).await
    }

    async fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        self.call(abi::FS_CHMOD, FsRequest::at(path).with_mode(mode)).await
    }
}
