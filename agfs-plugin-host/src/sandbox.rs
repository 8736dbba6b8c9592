//! One guest instance: a `wasmtime::Store` with its own linear memory.
//!
//! Each `PluginInstance` owns:
//! - Memory isolation (configurable ceiling via [`TrackingLimiter`])
//! - A CPU fuel budget reset before every call
//! - The capability set and host services its imports may use
//!
//! Calls go through [`PluginInstance::call`], which marshals the request into
//! guest memory, invokes the export, copies the response out and decodes it.
//! A trap poisons the instance; every other failure is contained to the call.

use crate::capabilities::CapabilitySet;
use crate::error::PluginHostError;
use crate::host_fs::HostFs;
use crate::http::{HttpClient, HttpTimeouts};
use crate::memory::{read_guest, write_guest};
use agfs_types::{Reply, abi};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};
use wasmtime::{Engine, Instance, Linker, Memory, Module, ResourceLimiter, Store, TypedFunc};
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::p1::WasiP1Ctx;

/// Exports that take `(ptr, len)` and return a packed `i64`.
pub(crate) const CALL_EXPORTS: [&str; 13] = [
    abi::NAME,
    abi::README,
    abi::INIT,
    abi::SHUTDOWN,
    abi::FS_READ,
    abi::FS_STAT,
    abi::FS_READDIR,
    abi::FS_WRITE,
    abi::FS_CREATE,
    abi::FS_MKDIR,
    abi::FS_REMOVE,
    abi::FS_RENAME,
    abi::FS_CHMOD,
];

/// Resource limits for a plugin instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum linear memory in bytes.
    pub max_memory_bytes: usize,
    /// CPU fuel budget per invocation (prevents infinite loops).
    pub fuel_per_call: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_bytes: 64 * 1024 * 1024, // 64MB
            fuel_per_call: 1_000_000_000,       // ~1 billion instructions
        }
    }
}

/// A resource limiter that tracks actual memory usage.
pub struct TrackingLimiter {
    max_memory: usize,
    current_memory: AtomicUsize,
    max_table_elements: usize,
}

impl TrackingLimiter {
    pub fn new(max_memory: usize) -> Self {
        Self {
            max_memory,
            current_memory: AtomicUsize::new(0),
            max_table_elements: 20_000,
        }
    }

    pub fn current_memory_bytes(&self) -> usize {
        self.current_memory.load(Ordering::Relaxed)
    }

    pub fn max_memory_bytes(&self) -> usize {
        self.max_memory
    }
}

impl ResourceLimiter for TrackingLimiter {
    fn memory_growing(
        &mut self,
        current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        if desired <= self.max_memory {
            self.current_memory.store(desired, Ordering::Relaxed);
            Ok(true)
        } else {
            debug!(
                current = current,
                desired = desired,
                max = self.max_memory,
                "Memory growth denied - would exceed limit"
            );
            Ok(false)
        }
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        Ok(desired <= self.max_table_elements)
    }

    fn instances(&self) -> usize {
        1
    }

    fn tables(&self) -> usize {
        4
    }

    fn memories(&self) -> usize {
        1
    }
}

/// Lifecycle of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Loading,
    Ready,
    /// Unpublished; finishing calls already routed to it.
    Draining,
    /// Shut down or poisoned by a trap. Never serves again.
    Unloaded,
}

impl InstanceState {
    pub fn is_serving(&self) -> bool {
        matches!(self, Self::Ready | Self::Draining)
    }

    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Loading,
            1 => Self::Ready,
            2 => Self::Draining,
            _ => Self::Unloaded,
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Unloaded => "unloaded",
        };
        f.write_str(s)
    }
}

/// Resource usage metrics for one instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceMetrics {
    pub index: usize,
    pub state: InstanceState,
    /// Memory currently used by the guest in bytes.
    pub memory_used_bytes: usize,
    pub memory_limit_bytes: usize,
    /// Memory usage as a ratio (0.0 to 1.0).
    pub memory_usage_ratio: f64,
    pub fuel_consumed_last_call: u64,
    pub fuel_budget_per_call: u64,
    pub calls: u64,
    pub faults: u64,
}

/// Host services reachable from a guest's imports. Shared by every instance
/// of one mount.
pub struct HostServices {
    pub http: Arc<dyn HttpClient>,
    pub http_timeouts: HttpTimeouts,
    pub host_fs: Option<HostFs>,
}

/// State stored in each instance's `wasmtime::Store`.
pub struct HostState {
    pub(crate) plugin: Arc<str>,
    pub(crate) capabilities: CapabilitySet,
    pub(crate) services: Arc<HostServices>,
    pub(crate) wasi: WasiP1Ctx,
    pub(crate) limiter: TrackingLimiter,
}

impl HostState {
    pub fn new(
        plugin: Arc<str>,
        capabilities: CapabilitySet,
        services: Arc<HostServices>,
        limits: &ResourceLimits,
    ) -> Self {
        // No preopens, no env, no inherited stdio.
        let wasi = WasiCtxBuilder::new().build_p1();
        Self {
            plugin,
            capabilities,
            services,
            wasi,
            limiter: TrackingLimiter::new(limits.max_memory_bytes),
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }
}

/// One live guest.
pub struct PluginInstance {
    index: usize,
    store: Store<HostState>,
    memory: Memory,
    alloc: TypedFunc<i32, i32>,
    free: Option<TypedFunc<(i32, i32), ()>>,
    exports: HashMap<&'static str, TypedFunc<(i32, i32), i64>>,
    limits: ResourceLimits,
    state: InstanceState,
    calls: u64,
    faults: u64,
    last_fuel_consumed: u64,
}

impl PluginInstance {
    /// Instantiates `module` with a fresh store and resolves the ABI exports.
    pub fn instantiate(
        index: usize,
        engine: &Engine,
        linker: &Linker<HostState>,
        module: &Module,
        host: HostState,
        limits: ResourceLimits,
    ) -> Result<Self, PluginHostError> {
        let plugin = host.plugin.to_string();
        let mut store = Store::new(engine, host);
        store.limiter(|s| &mut s.limiter);
        store.set_fuel(limits.fuel_per_call).map_err(|e| PluginHostError::Fuel {
            plugin: plugin.clone(),
            message: e.to_string(),
        })?;

        let instance: Instance = linker.instantiate(&mut store, module).map_err(|e| {
            PluginHostError::Trap {
                plugin: plugin.clone(),
                message: format!("instantiation failed: {e}"),
            }
        })?;

        let memory = instance
            .get_memory(&mut store, abi::MEMORY)
            .ok_or_else(|| PluginHostError::MissingRequired {
                plugin: plugin.clone(),
                export: abi::MEMORY.to_string(),
            })?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, abi::ALLOC)
            .map_err(|_| PluginHostError::MissingRequired {
                plugin: plugin.clone(),
                export: abi::ALLOC.to_string(),
            })?;
        let free = match instance.get_func(&mut store, abi::FREE) {
            Some(f) => Some(f.typed::<(i32, i32), ()>(&store)?),
            None => None,
        };

        let mut exports = HashMap::new();
        for name in CALL_EXPORTS {
            if let Some(f) = instance.get_func(&mut store, name) {
                exports.insert(name, f.typed::<(i32, i32), i64>(&store)?);
            }
        }
        if !exports.contains_key(abi::NAME) {
            return Err(PluginHostError::MissingRequired {
                plugin,
                export: abi::NAME.to_string(),
            });
        }

        Ok(Self {
            index,
            store,
            memory,
            alloc,
            free,
            exports,
            limits,
            state: InstanceState::Ready,
            calls: 0,
            faults: 0,
            last_fuel_consumed: 0,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn set_state(&mut self, state: InstanceState) {
        // Unloaded is terminal.
        if self.state != InstanceState::Unloaded {
            self.state = state;
        }
    }

    pub fn has_export(&self, export: &str) -> bool {
        self.exports.contains_key(export)
    }

    pub fn plugin(&self) -> &str {
        self.store.data().plugin()
    }

    /// Invokes `export` with `request` serialized as JSON and decodes the
    /// reply.
    pub fn call<Req, Resp>(&mut self, export: &str, request: &Req) -> Result<Reply<Resp>, PluginHostError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        if !self.state.is_serving() {
            return Err(PluginHostError::Unavailable {
                plugin: self.plugin().to_string(),
            });
        }
        let plugin = self.plugin().to_string();
        let func = self
            .exports
            .get(export)
            .cloned()
            .ok_or_else(|| PluginHostError::MissingExport {
                plugin: plugin.clone(),
                export: export.to_string(),
            })?;

        let bytes = serde_json::to_vec(request)?;
        self.store
            .set_fuel(self.limits.fuel_per_call)
            .map_err(|e| PluginHostError::Fuel {
                plugin: plugin.clone(),
                message: e.to_string(),
            })?;
        self.calls += 1;

        let result = self.invoke(&plugin, export, func, &bytes);
        self.track_fuel_consumption();

        match result {
            Ok(raw) => serde_json::from_slice::<Reply<Resp>>(&raw).map_err(|e| {
                self.faults += 1;
                warn!(plugin = %plugin, export = %export, error = %e, "Malformed guest response");
                PluginHostError::Malformed {
                    plugin,
                    export: export.to_string(),
                    detail: e.to_string(),
                }
            }),
            Err(e) => {
                self.faults += 1;
                if matches!(e, PluginHostError::Trap { .. }) {
                    warn!(plugin = %plugin, export = %export, instance = self.index, error = %e, "Guest trapped, retiring instance");
                    self.state = InstanceState::Unloaded;
                } else {
                    warn!(plugin = %plugin, export = %export, error = %e, "Guest call failed");
                }
                Err(e)
            }
        }
    }

    /// Copy in, call, copy out. Returns the raw response bytes.
    fn invoke(
        &mut self,
        plugin: &str,
        export: &str,
        func: TypedFunc<(i32, i32), i64>,
        request: &[u8],
    ) -> Result<Vec<u8>, PluginHostError> {
        let (req_ptr, req_len) = write_guest(&mut self.store, &self.memory, &self.alloc, plugin, request)?;

        let packed = func
            .call(&mut self.store, (req_ptr as i32, req_len as i32))
            .map_err(|e| PluginHostError::Trap {
                plugin: plugin.to_string(),
                message: format!("{export}: {e}"),
            })?;
        self.release(req_ptr, req_len)?;

        let (offset, len) = abi::unpack_i64(packed).ok_or_else(|| PluginHostError::NullResponse {
            plugin: plugin.to_string(),
            export: export.to_string(),
        })?;
        let response = read_guest(&self.store, &self.memory, plugin, offset, len)?;
        self.release(offset, len)?;
        Ok(response)
    }

    fn release(&mut self, offset: u32, len: u32) -> Result<(), PluginHostError> {
        if let Some(free) = self.free.clone() {
            free.call(&mut self.store, (offset as i32, len as i32))
                .map_err(|e| PluginHostError::Trap {
                    plugin: self.plugin().to_string(),
                    message: format!("in {}: {e}", abi::FREE),
                })?;
        }
        Ok(())
    }

    fn track_fuel_consumption(&mut self) {
        match self.store.get_fuel() {
            Ok(remaining) => {
                self.last_fuel_consumed = self.limits.fuel_per_call.saturating_sub(remaining);
                debug!(
                    plugin = %self.plugin(),
                    consumed = self.last_fuel_consumed,
                    "Guest call fuel"
                );
            }
            Err(_) => self.last_fuel_consumed = 0,
        }
    }

    pub fn metrics(&self) -> InstanceMetrics {
        let limiter = &self.store.data().limiter;
        let memory_used_bytes = limiter
            .current_memory_bytes()
            .max(self.memory.data_size(&self.store));
        let memory_limit_bytes = limiter.max_memory_bytes();
        let memory_usage_ratio = if memory_limit_bytes > 0 {
            memory_used_bytes as f64 / memory_limit_bytes as f64
        } else {
            0.0
        };
        InstanceMetrics {
            index: self.index,
            state: self.state,
            memory_used_bytes,
            memory_limit_bytes,
            memory_usage_ratio,
            fuel_consumed_last_call: self.last_fuel_consumed,
            fuel_budget_per_call: self.limits.fuel_per_call,
            calls: self.calls,
            faults: self.faults,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ReqwestClient;

    const MINIMAL_GUEST: &str = r#"(module
  (memory (export "memory") 1)
  (func (export "agfs_alloc") (param i32) (result i32) i32.const 4096)
  (func (export "agfs_name") (param i32 i32) (result i64) i64.const 0))"#;

    fn host_state(limits: &ResourceLimits) -> HostState {
        let services = Arc::new(HostServices {
            http: Arc::new(ReqwestClient),
            http_timeouts: HttpTimeouts::default(),
            host_fs: None,
        });
        HostState::new(Arc::from("minimal"), CapabilitySet::none(), services, limits)
    }

    #[test]
    fn fuel_failure_is_reported() {
        // Fuel metering is off on this engine, so the budget cannot be set.
        let engine = Engine::default();
        let module = Module::new(&engine, MINIMAL_GUEST).unwrap();
        let linker: Linker<HostState> = Linker::new(&engine);
        let limits = ResourceLimits::default();

        let result = PluginInstance::instantiate(0, &engine, &linker, &module, host_state(&limits), limits);
        assert!(matches!(result, Err(PluginHostError::Fuel { .. })));
    }

    #[test]
    fn instantiates_with_fuel_enabled() {
        let mut config = wasmtime::Config::new();
        config.consume_fuel(true);
        let engine = Engine::new(&config).unwrap();
        let module = Module::new(&engine, MINIMAL_GUEST).unwrap();
        let linker: Linker<HostState> = Linker::new(&engine);
        let limits = ResourceLimits::default();

        let instance =
            PluginInstance::instantiate(0, &engine, &linker, &module, host_state(&limits), limits).unwrap();
        assert_eq!(instance.state(), InstanceState::Ready);
        assert!(instance.has_export("agfs_name"));
    }

    #[test]
    fn limiter_refuses_growth_past_ceiling() {
        let mut limiter = TrackingLimiter::new(2 * 65536);
        assert!(limiter.memory_growing(0, 65536, None).unwrap());
        assert_eq!(limiter.current_memory_bytes(), 65536);
        assert!(!limiter.memory_growing(65536, 3 * 65536, None).unwrap());
        assert_eq!(limiter.current_memory_bytes(), 65536);
    }

    #[test]
    fn state_encoding() {
        for state in [
            InstanceState::Loading,
            InstanceState::Ready,
            InstanceState::Draining,
            InstanceState::Unloaded,
        ] {
            assert_eq!(InstanceState::from_u8(state.as_u8()), state);
        }
        assert!(InstanceState::Draining.is_serving());
        assert!(!InstanceState::Unloaded.is_serving());
    }
}
