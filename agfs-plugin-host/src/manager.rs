//! Plugin loading.
//!
//! `PluginHost` owns the shared Wasmtime engine, the linker with the gated
//! host imports, the policy and the HTTP client. `load` turns a
//! [`PluginSpec`] into a ready [`WasmFileSystem`]: compile (or reuse the
//! cached compilation), instantiate the pool, run the metadata handshake.

use crate::capabilities::CapabilitySet;
use crate::error::PluginHostError;
use crate::gate;
use crate::host_fs::HostFs;
use crate::http::{HttpClient, ReqwestClient};
use crate::policy::PolicyEngine;
use crate::provider::WasmFileSystem;
use crate::sandbox::{HostServices, HostState, PluginInstance, ResourceLimits};
use agfs_types::{FsRequest, Reply, abi};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use wasmtime::{Engine, Linker, Module};

/// Where the guest module comes from.
#[derive(Debug, Clone)]
pub enum PluginSource {
    /// A `.wasm` (or `.wat`) file. The compiled module is cached beside it.
    Path(PathBuf),
    /// Inline module bytes, compiled on every load.
    Bytes(Vec<u8>),
}

/// Everything needed to mount one sandboxed provider.
#[derive(Debug, Clone)]
pub struct PluginSpec {
    pub source: PluginSource,
    /// Capabilities the plugin asks for. Policy may withhold some.
    pub capabilities: CapabilitySet,
    /// Root directory for `host.fs`. Without one the capability always
    /// fails.
    pub host_fs_root: Option<PathBuf>,
    /// Number of independent instances in the pool (at least one).
    pub instances: usize,
    /// Overrides the policy limits.
    pub limits: Option<ResourceLimits>,
}

impl PluginSpec {
    pub fn new(source: PluginSource) -> Self {
        Self {
            source,
            capabilities: CapabilitySet::none(),
            host_fs_root: None,
            instances: 1,
            limits: None,
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(PluginSource::Path(path.into()))
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(PluginSource::Bytes(bytes.into()))
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_host_fs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.host_fs_root = Some(root.into());
        self
    }

    #[must_use]
    pub fn with_instances(mut self, instances: usize) -> Self {
        self.instances = instances;
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = Some(limits);
        self
    }
}

/// Creates the engine every plugin shares.
fn create_shared_engine() -> Result<Engine, PluginHostError> {
    let mut config = wasmtime::Config::new();
    config.consume_fuel(true);
    Engine::new(&config).map_err(PluginHostError::Compilation)
}

pub struct PluginHost {
    engine: Engine,
    linker: Linker<HostState>,
    policy: PolicyEngine,
    http: Arc<dyn HttpClient>,
}

impl PluginHost {
    /// Host with the policy from `~/.agfs/policy.toml` and a real HTTP client.
    pub fn new() -> Result<Self, PluginHostError> {
        Self::with_policy(PolicyEngine::load())
    }

    pub fn with_policy(policy: PolicyEngine) -> Result<Self, PluginHostError> {
        let engine = create_shared_engine()?;
        let mut linker: Linker<HostState> = Linker::new(&engine);
        // WASI preview 1 with an empty context: no preopens, no env, no sockets.
        wasmtime_wasi::p1::add_to_linker_sync(&mut linker, |s: &mut HostState| &mut s.wasi)?;
        gate::add_to_linker(&mut linker)?;

        Ok(Self {
            engine,
            linker,
            policy,
            http: Arc::new(ReqwestClient),
        })
    }

    /// Replaces the HTTP client used by `host_http`.
    #[must_use]
    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http = client;
        self
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Compiles and instantiates a plugin and runs its metadata handshake.
    ///
    /// The returned provider has not been initialised; the router calls
    /// `init` with the mount config before publishing it.
    pub fn load(&self, spec: &PluginSpec) -> Result<WasmFileSystem, PluginHostError> {
        let module = match &spec.source {
            PluginSource::Path(path) => self.compile_cached(path)?,
            PluginSource::Bytes(bytes) => {
                let start = Instant::now();
                let module = Module::new(&self.engine, bytes)?;
                info!(size_bytes = bytes.len(), elapsed_ms = start.elapsed().as_millis(), "Compiled inline plugin");
                module
            }
        };

        let limits = spec.limits.clone().unwrap_or_else(|| self.policy.resource_limits());
        let services = Arc::new(HostServices {
            http: Arc::clone(&self.http),
            http_timeouts: self.policy.http_timeouts(),
            host_fs: spec.host_fs_root.as_ref().map(HostFs::new),
        });

        // The name is not known until the first instance answers agfs_name,
        // so the handshake instance runs with no capabilities.
        let handshake_state = HostState::new(Arc::from("<loading>"), CapabilitySet::none(), Arc::clone(&services), &limits);
        let mut handshake = PluginInstance::instantiate(0, &self.engine, &self.linker, &module, handshake_state, limits.clone())?;
        let name = handshake_name(&mut handshake)?;

        if !self.policy.is_plugin_allowed(&name) {
            return Err(PluginHostError::PolicyDenied(format!("plugin '{name}' blocked by policy")));
        }
        let readme = handshake_readme(&mut handshake, &name);
        let granted = self.policy.grant(&name, &spec.capabilities);
        drop(handshake);

        let plugin: Arc<str> = Arc::from(name.as_str());
        let count = spec.instances.max(1);
        let mut instances = Vec::with_capacity(count);
        for index in 0..count {
            let state = HostState::new(Arc::clone(&plugin), granted.clone(), Arc::clone(&services), &limits);
            instances.push(PluginInstance::instantiate(
                index,
                &self.engine,
                &self.linker,
                &module,
                state,
                limits.clone(),
            )?);
        }

        info!(
            plugin = %name,
            instances = count,
            capabilities = %granted,
            max_memory_bytes = limits.max_memory_bytes,
            "Plugin loaded"
        );
        Ok(WasmFileSystem::new(name, readme, granted, instances))
    }

    /// Compiles `wasm_path`, reusing `<name>.cwasm` when its recorded SHA-256
    /// matches the source bytes. Cache writes are best effort.
    fn compile_cached(&self, wasm_path: &Path) -> Result<Module, PluginHostError> {
        let wasm_bytes = std::fs::read(wasm_path)
            .map_err(|e| PluginHostError::Load(format!("failed to read {}: {e}", wasm_path.display())))?;
        let wasm_hash = hex::encode(Sha256::digest(&wasm_bytes));

        let cwasm_path = wasm_path.with_extension("cwasm");
        let hash_path = wasm_path.with_extension("cwasm.sha256");

        if cwasm_path.exists() && hash_path.exists() {
            let stored_hash = std::fs::read_to_string(&hash_path).unwrap_or_default();
            if stored_hash.trim() == wasm_hash {
                info!(path = %cwasm_path.display(), "Loading cached compiled module");
                let cwasm_bytes = std::fs::read(&cwasm_path).map_err(|e| {
                    PluginHostError::Load(format!("failed to read cached module {}: {e}", cwasm_path.display()))
                })?;
                // SAFETY: the cwasm was produced by `Module::serialize` on an
                // engine with this configuration, and the recorded hash ties it
                // to the current source bytes.
                match unsafe { Module::deserialize(&self.engine, &cwasm_bytes) } {
                    Ok(module) => return Ok(module),
                    Err(e) => warn!(path = %cwasm_path.display(), error = %e, "Cached module unusable, recompiling"),
                }
            } else {
                info!(path = %wasm_path.display(), "Cache hash mismatch, recompiling");
            }
        } else {
            info!(path = %wasm_path.display(), "No cached module found, compiling");
        }

        let start = Instant::now();
        let module = Module::new(&self.engine, &wasm_bytes)?;
        info!(path = %wasm_path.display(), size_bytes = wasm_bytes.len(), elapsed_ms = start.elapsed().as_millis(), "Compilation complete");

        match module.serialize() {
            Ok(serialized) => {
                if let Err(e) = std::fs::write(&cwasm_path, &serialized) {
                    warn!(path = %cwasm_path.display(), error = %e, "Failed to write compiled module cache");
                } else if let Err(e) = std::fs::write(&hash_path, &wasm_hash) {
                    warn!(path = %hash_path.display(), error = %e, "Failed to write module cache hash");
                } else {
                    info!(path = %cwasm_path.display(), "Module cached");
                }
            }
            Err(e) => warn!(path = %wasm_path.display(), error = %e, "Failed to serialize compiled module"),
        }
        Ok(module)
    }
}

fn handshake_name(handshake: &mut PluginInstance) -> Result<String, PluginHostError> {
    match handshake.call::<_, String>(abi::NAME, &FsRequest::default())? {
        Reply::Ok(name) if !name.trim().is_empty() => Ok(name),
        Reply::Ok(_) => Err(PluginHostError::Malformed {
            plugin: "<loading>".to_string(),
            export: abi::NAME.to_string(),
            detail: "empty plugin name".to_string(),
        }),
        Reply::Err(e) => Err(PluginHostError::Guest(e.context(abi::NAME))),
    }
}

/// The readme is optional; any failure just means there is none.
fn handshake_readme(handshake: &mut PluginInstance, plugin: &str) -> String {
    if !handshake.has_export(abi::README) {
        return String::new();
    }
    match handshake.call::<_, String>(abi::README, &FsRequest::default()) {
        Ok(Reply::Ok(readme)) => readme,
        Ok(Reply::Err(e)) => {
            warn!(plugin = %plugin, error = %e, "Plugin readme reported an error");
            String::new()
        }
        Err(e) => {
            warn!(plugin = %plugin, error = %e, "Plugin readme failed");
            String::new()
        }
    }
}
