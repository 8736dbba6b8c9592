//! Wasmtime-based plugin host for AGFS.
//!
//! Loads core WebAssembly modules that implement a provider through the
//! JSON guest ABI, gates their access to host services by capability, and
//! adapts them to the [`agfs_types::FileSystem`] interface the router
//! dispatches through.
//!
//! Each instance runs in its own `wasmtime::Store` with memory isolation
//! and a CPU fuel budget per call.

mod capabilities;
mod error;
mod gate;
mod host_fs;
mod http;
mod manager;
mod memory;
mod policy;
mod provider;
mod sandbox;

pub use capabilities::{Capability, CapabilitySet};
pub use error::PluginHostError;
pub use host_fs::HostFs;
pub use http::{HttpClient, HttpTimeouts, ReqwestClient};
pub use manager::{PluginHost, PluginSource, PluginSpec};
pub use policy::{PolicyConfig, PolicyEngine, PolicyLimits, PolicyMode};
pub use provider::WasmFileSystem;
pub use sandbox::{InstanceMetrics, InstanceState, ResourceLimits};
