//! The capability gate: host functions linked into every guest under `env`.
//!
//! Both imports are always linked. Each invocation checks the calling
//! instance's capability set before it reads the request or touches any
//! resource; a denied call gets a `permission_denied` reply and nothing else
//! happens. Replies are written back into guest memory through the guest's
//! allocator and returned packed, exactly like a guest export.

use crate::capabilities::Capability;
use crate::error::PluginHostError;
use crate::memory::{read_guest_args, write_guest};
use crate::sandbox::HostState;
use agfs_types::{FsError, FsResult, HostFsRequest, HttpRequest, Reply, abi};
use serde_json::Value;
use tracing::{debug, warn};
use wasmtime::{Caller, Extern, Linker};

/// Registers `env.host_fs` and `env.host_http`.
pub(crate) fn add_to_linker(linker: &mut Linker<HostState>) -> Result<(), PluginHostError> {
    linker.func_wrap(
        abi::HOST_MODULE,
        abi::HOST_FS,
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> wasmtime::Result<i64> {
            handle(&mut caller, Capability::HostFs, ptr, len)
        },
    )?;
    linker.func_wrap(
        abi::HOST_MODULE,
        abi::HOST_HTTP,
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> wasmtime::Result<i64> {
            handle(&mut caller, Capability::HostHttp, ptr, len)
        },
    )?;
    Ok(())
}

/// Runs one gated host call. Returns the packed reply, or 0 if the reply
/// could not be delivered into guest memory. A trap in the guest allocator
/// is rethrown so the calling export traps too.
fn handle(
    caller: &mut Caller<'_, HostState>,
    capability: Capability,
    ptr: i32,
    len: i32,
) -> wasmtime::Result<i64> {
    let plugin = caller.data().plugin.clone();

    let reply: Reply<Value> = match caller.data().capabilities.check(capability, &plugin) {
        Err(e) => {
            warn!(plugin = %plugin, capability = %capability, "Host call denied");
            Reply::Err(FsError::from(e))
        }
        Ok(()) => match request_bytes(caller, &plugin, ptr, len) {
            Ok(request) => serve(caller.data(), capability, &request).into(),
            Err(e) => {
                warn!(plugin = %plugin, capability = %capability, error = %e, "Bad host call arguments");
                return Ok(0);
            }
        },
    };

    match deliver(caller, &plugin, &reply) {
        Ok((offset, len)) => Ok(abi::pack_i64(offset, len)),
        Err(e @ PluginHostError::Trap { .. }) => Err(wasmtime::Error::msg(e.to_string())),
        Err(e) => {
            warn!(plugin = %plugin, capability = %capability, error = %e, "Could not deliver host reply");
            Ok(0)
        }
    }
}

fn request_bytes(
    caller: &mut Caller<'_, HostState>,
    plugin: &str,
    ptr: i32,
    len: i32,
) -> Result<Vec<u8>, PluginHostError> {
    let memory = match caller.get_export(abi::MEMORY) {
        Some(Extern::Memory(m)) => m,
        _ => {
            return Err(PluginHostError::MissingRequired {
                plugin: plugin.to_string(),
                export: abi::MEMORY.to_string(),
            });
        }
    };
    read_guest_args(&*caller, &memory, plugin, ptr, len)
}

fn serve(state: &HostState, capability: Capability, request: &[u8]) -> FsResult<Value> {
    match capability {
        Capability::HostFs => {
            let req: HostFsRequest = serde_json::from_slice(request)
                .map_err(|e| FsError::invalid_argument(format!("host_fs request: {e}")))?;
            let host_fs = state
                .services
                .host_fs
                .as_ref()
                .ok_or_else(|| FsError::permission_denied("host.fs: no root configured for this mount"))?;
            debug!(plugin = %state.plugin, op = ?req.op, path = %req.request.path, "host_fs");
            host_fs.serve(&req)
        }
        Capability::HostHttp => {
            let req: HttpRequest = serde_json::from_slice(request)
                .map_err(|e| FsError::invalid_argument(format!("host_http request: {e}")))?;
            let timeout = state.services.http_timeouts.resolve(req.timeout_seconds);
            debug!(plugin = %state.plugin, method = %req.method, url = %req.url, "host_http");
            let resp = state.services.http.execute(&req, timeout)?;
            serde_json::to_value(resp).map_err(|e| FsError::internal(format!("encode http response: {e}")))
        }
    }
}

fn deliver(
    caller: &mut Caller<'_, HostState>,
    plugin: &str,
    reply: &Reply<Value>,
) -> Result<(u32, u32), PluginHostError> {
    let bytes = serde_json::to_vec(reply)?;
    let memory = match caller.get_export(abi::MEMORY) {
        Some(Extern::Memory(m)) => m,
        _ => {
            return Err(PluginHostError::MissingRequired {
                plugin: plugin.to_string(),
                export: abi::MEMORY.to_string(),
            });
        }
    };
    let alloc = match caller.get_export(abi::ALLOC) {
        Some(Extern::Func(f)) => f.typed::<i32, i32>(&*caller)?,
        _ => {
            return Err(PluginHostError::MissingRequired {
                plugin: plugin.to_string(),
                export: abi::ALLOC.to_string(),
            });
        }
    };
    write_guest(caller, &memory, &alloc, plugin, &bytes)
}
