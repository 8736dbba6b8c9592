//! Host services reachable from a guest.
//!
//! Both calls go through the host's capability gate. A plugin mounted
//! without the matching capability gets `PermissionDenied` back, and the
//! host never performs the request.

use agfs_types::{
    FileInfo, FsError, FsRequest, FsResult, HostFsOp, HostFsRequest, HttpRequest, HttpResponse,
    Payload, Reply, WriteFlag,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Import {
    Fs,
    Http,
}

impl fmt::Display for Import {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fs => agfs_types::abi::HOST_FS,
            Self::Http => agfs_types::abi::HOST_HTTP,
        })
    }
}

#[cfg(target_arch = "wasm32")]
#[link(wasm_import_module = "env")]
unsafe extern "C" {
    fn host_fs(ptr: i32, len: i32) -> i64;
    fn host_http(ptr: i32, len: i32) -> i64;
}

#[cfg(target_arch = "wasm32")]
fn invoke(import: Import, request: &[u8]) -> FsResult<Vec<u8>> {
    let (ptr, len) = (request.as_ptr() as usize as i32, request.len() as i32);
    // SAFETY: the host reads `len` bytes at `ptr` and writes its reply
    // through `agfs_alloc`.
    let packed = unsafe {
        match import {
            Import::Fs => host_fs(ptr, len),
            Import::Http => host_http(ptr, len),
        }
    };
    let (offset, len) = agfs_types::abi::unpack_i64(packed)
        .ok_or_else(|| FsError::internal(format!("{import}: no reply from host")))?;
    // SAFETY: a non-null reply is a buffer the host allocated for us.
    Ok(unsafe { crate::memory::take(offset, len) })
}

#[cfg(not(target_arch = "wasm32"))]
fn invoke(import: Import, _request: &[u8]) -> FsResult<Vec<u8>> {
    Err(FsError::unsupported(format!("{import}: only available inside the sandbox")))
}

fn call<Req: Serialize, Resp: DeserializeOwned>(import: Import, request: &Req) -> FsResult<Resp> {
    let bytes = serde_json::to_vec(request).map_err(|e| FsError::internal(format!("{import} request: {e}")))?;
    decode_reply(import, &invoke(import, &bytes)?)
}

fn decode_reply<T: DeserializeOwned>(import: Import, raw: &[u8]) -> FsResult<T> {
    serde_json::from_slice::<Reply<T>>(raw)
        .map_err(|e| FsError::internal(format!("{import} reply: {e}")))?
        .into_result()
}

/// Outbound HTTP through `host_http`.
pub mod http {
    use super::*;

    /// Sends `request`. Non-2xx statuses are returned, not turned into errors.
    pub fn send(request: &HttpRequest) -> FsResult<HttpResponse> {
        call(Import::Http, request)
    }

    pub fn get(url: &str) -> FsResult<HttpResponse> {
        send(&HttpRequest::get(url))
    }
}

/// Passthrough to the directory the mount's `host_fs_root` points at.
pub mod fs {
    use super::*;

    fn op<T: DeserializeOwned>(op: HostFsOp, request: FsRequest) -> FsResult<T> {
        call(Import::Fs, &HostFsRequest { op, request })
    }

    pub fn read(path: &str, offset: i64, size: i64) -> FsResult<Vec<u8>> {
        op::<Payload>(HostFsOp::Read, FsRequest::read(path, offset, size)).map(Payload::into_inner)
    }

    pub fn write(path: &str, data: &[u8], offset: i64, flags: WriteFlag) -> FsResult<u64> {
        op(HostFsOp::Write, FsRequest::write(path, data, offset, flags))
    }

    pub fn stat(path: &str) -> FsResult<FileInfo> {
        op(HostFsOp::Stat, FsRequest::at(path))
    }

    pub fn readdir(path: &str) -> FsResult<Vec<FileInfo>> {
        op(HostFsOp::Readdir, FsRequest::at(path))
    }

    pub fn mkdir(path: &str) -> FsResult<()> {
        op::<serde_json::Value>(HostFsOp::Mkdir, FsRequest::at(path)).map(drop)
    }

    pub fn remove(path: &str, recursive: bool) -> FsResult<()> {
        op::<serde_json::Value>(HostFsOp::Remove, FsRequest::at(path).with_recursive(recursive)).map(drop)
    }

    pub fn rename(from: &str, to: &str) -> FsResult<()> {
        op::<serde_json::Value>(HostFsOp::Rename, FsRequest::rename(from, to)).map(drop)
    }
}
