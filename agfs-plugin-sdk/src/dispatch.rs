//! Request decoding and reply encoding for the export glue.
//!
//! Kept free of raw memory so it can be tested on the host.

use crate::guest::GuestFileSystem;
use agfs_types::{FsError, FsRequest, FsResult, MountConfig, Payload, Reply, WriteFlag, abi};
use serde::Serialize;

/// Runs `export` against `plugin` with the raw JSON `request` and returns the
/// JSON reply. Never fails: every error becomes an `{"err": ...}` reply.
pub fn dispatch<P: GuestFileSystem>(plugin: &mut P, export: &str, request: &[u8]) -> Vec<u8> {
    match decode(request) {
        Ok(req) => route(plugin, export, req),
        Err(e) => encode::<()>(Err(e)),
    }
}

fn decode(request: &[u8]) -> FsResult<FsRequest> {
    if request.is_empty() {
        return Ok(FsRequest::default());
    }
    serde_json::from_slice(request).map_err(|e| FsError::invalid_argument(format!("request: {e}")))
}

fn route<P: GuestFileSystem>(plugin: &mut P, export: &str, req: FsRequest) -> Vec<u8> {
    let path = req.path.as_str();
    match export {
        abi::NAME => encode(Ok(plugin.name().to_string())),
        abi::README => encode(Ok(plugin.readme())),
        abi::INIT => {
            let config = req.config.clone().unwrap_or_else(MountConfig::new);
            encode(plugin.init(&config))
        }
        abi::SHUTDOWN => encode(plugin.shutdown()),
        abi::FS_READ => encode(
            plugin
                .read(path, req.offset.unwrap_or(0), req.size.unwrap_or(-1))
                .map(Payload),
        ),
        abi::FS_STAT => encode(plugin.stat(path)),
        abi::FS_READDIR => encode(plugin.readdir(path)),
        abi::FS_WRITE => {
            let data = req.data.as_ref().map(Payload::as_slice).unwrap_or_default();
            let flags = req.flags.unwrap_or(WriteFlag::NONE);
            encode(plugin.write(path, data, req.offset.unwrap_or(-1), flags))
        }
        abi::FS_CREATE => encode(plugin.create(path)),
        abi::FS_MKDIR => encode(plugin.mkdir(path, req.mode.unwrap_or(0o755))),
        abi::FS_REMOVE => encode(plugin.remove(path, req.recursive.unwrap_or(false))),
        abi::FS_RENAME => match req.require_new_path() {
            Ok(to) => encode(plugin.rename(path, to)),
            Err(e) => encode::<()>(Err(e)),
        },
        abi::FS_CHMOD => match req.mode {
            Some(mode) => encode(plugin.chmod(path, mode)),
            None => encode::<()>(Err(FsError::invalid_argument("chmod: missing mode"))),
        },
        other => encode::<()>(Err(FsError::unsupported(format!("unknown export {other}")))),
    }
}

fn encode<T: Serialize>(result: FsResult<T>) -> Vec<u8> {
    let reply = Reply::from(result);
    serde_json::to_vec(&reply).unwrap_or_else(|e| {
        let fallback: Reply<()> = Reply::Err(FsError::internal(format!("encode reply: {e}")));
        serde_json::to_vec(&fallback).unwrap_or_else(|_| br#"{"err":{"kind":"internal","message":"encode reply"}}"#.to_vec())
    })
}
