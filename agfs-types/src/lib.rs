//! Core type definitions for AGFS.
//!
//! This crate is shared by the router, the plugin host and guest plugins:
//! - The error taxonomy every provider reports in
//! - File metadata, write flags and per-mount configuration
//! - The Capability Interface traits providers implement
//! - The JSON envelopes and packed-pointer convention of the guest ABI
//!
//! Nothing here touches a runtime, so guests built for `wasm32-wasip1` can
//! depend on it directly.

pub mod abi;
mod error;
mod fileinfo;
mod ids;
mod provider;
pub mod wire;

pub use error::{ErrorKind, FsError, FsResult};
pub use fileinfo::{FileInfo, MountConfig, WriteFlag, slice_for_read};
pub use ids::MountId;
pub use provider::{FileSystem, ReadOnlyFileSystem};
pub use wire::{FsRequest, HostFsOp, HostFsRequest, HttpRequest, HttpResponse, Payload, Reply};
