//! The capability interface every provider implements.
//!
//! Native providers implement these traits directly. Sandboxed plugins are
//! adapted to them by the plugin host, so the router never needs to know
//! which kind it is dispatching to.

use async_trait::async_trait;

use crate::error::{FsError, FsResult};
use crate::fileinfo::{FileInfo, MountConfig, WriteFlag};

/// Read-side operations plus lifecycle.
#[async_trait]
pub trait ReadOnlyFileSystem: Send + Sync {
    /// Short identifier reported in mount listings.
    fn name(&self) -> &str;

    /// Human-readable description. Empty by default.
    fn readme(&self) -> String {
        String::new()
    }

    /// Called once before the mount is published.
    async fn init(&self, _config: &MountConfig) -> FsResult<()> {
        Ok(())
    }

    /// Reads `size` bytes starting at `offset`.
    ///
    /// A negative offset reads from the start, a negative size reads to the
    /// end, and an offset past the end yields an empty buffer.
    async fn read(&self, path: &str, offset: i64, size: i64) -> FsResult<Vec<u8>>;

    async fn stat(&self, path: &str) -> FsResult<FileInfo>;

    async fn readdir(&self, path: &str) -> FsResult<Vec<FileInfo>>;

    /// Called once after the mount is unpublished and drained.
    async fn shutdown(&self) -> FsResult<()> {
        Ok(())
    }
}

/// Full read-write capability.
#[async_trait]
pub trait FileSystem: ReadOnlyFileSystem {
    /// Writes `data` at `offset` and returns the number of bytes written.
    ///
    /// See [`WriteFlag`] for how the offset and flags interact.
    async fn write(&self, path: &str, data: &[u8], offset: i64, flags: WriteFlag) -> FsResult<u64>;

    async fn create(&self, path: &str) -> FsResult<()>;

    async fn mkdir(&self, path: &str, mode: u32) -> FsResult<()>;

    async fn remove(&self, path: &str, recursive: bool) -> FsResult<()>;

    /// Both paths are relative to the same mount.
    async fn rename(&self, from: &str, to: &str) -> FsResult<()>;

    async fn chmod(&self, _path: &str, _mode: u32) -> FsResult<()> {
        Err(FsError::unsupported("chmod"))
    }
}
