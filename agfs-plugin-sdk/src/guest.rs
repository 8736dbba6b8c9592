//! The trait plugin authors implement.

use agfs_types::{FileInfo, FsError, FsResult, MountConfig, WriteFlag};

/// A filesystem served from inside the sandbox.
///
/// Only `name`, `read`, `stat` and `readdir` are required. Every other
/// operation answers `Unsupported` unless overridden. Paths are relative to
/// the mount point and always start with `/`.
///
/// The plugin value is created with `Default` on the first call and lives
/// for as long as the instance does. Each instance serves one call at a
/// time, so `&mut self` is never contended.
pub trait GuestFileSystem: Default {
    fn name(&self) -> &str;

    fn readme(&self) -> String {
        String::new()
    }

    /// Receives the mount's config table before the mount is published.
    fn init(&mut self, _config: &MountConfig) -> FsResult<()> {
        Ok(())
    }

    fn shutdown(&mut self) -> FsResult<()> {
        Ok(())
    }

    /// See [`agfs_types::slice_for_read`] for the offset and size rules.
    fn read(&mut self, path: &str, offset: i64, size: i64) -> FsResult<Vec<u8>>;

    fn stat(&mut self, path: &str) -> FsResult<FileInfo>;

    fn readdir(&mut self, path: &str) -> FsResult<Vec<FileInfo>>;

    fn write(&mut self, _path: &str, _data: &[u8], _offset: i64, _flags: WriteFlag) -> FsResult<u64> {
        Err(FsError::unsupported("write"))
    }

    fn create(&mut self, _path: &str) -> FsResult<()> {
        Err(FsError::unsupported("create"))
    }

    fn mkdir(&mut self, _path: &str, _mode: u32) -> FsResult<()> {
        Err(FsError::unsupported("mkdir"))
    }

    fn remove(&mut self, _path: &str, _recursive: bool) -> FsResult<()> {
        Err(FsError::unsupported("remove"))
    }

    fn rename(&mut self, _from: &str, _to: &str) -> FsResult<()> {
        Err(FsError::unsupported("rename"))
    }

    fn chmod(&mut self, _path: &str, _mode: u32) -> FsResult<()> {
        Err(FsError::unsupported("chmod"))
    }
}
