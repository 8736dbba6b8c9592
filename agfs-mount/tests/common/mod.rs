//! Providers with observable behaviour for router tests.

#![allow(dead_code)]

use agfs_types::{FileInfo, FsError, FsResult, MountConfig, ReadOnlyFileSystem, slice_for_read};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Read-only provider serving a single file at `/readme.txt`.
pub struct StaticFs {
    pub body: &'static [u8],
}

#[async_trait]
impl ReadOnlyFileSystem for StaticFs {
    fn name(&self) -> &str {
        "staticfs"
    }

    async fn read(&self, path: &str, offset: i64, size: i64) -> FsResult<Vec<u8>> {
        match path {
            "/readme.txt" => Ok(slice_for_read(self.body, offset, size).to_vec()),
            "/" => Err(FsError::is_directory(path)),
            _ => Err(FsError::not_found(path)),
        }
    }

    async fn stat(&self, path: &str) -> FsResult<FileInfo> {
        match path {
            "/readme.txt" => Ok(FileInfo::file("readme.txt", self.body.len() as u64, 0o444)),
            "/" => Ok(FileInfo::dir("/", 0o555)),
            _ => Err(FsError::not_found(path)),
        }
    }

    async fn readdir(&self, path: &str) -> FsResult<Vec<FileInfo>> {
        match path {
            "/" => Ok(vec![FileInfo::file("readme.txt", self.body.len() as u64, 0o444)]),
            _ => Err(FsError::not_found(path)),
        }
    }
}

/// Provider whose reads take `delay` and which records its lifecycle.
pub struct SlowFs {
    pub delay: Duration,
    pub events: Arc<Mutex<Vec<&'static str>>>,
    pub fail_init: bool,
    pub shut_down: Arc<AtomicBool>,
}

impl SlowFs {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            events: Arc::new(Mutex::new(Vec::new())),
            fail_init: false,
            shut_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl ReadOnlyFileSystem for SlowFs {
    fn name(&self) -> &str {
        "slowfs"
    }

    async fn init(&self, config: &MountConfig) -> FsResult<()> {
        if self.fail_init {
            return Err(FsError::invalid_argument(format!(
                "missing setting, got {} keys",
                config.as_map().len()
            )));
        }
        self.events.lock().push("init");
        Ok(())
    }

    async fn read(&self, _path: &str, _offset: i64, _size: i64) -> FsResult<Vec<u8>> {
        self.events.lock().push("read-start");
        tokio::time::sleep(self.delay).await;
        self.events.lock().push("read-end");
        Ok(b"slow".to_vec())
    }

    async fn stat(&self, path: &str) -> FsResult<FileInfo> {
        Ok(FileInfo::file(path.trim_start_matches('/'), 4, 0o444))
    }

    async fn readdir(&self, _path: &str) -> FsResult<Vec<FileInfo>> {
        Ok(Vec::new())
    }

    async fn shutdown(&self) -> FsResult<()> {
        self.events.lock().push("shutdown");
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}
