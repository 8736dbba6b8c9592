//! File metadata, write flags and mount configuration.

use serde::{Deserialize, Serialize};

/// Metadata for one file or directory as reported by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub mode: u32,
    /// Seconds since the Unix epoch.
    #[serde(default)]
    pub mod_time: i64,
    #[serde(default)]
    pub is_dir: bool,
    /// Provider-specific extras, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl FileInfo {
    pub fn file(name: impl Into<String>, size: u64, mode: u32) -> Self {
        Self {
            name: name.into(),
            size,
            mode,
            mod_time: 0,
            is_dir: false,
            meta: None,
        }
    }

    pub fn dir(name: impl Into<String>, mode: u32) -> Self {
        Self {
            name: name.into(),
            size: 0,
            mode,
            mod_time: 0,
            is_dir: true,
            meta: None,
        }
    }

    pub fn with_mod_time(mut self, secs: i64) -> Self {
        self.mod_time = secs;
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Write behaviour bits.
///
/// A negative write offset without `APPEND` replaces the whole content. A
/// non-negative offset writes in place and zero-fills any gap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WriteFlag(pub u32);

impl WriteFlag {
    pub const NONE: WriteFlag = WriteFlag(0);
    /// Write at the current end of the file; the offset is ignored.
    pub const APPEND: WriteFlag = WriteFlag(1 << 0);
    /// Create the file if it does not exist.
    pub const CREATE: WriteFlag = WriteFlag(1 << 1);
    /// With `CREATE`, fail if the file already exists.
    pub const EXCLUSIVE: WriteFlag = WriteFlag(1 << 2);
    /// Truncate before writing.
    pub const TRUNCATE: WriteFlag = WriteFlag(1 << 3);

    pub fn contains(&self, flag: WriteFlag) -> bool {
        (self.0 & flag.0) == flag.0 && flag.0 != 0
    }

    #[must_use]
    pub fn with(self, flag: WriteFlag) -> WriteFlag {
        WriteFlag(self.0 | flag.0)
    }
}

impl std::ops::BitOr for WriteFlag {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.with(rhs)
    }
}

/// Opaque per-mount configuration forwarded to the provider's `init`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MountConfig(serde_json::Map<String, serde_json::Value>);

impl MountConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key)?.as_str()
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key)?.as_i64()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key)?.as_bool()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.0
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for MountConfig {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(map)
    }
}

/// Applies the shared read rule to an in-memory buffer: a negative offset
/// reads from 0, a negative size reads to the end, and reads past the end
/// return nothing.
pub fn slice_for_read(data: &[u8], offset: i64, size: i64) -> &[u8] {
    let len = data.len();
    let start = if offset < 0 { 0 } else { (offset as u64).min(len as u64) as usize };
    let end = if size < 0 {
        len
    } else {
        start.saturating_add(size as usize).min(len)
    };
    &data[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_rule_edges() {
        let data = b"hello world";
        assert_eq!(slice_for_read(data, 0, 5), b"hello");
        assert_eq!(slice_for_read(data, 6, -1), b"world");
        assert_eq!(slice_for_read(data, -3, 5), b"hello");
        assert_eq!(slice_for_read(data, 100, 5), b"");
        assert_eq!(slice_for_read(data, 6, 100), b"world");
        assert_eq!(slice_for_read(data, 0, 0), b"");
    }

    #[test]
    fn write_flag_contains() {
        let flags = WriteFlag::CREATE | WriteFlag::TRUNCATE;
        assert!(flags.contains(WriteFlag::CREATE));
        assert!(flags.contains(WriteFlag::TRUNCATE));
        assert!(!flags.contains(WriteFlag::APPEND));
        assert!(!flags.contains(WriteFlag::NONE));
    }

    #[test]
    fn file_info_defaults_from_sparse_json() {
        let info: FileInfo = serde_json::from_str(r#"{"name":"a.txt","size":3}"#).unwrap();
        assert_eq!(info, FileInfo::file("a.txt", 3, 0));
    }

    #[test]
    fn mount_config_accessors() {
        let cfg = MountConfig::new()
            .with("region", "eu-west-1")
            .with("retries", 3)
            .with("verbose", true);
        assert_eq!(cfg.get_str("region"), Some("eu-west-1"));
        assert_eq!(cfg.get_i64("retries"), Some(3));
        assert_eq!(cfg.get_bool("verbose"), Some(true));
        assert!(!cfg.contains("missing"));
    }
}
