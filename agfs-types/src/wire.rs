//! JSON envelopes exchanged across the guest boundary.
//!
//! Requests are plain structs. Every response is a [`Reply`], which serializes
//! as `{"ok": value}` or `{"err": {"kind": ..., "message": ...}}`. Byte
//! payloads travel as base64 strings.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{FsError, FsResult};
use crate::fileinfo::{MountConfig, WriteFlag};

/// Bytes that serialize as a base64 string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload(pub Vec<u8>);

impl Payload {
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Payload)
            .map_err(de::Error::custom)
    }
}

/// Response envelope for every export and host import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reply<T> {
    Ok(T),
    Err(FsError),
}

impl<T> Reply<T> {
    pub fn into_result(self) -> FsResult<T> {
        match self {
            Reply::Ok(v) => Ok(v),
            Reply::Err(e) => Err(e),
        }
    }
}

impl<T> From<FsResult<T>> for Reply<T> {
    fn from(result: FsResult<T>) -> Self {
        match result {
            Ok(v) => Reply::Ok(v),
            Err(e) => Reply::Err(e),
        }
    }
}

/// Request for a filesystem export. Only the fields an operation needs are
/// set; the rest are omitted from the JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FsRequest {
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<WriteFlag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recursive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<MountConfig>,
}

impl FsRequest {
    pub fn at(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn read(path: impl Into<String>, offset: i64, size: i64) -> Self {
        Self {
            offset: Some(offset),
            size: Some(size),
            ..Self::at(path)
        }
    }

    pub fn write(path: impl Into<String>, data: &[u8], offset: i64, flags: WriteFlag) -> Self {
        Self {
            offset: Some(offset),
            flags: Some(flags),
            data: Some(Payload::from(data)),
            ..Self::at(path)
        }
    }

    pub fn rename(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            new_path: Some(to.into()),
            ..Self::at(from)
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = Some(recursive);
        self
    }

    pub fn init(config: &MountConfig) -> Self {
        Self {
            config: Some(config.clone()),
            ..Self::default()
        }
    }

    /// The destination of a rename, or `InvalidArgument` if absent.
    pub fn require_new_path(&self) -> FsResult<&str> {
        self.new_path
            .as_deref()
            .ok_or_else(|| FsError::invalid_argument("missing new_path"))
    }
}

/// Operations a guest may request through `host_fs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostFsOp {
    Read,
    Write,
    Stat,
    Readdir,
    Mkdir,
    Remove,
    Rename,
}

/// Envelope for `host_fs`: an operation plus the usual filesystem request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostFsRequest {
    pub op: HostFsOp,
    #[serde(flatten)]
    pub request: FsRequest,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Envelope for `host_http`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Payload,
    /// Falls back to the host default when absent or zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: default_method(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: Payload::default(),
            timeout_seconds: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status_code: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Payload,
}
