//! Error types for the plugin host.

use agfs_types::{ErrorKind, FsError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginHostError {
    #[error("wasm compilation error: {0}")]
    Compilation(#[from] wasmtime::Error),

    #[error("failed to load plugin: {0}")]
    Load(String),

    #[error("plugin '{plugin}' is missing required export '{export}'")]
    MissingRequired { plugin: String, export: String },

    #[error("plugin '{plugin}' does not export '{export}'")]
    MissingExport { plugin: String, export: String },

    #[error("permission denied: plugin '{plugin}' lacks '{capability}' capability")]
    PermissionDenied { plugin: String, capability: String },

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("plugin trapped: {plugin}: {message}")]
    Trap { plugin: String, message: String },

    #[error("plugin '{plugin}' returned a null response from '{export}'")]
    NullResponse { plugin: String, export: String },

    #[error("plugin '{plugin}' referenced {len} bytes at offset {offset} outside its memory ({size} bytes)")]
    OutOfBounds {
        plugin: String,
        offset: u32,
        len: u32,
        size: usize,
    },

    #[error("malformed response from plugin '{plugin}' export '{export}': {detail}")]
    Malformed {
        plugin: String,
        export: String,
        detail: String,
    },

    #[error("plugin '{plugin}' allocator failed: {detail}")]
    Alloc { plugin: String, detail: String },

    #[error("plugin '{plugin}' fuel budget could not be set: {message}")]
    Fuel { plugin: String, message: String },

    #[error("plugin '{plugin}' has no usable instance")]
    Unavailable { plugin: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An error the guest itself reported, passed through unchanged.
    #[error("{0}")]
    Guest(FsError),
}

impl From<PluginHostError> for FsError {
    fn from(e: PluginHostError) -> Self {
        let kind = match &e {
            PluginHostError::Guest(inner) => return inner.clone(),
            PluginHostError::PermissionDenied { .. } | PluginHostError::PolicyDenied(_) => {
                ErrorKind::PermissionDenied
            }
            PluginHostError::MissingExport { .. } => ErrorKind::Unsupported,
            _ => ErrorKind::Internal,
        };
        FsError::new(kind, e.to_string())
    }
}
