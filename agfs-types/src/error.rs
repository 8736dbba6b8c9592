//! Filesystem error taxonomy shared by the router, native providers and guests.
//!
//! Every failure that leaves a provider is an [`FsError`] carrying one
//! [`ErrorKind`]. The kind is what the network API and CLI layers map onto
//! status and exit codes, so the mapping tables here are part of the contract.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

/// Result type for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;

/// Generic error kinds exposed outward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    PermissionDenied,
    IsDirectory,
    NotADirectory,
    NotEmpty,
    InvalidArgument,
    Unsupported,
    Timeout,
    /// Underlying storage failure reported by a provider.
    Io,
    /// Sandbox faults, malformed marshaling, out-of-bounds guest memory.
    /// Kinds a guest reports that this host does not know also land here,
    /// so this stays the last variant.
    #[serde(other)]
    Internal,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 11] = [
        Self::NotFound,
        Self::AlreadyExists,
        Self::PermissionDenied,
        Self::IsDirectory,
        Self::NotADirectory,
        Self::NotEmpty,
        Self::InvalidArgument,
        Self::Unsupported,
        Self::Timeout,
        Self::Internal,
        Self::Io,
    ];

    /// Stable wire name, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::PermissionDenied => "permission_denied",
            Self::IsDirectory => "is_directory",
            Self::NotADirectory => "not_a_directory",
            Self::NotEmpty => "not_empty",
            Self::InvalidArgument => "invalid_argument",
            Self::Unsupported => "unsupported",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
            Self::Io => "io",
        }
    }

    /// Process exit code used by the CLI. Zero is reserved for success.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound => 2,
            Self::AlreadyExists => 3,
            Self::PermissionDenied => 4,
            Self::IsDirectory => 5,
            Self::NotADirectory => 6,
            Self::NotEmpty => 7,
            Self::InvalidArgument => 8,
            Self::Unsupported => 9,
            Self::Timeout => 10,
            Self::Internal => 11,
            Self::Io => 12,
        }
    }

    /// HTTP status code used by the network API.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::AlreadyExists => 409,
            Self::PermissionDenied => 403,
            Self::IsDirectory => 400,
            Self::NotADirectory => 400,
            Self::NotEmpty => 409,
            Self::InvalidArgument => 400,
            Self::Unsupported => 501,
            Self::Timeout => 504,
            Self::Internal => 500,
            Self::Io => 502,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotFound => "not found",
            Self::AlreadyExists => "already exists",
            Self::PermissionDenied => "permission denied",
            Self::IsDirectory => "is a directory",
            Self::NotADirectory => "not a directory",
            Self::NotEmpty => "directory not empty",
            Self::InvalidArgument => "invalid argument",
            Self::Unsupported => "operation not supported",
            Self::Timeout => "timed out",
            Self::Internal => "internal error",
            Self::Io => "I/O error",
        };
        f.write_str(text)
    }
}

/// A filesystem error: a kind plus context for humans.
///
/// Serializable so guests can report errors across the sandbox boundary with
/// the same shape the host uses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct FsError {
    pub kind: ErrorKind,
    #[serde(default)]
    pub message: String,
}

impl FsError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, path)
    }

    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, path)
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, msg)
    }

    pub fn is_directory(path: impl Into<String>) -> Self {
        Self::new(ErrorKind::IsDirectory, path)
    }

    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotADirectory, path)
    }

    pub fn not_empty(path: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotEmpty, path)
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, msg)
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, msg)
    }

    /// Prepends context to the message, keeping the kind.
    pub fn context(mut self, ctx: impl fmt::Display) -> Self {
        self.message = if self.message.is_empty() {
            ctx.to_string()
        } else {
            format!("{}: {}", ctx, self.message)
        };
        self
    }
}

impl From<io::Error> for FsError {
    fn from(e: io::Error) -> Self {
        let kind = match e.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            io::ErrorKind::IsADirectory => ErrorKind::IsDirectory,
            io::ErrorKind::NotADirectory => ErrorKind::NotADirectory,
            io::ErrorKind::DirectoryNotEmpty => ErrorKind::NotEmpty,
            io::ErrorKind::InvalidInput => ErrorKind::InvalidArgument,
            io::ErrorKind::TimedOut => ErrorKind::Timeout,
            io::ErrorKind::Unsupported => ErrorKind::Unsupported,
            _ => ErrorKind::Io,
        };
        Self::new(kind, e.to_string())
    }
}
