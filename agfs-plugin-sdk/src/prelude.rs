//! Convenience re-exports for plugin authors.
//!
//! ```ignore
//! use agfs_plugin_sdk::prelude::*;
//! ```

pub use crate::GuestFileSystem;
pub use crate::host;
pub use agfs_types::{FileInfo, FsError, FsResult, MountConfig, WriteFlag, slice_for_read};
