//! Guest SDK for building AGFS Wasm plugins.
//!
//! Plugin authors implement [`GuestFileSystem`] and call [`agfs_export!`].
//! The macro emits the guest half of the ABI: `agfs_alloc`/`agfs_free`, the
//! lifecycle exports and one `fs_*` export per filesystem operation. Build
//! the plugin crate as a `cdylib` for `wasm32-wasip1` or
//! `wasm32-unknown-unknown`.
//!
//! # Example
//!
//! (Requires a `wasm32` target; the exports are not generated on the host.)
//!
//! ```ignore
//! use agfs_plugin_sdk::prelude::*;
//!
//! #[derive(Default)]
//! struct HelloFs;
//!
//! impl GuestFileSystem for HelloFs {
//!     fn name(&self) -> &str {
//!         "hellofs"
//!     }
//!
//!     fn read(&mut self, path: &str, offset: i64, size: i64) -> FsResult<Vec<u8>> {
//!         match path {
//!             "/hello" => Ok(slice_for_read(b"hello\n", offset, size).to_vec()),
//!             _ => Err(FsError::not_found(path)),
//!         }
//!     }
//!
//!     fn stat(&mut self, path: &str) -> FsResult<FileInfo> {
//!         match path {
//!             "/" => Ok(FileInfo::dir("/", 0o555)),
//!             "/hello" => Ok(FileInfo::file("hello", 6, 0o444)),
//!             _ => Err(FsError::not_found(path)),
//!         }
//!     }
//!
//!     fn readdir(&mut self, _path: &str) -> FsResult<Vec<FileInfo>> {
//!         Ok(vec![FileInfo::file("hello", 6, 0o444)])
//!     }
//! }
//!
//! agfs_plugin_sdk::agfs_export!(HelloFs);
//! ```

pub mod dispatch;
mod guest;
pub mod host;
#[cfg(target_arch = "wasm32")]
pub mod memory;
pub mod prelude;

pub use agfs_types::abi;
pub use guest::GuestFileSystem;

/// Generate the ABI exports for a plugin type.
///
/// The type must implement `Default`, [`GuestFileSystem`] and `Send`. It is
/// created on the first call and kept for the life of the instance.
#[macro_export]
macro_rules! agfs_export {
    ($plugin_ty:ty) => {
        #[cfg(target_arch = "wasm32")]
        mod __agfs_exports {
            use super::*;
            use std::sync::Mutex;

            static PLUGIN: Mutex<Option<$plugin_ty>> = Mutex::new(None);

            fn call(export: &str, ptr: i32, len: i32) -> i64 {
                // SAFETY: ptr/len are the arguments of the running export.
                let request = unsafe { $crate::memory::request(ptr, len) };
                let mut guard = PLUGIN.lock().unwrap_or_else(|e| e.into_inner());
                let plugin = guard.get_or_insert_with(<$plugin_ty>::default);
                $crate::memory::respond(&$crate::dispatch::dispatch(plugin, export, request))
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn agfs_alloc(size: i32) -> i32 {
                $crate::memory::alloc(size)
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn agfs_free(ptr: i32, len: i32) {
                // SAFETY: the host frees only buffers it got from us.
                unsafe { $crate::memory::free(ptr, len) }
            }

            $crate::__agfs_exports!(
                agfs_name => $crate::abi::NAME,
                agfs_readme => $crate::abi::README,
                agfs_init => $crate::abi::INIT,
                agfs_shutdown => $crate::abi::SHUTDOWN,
                fs_read => $crate::abi::FS_READ,
                fs_stat => $crate::abi::FS_STAT,
                fs_readdir => $crate::abi::FS_READDIR,
                fs_write => $crate::abi::FS_WRITE,
                fs_create => $crate::abi::FS_CREATE,
                fs_mkdir => $crate::abi::FS_MKDIR,
                fs_remove => $crate::abi::FS_REMOVE,
                fs_rename => $crate::abi::FS_RENAME,
                fs_chmod => $crate::abi::FS_CHMOD,
            );
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __agfs_exports {
    ($($symbol:ident => $export:expr),* $(,)?) => {
        $(
            #[unsafe(no_mangle)]
            pub extern "C" fn $symbol(ptr: i32, len: i32) -> i64 {
                call($export, ptr, len)
            }
        )*
    };
}
