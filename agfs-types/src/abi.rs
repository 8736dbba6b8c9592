//! Guest ABI constants and the packed-pointer convention.
//!
//! Every guest export and host import takes `(ptr: i32, len: i32)` pointing
//! at a JSON request and returns an `i64` that packs the response location:
//! the low 32 bits hold the offset into guest memory and the high 32 bits
//! hold the length. An offset of 0 means the call produced no response.

/// Name of the exported linear memory.
pub const MEMORY: &str = "memory";
/// `agfs_alloc(size: i32) -> i32`, required.
pub const ALLOC: &str = "agfs_alloc";
/// `agfs_free(ptr: i32, len: i32)`, optional.
pub const FREE: &str = "agfs_free";

/// Lifecycle exports.
pub const NAME: &str = "agfs_name";
pub const README: &str = "agfs_readme";
pub const INIT: &str = "agfs_init";
pub const SHUTDOWN: &str = "agfs_shutdown";

/// Filesystem exports.
pub const FS_READ: &str = "fs_read";
pub const FS_STAT: &str = "fs_stat";
pub const FS_READDIR: &str = "fs_readdir";
pub const FS_WRITE: &str = "fs_write";
pub const FS_CREATE: &str = "fs_create";
pub const FS_MKDIR: &str = "fs_mkdir";
pub const FS_REMOVE: &str = "fs_remove";
pub const FS_RENAME: &str = "fs_rename";
pub const FS_CHMOD: &str = "fs_chmod";

/// Module name the host imports live under.
pub const HOST_MODULE: &str = "env";
/// `host_fs(ptr: i32, len: i32) -> i64`
pub const HOST_FS: &str = "host_fs";
/// `host_http(ptr: i32, len: i32) -> i64`
pub const HOST_HTTP: &str = "host_http";

/// Packs an offset and a length into the return value of an export.
pub const fn pack(offset: u32, len: u32) -> u64 {
    ((len as u64) << 32) | offset as u64
}

/// Splits a packed value into `(offset, len)`. Returns `None` for the null
/// offset.
pub const fn unpack(packed: u64) -> Option<(u32, u32)> {
    let offset = (packed & 0xFFFF_FFFF) as u32;
    let len = (packed >> 32) as u32;
    if offset == 0 { None } else { Some((offset, len)) }
}

/// The i64 a wasm function returns, reinterpreted.
pub const fn pack_i64(offset: u32, len: u32) -> i64 {
    pack(offset, len) as i64
}

pub const fn unpack_i64(packed: i64) -> Option<(u32, u32)> {
    unpack(packed as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_offset_is_none() {
        assert_eq!(unpack(0), None);
        assert_eq!(unpack(pack(0, 42)), None);
    }

    #[test]
    fn length_lives_in_the_high_half() {
        let packed = pack(0x10, 0x20);
        assert_eq!(packed, 0x0000_0020_0000_0010);
        assert_eq!(unpack(packed), Some((0x10, 0x20)));
    }

    #[test]
    fn high_bit_lengths_survive_i64() {
        let packed = pack_i64(8, u32::MAX);
        assert!(packed < 0);
        assert_eq!(unpack_i64(packed), Some((8, u32::MAX)));
    }
}
