//! Guest-side buffers for the packed-pointer convention.
//!
//! Every buffer crossing the boundary is a byte allocation with alignment 1
//! whose size is the length the other side reports, so `free(ptr, len)` can
//! rebuild its layout. Zero-sized requests get one byte.

use agfs_types::abi;
use std::alloc::Layout;

fn layout(size: i32) -> Option<Layout> {
    let size = usize::try_from(size).ok()?.max(1);
    Layout::from_size_align(size, 1).ok()
}

/// Backs `agfs_alloc`. Returns 0 on failure.
pub fn alloc(size: i32) -> i32 {
    let Some(layout) = layout(size) else {
        return 0;
    };
    // SAFETY: the layout has a non-zero size.
    let ptr = unsafe { std::alloc::alloc(layout) };
    ptr as usize as i32
}

/// Backs `agfs_free`.
///
/// # Safety
///
/// `ptr` must come from [`alloc`] with the same `len`, and must not be used
/// afterwards.
pub unsafe fn free(ptr: i32, len: i32) {
    if ptr == 0 {
        return;
    }
    if let Some(layout) = layout(len) {
        // SAFETY: guaranteed by the caller.
        unsafe { std::alloc::dealloc(ptr as usize as *mut u8, layout) };
    }
}

/// Borrows the request the host wrote for the current call. The host frees
/// it once the export returns.
///
/// # Safety
///
/// `ptr`/`len` must be the arguments the host passed to the running export.
pub unsafe fn request<'a>(ptr: i32, len: i32) -> &'a [u8] {
    if ptr == 0 || len <= 0 {
        return &[];
    }
    // SAFETY: the host wrote `len` bytes at `ptr` inside our memory.
    unsafe { std::slice::from_raw_parts(ptr as usize as *const u8, len as usize) }
}

/// Copies `bytes` into a fresh buffer and returns its packed location. The
/// host reads it and then calls `agfs_free`.
pub fn respond(bytes: &[u8]) -> i64 {
    let Ok(len) = i32::try_from(bytes.len()) else {
        return 0;
    };
    let ptr = alloc(len);
    if ptr == 0 {
        return 0;
    }
    // SAFETY: `alloc` returned at least `len` writable bytes.
    unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as usize as *mut u8, bytes.len()) };
    abi::pack_i64(ptr as u32, len as u32)
}

/// Takes ownership of a reply the host wrote through `agfs_alloc`.
///
/// # Safety
///
/// `offset`/`len` must be the unpacked return value of a host import.
pub unsafe fn take(offset: u32, len: u32) -> Vec<u8> {
    let (ptr, len) = (offset as i32, len as i32);
    // SAFETY: the host allocated this buffer with `agfs_alloc(len)`.
    let bytes = unsafe { request(ptr, len) }.to_vec();
    // SAFETY: as above; nothing else refers to the buffer.
    unsafe { free(ptr, len) };
    bytes
}
