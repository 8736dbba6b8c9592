//! Copy-in/copy-out access to guest linear memory.
//!
//! Nothing here hands out a reference into guest memory that outlives the
//! call: reads copy into a fresh `Vec`, writes copy from a host slice into a
//! buffer the guest allocated for us.

use crate::error::PluginHostError;
use wasmtime::{AsContext, AsContextMut, Memory, TypedFunc};

/// Copies `len` bytes at `offset` out of guest memory after checking the
/// range against the current memory size.
pub(crate) fn read_guest(
    store: impl AsContext,
    memory: &Memory,
    plugin: &str,
    offset: u32,
    len: u32,
) -> Result<Vec<u8>, PluginHostError> {
    let data = memory.data(&store);
    let start = offset as usize;
    match start.checked_add(len as usize) {
        Some(end) if end <= data.len() => Ok(data[start..end].to_vec()),
        _ => Err(PluginHostError::OutOfBounds {
            plugin: plugin.to_string(),
            offset,
            len,
            size: data.len(),
        }),
    }
}

/// Reads a `(ptr, len)` pair passed in by the guest as signed i32s.
pub(crate) fn read_guest_args(
    store: impl AsContext,
    memory: &Memory,
    plugin: &str,
    ptr: i32,
    len: i32,
) -> Result<Vec<u8>, PluginHostError> {
    if ptr <= 0 || len < 0 {
        return Err(PluginHostError::OutOfBounds {
            plugin: plugin.to_string(),
            offset: ptr as u32,
            len: len as u32,
            size: memory.data_size(&store),
        });
    }
    read_guest(store, memory, plugin, ptr as u32, len as u32)
}

/// Asks the guest allocator for `bytes.len()` bytes and copies `bytes` in.
/// Returns the `(offset, len)` of the new buffer.
///
/// A trap inside the allocator surfaces as [`PluginHostError::Trap`].
pub(crate) fn write_guest<T: 'static>(
    mut store: impl AsContextMut<Data = T>,
    memory: &Memory,
    alloc: &TypedFunc<i32, i32>,
    plugin: &str,
    bytes: &[u8],
) -> Result<(u32, u32), PluginHostError> {
    let len = i32::try_from(bytes.len()).map_err(|_| PluginHostError::Alloc {
        plugin: plugin.to_string(),
        detail: format!("{} bytes exceeds the 32-bit address space", bytes.len()),
    })?;
    let ptr = alloc
        .call(&mut store, len)
        .map_err(|e| PluginHostError::Trap {
            plugin: plugin.to_string(),
            message: format!("in allocator: {e}"),
        })?;
    if ptr <= 0 {
        return Err(PluginHostError::Alloc {
            plugin: plugin.to_string(),
            detail: format!("returned {ptr} for {len} bytes"),
        });
    }

    let offset = ptr as u32;
    let size = memory.data_size(&store);
    match (offset as usize).checked_add(bytes.len()) {
        Some(end) if end <= size => {}
        _ => {
            return Err(PluginHostError::OutOfBounds {
                plugin: plugin.to_string(),
                offset,
                len: len as u32,
                size,
            });
        }
    }
    memory
        .write(&mut store, offset as usize, bytes)
        .map_err(|e| PluginHostError::Alloc {
            plugin: plugin.to_string(),
            detail: e.to_string(),
        })?;
    Ok((offset, len as u32))
}
