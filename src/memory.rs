//! Memory access contract for the debuggee address space
//!
//! The inspection engine never touches target memory directly. All reads
//! go through the [`MemoryView`] trait, which the embedding debugger front
//! end implements on top of whatever transport it has (ptrace, gdbserver,
//! a core file). Reads are byte-exact: a short read is an error, not a
//! truncated success.

use crate::error::Result;

/// Read-only window into the debuggee's memory.
pub trait MemoryView {
    /// Size of a data pointer in the debuggee, in bytes (typically 4 or 8).
    fn ptr_size(&self) -> usize;

    /// Read exactly `size` bytes starting at `address`.
    ///
    /// Implementations must return [`ValViewError::MemoryAccess`] when any
    /// part of the range is unreadable.
    ///
    /// [`ValViewError::MemoryAccess`]: crate::error::ValViewError::MemoryAccess
    fn read_memory(&mut self, address: u64, size: usize) -> Result<Vec<u8>>;

    /// Read a pointer-sized little-endian unsigned integer at `address`.
    fn read_pointer_at(&mut self, address: u64) -> Result<u64> {
        let size = self.ptr_size();
        let bytes = self.read_memory(address, size)?;
        Ok(extract_pointer(&bytes, size))
    }
}

/// Decode a little-endian unsigned integer of `size` bytes from the front
/// of `bytes`. `size` is at most 8.
pub fn extract_pointer(bytes: &[u8], size: usize) -> u64 {
    let mut buf = [0u8; 8];
    let n = size.min(8).min(bytes.len());
    buf[..n].copy_from_slice(&bytes[..n]);
    u64::from_le_bytes(buf)
}

/// Decode a little-endian signed or unsigned integer of `size` bytes.
///
/// Values wider than 8 bytes keep only the low 16 bytes, matching the
/// widest integral type any supported target exposes.
pub fn extract_integer(bytes: &[u8], size: usize, signed: bool) -> i128 {
    let mut buf = [0u8; 16];
    let n = size.min(16).min(bytes.len());
    buf[..n].copy_from_slice(&bytes[..n]);
    let raw = i128::from_le_bytes(buf);
    if n == 16 || n == 0 {
        return raw;
    }
    let shift = (16 - n) * 8;
    if signed {
        (raw << shift) >> shift
    } else {
        ((raw as u128) << shift >> shift) as i128
    }
}

/// Decode a little-endian IEEE float of 4 or 8 bytes.
pub fn extract_float(bytes: &[u8], size: usize) -> Option<f64> {
    match size {
        4 if bytes.len() >= 4 => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&bytes[..4]);
            Some(f32::from_le_bytes(buf) as f64)
        }
        8 if bytes.len() >= 8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[..8]);
            Some(f64::from_le_bytes(buf))
        }
        _ => None,
    }
}
