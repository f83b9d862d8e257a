//! Random-access byte storage backing a compound document.

use std::ops::Range;

use crate::CfbError;

/// A random-access byte container.
///
/// All sector math in this crate is expressed as `read_at`/`write_at` calls, so documents can
/// live in plain memory buffers without emulating seek semantics.
pub trait ByteStore {
    /// Current size of the store in bytes.
    fn size(&self) -> u64;

    /// Fill `buf` with the bytes starting at `offset`.
    ///
    /// Reading past the end of the store is reported as [`CfbError::Malformed`]: every offset
    /// handed to the store is derived from the container's own tables.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), CfbError>;

    /// Write `bytes` at `offset`, growing the store if needed.
    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<(), CfbError>;
}

fn byte_range(offset: u64, len: usize) -> Option<Range<usize>> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(len)?;
    Some(start..end)
}

fn read_slice(data: &[u8], offset: u64, buf: &mut [u8]) -> Result<(), CfbError> {
    let src = byte_range(offset, buf.len())
        .and_then(|range| data.get(range))
        .ok_or_else(|| {
            CfbError::malformed(format!(
                "read of {} bytes at offset {offset:#x} runs past the end of the data ({:#x} bytes)",
                buf.len(),
                data.len()
            ))
        })?;
    buf.copy_from_slice(src);
    Ok(())
}

impl ByteStore for Vec<u8> {
    fn size(&self) -> u64 {
        self.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), CfbError> {
        read_slice(self, offset, buf)
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<(), CfbError> {
        let range = byte_range(offset, bytes.len()).ok_or_else(|| {
            CfbError::invariant(format!(
                "write of {} bytes at offset {offset:#x} overflows the address space",
                bytes.len()
            ))
        })?;
        if range.end > self.len() {
            self.resize(range.end, 0);
        }
        self[range].copy_from_slice(bytes);
        Ok(())
    }
}

impl ByteStore for &[u8] {
    fn size(&self) -> u64 {
        (**self).len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), CfbError> {
        read_slice(self, offset, buf)
    }

    fn write_at(&mut self, _offset: u64, _bytes: &[u8]) -> Result<(), CfbError> {
        Err(CfbError::ReadOnly)
    }
}
