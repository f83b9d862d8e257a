//! `std::io` views over a single stream of a [`CompoundDocument`].

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::directory::DirectoryId;
use crate::document::CompoundDocument;
use crate::header::{MINI_SECTOR_LEN, MINI_STREAM_CUTOFF};
use crate::sector::SectorChain;
use crate::store::ByteStore;
use crate::CfbError;

/// Reads one stream, loading at most one (mini) sector at a time.
pub struct StreamReader<'a, S: ByteStore> {
    doc: &'a CompoundDocument<S>,
    chain: SectorChain,
    /// Root container chain, only populated for short streams.
    container: SectorChain,
    short: bool,
    size: u64,
    position: u64,
    buffer: Vec<u8>,
    loaded: Option<usize>,
}

impl<'a, S: ByteStore> StreamReader<'a, S> {
    pub(crate) fn new(doc: &'a CompoundDocument<S>, id: DirectoryId) -> Result<Self, CfbError> {
        let entry = doc.directory.entry(id);
        let size = entry.size;
        let short = size < u64::from(MINI_STREAM_CUTOFF);
        let chain = if size == 0 {
            SectorChain::new()
        } else {
            doc.stream_chain(id, short)?
        };
        let unit = if short { MINI_SECTOR_LEN } else { doc.sector_len() };
        let needed = size.div_ceil(unit as u64);
        if (chain.len() as u64) < needed {
            return Err(CfbError::malformed(format!(
                "stream `{}` of {size:#x} bytes needs {needed} sectors but its chain has {}",
                entry.name,
                chain.len()
            )));
        }
        let container = if short && size > 0 {
            doc.mini_stream_chain()?
        } else {
            SectorChain::new()
        };
        Ok(Self {
            doc,
            chain,
            container,
            short,
            size,
            position: 0,
            buffer: vec![0; unit],
            loaded: None,
        })
    }

    /// Stream size in bytes.
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// `true` when the stream lives in the mini stream.
    pub fn is_short(&self) -> bool {
        self.short
    }

    pub(crate) fn chain(&self) -> &[u32] {
        &self.chain
    }

    fn load(&mut self, index: usize) -> Result<(), CfbError> {
        if self.loaded == Some(index) {
            return Ok(());
        }
        let unit = self.buffer.len();
        let id = *self.chain.get(index).ok_or_else(|| {
            CfbError::malformed(format!("stream sector {index} lies beyond its chain"))
        })?;
        let offset = if self.short {
            self.doc.mini_sector_offset(&self.container, id)?
        } else {
            self.doc.sector_offset(id)?
        };
        // The final sector may be partially backed by the store.
        let available = (self.size - index as u64 * unit as u64).min(unit as u64) as usize;
        self.doc.store.read_at(offset, &mut self.buffer[..available])?;
        self.loaded = Some(index);
        Ok(())
    }
}

impl<S: ByteStore> Read for StreamReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.position >= self.size {
            return Ok(0);
        }
        let unit = self.buffer.len() as u64;
        let index = (self.position / unit) as usize;
        self.load(index)?;
        let within = (self.position % unit) as usize;
        let len = (unit as usize - within)
            .min((self.size - self.position) as usize)
            .min(buf.len());
        buf[..len].copy_from_slice(&self.buffer[within..within + len]);
        self.position += len as u64;
        Ok(len)
    }
}

impl<S: ByteStore> Seek for StreamReader<'_, S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )
        })?;
        self.position = target;
        Ok(target)
    }
}

/// Appends to one stream, buffering up to one sector between chain extensions.
///
/// Data is flushed when the buffer fills, on [`Write::flush`], on [`StreamWriter::finish`]
/// and on drop (where errors can only be logged).
pub struct StreamWriter<'a, S: ByteStore> {
    doc: &'a mut CompoundDocument<S>,
    id: DirectoryId,
    committed: u64,
    buffer: Vec<u8>,
    capacity: usize,
}

impl<'a, S: ByteStore> StreamWriter<'a, S> {
    pub(crate) fn new(doc: &'a mut CompoundDocument<S>, id: DirectoryId) -> Self {
        let capacity = doc.sector_len();
        let committed = doc.directory.entry(id).size;
        Self {
            doc,
            id,
            committed,
            buffer: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Bytes accepted so far, including buffered ones.
    pub fn len(&self) -> u64 {
        self.committed + self.buffer.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `data`, surfacing container errors without the `io::Error` wrapping.
    pub fn write_bytes(&mut self, mut data: &[u8]) -> Result<(), CfbError> {
        while !data.is_empty() {
            if self.buffer.len() == self.capacity {
                self.flush_buffer()?;
            }
            let take = (self.capacity - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];
        }
        Ok(())
    }

    fn flush_buffer(&mut self) -> Result<(), CfbError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.doc
            .append_stream_data(self.id, self.committed, &self.buffer)?;
        self.committed += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }

    /// Flush pending bytes and return the final stream size.
    pub fn finish(mut self) -> Result<u64, CfbError> {
        self.flush_buffer()?;
        Ok(self.committed)
    }
}

impl<S: ByteStore> Write for StreamWriter<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.buffer.len() == self.capacity {
            self.flush_buffer()?;
        }
        let take = (self.capacity - self.buffer.len()).min(buf.len());
        self.buffer.extend_from_slice(&buf[..take]);
        Ok(take)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.flush_buffer()?)
    }
}

impl<S: ByteStore> Drop for StreamWriter<'_, S> {
    fn drop(&mut self) {
        if let Err(err) = self.flush_buffer() {
            log::warn!(
                "dropping {} unflushed bytes of stream `{}`: {err}",
                self.buffer.len(),
                self.doc.directory.tree_path(self.id)
            );
        }
    }
}
