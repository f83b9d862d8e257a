use crate::directory::{
    normalize_path, split_path, validate_name, Directory, DirectoryEntry, DirectoryId, EntryType,
    DIRECTORY_ENTRY_LEN,
};
use crate::header::{
    read_header, write_header, CfbVersion, Header, HEADER_LEN, INLINE_MSAT_LEN, MINI_SECTOR_LEN,
    MINI_STREAM_CUTOFF,
};
use crate::sector::{
    decode_table, follow_chain, is_regular_sector, SectorChain, SectorId, ENDOFCHAIN, FREESECT,
};
use crate::store::ByteStore;
use crate::stream::{StreamReader, StreamWriter};
use crate::CfbError;

/// A compound file over a [`ByteStore`].
///
/// Opening parses the header, MSAT, FAT, MiniFAT and directory eagerly; afterwards every
/// lookup works on the in-memory tables and only stream payloads are read from the store.
/// Writes go through to the store immediately, so [`CompoundDocument::into_inner`] always
/// returns a complete, valid container.
#[derive(Debug)]
pub struct CompoundDocument<S: ByteStore = Vec<u8>> {
    pub(crate) store: S,
    pub(crate) header: Header,
    /// FAT sector ids in table order (inline MSAT followed by DIFAT entries).
    pub(crate) msat: Vec<SectorId>,
    pub(crate) difat_sectors: Vec<SectorId>,
    pub(crate) fat: Vec<SectorId>,
    pub(crate) minifat_sectors: Vec<SectorId>,
    pub(crate) minifat: Vec<SectorId>,
    pub(crate) directory_sectors: Vec<SectorId>,
    pub(crate) directory: Directory,
}

impl CompoundDocument<Vec<u8>> {
    /// An empty version 3 document backed by a growable buffer.
    pub fn new() -> Result<Self, CfbError> {
        Self::with_version(CfbVersion::V3)
    }

    pub fn with_version(version: CfbVersion) -> Result<Self, CfbError> {
        Self::create(Vec::new(), version)
    }
}

impl<'a> CompoundDocument<&'a [u8]> {
    /// Open a container held in a borrowed, read-only buffer.
    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self, CfbError> {
        Self::open(bytes)
    }
}

impl<S: ByteStore> CompoundDocument<S> {
    /// Start a new document in `store`; existing content is overwritten.
    pub fn create(store: S, version: CfbVersion) -> Result<Self, CfbError> {
        let mut doc = Self {
            store,
            header: Header::new(version),
            msat: Vec::new(),
            difat_sectors: Vec::new(),
            fat: Vec::new(),
            minifat_sectors: Vec::new(),
            minifat: Vec::new(),
            directory_sectors: Vec::new(),
            directory: Directory::default(),
        };
        doc.write_header()?;
        if version == CfbVersion::V4 {
            // The header occupies a whole 4096-byte sector; the tail must be zero.
            let padding = vec![0u8; version.sector_len() - HEADER_LEN];
            doc.store.write_at(HEADER_LEN as u64, &padding)?;
        }
        doc.grow_directory()?;
        *doc.directory.entry_mut(0) = DirectoryEntry::root();
        doc.write_directory_entry(0)?;
        Ok(doc)
    }

    /// Parse an existing container.
    pub fn open(store: S) -> Result<Self, CfbError> {
        let size = store.size();
        if size < HEADER_LEN as u64 {
            return Err(CfbError::malformed(format!(
                "file is too small ({size} bytes) to hold a compound file header"
            )));
        }
        let mut raw = [0u8; HEADER_LEN];
        store.read_at(0, &mut raw)?;
        let header = read_header(&raw)?;
        let sector_len = header.sector_len();

        if header.version == CfbVersion::V4 {
            let mut padding = vec![0u8; sector_len - HEADER_LEN];
            store.read_at(HEADER_LEN as u64, &mut padding)?;
            if let Some(offset) = padding.iter().position(|b| *b != 0) {
                return Err(CfbError::malformed(format!(
                    "non-zero byte {:#04x} in version 4 header padding at offset {:#x}",
                    padding[offset],
                    HEADER_LEN + offset
                )));
            }
        }

        let read_sector = |id: SectorId, what: &str| -> Result<Vec<u8>, CfbError> {
            if !is_regular_sector(id) {
                return Err(CfbError::malformed(format!(
                    "{what} refers to special sector {id:#010x}"
                )));
            }
            let mut buf = vec![0u8; sector_len];
            store.read_at((u64::from(id) + 1) * sector_len as u64, &mut buf)?;
            Ok(buf)
        };

        // MSAT: inline entries, then the DIFAT chain.
        let mut msat: Vec<SectorId> = header
            .msat
            .iter()
            .copied()
            .take_while(|id| *id != FREESECT)
            .collect();
        let mut difat_sectors = Vec::new();
        let mut next = header.difat_start;
        for _ in 0..header.difat_sector_count {
            let raw = read_sector(next, "DIFAT chain")?;
            if difat_sectors.contains(&next) {
                return Err(CfbError::malformed(format!(
                    "DIFAT chain revisits sector {next:#x}"
                )));
            }
            difat_sectors.push(next);
            let entries: Vec<SectorId> = decode_table(&raw).collect();
            let (link, ids) = entries
                .split_last()
                .ok_or_else(|| CfbError::malformed("empty DIFAT sector"))?;
            msat.extend(ids.iter().copied().take_while(|id| *id != FREESECT));
            next = *link;
        }
        if msat.len() != header.fat_sector_count as usize {
            return Err(CfbError::malformed(format!(
                "header declares {:#x} FAT sectors but the MSAT lists {:#x}",
                header.fat_sector_count,
                msat.len()
            )));
        }
        if msat.len() > INLINE_MSAT_LEN && difat_sectors.is_empty() {
            return Err(CfbError::malformed("MSAT overflows the header without DIFAT sectors"));
        }

        let mut fat = Vec::with_capacity(msat.len() * sector_len / 4);
        for &id in &msat {
            fat.extend(decode_table(&read_sector(id, "MSAT")?));
        }

        let minifat_sectors = if header.minifat_sector_count == 0 {
            SectorChain::new()
        } else {
            follow_chain(header.minifat_start, &fat)?
        };
        if minifat_sectors.len() != header.minifat_sector_count as usize {
            log::debug!(
                "MiniFAT chain has {} sectors, header declares {}",
                minifat_sectors.len(),
                header.minifat_sector_count
            );
        }
        let mut minifat = Vec::with_capacity(minifat_sectors.len() * sector_len / 4);
        for &id in &minifat_sectors {
            minifat.extend(decode_table(&read_sector(id, "MiniFAT chain")?));
        }

        let directory_sectors = follow_chain(header.directory_start, &fat)?;
        if directory_sectors.is_empty() {
            return Err(CfbError::malformed("directory chain is empty"));
        }
        let mut entries = Vec::with_capacity(directory_sectors.len() * sector_len / DIRECTORY_ENTRY_LEN);
        for &id in &directory_sectors {
            let raw = read_sector(id, "directory chain")?;
            for chunk in raw.chunks_exact(DIRECTORY_ENTRY_LEN) {
                let mut slot = [0u8; DIRECTORY_ENTRY_LEN];
                slot.copy_from_slice(chunk);
                let id = entries.len() as DirectoryId;
                entries.push(DirectoryEntry::decode(id, &slot, header.version)?);
            }
        }
        let directory = Directory::from_entries(entries)?;

        log::debug!(
            "opened compound file v{}: {} FAT sectors, {} MiniFAT sectors, {} directory entries",
            header.version.major(),
            msat.len(),
            minifat_sectors.len(),
            directory.len()
        );

        let doc = Self {
            store,
            header,
            msat,
            difat_sectors,
            fat,
            minifat_sectors,
            minifat,
            directory_sectors,
            directory,
        };
        doc.mini_stream_chain()?;
        Ok(doc)
    }

    pub fn version(&self) -> CfbVersion {
        self.header.version
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub(crate) fn sector_len(&self) -> usize {
        self.header.sector_len()
    }

    /// Give back the backing store.
    pub fn into_inner(self) -> S {
        self.store
    }

    pub fn root_entry(&self) -> &DirectoryEntry {
        self.directory.entry(0)
    }

    /// Entry at `path` (`/` is the root storage).
    pub fn entry(&self, path: &str) -> Option<&DirectoryEntry> {
        self.directory
            .find_entry(path, |_| true)
            .map(|id| self.directory.entry(id))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.directory.find_entry(path, |_| true).is_some()
    }

    /// Size in bytes of the stream at `path`.
    pub fn stream_len(&self, path: &str) -> Result<u64, CfbError> {
        let id = self.find_stream(path)?;
        Ok(self.directory.entry(id).size)
    }

    /// Every entry below the root as `(path, entry)`, storages before their children.
    pub fn entries(&self) -> Vec<(String, DirectoryEntry)> {
        self.directory
            .walk()
            .into_iter()
            .map(|id| (self.directory.tree_path(id), self.directory.entry(id).clone()))
            .collect()
    }

    /// Names of the direct children of the storage at `path`, in sibling order.
    pub fn children(&self, path: &str) -> Result<Vec<String>, CfbError> {
        let storage = self.find_storage(path)?;
        Ok(self
            .directory
            .children(storage)
            .into_iter()
            .map(|id| self.directory.entry(id).name.clone())
            .collect())
    }

    pub(crate) fn find_stream(&self, path: &str) -> Result<DirectoryId, CfbError> {
        self.directory
            .find_entry(path, |kind| kind == EntryType::UserStream)
            .ok_or_else(|| CfbError::NotFound(normalize_path(path)))
    }

    fn find_storage(&self, path: &str) -> Result<DirectoryId, CfbError> {
        self.directory
            .find_entry(path, EntryType::is_storage)
            .ok_or_else(|| CfbError::NotFound(normalize_path(path)))
    }

    /// Open the stream at `path` for reading.
    pub fn open_read_stream(&self, path: &str) -> Result<StreamReader<'_, S>, CfbError> {
        let id = self.find_stream(path)?;
        StreamReader::new(self, id)
    }

    /// Read the whole stream at `path`.
    pub fn read_stream(&self, path: &str) -> Result<Vec<u8>, CfbError> {
        let reader = self.open_read_stream(path)?;
        let short = reader.is_short();
        let unit = self.chain_unit(short) as u64;
        let size = reader.len();
        // Grown per sector: the declared size is only trusted once its sectors were read.
        let mut out = Vec::new();
        let mut chunk = vec![0u8; unit as usize];
        let mut offset = 0u64;
        while offset < size {
            let len = (size - offset).min(unit) as usize;
            self.read_chain_bytes(reader.chain(), short, offset, &mut chunk[..len])?;
            out.extend_from_slice(&chunk[..len]);
            offset += len as u64;
        }
        Ok(out)
    }

    /// Open the stream at `path` for writing, creating it (or truncating it) first.
    pub fn open_write_stream(&mut self, path: &str) -> Result<StreamWriter<'_, S>, CfbError> {
        let id = match self.find_stream(path) {
            Ok(id) => {
                self.truncate_stream(id)?;
                id
            }
            Err(CfbError::NotFound(_)) => self.insert_entry(path, EntryType::UserStream)?,
            Err(err) => return Err(err),
        };
        Ok(StreamWriter::new(self, id))
    }

    /// Replace the content of the stream at `path` with `data`.
    pub fn write_stream(&mut self, path: &str, data: &[u8]) -> Result<(), CfbError> {
        let mut writer = self.open_write_stream(path)?;
        writer.write_bytes(data)?;
        writer.finish()?;
        Ok(())
    }

    /// Create an empty storage at `path`; the parent storage must exist.
    pub fn create_storage(&mut self, path: &str) -> Result<(), CfbError> {
        self.insert_entry(path, EntryType::UserStorage)?;
        Ok(())
    }

    /// Allocate a directory entry for `path` and link it into its parent's tree.
    pub(crate) fn insert_entry(
        &mut self,
        path: &str,
        entry_type: EntryType,
    ) -> Result<DirectoryId, CfbError> {
        let (parent_path, name) = split_path(path).ok_or_else(|| CfbError::InvalidName {
            name: path.to_string(),
            reason: "path has no final component",
        })?;
        validate_name(&name)?;
        let parent = self.find_storage(&parent_path)?;
        if self.directory.find_child(parent, &name).is_some() {
            return Err(CfbError::InvalidName {
                name,
                reason: "an entry with this name already exists",
            });
        }

        let id = match self.directory.first_empty() {
            Some(id) => id,
            None => {
                self.grow_directory()?;
                self.directory
                    .first_empty()
                    .ok_or_else(|| CfbError::invariant("directory grew without free entries"))?
            }
        };
        *self.directory.entry_mut(id) = DirectoryEntry::new(name, entry_type);
        self.directory.tree_insert(parent, id);
        // Rotations may have touched any entry of the parent's tree.
        self.write_directory()?;
        log::debug!(
            "created {entry_type:?} `{}` as directory entry {id}",
            self.directory.tree_path(id)
        );
        Ok(id)
    }

    /// Free a stream's chain and reset it to empty.
    fn truncate_stream(&mut self, id: DirectoryId) -> Result<(), CfbError> {
        let entry = self.directory.entry(id);
        if entry.size > 0 {
            let short = entry.size < u64::from(MINI_STREAM_CUTOFF);
            let table = if short { &self.minifat } else { &self.fat };
            let chain = follow_chain(entry.start_sector, table)?;
            if short {
                self.free_mini_chain(&chain)?;
            } else {
                self.free_chain(&chain)?;
            }
        }
        let entry = self.directory.entry_mut(id);
        entry.size = 0;
        entry.start_sector = ENDOFCHAIN;
        self.write_directory_entry(id)
    }

    /// Chain currently backing stream `id`, using the table selected by `short`.
    pub(crate) fn stream_chain(&self, id: DirectoryId, short: bool) -> Result<SectorChain, CfbError> {
        let entry = self.directory.entry(id);
        if entry.start_sector == ENDOFCHAIN {
            return Ok(SectorChain::new());
        }
        let table = if short { &self.minifat } else { &self.fat };
        follow_chain(entry.start_sector, table)
    }

    /// Append `data` to stream `id`, whose current size must be `offset`.
    pub(crate) fn append_stream_data(
        &mut self,
        id: DirectoryId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), CfbError> {
        let cutoff = u64::from(MINI_STREAM_CUTOFF);
        let current = self.directory.entry(id).size;
        if current != offset {
            return Err(CfbError::invariant(format!(
                "append at {offset:#x} to stream {id} of size {current:#x}"
            )));
        }
        let new_size = offset + data.len() as u64;
        if current > 0 && current < cutoff && new_size >= cutoff {
            self.convert_to_long_stream(id)?;
        }

        let short = new_size < cutoff;
        let unit = self.chain_unit(short) as u64;
        let mut chain = self.stream_chain(id, short)?;
        let needed = new_size.div_ceil(unit) as usize;
        if chain.len() < needed {
            let missing = needed - chain.len();
            if short {
                self.extend_mini_chain(&mut chain, missing)?;
            } else {
                self.extend_chain(&mut chain, missing)?;
            }
            let first = chain.first().copied().unwrap_or(ENDOFCHAIN);
            self.directory.entry_mut(id).start_sector = first;
        }

        self.write_chain_bytes(&chain, short, offset, data)?;
        self.directory.entry_mut(id).size = new_size;
        self.write_directory_entry(id)
    }

    /// Move a short stream into regular sectors and release its mini sectors.
    fn convert_to_long_stream(&mut self, id: DirectoryId) -> Result<(), CfbError> {
        let size = self.directory.entry(id).size;
        let short_chain = self.stream_chain(id, true)?;
        let mut content = vec![0u8; size as usize];
        self.read_chain_bytes(&short_chain, true, 0, &mut content)?;
        self.free_mini_chain(&short_chain)?;

        let needed = size.div_ceil(self.sector_len() as u64) as usize;
        let chain = self.allocate_sectors(needed)?;
        self.write_chain_bytes(&chain, false, 0, &content)?;
        self.directory.entry_mut(id).start_sector = chain.first().copied().unwrap_or(ENDOFCHAIN);
        log::debug!(
            "promoted stream `{}` ({size} bytes) from the mini stream to {} sectors",
            self.directory.tree_path(id),
            chain.len()
        );
        Ok(())
    }

    fn chain_unit(&self, short: bool) -> usize {
        if short {
            MINI_SECTOR_LEN
        } else {
            self.sector_len()
        }
    }

    /// Store offset of byte `position` of a stream laid out on `chain`.
    fn chain_offset(
        &self,
        chain: &[SectorId],
        container: &[SectorId],
        short: bool,
        position: u64,
    ) -> Result<(u64, usize), CfbError> {
        let unit = self.chain_unit(short);
        let index = (position / unit as u64) as usize;
        let within = (position % unit as u64) as usize;
        let id = *chain.get(index).ok_or_else(|| {
            CfbError::malformed(format!(
                "offset {position:#x} lies beyond a {}-sector chain",
                chain.len()
            ))
        })?;
        let base = if short {
            self.mini_sector_offset(container, id)?
        } else {
            self.sector_offset(id)?
        };
        Ok((base + within as u64, unit - within))
    }

    pub(crate) fn read_chain_bytes(
        &self,
        chain: &[SectorId],
        short: bool,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<(), CfbError> {
        let container = if short { self.mini_stream_chain()? } else { SectorChain::new() };
        let mut done = 0;
        while done < buf.len() {
            let (at, room) = self.chain_offset(chain, &container, short, offset + done as u64)?;
            let len = room.min(buf.len() - done);
            self.store.read_at(at, &mut buf[done..done + len])?;
            done += len;
        }
        Ok(())
    }

    fn write_chain_bytes(
        &mut self,
        chain: &[SectorId],
        short: bool,
        offset: u64,
        data: &[u8],
    ) -> Result<(), CfbError> {
        let container = if short { self.mini_stream_chain()? } else { SectorChain::new() };
        let mut done = 0;
        while done < data.len() {
            let (at, room) = self.chain_offset(chain, &container, short, offset + done as u64)?;
            let len = room.min(data.len() - done);
            self.store.write_at(at, &data[done..done + len])?;
            done += len;
        }
        Ok(())
    }

    pub(crate) fn write_header(&mut self) -> Result<(), CfbError> {
        let raw = write_header(&self.header);
        self.store.write_at(0, &raw)
    }

    pub(crate) fn write_directory_entry(&mut self, id: DirectoryId) -> Result<(), CfbError> {
        let per_sector = self.sector_len() / DIRECTORY_ENTRY_LEN;
        let index = id as usize;
        let sector = *self.directory_sectors.get(index / per_sector).ok_or_else(|| {
            CfbError::invariant(format!("directory entry {id} is not backed by a sector"))
        })?;
        let offset = self.sector_offset(sector)? + ((index % per_sector) * DIRECTORY_ENTRY_LEN) as u64;
        let raw = self.directory.entry(id).encode();
        self.store.write_at(offset, &raw)
    }

    fn write_directory(&mut self) -> Result<(), CfbError> {
        for id in 0..self.directory.len() {
            self.write_directory_entry(id as DirectoryId)?;
        }
        Ok(())
    }

    /// Append one sector of empty entries to the directory.
    fn grow_directory(&mut self) -> Result<(), CfbError> {
        let sector = self.allocate_sector()?;
        match self.directory_sectors.last() {
            Some(&last) => self.set_fat_entry(last, sector)?,
            None => self.header.directory_start = sector,
        }
        self.directory_sectors.push(sector);
        if self.header.version == CfbVersion::V4 {
            self.header.directory_sector_count += 1;
        }

        let per_sector = self.sector_len() / DIRECTORY_ENTRY_LEN;
        let first = self.directory.len();
        self.directory.grow(per_sector);
        for id in first..self.directory.len() {
            self.write_directory_entry(id as DirectoryId)?;
        }
        self.write_header()?;
        log::debug!("grew directory to {} entries", self.directory.len());
        Ok(())
    }
}
