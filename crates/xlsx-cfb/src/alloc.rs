//! FAT, MiniFAT and MSAT maintenance for [`CompoundDocument`].

use crate::document::CompoundDocument;
use crate::header::{INLINE_MSAT_LEN, MINI_SECTOR_LEN};
use crate::sector::{
    encode_table, follow_chain, sector_id, SectorChain, SectorId, DIFSECT, ENDOFCHAIN, FATSECT,
    FREESECT,
};
use crate::store::ByteStore;
use crate::CfbError;

impl<S: ByteStore> CompoundDocument<S> {
    pub(crate) fn entries_per_sector(&self) -> usize {
        self.sector_len() / 4
    }

    /// Byte offset of a regular sector in the store.
    pub(crate) fn sector_offset(&self, id: SectorId) -> Result<u64, CfbError> {
        if !crate::sector::is_regular_sector(id) {
            return Err(CfbError::invariant(format!(
                "sector id {id:#010x} is not a regular sector"
            )));
        }
        Ok((u64::from(id) + 1) * self.sector_len() as u64)
    }

    /// Byte offset of mini sector `id` through the root container `chain`.
    pub(crate) fn mini_sector_offset(
        &self,
        container: &[SectorId],
        id: SectorId,
    ) -> Result<u64, CfbError> {
        let position = u64::from(id) * MINI_SECTOR_LEN as u64;
        let sector_len = self.sector_len() as u64;
        let index = usize::try_from(position / sector_len).unwrap_or(usize::MAX);
        let sector = *container.get(index).ok_or_else(|| {
            CfbError::malformed(format!(
                "mini sector {id:#x} lies beyond the mini stream ({} container sectors)",
                container.len()
            ))
        })?;
        Ok(self.sector_offset(sector)? + position % sector_len)
    }

    pub(crate) fn write_sector(&mut self, id: SectorId, data: &[u8]) -> Result<(), CfbError> {
        if data.len() > self.sector_len() {
            return Err(CfbError::invariant(format!(
                "{} bytes do not fit in one {}-byte sector",
                data.len(),
                self.sector_len()
            )));
        }
        let offset = self.sector_offset(id)?;
        self.store.write_at(offset, data)
    }

    /// Chain of sectors holding the mini stream (empty until the first short stream).
    pub(crate) fn mini_stream_chain(&self) -> Result<SectorChain, CfbError> {
        let root = self.directory.entry(0);
        if root.start_sector == ENDOFCHAIN || root.size == 0 {
            return Ok(SectorChain::new());
        }
        follow_chain(root.start_sector, &self.fat)
    }

    /// Set FAT entry `id` and persist the 4 bytes backing it.
    pub(crate) fn set_fat_entry(&mut self, id: SectorId, value: SectorId) -> Result<(), CfbError> {
        let index = id as usize;
        let per_sector = self.entries_per_sector();
        let fat_sector = *self.msat.get(index / per_sector).ok_or_else(|| {
            CfbError::invariant(format!("FAT entry {id:#x} is not backed by a FAT sector"))
        })?;
        let slot = self.fat.get_mut(index).ok_or_else(|| {
            CfbError::invariant(format!("FAT entry {id:#x} is out of range"))
        })?;
        *slot = value;
        let offset = self.sector_offset(fat_sector)? + ((index % per_sector) * 4) as u64;
        self.store.write_at(offset, &value.to_le_bytes())
    }

    pub(crate) fn set_minifat_entry(
        &mut self,
        id: SectorId,
        value: SectorId,
    ) -> Result<(), CfbError> {
        let index = id as usize;
        let per_sector = self.entries_per_sector();
        let minifat_sector = *self.minifat_sectors.get(index / per_sector).ok_or_else(|| {
            CfbError::invariant(format!("MiniFAT entry {id:#x} is not backed by a MiniFAT sector"))
        })?;
        let slot = self.minifat.get_mut(index).ok_or_else(|| {
            CfbError::invariant(format!("MiniFAT entry {id:#x} is out of range"))
        })?;
        *slot = value;
        let offset = self.sector_offset(minifat_sector)? + ((index % per_sector) * 4) as u64;
        self.store.write_at(offset, &value.to_le_bytes())
    }

    /// Claim the first free sector, growing the FAT when none is left.
    ///
    /// The sector is marked `ENDOFCHAIN` and zero-filled on disk.
    pub(crate) fn allocate_sector(&mut self) -> Result<SectorId, CfbError> {
        loop {
            if let Some(index) = self.fat.iter().position(|entry| *entry == FREESECT) {
                let id = sector_id(index)?;
                self.set_fat_entry(id, ENDOFCHAIN)?;
                let zeros = vec![0u8; self.sector_len()];
                self.write_sector(id, &zeros)?;
                return Ok(id);
            }
            self.grow_fat()?;
        }
    }

    /// Allocate `count` sectors linked into one chain.
    pub(crate) fn allocate_sectors(&mut self, count: usize) -> Result<SectorChain, CfbError> {
        let mut chain = SectorChain::with_capacity(count);
        self.extend_chain(&mut chain, count)?;
        Ok(chain)
    }

    /// Append `count` freshly allocated sectors to `chain`.
    pub(crate) fn extend_chain(
        &mut self,
        chain: &mut SectorChain,
        count: usize,
    ) -> Result<(), CfbError> {
        for _ in 0..count {
            let id = self.allocate_sector()?;
            if let Some(&last) = chain.last() {
                self.set_fat_entry(last, id)?;
            }
            chain.push(id);
        }
        Ok(())
    }

    /// Release every sector of a FAT chain.
    pub(crate) fn free_chain(&mut self, chain: &[SectorId]) -> Result<(), CfbError> {
        for &id in chain {
            self.set_fat_entry(id, FREESECT)?;
        }
        Ok(())
    }

    pub(crate) fn free_mini_chain(&mut self, chain: &[SectorId]) -> Result<(), CfbError> {
        for &id in chain {
            self.set_minifat_entry(id, FREESECT)?;
        }
        Ok(())
    }

    /// Add one FAT sector. The new sector describes itself, so its own slot becomes `FATSECT`.
    fn grow_fat(&mut self) -> Result<(), CfbError> {
        let per_sector = self.entries_per_sector();
        let fat_sector = sector_id(self.fat.len())?;
        self.fat.resize(self.fat.len() + per_sector, FREESECT);
        self.fat[fat_sector as usize] = FATSECT;
        self.msat.push(fat_sector);
        self.header.fat_sector_count += 1;

        let first = (self.msat.len() - 1) * per_sector;
        let raw = encode_table(&self.fat[first..first + per_sector]);
        self.write_sector(fat_sector, &raw)?;

        self.reserve_difat_sectors()?;
        self.write_msat()?;
        self.write_header()?;
        log::debug!(
            "grew FAT to {} sectors ({} entries)",
            self.msat.len(),
            self.fat.len()
        );
        Ok(())
    }

    /// Make sure enough DIFAT sectors exist for the MSAT entries that spill out of the header.
    fn reserve_difat_sectors(&mut self) -> Result<(), CfbError> {
        let per_difat = self.entries_per_sector() - 1;
        let overflow = self.msat.len().saturating_sub(INLINE_MSAT_LEN);
        let required = overflow.div_ceil(per_difat);
        while self.difat_sectors.len() < required {
            let index = self
                .fat
                .iter()
                .position(|entry| *entry == FREESECT)
                .ok_or_else(|| CfbError::invariant("no free FAT slot left for a DIFAT sector"))?;
            let id = sector_id(index)?;
            self.set_fat_entry(id, DIFSECT)?;
            if self.difat_sectors.is_empty() {
                self.header.difat_start = id;
            }
            self.difat_sectors.push(id);
            self.header.difat_sector_count += 1;
        }
        Ok(())
    }

    /// Persist the MSAT: inline part in the header, the rest in the DIFAT chain.
    fn write_msat(&mut self) -> Result<(), CfbError> {
        for (slot, value) in self.header.msat.iter_mut().enumerate() {
            *value = self.msat.get(slot).copied().unwrap_or(FREESECT);
        }

        let per_difat = self.entries_per_sector() - 1;
        let overflow: Vec<SectorId> = self.msat.iter().skip(INLINE_MSAT_LEN).copied().collect();
        let difat_sectors = self.difat_sectors.clone();
        for (index, &sector) in difat_sectors.iter().enumerate() {
            let mut entries: Vec<SectorId> = overflow
                .iter()
                .skip(index * per_difat)
                .take(per_difat)
                .copied()
                .collect();
            entries.resize(per_difat, FREESECT);
            entries.push(difat_sectors.get(index + 1).copied().unwrap_or(ENDOFCHAIN));
            self.write_sector(sector, &encode_table(&entries))?;
        }
        Ok(())
    }

    /// Claim the first free mini sector, growing the MiniFAT and the mini stream as needed.
    pub(crate) fn allocate_mini_sector(&mut self) -> Result<SectorId, CfbError> {
        loop {
            if let Some(index) = self.minifat.iter().position(|entry| *entry == FREESECT) {
                let id = sector_id(index)?;
                self.set_minifat_entry(id, ENDOFCHAIN)?;
                let container = self.ensure_mini_stream_capacity(id)?;
                let offset = self.mini_sector_offset(&container, id)?;
                self.store.write_at(offset, &[0u8; MINI_SECTOR_LEN])?;
                return Ok(id);
            }
            self.grow_minifat()?;
        }
    }

    pub(crate) fn extend_mini_chain(
        &mut self,
        chain: &mut SectorChain,
        count: usize,
    ) -> Result<(), CfbError> {
        for _ in 0..count {
            let id = self.allocate_mini_sector()?;
            if let Some(&last) = chain.last() {
                self.set_minifat_entry(last, id)?;
            }
            chain.push(id);
        }
        Ok(())
    }

    fn grow_minifat(&mut self) -> Result<(), CfbError> {
        let sector = self.allocate_sector()?;
        match self.minifat_sectors.last() {
            Some(&last) => self.set_fat_entry(last, sector)?,
            None => self.header.minifat_start = sector,
        }
        self.minifat_sectors.push(sector);
        self.header.minifat_sector_count += 1;

        let per_sector = self.entries_per_sector();
        self.minifat.resize(self.minifat.len() + per_sector, FREESECT);
        self.write_sector(sector, &encode_table(&vec![FREESECT; per_sector]))?;
        self.write_header()?;
        log::debug!("grew MiniFAT to {} sectors", self.minifat_sectors.len());
        Ok(())
    }

    /// Extend the root container so mini sector `id` is addressable; returns the container chain.
    fn ensure_mini_stream_capacity(&mut self, id: SectorId) -> Result<SectorChain, CfbError> {
        let needed_bytes = (u64::from(id) + 1) * MINI_SECTOR_LEN as u64;
        let needed_sectors = needed_bytes.div_ceil(self.sector_len() as u64) as usize;
        let mut container = self.mini_stream_chain()?;
        if container.len() < needed_sectors {
            let missing = needed_sectors - container.len();
            self.extend_chain(&mut container, missing)?;
        }

        let root = self.directory.entry_mut(0);
        if let Some(&first) = container.first() {
            root.start_sector = first;
        }
        root.size = root.size.max(needed_bytes);
        self.write_directory_entry(0)?;
        Ok(container)
    }
}

#[cfg(test)]
mod tests {
    use crate::header::CfbVersion;
    use crate::sector::{follow_chain, DIFSECT, ENDOFCHAIN, FATSECT, FREESECT};
    use crate::CompoundDocument;

    #[test]
    fn allocations_form_terminated_chains() {
        let mut doc = CompoundDocument::new().expect("doc");
        let chain = doc.allocate_sectors(5).expect("allocate");
        assert_eq!(chain.len(), 5);
        assert_eq!(follow_chain(chain[0], &doc.fat).expect("follow"), chain);
        assert_eq!(doc.fat[chain[4] as usize], ENDOFCHAIN);
        assert_eq!(doc.fat[0], FATSECT);
    }

    #[test]
    fn freed_sectors_are_reused() {
        let mut doc = CompoundDocument::new().expect("doc");
        let chain = doc.allocate_sectors(3).expect("allocate");
        doc.free_chain(&chain).expect("free");
        assert!(chain.iter().all(|id| doc.fat[*id as usize] == FREESECT));
        let again = doc.allocate_sector().expect("allocate");
        assert_eq!(again, chain[0]);
    }

    #[test]
    fn fat_grows_and_spills_into_difat() {
        let mut doc = CompoundDocument::with_version(CfbVersion::V3).expect("doc");
        // 109 inline FAT sectors describe 109 * 128 sectors; go past that.
        let chain = doc.allocate_sectors(109 * 128 + 10).expect("allocate");
        assert!(doc.msat.len() > 109);
        assert_eq!(doc.difat_sectors.len(), 1);
        assert_eq!(doc.fat[doc.difat_sectors[0] as usize], DIFSECT);
        assert_eq!(doc.header.difat_start, doc.difat_sectors[0]);
        assert_eq!(doc.header.fat_sector_count as usize, doc.msat.len());
        for fat_sector in &doc.msat {
            assert_eq!(doc.fat[*fat_sector as usize], FATSECT);
        }
        assert_eq!(follow_chain(chain[0], &doc.fat).expect("follow").len(), chain.len());

        let bytes = doc.into_inner();
        let reopened = CompoundDocument::open(bytes).expect("reopen");
        assert_eq!(reopened.msat.len(), reopened.header.fat_sector_count as usize);
        assert_eq!(follow_chain(chain[0], &reopened.fat).expect("follow").len(), chain.len());
    }

    #[test]
    fn mini_allocation_tracks_root_size() {
        let mut doc = CompoundDocument::new().expect("doc");
        let mut chain = Vec::new();
        doc.extend_mini_chain(&mut chain, 9).expect("mini");
        assert_eq!(chain, (0..9).collect::<Vec<u32>>());
        let root = doc.directory.entry(0);
        assert_eq!(root.size, 9 * 64);
        assert_eq!(doc.mini_stream_chain().expect("container").len(), 2);
        assert_eq!(doc.header.minifat_sector_count, 1);
    }
}
