//! Sector ids, allocation-table sentinels and chain traversal.

use crate::CfbError;

/// Index of a sector in the FAT or of a mini sector in the MiniFAT.
pub type SectorId = u32;

/// Ordered list of sectors making up one stream (or table).
pub type SectorChain = Vec<SectorId>;

/// Largest id that refers to a real sector.
pub const MAXREGSECT: SectorId = 0xFFFF_FFFA;
/// FAT entry of a sector that stores DIFAT (MSAT overflow) data.
pub const DIFSECT: SectorId = 0xFFFF_FFFC;
/// FAT entry of a sector that stores FAT data.
pub const FATSECT: SectorId = 0xFFFF_FFFD;
/// Terminates a sector chain.
pub const ENDOFCHAIN: SectorId = 0xFFFF_FFFE;
/// Unallocated sector.
pub const FREESECT: SectorId = 0xFFFF_FFFF;

/// Returns `true` if `id` addresses a real sector rather than a sentinel.
pub fn is_regular_sector(id: SectorId) -> bool {
    id <= MAXREGSECT
}

pub(crate) fn sector_id(index: usize) -> Result<SectorId, CfbError> {
    SectorId::try_from(index)
        .ok()
        .filter(|id| is_regular_sector(*id))
        .ok_or_else(|| CfbError::invariant(format!("sector index {index:#x} exceeds MAXREGSECT")))
}

/// Walk `table` from `start` until `ENDOFCHAIN`.
///
/// A chain that reaches a sentinel other than `ENDOFCHAIN`, leaves the table, or would cover
/// the whole table (a cycle) is malformed, so a returned chain is always shorter than `table`.
pub fn follow_chain(start: SectorId, table: &[SectorId]) -> Result<SectorChain, CfbError> {
    let mut chain = SectorChain::new();
    let mut current = start;
    while current != ENDOFCHAIN {
        if !is_regular_sector(current) {
            return Err(CfbError::malformed(format!(
                "sector chain starting at {start:#x} reaches special sector {current:#010x} after {} links",
                chain.len()
            )));
        }
        let next = *table.get(current as usize).ok_or_else(|| {
            CfbError::malformed(format!(
                "sector {current:#x} in chain starting at {start:#x} lies outside the allocation table ({} entries)",
                table.len()
            ))
        })?;
        // Every real table holds at least one slot outside any chain (FATSECT, or MiniFAT
        // padding), so a chain as long as its table has looped.
        if chain.len() + 1 >= table.len() {
            return Err(CfbError::malformed(format!(
                "sector chain starting at {start:#x} does not terminate (cycle through {current:#x})"
            )));
        }
        chain.push(current);
        current = next;
    }
    Ok(chain)
}

pub(crate) fn decode_table(bytes: &[u8]) -> impl Iterator<Item = SectorId> + '_ {
    bytes
        .chunks_exact(4)
        .map(|raw| u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

pub(crate) fn encode_table(entries: &[SectorId]) -> Vec<u8> {
    entries.iter().flat_map(|id| id.to_le_bytes()).collect()
}
