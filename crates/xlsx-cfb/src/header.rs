//! The fixed 512-byte compound file header.

use crate::sector::{SectorId, ENDOFCHAIN, FREESECT};
use crate::CfbError;

pub const HEADER_LEN: usize = 512;
pub const SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
pub const MINOR_VERSION: u16 = 0x003E;
pub const BYTE_ORDER_MARK: u16 = 0xFFFE;
pub const MINI_SECTOR_SHIFT: u16 = 6;
pub const MINI_SECTOR_LEN: usize = 1 << MINI_SECTOR_SHIFT;
/// Streams strictly smaller than this live in the mini stream.
pub const MINI_STREAM_CUTOFF: u32 = 0x1000;
/// Number of MSAT entries stored in the header itself.
pub const INLINE_MSAT_LEN: usize = 109;

const OFFSET_CLSID: usize = 0x08;
const OFFSET_MINOR_VERSION: usize = 0x18;
const OFFSET_MAJOR_VERSION: usize = 0x1A;
const OFFSET_BYTE_ORDER: usize = 0x1C;
const OFFSET_SECTOR_SHIFT: usize = 0x1E;
const OFFSET_MINI_SECTOR_SHIFT: usize = 0x20;
const OFFSET_RESERVED: usize = 0x22;
const OFFSET_DIRECTORY_SECTORS: usize = 0x28;
const OFFSET_FAT_SECTORS: usize = 0x2C;
const OFFSET_DIRECTORY_START: usize = 0x30;
const OFFSET_TRANSACTION: usize = 0x34;
const OFFSET_CUTOFF: usize = 0x38;
const OFFSET_MINIFAT_START: usize = 0x3C;
const OFFSET_MINIFAT_SECTORS: usize = 0x40;
const OFFSET_DIFAT_START: usize = 0x44;
const OFFSET_DIFAT_SECTORS: usize = 0x48;
const OFFSET_MSAT: usize = 0x4C;

/// Major format version; selects the sector size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CfbVersion {
    /// 512-byte sectors.
    #[default]
    V3,
    /// 4096-byte sectors.
    V4,
}

impl CfbVersion {
    pub fn from_major(major: u16) -> Option<Self> {
        match major {
            3 => Some(CfbVersion::V3),
            4 => Some(CfbVersion::V4),
            _ => None,
        }
    }

    pub fn major(self) -> u16 {
        match self {
            CfbVersion::V3 => 3,
            CfbVersion::V4 => 4,
        }
    }

    pub fn sector_shift(self) -> u16 {
        match self {
            CfbVersion::V3 => 9,
            CfbVersion::V4 => 12,
        }
    }

    pub fn sector_len(self) -> usize {
        1 << self.sector_shift()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub minor_version: u16,
    pub version: CfbVersion,
    /// Always zero for version 3 files.
    pub directory_sector_count: u32,
    pub fat_sector_count: u32,
    pub directory_start: SectorId,
    pub transaction_signature: u32,
    pub minifat_start: SectorId,
    pub minifat_sector_count: u32,
    pub difat_start: SectorId,
    pub difat_sector_count: u32,
    pub msat: [SectorId; INLINE_MSAT_LEN],
}

impl Header {
    /// Header of an empty document: no FAT, no directory, no mini stream.
    pub fn new(version: CfbVersion) -> Self {
        Self {
            minor_version: MINOR_VERSION,
            version,
            directory_sector_count: 0,
            fat_sector_count: 0,
            directory_start: ENDOFCHAIN,
            transaction_signature: 0,
            minifat_start: ENDOFCHAIN,
            minifat_sector_count: 0,
            difat_start: ENDOFCHAIN,
            difat_sector_count: 0,
            msat: [FREESECT; INLINE_MSAT_LEN],
        }
    }

    pub fn sector_len(&self) -> usize {
        self.version.sector_len()
    }
}

fn u16_at(raw: &[u8; HEADER_LEN], offset: usize) -> u16 {
    u16::from_le_bytes([raw[offset], raw[offset + 1]])
}

fn u32_at(raw: &[u8; HEADER_LEN], offset: usize) -> u32 {
    u32::from_le_bytes([raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]])
}

fn put_u16(raw: &mut [u8; HEADER_LEN], offset: usize, value: u16) {
    raw[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(raw: &mut [u8; HEADER_LEN], offset: usize, value: u32) {
    raw[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Parse and validate the 512-byte header.
pub fn read_header(raw: &[u8; HEADER_LEN]) -> Result<Header, CfbError> {
    if raw[..8] != SIGNATURE {
        let mut signature = [0u8; 8];
        signature.copy_from_slice(&raw[..8]);
        return Err(CfbError::malformed(format!(
            "invalid header signature {:#018x}",
            u64::from_le_bytes(signature)
        )));
    }

    let clsid = &raw[OFFSET_CLSID..OFFSET_CLSID + 16];
    if clsid.iter().any(|b| *b != 0) {
        return Err(CfbError::malformed(format!(
            "header CLSID is not zero: {}",
            clsid.iter().map(|b| format!("{b:02x}")).collect::<String>()
        )));
    }

    let minor_version = u16_at(raw, OFFSET_MINOR_VERSION);
    let major_version = u16_at(raw, OFFSET_MAJOR_VERSION);
    let version = CfbVersion::from_major(major_version).ok_or_else(|| {
        CfbError::malformed(format!("unsupported major version {major_version:#06x}"))
    })?;
    if minor_version != MINOR_VERSION {
        log::debug!("unusual compound file minor version {minor_version:#06x}");
    }

    let byte_order = u16_at(raw, OFFSET_BYTE_ORDER);
    if byte_order != BYTE_ORDER_MARK {
        return Err(CfbError::malformed(format!(
            "invalid byte order marker {byte_order:#06x}"
        )));
    }

    let sector_shift = u16_at(raw, OFFSET_SECTOR_SHIFT);
    if sector_shift != version.sector_shift() {
        return Err(CfbError::malformed(format!(
            "sector shift {sector_shift:#06x} does not match major version {major_version}"
        )));
    }

    let mini_sector_shift = u16_at(raw, OFFSET_MINI_SECTOR_SHIFT);
    if mini_sector_shift != MINI_SECTOR_SHIFT {
        return Err(CfbError::malformed(format!(
            "invalid mini sector shift {mini_sector_shift:#06x}"
        )));
    }

    if raw[OFFSET_RESERVED..OFFSET_DIRECTORY_SECTORS]
        .iter()
        .any(|b| *b != 0)
    {
        return Err(CfbError::malformed("reserved header bytes are not zero"));
    }

    let directory_sector_count = u32_at(raw, OFFSET_DIRECTORY_SECTORS);
    if version == CfbVersion::V3 && directory_sector_count != 0 {
        return Err(CfbError::malformed(format!(
            "version 3 header declares {directory_sector_count:#x} directory sectors (must be 0)"
        )));
    }

    let cutoff = u32_at(raw, OFFSET_CUTOFF);
    if cutoff != MINI_STREAM_CUTOFF {
        return Err(CfbError::malformed(format!(
            "invalid mini stream cutoff {cutoff:#x}"
        )));
    }

    let mut msat = [FREESECT; INLINE_MSAT_LEN];
    for (index, slot) in msat.iter_mut().enumerate() {
        *slot = u32_at(raw, OFFSET_MSAT + index * 4);
    }

    Ok(Header {
        minor_version,
        version,
        directory_sector_count,
        fat_sector_count: u32_at(raw, OFFSET_FAT_SECTORS),
        directory_start: u32_at(raw, OFFSET_DIRECTORY_START),
        transaction_signature: u32_at(raw, OFFSET_TRANSACTION),
        minifat_start: u32_at(raw, OFFSET_MINIFAT_START),
        minifat_sector_count: u32_at(raw, OFFSET_MINIFAT_SECTORS),
        difat_start: u32_at(raw, OFFSET_DIFAT_START),
        difat_sector_count: u32_at(raw, OFFSET_DIFAT_SECTORS),
        msat,
    })
}

/// Serialize `header`; the exact inverse of [`read_header`].
pub fn write_header(header: &Header) -> [u8; HEADER_LEN] {
    let mut raw = [0u8; HEADER_LEN];
    raw[..8].copy_from_slice(&SIGNATURE);
    put_u16(&mut raw, OFFSET_MINOR_VERSION, header.minor_version);
    put_u16(&mut raw, OFFSET_MAJOR_VERSION, header.version.major());
    put_u16(&mut raw, OFFSET_BYTE_ORDER, BYTE_ORDER_MARK);
    put_u16(&mut raw, OFFSET_SECTOR_SHIFT, header.version.sector_shift());
    put_u16(&mut raw, OFFSET_MINI_SECTOR_SHIFT, MINI_SECTOR_SHIFT);
    put_u32(&mut raw, OFFSET_DIRECTORY_SECTORS, header.directory_sector_count);
    put_u32(&mut raw, OFFSET_FAT_SECTORS, header.fat_sector_count);
    put_u32(&mut raw, OFFSET_DIRECTORY_START, header.directory_start);
    put_u32(&mut raw, OFFSET_TRANSACTION, header.transaction_signature);
    put_u32(&mut raw, OFFSET_CUTOFF, MINI_STREAM_CUTOFF);
    put_u32(&mut raw, OFFSET_MINIFAT_START, header.minifat_start);
    put_u32(&mut raw, OFFSET_MINIFAT_SECTORS, header.minifat_sector_count);
    put_u32(&mut raw, OFFSET_DIFAT_START, header.difat_start);
    put_u32(&mut raw, OFFSET_DIFAT_SECTORS, header.difat_sector_count);
    for (index, id) in header.msat.iter().enumerate() {
        put_u32(&mut raw, OFFSET_MSAT + index * 4, *id);
    }
    raw
}
