//! Compound File Binary (MS-CFB, "OLE2 structured storage") reader and writer.
//!
//! Encrypted OOXML files (`.xlsx`, `.docx`, ...) are shipped inside a CFB container holding an
//! `EncryptionInfo` and an `EncryptedPackage` stream. This crate parses and produces such
//! containers entirely in memory:
//!
//! ```
//! use std::io::Read;
//! use xlsx_cfb::CompoundDocument;
//!
//! let mut doc = CompoundDocument::new()?;
//! doc.write_stream("EncryptionInfo", b"\x04\x00\x04\x00")?;
//! let bytes = doc.into_inner();
//!
//! let doc = CompoundDocument::from_bytes(&bytes)?;
//! let mut stream = doc.open_read_stream("/EncryptionInfo")?;
//! let mut out = Vec::new();
//! stream.read_to_end(&mut out)?;
//! assert_eq!(out, b"\x04\x00\x04\x00");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod alloc;
mod directory;
mod document;
mod error;
mod header;
mod sector;
mod store;
mod stream;

pub use directory::{
    compare_names, validate_name, validate_name_len, Color, DirectoryEntry, DirectoryId,
    EntryType, DIRECTORY_ENTRY_LEN, MAXREGSID, NOSTREAM,
};
pub use document::CompoundDocument;
pub use error::CfbError;
pub use header::{
    read_header, write_header, CfbVersion, Header, HEADER_LEN, MINI_SECTOR_LEN,
    MINI_STREAM_CUTOFF, SIGNATURE,
};
pub use sector::{
    follow_chain, is_regular_sector, SectorChain, SectorId, DIFSECT, ENDOFCHAIN, FATSECT,
    FREESECT, MAXREGSECT,
};
pub use store::ByteStore;
pub use stream::{StreamReader, StreamWriter};

/// Returns `true` if `bytes` starts with the compound file signature.
pub fn is_compound_file(bytes: &[u8]) -> bool {
    bytes.starts_with(&SIGNATURE)
}
