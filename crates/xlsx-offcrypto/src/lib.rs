//! MS-OFFCRYPTO decryption of password-protected OOXML packages.
//!
//! An encrypted `.xlsx` is a compound file holding two streams:
//! - `EncryptionInfo`: version header followed by either a binary header/verifier (Standard,
//!   RC4 CryptoAPI, Extensible) or an XML descriptor (Agile)
//! - `EncryptedPackage`: 8-byte plaintext size followed by AES ciphertext of the ZIP package
//!
//! [`decrypt_xlsx`] opens the container, parses `EncryptionInfo` and returns the plaintext ZIP
//! bytes. Standard (AES-ECB) and Agile (AES-CBC with HMAC integrity) are decrypted; RC4 and
//! Extensible containers are recognized and rejected with [`OffcryptoError::Unsupported`].

use std::io::Read;

use xlsx_cfb::{is_compound_file, ByteStore, CompoundDocument};

pub mod agile;
mod agile_xml;
mod crypto;
mod encryption_info;
mod error;
mod package;
mod reader;
pub mod standard;

#[cfg(test)]
mod test_support;

pub use agile_xml::{
    parse_agile_encryption_info_xml, AgileCipherParams, AgileDataIntegrity,
    AgileEncryptionInfo, AgilePasswordKeyEncryptor, MAX_SPIN_COUNT,
};
pub use crypto::HashAlgorithm;
pub use encryption_info::{
    parse_encryption_info, validate_flags, BinaryEncryptionInfo, EncryptionHeader, EncryptionInfo,
    EncryptionScheme, EncryptionVerifier, EncryptionVersionInfo, CALG_AES_128, CALG_AES_192,
    CALG_AES_256, CALG_RC4, CALG_SHA1, FLAG_AES, FLAG_AGILE, FLAG_CRYPTOAPI, FLAG_DOCPROPS,
    FLAG_EXTERNAL,
};
pub use error::OffcryptoError;
pub use package::SEGMENT_LEN;

pub const ENCRYPTION_INFO_STREAM: &str = "/EncryptionInfo";
pub const ENCRYPTED_PACKAGE_STREAM: &str = "/EncryptedPackage";

/// Default for [`DecryptOptions::max_package_size`] (1 GiB).
pub const DEFAULT_MAX_PACKAGE_SIZE: u64 = 1 << 30;

/// Knobs for [`decrypt_xlsx_with_options`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptOptions {
    /// Check the password against the stored verifier and fail with
    /// [`OffcryptoError::InvalidPassword`] instead of returning garbage.
    pub verify_password: bool,
    /// Check the Agile `dataIntegrity` HMAC before decrypting.
    pub verify_integrity: bool,
    /// Agile `spinCount` values above this are refused before any hashing happens.
    pub max_spin_count: u32,
    /// Container streams above this size are refused instead of being read into memory.
    pub max_package_size: u64,
}

impl Default for DecryptOptions {
    fn default() -> Self {
        Self {
            verify_password: true,
            verify_integrity: true,
            max_spin_count: MAX_SPIN_COUNT,
            max_package_size: DEFAULT_MAX_PACKAGE_SIZE,
        }
    }
}

/// Decrypts an encrypted OOXML container with the default [`DecryptOptions`].
pub fn decrypt_xlsx(bytes: &[u8], password: &str) -> Result<Vec<u8>, OffcryptoError> {
    decrypt_xlsx_with_options(bytes, password, DecryptOptions::default())
}

pub fn decrypt_xlsx_with_options(
    bytes: &[u8],
    password: &str,
    options: DecryptOptions,
) -> Result<Vec<u8>, OffcryptoError> {
    let doc = open_container(bytes)?;
    let max = options.max_package_size;
    let encryption_info = read_named_stream(&doc, ENCRYPTION_INFO_STREAM, max)?;
    let encrypted_package = read_named_stream(&doc, ENCRYPTED_PACKAGE_STREAM, max)?;
    decrypt_encrypted_package(&encryption_info, &encrypted_package, password, options)
}

/// Parses `EncryptionInfo` from a container without deriving any keys.
pub fn inspect_encryption_info(bytes: &[u8]) -> Result<EncryptionInfo, OffcryptoError> {
    let doc = open_container(bytes)?;
    parse_encryption_info(&read_named_stream(
        &doc,
        ENCRYPTION_INFO_STREAM,
        DEFAULT_MAX_PACKAGE_SIZE,
    )?)
}

/// `true` when `bytes` is a compound file carrying both encryption streams.
pub fn is_encrypted_ooxml(bytes: &[u8]) -> bool {
    match open_container(bytes) {
        Ok(doc) => {
            doc.stream_len(ENCRYPTION_INFO_STREAM).is_ok()
                && doc.stream_len(ENCRYPTED_PACKAGE_STREAM).is_ok()
        }
        Err(_) => false,
    }
}

/// Decrypts already extracted `EncryptionInfo` and `EncryptedPackage` stream bytes.
pub fn decrypt_encrypted_package(
    encryption_info: &[u8],
    encrypted_package: &[u8],
    password: &str,
    options: DecryptOptions,
) -> Result<Vec<u8>, OffcryptoError> {
    let info = parse_encryption_info(encryption_info)?;
    let len = encrypted_package.len() as u64;
    if len > options.max_package_size {
        return Err(OffcryptoError::StreamTooLarge {
            stream: ENCRYPTED_PACKAGE_STREAM,
            len,
            max: options.max_package_size,
        });
    }
    log::debug!(
        "decrypting {} encryption, EncryptedPackage of {:#x} bytes",
        info.scheme().name(),
        encrypted_package.len()
    );
    match info {
        EncryptionInfo::Standard { info, .. } => {
            let key = standard::derive_key(&info, password)?;
            if options.verify_password {
                standard::verify_password(&info, &key)?;
            }
            standard::decrypt_package(&key, encrypted_package)
        }
        EncryptionInfo::Agile { info, .. } => {
            let key = agile::decrypt_secret_key(&info, password, &options)?;
            if options.verify_integrity {
                agile::verify_integrity(&info, &key, encrypted_package)?;
            }
            agile::decrypt_package(&info, &key, encrypted_package)
        }
        EncryptionInfo::Rc4CryptoApi { info, .. } => Err(OffcryptoError::Unsupported(format!(
            "RC4 CryptoAPI encryption ({}-bit key)",
            info.key_len() * 8
        ))),
        EncryptionInfo::Extensible { info, .. } => Err(OffcryptoError::Unsupported(format!(
            "Extensible encryption (provider `{}`, algorithm {:#010x})",
            info.header.csp_name, info.header.alg_id
        ))),
    }
}

fn open_container(bytes: &[u8]) -> Result<CompoundDocument<&[u8]>, OffcryptoError> {
    if bytes.is_empty() {
        return Err(OffcryptoError::EmptyInput);
    }
    if !is_compound_file(bytes) {
        return Err(OffcryptoError::NotEncrypted);
    }
    Ok(CompoundDocument::from_bytes(bytes)?)
}

/// Reads a whole stream, refusing declared sizes above `max` and never reading past it.
fn read_named_stream<S: ByteStore>(
    doc: &CompoundDocument<S>,
    stream: &'static str,
    max: u64,
) -> Result<Vec<u8>, OffcryptoError> {
    let reader = doc.open_read_stream(stream)?;
    let len = reader.len();
    if len > max {
        return Err(OffcryptoError::StreamTooLarge { stream, len, max });
    }
    let mut out = Vec::new();
    reader.take(max).read_to_end(&mut out)?;
    Ok(out)
}
