//! Binary `EncryptionInfo` structures and version dispatch.

use crate::agile_xml::{parse_agile_encryption_info_xml, AgileEncryptionInfo};
use crate::reader::{utf16le_until_nul, ByteCursor};
use crate::OffcryptoError;

pub const FLAG_CRYPTOAPI: u32 = 0x04;
pub const FLAG_DOCPROPS: u32 = 0x08;
pub const FLAG_EXTERNAL: u32 = 0x10;
pub const FLAG_AES: u32 = 0x20;
/// Reserved value carried by Agile `EncryptionVersionInfo.flags`.
pub const FLAG_AGILE: u32 = 0x40;

pub const CALG_RC4: u32 = 0x0000_6801;
pub const CALG_AES_128: u32 = 0x0000_660E;
pub const CALG_AES_192: u32 = 0x0000_660F;
pub const CALG_AES_256: u32 = 0x0000_6610;
pub const CALG_SHA1: u32 = 0x0000_8004;

const SALT_LEN: usize = 16;
const SHA1_LEN: u32 = 20;
const ENCRYPTION_HEADER_FIXED_LEN: usize = 8 * 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionVersionInfo {
    pub major: u16,
    pub minor: u16,
    pub flags: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionScheme {
    Rc4,
    Rc4CryptoApi,
    Standard,
    Extensible,
    Agile,
}

impl EncryptionScheme {
    pub fn name(self) -> &'static str {
        match self {
            Self::Rc4 => "RC4",
            Self::Rc4CryptoApi => "RC4 CryptoAPI",
            Self::Standard => "Standard",
            Self::Extensible => "Extensible",
            Self::Agile => "Agile",
        }
    }

    /// Every flags value the scheme may legally carry.
    pub fn legal_flags(self) -> &'static [u32] {
        match self {
            Self::Rc4 => &[],
            Self::Rc4CryptoApi => &[FLAG_CRYPTOAPI, FLAG_CRYPTOAPI | FLAG_DOCPROPS],
            Self::Standard => &[FLAG_CRYPTOAPI | FLAG_AES],
            Self::Extensible => &[FLAG_EXTERNAL],
            Self::Agile => &[FLAG_AGILE],
        }
    }
}

pub fn validate_flags(scheme: EncryptionScheme, flags: u32) -> Result<(), OffcryptoError> {
    if scheme.legal_flags().contains(&flags) {
        return Ok(());
    }
    let legal: Vec<String> = scheme
        .legal_flags()
        .iter()
        .map(|flags| format!("{flags:#04x}"))
        .collect();
    Err(OffcryptoError::malformed(format!(
        "{} encryption flags {flags:#010x} are not one of [{}]",
        scheme.name(),
        legal.join(", ")
    )))
}

/// Binary `EncryptionHeader` shared by the CryptoAPI schemes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionHeader {
    pub flags: u32,
    pub size_extra: u32,
    pub alg_id: u32,
    pub alg_id_hash: u32,
    pub key_size_bits: u32,
    pub provider_type: u32,
    pub reserved1: u32,
    pub reserved2: u32,
    pub csp_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionVerifier {
    pub salt: [u8; SALT_LEN],
    pub encrypted_verifier: [u8; 16],
    pub verifier_hash_size: u32,
    pub encrypted_verifier_hash: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryEncryptionInfo {
    pub header: EncryptionHeader,
    pub verifier: EncryptionVerifier,
}

impl BinaryEncryptionInfo {
    /// Key length in bytes, resolving the "0 means default" conventions.
    pub fn key_len(&self) -> usize {
        match (self.header.alg_id, self.header.key_size_bits) {
            (CALG_RC4, 0) => 40 / 8,
            (0, 0) => 128 / 8,
            (_, bits) => bits as usize / 8,
        }
    }
}

/// A parsed `EncryptionInfo` stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptionInfo {
    Standard {
        version: EncryptionVersionInfo,
        info: BinaryEncryptionInfo,
    },
    Rc4CryptoApi {
        version: EncryptionVersionInfo,
        info: BinaryEncryptionInfo,
    },
    Extensible {
        version: EncryptionVersionInfo,
        info: BinaryEncryptionInfo,
    },
    Agile {
        version: EncryptionVersionInfo,
        info: AgileEncryptionInfo,
    },
}

impl EncryptionInfo {
    pub fn version(&self) -> EncryptionVersionInfo {
        match self {
            Self::Standard { version, .. }
            | Self::Rc4CryptoApi { version, .. }
            | Self::Extensible { version, .. }
            | Self::Agile { version, .. } => *version,
        }
    }

    pub fn scheme(&self) -> EncryptionScheme {
        match self {
            Self::Standard { .. } => EncryptionScheme::Standard,
            Self::Rc4CryptoApi { .. } => EncryptionScheme::Rc4CryptoApi,
            Self::Extensible { .. } => EncryptionScheme::Extensible,
            Self::Agile { .. } => EncryptionScheme::Agile,
        }
    }
}

/// Parses an `EncryptionInfo` stream, dispatching on its version.
///
/// RC4 (1.1) is rejected as soon as its version is read. RC4 CryptoAPI and Extensible
/// containers are parsed and validated in full so callers get a precise description before
/// decryption refuses them.
pub fn parse_encryption_info(bytes: &[u8]) -> Result<EncryptionInfo, OffcryptoError> {
    let mut cursor = ByteCursor::new(bytes);
    let major = cursor.u16("EncryptionVersionInfo.major")?;
    let minor = cursor.u16("EncryptionVersionInfo.minor")?;
    if (major, minor) == (1, 1) {
        return Err(OffcryptoError::Unsupported(
            "RC4 encryption (EncryptionInfo version 1.1)".to_string(),
        ));
    }
    let flags = cursor.u32("EncryptionVersionInfo.flags")?;
    let version = EncryptionVersionInfo {
        major,
        minor,
        flags,
    };
    log::debug!("EncryptionInfo version {major}.{minor}, flags {flags:#x}");

    match (major, minor) {
        (2..=4, 2) => {
            let scheme = if flags & FLAG_AES != 0 {
                EncryptionScheme::Standard
            } else {
                EncryptionScheme::Rc4CryptoApi
            };
            let info = parse_binary(&mut cursor, flags, scheme)?;
            Ok(match scheme {
                EncryptionScheme::Standard => EncryptionInfo::Standard { version, info },
                _ => EncryptionInfo::Rc4CryptoApi { version, info },
            })
        }
        (3 | 4, 3) => {
            let info = parse_binary(&mut cursor, flags, EncryptionScheme::Extensible)?;
            Ok(EncryptionInfo::Extensible { version, info })
        }
        (4, 4) => {
            validate_flags(EncryptionScheme::Agile, flags)?;
            let info = parse_agile_encryption_info_xml(cursor.remaining())?;
            Ok(EncryptionInfo::Agile { version, info })
        }
        _ => Err(OffcryptoError::UnsupportedVersion { major, minor }),
    }
}

fn parse_binary(
    cursor: &mut ByteCursor<'_>,
    version_flags: u32,
    scheme: EncryptionScheme,
) -> Result<BinaryEncryptionInfo, OffcryptoError> {
    validate_flags(scheme, version_flags)?;

    let header_size = cursor.u32("EncryptionInfo.headerSize")? as usize;
    if header_size < ENCRYPTION_HEADER_FIXED_LEN {
        return Err(OffcryptoError::malformed(format!(
            "EncryptionHeader size {header_size:#x} is below its {ENCRYPTION_HEADER_FIXED_LEN:#x} fixed bytes"
        )));
    }
    let header = parse_header(cursor.take(header_size, "EncryptionHeader")?)?;
    if header.flags != version_flags {
        return Err(OffcryptoError::malformed(format!(
            "EncryptionHeader.flags {:#010x} differ from EncryptionVersionInfo.flags {version_flags:#010x}",
            header.flags
        )));
    }
    validate_algorithms(scheme, &header)?;

    let verifier = parse_verifier(cursor, scheme)?;
    if !cursor.remaining().is_empty() {
        log::debug!(
            "ignoring {} trailing bytes after EncryptionVerifier",
            cursor.remaining().len()
        );
    }
    Ok(BinaryEncryptionInfo { header, verifier })
}

fn parse_header(bytes: &[u8]) -> Result<EncryptionHeader, OffcryptoError> {
    let mut cursor = ByteCursor::new(bytes);
    let header = EncryptionHeader {
        flags: cursor.u32("EncryptionHeader.flags")?,
        size_extra: cursor.u32("EncryptionHeader.sizeExtra")?,
        alg_id: cursor.u32("EncryptionHeader.algID")?,
        alg_id_hash: cursor.u32("EncryptionHeader.algIDHash")?,
        key_size_bits: cursor.u32("EncryptionHeader.keySize")?,
        provider_type: cursor.u32("EncryptionHeader.providerType")?,
        reserved1: cursor.u32("EncryptionHeader.reserved1")?,
        reserved2: cursor.u32("EncryptionHeader.reserved2")?,
        csp_name: utf16le_until_nul(cursor.remaining(), "EncryptionHeader.CSPName")?,
    };
    if header.size_extra != 0 {
        return Err(OffcryptoError::malformed(format!(
            "EncryptionHeader.sizeExtra must be 0, found {:#x}",
            header.size_extra
        )));
    }
    if header.reserved2 != 0 {
        return Err(OffcryptoError::malformed(format!(
            "EncryptionHeader.reserved2 must be 0, found {:#x}",
            header.reserved2
        )));
    }
    Ok(header)
}

fn validate_algorithms(
    scheme: EncryptionScheme,
    header: &EncryptionHeader,
) -> Result<(), OffcryptoError> {
    match scheme {
        EncryptionScheme::Standard => {
            let expected_bits = match header.alg_id {
                0 | CALG_AES_128 => 128,
                CALG_AES_192 => 192,
                CALG_AES_256 => 256,
                other => {
                    return Err(OffcryptoError::Unsupported(format!(
                        "Standard encryption algorithm {other:#010x}"
                    )))
                }
            };
            if header.key_size_bits != expected_bits {
                return Err(OffcryptoError::malformed(format!(
                    "keySize {:#x} does not match algorithm {:#010x} ({expected_bits:#x} bits)",
                    header.key_size_bits, header.alg_id
                )));
            }
            check_sha1(header.alg_id_hash)
        }
        EncryptionScheme::Rc4CryptoApi => {
            if !matches!(header.alg_id, 0 | CALG_RC4) {
                return Err(OffcryptoError::malformed(format!(
                    "RC4 CryptoAPI algorithm must be RC4, found {:#010x}",
                    header.alg_id
                )));
            }
            let bits = header.key_size_bits;
            if bits != 0 && !((40..=128).contains(&bits) && bits % 8 == 0) {
                return Err(OffcryptoError::malformed(format!(
                    "RC4 keySize {bits:#x} is outside 0x28..=0x80 or not byte aligned"
                )));
            }
            check_sha1(header.alg_id_hash)
        }
        // Extensible algorithms are defined by an external provider.
        EncryptionScheme::Extensible => Ok(()),
        EncryptionScheme::Rc4 | EncryptionScheme::Agile => Err(OffcryptoError::malformed(
            format!("{} has no binary EncryptionHeader", scheme.name()),
        )),
    }
}

fn check_sha1(alg_id_hash: u32) -> Result<(), OffcryptoError> {
    match alg_id_hash {
        0 | CALG_SHA1 => Ok(()),
        other => Err(OffcryptoError::Unsupported(format!(
            "CryptoAPI hash algorithm {other:#010x}"
        ))),
    }
}

fn parse_verifier(
    cursor: &mut ByteCursor<'_>,
    scheme: EncryptionScheme,
) -> Result<EncryptionVerifier, OffcryptoError> {
    let salt_size = cursor.u32("EncryptionVerifier.saltSize")?;
    if salt_size as usize != SALT_LEN {
        return Err(OffcryptoError::malformed(format!(
            "EncryptionVerifier.saltSize must be {SALT_LEN:#x}, found {salt_size:#x}"
        )));
    }
    let salt: [u8; SALT_LEN] = cursor.array("EncryptionVerifier.salt")?;
    let encrypted_verifier: [u8; 16] = cursor.array("EncryptionVerifier.encryptedVerifier")?;
    if encrypted_verifier == salt {
        return Err(OffcryptoError::malformed(
            "EncryptionVerifier.encryptedVerifier repeats the salt",
        ));
    }
    let verifier_hash_size = cursor.u32("EncryptionVerifier.verifierHashSize")?;
    let hash_len = match scheme {
        EncryptionScheme::Extensible => {
            if verifier_hash_size == 0
                || cursor.remaining().len() < verifier_hash_size as usize
            {
                return Err(OffcryptoError::malformed(format!(
                    "Extensible verifierHashSize {verifier_hash_size:#x} exceeds the {:#x} remaining bytes",
                    cursor.remaining().len()
                )));
            }
            cursor.remaining().len()
        }
        _ => {
            if verifier_hash_size != SHA1_LEN {
                return Err(OffcryptoError::malformed(format!(
                    "EncryptionVerifier.verifierHashSize must be {SHA1_LEN:#x}, found {verifier_hash_size:#x}"
                )));
            }
            // AES pads the SHA-1 digest to two cipher blocks.
            if scheme == EncryptionScheme::Standard {
                32
            } else {
                20
            }
        }
    };
    let encrypted_verifier_hash = cursor
        .take(hash_len, "EncryptionVerifier.encryptedVerifierHash")?
        .to_vec();
    Ok(EncryptionVerifier {
        salt,
        encrypted_verifier,
        verifier_hash_size,
        encrypted_verifier_hash,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) struct BinaryInfoBuilder {
        pub major: u16,
        pub minor: u16,
        pub version_flags: u32,
        pub header_flags: u32,
        pub size_extra: u32,
        pub alg_id: u32,
        pub alg_id_hash: u32,
        pub key_size_bits: u32,
        pub reserved2: u32,
        pub salt: [u8; 16],
        pub encrypted_verifier: [u8; 16],
        pub verifier_hash_size: u32,
        pub encrypted_verifier_hash: Vec<u8>,
    }

    impl BinaryInfoBuilder {
        pub(crate) fn standard() -> Self {
            Self {
                major: 3,
                minor: 2,
                version_flags: 0x24,
                header_flags: 0x24,
                size_extra: 0,
                alg_id: CALG_AES_128,
                alg_id_hash: CALG_SHA1,
                key_size_bits: 128,
                reserved2: 0,
                salt: [0x11; 16],
                encrypted_verifier: [0x22; 16],
                verifier_hash_size: 20,
                encrypted_verifier_hash: vec![0x33; 32],
            }
        }

        pub(crate) fn rc4_cryptoapi() -> Self {
            Self {
                version_flags: 0x04,
                header_flags: 0x04,
                alg_id: CALG_RC4,
                key_size_bits: 128,
                encrypted_verifier_hash: vec![0x33; 20],
                ..Self::standard()
            }
        }

        pub(crate) fn build(&self) -> Vec<u8> {
            let csp: Vec<u8> = "Microsoft Enhanced RSA and AES Cryptographic Provider\0"
                .encode_utf16()
                .flat_map(u16::to_le_bytes)
                .collect();
            let mut header = Vec::new();
            for field in [
                self.header_flags,
                self.size_extra,
                self.alg_id,
                self.alg_id_hash,
                self.key_size_bits,
                0x18,
                0,
                self.reserved2,
            ] {
                header.extend_from_slice(&field.to_le_bytes());
            }
            header.extend_from_slice(&csp);

            let mut out = Vec::new();
            out.extend_from_slice(&self.major.to_le_bytes());
            out.extend_from_slice(&self.minor.to_le_bytes());
            out.extend_from_slice(&self.version_flags.to_le_bytes());
            out.extend_from_slice(&(header.len() as u32).to_le_bytes());
            out.extend_from_slice(&header);
            out.extend_from_slice(&16u32.to_le_bytes());
            out.extend_from_slice(&self.salt);
            out.extend_from_slice(&self.encrypted_verifier);
            out.extend_from_slice(&self.verifier_hash_size.to_le_bytes());
            out.extend_from_slice(&self.encrypted_verifier_hash);
            out
        }
    }

    fn parse(builder: &BinaryInfoBuilder) -> Result<EncryptionInfo, OffcryptoError> {
        parse_encryption_info(&builder.build())
    }

    #[test]
    fn parses_standard_header_and_verifier() {
        let info = parse(&BinaryInfoBuilder::standard()).expect("standard");
        assert_eq!(info.scheme(), EncryptionScheme::Standard);
        let EncryptionInfo::Standard { version, info } = info else {
            panic!("expected Standard");
        };
        assert_eq!((version.major, version.minor, version.flags), (3, 2, 0x24));
        assert_eq!(
            info.header.csp_name,
            "Microsoft Enhanced RSA and AES Cryptographic Provider"
        );
        assert_eq!(info.key_len(), 16);
        assert_eq!(info.verifier.encrypted_verifier_hash.len(), 32);
    }

    #[test]
    fn accepts_all_standard_version_majors() {
        for major in 2..=4 {
            let builder = BinaryInfoBuilder {
                major,
                ..BinaryInfoBuilder::standard()
            };
            assert_eq!(
                parse(&builder).expect("standard").scheme(),
                EncryptionScheme::Standard
            );
        }
    }

    #[test]
    fn standard_key_sizes_follow_algorithm_table() {
        for (alg_id, bits) in [
            (0, 128),
            (CALG_AES_128, 128),
            (CALG_AES_192, 192),
            (CALG_AES_256, 256),
        ] {
            let builder = BinaryInfoBuilder {
                alg_id,
                key_size_bits: bits,
                ..BinaryInfoBuilder::standard()
            };
            parse(&builder).expect("legal pairing");
        }
        let mismatched = BinaryInfoBuilder {
            alg_id: CALG_AES_256,
            key_size_bits: 128,
            ..BinaryInfoBuilder::standard()
        };
        assert!(parse(&mismatched).expect_err("mismatch").is_malformed());

        let rc4_in_standard = BinaryInfoBuilder {
            alg_id: CALG_RC4,
            ..BinaryInfoBuilder::standard()
        };
        assert!(parse(&rc4_in_standard)
            .expect_err("rc4 alg")
            .is_unsupported());
    }

    #[test]
    fn standard_rejects_other_flag_values() {
        for flags in [0x20, 0x2C, 0x34, 0x64, 0x124] {
            let builder = BinaryInfoBuilder {
                version_flags: flags,
                header_flags: flags,
                ..BinaryInfoBuilder::standard()
            };
            let err = parse(&builder).expect_err("illegal flags");
            assert!(err.is_malformed(), "{flags:#x}: {err}");
        }
        let differing = BinaryInfoBuilder {
            header_flags: 0x04,
            ..BinaryInfoBuilder::standard()
        };
        assert!(parse(&differing).expect_err("differ").is_malformed());
    }

    fn single_bit_flips(legal: &'static [u32]) -> impl Iterator<Item = u32> {
        let base = legal.first().copied().unwrap_or(0);
        (0..32)
            .map(move |bit| base ^ (1u32 << bit))
            .filter(move |flags| !legal.contains(flags))
    }

    #[test]
    fn every_single_bit_flip_outside_the_legal_set_is_malformed() {
        let schemes = [
            EncryptionScheme::Rc4,
            EncryptionScheme::Rc4CryptoApi,
            EncryptionScheme::Standard,
            EncryptionScheme::Extensible,
            EncryptionScheme::Agile,
        ];
        for scheme in schemes {
            for legal in scheme.legal_flags() {
                validate_flags(scheme, *legal).expect("legal value");
            }
            let mut checked = 0;
            for flags in single_bit_flips(scheme.legal_flags()) {
                let err = validate_flags(scheme, flags).expect_err("flipped flags");
                assert!(
                    matches!(err, OffcryptoError::Malformed { .. }),
                    "{} {flags:#x}: {err}",
                    scheme.name()
                );
                checked += 1;
            }
            assert!(checked >= 31, "{}: only {checked} flips", scheme.name());
        }
    }

    #[test]
    fn flipped_flags_fail_the_full_parse() {
        let rc4_cryptoapi = BinaryInfoBuilder::rc4_cryptoapi();
        let standard = BinaryInfoBuilder::standard();
        let extensible = BinaryInfoBuilder {
            major: 3,
            minor: 3,
            version_flags: FLAG_EXTERNAL,
            header_flags: FLAG_EXTERNAL,
            ..BinaryInfoBuilder::standard()
        };
        let cases = [
            (&rc4_cryptoapi, EncryptionScheme::Rc4CryptoApi),
            (&standard, EncryptionScheme::Standard),
            (&extensible, EncryptionScheme::Extensible),
        ];
        for (builder, scheme) in cases {
            for flags in single_bit_flips(scheme.legal_flags()) {
                // (x, 2) dispatches on fAES, so a flip may land on the other scheme's legal value.
                let dispatched = match (builder.major, builder.minor) {
                    (_, 2) if flags & FLAG_AES != 0 => EncryptionScheme::Standard,
                    (_, 2) => EncryptionScheme::Rc4CryptoApi,
                    _ => scheme,
                };
                if dispatched.legal_flags().contains(&flags) {
                    continue;
                }
                let flipped = BinaryInfoBuilder {
                    version_flags: flags,
                    header_flags: flags,
                    encrypted_verifier_hash: builder.encrypted_verifier_hash.clone(),
                    ..*builder
                };
                let err = parse(&flipped).expect_err("flipped flags");
                assert!(
                    matches!(err, OffcryptoError::Malformed { .. }),
                    "{} {flags:#x}: {err}",
                    scheme.name()
                );
            }
        }

        for flags in single_bit_flips(EncryptionScheme::Agile.legal_flags()) {
            let mut bytes = vec![4, 0, 4, 0];
            bytes.extend_from_slice(&flags.to_le_bytes());
            bytes.extend_from_slice(b"<encryption/>");
            let err = parse_encryption_info(&bytes).expect_err("flipped agile flags");
            assert!(matches!(err, OffcryptoError::Malformed { .. }), "{flags:#x}: {err}");
        }
    }

    #[test]
    fn reserved_fields_must_be_zero() {
        let size_extra = BinaryInfoBuilder {
            size_extra: 1,
            ..BinaryInfoBuilder::standard()
        };
        assert!(parse(&size_extra).expect_err("sizeExtra").is_malformed());
        let reserved2 = BinaryInfoBuilder {
            reserved2: 7,
            ..BinaryInfoBuilder::standard()
        };
        let err = parse(&reserved2).expect_err("reserved2");
        assert!(err.to_string().contains("0x7"), "{err}");
    }

    #[test]
    fn verifier_checks() {
        let same = BinaryInfoBuilder {
            encrypted_verifier: [0x11; 16],
            ..BinaryInfoBuilder::standard()
        };
        assert!(parse(&same).expect_err("salt reuse").is_malformed());

        let hash_size = BinaryInfoBuilder {
            verifier_hash_size: 32,
            ..BinaryInfoBuilder::standard()
        };
        assert!(parse(&hash_size).expect_err("hash size").is_malformed());

        let short_hash = BinaryInfoBuilder {
            encrypted_verifier_hash: vec![0x33; 20],
            ..BinaryInfoBuilder::standard()
        };
        assert!(matches!(
            parse(&short_hash),
            Err(OffcryptoError::Truncated { .. })
        ));
    }

    #[test]
    fn rc4_cryptoapi_is_parsed_in_full() {
        for flags in [0x04, 0x0C] {
            let builder = BinaryInfoBuilder {
                version_flags: flags,
                header_flags: flags,
                ..BinaryInfoBuilder::rc4_cryptoapi()
            };
            let info = parse(&builder).expect("rc4 cryptoapi");
            assert_eq!(info.scheme(), EncryptionScheme::Rc4CryptoApi);
        }
        let default_bits = BinaryInfoBuilder {
            key_size_bits: 0,
            ..BinaryInfoBuilder::rc4_cryptoapi()
        };
        let EncryptionInfo::Rc4CryptoApi { info, .. } = parse(&default_bits).expect("rc4") else {
            panic!("expected RC4 CryptoAPI");
        };
        assert_eq!(info.key_len(), 5);

        let odd_bits = BinaryInfoBuilder {
            key_size_bits: 44,
            ..BinaryInfoBuilder::rc4_cryptoapi()
        };
        assert!(parse(&odd_bits).expect_err("odd bits").is_malformed());
    }

    #[test]
    fn extensible_takes_remaining_verifier_hash() {
        let builder = BinaryInfoBuilder {
            major: 4,
            minor: 3,
            version_flags: 0x10,
            header_flags: 0x10,
            alg_id: 0xDEAD,
            alg_id_hash: 0xBEEF,
            key_size_bits: 0,
            verifier_hash_size: 20,
            encrypted_verifier_hash: vec![0x44; 48],
            ..BinaryInfoBuilder::standard()
        };
        let EncryptionInfo::Extensible { info, .. } = parse(&builder).expect("extensible") else {
            panic!("expected Extensible");
        };
        assert_eq!(info.verifier.encrypted_verifier_hash.len(), 48);
    }

    #[test]
    fn version_dispatch_rejects_unknown_pairs() {
        let rc4 = [1u8, 0, 1, 0];
        let err = parse_encryption_info(&rc4).expect_err("rc4");
        assert!(err.is_unsupported() && err.to_string().contains("RC4"), "{err}");

        for (major, minor) in [(3u16, 4u16), (5, 2), (4, 5), (1, 2)] {
            let mut bytes = Vec::new();
            bytes.extend_from_slice(&major.to_le_bytes());
            bytes.extend_from_slice(&minor.to_le_bytes());
            bytes.extend_from_slice(&0x24u32.to_le_bytes());
            match parse_encryption_info(&bytes) {
                Err(OffcryptoError::UnsupportedVersion { major: m, minor: n }) => {
                    assert_eq!((m, n), (major, minor))
                }
                other => panic!("{major}.{minor}: unexpected {other:?}"),
            }
        }

        assert!(matches!(
            parse_encryption_info(&[4, 0]),
            Err(OffcryptoError::Truncated { .. })
        ));
    }

    #[test]
    fn agile_version_requires_reserved_flag() {
        let mut bytes = vec![4, 0, 4, 0];
        bytes.extend_from_slice(&0x24u32.to_le_bytes());
        bytes.extend_from_slice(b"<encryption/>");
        assert!(parse_encryption_info(&bytes)
            .expect_err("flags")
            .is_malformed());
    }
}
