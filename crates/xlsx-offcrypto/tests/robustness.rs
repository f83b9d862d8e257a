use proptest::prelude::*;

use xlsx_offcrypto::{
    decrypt_encrypted_package, parse_encryption_info, DecryptOptions, EncryptionScheme,
    OffcryptoError, CALG_AES_128, CALG_SHA1,
};

fn minimal_standard_encryption_info_bytes() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&3u16.to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&0x24u32.to_le_bytes()); // flags

    // EncryptionHeader (fixed 8 DWORDs only; CSPName omitted).
    bytes.extend_from_slice(&32u32.to_le_bytes());
    for field in [0x24u32, 0, CALG_AES_128, CALG_SHA1, 128, 0x18, 0, 0] {
        bytes.extend_from_slice(&field.to_le_bytes());
    }

    // EncryptionVerifier
    bytes.extend_from_slice(&16u32.to_le_bytes()); // saltSize
    bytes.extend_from_slice(&[0x01u8; 16]); // salt
    bytes.extend_from_slice(&[0x02u8; 16]); // encryptedVerifier
    bytes.extend_from_slice(&20u32.to_le_bytes()); // verifierHashSize
    bytes.extend_from_slice(&[0x03u8; 32]); // encryptedVerifierHash
    bytes
}

#[test]
fn minimal_standard_header_parses() {
    let info = parse_encryption_info(&minimal_standard_encryption_info_bytes()).expect("parse");
    assert_eq!(info.scheme(), EncryptionScheme::Standard);
}

#[test]
fn truncated_encryption_info_less_than_8_bytes_errors() {
    for len in 0..8 {
        let err = parse_encryption_info(&minimal_standard_encryption_info_bytes()[..len])
            .expect_err("short version header");
        assert!(matches!(err, OffcryptoError::Truncated { .. }), "len {len}: {err:?}");
    }
}

#[test]
fn every_truncation_of_the_verifier_is_malformed() {
    let bytes = minimal_standard_encryption_info_bytes();
    for len in 8..bytes.len() {
        let err = parse_encryption_info(&bytes[..len]).expect_err("truncated");
        assert!(err.is_malformed(), "len {len}: {err:?}");
    }
}

#[test]
fn rc4_and_unknown_versions_are_unsupported() {
    let mut rc4 = minimal_standard_encryption_info_bytes();
    rc4[..4].copy_from_slice(&[1, 0, 1, 0]);
    let err = parse_encryption_info(&rc4).expect_err("rc4");
    assert!(matches!(err, OffcryptoError::Unsupported(ref what) if what.contains("RC4")), "{err:?}");

    let mut future = minimal_standard_encryption_info_bytes();
    future[..4].copy_from_slice(&[5, 0, 5, 0]);
    let err = parse_encryption_info(&future).expect_err("5.5");
    assert!(
        matches!(err, OffcryptoError::UnsupportedVersion { major: 5, minor: 5 }),
        "{err:?}"
    );
    assert!(err.is_unsupported());
}

#[test]
fn mismatched_header_flags_are_malformed() {
    let mut bytes = minimal_standard_encryption_info_bytes();
    // EncryptionHeader.flags drops fAES while the version flags keep it.
    bytes[12..16].copy_from_slice(&0x04u32.to_le_bytes());
    let err = parse_encryption_info(&bytes).expect_err("flags");
    assert!(err.is_malformed(), "{err:?}");
}

#[test]
fn nonzero_size_extra_is_malformed() {
    let mut bytes = minimal_standard_encryption_info_bytes();
    bytes[16..20].copy_from_slice(&1u32.to_le_bytes());
    let err = parse_encryption_info(&bytes).expect_err("sizeExtra");
    assert!(err.to_string().contains("sizeExtra"), "{err}");
}

#[test]
fn standard_key_size_must_match_algorithm() {
    let mut bytes = minimal_standard_encryption_info_bytes();
    bytes[28..32].copy_from_slice(&256u32.to_le_bytes());
    let err = parse_encryption_info(&bytes).expect_err("keySize");
    assert!(err.is_malformed(), "{err:?}");
}

#[test]
fn agile_version_with_broken_xml_is_malformed() {
    let mut bytes = vec![4, 0, 4, 0, 0x40, 0, 0, 0];
    bytes.extend_from_slice(b"<encryption xmlns=\"http://schemas.microsoft.com/office/2006/encryption\">");
    let err = parse_encryption_info(&bytes).expect_err("unterminated xml");
    assert!(err.is_malformed(), "{err:?}");
}

#[test]
fn short_encrypted_package_is_truncated() {
    let info = minimal_standard_encryption_info_bytes();
    let options = DecryptOptions {
        verify_password: false,
        ..DecryptOptions::default()
    };
    let err = decrypt_encrypted_package(&info, &[0u8; 4], "pw", options)
        .expect_err("4-byte EncryptedPackage");
    assert!(matches!(err, OffcryptoError::Truncated { .. }), "{err:?}");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn arbitrary_encryption_info_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let _ = parse_encryption_info(&bytes);
    }

    #[test]
    fn corrupted_standard_info_never_panics(flips in proptest::collection::vec((0usize..104, any::<u8>()), 1..8)) {
        let mut bytes = minimal_standard_encryption_info_bytes();
        for (offset, value) in flips {
            if let Some(byte) = bytes.get_mut(offset) {
                *byte = value;
            }
        }
        let _ = parse_encryption_info(&bytes);
    }

    #[test]
    fn unchecked_standard_decrypt_respects_declared_size(
        size in 0u64..200,
        ciphertext_len in 0usize..256,
    ) {
        let info = minimal_standard_encryption_info_bytes();
        let mut package = size.to_le_bytes().to_vec();
        package.resize(8 + ciphertext_len, 0x5A);
        let options = DecryptOptions {
            verify_password: false,
            ..DecryptOptions::default()
        };
        match decrypt_encrypted_package(&info, &package, "pw", options) {
            Ok(plain) => prop_assert_eq!(plain.len() as u64, size),
            Err(err) => prop_assert!(err.is_malformed(), "{:?}", err),
        }
    }
}
