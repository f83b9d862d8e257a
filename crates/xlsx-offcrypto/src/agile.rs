//! Agile encryption: iterated password hashing, key unwrapping, HMAC integrity and per-segment
//! AES-CBC decryption of the package.

use zeroize::Zeroizing;

use crate::agile_xml::{AgileCipherParams, AgileEncryptionInfo};
use crate::crypto::{
    aes_cbc_decrypt, aes_cbc_decrypt_in_place, ct_eq, derive_iv, derive_key, hmac,
    password_utf16le, HashAlgorithm,
};
use crate::package::{EncryptedPackage, SEGMENT_LEN};
use crate::{DecryptOptions, OffcryptoError};

pub(crate) const BLOCK_VERIFIER_HASH_INPUT: [u8; 8] = [0xFE, 0xA7, 0xD2, 0x76, 0x3B, 0x4B, 0x9E, 0x79];
pub(crate) const BLOCK_VERIFIER_HASH_VALUE: [u8; 8] = [0xD7, 0xAA, 0x0F, 0x6D, 0x30, 0x61, 0x34, 0x4E];
pub(crate) const BLOCK_KEY_VALUE: [u8; 8] = [0x14, 0x6E, 0x0B, 0xE7, 0xAB, 0xAC, 0xD0, 0xD6];
pub(crate) const BLOCK_HMAC_KEY: [u8; 8] = [0x5F, 0xB2, 0xAD, 0x01, 0x0C, 0xB9, 0xE1, 0xF6];
pub(crate) const BLOCK_HMAC_VALUE: [u8; 8] = [0xA0, 0x67, 0x7F, 0x02, 0xB2, 0x2C, 0x84, 0x33];

/// `H0 = Hash(salt ‖ password)`, then `Hn = Hash(LE32(n-1) ‖ Hn-1)` for `spin_count` rounds.
pub fn hash_password(
    hash: HashAlgorithm,
    salt: &[u8],
    password: &str,
    spin_count: u32,
) -> Zeroizing<Vec<u8>> {
    let password = password_utf16le(password);
    let mut h = Zeroizing::new(hash.digest_parts(&[salt, &password[..]]));
    for round in 0..spin_count {
        let next = Zeroizing::new(hash.digest_parts(&[&round.to_le_bytes(), &h[..]]));
        h.copy_from_slice(&next);
    }
    h
}

fn require_aes_cbc(params: &AgileCipherParams, element: &str) -> Result<(), OffcryptoError> {
    if params.is_aes_cbc() {
        return Ok(());
    }
    Err(OffcryptoError::Unsupported(format!(
        "{element} cipher {} with {}",
        params.cipher_algorithm, params.cipher_chaining
    )))
}

fn prefix<'a>(bytes: &'a [u8], len: usize, what: &str) -> Result<&'a [u8], OffcryptoError> {
    bytes.get(..len).ok_or_else(|| {
        OffcryptoError::malformed(format!(
            "decrypted {what} holds {:#x} bytes, expected at least {len:#x}",
            bytes.len()
        ))
    })
}

/// Unwraps the package key with `password`, optionally checking the password verifier first.
pub fn decrypt_secret_key(
    info: &AgileEncryptionInfo,
    password: &str,
    options: &DecryptOptions,
) -> Result<Zeroizing<Vec<u8>>, OffcryptoError> {
    let encryptor = &info.password;
    let params = &encryptor.params;
    require_aes_cbc(params, "password key encryptor")?;
    if encryptor.spin_count > options.max_spin_count {
        return Err(OffcryptoError::malformed(format!(
            "spinCount {:#x} exceeds the configured limit {:#x}",
            encryptor.spin_count, options.max_spin_count
        )));
    }

    let h = hash_password(
        params.hash_algorithm,
        &params.salt,
        password,
        encryptor.spin_count,
    );
    let unwrap = |block_key: &[u8], ciphertext: &[u8]| {
        let key = derive_key(params.hash_algorithm, &h, block_key, params.key_len());
        aes_cbc_decrypt(ciphertext, &key, &params.salt).map(Zeroizing::new)
    };

    if options.verify_password {
        let input = unwrap(
            &BLOCK_VERIFIER_HASH_INPUT,
            &encryptor.encrypted_verifier_hash_input,
        )?;
        let value = unwrap(
            &BLOCK_VERIFIER_HASH_VALUE,
            &encryptor.encrypted_verifier_hash_value,
        )?;
        let input = prefix(&input, params.salt_size, "verifier hash input")?;
        let value = prefix(&value, params.hash_size, "verifier hash value")?;
        if !ct_eq(&params.hash_algorithm.digest(input), value) {
            return Err(OffcryptoError::InvalidPassword);
        }
    }

    let key_value = unwrap(&BLOCK_KEY_VALUE, &encryptor.encrypted_key_value)?;
    let key = prefix(&key_value, info.key_data.key_len(), "key value")?;
    Ok(Zeroizing::new(key.to_vec()))
}

/// Checks the `dataIntegrity` HMAC over the complete `EncryptedPackage` stream.
pub fn verify_integrity(
    info: &AgileEncryptionInfo,
    secret_key: &[u8],
    encrypted_package: &[u8],
) -> Result<(), OffcryptoError> {
    let key_data = &info.key_data;
    let unwrap = |block_key: &[u8], ciphertext: &[u8]| {
        let iv = derive_iv(
            key_data.hash_algorithm,
            &key_data.salt,
            block_key,
            key_data.block_size,
        );
        aes_cbc_decrypt(ciphertext, secret_key, &iv).map(Zeroizing::new)
    };

    let hmac_key = unwrap(&BLOCK_HMAC_KEY, &info.data_integrity.encrypted_hmac_key)?;
    let hmac_key = prefix(&hmac_key, key_data.hash_size, "HMAC key")?;
    let expected = unwrap(&BLOCK_HMAC_VALUE, &info.data_integrity.encrypted_hmac_value)?;
    let expected = prefix(&expected, key_data.hash_size, "HMAC value")?;

    let actual = hmac(key_data.hash_algorithm, hmac_key, encrypted_package)?;
    if !ct_eq(&actual, expected) {
        return Err(OffcryptoError::IntegrityCheckFailed);
    }
    Ok(())
}

/// Decrypts the package: segment `i` uses `IV = Hash(keyData.salt ‖ LE32(i))`.
pub fn decrypt_package(
    info: &AgileEncryptionInfo,
    secret_key: &[u8],
    encrypted_package: &[u8],
) -> Result<Vec<u8>, OffcryptoError> {
    let key_data = &info.key_data;
    require_aes_cbc(key_data, "keyData")?;
    let package = EncryptedPackage::parse(encrypted_package)?;
    log::debug!(
        "Agile package: {:#x} bytes in {} segments",
        package.size,
        package.segment_count()
    );

    let mut out = package.ciphertext.to_vec();
    for (index, segment) in out.chunks_mut(SEGMENT_LEN).enumerate() {
        let index = u32::try_from(index).map_err(|_| {
            OffcryptoError::malformed(format!("segment index {index:#x} overflows 32 bits"))
        })?;
        // Segment IVs hash with keyData's algorithm, which may differ from the key encryptor's.
        let iv = derive_iv(
            key_data.hash_algorithm,
            &key_data.salt,
            &index.to_le_bytes(),
            key_data.block_size,
        );
        aes_cbc_decrypt_in_place(secret_key, &iv, segment)?;
    }
    out.truncate(package.size);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::agile_xml::parse_agile_encryption_info_xml;
    use crate::test_support::AgileFixture;

    fn fixture(password: &str, plain: &[u8]) -> (AgileEncryptionInfo, Vec<u8>) {
        let fixture = AgileFixture::sha1_aes128(password, plain);
        let info = parse_agile_encryption_info_xml(fixture.xml.as_bytes()).expect("xml");
        (info, fixture.package)
    }

    #[test]
    fn hash_password_applies_spin_rounds() {
        let zero = hash_password(HashAlgorithm::Sha1, b"salt", "pw", 0);
        let expected = HashAlgorithm::Sha1.digest_parts(&[b"salt".as_slice(), &[b'p', 0, b'w', 0]]);
        assert_eq!(&zero[..], &expected[..]);

        let one = hash_password(HashAlgorithm::Sha1, b"salt", "pw", 1);
        let expected_one = HashAlgorithm::Sha1.digest_parts(&[&0u32.to_le_bytes(), expected.as_slice()]);
        assert_eq!(&one[..], &expected_one[..]);
    }

    #[test]
    fn key_data_hash_drives_segment_ivs_independently_of_the_encryptor() {
        let plain: Vec<u8> = (0..5000u32).map(|i| (i * 13) as u8).collect();
        let fixture =
            AgileFixture::aes128_with_hashes("pw", &plain, HashAlgorithm::Sha1, HashAlgorithm::Sha512);
        let info = parse_agile_encryption_info_xml(fixture.xml.as_bytes()).expect("xml");
        assert_eq!(info.password.params.hash_algorithm, HashAlgorithm::Sha1);
        assert_eq!(info.key_data.hash_algorithm, HashAlgorithm::Sha512);

        let key = decrypt_secret_key(&info, "pw", &DecryptOptions::default()).expect("key");
        verify_integrity(&info, &key, &fixture.package).expect("integrity");
        assert_eq!(decrypt_package(&info, &key, &fixture.package).expect("decrypt"), plain);

        // IVs derived with the encryptor's hash instead scramble the first block of every segment.
        let mut wrong = info.clone();
        wrong.key_data.hash_algorithm = HashAlgorithm::Sha1;
        let garbled = decrypt_package(&wrong, &key, &fixture.package).expect("decrypt");
        assert_ne!(&garbled[..16], &plain[..16]);
        assert_eq!(&garbled[16..SEGMENT_LEN], &plain[16..SEGMENT_LEN]);
    }

    #[test]
    fn round_trips_fixture() {
        let plain: Vec<u8> = (0..9000u32).map(|i| (i * 7) as u8).collect();
        let (info, package) = fixture("hunter2", &plain);
        let options = DecryptOptions::default();
        let key = decrypt_secret_key(&info, "hunter2", &options).expect("key");
        verify_integrity(&info, &key, &package).expect("hmac");
        assert_eq!(decrypt_package(&info, &key, &package).expect("decrypt"), plain);
    }

    #[test]
    fn wrong_password_fails_verifier() {
        let (info, _) = fixture("hunter2", b"PK\x03\x04");
        let err = decrypt_secret_key(&info, "hunter3", &DecryptOptions::default())
            .expect_err("wrong password");
        assert!(matches!(err, OffcryptoError::InvalidPassword));
    }

    #[test]
    fn unchecked_wrong_password_is_caught_by_hmac() {
        let (info, package) = fixture("hunter2", b"PK\x03\x04 payload");
        let options = DecryptOptions {
            verify_password: false,
            ..DecryptOptions::default()
        };
        let key = decrypt_secret_key(&info, "hunter3", &options).expect("unchecked key");
        assert!(matches!(
            verify_integrity(&info, &key, &package),
            Err(OffcryptoError::IntegrityCheckFailed)
        ));
    }

    #[test]
    fn tampering_anywhere_in_the_stream_fails_hmac() {
        let (info, package) = fixture("hunter2", &[0x42; 100]);
        let key = decrypt_secret_key(&info, "hunter2", &DecryptOptions::default()).expect("key");
        for offset in [0, 7, 8, package.len() - 1] {
            let mut tampered = package.clone();
            tampered[offset] ^= 0x01;
            assert!(
                matches!(
                    verify_integrity(&info, &key, &tampered),
                    Err(OffcryptoError::IntegrityCheckFailed)
                ),
                "offset {offset}"
            );
        }
    }

    #[test]
    fn spin_count_limit_is_configurable() {
        let (info, _) = fixture("pw", b"x");
        let options = DecryptOptions {
            max_spin_count: info.password.spin_count - 1,
            ..DecryptOptions::default()
        };
        assert!(decrypt_secret_key(&info, "pw", &options)
            .expect_err("limit")
            .is_malformed());
    }

    #[test]
    fn non_cbc_key_data_is_unsupported() {
        let (mut info, package) = fixture("pw", b"x");
        info.key_data.cipher_chaining = "ChainingModeCFB".to_string();
        let err = decrypt_package(&info, &[0u8; 16], &package).expect_err("cfb");
        assert!(err.is_unsupported());
    }
}
