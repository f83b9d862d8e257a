//! ECMA-376 Standard encryption: SHA-1 key derivation and AES-ECB payload.

use sha1::{Digest, Sha1};
use zeroize::Zeroizing;

use crate::crypto::{aes_ecb_decrypt, aes_ecb_decrypt_in_place, ct_eq, password_utf16le};
use crate::encryption_info::BinaryEncryptionInfo;
use crate::package::{EncryptedPackage, SEGMENT_LEN};
use crate::OffcryptoError;

const SPIN_COUNT: u32 = 50_000;
const SHA1_LEN: usize = 20;

/// Derives the AES key from `password` and the verifier salt.
pub fn derive_key(
    info: &BinaryEncryptionInfo,
    password: &str,
) -> Result<Zeroizing<Vec<u8>>, OffcryptoError> {
    let key_len = info.key_len();
    if key_len == 0 || key_len > 2 * SHA1_LEN {
        return Err(OffcryptoError::malformed(format!(
            "Standard keySize {:#x} cannot be derived from SHA-1",
            info.header.key_size_bits
        )));
    }

    let password = password_utf16le(password);
    let mut h = Zeroizing::new([0u8; SHA1_LEN]);
    h.copy_from_slice(
        &Sha1::new()
            .chain_update(info.verifier.salt)
            .chain_update(&password[..])
            .finalize(),
    );
    for round in 0..SPIN_COUNT {
        let next = Sha1::new()
            .chain_update(round.to_le_bytes())
            .chain_update(&h[..])
            .finalize();
        h.copy_from_slice(&next);
    }
    let h_final = Sha1::new()
        .chain_update(&h[..])
        .chain_update(0u32.to_le_bytes())
        .finalize();

    let mut inner = Zeroizing::new([0x36u8; 64]);
    let mut outer = Zeroizing::new([0x5Cu8; 64]);
    for (i, byte) in h_final.iter().enumerate() {
        inner[i] ^= byte;
        outer[i] ^= byte;
    }
    let mut derived = Zeroizing::new(Vec::with_capacity(2 * SHA1_LEN));
    derived.extend_from_slice(&Sha1::digest(&inner[..]));
    derived.extend_from_slice(&Sha1::digest(&outer[..]));
    derived.truncate(key_len);
    Ok(derived)
}

/// Checks `key` against the stored verifier: `SHA1(D(verifier)) == D(verifierHash)[..20]`.
pub fn verify_password(info: &BinaryEncryptionInfo, key: &[u8]) -> Result<(), OffcryptoError> {
    let verifier = Zeroizing::new(aes_ecb_decrypt(&info.verifier.encrypted_verifier, key)?);
    let verifier_hash = Zeroizing::new(aes_ecb_decrypt(
        &info.verifier.encrypted_verifier_hash,
        key,
    )?);
    let expected = verifier_hash.get(..SHA1_LEN).ok_or_else(|| {
        OffcryptoError::malformed(format!(
            "decrypted verifier hash holds {:#x} bytes, expected at least {SHA1_LEN:#x}",
            verifier_hash.len()
        ))
    })?;
    if !ct_eq(&Sha1::digest(&*verifier), expected) {
        return Err(OffcryptoError::InvalidPassword);
    }
    Ok(())
}

/// Decrypts a Standard `EncryptedPackage` stream with an already derived key.
pub fn decrypt_package(key: &[u8], encrypted_package: &[u8]) -> Result<Vec<u8>, OffcryptoError> {
    let package = EncryptedPackage::parse(encrypted_package)?;
    log::debug!(
        "Standard package: {:#x} bytes in {} segments",
        package.size,
        package.segment_count()
    );
    let mut out = package.ciphertext.to_vec();
    for segment in out.chunks_mut(SEGMENT_LEN) {
        aes_ecb_decrypt_in_place(key, segment)?;
    }
    out.truncate(package.size);
    Ok(out)
}
