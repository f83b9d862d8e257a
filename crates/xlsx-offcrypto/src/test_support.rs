//! Encryptors used by unit tests to produce Standard and Agile fixtures.

use aes::cipher::{
    block_padding::NoPadding, generic_array::GenericArray, BlockEncrypt, BlockEncryptMut,
    KeyInit, KeyIvInit,
};
use aes::{Aes128, Aes256};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha1::{Digest, Sha1};
use xlsx_cfb::CompoundDocument;

use crate::agile::{
    hash_password, BLOCK_HMAC_KEY, BLOCK_HMAC_VALUE, BLOCK_KEY_VALUE,
    BLOCK_VERIFIER_HASH_INPUT, BLOCK_VERIFIER_HASH_VALUE,
};
use crate::crypto::{derive_iv, derive_key, hmac, HashAlgorithm};
use crate::encryption_info::tests::BinaryInfoBuilder;
use crate::encryption_info::{parse_encryption_info, EncryptionInfo};
use crate::package::SEGMENT_LEN;
use crate::standard;

fn zero_pad(bytes: &[u8]) -> Vec<u8> {
    let mut out = bytes.to_vec();
    out.resize(bytes.len().div_ceil(16) * 16, 0);
    out
}

pub(crate) fn aes_ecb_encrypt(key: &[u8], plain: &[u8]) -> Vec<u8> {
    let mut out = zero_pad(plain);
    let cipher = Aes128::new_from_slice(key).expect("AES-128 key");
    for block in out.chunks_exact_mut(16) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    out
}

pub(crate) fn aes_cbc_encrypt(key: &[u8], iv: &[u8], plain: &[u8]) -> Vec<u8> {
    let mut out = zero_pad(plain);
    let len = out.len();
    match key.len() {
        16 => {
            cbc::Encryptor::<Aes128>::new_from_slices(key, &iv[..16])
                .expect("cbc")
                .encrypt_padded_mut::<NoPadding>(&mut out, len)
                .expect("aligned");
        }
        32 => {
            cbc::Encryptor::<Aes256>::new_from_slices(key, &iv[..16])
                .expect("cbc")
                .encrypt_padded_mut::<NoPadding>(&mut out, len)
                .expect("aligned");
        }
        other => panic!("unsupported test key length {other}"),
    }
    out
}

/// A Standard AES-128 `EncryptionInfo` stream whose verifier matches `password`.
pub(crate) fn standard_encryption_info(password: &str, salt: [u8; 16]) -> Vec<u8> {
    let mut builder = BinaryInfoBuilder {
        salt,
        ..BinaryInfoBuilder::standard()
    };
    let Ok(EncryptionInfo::Standard { info, .. }) = parse_encryption_info(&builder.build()) else {
        panic!("builder output must parse as Standard");
    };
    let key = standard::derive_key(&info, password).expect("key");
    let verifier = [0xC3u8; 16];
    let mut encrypted_verifier = [0u8; 16];
    encrypted_verifier.copy_from_slice(&aes_ecb_encrypt(&key, &verifier));
    builder.encrypted_verifier = encrypted_verifier;
    builder.encrypted_verifier_hash = aes_ecb_encrypt(&key, &Sha1::digest(verifier));
    builder.build()
}

/// Standard `EncryptedPackage` stream: size prefix plus AES-ECB ciphertext.
pub(crate) fn encrypt_standard(key: &[u8], plain: &[u8]) -> Vec<u8> {
    let mut out = (plain.len() as u64).to_le_bytes().to_vec();
    out.extend_from_slice(&aes_ecb_encrypt(key, plain));
    out
}

pub(crate) struct AgileFixture {
    pub(crate) xml: String,
    pub(crate) package: Vec<u8>,
}

impl AgileFixture {
    pub(crate) const SPIN_COUNT: u32 = 1000;

    /// SHA-1 / AES-128 descriptor with a small spin count, plus the matching package.
    pub(crate) fn sha1_aes128(password: &str, plain: &[u8]) -> Self {
        Self::aes128_with_hashes(password, plain, HashAlgorithm::Sha1, HashAlgorithm::Sha1)
    }

    /// AES-128 descriptor whose password key encryptor hashes with `hash` while `keyData`
    /// (segment IVs and the integrity HMAC) uses `data_hash`.
    pub(crate) fn aes128_with_hashes(
        password: &str,
        plain: &[u8],
        hash: HashAlgorithm,
        data_hash: HashAlgorithm,
    ) -> Self {
        let key_data_salt = [0x10u8; 16];
        let password_salt = [0x20u8; 16];
        let secret_key = [0x5Eu8; 16];
        let hmac_key = vec![0x7Au8; data_hash.digest_len()];

        let h = hash_password(hash, &password_salt, password, Self::SPIN_COUNT);
        let wrap = |block_key: &[u8], plain: &[u8]| {
            let key = derive_key(hash, &h, block_key, 16);
            aes_cbc_encrypt(&key, &password_salt, plain)
        };
        let verifier_input = [0x33u8; 16];
        let encrypted_verifier_hash_input = wrap(&BLOCK_VERIFIER_HASH_INPUT, &verifier_input);
        let encrypted_verifier_hash_value =
            wrap(&BLOCK_VERIFIER_HASH_VALUE, &hash.digest(&verifier_input));
        let encrypted_key_value = wrap(&BLOCK_KEY_VALUE, &secret_key);

        let mut package = (plain.len() as u64).to_le_bytes().to_vec();
        for (index, segment) in plain.chunks(SEGMENT_LEN).enumerate() {
            let iv = derive_iv(data_hash, &key_data_salt, &(index as u32).to_le_bytes(), 16);
            package.extend_from_slice(&aes_cbc_encrypt(&secret_key, &iv, segment));
        }

        let hmac_value = hmac(data_hash, &hmac_key, &package).expect("hmac");
        let hmac_key_iv = derive_iv(data_hash, &key_data_salt, &BLOCK_HMAC_KEY, 16);
        let hmac_value_iv = derive_iv(data_hash, &key_data_salt, &BLOCK_HMAC_VALUE, 16);
        let encrypted_hmac_key = aes_cbc_encrypt(&secret_key, &hmac_key_iv, &hmac_key);
        let encrypted_hmac_value = aes_cbc_encrypt(&secret_key, &hmac_value_iv, &hmac_value);

        let b64 = |bytes: &[u8]| STANDARD.encode(bytes);
        let xml = format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
                r#"<encryption xmlns="http://schemas.microsoft.com/office/2006/encryption" "#,
                r#"xmlns:p="http://schemas.microsoft.com/office/2006/keyEncryptor/password">"#,
                r#"<keyData saltSize="16" blockSize="16" keyBits="128" hashSize="{}" "#,
                r#"cipherAlgorithm="AES" cipherChaining="ChainingModeCBC" hashAlgorithm="{}" saltValue="{}"/>"#,
                r#"<dataIntegrity encryptedHmacKey="{}" encryptedHmacValue="{}"/>"#,
                r#"<keyEncryptors><keyEncryptor uri="http://schemas.microsoft.com/office/2006/keyEncryptor/password">"#,
                r#"<p:encryptedKey spinCount="{}" saltSize="16" blockSize="16" keyBits="128" hashSize="{}" "#,
                r#"cipherAlgorithm="AES" cipherChaining="ChainingModeCBC" hashAlgorithm="{}" saltValue="{}" "#,
                r#"encryptedVerifierHashInput="{}" encryptedVerifierHashValue="{}" encryptedKeyValue="{}"/>"#,
                r#"</keyEncryptor></keyEncryptors></encryption>"#
            ),
            data_hash.digest_len(),
            data_hash.name(),
            b64(&key_data_salt),
            b64(&encrypted_hmac_key),
            b64(&encrypted_hmac_value),
            Self::SPIN_COUNT,
            hash.digest_len(),
            hash.name(),
            b64(&password_salt),
            b64(&encrypted_verifier_hash_input),
            b64(&encrypted_verifier_hash_value),
            b64(&encrypted_key_value),
        );
        Self { xml, package }
    }

    /// `EncryptionInfo` stream: version 4.4, reserved flags, then the XML.
    pub(crate) fn encryption_info(&self) -> Vec<u8> {
        let mut out = vec![4, 0, 4, 0, 0x40, 0, 0, 0];
        out.extend_from_slice(self.xml.as_bytes());
        out
    }
}

/// Wraps both streams in a compound file the way Office lays them out.
pub(crate) fn container(encryption_info: &[u8], encrypted_package: &[u8]) -> Vec<u8> {
    let mut doc = CompoundDocument::new().expect("doc");
    doc.write_stream("EncryptionInfo", encryption_info)
        .expect("EncryptionInfo");
    doc.write_stream("EncryptedPackage", encrypted_package)
        .expect("EncryptedPackage");
    doc.into_inner()
}
