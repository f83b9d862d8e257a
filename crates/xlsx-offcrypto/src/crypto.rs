//! Hash, AES and HMAC primitives shared by the Standard and Agile decryptors.

use aes::cipher::{
    block_padding::NoPadding, generic_array::GenericArray, BlockDecrypt, BlockDecryptMut,
    KeyInit, KeyIvInit,
};
use aes::{Aes128, Aes192, Aes256};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};
use sha2::{Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::OffcryptoError;

pub const AES_BLOCK_LEN: usize = 16;

/// Hash algorithms accepted in Agile `hashAlgorithm` attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn parse_offcrypto_name(name: &str) -> Result<Self, OffcryptoError> {
        match name.trim().to_ascii_uppercase().as_str() {
            "SHA1" | "SHA-1" => Ok(Self::Sha1),
            "SHA256" | "SHA-256" => Ok(Self::Sha256),
            "SHA384" | "SHA-384" => Ok(Self::Sha384),
            "SHA512" | "SHA-512" => Ok(Self::Sha512),
            _ => Err(OffcryptoError::Unsupported(format!(
                "hash algorithm `{name}`"
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha384 => "SHA384",
            Self::Sha512 => "SHA512",
        }
    }

    pub fn digest_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        self.digest_parts(&[data])
    }

    /// Hash of the concatenation of `parts`.
    pub fn digest_parts(self, parts: &[&[u8]]) -> Vec<u8> {
        fn run<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
            let mut hasher = D::new();
            for part in parts {
                hasher.update(*part);
            }
            hasher.finalize().to_vec()
        }
        match self {
            Self::Sha1 => run::<Sha1>(parts),
            Self::Sha256 => run::<Sha256>(parts),
            Self::Sha384 => run::<Sha384>(parts),
            Self::Sha512 => run::<Sha512>(parts),
        }
    }
}

/// Password bytes as UTF-16LE without a terminator.
pub(crate) fn password_utf16le(password: &str) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(
        password
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect(),
    )
}

/// Truncates `digest` to `len`, padding with `0x36` when it is too short.
pub(crate) fn fit_to_len(mut digest: Vec<u8>, len: usize) -> Vec<u8> {
    digest.resize(len, 0x36);
    digest
}

/// `Hash(h ‖ block_key)` fitted to `key_len` bytes.
pub(crate) fn derive_key(
    hash: HashAlgorithm,
    h: &[u8],
    block_key: &[u8],
    key_len: usize,
) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(fit_to_len(hash.digest_parts(&[h, block_key]), key_len))
}

/// `Hash(salt ‖ block_key)` fitted to `block_size` bytes.
pub(crate) fn derive_iv(
    hash: HashAlgorithm,
    salt: &[u8],
    block_key: &[u8],
    block_size: usize,
) -> Vec<u8> {
    fit_to_len(hash.digest_parts(&[salt, block_key]), block_size)
}

fn check_block_aligned(len: usize) -> Result<(), OffcryptoError> {
    if len % AES_BLOCK_LEN != 0 {
        return Err(OffcryptoError::InvalidCiphertextLength { len });
    }
    Ok(())
}

pub(crate) fn aes_ecb_decrypt_in_place(key: &[u8], buf: &mut [u8]) -> Result<(), OffcryptoError> {
    check_block_aligned(buf.len())?;

    fn run<C: BlockDecrypt + KeyInit>(key: &[u8], buf: &mut [u8]) -> Result<(), OffcryptoError> {
        let cipher = C::new_from_slice(key)
            .map_err(|_| OffcryptoError::InvalidKeyLength { len: key.len() })?;
        for block in buf.chunks_exact_mut(AES_BLOCK_LEN) {
            cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }

    match key.len() {
        16 => run::<Aes128>(key, buf),
        24 => run::<Aes192>(key, buf),
        32 => run::<Aes256>(key, buf),
        len => Err(OffcryptoError::InvalidKeyLength { len }),
    }
}

pub(crate) fn aes_ecb_decrypt(ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>, OffcryptoError> {
    let mut out = ciphertext.to_vec();
    aes_ecb_decrypt_in_place(key, &mut out)?;
    Ok(out)
}

pub(crate) fn aes_cbc_decrypt_in_place(
    key: &[u8],
    iv: &[u8],
    buf: &mut [u8],
) -> Result<(), OffcryptoError> {
    check_block_aligned(buf.len())?;
    let iv = iv.get(..AES_BLOCK_LEN).ok_or_else(|| {
        OffcryptoError::malformed(format!(
            "AES-CBC IV needs {AES_BLOCK_LEN} bytes, got {}",
            iv.len()
        ))
    })?;
    let len = buf.len();
    let bad_key = |_| OffcryptoError::InvalidKeyLength { len: key.len() };
    let bad_len = |_| OffcryptoError::InvalidCiphertextLength { len };

    match key.len() {
        16 => {
            cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
                .map_err(bad_key)?
                .decrypt_padded_mut::<NoPadding>(buf)
                .map_err(bad_len)?;
        }
        24 => {
            cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
                .map_err(bad_key)?
                .decrypt_padded_mut::<NoPadding>(buf)
                .map_err(bad_len)?;
        }
        32 => {
            cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
                .map_err(bad_key)?
                .decrypt_padded_mut::<NoPadding>(buf)
                .map_err(bad_len)?;
        }
        len => return Err(OffcryptoError::InvalidKeyLength { len }),
    }
    Ok(())
}

pub(crate) fn aes_cbc_decrypt(
    ciphertext: &[u8],
    key: &[u8],
    iv: &[u8],
) -> Result<Vec<u8>, OffcryptoError> {
    let mut out = ciphertext.to_vec();
    aes_cbc_decrypt_in_place(key, iv, &mut out)?;
    Ok(out)
}

pub(crate) fn hmac(
    hash: HashAlgorithm,
    key: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, OffcryptoError> {
    fn run<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, OffcryptoError> {
        let mut mac = <M as KeyInit>::new_from_slice(key)
            .map_err(|_| OffcryptoError::malformed("HMAC key rejected"))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
    match hash {
        HashAlgorithm::Sha1 => run::<Hmac<Sha1>>(key, data),
        HashAlgorithm::Sha256 => run::<Hmac<Sha256>>(key, data),
        HashAlgorithm::Sha384 => run::<Hmac<Sha384>>(key, data),
        HashAlgorithm::Sha512 => run::<Hmac<Sha512>>(key, data),
    }
}

/// Constant-time comparison; lengths are not secret.
pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Decodes a base64 attribute, tolerating embedded whitespace and missing padding.
pub(crate) fn decode_base64(value: &str, context: &str) -> Result<Vec<u8>, OffcryptoError> {
    let compact: String = value.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .or_else(|_| STANDARD_NO_PAD.decode(compact.trim_end_matches('=').as_bytes()))
        .map_err(|err| OffcryptoError::malformed(format!("{context} is not valid base64: {err}")))
}
