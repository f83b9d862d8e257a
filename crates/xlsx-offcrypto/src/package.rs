use crate::crypto::AES_BLOCK_LEN;
use crate::reader::ByteCursor;
use crate::OffcryptoError;

/// Plaintext bytes covered by one AES segment of an `EncryptedPackage`.
pub const SEGMENT_LEN: usize = 4096;

/// `EncryptedPackage` split into its declared plaintext size and the block-aligned ciphertext
/// that covers it. Stream slack after the last needed block is dropped.
pub(crate) struct EncryptedPackage<'a> {
    pub(crate) size: usize,
    pub(crate) ciphertext: &'a [u8],
}

impl<'a> EncryptedPackage<'a> {
    pub(crate) fn parse(bytes: &'a [u8]) -> Result<Self, OffcryptoError> {
        let mut cursor = ByteCursor::new(bytes);
        let declared = cursor.u64("EncryptedPackage.StreamSize")?;
        let available = cursor.remaining();
        let size = usize::try_from(declared)
            .ok()
            .filter(|size| *size <= available.len())
            .ok_or(OffcryptoError::Truncated {
                context: "EncryptedPackage ciphertext shorter than its declared size",
            })?;
        let needed = size.div_ceil(AES_BLOCK_LEN) * AES_BLOCK_LEN;
        let ciphertext = available
            .get(..needed)
            .ok_or(OffcryptoError::InvalidCiphertextLength {
                len: available.len(),
            })?;
        Ok(Self { size, ciphertext })
    }

    pub(crate) fn segment_count(&self) -> usize {
        self.ciphertext.len().div_ceil(SEGMENT_LEN)
    }
}
