use thiserror::Error;
use xlsx_cfb::CfbError;

/// Errors produced while parsing `EncryptionInfo` or decrypting an `EncryptedPackage`.
#[derive(Debug, Error)]
pub enum OffcryptoError {
    #[error("input is empty")]
    EmptyInput,
    #[error("input is not an encrypted OOXML container (no compound file signature)")]
    NotEncrypted,
    #[error("compound file error: {0}")]
    Cfb(#[from] CfbError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Not enough bytes to parse the requested structure.
    #[error("truncated data while reading {context}")]
    Truncated { context: &'static str },
    /// Structurally invalid `EncryptionInfo` or `EncryptedPackage` data.
    #[error("invalid EncryptionInfo: {context}")]
    Malformed { context: String },
    #[error("unsupported EncryptionInfo version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },
    /// A recognized scheme or algorithm that this crate cannot decrypt.
    #[error("unsupported encryption: {0}")]
    Unsupported(String),
    /// A stream is larger than [`crate::DecryptOptions::max_package_size`].
    #[error("`{stream}` stream of {len:#x} bytes exceeds the limit of {max:#x} bytes")]
    StreamTooLarge {
        stream: &'static str,
        len: u64,
        max: u64,
    },
    #[error("invalid password")]
    InvalidPassword,
    /// The `dataIntegrity` HMAC does not match the `EncryptedPackage` stream.
    #[error("EncryptedPackage failed the dataIntegrity HMAC check")]
    IntegrityCheckFailed,
    #[error("invalid AES key length {len}; expected 16, 24, or 32 bytes")]
    InvalidKeyLength { len: usize },
    #[error("ciphertext length must be a multiple of 16 bytes, got {len}")]
    InvalidCiphertextLength { len: usize },
}

impl OffcryptoError {
    pub(crate) fn malformed(context: impl Into<String>) -> Self {
        Self::Malformed {
            context: context.into(),
        }
    }

    /// `true` for errors caused by corrupt or structurally invalid input.
    pub fn is_malformed(&self) -> bool {
        match self {
            Self::Truncated { .. }
            | Self::Malformed { .. }
            | Self::InvalidCiphertextLength { .. } => true,
            Self::Cfb(err) => err.is_malformed(),
            Self::Io(err) => err.kind() == std::io::ErrorKind::InvalidData,
            _ => false,
        }
    }

    /// `true` for recognized but undecryptable schemes, versions and algorithms.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_) | Self::UnsupportedVersion { .. })
    }
}
