use thiserror::Error;

/// Errors returned by this crate.
#[derive(Debug, Error)]
pub enum CfbError {
    /// The container violates the MS-CFB format (bad signature, broken chain, illegal name...).
    #[error("malformed compound file: {0}")]
    Malformed(String),
    /// An internal contract was broken, e.g. a sentinel id was used where a real sector is
    /// required. This indicates a bug rather than corrupt input.
    #[error("compound file invariant violated: {0}")]
    InvariantViolation(String),
    /// The requested storage or stream does not exist.
    #[error("entry not found: `{0}`")]
    NotFound(String),
    /// A caller-supplied entry name cannot be stored.
    #[error("invalid entry name `{name}`: {reason}")]
    InvalidName { name: String, reason: &'static str },
    /// The backing byte store does not accept writes.
    #[error("byte store is read-only")]
    ReadOnly,
}

impl CfbError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        CfbError::Malformed(message.into())
    }

    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        log::error!("{message}");
        CfbError::InvariantViolation(message)
    }

    /// Returns `true` if the error was caused by untrusted input rather than by the caller.
    pub fn is_malformed(&self) -> bool {
        matches!(self, CfbError::Malformed(_))
    }
}

impl From<CfbError> for std::io::Error {
    fn from(err: CfbError) -> Self {
        use std::io::ErrorKind;

        let kind = match &err {
            CfbError::Malformed(_) => ErrorKind::InvalidData,
            CfbError::NotFound(_) => ErrorKind::NotFound,
            CfbError::InvalidName { .. } => ErrorKind::InvalidInput,
            CfbError::ReadOnly => ErrorKind::PermissionDenied,
            CfbError::InvariantViolation(_) => ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}
