use crate::OffcryptoError;

/// Little-endian cursor over an untrusted byte slice.
pub(crate) struct ByteCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    pub(crate) fn take(
        &mut self,
        len: usize,
        context: &'static str,
    ) -> Result<&'a [u8], OffcryptoError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(OffcryptoError::Truncated { context })?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub(crate) fn array<const N: usize>(
        &mut self,
        context: &'static str,
    ) -> Result<[u8; N], OffcryptoError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, context)?);
        Ok(out)
    }

    pub(crate) fn u16(&mut self, context: &'static str) -> Result<u16, OffcryptoError> {
        self.array(context).map(u16::from_le_bytes)
    }

    pub(crate) fn u32(&mut self, context: &'static str) -> Result<u32, OffcryptoError> {
        self.array(context).map(u32::from_le_bytes)
    }

    pub(crate) fn u64(&mut self, context: &'static str) -> Result<u64, OffcryptoError> {
        self.array(context).map(u64::from_le_bytes)
    }
}

/// Decodes a NUL-terminated UTF-16LE string; a missing terminator is tolerated.
pub(crate) fn utf16le_until_nul(
    bytes: &[u8],
    context: &'static str,
) -> Result<String, OffcryptoError> {
    if bytes.len() % 2 != 0 {
        return Err(OffcryptoError::malformed(format!(
            "{context} has odd byte length {:#x}",
            bytes.len()
        )));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|unit| *unit != 0)
        .collect();
    String::from_utf16(&units)
        .map_err(|_| OffcryptoError::malformed(format!("{context} is not valid UTF-16LE")))
}
