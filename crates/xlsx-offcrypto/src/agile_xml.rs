//! Agile (version 4.4) `EncryptionInfo` XML descriptor.

use std::str::FromStr;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::crypto::{decode_base64, HashAlgorithm};
use crate::OffcryptoError;

pub const ENCRYPTION_NS: &str = "http://schemas.microsoft.com/office/2006/encryption";
pub const PASSWORD_KEY_ENCRYPTOR_NS: &str =
    "http://schemas.microsoft.com/office/2006/keyEncryptor/password";
pub const CERTIFICATE_KEY_ENCRYPTOR_NS: &str =
    "http://schemas.microsoft.com/office/2006/keyEncryptor/certificate";

/// Upper bound accepted for `spinCount`.
pub const MAX_SPIN_COUNT: u32 = 10_000_000;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Cipher parameters shared by `keyData` and the password `encryptedKey`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgileCipherParams {
    pub salt_size: usize,
    pub block_size: usize,
    pub key_bits: usize,
    pub hash_size: usize,
    pub cipher_algorithm: String,
    pub cipher_chaining: String,
    pub hash_algorithm: HashAlgorithm,
    pub salt: Vec<u8>,
}

impl AgileCipherParams {
    pub fn key_len(&self) -> usize {
        self.key_bits / 8
    }

    /// `true` for the only cipher this crate decrypts: AES in CBC mode.
    pub fn is_aes_cbc(&self) -> bool {
        self.cipher_algorithm.eq_ignore_ascii_case("AES")
            && self.cipher_chaining.eq_ignore_ascii_case("ChainingModeCBC")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgileDataIntegrity {
    pub encrypted_hmac_key: Vec<u8>,
    pub encrypted_hmac_value: Vec<u8>,
}

/// The password `<p:encryptedKey>` key encryptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgilePasswordKeyEncryptor {
    pub spin_count: u32,
    pub params: AgileCipherParams,
    pub encrypted_verifier_hash_input: Vec<u8>,
    pub encrypted_verifier_hash_value: Vec<u8>,
    pub encrypted_key_value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgileEncryptionInfo {
    pub key_data: AgileCipherParams,
    pub data_integrity: AgileDataIntegrity,
    pub password: AgilePasswordKeyEncryptor,
}

/// Prefix → URI declarations, one frame per open element.
#[derive(Default)]
struct NamespaceStack {
    frames: Vec<Vec<(Vec<u8>, Vec<u8>)>>,
}

impl NamespaceStack {
    fn push(&mut self, element: &BytesStart<'_>) -> Result<(), OffcryptoError> {
        let mut frame = Vec::new();
        for attr in element.attributes().with_checks(false) {
            let attr = attr.map_err(|err| {
                OffcryptoError::malformed(format!("invalid XML attribute: {err}"))
            })?;
            let key = attr.key.as_ref();
            if key == b"xmlns" {
                frame.push((Vec::new(), attr.value.to_vec()));
            } else if let Some(prefix) = key.strip_prefix(b"xmlns:") {
                frame.push((prefix.to_vec(), attr.value.to_vec()));
            }
        }
        self.frames.push(frame);
        Ok(())
    }

    fn pop(&mut self) {
        self.frames.pop();
    }

    fn resolve(&self, prefix: &[u8]) -> Option<&[u8]> {
        self.frames
            .iter()
            .rev()
            .flat_map(|frame| frame.iter().rev())
            .find(|(declared, _)| declared.as_slice() == prefix)
            .map(|(_, uri)| uri.as_slice())
    }

    fn namespace_of(&self, element: &BytesStart<'_>) -> Option<&[u8]> {
        let name = element.name();
        let prefix = name.prefix().map(|p| p.as_ref().to_vec()).unwrap_or_default();
        self.resolve(&prefix)
    }
}

/// Attributes of one element keyed by local name, excluding namespace declarations.
struct Attributes {
    element: &'static str,
    values: Vec<(String, String)>,
}

impl Attributes {
    fn collect(element: &'static str, start: &BytesStart<'_>) -> Result<Self, OffcryptoError> {
        let mut values = Vec::new();
        for attr in start.attributes().with_checks(false) {
            let attr = attr.map_err(|err| {
                OffcryptoError::malformed(format!("invalid attribute on <{element}>: {err}"))
            })?;
            let key = attr.key.as_ref();
            if key == b"xmlns" || key.starts_with(b"xmlns:") {
                continue;
            }
            let name = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = std::str::from_utf8(&attr.value)
                .map_err(|_| {
                    OffcryptoError::malformed(format!("<{element} {name}> is not valid UTF-8"))
                })?
                .to_string();
            values.push((name, value));
        }
        Ok(Self { element, values })
    }

    fn text(&self, name: &str) -> Result<&str, OffcryptoError> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.trim())
            .ok_or_else(|| {
                OffcryptoError::malformed(format!(
                    "<{}> is missing the `{name}` attribute",
                    self.element
                ))
            })
    }

    fn number<T: FromStr>(&self, name: &str) -> Result<T, OffcryptoError> {
        let text = self.text(name)?;
        text.parse().map_err(|_| {
            OffcryptoError::malformed(format!(
                "<{} {name}=\"{text}\"> is not a valid number",
                self.element
            ))
        })
    }

    fn bounded(&self, name: &str, range: std::ops::RangeInclusive<usize>) -> Result<usize, OffcryptoError> {
        let value: usize = self.number(name)?;
        if !range.contains(&value) {
            return Err(OffcryptoError::malformed(format!(
                "<{} {name}> {value:#x} is outside {:#x}..={:#x}",
                self.element,
                range.start(),
                range.end()
            )));
        }
        Ok(value)
    }

    fn base64(&self, name: &str) -> Result<Vec<u8>, OffcryptoError> {
        decode_base64(self.text(name)?, &format!("<{} {name}>", self.element))
    }
}

fn parse_cipher_params(attrs: &Attributes) -> Result<AgileCipherParams, OffcryptoError> {
    let salt_size = attrs.bounded("saltSize", 1..=65_536)?;
    let block_size = attrs.bounded("blockSize", 2..=4_096)?;
    let key_bits: usize = attrs.number("keyBits")?;
    if key_bits == 0 || key_bits % 8 != 0 {
        return Err(OffcryptoError::malformed(format!(
            "<{} keyBits> {key_bits:#x} is not a positive multiple of 8",
            attrs.element
        )));
    }
    let hash_size = attrs.bounded("hashSize", 1..=65_536)?;
    let hash_algorithm = HashAlgorithm::parse_offcrypto_name(attrs.text("hashAlgorithm")?)?;
    if hash_size != hash_algorithm.digest_len() {
        return Err(OffcryptoError::malformed(format!(
            "<{} hashSize> {hash_size:#x} does not match {} ({:#x} bytes)",
            attrs.element,
            hash_algorithm.name(),
            hash_algorithm.digest_len()
        )));
    }
    let salt = attrs.base64("saltValue")?;
    if salt.len() != salt_size {
        return Err(OffcryptoError::malformed(format!(
            "<{} saltValue> holds {:#x} bytes but saltSize is {salt_size:#x}",
            attrs.element,
            salt.len()
        )));
    }
    Ok(AgileCipherParams {
        salt_size,
        block_size,
        key_bits,
        hash_size,
        cipher_algorithm: attrs.text("cipherAlgorithm")?.to_string(),
        cipher_chaining: attrs.text("cipherChaining")?.to_string(),
        hash_algorithm,
        salt,
    })
}

fn parse_password_key_encryptor(
    attrs: &Attributes,
) -> Result<AgilePasswordKeyEncryptor, OffcryptoError> {
    let spin_count: u32 = attrs.number("spinCount")?;
    if spin_count > MAX_SPIN_COUNT {
        return Err(OffcryptoError::malformed(format!(
            "spinCount {spin_count:#x} exceeds {MAX_SPIN_COUNT:#x}"
        )));
    }
    Ok(AgilePasswordKeyEncryptor {
        spin_count,
        params: parse_cipher_params(attrs)?,
        encrypted_verifier_hash_input: attrs.base64("encryptedVerifierHashInput")?,
        encrypted_verifier_hash_value: attrs.base64("encryptedVerifierHashValue")?,
        encrypted_key_value: attrs.base64("encryptedKeyValue")?,
    })
}

#[derive(Default)]
struct AgileInfoBuilder {
    saw_root: bool,
    key_data: Option<AgileCipherParams>,
    data_integrity: Option<AgileDataIntegrity>,
    password: Option<AgilePasswordKeyEncryptor>,
}

impl AgileInfoBuilder {
    fn element(&mut self, start: &BytesStart<'_>, ns: Option<&[u8]>) -> Result<(), OffcryptoError> {
        let local = start.local_name();
        let in_ns = |uri: &str| ns == Some(uri.as_bytes());
        if !self.saw_root {
            if local.as_ref() != b"encryption" || !in_ns(ENCRYPTION_NS) {
                return Err(OffcryptoError::malformed(format!(
                    "root element <{}> is not <encryption xmlns=\"{ENCRYPTION_NS}\">",
                    String::from_utf8_lossy(start.name().as_ref())
                )));
            }
            self.saw_root = true;
            return Ok(());
        }
        match local.as_ref() {
            b"keyData" if in_ns(ENCRYPTION_NS) => {
                if self.key_data.is_some() {
                    return Err(OffcryptoError::malformed("duplicate <keyData> element"));
                }
                let attrs = Attributes::collect("keyData", start)?;
                self.key_data = Some(parse_cipher_params(&attrs)?);
            }
            b"dataIntegrity" if in_ns(ENCRYPTION_NS) => {
                if self.data_integrity.is_some() {
                    return Err(OffcryptoError::malformed("duplicate <dataIntegrity> element"));
                }
                let attrs = Attributes::collect("dataIntegrity", start)?;
                self.data_integrity = Some(AgileDataIntegrity {
                    encrypted_hmac_key: attrs.base64("encryptedHmacKey")?,
                    encrypted_hmac_value: attrs.base64("encryptedHmacValue")?,
                });
            }
            b"encryptedKey" if in_ns(PASSWORD_KEY_ENCRYPTOR_NS) => {
                if self.password.is_some() {
                    return Err(OffcryptoError::malformed(
                        "more than one password <encryptedKey> key encryptor",
                    ));
                }
                let attrs = Attributes::collect("p:encryptedKey", start)?;
                self.password = Some(parse_password_key_encryptor(&attrs)?);
            }
            b"encryptedKey" if in_ns(CERTIFICATE_KEY_ENCRYPTOR_NS) => {
                log::debug!("ignoring certificate key encryptor");
            }
            _ => {}
        }
        Ok(())
    }

    fn finish(self) -> Result<AgileEncryptionInfo, OffcryptoError> {
        Ok(AgileEncryptionInfo {
            key_data: self
                .key_data
                .ok_or_else(|| OffcryptoError::malformed("missing <keyData> element"))?,
            data_integrity: self
                .data_integrity
                .ok_or_else(|| OffcryptoError::malformed("missing <dataIntegrity> element"))?,
            password: self.password.ok_or_else(|| {
                OffcryptoError::malformed("no password <encryptedKey> key encryptor")
            })?,
        })
    }
}

/// Parses the XML that follows the 8-byte version header of an Agile `EncryptionInfo`.
pub fn parse_agile_encryption_info_xml(
    bytes: &[u8],
) -> Result<AgileEncryptionInfo, OffcryptoError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let end = bytes
        .iter()
        .rposition(|b| *b != 0)
        .map_or(0, |last| last + 1);
    let xml = std::str::from_utf8(&bytes[..end])
        .map_err(|err| OffcryptoError::malformed(format!("Agile XML is not UTF-8: {err}")))?;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut namespaces = NamespaceStack::default();
    let mut builder = AgileInfoBuilder::default();

    loop {
        let event = reader.read_event().map_err(|err| {
            OffcryptoError::malformed(format!(
                "Agile XML error at byte {:#x}: {err}",
                reader.error_position()
            ))
        })?;
        match event {
            Event::Start(start) => {
                namespaces.push(&start)?;
                builder.element(&start, namespaces.namespace_of(&start))?;
            }
            Event::Empty(start) => {
                namespaces.push(&start)?;
                builder.element(&start, namespaces.namespace_of(&start))?;
                namespaces.pop();
            }
            Event::End(_) => namespaces.pop(),
            Event::Eof => break,
            _ => {}
        }
    }

    let info = builder.finish()?;
    log::debug!(
        "Agile keyData {} {}-bit {}, password spinCount {}",
        info.key_data.cipher_algorithm,
        info.key_data.key_bits,
        info.key_data.hash_algorithm.name(),
        info.password.spin_count
    );
    Ok(info)
}
