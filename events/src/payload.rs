//! Optional obfuscation of chat payloads.
//!
//! Applied by clients to the `data` field of `Event::Chat` before encoding
//! and after decoding. The relay never inspects `data`, so it works the same
//! whether or not clients share a passphrase.
//!
//! `XorCipher` is a reversible XOR keyed by the passphrase. It hides text
//! from casual observers only and is not encryption.

use crate::error::{payload_error, Error, PayloadErrorKind};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// A symmetric, stateless transform over chat payload text.
pub trait PayloadTransform: Send + Sync {
    /// Transform outgoing text into its wire form.
    fn seal(&self, data: &str) -> String;

    /// Reverse `seal`.
    fn open(&self, data: &str) -> Result<String, Error>;
}

/// Identity transform used when no passphrase is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct Plaintext;

impl PayloadTransform for Plaintext {
    fn seal(&self, data: &str) -> String {
        data.to_string()
    }

    fn open(&self, data: &str) -> Result<String, Error> {
        Ok(data.to_string())
    }
}

/// XOR with the passphrase bytes, base64 encoded so the result stays valid JSON text.
#[derive(Debug, Clone)]
pub struct XorCipher {
    key: Vec<u8>,
}

impl XorCipher {
    /// Returns `None` for an empty passphrase, which would make XOR a no-op.
    pub fn new(passphrase: &str) -> Option<Self> {
        if passphrase.is_empty() {
            return None;
        }
        Some(Self {
            key: passphrase.as_bytes().to_vec(),
        })
    }

    fn apply(&self, bytes: &[u8]) -> Vec<u8> {
        bytes
            .iter()
            .zip(self.key.iter().cycle())
            .map(|(byte, key)| byte ^ key)
            .collect()
    }
}

impl PayloadTransform for XorCipher {
    fn seal(&self, data: &str) -> String {
        BASE64.encode(self.apply(data.as_bytes()))
    }

    fn open(&self, data: &str) -> Result<String, Error> {
        let mixed = BASE64
            .decode(data)
            .map_err(|e| payload_error(PayloadErrorKind::InvalidEncoding, e))?;
        String::from_utf8(self.apply(&mixed))
            .map_err(|e| payload_error(PayloadErrorKind::InvalidUtf8, e))
    }
}

/// Pick the transform for an optional passphrase.
pub fn from_passphrase(passphrase: Option<&str>) -> Box<dyn PayloadTransform> {
    match passphrase.and_then(XorCipher::new) {
        Some(cipher) => Box::new(cipher),
        None => Box::new(Plaintext),
    }
}
