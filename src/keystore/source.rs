//! Key store configuration and secret sources.

use super::material::{KeyKind, SymmetricKey, SYMMETRIC_KEY_LEN};
use crate::error::{Error, Result};
use base64::Engine;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Where a key's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeySource {
    /// A file holding PEM text or a raw secret
    File {
        /// Path to the file
        path: PathBuf,
    },
    /// An environment variable holding PEM text, or hex/base64 for symmetric keys
    Env {
        /// Variable name
        var: String,
    },
}

impl KeySource {
    /// Read the raw secret bytes.
    ///
    /// Errors name the source but never include its content.
    pub fn read(&self) -> Result<Zeroizing<Vec<u8>>> {
        match self {
            KeySource::File { path } => std::fs::read(path)
                .map(Zeroizing::new)
                .map_err(|e| Error::Config(format!("cannot read key file {}: {}", path.display(), e))),
            KeySource::Env { var } => std::env::var(var)
                .map(|value| Zeroizing::new(value.into_bytes()))
                .map_err(|_| Error::Config(format!("environment variable {} is not set", var))),
        }
    }

    fn resolve_path(&mut self, base: &Path) {
        if let KeySource::File { path } = self {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::File { path } => write!(f, "file:{}", path.display()),
            KeySource::Env { var } => write!(f, "env:{}", var),
        }
    }
}

/// One configured key.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyEntryConfig {
    /// Key id used by requests
    pub id: String,
    /// Kind of material
    pub kind: KeyKind,
    /// Secret source
    pub source: KeySource,
    /// PEM certificate files, leaf first
    #[serde(default)]
    pub certificates: Vec<PathBuf>,
}

/// The `keys` configuration section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeysConfig {
    /// Configured keys
    #[serde(default)]
    pub entries: Vec<KeyEntryConfig>,
    /// PEM files of trust anchor certificates
    #[serde(default)]
    pub trust_anchors: Vec<PathBuf>,
}

impl KeysConfig {
    /// Make relative paths relative to `base` (the config file's directory).
    pub fn resolve_paths(&mut self, base: &Path) {
        for entry in &mut self.entries {
            entry.source.resolve_path(base);
            for cert in &mut entry.certificates {
                if cert.is_relative() {
                    *cert = base.join(&*cert);
                }
            }
        }
        for anchor in &mut self.trust_anchors {
            if anchor.is_relative() {
                *anchor = base.join(&*anchor);
            }
        }
    }
}

/// Decode a symmetric key: exactly 32 raw bytes, or 64 hex digits, or base64
/// of 32 bytes. Surrounding whitespace is ignored for the text forms.
pub fn decode_symmetric(raw: &[u8]) -> Result<SymmetricKey> {
    if raw.len() == SYMMETRIC_KEY_LEN {
        return SymmetricKey::from_slice(raw);
    }

    let text = std::str::from_utf8(raw)
        .map_err(|_| Error::Config("symmetric key is neither 32 raw bytes nor text".to_string()))?
        .trim();

    if text.len() == SYMMETRIC_KEY_LEN * 2 && text.bytes().all(|c| c.is_ascii_hexdigit()) {
        let mut bytes = Zeroizing::new([0u8; SYMMETRIC_KEY_LEN]);
        for (i, pair) in text.as_bytes().chunks(2).enumerate() {
            bytes[i] = (hex_value(pair[0]) << 4) | hex_value(pair[1]);
        }
        return Ok(SymmetricKey::new(*bytes));
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(text)
        .map(Zeroizing::new)
        .map_err(|_| Error::Config("symmetric key is not valid hex or base64".to_string()))?;
    SymmetricKey::from_slice(&decoded)
}

fn hex_value(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => 0,
    }
}
