//! Document encryption.
//!
//! Scheme `DocSeal.AES256-CBC-HMAC-SHA256`, applied to stream payloads only:
//!
//! - A random 16-byte salt per document. HKDF-SHA256 over the symmetric key
//!   (followed by the optional passphrase) expands an AES-256 key, a MAC key
//!   and a key-check key.
//! - The trailer gains `/Encrypt << /Filter /DocSeal.Crypt /V 1 /Salt <..>
//!   /KeyCheck <..> >>`, where the key check is HMAC-SHA256 over a fixed
//!   message, so a wrong key is told apart from damaged ciphertext.
//! - Each stream payload becomes `iv || AES-256-CBC(PKCS#7) || tag`, where the
//!   tag is HMAC-SHA256 over the object number, generation, IV and ciphertext.
//!
//! # Security Considerations
//!
//! - Key checks and tags are compared in constant time
//! - Derived keys are wiped on drop
//! - Strings outside streams are not encrypted

use crate::error::{CryptoFailure, Result};
use crate::object::{Dictionary, Object};

mod aes;
mod algorithms;
mod handler;

pub use algorithms::{DerivedKeys, SALT_LEN, TAG_LEN};
pub use handler::EncryptionHandler;

/// `/Filter` of the encryption dictionary.
pub const ENCRYPT_FILTER: &str = "DocSeal.Crypt";

/// Scheme name.
pub const SCHEME_NAME: &str = "DocSeal.AES256-CBC-HMAC-SHA256";

/// Scheme version (`/V`).
pub const SCHEME_VERSION: i64 = 1;

/// Encryption dictionary (`/Encrypt` entry in the trailer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptDict {
    /// HKDF salt
    pub salt: [u8; SALT_LEN],
    /// HMAC of the key-check message
    pub key_check: Vec<u8>,
}

impl EncryptDict {
    /// Parse an encryption dictionary.
    ///
    /// Anything other than a well-formed version 1 dictionary of this scheme
    /// is `corrupt_ciphertext`.
    pub fn from_object(obj: &Object) -> Result<Self> {
        let corrupt = || CryptoFailure::CorruptCiphertext;
        let dict = obj.as_dict().ok_or_else(corrupt)?;

        if dict.get("Filter").and_then(Object::as_name) != Some(ENCRYPT_FILTER) {
            log::debug!("Unsupported /Encrypt filter");
            return Err(corrupt().into());
        }
        if dict.get("V").and_then(Object::as_integer) != Some(SCHEME_VERSION) {
            log::debug!("Unsupported /Encrypt version");
            return Err(corrupt().into());
        }

        let salt: [u8; SALT_LEN] = dict
            .get("Salt")
            .and_then(Object::as_string)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(corrupt)?;
        let key_check = dict
            .get("KeyCheck")
            .and_then(Object::as_string)
            .filter(|k| k.len() == TAG_LEN)
            .ok_or_else(corrupt)?
            .to_vec();

        Ok(Self { salt, key_check })
    }

    /// Build the dictionary object.
    pub fn to_object(&self) -> Object {
        let mut dict = Dictionary::new();
        dict.insert("Filter".to_string(), Object::name(ENCRYPT_FILTER));
        dict.insert("V".to_string(), Object::Integer(SCHEME_VERSION));
        dict.insert("Salt".to_string(), Object::String(self.salt.to_vec()));
        dict.insert("KeyCheck".to_string(), Object::String(self.key_check.clone()));
        Object::Dictionary(dict)
    }
}
