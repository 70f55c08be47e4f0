//! Key derivation and authentication tags.
//!
//! One HKDF-SHA256 extraction per document yields three independent keys:
//! the AES key, the stream MAC key and the key-check key. The input keying
//! material is the symmetric key followed by the optional passphrase.

use crate::error::{Error, Result};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// HKDF info for the AES key.
const INFO_ENCRYPTION: &[u8] = b"docseal enc";
/// HKDF info for the stream MAC key.
const INFO_MAC: &[u8] = b"docseal mac";
/// HKDF info for the key-check key.
const INFO_CHECK: &[u8] = b"docseal check";
/// Message authenticated by `/KeyCheck`.
const KEY_CHECK_MESSAGE: &[u8] = b"docseal key check";

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;
/// Tag length in bytes.
pub const TAG_LEN: usize = 32;

/// Per-document keys. Wiped on drop.
pub struct DerivedKeys {
    encryption: Zeroizing<[u8; 32]>,
    mac: Zeroizing<[u8; 32]>,
    check: Zeroizing<[u8; 32]>,
}

impl DerivedKeys {
    /// Derive the document keys from the symmetric key, passphrase and salt.
    pub fn derive(key: &[u8; 32], passphrase: Option<&[u8]>, salt: &[u8; SALT_LEN]) -> Self {
        let mut ikm = Zeroizing::new(Vec::with_capacity(32 + passphrase.map_or(0, <[u8]>::len)));
        ikm.extend_from_slice(key);
        if let Some(passphrase) = passphrase {
            ikm.extend_from_slice(passphrase);
        }

        let hk = Hkdf::<Sha256>::new(Some(salt), &ikm);
        let expand = |info: &[u8]| {
            let mut okm = Zeroizing::new([0u8; 32]);
            // 32 bytes is far below the HKDF output limit
            let _ = hk.expand(info, &mut okm[..]);
            okm
        };

        Self {
            encryption: expand(INFO_ENCRYPTION),
            mac: expand(INFO_MAC),
            check: expand(INFO_CHECK),
        }
    }

    /// AES-256 key.
    pub fn encryption_key(&self) -> &[u8; 32] {
        &self.encryption
    }

    /// Key check value stored in `/KeyCheck`.
    pub fn key_check(&self) -> Result<[u8; TAG_LEN]> {
        let mut mac = new_mac(&self.check)?;
        mac.update(KEY_CHECK_MESSAGE);
        Ok(mac.finalize().into_bytes().into())
    }

    /// Compare a stored key check value in constant time.
    pub fn matches_key_check(&self, stored: &[u8]) -> Result<bool> {
        Ok(self.key_check()?[..].ct_eq(stored).into())
    }

    /// Tag over a stream payload, bound to its object number and generation.
    pub fn stream_tag(&self, id: u32, gen: u16, iv: &[u8], ciphertext: &[u8]) -> Result<[u8; TAG_LEN]> {
        Ok(stream_mac(&self.mac, id, gen, iv, ciphertext)?
            .finalize()
            .into_bytes()
            .into())
    }

    /// Check a stream tag in constant time.
    pub fn verify_stream_tag(
        &self,
        id: u32,
        gen: u16,
        iv: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<bool> {
        Ok(stream_mac(&self.mac, id, gen, iv, ciphertext)?
            .verify_slice(tag)
            .is_ok())
    }
}

impl std::fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKeys(<redacted>)")
    }
}

fn new_mac(key: &[u8; 32]) -> Result<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| Error::Internal(format!("HMAC key setup failed: {}", e)))
}

fn stream_mac(key: &[u8; 32], id: u32, gen: u16, iv: &[u8], ciphertext: &[u8]) -> Result<HmacSha256> {
    let mut mac = new_mac(key)?;
    mac.update(&id.to_be_bytes());
    mac.update(&gen.to_be_bytes());
    mac.update(iv);
    mac.update(ciphertext);
    Ok(mac)
}
