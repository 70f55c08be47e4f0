//! Encryption handler for documents.
//!
//! Encrypts and decrypts every stream payload in place. Object numbers,
//! dictionaries and the rest of the object graph are left untouched, so
//! a decrypted document serializes to exactly the bytes the plaintext did.

use super::aes::{aes256_decrypt, aes256_encrypt, BLOCK_SIZE};
use super::algorithms::{DerivedKeys, SALT_LEN, TAG_LEN};
use super::EncryptDict;
use crate::budget::Budget;
use crate::document::Document;
use crate::error::{CryptoFailure, Error, Result};
use crate::keystore::SymmetricKey;
use crate::object::Object;
use bytes::Bytes;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};

/// Shortest possible encrypted payload: IV, one block, tag.
const MIN_PAYLOAD: usize = BLOCK_SIZE + BLOCK_SIZE + TAG_LEN;

/// Encrypts and decrypts documents with one symmetric key.
pub struct EncryptionHandler<'a> {
    key: &'a SymmetricKey,
    passphrase: Option<&'a [u8]>,
}

impl<'a> EncryptionHandler<'a> {
    /// Create a handler; `passphrase` is mixed into key derivation.
    pub fn new(key: &'a SymmetricKey, passphrase: Option<&'a [u8]>) -> Self {
        Self { key, passphrase }
    }

    /// Encrypt every stream with fresh randomness from the OS.
    pub fn encrypt(&self, doc: Document, budget: &Budget) -> Result<Document> {
        self.encrypt_with_rng(doc, &mut OsRng, budget)
    }

    /// Encrypt every stream, drawing the salt and IVs from `rng`.
    pub fn encrypt_with_rng<R: RngCore + CryptoRng>(
        &self,
        mut doc: Document,
        rng: &mut R,
        budget: &Budget,
    ) -> Result<Document> {
        if doc.trailer().contains_key("Encrypt") {
            return Err(CryptoFailure::AlreadyEncrypted.into());
        }

        let mut salt = [0u8; SALT_LEN];
        rng.fill_bytes(&mut salt);
        let keys = DerivedKeys::derive(self.key.expose(), self.passphrase, &salt);

        let mut streams = 0;
        for (id, gen, obj) in doc.objects_mut() {
            let Object::Stream { dict, data } = obj else {
                continue;
            };
            budget.check()?;

            let mut iv = [0u8; BLOCK_SIZE];
            rng.fill_bytes(&mut iv);
            let ciphertext = aes256_encrypt(keys.encryption_key(), &iv, &data[..])
                .map_err(|e| Error::Internal(format!("stream {} encryption failed: {}", id, e)))?;
            let tag = keys.stream_tag(id, gen, &iv, &ciphertext)?;

            let mut payload = Vec::with_capacity(iv.len() + ciphertext.len() + tag.len());
            payload.extend_from_slice(&iv);
            payload.extend_from_slice(&ciphertext);
            payload.extend_from_slice(&tag);

            dict.insert("Length".to_string(), Object::Integer(payload.len() as i64));
            *data = Bytes::from(payload);
            streams += 1;
        }

        let encrypt = EncryptDict {
            salt,
            key_check: keys.key_check()?.to_vec(),
        };
        doc.trailer_mut()
            .insert("Encrypt".to_string(), encrypt.to_object());
        log::debug!("Encrypted {} streams", streams);
        Ok(doc)
    }

    /// Decrypt every stream and remove `/Encrypt`.
    ///
    /// A key check mismatch is `wrong_key`; a bad tag, length or padding on
    /// any stream is `corrupt_ciphertext`.
    pub fn decrypt(&self, mut doc: Document, budget: &Budget) -> Result<Document> {
        let encrypt = match doc.trailer().get("Encrypt") {
            Some(obj) => EncryptDict::from_object(obj)?,
            None => return Err(CryptoFailure::NotEncrypted.into()),
        };

        let keys = DerivedKeys::derive(self.key.expose(), self.passphrase, &encrypt.salt);
        if !keys.matches_key_check(&encrypt.key_check)? {
            return Err(CryptoFailure::WrongKey.into());
        }

        let mut streams = 0;
        for (id, gen, obj) in doc.objects_mut() {
            let Object::Stream { dict, data } = obj else {
                continue;
            };
            budget.check()?;

            if data.len() < MIN_PAYLOAD || (data.len() - BLOCK_SIZE - TAG_LEN) % BLOCK_SIZE != 0 {
                log::debug!("Stream {} has a truncated payload", id);
                return Err(CryptoFailure::CorruptCiphertext.into());
            }
            let (iv, rest) = data.split_at(BLOCK_SIZE);
            let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);
            if !keys.verify_stream_tag(id, gen, iv, ciphertext, tag)? {
                log::debug!("Stream {} failed authentication", id);
                return Err(CryptoFailure::CorruptCiphertext.into());
            }

            let mut iv_block = [0u8; BLOCK_SIZE];
            iv_block.copy_from_slice(iv);
            let plaintext = aes256_decrypt(keys.encryption_key(), &iv_block, ciphertext)
                .map_err(|_| CryptoFailure::CorruptCiphertext)?;

            dict.insert("Length".to_string(), Object::Integer(plaintext.len() as i64));
            *data = Bytes::from(plaintext);
            streams += 1;
        }

        doc.trailer_mut().shift_remove("Encrypt");
        log::debug!("Decrypted {} streams", streams);
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::parser_config::ParserOptions;

    const DOC: &[u8] = b"%PDF-1.7\n\
1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n\
3 0 obj\n<< /Type /Page /Parent 2 0 R /Contents 4 0 R >>\nendobj\n\
4 0 obj\n<< /Length 11 >>\nstream\nBT (hi) Tj\n\nendstream\nendobj\n\
trailer\n<< /Root 1 0 R >>\n";

    fn parse(bytes: &[u8]) -> Document {
        Document::parse(bytes.to_vec().into(), &ParserOptions::default()).unwrap()
    }

    fn crypto_reason(result: Result<Document>) -> CryptoFailure {
        match result {
            Err(Error::Crypto(reason)) => reason,
            other => panic!("expected crypto error, got {:?}", other.map(|d| d.object_count())),
        }
    }

    #[test]
    fn test_round_trip_restores_bytes() {
        let key = SymmetricKey::new([3; 32]);
        let handler = EncryptionHandler::new(&key, None);
        let original = parse(DOC);
        let expected = original.to_bytes().unwrap();

        let encrypted = handler.encrypt(original, &Budget::unlimited()).unwrap();
        let encrypted_bytes = encrypted.to_bytes().unwrap();
        assert!(!encrypted_bytes.windows(6).any(|w| w == b"(hi) T"));

        let reparsed = parse(&encrypted_bytes);
        let decrypted = handler.decrypt(reparsed, &Budget::unlimited()).unwrap();
        assert_eq!(decrypted.to_bytes().unwrap(), expected);
    }

    #[test]
    fn test_structure_is_preserved() {
        let key = SymmetricKey::new([3; 32]);
        let encrypted = EncryptionHandler::new(&key, None)
            .encrypt(parse(DOC), &Budget::unlimited())
            .unwrap();
        assert_eq!(encrypted.object_count(), 4);
        let Some(Object::Stream { dict, data }) = encrypted.get(4) else {
            panic!("stream expected");
        };
        // iv + one block + tag
        assert_eq!(data.len(), 64);
        assert_eq!(dict["Length"].as_integer(), Some(64));
        assert!(encrypted.trailer().contains_key("Encrypt"));
    }

    #[test]
    fn test_wrong_key_is_distinct_from_corruption() {
        let key = SymmetricKey::new([3; 32]);
        let wrong = SymmetricKey::new([4; 32]);
        let bytes = EncryptionHandler::new(&key, None)
            .encrypt(parse(DOC), &Budget::unlimited())
            .unwrap()
            .to_bytes()
            .unwrap();

        let result = EncryptionHandler::new(&wrong, None).decrypt(parse(&bytes), &Budget::unlimited());
        assert_eq!(crypto_reason(result), CryptoFailure::WrongKey);

        let mut doc = parse(&bytes);
        if let Some(Object::Stream { data, .. }) = doc.get_mut(4) {
            let mut flipped = data.to_vec();
            flipped[20] ^= 0x01;
            *data = Bytes::from(flipped);
        }
        let result = EncryptionHandler::new(&key, None).decrypt(doc, &Budget::unlimited());
        assert_eq!(crypto_reason(result), CryptoFailure::CorruptCiphertext);
    }

    #[test]
    fn test_passphrase_is_second_factor() {
        let key = SymmetricKey::new([3; 32]);
        let encrypted = EncryptionHandler::new(&key, Some(b"open sesame"))
            .encrypt(parse(DOC), &Budget::unlimited())
            .unwrap()
            .to_bytes()
            .unwrap();

        let without = EncryptionHandler::new(&key, None).decrypt(parse(&encrypted), &Budget::unlimited());
        assert_eq!(crypto_reason(without), CryptoFailure::WrongKey);

        let wrong = EncryptionHandler::new(&key, Some(b"open says me"))
            .decrypt(parse(&encrypted), &Budget::unlimited());
        assert_eq!(crypto_reason(wrong), CryptoFailure::WrongKey);

        assert!(EncryptionHandler::new(&key, Some(b"open sesame"))
            .decrypt(parse(&encrypted), &Budget::unlimited())
            .is_ok());
    }

    #[test]
    fn test_state_errors() {
        let key = SymmetricKey::new([3; 32]);
        let handler = EncryptionHandler::new(&key, None);
        let plain = handler.decrypt(parse(DOC), &Budget::unlimited());
        assert_eq!(crypto_reason(plain), CryptoFailure::NotEncrypted);

        let encrypted = handler.encrypt(parse(DOC), &Budget::unlimited()).unwrap();
        let again = handler.encrypt(encrypted, &Budget::unlimited());
        assert_eq!(crypto_reason(again), CryptoFailure::AlreadyEncrypted);
    }

    #[test]
    fn test_truncated_payload() {
        let key = SymmetricKey::new([3; 32]);
        let handler = EncryptionHandler::new(&key, None);
        let mut doc = handler.encrypt(parse(DOC), &Budget::unlimited()).unwrap();
        if let Some(Object::Stream { data, .. }) = doc.get_mut(4) {
            *data = data.slice(..40);
        }
        let result = handler.decrypt(doc, &Budget::unlimited());
        assert_eq!(crypto_reason(result), CryptoFailure::CorruptCiphertext);
    }
}
