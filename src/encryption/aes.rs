//! AES-256 in CBC mode with PKCS#7 padding.
//!
//! Stream payloads are encrypted block by block; padding is applied and
//! checked here so the cipher runs without the `alloc` feature.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use cbc::{Decryptor, Encryptor};

type Aes256CbcEnc = Encryptor<Aes256>;
type Aes256CbcDec = Decryptor<Aes256>;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Encrypt data using AES-256 in CBC mode with PKCS#7 padding.
///
/// # Arguments
///
/// * `key` - The 32-byte encryption key
/// * `iv` - The 16-byte initialization vector
/// * `data` - The data to encrypt
pub fn aes256_encrypt(key: &[u8; 32], iv: &[u8; BLOCK_SIZE], data: &[u8]) -> Result<Vec<u8>, &'static str> {
    // Apply PKCS#7 padding manually; a full block when already aligned
    let mut padded = data.to_vec();
    let padding_len = BLOCK_SIZE - (data.len() % BLOCK_SIZE);
    padded.extend(std::iter::repeat(padding_len as u8).take(padding_len));

    let len = padded.len();
    let cipher = Aes256CbcEnc::new(key.into(), iv.into());
    cipher
        .encrypt_padded_mut::<aes::cipher::block_padding::NoPadding>(&mut padded, len)
        .map_err(|_| "Encryption failed")?;
    Ok(padded)
}

/// Decrypt data using AES-256 in CBC mode and remove PKCS#7 padding.
///
/// # Arguments
///
/// * `key` - The 32-byte encryption key
/// * `iv` - The 16-byte initialization vector
/// * `data` - The encrypted data
///
/// # Returns
///
/// The decrypted data with padding removed, or an error if the length or
/// padding is wrong
pub fn aes256_decrypt(key: &[u8; 32], iv: &[u8; BLOCK_SIZE], data: &[u8]) -> Result<Vec<u8>, &'static str> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err("Encrypted data length must be a non-zero multiple of 16");
    }

    let mut buffer = data.to_vec();
    let cipher = Aes256CbcDec::new(key.into(), iv.into());
    let decrypted = cipher
        .decrypt_padded_mut::<aes::cipher::block_padding::NoPadding>(&mut buffer)
        .map_err(|_| "Decryption failed")?;

    let padding_len = decrypted[decrypted.len() - 1] as usize;
    if padding_len == 0 || padding_len > BLOCK_SIZE {
        return Err("Invalid PKCS#7 padding");
    }

    // Verify padding
    let data_len = decrypted.len() - padding_len;
    if decrypted[data_len..].iter().any(|&b| b != padding_len as u8) {
        return Err("Invalid PKCS#7 padding");
    }

    Ok(decrypted[..data_len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x42; 32];
    const IV: [u8; 16] = [0x24; 16];

    #[test]
    fn test_aes256_roundtrip() {
        let plaintext = b"Hello, World! This is a test of AES-256 encryption.";
        let encrypted = aes256_encrypt(&KEY, &IV, plaintext).unwrap();
        assert_eq!(encrypted.len() % 16, 0);
        assert_ne!(&encrypted[..16], &plaintext[..16]);

        let decrypted = aes256_decrypt(&KEY, &IV, &encrypted).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_first_block_matches_known_answer() {
        // NIST SP 800-38A, F.2.5 CBC-AES256.Encrypt, block 1
        let key: [u8; 32] = [
            0x60, 0x3d, 0xeb, 0x10, 0x15, 0xca, 0x71, 0xbe, 0x2b, 0x73, 0xae, 0xf0, 0x85, 0x7d, 0x77, 0x81,
            0x1f, 0x35, 0x2c, 0x07, 0x3b, 0x61, 0x08, 0xd7, 0x2d, 0x98, 0x10, 0xa3, 0x09, 0x14, 0xdf, 0xf4,
        ];
        let iv: [u8; 16] = std::array::from_fn(|i| i as u8);
        let plaintext = [
            0x6b, 0xc1, 0xbe, 0xe2, 0x2e, 0x40, 0x9f, 0x96, 0xe9, 0x3d, 0x7e, 0x11, 0x73, 0x93, 0x17, 0x2a,
        ];
        let expected = [
            0xf5, 0x8c, 0x4c, 0x04, 0xd6, 0xe5, 0xf1, 0xba, 0x77, 0x9e, 0xab, 0xfb, 0x5f, 0x7b, 0xfb, 0xd6,
        ];
        let encrypted = aes256_encrypt(&key, &iv, &plaintext).unwrap();
        assert_eq!(encrypted.len(), 32);
        assert_eq!(&encrypted[..16], &expected);
    }

    #[test]
    fn test_aligned_input_gets_full_padding_block() {
        let encrypted = aes256_encrypt(&KEY, &IV, &[7u8; 32]).unwrap();
        assert_eq!(encrypted.len(), 48);
        assert_eq!(aes256_decrypt(&KEY, &IV, &encrypted).unwrap(), vec![7u8; 32]);
    }

    #[test]
    fn test_empty_plaintext() {
        let encrypted = aes256_encrypt(&KEY, &IV, b"").unwrap();
        assert_eq!(encrypted.len(), 16);
        assert!(aes256_decrypt(&KEY, &IV, &encrypted).unwrap().is_empty());
    }

    #[test]
    fn test_bad_length_rejected() {
        assert!(aes256_decrypt(&KEY, &IV, &[0u8; 15]).is_err());
        assert!(aes256_decrypt(&KEY, &IV, &[]).is_err());
    }

    #[test]
    fn test_wrong_key_breaks_padding_or_content() {
        let encrypted = aes256_encrypt(&KEY, &IV, b"short").unwrap();
        match aes256_decrypt(&[0x43; 32], &IV, &encrypted) {
            Ok(plain) => assert_ne!(plain, b"short"),
            Err(e) => assert_eq!(e, "Invalid PKCS#7 padding"),
        }
    }
}
