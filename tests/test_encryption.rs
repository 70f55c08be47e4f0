//! Integration tests for document encryption.

use bytes::Bytes;
use docseal::budget::Budget;
use docseal::document::Document;
use docseal::encryption::{EncryptDict, EncryptionHandler, ENCRYPT_FILTER};
use docseal::error::{CryptoFailure, Error};
use docseal::keystore::SymmetricKey;
use docseal::object::Object;
use docseal::parser_config::ParserOptions;
use proptest::prelude::*;

/// A document with one page per entry of `contents`.
fn document_with_pages(contents: &[&[u8]]) -> Vec<u8> {
    let mut out = b"%PDF-1.7\n".to_vec();
    out.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
    let kids: Vec<String> = (0..contents.len())
        .map(|i| format!("{} 0 R", 3 + 2 * i))
        .collect();
    out.extend_from_slice(
        format!(
            "2 0 obj\n<< /Type /Pages /Kids [{}] /Count {} >>\nendobj\n",
            kids.join(" "),
            contents.len()
        )
        .as_bytes(),
    );
    for (i, content) in contents.iter().enumerate() {
        let page = 3 + 2 * i;
        let stream = page + 1;
        out.extend_from_slice(
            format!(
                "{} 0 obj\n<< /Type /Page /Parent 2 0 R /Contents {} 0 R >>\nendobj\n",
                page, stream
            )
            .as_bytes(),
        );
        out.extend_from_slice(
            format!("{} 0 obj\n<< /Length {} >>\nstream\n", stream, content.len()).as_bytes(),
        );
        out.extend_from_slice(content);
        out.extend_from_slice(b"\nendstream\nendobj\n");
    }
    out.extend_from_slice(b"trailer\n<< /Root 1 0 R /Info << /Title (Quarterly report) >> >>\n");
    out
}

fn parse(bytes: &[u8]) -> Document {
    Document::parse(Bytes::copy_from_slice(bytes), &ParserOptions::default()).unwrap()
}

fn encrypt(bytes: &[u8], key: &SymmetricKey, passphrase: Option<&[u8]>) -> Vec<u8> {
    EncryptionHandler::new(key, passphrase)
        .encrypt(parse(bytes), &Budget::unlimited())
        .unwrap()
        .to_bytes()
        .unwrap()
}

fn decrypt(bytes: &[u8], key: &SymmetricKey, passphrase: Option<&[u8]>) -> docseal::Result<Vec<u8>> {
    EncryptionHandler::new(key, passphrase)
        .decrypt(parse(bytes), &Budget::unlimited())?
        .to_bytes()
}

fn crypto_reason<T>(result: docseal::Result<T>) -> CryptoFailure {
    match result {
        Err(Error::Crypto(reason)) => reason,
        Err(other) => panic!("expected crypto error, got {}", other),
        Ok(_) => panic!("expected crypto error, got success"),
    }
}

#[test]
fn test_round_trip_is_byte_exact() {
    let input = document_with_pages(&[b"BT (page one) Tj", b"BT (page two) Tj"]);
    let key = SymmetricKey::new([0x11; 32]);

    let encrypted = encrypt(&input, &key, None);
    let decrypted = decrypt(&encrypted, &key, None).unwrap();
    assert_eq!(decrypted, parse(&input).to_bytes().unwrap());
}

#[test]
fn test_ciphertext_hides_stream_content() {
    let input = document_with_pages(&[b"BT (confidential figures) Tj"]);
    let encrypted = encrypt(&input, &SymmetricKey::new([0x11; 32]), None);
    assert!(!encrypted.windows(12).any(|w| w == b"confidential"));
}

#[test]
fn test_structure_and_metadata_preserved() {
    let input = document_with_pages(&[b"BT (a) Tj", b"BT (b) Tj", b"BT (c) Tj"]);
    let encrypted = parse(&encrypt(&input, &SymmetricKey::new([0x11; 32]), None));

    assert_eq!(encrypted.object_count(), parse(&input).object_count());
    assert!(encrypted.trailer().contains_key("Info"));
    let dict = EncryptDict::from_object(&encrypted.trailer()["Encrypt"]).unwrap();
    assert_eq!(dict.key_check.len(), 32);
    assert_eq!(
        encrypted.trailer()["Encrypt"].as_dict().unwrap()["Filter"].as_name(),
        Some(ENCRYPT_FILTER)
    );
    for (_, _, obj) in encrypted.objects() {
        if let Object::Stream { dict, data } = obj {
            assert_eq!(dict["Length"].as_integer(), Some(data.len() as i64));
        }
    }
}

#[test]
fn test_fresh_randomness_per_encryption() {
    let input = document_with_pages(&[b"BT (same input) Tj"]);
    let key = SymmetricKey::new([0x11; 32]);
    assert_ne!(encrypt(&input, &key, None), encrypt(&input, &key, None));
}

#[test]
fn test_wrong_key() {
    let input = document_with_pages(&[b"BT (x) Tj"]);
    let encrypted = encrypt(&input, &SymmetricKey::new([0x11; 32]), None);
    let result = decrypt(&encrypted, &SymmetricKey::new([0x12; 32]), None);
    assert_eq!(crypto_reason(result), CryptoFailure::WrongKey);
}

#[test]
fn test_wrong_passphrase_is_wrong_key() {
    let input = document_with_pages(&[b"BT (x) Tj"]);
    let key = SymmetricKey::new([0x11; 32]);
    let encrypted = encrypt(&input, &key, Some(b"first factor"));

    let result = decrypt(&encrypted, &key, Some(b"second guess"));
    assert_eq!(crypto_reason(result), CryptoFailure::WrongKey);
    assert!(decrypt(&encrypted, &key, Some(b"first factor")).is_ok());
}

#[test]
fn test_flipped_ciphertext_byte_is_corrupt() {
    let input = document_with_pages(&[b"BT (integrity matters) Tj"]);
    let key = SymmetricKey::new([0x11; 32]);
    let mut doc = parse(&encrypt(&input, &key, None));

    let Some(Object::Stream { data, .. }) = doc.get_mut(4) else {
        panic!("stream 4 expected");
    };
    let mut flipped = data.to_vec();
    let last = flipped.len() - 40;
    flipped[last] ^= 0x80;
    *data = Bytes::from(flipped);

    let result = EncryptionHandler::new(&key, None).decrypt(doc, &Budget::unlimited());
    assert_eq!(crypto_reason(result), CryptoFailure::CorruptCiphertext);
}

#[test]
fn test_swapped_streams_are_corrupt() {
    let input = document_with_pages(&[b"BT (first) Tj", b"BT (second) Tj"]);
    let key = SymmetricKey::new([0x11; 32]);
    let mut doc = parse(&encrypt(&input, &key, None));

    let first = doc.get(4).cloned().unwrap();
    let second = doc.get(6).cloned().unwrap();
    doc.replace_object(4, second);
    doc.replace_object(6, first);

    let result = EncryptionHandler::new(&key, None).decrypt(doc, &Budget::unlimited());
    assert_eq!(crypto_reason(result), CryptoFailure::CorruptCiphertext);
}

#[test]
fn test_state_errors() {
    let input = document_with_pages(&[b"BT (x) Tj"]);
    let key = SymmetricKey::new([0x11; 32]);

    assert_eq!(crypto_reason(decrypt(&input, &key, None)), CryptoFailure::NotEncrypted);

    let encrypted = encrypt(&input, &key, None);
    let again = EncryptionHandler::new(&key, None).encrypt(parse(&encrypted), &Budget::unlimited());
    assert_eq!(crypto_reason(again), CryptoFailure::AlreadyEncrypted);
}

#[test]
fn test_cancelled_budget() {
    let input = document_with_pages(&[b"BT (x) Tj"]);
    let budget = Budget::unlimited();
    budget.cancel();
    let result = EncryptionHandler::new(&SymmetricKey::new([0x11; 32]), None).encrypt(parse(&input), &budget);
    assert!(matches!(result, Err(Error::Timeout(_))));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_decrypt_inverts_encrypt(
        first in proptest::collection::vec(any::<u8>(), 0..1024),
        second in proptest::collection::vec(any::<u8>(), 0..1024),
        key in proptest::array::uniform32(any::<u8>()),
    ) {
        let input = document_with_pages(&[&first, &second]);
        let key = SymmetricKey::new(key);
        let encrypted = encrypt(&input, &key, None);
        let decrypted = decrypt(&encrypted, &key, None).unwrap();
        prop_assert_eq!(decrypted, parse(&input).to_bytes().unwrap());
    }
}
