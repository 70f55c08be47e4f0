//! Signature verification.
//!
//! Verification works on the exact bytes the document was parsed from.
//! Checks run in a fixed order and the first failing check decides the
//! verdict:
//!
//! 1. a signed field exists
//! 2. `/ByteRange` covers the file around exactly the `/Contents` string
//! 3. `/SubFilter` matches the key's scheme
//! 4. the signature matches the digest
//! 5. the certificate chain is current and trusted

use super::byterange::ByteRangeCalculator;
use super::types::{parse_pdf_date, Verdict, VerdictReason, VerifyOptions};
use crate::budget::Budget;
use crate::document::Document;
use crate::error::{CryptoFailure, Error, Result};
use crate::keystore::{Certificate, PublicKey, SignatureScheme, TrustStore, Validity};
use crate::object::{Dictionary, Object};
use crate::parser::decode_hex;
use sha2::{Digest, Sha256};

/// A signature field found in the document.
#[derive(Debug)]
struct SignedField<'d> {
    name: Option<String>,
    /// Object whose source span holds the signature dictionary
    holder: u32,
    sig: &'d Dictionary,
}

/// Verifier for embedded signatures.
pub struct SignatureVerifier<'a> {
    key: &'a PublicKey,
    chain: &'a [Certificate],
    trust: &'a TrustStore,
}

impl<'a> SignatureVerifier<'a> {
    /// Create a verifier for `key` with its certificate chain (leaf first).
    pub fn new(key: &'a PublicKey, chain: &'a [Certificate], trust: &'a TrustStore) -> Self {
        Self { key, chain, trust }
    }

    /// Verify one signature field of `doc`.
    ///
    /// A structurally unusable signature dictionary is an error; every other
    /// outcome is a [`Verdict`].
    pub fn verify(&self, doc: &Document, options: &VerifyOptions, budget: &Budget) -> Result<Verdict> {
        budget.check()?;
        let Some(field) = find_signed_field(doc, options.field_name.as_deref()) else {
            return Ok(Verdict::new(VerdictReason::SignatureMissing));
        };

        let contents = field
            .sig
            .get("Contents")
            .and_then(Object::as_string)
            .ok_or(Error::Crypto(CryptoFailure::InvalidSignature))?;
        let byte_range: Vec<i64> = field
            .sig
            .get("ByteRange")
            .and_then(Object::as_array)
            .ok_or(Error::Crypto(CryptoFailure::InvalidSignature))?
            .iter()
            .map(|v| v.as_integer().unwrap_or(-1))
            .collect();

        let reason = self.check(doc, &field, contents, &byte_range, options, budget)?;
        log::debug!(
            "Verified field {:?}: {}",
            field.name.as_deref().unwrap_or("<unnamed>"),
            reason.as_str()
        );

        let signed_at = field.sig.get("M").and_then(Object::as_string).map(|m| {
            let text = String::from_utf8_lossy(m);
            parse_pdf_date(&text)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| text.into_owned())
        });
        let signer = self
            .chain
            .first()
            .and_then(Certificate::common_name)
            .map(str::to_string)
            .or_else(|| {
                field
                    .sig
                    .get("Name")
                    .and_then(Object::as_string)
                    .map(|n| String::from_utf8_lossy(n).into_owned())
            });

        Ok(Verdict {
            field_name: field.name,
            signed_at,
            signer,
            ..Verdict::new(reason)
        })
    }

    fn check(
        &self,
        doc: &Document,
        field: &SignedField<'_>,
        contents: &[u8],
        byte_range: &[i64],
        options: &VerifyOptions,
        budget: &Budget,
    ) -> Result<VerdictReason> {
        let source = doc.source();
        let Some((ranges, gap)) = ByteRangeCalculator::validate_byte_range(byte_range, source.len()) else {
            return Ok(VerdictReason::ByteRangeMismatch);
        };
        if !gap_holds_contents(doc, field.holder, &gap, contents) {
            return Ok(VerdictReason::ByteRangeMismatch);
        }

        let scheme = field
            .sig
            .get("SubFilter")
            .and_then(Object::as_name)
            .and_then(SignatureScheme::from_sub_filter);
        if scheme != Some(self.key.scheme()) {
            return Ok(VerdictReason::SchemeMismatch);
        }

        budget.check()?;
        let Some(signed_bytes) = ByteRangeCalculator::extract_signed_bytes(source, &ranges) else {
            return Ok(VerdictReason::ByteRangeMismatch);
        };
        let digest: [u8; 32] = Sha256::digest(&signed_bytes).into();
        if !self.key.verify_digest(&digest, contents) {
            return Ok(VerdictReason::SignatureMismatch);
        }

        let Some(leaf) = self.chain.first() else {
            return Ok(VerdictReason::Verified);
        };
        match leaf.validity_at(options.at.timestamp()) {
            Validity::Expired => return Ok(VerdictReason::CertificateExpired),
            Validity::NotYetValid => return Ok(VerdictReason::CertificateNotYetValid),
            Validity::Valid => {},
        }
        if !self.trust.is_trusted_at(self.chain, options.at.timestamp()) {
            return Ok(VerdictReason::UntrustedChain);
        }
        Ok(VerdictReason::Verified)
    }
}

/// Find the named field, or the first field with a signature value.
fn find_signed_field<'d>(doc: &'d Document, name: Option<&str>) -> Option<SignedField<'d>> {
    let catalog = doc.get(doc.root()?.id)?.as_dict()?;
    let acroform = doc.resolve(catalog.get("AcroForm")?)?.as_dict()?;
    let fields = doc.resolve(acroform.get("Fields")?)?.as_array()?;

    for entry in fields {
        let Some(field_ref) = entry.as_reference() else {
            continue;
        };
        let Some(field) = doc.get(field_ref.id).and_then(Object::as_dict) else {
            continue;
        };
        let field_name = field
            .get("T")
            .and_then(Object::as_string)
            .map(|t| String::from_utf8_lossy(t).into_owned());
        if let Some(wanted) = name {
            if field_name.as_deref() != Some(wanted) {
                continue;
            }
        }
        if field.get("FT").and_then(Object::as_name) != Some("Sig") {
            continue;
        }

        let (holder, sig) = match field.get("V") {
            Some(Object::Reference(r)) => (r.id, doc.get(r.id).and_then(Object::as_dict)),
            Some(Object::Dictionary(d)) => (field_ref.id, Some(d)),
            _ => (field_ref.id, None),
        };
        if let Some(sig) = sig {
            return Some(SignedField {
                name: field_name,
                holder,
                sig,
            });
        }
        if name.is_some() {
            return None;
        }
    }
    None
}

/// Whether `gap` is exactly a hex string inside the holder object whose
/// digits decode to `contents`.
fn gap_holds_contents(doc: &Document, holder: u32, gap: &std::ops::Range<usize>, contents: &[u8]) -> bool {
    let Some(span) = doc.span(holder) else {
        return false;
    };
    if gap.start < span.start || gap.end > span.end || gap.len() < 2 {
        return false;
    }
    let bytes = &doc.source()[gap.clone()];
    if bytes[0] != b'<' || bytes[bytes.len() - 1] != b'>' {
        return false;
    }
    let digits = &bytes[1..bytes.len() - 1];
    if !digits.iter().all(u8::is_ascii_hexdigit) {
        return false;
    }
    decode_hex(digits).is_some_and(|decoded| decoded == contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::PrivateKey;
    use crate::parser_config::ParserOptions;
    use crate::signatures::{DocumentSigner, SignOptions, VerificationStatus};

    const DOC: &[u8] = b"%PDF-1.7\n\
1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n\
trailer\n<< /Root 1 0 R >>\n";

    fn key(name: &str) -> PrivateKey {
        let path = format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name);
        PrivateKey::from_pkcs8_pem(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    fn parse(bytes: &[u8]) -> Document {
        Document::parse(bytes.to_vec().into(), &ParserOptions::default()).unwrap()
    }

    fn signed(key: &PrivateKey) -> Vec<u8> {
        DocumentSigner::new(key, &[], SignOptions::default())
            .sign(parse(DOC), &TrustStore::default(), &Budget::unlimited())
            .unwrap()
    }

    fn verify(bytes: &[u8], key: &PublicKey) -> Verdict {
        let trust = TrustStore::default();
        SignatureVerifier::new(key, &[], &trust)
            .verify(&parse(bytes), &VerifyOptions::default(), &Budget::unlimited())
            .unwrap()
    }

    #[test]
    fn test_round_trip_valid() {
        let key = key("ed25519_signer.key.pem");
        let verdict = verify(&signed(&key), &key.public_key());
        assert_eq!(verdict.status, VerificationStatus::Valid);
        assert_eq!(verdict.reason, VerdictReason::Verified);
        assert_eq!(verdict.field_name.as_deref(), Some("Signature1"));
        assert!(verdict.signed_at.is_some());
    }

    #[test]
    fn test_other_key_is_invalid() {
        let signer = key("ed25519_signer.key.pem");
        let other = key("ed25519_other.key.pem");
        let verdict = verify(&signed(&signer), &other.public_key());
        assert_eq!(verdict.reason, VerdictReason::SignatureMismatch);
        assert_eq!(verdict.status, VerificationStatus::Invalid);
    }

    #[test]
    fn test_scheme_mismatch() {
        let signer = key("ed25519_signer.key.pem");
        let rsa = key("rsa_signer.key.pem");
        let verdict = verify(&signed(&signer), &rsa.public_key());
        assert_eq!(verdict.reason, VerdictReason::SchemeMismatch);
    }

    #[test]
    fn test_unsigned_document() {
        let key = key("ed25519_signer.key.pem");
        let verdict = verify(DOC, &key.public_key());
        assert_eq!(verdict.reason, VerdictReason::SignatureMissing);
        assert_eq!(verdict.status, VerificationStatus::Invalid);
    }

    #[test]
    fn test_unknown_field_name() {
        let key = key("ed25519_signer.key.pem");
        let bytes = signed(&key);
        let trust = TrustStore::default();
        let public = key.public_key();
        let verdict = SignatureVerifier::new(&public, &[], &trust)
            .verify(
                &parse(&bytes),
                &VerifyOptions::default().with_field_name("Nope"),
                &Budget::unlimited(),
            )
            .unwrap();
        assert_eq!(verdict.reason, VerdictReason::SignatureMissing);
    }

    #[test]
    fn test_tampered_content_is_invalid() {
        let key = key("ed25519_signer.key.pem");
        let mut bytes = signed(&key);
        let at = bytes.windows(5).position(|w| w == b"Pages").unwrap();
        bytes[at] = b'Q';
        let verdict = verify(&bytes, &key.public_key());
        assert_eq!(verdict.reason, VerdictReason::SignatureMismatch);
    }

    #[test]
    fn test_non_string_contents_is_error() {
        let input = b"%PDF-1.7\n\
1 0 obj\n<< /Type /Catalog /AcroForm << /Fields [2 0 R] >> >>\nendobj\n\
2 0 obj\n<< /FT /Sig /T (Signature1) /V 3 0 R >>\nendobj\n\
3 0 obj\n<< /Type /Sig /Contents 42 /ByteRange [0 1 2 3] >>\nendobj\n\
trailer\n<< /Root 1 0 R >>\n";
        let key = key("ed25519_signer.key.pem");
        let trust = TrustStore::default();
        let public = key.public_key();
        let err = SignatureVerifier::new(&public, &[], &trust)
            .verify(&parse(input), &VerifyOptions::default(), &Budget::unlimited())
            .unwrap_err();
        assert!(matches!(err, Error::Crypto(CryptoFailure::InvalidSignature)));
    }

    #[test]
    fn test_byte_range_must_reach_end() {
        let input = b"%PDF-1.7\n\
1 0 obj\n<< /Type /Catalog /AcroForm << /Fields [2 0 R] >> >>\nendobj\n\
2 0 obj\n<< /FT /Sig /T (Signature1) /V 3 0 R >>\nendobj\n\
3 0 obj\n<< /Type /Sig /SubFilter /docseal.ed25519.sha256 /Contents <00> /ByteRange [0 1 2 3] >>\nendobj\n\
trailer\n<< /Root 1 0 R >>\n";
        let key = key("ed25519_signer.key.pem");
        let verdict = verify(input, &key.public_key());
        assert_eq!(verdict.reason, VerdictReason::ByteRangeMismatch);
    }
}
