//! Document signing.
//!
//! Signing adds a signature field to the catalog's `/AcroForm`, serializes
//! the document with placeholder `/ByteRange` and `/Contents` values, patches
//! the real byte range in place, then signs the SHA-256 digest of the
//! covered bytes and writes the signature into the `/Contents` gap.
//!
//! Serialization rewrites the whole file, which would move the ranges of any
//! signature already present. A document that already carries a signature
//! is refused with `already_signed` instead.

use super::byterange::{ByteRangeCalculator, BYTE_RANGE_PLACEHOLDER};
use super::types::{format_pdf_date, SignOptions, SIGNATURE_FILTER};
use crate::budget::Budget;
use crate::document::Document;
use crate::error::{CryptoFailure, Error, Result};
use crate::keystore::{Certificate, PrivateKey, TrustStore, Validity};
use crate::object::{Dictionary, Object, ObjectRef};
use sha2::{Digest, Sha256};

/// `/SigFlags` value: signatures exist, append-only.
const SIG_FLAGS: i64 = 3;

/// Signer that embeds a signature into a document.
pub struct DocumentSigner<'a> {
    key: &'a PrivateKey,
    chain: &'a [Certificate],
    options: SignOptions,
    byte_range_calc: ByteRangeCalculator,
}

impl<'a> DocumentSigner<'a> {
    /// Create a signer for `key` with its certificate chain (leaf first).
    pub fn new(key: &'a PrivateKey, chain: &'a [Certificate], options: SignOptions) -> Self {
        let byte_range_calc = ByteRangeCalculator::new(key.signature_len());
        Self {
            key,
            chain,
            options,
            byte_range_calc,
        }
    }

    /// Get the signing options.
    pub fn options(&self) -> &SignOptions {
        &self.options
    }

    /// Check the leaf certificate and chain at the signing time.
    pub fn check_certificates(&self, trust: &TrustStore) -> Result<()> {
        let Some(leaf) = self.chain.first() else {
            return Ok(());
        };
        match leaf.validity_at(self.options.signing_time.timestamp()) {
            Validity::Valid => {},
            Validity::Expired => return Err(CryptoFailure::CertificateExpired.into()),
            Validity::NotYetValid => return Err(CryptoFailure::CertificateNotYetValid.into()),
        }
        if !trust.is_trusted_at(self.chain, self.options.signing_time.timestamp()) {
            return Err(CryptoFailure::UntrustedChain.into());
        }
        Ok(())
    }

    /// Sign the document and return the signed file bytes.
    ///
    /// The returned bytes are final: re-serializing the document would move
    /// the signed ranges.
    pub fn sign(&self, mut doc: Document, trust: &TrustStore, budget: &Budget) -> Result<Vec<u8>> {
        if doc.trailer().contains_key("Encrypt") {
            return Err(CryptoFailure::DocumentEncrypted.into());
        }
        if has_signature(&doc) {
            log::debug!("Document already carries a signature; refusing to re-serialize it");
            return Err(CryptoFailure::AlreadySigned.into());
        }
        self.check_certificates(trust)?;
        budget.check()?;

        let sig_ref = doc.add_object(Object::Dictionary(self.build_signature_dictionary()));
        self.attach_field(&mut doc, sig_ref)?;

        let written = doc.write()?;
        let mut bytes = written.bytes;
        let span = written
            .spans
            .get(&sig_ref.id)
            .cloned()
            .ok_or_else(|| Error::Internal("signature object was not written".to_string()))?;

        // the placeholders precede every caller-supplied string in the dictionary
        let range_offset = ByteRangeCalculator::find_value_offset(&bytes, span.clone(), "ByteRange")
            .ok_or(Error::Crypto(CryptoFailure::SigningFailed))?;
        let contents_offset = ByteRangeCalculator::find_value_offset(&bytes, span, "Contents")
            .ok_or(Error::Crypto(CryptoFailure::SigningFailed))?;

        let byte_range = self
            .byte_range_calc
            .calculate_byte_range(bytes.len(), contents_offset);
        ByteRangeCalculator::patch_byte_range(&mut bytes, range_offset, &byte_range)?;

        budget.check()?;
        let digest = compute_digest(&bytes, &byte_range)?;
        let signature = self.key.sign_digest(&digest)?;
        self.byte_range_calc
            .insert_signature(&mut bytes, contents_offset, &signature)?;

        log::debug!(
            "Signed field {} with {} ({} bytes)",
            self.options.field_name,
            self.key.scheme().as_sub_filter(),
            bytes.len()
        );
        Ok(bytes)
    }

    /// Build the signature dictionary with placeholder values.
    pub fn build_signature_dictionary(&self) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.insert("Type".to_string(), Object::name("Sig"));
        dict.insert("Filter".to_string(), Object::name(SIGNATURE_FILTER));
        dict.insert(
            "SubFilter".to_string(),
            Object::name(self.key.scheme().as_sub_filter()),
        );
        dict.insert(
            "ByteRange".to_string(),
            Object::Array(vec![Object::Integer(BYTE_RANGE_PLACEHOLDER); 4]),
        );
        dict.insert(
            "Contents".to_string(),
            Object::String(vec![0u8; self.key.signature_len()]),
        );
        dict.insert(
            "M".to_string(),
            Object::String(format_pdf_date(&self.options.signing_time).into_bytes()),
        );
        if let Some(reason) = &self.options.reason {
            dict.insert("Reason".to_string(), Object::String(reason.as_bytes().to_vec()));
        }
        if let Some(location) = &self.options.location {
            dict.insert("Location".to_string(), Object::String(location.as_bytes().to_vec()));
        }
        if let Some(name) = self.chain.first().and_then(Certificate::common_name) {
            dict.insert("Name".to_string(), Object::String(name.as_bytes().to_vec()));
        }
        dict
    }

    /// Point a signature field at `sig_ref`, creating `/AcroForm` and the
    /// field as needed.
    fn attach_field(&self, doc: &mut Document, sig_ref: ObjectRef) -> Result<()> {
        let catalog_id = doc
            .root()
            .ok_or(Error::Crypto(CryptoFailure::SigningFailed))?
            .id;
        let field_name = self.options.field_name.as_bytes();

        // An indirect /AcroForm is edited in place; a direct one inside the catalog.
        let acroform_ref = doc
            .get(catalog_id)
            .and_then(Object::as_dict)
            .ok_or(Error::Crypto(CryptoFailure::SigningFailed))?
            .get("AcroForm")
            .and_then(Object::as_reference);
        // entries are kept as they are, references and direct dictionaries alike
        let mut fields: Vec<Object> = {
            let acroform = match acroform_ref {
                Some(r) => doc.get(r.id).and_then(Object::as_dict),
                None => doc
                    .get(catalog_id)
                    .and_then(Object::as_dict)
                    .and_then(|c| c.get("AcroForm"))
                    .and_then(Object::as_dict),
            };
            acroform
                .and_then(|form| form.get("Fields"))
                .and_then(|fields| doc.resolve(fields))
                .and_then(Object::as_array)
                .cloned()
                .unwrap_or_default()
        };

        let existing = fields.iter().position(|entry| {
            doc.resolve(entry)
                .and_then(Object::as_dict)
                .and_then(|f| f.get("T"))
                .and_then(Object::as_string)
                == Some(field_name)
        });

        match existing.map(|i| (i, fields[i].as_reference())) {
            Some((_, Some(field_ref))) => {
                let field = doc
                    .get_mut(field_ref.id)
                    .and_then(Object::as_dict_mut)
                    .ok_or(Error::Crypto(CryptoFailure::SigningFailed))?;
                fill_field(field, sig_ref)?;
            },
            Some((i, None)) => {
                let field = fields[i]
                    .as_dict_mut()
                    .ok_or(Error::Crypto(CryptoFailure::SigningFailed))?;
                fill_field(field, sig_ref)?;
                let acroform = acroform_dict_mut(doc, catalog_id, acroform_ref)?;
                acroform.insert("Fields".to_string(), Object::Array(fields));
            },
            None => {
                let mut field = Dictionary::new();
                field.insert("FT".to_string(), Object::name("Sig"));
                field.insert("T".to_string(), Object::String(field_name.to_vec()));
                field.insert("V".to_string(), Object::Reference(sig_ref));
                let field_ref = doc.add_object(Object::Dictionary(field));

                fields.push(Object::Reference(field_ref));
                let acroform = acroform_dict_mut(doc, catalog_id, acroform_ref)?;
                acroform.insert("Fields".to_string(), Object::Array(fields));
            },
        }

        let acroform = acroform_dict_mut(doc, catalog_id, acroform_ref)?;
        acroform.insert("SigFlags".to_string(), Object::Integer(SIG_FLAGS));
        Ok(())
    }
}

/// Turn an unsigned field into a signature field pointing at `sig_ref`.
fn fill_field(field: &mut Dictionary, sig_ref: ObjectRef) -> Result<()> {
    if field.get("V").is_some_and(|v| !v.is_null()) {
        return Err(CryptoFailure::AlreadySigned.into());
    }
    field.insert("FT".to_string(), Object::name("Sig"));
    field.insert("V".to_string(), Object::Reference(sig_ref));
    Ok(())
}

/// Whether any signature field in the document already holds a value.
fn has_signature(doc: &Document) -> bool {
    doc.objects().any(|(_, _, obj)| holds_signature(obj))
}

fn holds_signature(obj: &Object) -> bool {
    match obj {
        Object::Dictionary(dict) => {
            let signed = dict.get("FT").and_then(Object::as_name) == Some("Sig")
                && dict.get("V").is_some_and(|v| !v.is_null());
            signed || dict.values().any(holds_signature)
        },
        Object::Array(items) => items.iter().any(holds_signature),
        _ => false,
    }
}

fn acroform_dict_mut(
    doc: &mut Document,
    catalog_id: u32,
    acroform_ref: Option<ObjectRef>,
) -> Result<&mut Dictionary> {
    let missing = || Error::Crypto(CryptoFailure::SigningFailed);
    if let Some(r) = acroform_ref {
        return doc.get_mut(r.id).and_then(Object::as_dict_mut).ok_or_else(missing);
    }
    let catalog = doc
        .get_mut(catalog_id)
        .and_then(Object::as_dict_mut)
        .ok_or_else(missing)?;
    if !catalog.get("AcroForm").is_some_and(|f| f.as_dict().is_some()) {
        catalog.insert("AcroForm".to_string(), Object::Dictionary(Dictionary::new()));
    }
    catalog
        .get_mut("AcroForm")
        .and_then(Object::as_dict_mut)
        .ok_or_else(missing)
}

/// SHA-256 over the bytes a ByteRange covers.
pub fn compute_digest(data: &[u8], byte_range: &[i64; 4]) -> Result<[u8; 32]> {
    let mut ranges = [0usize; 4];
    for (slot, value) in ranges.iter_mut().zip(byte_range) {
        *slot = usize::try_from(*value).map_err(|_| Error::Crypto(CryptoFailure::SigningFailed))?;
    }
    let signed_bytes = ByteRangeCalculator::extract_signed_bytes(data, &ranges)
        .ok_or(Error::Crypto(CryptoFailure::SigningFailed))?;
    Ok(Sha256::digest(&signed_bytes).into())
}
