//! Cryptographic transforms over parsed documents.
//!
//! [`CryptoTransform`] is the single dispatch point from an [`Operation`] to
//! the signer, the verifier or the encryption handler. It is a pure function
//! of the document, the operation, the key material and the parameters; the
//! only side input is the cancellation budget.

use crate::budget::Budget;
use crate::document::Document;
use crate::encryption::EncryptionHandler;
use crate::error::{Error, Result, ValidationFailure};
use crate::keystore::{KeyMaterial, TrustStore};
use crate::signatures::{
    DocumentSigner, SignOptions, SignatureVerifier, Verdict, VerifyOptions, DEFAULT_FIELD_NAME,
};
use chrono::{DateTime, Utc};
use std::fmt;
use zeroize::Zeroizing;

/// Transform operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Embed a signature
    Sign,
    /// Check an embedded signature
    Verify,
    /// Encrypt stream payloads
    Encrypt,
    /// Decrypt stream payloads
    Decrypt,
}

impl Operation {
    /// All operations.
    pub const ALL: [Operation; 4] = [
        Operation::Sign,
        Operation::Verify,
        Operation::Encrypt,
        Operation::Decrypt,
    ];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Sign => "sign",
            Operation::Verify => "verify",
            Operation::Encrypt => "encrypt",
            Operation::Decrypt => "decrypt",
        }
    }

    /// Parse a wire name. Names are case-sensitive.
    pub fn parse(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == name)
            .ok_or(Error::Validation(ValidationFailure::UnknownOperation))
    }

    /// Whether `material` can serve this operation.
    pub fn accepts(&self, material: &KeyMaterial) -> bool {
        match (self, material) {
            (Operation::Sign, KeyMaterial::Signing { .. }) => true,
            (Operation::Verify, KeyMaterial::Signing { .. } | KeyMaterial::Verifying { .. }) => true,
            (Operation::Encrypt | Operation::Decrypt, KeyMaterial::Symmetric(_)) => true,
            _ => false,
        }
    }

    /// Fail with a key usage error unless `material` can serve this operation.
    pub fn check_key(&self, key_id: &str, material: &KeyMaterial) -> Result<()> {
        if self.accepts(material) {
            Ok(())
        } else {
            Err(Error::KeyUsage {
                key_id: key_id.to_string(),
                operation: self.as_str(),
            })
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional request parameters.
#[derive(Clone, Default)]
pub struct TransformParams {
    /// Second factor for encrypt/decrypt
    pub passphrase: Option<Zeroizing<String>>,
    /// Signature field to create or verify
    pub field_name: Option<String>,
    /// Reason for signing
    pub reason: Option<String>,
    /// Signing location
    pub location: Option<String>,
    /// Signing time; now when `None`
    pub signing_time: Option<DateTime<Utc>>,
    /// Time at which certificates are judged on verify; now when `None`
    pub verify_at: Option<DateTime<Utc>>,
}

impl TransformParams {
    /// Empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the passphrase.
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(Zeroizing::new(passphrase.into()));
        self
    }

    /// Set the signature field name.
    pub fn with_field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = Some(name.into());
        self
    }

    /// Set the signing reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the signing location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Fix the signing time.
    pub fn with_signing_time(mut self, time: DateTime<Utc>) -> Self {
        self.signing_time = Some(time);
        self
    }

    /// Judge certificates at `time` when verifying.
    pub fn with_verify_at(mut self, time: DateTime<Utc>) -> Self {
        self.verify_at = Some(time);
        self
    }

    fn sign_options(&self) -> SignOptions {
        let mut options = SignOptions::default()
            .with_field_name(self.field_name.as_deref().unwrap_or(DEFAULT_FIELD_NAME));
        if let Some(reason) = &self.reason {
            options = options.with_reason(reason.as_str());
        }
        if let Some(location) = &self.location {
            options = options.with_location(location.as_str());
        }
        if let Some(time) = self.signing_time {
            options = options.with_signing_time(time);
        }
        options
    }

    fn verify_options(&self) -> VerifyOptions {
        let mut options = VerifyOptions::default();
        if let Some(name) = &self.field_name {
            options = options.with_field_name(name.as_str());
        }
        if let Some(time) = self.verify_at {
            options = options.at(time);
        }
        options
    }

    fn passphrase_bytes(&self) -> Option<&[u8]> {
        self.passphrase.as_ref().map(|p| p.as_bytes())
    }
}

impl fmt::Debug for TransformParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformParams")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("field_name", &self.field_name)
            .field("reason", &self.reason)
            .field("location", &self.location)
            .field("signing_time", &self.signing_time)
            .field("verify_at", &self.verify_at)
            .finish()
    }
}

/// Outcome of a transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformResult {
    /// Serialized output document
    Document(Vec<u8>),
    /// Verification verdict
    Verdict(Verdict),
}

impl TransformResult {
    /// Output bytes, for document operations.
    pub fn document(&self) -> Option<&[u8]> {
        match self {
            TransformResult::Document(bytes) => Some(bytes),
            TransformResult::Verdict(_) => None,
        }
    }

    /// Verdict, for `verify`.
    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            TransformResult::Verdict(verdict) => Some(verdict),
            TransformResult::Document(_) => None,
        }
    }
}

/// Applies operations with one key.
pub struct CryptoTransform<'a> {
    key_id: &'a str,
    material: &'a KeyMaterial,
    trust: &'a TrustStore,
}

impl<'a> CryptoTransform<'a> {
    /// Create a transform for the key `key_id`.
    pub fn new(key_id: &'a str, material: &'a KeyMaterial, trust: &'a TrustStore) -> Self {
        Self {
            key_id,
            material,
            trust,
        }
    }

    /// Apply `operation` to `doc`.
    pub fn apply(
        &self,
        doc: Document,
        operation: Operation,
        params: &TransformParams,
        budget: &Budget,
    ) -> Result<TransformResult> {
        operation.check_key(self.key_id, self.material)?;
        budget.check()?;

        match (operation, self.material) {
            (Operation::Sign, KeyMaterial::Signing { key, chain }) => {
                let signed = DocumentSigner::new(key, chain, params.sign_options())
                    .sign(doc, self.trust, budget)?;
                Ok(TransformResult::Document(signed))
            },
            (Operation::Verify, KeyMaterial::Signing { key, chain }) => {
                let public = key.public_key();
                let verdict = SignatureVerifier::new(&public, chain, self.trust).verify(
                    &doc,
                    &params.verify_options(),
                    budget,
                )?;
                Ok(TransformResult::Verdict(verdict))
            },
            (Operation::Verify, KeyMaterial::Verifying { key, chain }) => {
                let verdict = SignatureVerifier::new(key, chain, self.trust).verify(
                    &doc,
                    &params.verify_options(),
                    budget,
                )?;
                Ok(TransformResult::Verdict(verdict))
            },
            (Operation::Encrypt, KeyMaterial::Symmetric(key)) => {
                let encrypted = EncryptionHandler::new(key, params.passphrase_bytes()).encrypt(doc, budget)?;
                budget.check()?;
                Ok(TransformResult::Document(encrypted.to_bytes()?))
            },
            (Operation::Decrypt, KeyMaterial::Symmetric(key)) => {
                let decrypted = EncryptionHandler::new(key, params.passphrase_bytes()).decrypt(doc, budget)?;
                budget.check()?;
                Ok(TransformResult::Document(decrypted.to_bytes()?))
            },
            _ => Err(Error::KeyUsage {
                key_id: self.key_id.to_string(),
                operation: operation.as_str(),
            }),
        }
    }
}
