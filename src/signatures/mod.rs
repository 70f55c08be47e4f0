//! Digital signatures.
//!
//! This module creates and verifies signatures embedded in documents.
//!
//! ## Features
//!
//! - **Signature Creation**: Sign with RSA (PKCS#1 v1.5) or Ed25519 keys
//! - **Signature Verification**: Three-way verdicts (`valid`, `invalid`, `indeterminate`)
//! - **Certificate Handling**: Validity windows and chains to trust anchors
//! - **ByteRange Calculation**: Fixed-width placeholders patched in place
//!
//! ## Signature Types Supported
//!
//! - `docseal.rsa.sha256` - RSA PKCS#1 v1.5 over the SHA-256 digest
//! - `docseal.ed25519.sha256` - Ed25519 over the SHA-256 digest
//!
//! ## Example
//!
//! ```ignore
//! use docseal::signatures::{DocumentSigner, SignatureVerifier, SignOptions, VerifyOptions};
//!
//! let signed = DocumentSigner::new(&key, &chain, SignOptions::default())
//!     .sign(doc, &trust, &budget)?;
//!
//! let doc = Document::parse(signed.into(), &ParserOptions::default())?;
//! let verdict = SignatureVerifier::new(&key.public_key(), &chain, &trust)
//!     .verify(&doc, &VerifyOptions::default(), &budget)?;
//! assert!(verdict.is_valid());
//! ```

mod byterange;
mod signer;
mod types;
mod verifier;

pub use byterange::{ByteRangeCalculator, BYTE_RANGE_PLACEHOLDER};
pub use signer::{compute_digest, DocumentSigner};
pub use types::{
    format_pdf_date, parse_pdf_date, SignOptions, Verdict, VerdictReason, VerificationStatus,
    VerifyOptions, DEFAULT_FIELD_NAME, SIGNATURE_FILTER,
};
pub use verifier::SignatureVerifier;
