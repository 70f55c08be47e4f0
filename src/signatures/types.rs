//! Digital signature types and data structures.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

/// Field name used when the caller does not choose one.
pub const DEFAULT_FIELD_NAME: &str = "Signature1";

/// `/Filter` value of every signature this crate writes.
pub const SIGNATURE_FILTER: &str = "DocSeal.Sign";

/// Options for signing a document.
#[derive(Debug, Clone)]
pub struct SignOptions {
    /// Signature field name
    pub field_name: String,
    /// Reason for signing
    pub reason: Option<String>,
    /// Location where the document was signed
    pub location: Option<String>,
    /// Signing time, written as `/M` and used for certificate validity
    pub signing_time: DateTime<Utc>,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self {
            field_name: DEFAULT_FIELD_NAME.to_string(),
            reason: None,
            location: None,
            signing_time: Utc::now(),
        }
    }
}

impl SignOptions {
    /// Set the signature field name.
    pub fn with_field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = name.into();
        self
    }

    /// Set the reason for signing.
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
        self.signing_time = time;
        self
    }
}

/// Options for verifying a document.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Field to verify; the first signed field when `None`
    pub field_name: Option<String>,
    /// Time at which certificates are judged
    pub at: DateTime<Utc>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            field_name: None,
            at: Utc::now(),
        }
    }
}

impl VerifyOptions {
    /// Verify a specific field.
    pub fn with_field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = Some(name.into());
        self
    }

    /// Judge certificates at `time`.
    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.at = time;
        self
    }
}

/// Verification status of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Signature is cryptographically sound and the certificates check out
    Valid,
    /// Signature does not match the document or the key
    Invalid,
    /// Signature matches but the certificates cannot be relied on
    Indeterminate,
}

impl VerificationStatus {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Valid => "valid",
            VerificationStatus::Invalid => "invalid",
            VerificationStatus::Indeterminate => "indeterminate",
        }
    }
}

/// Why a verdict came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictReason {
    /// Everything checked out
    Verified,
    /// No signed field (or no field with the requested name)
    SignatureMissing,
    /// `/ByteRange` does not cover the document around `/Contents`
    ByteRangeMismatch,
    /// `/SubFilter` does not match the key
    SchemeMismatch,
    /// Cryptographic check failed
    SignatureMismatch,
    /// Leaf certificate past `notAfter`
    CertificateExpired,
    /// Leaf certificate before `notBefore`
    CertificateNotYetValid,
    /// Chain does not reach a trust anchor
    UntrustedChain,
}

impl VerdictReason {
    /// Snake-case name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictReason::Verified => "verified",
            VerdictReason::SignatureMissing => "signature_missing",
            VerdictReason::ByteRangeMismatch => "byte_range_mismatch",
            VerdictReason::SchemeMismatch => "scheme_mismatch",
            VerdictReason::SignatureMismatch => "signature_mismatch",
            VerdictReason::CertificateExpired => "certificate_expired",
            VerdictReason::CertificateNotYetValid => "certificate_not_yet_valid",
            VerdictReason::UntrustedChain => "untrusted_chain",
        }
    }

    /// Status this reason implies.
    pub fn status(&self) -> VerificationStatus {
        match self {
            VerdictReason::Verified => VerificationStatus::Valid,
            VerdictReason::SignatureMissing
            | VerdictReason::ByteRangeMismatch
            | VerdictReason::SchemeMismatch
            | VerdictReason::SignatureMismatch => VerificationStatus::Invalid,
            VerdictReason::CertificateExpired
            | VerdictReason::CertificateNotYetValid
            | VerdictReason::UntrustedChain => VerificationStatus::Indeterminate,
        }
    }
}

/// Result of signature verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    /// Overall status
    pub status: VerificationStatus,
    /// Reason for the status
    pub reason: VerdictReason,
    /// Name of the verified field
    pub field_name: Option<String>,
    /// Signing time recorded in the signature (RFC 3339 when parseable)
    pub signed_at: Option<String>,
    /// Signer certificate common name, or `/Name`
    pub signer: Option<String>,
}

impl Verdict {
    /// Verdict with no field details.
    pub fn new(reason: VerdictReason) -> Self {
        Self {
            status: reason.status(),
            reason,
            field_name: None,
            signed_at: None,
            signer: None,
        }
    }

    /// Whether the status is `valid`.
    pub fn is_valid(&self) -> bool {
        self.status == VerificationStatus::Valid
    }
}

/// Format a time as `D:YYYYMMDDHHmmSSZ`.
pub fn format_pdf_date(time: &DateTime<Utc>) -> String {
    time.format("D:%Y%m%d%H%M%SZ").to_string()
}

/// Parse a `D:YYYYMMDDHHmmSSZ` date.
pub fn parse_pdf_date(text: &str) -> Option<DateTime<Utc>> {
    let digits = text.strip_prefix("D:")?.strip_suffix('Z')?;
    NaiveDateTime::parse_from_str(digits, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}
