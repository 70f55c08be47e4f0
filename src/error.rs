//! Error types for the document transform service.
//!
//! Every failure a request can hit is one of the variants below. Reason enums
//! carry stable snake_case names that are safe to put on the wire; none of the
//! variants ever hold key material or raw document content.

use std::fmt;

/// Result type alias for docseal operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a document failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseFailure {
    /// Missing or malformed `%PDF-M.m` header
    InvalidHeader,
    /// A token appeared where the grammar does not allow it
    UnexpectedToken,
    /// Input ended in the middle of a construct
    Truncated,
    /// Numeric token out of range or malformed
    InvalidNumber,
    /// Hex string with non-hex content
    InvalidHexString,
    /// Stream dictionary without a direct `/Length`
    MissingLength,
    /// Declared stream length runs past the end of the input
    LengthExceedsContent,
    /// `endstream` not found right after the declared length
    MissingEndstream,
    /// Indirect object not closed by `endobj`
    MissingEndobj,
    /// The same object number defined twice
    DuplicateObject,
    /// No trailer dictionary
    MissingTrailer,
    /// Trailer without a `/Root` reference
    MissingRoot,
    /// Cross-reference entry does not match the object's real offset
    XrefMismatch,
    /// Reference to an object that is not defined
    DanglingReference,
    /// Reference cycle in the object graph
    CyclicReference,
    /// Nesting or reference depth above the configured ceiling
    DepthExceeded,
    /// More indirect objects than the configured ceiling
    TooManyObjects,
}

impl ParseFailure {
    /// Stable wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseFailure::InvalidHeader => "invalid_header",
            ParseFailure::UnexpectedToken => "unexpected_token",
            ParseFailure::Truncated => "truncated",
            ParseFailure::InvalidNumber => "invalid_number",
            ParseFailure::InvalidHexString => "invalid_hex_string",
            ParseFailure::MissingLength => "missing_length",
            ParseFailure::LengthExceedsContent => "length_exceeds_content",
            ParseFailure::MissingEndstream => "missing_endstream",
            ParseFailure::MissingEndobj => "missing_endobj",
            ParseFailure::DuplicateObject => "duplicate_object",
            ParseFailure::MissingTrailer => "missing_trailer",
            ParseFailure::MissingRoot => "missing_root",
            ParseFailure::XrefMismatch => "xref_mismatch",
            ParseFailure::DanglingReference => "dangling_reference",
            ParseFailure::CyclicReference => "cyclic_reference",
            ParseFailure::DepthExceeded => "depth_exceeded",
            ParseFailure::TooManyObjects => "too_many_objects",
        }
    }
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a cryptographic transform failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CryptoFailure {
    /// Key check value did not match: wrong key or passphrase
    WrongKey,
    /// Ciphertext failed authentication or was truncated
    CorruptCiphertext,
    /// Signature dictionary is structurally unusable
    InvalidSignature,
    /// Signing certificate chain does not reach a trust anchor
    UntrustedChain,
    /// Signing certificate is past its validity period
    CertificateExpired,
    /// Signing certificate is not valid yet
    CertificateNotYetValid,
    /// The requested signature field already carries a signature
    AlreadySigned,
    /// Document already carries a docseal encryption dictionary
    AlreadyEncrypted,
    /// Document has no docseal encryption dictionary
    NotEncrypted,
    /// Operation needs a plaintext document
    DocumentEncrypted,
    /// The signature primitive reported an error
    SigningFailed,
    /// Signature does not fit the reserved placeholder
    PlaceholderOverflow,
}

impl CryptoFailure {
    /// Stable wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CryptoFailure::WrongKey => "wrong_key",
            CryptoFailure::CorruptCiphertext => "corrupt_ciphertext",
            CryptoFailure::InvalidSignature => "invalid_signature",
            CryptoFailure::UntrustedChain => "untrusted_chain",
            CryptoFailure::CertificateExpired => "certificate_expired",
            CryptoFailure::CertificateNotYetValid => "certificate_not_yet_valid",
            CryptoFailure::AlreadySigned => "already_signed",
            CryptoFailure::AlreadyEncrypted => "already_encrypted",
            CryptoFailure::NotEncrypted => "not_encrypted",
            CryptoFailure::DocumentEncrypted => "document_encrypted",
            CryptoFailure::SigningFailed => "signing_failed",
            CryptoFailure::PlaceholderOverflow => "placeholder_overflow",
        }
    }
}

impl fmt::Display for CryptoFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request was rejected before any work was done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationFailure {
    /// Body is not the expected JSON shape
    MalformedBody,
    /// Operation name is not one of sign/verify/encrypt/decrypt
    UnknownOperation,
    /// Key id empty, too long, or with forbidden characters
    InvalidKeyId,
    /// Document payload missing
    EmptyDocument,
    /// Document payload is not valid base64
    InvalidEncoding,
    /// Signature field name malformed
    InvalidFieldName,
    /// Passphrase too long
    InvalidPassphrase,
    /// Reason or location text too long
    InvalidSignerText,
    /// A parameter was supplied that the operation does not accept
    UnexpectedParameter,
    /// Timestamp parameter is not RFC 3339
    InvalidTimestamp,
    /// Timeout override is not a positive number of seconds
    InvalidTimeout,
    /// Declared media type is not a PDF
    UnsupportedMediaType,
}

impl ValidationFailure {
    /// Stable wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationFailure::MalformedBody => "malformed_body",
            ValidationFailure::UnknownOperation => "unknown_operation",
            ValidationFailure::InvalidKeyId => "invalid_key_id",
            ValidationFailure::EmptyDocument => "empty_document",
            ValidationFailure::InvalidEncoding => "invalid_encoding",
            ValidationFailure::InvalidFieldName => "invalid_field_name",
            ValidationFailure::InvalidPassphrase => "invalid_passphrase",
            ValidationFailure::InvalidSignerText => "invalid_signer_text",
            ValidationFailure::UnexpectedParameter => "unexpected_parameter",
            ValidationFailure::InvalidTimestamp => "invalid_timestamp",
            ValidationFailure::InvalidTimeout => "invalid_timeout",
            ValidationFailure::UnsupportedMediaType => "unsupported_media_type",
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types that can occur while serving a transform request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed request shape
    #[error("Invalid request: {0}")]
    Validation(ValidationFailure),

    /// Malformed document
    #[error("Failed to parse document at byte {offset}: {reason}")]
    Parse {
        /// Byte offset where parsing stopped
        offset: usize,
        /// Reason for the failure
        reason: ParseFailure,
    },

    /// Document rejected by the size ceiling before parsing
    #[error("Document of {size} bytes exceeds limit of {limit} bytes")]
    DocumentTooLarge {
        /// Submitted size
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// Unknown key id
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Key exists but cannot serve the requested operation
    #[error("Key {key_id} cannot be used to {operation}")]
    KeyUsage {
        /// Key id
        key_id: String,
        /// Operation name
        operation: &'static str,
    },

    /// Operation-specific cryptographic failure
    #[error("Cryptographic operation failed: {0}")]
    Crypto(CryptoFailure),

    /// Request ran past its time budget
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// Invalid service or key configuration (startup only)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a parse error.
    pub fn parse(offset: usize, reason: ParseFailure) -> Self {
        Error::Parse { offset, reason }
    }

    /// Wire name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::Parse { .. } => "parse_error",
            Error::DocumentTooLarge { .. } => "document_too_large",
            Error::KeyNotFound(_) => "key_not_found",
            Error::KeyUsage { .. } => "key_usage",
            Error::Crypto(_) => "crypto_error",
            Error::Timeout(_) => "timeout",
            Error::Config(_) | Error::Internal(_) | Error::Io(_) => "internal_error",
        }
    }

    /// Reason string safe to return to a caller.
    ///
    /// Configuration and internal errors collapse to a fixed string; their
    /// details stay in the server log.
    pub fn public_reason(&self) -> String {
        match self {
            Error::Validation(reason) => reason.as_str().to_string(),
            Error::Parse { reason, .. } => reason.as_str().to_string(),
            Error::DocumentTooLarge { limit, .. } => format!("limit_{}_bytes", limit),
            Error::KeyNotFound(_) => "unknown_key_id".to_string(),
            Error::KeyUsage { operation, .. } => format!("key_not_usable_for_{}", operation),
            Error::Crypto(reason) => reason.as_str().to_string(),
            Error::Timeout(_) => "deadline_exceeded".to_string(),
            Error::Config(_) | Error::Internal(_) | Error::Io(_) => "internal".to_string(),
        }
    }
}

impl From<ValidationFailure> for Error {
    fn from(reason: ValidationFailure) -> Self {
        Error::Validation(reason)
    }
}

impl From<CryptoFailure> for Error {
    fn from(reason: CryptoFailure) -> Self {
        Error::Crypto(reason)
    }
}
