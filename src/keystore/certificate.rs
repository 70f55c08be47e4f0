//! X.509 certificates and trust anchors.
//!
//! Certificates are kept as DER plus the few fields the service needs
//! (subject, issuer, validity window, CA flag). Chain checks re-parse the
//! DER on demand.

use crate::error::{Error, Result};
use x509_parser::pem::Pem;

/// Certificate validity at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// Inside the validity window
    Valid,
    /// Past `notAfter`
    Expired,
    /// Before `notBefore`
    NotYetValid,
}

/// A parsed X.509 certificate.
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    subject: String,
    issuer: String,
    common_name: Option<String>,
    not_before: i64,
    not_after: i64,
    is_ca: bool,
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("is_ca", &self.is_ca)
            .finish()
    }
}

impl Certificate {
    /// Parse a DER-encoded certificate.
    pub fn from_der(der: Vec<u8>) -> Result<Self> {
        let (subject, issuer, common_name, not_before, not_after, is_ca) = {
            let (_, cert) = x509_parser::parse_x509_certificate(&der)
                .map_err(|e| Error::Config(format!("invalid certificate: {}", e)))?;
            let common_name = cert
                .subject()
                .iter_common_name()
                .next()
                .and_then(|cn| cn.as_str().ok())
                .map(str::to_string);
            // an unreadable basicConstraints extension counts as not a CA
            let is_ca = cert
                .basic_constraints()
                .ok()
                .flatten()
                .is_some_and(|bc| bc.value.ca);
            (
                cert.subject().to_string(),
                cert.issuer().to_string(),
                common_name,
                cert.validity().not_before.timestamp(),
                cert.validity().not_after.timestamp(),
                is_ca,
            )
        };

        Ok(Self {
            der,
            subject,
            issuer,
            common_name,
            not_before,
            not_after,
            is_ca,
        })
    }

    /// Parse every `CERTIFICATE` block in a PEM bundle, in file order.
    pub fn parse_pem_bundle(pem: &[u8]) -> Result<Vec<Self>> {
        let mut certs = Vec::new();
        for block in Pem::iter_from_buffer(pem) {
            let block = block.map_err(|e| Error::Config(format!("invalid PEM: {}", e)))?;
            if block.label == "CERTIFICATE" {
                certs.push(Self::from_der(block.contents)?);
            }
        }
        if certs.is_empty() {
            return Err(Error::Config("no certificate found in PEM data".to_string()));
        }
        Ok(certs)
    }

    /// DER encoding.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Subject distinguished name.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Issuer distinguished name.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Subject common name, if any.
    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// Whether basicConstraints marks this certificate as a CA.
    pub fn is_ca(&self) -> bool {
        self.is_ca
    }

    /// Validity at a Unix timestamp.
    pub fn validity_at(&self, unix_time: i64) -> Validity {
        if unix_time < self.not_before {
            Validity::NotYetValid
        } else if unix_time > self.not_after {
            Validity::Expired
        } else {
            Validity::Valid
        }
    }

    /// DER-encoded SubjectPublicKeyInfo.
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        let (_, cert) = x509_parser::parse_x509_certificate(&self.der)
            .map_err(|e| Error::Internal(format!("certificate re-parse failed: {}", e)))?;
        Ok(cert.public_key().raw.to_vec())
    }

    /// Whether `issuer` names and signed this certificate.
    pub fn is_issued_by(&self, issuer: &Certificate) -> bool {
        if self.issuer != issuer.subject {
            return false;
        }
        let (Ok((_, cert)), Ok((_, parent))) = (
            x509_parser::parse_x509_certificate(&self.der),
            x509_parser::parse_x509_certificate(&issuer.der),
        ) else {
            return false;
        };
        cert.verify_signature(Some(parent.public_key())).is_ok()
    }

    /// Whether this certificate names and signed itself.
    pub fn is_self_signed(&self) -> bool {
        self.is_issued_by(self)
    }
}

/// Certificates that terminate trusted chains.
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    anchors: Vec<Certificate>,
}

impl TrustStore {
    /// Create a store from anchor certificates.
    pub fn new(anchors: Vec<Certificate>) -> Self {
        Self { anchors }
    }

    /// Add an anchor; duplicates are ignored.
    pub fn add(&mut self, anchor: Certificate) {
        if !self.anchors.iter().any(|a| a.der == anchor.der) {
            self.anchors.push(anchor);
        }
    }

    /// Number of anchors.
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    /// Whether the store has no anchors.
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Whether `chain` (leaf first) reaches an anchor now.
    pub fn is_trusted(&self, chain: &[Certificate]) -> bool {
        self.is_trusted_at(chain, chrono::Utc::now().timestamp())
    }

    /// Whether `chain` (leaf first) reaches an anchor at `unix_time`.
    ///
    /// Each certificate must either be an anchor, be issued by an anchor, or
    /// be issued by the next certificate in the chain. Every issuer must be a
    /// CA and valid at `unix_time`; intermediates must be valid too. The
    /// leaf's own window is left to the caller, which reports it separately.
    pub fn is_trusted_at(&self, chain: &[Certificate], unix_time: i64) -> bool {
        let usable_issuer =
            |issuer: &Certificate| issuer.is_ca && issuer.validity_at(unix_time) == Validity::Valid;

        for (i, cert) in chain.iter().enumerate() {
            if i > 0 && cert.validity_at(unix_time) != Validity::Valid {
                log::debug!("Chain certificate {} is outside its validity window", cert.subject);
                return false;
            }
            if self.anchors.iter().any(|a| a.der == cert.der) {
                return true;
            }
            if self
                .anchors
                .iter()
                .any(|a| usable_issuer(a) && cert.is_issued_by(a))
            {
                return true;
            }
            match chain.get(i + 1) {
                Some(next) if usable_issuer(next) && cert.is_issued_by(next) => continue,
                _ => return false,
            }
        }
        false
    }
}
