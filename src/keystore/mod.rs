//! Key material for signing, verification and encryption.
//!
//! A [`KeyStore`] is loaded once at startup and is read-only afterwards, so
//! lookups need no locking. Handlers see it through the [`KeyResolver`]
//! trait, which lets tests inject their own store.
//!
//! ```text
//! KeysConfig (ids, kinds, sources, certificate files, anchors)
//!     ↓ load
//! KeyStore { id → Arc<KeyMaterial>, TrustStore }
//! ```

mod certificate;
mod material;
mod source;

pub use certificate::{Certificate, TrustStore, Validity};
pub use material::{
    KeyKind, KeyMaterial, PrivateKey, PublicKey, SignatureScheme, SymmetricKey, MIN_RSA_BITS,
    SYMMETRIC_KEY_LEN,
};
pub use source::{decode_symmetric, KeyEntryConfig, KeySource, KeysConfig};

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Longest accepted key id.
pub const MAX_KEY_ID_LEN: usize = 128;

/// Whether `id` is 1 to 128 characters of `[A-Za-z0-9._:-]`.
pub fn is_valid_key_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_KEY_ID_LEN
        && id
            .bytes()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, b'.' | b'_' | b':' | b'-'))
}

/// Lookup of key material by id.
pub trait KeyResolver: Send + Sync {
    /// Get the material for `key_id`.
    fn resolve(&self, key_id: &str) -> Result<Arc<KeyMaterial>>;

    /// Anchors used to judge certificate chains.
    fn trust_store(&self) -> &TrustStore;
}

/// Read-only store of key material.
#[derive(Debug, Default)]
pub struct KeyStore {
    keys: HashMap<String, Arc<KeyMaterial>>,
    trust: TrustStore,
}

impl KeyStore {
    /// Load every configured key and trust anchor.
    pub fn load(config: &KeysConfig) -> Result<Self> {
        let mut builder = Self::builder();

        for path in &config.trust_anchors {
            for cert in read_certificates(path)? {
                builder = builder.with_trust_anchor(cert);
            }
        }

        for entry in &config.entries {
            let material = load_entry(entry)?;
            builder = builder.with_key(&entry.id, material);
        }

        let store = builder.build()?;
        log::info!(
            "Loaded {} keys and {} trust anchors",
            store.keys.len(),
            store.trust.len()
        );
        for id in store.key_ids() {
            if let Some(material) = store.keys.get(id) {
                log::info!("  key {} ({})", id, material.kind().as_str());
            }
        }
        Ok(store)
    }

    /// Start building a store programmatically.
    pub fn builder() -> KeyStoreBuilder {
        KeyStoreBuilder::default()
    }

    /// Get the material for `key_id`.
    pub fn get(&self, key_id: &str) -> Result<Arc<KeyMaterial>> {
        self.keys
            .get(key_id)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(key_id.to_string()))
    }

    /// Configured key ids, sorted.
    pub fn key_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Trust anchors.
    pub fn trust(&self) -> &TrustStore {
        &self.trust
    }
}

impl KeyResolver for KeyStore {
    fn resolve(&self, key_id: &str) -> Result<Arc<KeyMaterial>> {
        self.get(key_id)
    }

    fn trust_store(&self) -> &TrustStore {
        &self.trust
    }
}

/// Builder for [`KeyStore`].
#[derive(Debug, Default)]
pub struct KeyStoreBuilder {
    keys: Vec<(String, KeyMaterial)>,
    anchors: Vec<Certificate>,
}

impl KeyStoreBuilder {
    /// Add key material under `id`.
    pub fn with_key(mut self, id: impl Into<String>, material: KeyMaterial) -> Self {
        self.keys.push((id.into(), material));
        self
    }

    /// Add a trust anchor.
    pub fn with_trust_anchor(mut self, anchor: Certificate) -> Self {
        self.anchors.push(anchor);
        self
    }

    /// Validate ids and certificate chains, then freeze the store.
    ///
    /// Self-signed leaf certificates on signing and verifying keys are
    /// pinned as trust anchors.
    pub fn build(self) -> Result<KeyStore> {
        let mut trust = TrustStore::default();
        for anchor in self.anchors {
            trust.add(anchor);
        }

        let mut keys = HashMap::with_capacity(self.keys.len());
        for (id, material) in self.keys {
            if !is_valid_key_id(&id) {
                return Err(Error::Config(format!("invalid key id {:?}", id)));
            }
            check_leaf_matches(&id, &material)?;
            if let Some(leaf) = material.chain().first() {
                if leaf.is_self_signed() {
                    trust.add(leaf.clone());
                }
            }
            if keys.insert(id.clone(), Arc::new(material)).is_some() {
                return Err(Error::Config(format!("duplicate key id {:?}", id)));
            }
        }

        Ok(KeyStore { keys, trust })
    }
}

fn read_certificates(path: &Path) -> Result<Vec<Certificate>> {
    let pem = std::fs::read(path).map_err(|e| {
        Error::Config(format!("cannot read certificate file {}: {}", path.display(), e))
    })?;
    Certificate::parse_pem_bundle(&pem)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

fn pem_text<'a>(id: &str, raw: &'a [u8]) -> Result<&'a str> {
    std::str::from_utf8(raw).map_err(|_| Error::Config(format!("key {} is not PEM text", id)))
}

fn load_entry(entry: &KeyEntryConfig) -> Result<KeyMaterial> {
    let raw = entry.source.read()?;
    let mut chain = Vec::new();
    for path in &entry.certificates {
        chain.extend(read_certificates(path)?);
    }

    let material = match entry.kind {
        KeyKind::Signing => {
            let key = PrivateKey::from_pkcs8_pem(pem_text(&entry.id, &raw)?)
                .map_err(|e| Error::Config(format!("key {}: {}", entry.id, e)))?;
            KeyMaterial::Signing { key, chain }
        },
        KeyKind::Verifying => {
            let text = pem_text(&entry.id, &raw)?;
            if text.contains("BEGIN CERTIFICATE") {
                // the source itself is the chain
                let mut certs = Certificate::parse_pem_bundle(text.as_bytes())?;
                certs.extend(chain);
                let key = PublicKey::from_spki_der(&certs[0].public_key_der()?)?;
                KeyMaterial::Verifying { key, chain: certs }
            } else {
                let key = PublicKey::from_public_key_pem(text)
                    .map_err(|e| Error::Config(format!("key {}: {}", entry.id, e)))?;
                KeyMaterial::Verifying { key, chain }
            }
        },
        KeyKind::Symmetric => {
            if !chain.is_empty() {
                return Err(Error::Config(format!(
                    "symmetric key {} cannot carry certificates",
                    entry.id
                )));
            }
            let key = decode_symmetric(&raw)
                .map_err(|e| Error::Config(format!("key {}: {}", entry.id, e)))?;
            KeyMaterial::Symmetric(key)
        },
    };
    log::debug!("Loaded key {} from {}", entry.id, entry.source);
    Ok(material)
}

fn check_leaf_matches(id: &str, material: &KeyMaterial) -> Result<()> {
    let (Some(leaf), Some(key)) = (material.chain().first(), material.public_key()) else {
        return Ok(());
    };
    let cert_key = PublicKey::from_spki_der(&leaf.public_key_der()?)?;
    if cert_key != key {
        return Err(Error::Config(format!(
            "certificate {} does not match key {}",
            leaf.subject(),
            id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
    }

    fn signing_entry(id: &str, key: &str, certs: &[&str]) -> KeyEntryConfig {
        KeyEntryConfig {
            id: id.to_string(),
            kind: KeyKind::Signing,
            source: KeySource::File { path: fixture(key) },
            certificates: certs.iter().map(|c| fixture(c)).collect(),
        }
    }

    #[test]
    fn test_key_id_rules() {
        assert!(is_valid_key_id("signer-1"));
        assert!(is_valid_key_id("org:team.key_2"));
        assert!(!is_valid_key_id(""));
        assert!(!is_valid_key_id("has space"));
        assert!(!is_valid_key_id("slash/id"));
        assert!(is_valid_key_id(&"k".repeat(128)));
        assert!(!is_valid_key_id(&"k".repeat(129)));
    }

    #[test]
    fn test_load_signing_key_with_certificate() {
        let config = KeysConfig {
            entries: vec![signing_entry(
                "ed",
                "ed25519_signer.key.pem",
                &["ed25519_signer.cert.pem"],
            )],
            trust_anchors: Vec::new(),
        };
        let store = KeyStore::load(&config).unwrap();
        let material = store.get("ed").unwrap();
        assert_eq!(material.kind(), KeyKind::Signing);
        assert_eq!(material.chain().len(), 1);
        // self-signed leaf is pinned
        assert_eq!(store.trust().len(), 1);
    }

    #[test]
    fn test_unknown_key() {
        let store = KeyStore::default();
        assert!(matches!(store.get("missing"), Err(Error::KeyNotFound(id)) if id == "missing"));
    }

    #[test]
    fn test_certificate_must_match_key() {
        let config = KeysConfig {
            entries: vec![signing_entry(
                "ed",
                "ed25519_signer.key.pem",
                &["ed25519_other.cert.pem"],
            )],
            trust_anchors: Vec::new(),
        };
        assert!(matches!(KeyStore::load(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let config = KeysConfig {
            entries: vec![
                signing_entry("dup", "ed25519_signer.key.pem", &[]),
                signing_entry("dup", "rsa_signer.key.pem", &[]),
            ],
            trust_anchors: Vec::new(),
        };
        let err = KeyStore::load(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_verifying_key_from_certificate() {
        let config = KeysConfig {
            entries: vec![KeyEntryConfig {
                id: "peer".to_string(),
                kind: KeyKind::Verifying,
                source: KeySource::File {
                    path: fixture("ca_issued.cert.pem"),
                },
                certificates: Vec::new(),
            }],
            trust_anchors: vec![fixture("root_ca.cert.pem")],
        };
        let store = KeyStore::load(&config).unwrap();
        let material = store.get("peer").unwrap();
        assert_eq!(material.kind(), KeyKind::Verifying);
        assert!(store.trust().is_trusted(material.chain()));
    }

    #[test]
    fn test_symmetric_key_from_env() {
        let var = "DOCSEAL_KEYSTORE_TEST_SYMMETRIC";
        std::env::set_var(var, "ab".repeat(32));
        let config = KeysConfig {
            entries: vec![KeyEntryConfig {
                id: "vault".to_string(),
                kind: KeyKind::Symmetric,
                source: KeySource::Env { var: var.to_string() },
                certificates: Vec::new(),
            }],
            trust_anchors: Vec::new(),
        };
        let store = KeyStore::load(&config).unwrap();
        match &*store.get("vault").unwrap() {
            KeyMaterial::Symmetric(key) => assert_eq!(key.expose(), &[0xAB; 32]),
            other => panic!("unexpected material {:?}", other),
        }
    }

    #[test]
    fn test_unreadable_source() {
        let config = KeysConfig {
            entries: vec![signing_entry("gone", "does_not_exist.pem", &[])],
            trust_anchors: Vec::new(),
        };
        assert!(matches!(KeyStore::load(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_resolver_trait_object() {
        let store = KeyStore::builder()
            .with_key("s", KeyMaterial::Symmetric(SymmetricKey::new([1; 32])))
            .build()
            .unwrap();
        let resolver: Arc<dyn KeyResolver> = Arc::new(store);
        assert!(resolver.resolve("s").is_ok());
        assert!(resolver.trust_store().is_empty());
    }
}
