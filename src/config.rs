//! Service configuration.
//!
//! Built-in defaults, then an optional TOML file, then `DOCSEAL_*`
//! environment variables. Relative key and certificate paths in the file are
//! resolved against the file's directory.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8080"
//! workers = 4
//!
//! [limits]
//! max_size_bytes = 10485760
//! request_timeout_ms = 15000
//!
//! [keys]
//! trust_anchors = ["certs/root.pem"]
//!
//! [[keys.entries]]
//! id = "invoices"
//! kind = "signing"
//! source = { type = "file", path = "keys/invoices.key.pem" }
//! certificates = ["certs/invoices.pem"]
//! ```

use crate::error::{Error, Result};
use crate::handler::HandlerConfig;
use crate::keystore::KeysConfig;
use crate::parser_config::ParserOptions;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Largest accepted `max_object_depth`.
pub const MAX_OBJECT_DEPTH_CEILING: usize = 1000;

/// Top-level service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Listener settings
    pub server: ServerConfig,
    /// Resource limits
    pub limits: LimitsConfig,
    /// Key material
    pub keys: KeysConfig,
}

/// The `server` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,
    /// Async runtime worker threads
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            workers: std::thread::available_parallelism().map_or(4, |n| n.get()),
        }
    }
}

/// The `limits` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Document size ceiling
    pub max_size_bytes: usize,
    /// Nesting and reference depth ceiling
    pub max_object_depth: usize,
    /// Object count ceiling
    pub max_objects: usize,
    /// Wall-clock limit per request
    pub request_timeout_ms: u64,
    /// CPU-time limit per parse and transform job, measured as wall-clock time
    pub cpu_time_limit_ms: u64,
    /// Concurrent jobs per process
    pub max_in_flight: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let parser = ParserOptions::default();
        Self {
            max_size_bytes: parser.max_size_bytes,
            max_object_depth: parser.max_object_depth,
            max_objects: parser.max_objects,
            request_timeout_ms: 30_000,
            cpu_time_limit_ms: 20_000,
            max_in_flight: 8,
        }
    }
}

impl LimitsConfig {
    /// Parser limits.
    pub fn parser_options(&self) -> ParserOptions {
        ParserOptions::default()
            .with_max_size_bytes(self.max_size_bytes)
            .with_max_object_depth(self.max_object_depth)
            .with_max_objects(self.max_objects)
    }

    /// Request handler limits.
    pub fn handler_config(&self) -> HandlerConfig {
        HandlerConfig::default()
            .with_parser(self.parser_options())
            .with_request_timeout(Duration::from_millis(self.request_timeout_ms))
            .with_cpu_time_limit(Duration::from_millis(self.cpu_time_limit_ms))
            .with_max_in_flight(self.max_in_flight)
    }
}

impl ServiceConfig {
    /// Load from an optional TOML file, then apply the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file. Relative paths inside resolve against its directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;
        let mut config = Self::from_toml(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        if let Some(dir) = path.parent() {
            config.keys.resolve_paths(dir);
        }
        Ok(config)
    }

    /// Parse TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Apply `DOCSEAL_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("DOCSEAL_BIND") {
            self.server.bind = bind;
        }
        override_number(&lookup, "DOCSEAL_WORKERS", &mut self.server.workers)?;
        override_number(&lookup, "DOCSEAL_MAX_SIZE_BYTES", &mut self.limits.max_size_bytes)?;
        override_number(&lookup, "DOCSEAL_MAX_OBJECT_DEPTH", &mut self.limits.max_object_depth)?;
        override_number(&lookup, "DOCSEAL_REQUEST_TIMEOUT_MS", &mut self.limits.request_timeout_ms)?;
        override_number(&lookup, "DOCSEAL_CPU_TIME_LIMIT_MS", &mut self.limits.cpu_time_limit_ms)?;
        override_number(&lookup, "DOCSEAL_MAX_IN_FLIGHT", &mut self.limits.max_in_flight)?;
        Ok(())
    }

    /// Reject zero limits and an unusable bind address.
    pub fn validate(&self) -> Result<()> {
        if self.server.bind.trim().is_empty() {
            return Err(Error::Config("server.bind must not be empty".to_string()));
        }
        let limits = &self.limits;
        let checks: [(&str, u64); 7] = [
            ("server.workers", self.server.workers as u64),
            ("limits.max_size_bytes", limits.max_size_bytes as u64),
            ("limits.max_object_depth", limits.max_object_depth as u64),
            ("limits.max_objects", limits.max_objects as u64),
            ("limits.request_timeout_ms", limits.request_timeout_ms),
            ("limits.cpu_time_limit_ms", limits.cpu_time_limit_ms),
            ("limits.max_in_flight", limits.max_in_flight as u64),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than zero", name)));
            }
        }
        if limits.max_object_depth > MAX_OBJECT_DEPTH_CEILING {
            return Err(Error::Config(format!(
                "limits.max_object_depth must be at most {}",
                MAX_OBJECT_DEPTH_CEILING
            )));
        }
        Ok(())
    }
}

fn override_number<F, T>(lookup: &F, name: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(name) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{} is not a valid number", name)))?;
    }
    Ok(())
}
