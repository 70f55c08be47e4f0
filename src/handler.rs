//! Request admission and execution.
//!
//! [`RequestHandler::handle`] takes one [`TransformRequest`] through
//!
//! ```text
//! Received → Validated → Parsed → Transformed → Responded
//!     └──────────┴──────────┴──────────┴──────────→ Failed
//! ```
//!
//! Validation, the size check and key lookup run on the calling task. Parse
//! and transform run as one job on the blocking pool, behind a semaphore that
//! bounds in-flight jobs. The request timeout covers both the wait for a
//! permit and the job; when it fires the job's [`Budget`] is cancelled and
//! its result is dropped.

use crate::budget::Budget;
use crate::document::Document;
use crate::error::{Error, Result, ValidationFailure};
use crate::keystore::{is_valid_key_id, KeyMaterial, KeyResolver};
use crate::lexer::is_delimiter;
use crate::parser_config::ParserOptions;
use crate::transform::{CryptoTransform, Operation, TransformParams, TransformResult};
use bytes::Bytes;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use uuid::Uuid;

/// Longest accepted signature field name.
pub const MAX_FIELD_NAME_LEN: usize = 64;
/// Longest accepted passphrase, in bytes.
pub const MAX_PASSPHRASE_LEN: usize = 1024;
/// Longest accepted reason or location, in characters.
pub const MAX_SIGNER_TEXT_LEN: usize = 256;

/// Handler limits.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Parser limits, including the document size ceiling
    pub parser: ParserOptions,
    /// Wall-clock limit per request, permit wait included
    pub request_timeout: Duration,
    /// CPU-time limit for the parse and transform job, enforced as a
    /// wall-clock deadline from the moment the job is scheduled
    pub cpu_time_limit: Duration,
    /// Jobs allowed to run at once
    pub max_in_flight: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            parser: ParserOptions::default(),
            request_timeout: Duration::from_millis(30_000),
            cpu_time_limit: Duration::from_millis(20_000),
            max_in_flight: 8,
        }
    }
}

impl HandlerConfig {
    /// Set the parser limits.
    pub fn with_parser(mut self, parser: ParserOptions) -> Self {
        self.parser = parser;
        self
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the CPU-time limit.
    pub fn with_cpu_time_limit(mut self, limit: Duration) -> Self {
        self.cpu_time_limit = limit;
        self
    }

    /// Set the in-flight job ceiling.
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }
}

/// One transform request as received.
///
/// The operation is kept as the caller's text until validation.
#[derive(Debug, Clone)]
pub struct TransformRequest {
    id: Uuid,
    /// Operation name
    pub operation: String,
    /// Key id
    pub key_id: String,
    /// Raw document bytes
    pub document: Bytes,
    /// Optional parameters
    pub params: TransformParams,
    /// Caller's timeout, capped by the configured request timeout
    pub timeout: Option<Duration>,
}

impl TransformRequest {
    /// Create a request with a fresh request id.
    pub fn new(operation: impl Into<String>, key_id: impl Into<String>, document: impl Into<Bytes>) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation: operation.into(),
            key_id: key_id.into(),
            document: document.into(),
            params: TransformParams::default(),
            timeout: None,
        }
    }

    /// Attach parameters.
    pub fn with_params(mut self, params: TransformParams) -> Self {
        self.params = params;
        self
    }

    /// Ask for a shorter timeout than the configured one.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Request id, for log correlation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Check the request shape and resolve the operation.
    ///
    /// Nothing here touches the key store or the parser.
    pub fn validate(&self) -> Result<Operation> {
        let operation = Operation::parse(&self.operation)?;

        if !is_valid_key_id(&self.key_id) {
            return Err(ValidationFailure::InvalidKeyId.into());
        }
        if self.document.is_empty() {
            return Err(ValidationFailure::EmptyDocument.into());
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(ValidationFailure::InvalidTimeout.into());
        }

        let params = &self.params;
        if let Some(name) = &params.field_name {
            if !matches!(operation, Operation::Sign | Operation::Verify) {
                return Err(ValidationFailure::UnexpectedParameter.into());
            }
            if !is_valid_field_name(name) {
                return Err(ValidationFailure::InvalidFieldName.into());
            }
        }
        if let Some(passphrase) = &params.passphrase {
            if !matches!(operation, Operation::Encrypt | Operation::Decrypt) {
                return Err(ValidationFailure::UnexpectedParameter.into());
            }
            if passphrase.is_empty() || passphrase.len() > MAX_PASSPHRASE_LEN {
                return Err(ValidationFailure::InvalidPassphrase.into());
            }
        }
        for text in [&params.reason, &params.location].into_iter().flatten() {
            if operation != Operation::Sign {
                return Err(ValidationFailure::UnexpectedParameter.into());
            }
            if !is_valid_signer_text(text) {
                return Err(ValidationFailure::InvalidSignerText.into());
            }
        }
        if params.signing_time.is_some() && operation != Operation::Sign {
            return Err(ValidationFailure::UnexpectedParameter.into());
        }
        if params.verify_at.is_some() && operation != Operation::Verify {
            return Err(ValidationFailure::UnexpectedParameter.into());
        }

        Ok(operation)
    }
}

/// Whether `name` is 1 to 64 printable ASCII characters without delimiters
/// or whitespace.
pub fn is_valid_field_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_FIELD_NAME_LEN
        && name.bytes().all(|c| c.is_ascii_graphic() && !is_delimiter(c))
}

fn is_valid_signer_text(text: &str) -> bool {
    text.chars().count() <= MAX_SIGNER_TEXT_LEN && !text.chars().any(char::is_control)
}

/// Request lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RequestState {
    /// Accepted, nothing checked yet
    Received = 0,
    /// Shape checked and key resolved
    Validated = 1,
    /// Document parsed
    Parsed = 2,
    /// Transform applied
    Transformed = 3,
    /// Result handed back
    Responded = 4,
    /// Terminated by an error
    Failed = 5,
}

impl RequestState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RequestState::Received,
            1 => RequestState::Validated,
            2 => RequestState::Parsed,
            3 => RequestState::Transformed,
            4 => RequestState::Responded,
            _ => RequestState::Failed,
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Responded | RequestState::Failed)
    }
}

/// Forward-only state tracker shared between a request and its job.
#[derive(Debug)]
pub struct Lifecycle {
    id: Uuid,
    state: AtomicU8,
}

impl Lifecycle {
    /// Start in `Received`.
    pub fn new(id: Uuid) -> Self {
        log::debug!("[{}] received", id);
        Self {
            id,
            state: AtomicU8::new(RequestState::Received as u8),
        }
    }

    /// Current state.
    pub fn state(&self) -> RequestState {
        RequestState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next`.
    ///
    /// Returns `false` and leaves the state alone when `next` would revisit or
    /// skip back, or when the request already terminated. `Failed` is
    /// reachable from every non-terminal state.
    pub fn advance(&self, next: RequestState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = RequestState::from_u8(current);
            if from.is_terminal() || next <= from {
                return false;
            }
            if next != RequestState::Failed && next as u8 != current + 1 {
                return false;
            }
            match self
                .state
                .compare_exchange(current, next as u8, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    log::debug!("[{}] {:?} -> {:?}", self.id, from, next);
                    return true;
                },
                Err(actual) => current = actual,
            }
        }
    }
}

/// Validates, schedules and runs transform requests.
pub struct RequestHandler {
    keys: Arc<dyn KeyResolver>,
    config: HandlerConfig,
    permits: Arc<Semaphore>,
}

impl RequestHandler {
    /// Create a handler over `keys`.
    pub fn new(keys: Arc<dyn KeyResolver>, config: HandlerConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            keys,
            config,
            permits,
        }
    }

    /// Limits in effect.
    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Run one request to completion.
    pub async fn handle(&self, request: TransformRequest) -> Result<TransformResult> {
        let lifecycle = Arc::new(Lifecycle::new(request.id));
        let result = self.run(request, &lifecycle).await;

        match &result {
            Ok(_) => {
                lifecycle.advance(RequestState::Responded);
            },
            Err(err) => {
                lifecycle.advance(RequestState::Failed);
                match err {
                    Error::Timeout(_) => log::warn!("[{}] timed out: {}", lifecycle.id, err.public_reason()),
                    Error::Internal(detail) => log::error!("[{}] internal error: {}", lifecycle.id, detail),
                    Error::Io(detail) => log::error!("[{}] io error: {}", lifecycle.id, detail),
                    _ => log::info!("[{}] rejected: {} ({})", lifecycle.id, err.kind(), err.public_reason()),
                }
            },
        }
        result
    }

    /// Timeout for `request`: its own when shorter, the configured one otherwise.
    pub fn effective_timeout(&self, request: &TransformRequest) -> Duration {
        request
            .timeout
            .map_or(self.config.request_timeout, |t| t.min(self.config.request_timeout))
    }

    async fn run(&self, request: TransformRequest, lifecycle: &Arc<Lifecycle>) -> Result<TransformResult> {
        let timeout = self.effective_timeout(&request);
        let deadline = Instant::now() + timeout;
        let timeout_ms = timeout.as_millis() as u64;

        let operation = request.validate()?;
        let limit = self.config.parser.max_size_bytes;
        if request.document.len() > limit {
            return Err(Error::DocumentTooLarge {
                size: request.document.len(),
                limit,
            });
        }

        let material = self.keys.resolve(&request.key_id)?;
        operation.check_key(&request.key_id, &material)?;
        lifecycle.advance(RequestState::Validated);
        log::debug!(
            "[{}] {} with key {} ({} bytes)",
            lifecycle.id,
            operation,
            request.key_id,
            request.document.len()
        );

        let permit = tokio::time::timeout_at(deadline, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| Error::Timeout(timeout_ms))?
            .map_err(|_| Error::Internal("job semaphore closed".to_string()))?;

        let budget = Budget::with_limit(self.config.cpu_time_limit);
        let job = Job {
            operation,
            key_id: request.key_id,
            document: request.document,
            params: request.params,
            material,
            keys: Arc::clone(&self.keys),
            parser: self.config.parser,
            budget: budget.clone(),
            lifecycle: Arc::clone(lifecycle),
        };
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job.run()
        });

        match tokio::time::timeout_at(deadline, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                budget.cancel();
                Err(Error::Internal(format!("transform job failed: {}", join_err)))
            },
            Err(_) => {
                budget.cancel();
                Err(Error::Timeout(timeout_ms))
            },
        }
    }
}

/// Parse and transform work for one request, owned by the blocking pool.
struct Job {
    operation: Operation,
    key_id: String,
    document: Bytes,
    params: TransformParams,
    material: Arc<KeyMaterial>,
    keys: Arc<dyn KeyResolver>,
    parser: ParserOptions,
    budget: Budget,
    lifecycle: Arc<Lifecycle>,
}

impl Job {
    fn run(self) -> Result<TransformResult> {
        let doc = Document::parse_with_budget(self.document, &self.parser, &self.budget)?;
        if doc.has_active_content() {
            log::debug!("[{}] document carries active content; left uninterpreted", self.lifecycle.id);
        }
        self.lifecycle.advance(RequestState::Parsed);

        let result = CryptoTransform::new(&self.key_id, &self.material, self.keys.trust_store()).apply(
            doc,
            self.operation,
            &self.params,
            &self.budget,
        )?;
        self.budget.check()?;
        self.lifecycle.advance(RequestState::Transformed);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::{KeyStore, SymmetricKey};

    fn request(operation: &str) -> TransformRequest {
        TransformRequest::new(operation, "vault", &b"%PDF-1.7\n"[..])
    }

    fn validation_reason(request: &TransformRequest) -> ValidationFailure {
        match request.validate() {
            Err(Error::Validation(reason)) => reason,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_accepts_plain_requests() {
        for op in ["sign", "verify", "encrypt", "decrypt"] {
            assert!(request(op).validate().is_ok());
        }
    }

    #[test]
    fn test_validate_rejects_bad_shape() {
        assert_eq!(validation_reason(&request("notarize")), ValidationFailure::UnknownOperation);
        assert_eq!(
            validation_reason(&TransformRequest::new("sign", "bad id", &b"x"[..])),
            ValidationFailure::InvalidKeyId
        );
        assert_eq!(
            validation_reason(&TransformRequest::new("sign", "vault", Bytes::new())),
            ValidationFailure::EmptyDocument
        );
    }

    #[test]
    fn test_validate_parameter_scope() {
        let sign_with_passphrase = request("sign").with_params(TransformParams::new().with_passphrase("pw"));
        assert_eq!(validation_reason(&sign_with_passphrase), ValidationFailure::UnexpectedParameter);

        let encrypt_with_reason = request("encrypt").with_params(TransformParams::new().with_reason("why"));
        assert_eq!(validation_reason(&encrypt_with_reason), ValidationFailure::UnexpectedParameter);

        let decrypt_with_field = request("decrypt").with_params(TransformParams::new().with_field_name("Sig"));
        assert_eq!(validation_reason(&decrypt_with_field), ValidationFailure::UnexpectedParameter);

        let verify_with_field = request("verify").with_params(TransformParams::new().with_field_name("Sig"));
        assert!(verify_with_field.validate().is_ok());
    }

    #[test]
    fn test_validate_parameter_values() {
        let long_pass = "p".repeat(MAX_PASSPHRASE_LEN + 1);
        let req = request("encrypt").with_params(TransformParams::new().with_passphrase(long_pass));
        assert_eq!(validation_reason(&req), ValidationFailure::InvalidPassphrase);

        let req = request("encrypt").with_params(TransformParams::new().with_passphrase(""));
        assert_eq!(validation_reason(&req), ValidationFailure::InvalidPassphrase);

        let req = request("sign").with_params(TransformParams::new().with_field_name("Sig(1)"));
        assert_eq!(validation_reason(&req), ValidationFailure::InvalidFieldName);

        let req = request("sign").with_params(TransformParams::new().with_reason("r".repeat(257)));
        assert_eq!(validation_reason(&req), ValidationFailure::InvalidSignerText);

        let req = request("sign").with_params(TransformParams::new().with_location("Zürich"));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_field_names() {
        assert!(is_valid_field_name("Signature1"));
        assert!(is_valid_field_name("approval.manager-2"));
        assert!(!is_valid_field_name(""));
        assert!(!is_valid_field_name("has space"));
        assert!(!is_valid_field_name("a/b"));
        assert!(!is_valid_field_name(&"x".repeat(65)));
    }

    #[test]
    fn test_lifecycle_is_forward_only() {
        let lifecycle = Lifecycle::new(Uuid::new_v4());
        assert!(!lifecycle.advance(RequestState::Parsed));
        assert!(lifecycle.advance(RequestState::Validated));
        assert!(!lifecycle.advance(RequestState::Validated));
        assert!(lifecycle.advance(RequestState::Parsed));
        assert!(lifecycle.advance(RequestState::Failed));
        assert!(!lifecycle.advance(RequestState::Transformed));
        assert_eq!(lifecycle.state(), RequestState::Failed);
    }

    #[test]
    fn test_lifecycle_full_path() {
        let lifecycle = Lifecycle::new(Uuid::new_v4());
        for state in [
            RequestState::Validated,
            RequestState::Parsed,
            RequestState::Transformed,
            RequestState::Responded,
        ] {
            assert!(lifecycle.advance(state));
        }
        assert!(!lifecycle.advance(RequestState::Failed));
    }

    #[tokio::test]
    async fn test_unknown_key_rejected_before_parse() {
        let store = KeyStore::builder().build().unwrap();
        let handler = RequestHandler::new(Arc::new(store), HandlerConfig::default());
        let result = handler
            .handle(TransformRequest::new("encrypt", "missing", &b"not a document"[..]))
            .await;
        assert!(matches!(result, Err(Error::KeyNotFound(_))));
    }

    #[tokio::test]
    async fn test_oversized_document_rejected_before_parse() {
        let store = KeyStore::builder()
            .with_key("vault", KeyMaterial::Symmetric(SymmetricKey::new([1; 32])))
            .build()
            .unwrap();
        let config = HandlerConfig::default().with_parser(ParserOptions::default().with_max_size_bytes(8));
        let handler = RequestHandler::new(Arc::new(store), config);
        let result = handler
            .handle(TransformRequest::new("encrypt", "vault", &b"123456789"[..]))
            .await;
        assert!(matches!(result, Err(Error::DocumentTooLarge { size: 9, limit: 8 })));
    }

    #[test]
    fn test_timeout_override_is_capped() {
        let store = KeyStore::builder().build().unwrap();
        let config = HandlerConfig::default().with_request_timeout(Duration::from_secs(5));
        let handler = RequestHandler::new(Arc::new(store), config);

        let plain = request("encrypt");
        assert_eq!(handler.effective_timeout(&plain), Duration::from_secs(5));
        let shorter = request("encrypt").with_timeout(Duration::from_millis(250));
        assert_eq!(handler.effective_timeout(&shorter), Duration::from_millis(250));
        let longer = request("encrypt").with_timeout(Duration::from_secs(60));
        assert_eq!(handler.effective_timeout(&longer), Duration::from_secs(5));

        let zero = request("encrypt").with_timeout(Duration::ZERO);
        assert_eq!(validation_reason(&zero), ValidationFailure::InvalidTimeout);
    }
}
