//! Error types for the resource protocol and crate infrastructure
//!
//! Two families live here:
//!
//! - [`ResourceException`]: the protocol-level failure returned by every
//!   operation. It carries a three-digit code, a reason phrase, a message,
//!   optional structured detail and an optional cause.
//! - [`Error`]: failures of the crate's own plumbing (configuration loading,
//!   tracing setup, route compilation).
//!
//! # Example
//!
//! ```rust
//! use crudpaq::error::{ErrorCategory, ErrorKind, ResourceException};
//!
//! let err = ResourceException::not_found("user 42 does not exist");
//! assert_eq!(err.code(), 404);
//! assert_eq!(err.reason(), "Not Found");
//! assert_eq!(err.kind(), ErrorKind::NotFound);
//! assert_eq!(err.category(), ErrorCategory::Permanent);
//!
//! let timeout = ResourceException::from_code(504);
//! assert_eq!(timeout.kind(), ErrorKind::Retryable);
//! ```

use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::protocol::{RequestType, ResourcePath, Version};

/// Result type for crate infrastructure
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for protocol operations
pub type ResourceResult<T> = std::result::Result<T, ResourceException>;

/// Crate infrastructure errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Tracing subscriber could not be installed
    #[error("Tracing error: {0}")]
    Tracing(String),

    /// A route template could not be compiled
    #[error("Invalid route template '{template}': {reason}")]
    InvalidRoute {
        /// The offending template
        template: String,
        /// Why it was rejected
        reason: String,
    },

    /// A request-matching pattern could not be compiled
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

/// Broad retry classification of a [`ResourceException`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Retrying without fixing the cause will not help
    Permanent,
    /// Transient; the same request may succeed later
    Retryable,
    /// Code outside the 4xx/5xx ranges
    Uncategorized,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permanent => write!(f, "permanent"),
            Self::Retryable => write!(f, "retryable"),
            Self::Uncategorized => write!(f, "uncategorized"),
        }
    }
}

/// Concrete exception type derived from a numeric code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 400
    BadRequest,
    /// 403
    Forbidden,
    /// 404
    NotFound,
    /// 409
    Conflict,
    /// 412, revision mismatch
    PreconditionFailed,
    /// 428, revision required
    PreconditionRequired,
    /// 500
    InternalError,
    /// 501
    NotSupported,
    /// 503
    Unavailable,
    /// Any other 4xx/5xx code that is not retryable
    Permanent,
    /// 408 and 504
    Retryable,
    /// Anything outside 4xx/5xx
    Uncategorized,
}

impl ErrorKind {
    /// Map a numeric code to its exception type
    ///
    /// The mapping is total: unknown codes map to [`ErrorKind::Uncategorized`].
    #[must_use]
    pub const fn from_code(code: u16) -> Self {
        match code {
            ResourceException::BAD_REQUEST => Self::BadRequest,
            ResourceException::FORBIDDEN => Self::Forbidden,
            ResourceException::NOT_FOUND => Self::NotFound,
            ResourceException::CONFLICT => Self::Conflict,
            ResourceException::VERSION_MISMATCH => Self::PreconditionFailed,
            ResourceException::VERSION_REQUIRED => Self::PreconditionRequired,
            ResourceException::INTERNAL_ERROR => Self::InternalError,
            ResourceException::NOT_SUPPORTED => Self::NotSupported,
            ResourceException::UNAVAILABLE => Self::Unavailable,
            408 | 504 => Self::Retryable,
            400..=599 => Self::Permanent,
            _ => Self::Uncategorized,
        }
    }

    /// Retry classification of this kind
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Unavailable | Self::Retryable => ErrorCategory::Retryable,
            Self::Uncategorized => ErrorCategory::Uncategorized,
            _ => ErrorCategory::Permanent,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest => write!(f, "bad_request"),
            Self::Forbidden => write!(f, "forbidden"),
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::PreconditionFailed => write!(f, "precondition_failed"),
            Self::PreconditionRequired => write!(f, "precondition_required"),
            Self::InternalError => write!(f, "internal_error"),
            Self::NotSupported => write!(f, "not_supported"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Permanent => write!(f, "permanent"),
            Self::Retryable => write!(f, "retryable"),
            Self::Uncategorized => write!(f, "uncategorized"),
        }
    }
}

/// Reason phrase for a code
///
/// Uses the HTTP/1.1 phrases the protocol has always reported, then the
/// `http` crate's canonical reason, then a generic fallback.
#[must_use]
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Time-out",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Request Entity Too Large",
        414 => "Request-URI Too Large",
        415 => "Unsupported Media Type",
        416 => "Requested range not satisfiable",
        417 => "Expectation Failed",
        428 => "Precondition Required",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Time-out",
        505 => "HTTP Version not supported",
        other => StatusCode::from_u16(other)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("Resource Exception"),
    }
}

/// Protocol-level failure of a resource operation
///
/// The message follows a fixed precedence: an explicit message, else the
/// cause's message, else the reason phrase. The cause is only serialized by
/// [`ResourceException::to_json`] after [`ResourceException::include_cause_in_json`].
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ResourceException {
    code: u16,
    kind: ErrorKind,
    reason: String,
    message: String,
    explicit_message: bool,
    detail: Option<Value>,
    #[source]
    cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
    include_cause: bool,
    resource_api_version: Option<Version>,
}

impl ResourceException {
    /// Malformed request
    pub const BAD_REQUEST: u16 = 400;
    /// Access denied
    pub const FORBIDDEN: u16 = 403;
    /// Resource does not exist
    pub const NOT_FOUND: u16 = 404;
    /// Conflicting state
    pub const CONFLICT: u16 = 409;
    /// Expected revision does not match
    pub const VERSION_MISMATCH: u16 = 412;
    /// A revision must be supplied
    pub const VERSION_REQUIRED: u16 = 428;
    /// Unexpected server-side failure
    pub const INTERNAL_ERROR: u16 = 500;
    /// Operation not implemented by the target
    pub const NOT_SUPPORTED: u16 = 501;
    /// Temporarily unavailable
    pub const UNAVAILABLE: u16 = 503;

    /// Create an exception with an explicit message
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        let mut err = Self::from_code(code);
        err.message = message.into();
        err.explicit_message = true;
        err
    }

    /// Create an exception whose message is the default reason phrase
    #[must_use]
    pub fn from_code(code: u16) -> Self {
        let reason = reason_phrase(code).to_string();
        Self {
            code,
            kind: ErrorKind::from_code(code),
            message: reason.clone(),
            reason,
            explicit_message: false,
            detail: None,
            cause: None,
            include_cause: false,
            resource_api_version: None,
        }
    }

    /// Create an exception from an underlying error
    pub fn from_cause<E>(code: u16, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::from_code(code).caused_by(cause)
    }

    /// 400 Bad Request
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(Self::BAD_REQUEST, message)
    }

    /// 403 Forbidden
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(Self::FORBIDDEN, message)
    }

    /// 404 Not Found
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Self::NOT_FOUND, message)
    }

    /// 409 Conflict
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(Self::CONFLICT, message)
    }

    /// 412 Precondition Failed
    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(Self::VERSION_MISMATCH, message)
    }

    /// 428 Precondition Required
    pub fn precondition_required(message: impl Into<String>) -> Self {
        Self::new(Self::VERSION_REQUIRED, message)
    }

    /// 500 Internal Server Error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL_ERROR, message)
    }

    /// 501 Not Implemented
    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(Self::NOT_SUPPORTED, message)
    }

    /// 503 Service Unavailable
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(Self::UNAVAILABLE, message)
    }

    /// Attach the underlying error
    ///
    /// Without an explicit message the cause's message becomes the message.
    #[must_use]
    pub fn caused_by<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if !self.explicit_message {
            self.message = cause.to_string();
        }
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Attach structured detail for programmatic handling
    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Override the reason phrase
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        if !self.explicit_message && self.cause.is_none() {
            self.message = self.reason.clone();
        }
        self
    }

    /// Opt in to serializing the cause's message
    #[must_use]
    pub fn include_cause_in_json(mut self) -> Self {
        self.include_cause = true;
        self
    }

    /// Record the resource API version that served the failed request
    #[must_use]
    pub fn with_resource_api_version(mut self, version: Option<Version>) -> Self {
        self.resource_api_version = version;
        self
    }

    /// Numeric code
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Concrete exception type
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Retry classification
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Reason phrase
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Resolved message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Structured detail
    pub fn detail(&self) -> Option<&Value> {
        self.detail.as_ref()
    }

    /// Underlying error
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync)> {
        self.cause.as_deref()
    }

    /// Resource API version of the handler that produced this error
    pub fn resource_api_version(&self) -> Option<Version> {
        self.resource_api_version
    }

    /// Set the resource API version
    pub fn set_resource_api_version(&mut self, version: Option<Version>) {
        self.resource_api_version = version;
    }

    /// Whether the code is in the 5xx range
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.code)
    }

    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Retryable
    }

    /// Serialize to the protocol's JSON error shape
    ///
    /// ```rust
    /// use crudpaq::error::ResourceException;
    /// use serde_json::json;
    ///
    /// let err = ResourceException::conflict("already exists");
    /// assert_eq!(
    ///     err.to_json(),
    ///     json!({"code": 409, "reason": "Conflict", "message": "already exists"})
    /// );
    /// ```
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("code".into(), json!(self.code));
        map.insert("reason".into(), json!(self.reason));
        map.insert("message".into(), json!(self.message));
        if let Some(detail) = self.detail.as_ref().filter(|d| !d.is_null()) {
            map.insert("detail".into(), detail.clone());
        }
        if self.include_cause {
            if let Some(cause) = &self.cause {
                map.insert("cause".into(), json!({ "message": cause.to_string() }));
            }
        }
        Value::Object(map)
    }

    /// Emit a structured log record for a failed operation
    pub(crate) fn record(&self, request_type: RequestType, path: &ResourcePath) {
        if self.is_server_error() {
            tracing::error!(
                operation = %request_type,
                path = %path,
                code = self.code,
                kind = %self.kind,
                retryable = self.is_retryable(),
                "Resource operation failed: {}", self.message
            );
        } else {
            tracing::debug!(
                operation = %request_type,
                path = %path,
                code = self.code,
                kind = %self.kind,
                "Resource operation rejected: {}", self.message
            );
        }
    }
}

impl From<Error> for ResourceException {
    fn from(err: Error) -> Self {
        ResourceException::from_cause(ResourceException::INTERNAL_ERROR, err)
    }
}
