//! Error handling for hubsync.
//!
//! This module provides:
//! - A single error type with a machine-readable code and context chaining
//! - HTTP status code mapping for the central API
//! - User-facing messages kept apart from internal details
//! - Severity-driven logging through `tracing`
//! - An error counter exported through `metrics`
//!
//! # Usage
//!
//! ```rust,ignore
//! use hubsync_core::error::{SyncError, Result, ErrorContext, ErrorCode};
//!
//! fn load() -> Result<Vec<u8>> {
//!     std::fs::read("incarnation.json").with_error_code(ErrorCode::IncarnationStoreFailed)
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for hubsync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and appear in API responses and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Bundle Errors (1000-1099)
    CategoryMismatch,
    InvalidObject,

    // Transport Errors (2000-2099)
    TransportUnavailable,
    PublishFailed,
    PublishRejected,
    TransportClosed,

    // Conflation Errors (3000-3099)
    DecodeFailed,
    VersionConflict,
    BundleNotFound,

    // Storage Errors (4000-4099)
    StoreApplyFailed,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    InvalidConfiguration,
    IncarnationStoreFailed,

    // Internal Errors (9000-9099)
    SerializationError,
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::CategoryMismatch => 1000,
            Self::InvalidObject => 1001,

            Self::TransportUnavailable => 2000,
            Self::PublishFailed => 2001,
            Self::PublishRejected => 2002,
            Self::TransportClosed => 2003,

            Self::DecodeFailed => 3000,
            Self::VersionConflict => 3001,
            Self::BundleNotFound => 3002,

            Self::StoreApplyFailed => 4000,

            Self::ConfigurationError => 5000,
            Self::InvalidConfiguration => 5001,
            Self::IncarnationStoreFailed => 5002,

            Self::SerializationError => 9000,
            Self::InternalError => 9001,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::BundleNotFound => StatusCode::NOT_FOUND,

            Self::VersionConflict => StatusCode::CONFLICT,

            Self::DecodeFailed | Self::CategoryMismatch | Self::InvalidObject => {
                StatusCode::BAD_REQUEST
            }

            Self::StoreApplyFailed | Self::TransportUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            Self::PublishFailed | Self::PublishRejected | Self::TransportClosed => {
                StatusCode::BAD_GATEWAY
            }

            Self::ConfigurationError
            | Self::InvalidConfiguration
            | Self::IncarnationStoreFailed
            | Self::SerializationError
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Transport layers consult this to decide whether a publish is attempted again.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransportUnavailable | Self::PublishFailed | Self::StoreApplyFailed
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "bundle",
            2000..=2099 => "transport",
            3000..=3099 => "conflation",
            4000..=4099 => "storage",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Bad input from a peer, expected to happen occasionally
    Low,
    /// Operational issues (unreachable central, full channels)
    Medium,
    /// Local failures that need attention
    High,
    /// Data-corruption signals that operators must look at
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::DecodeFailed
            | ErrorCode::CategoryMismatch
            | ErrorCode::InvalidObject
            | ErrorCode::BundleNotFound => Self::Low,

            ErrorCode::TransportUnavailable
            | ErrorCode::PublishFailed
            | ErrorCode::PublishRejected
            | ErrorCode::TransportClosed => Self::Medium,

            ErrorCode::StoreApplyFailed
            | ErrorCode::ConfigurationError
            | ErrorCode::InvalidConfiguration
            | ErrorCode::IncarnationStoreFailed
            | ErrorCode::SerializationError => Self::High,

            ErrorCode::VersionConflict | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Leaf hub the error relates to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leaf_hub: Option<String>,

    /// Bundle category the error relates to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bundle(mut self, leaf_hub: impl Into<String>, category: impl fmt::Display) -> Self {
        self.leaf_hub = Some(leaf_hub.into());
        self.category = Some(category.to_string());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    fn is_empty(&self) -> bool {
        self.context.is_empty() && self.leaf_hub.is_none() && self.category.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for hubsync.
#[derive(Error, Debug)]
pub struct SyncError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to peers)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl SyncError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create a decode error for a message that could not be understood.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::DecodeFailed, "Bundle could not be decoded", message)
    }

    /// Create a transport error.
    pub fn transport(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::with_internal(code, "Bundle delivery failed", message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "Low severity error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "hubsync_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response body returned by the central API.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false for errors
    pub success: bool,

    pub error: ErrorInfo,
}

/// Detailed error information for API responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub numeric_code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&SyncError> for ErrorResponse {
    fn from(error: &SyncError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                details: if error.details.is_empty() {
                    None
                } else {
                    Some(error.details.clone())
                },
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for attaching an error code to foreign errors.
pub trait ErrorContext<T> {
    /// Wrap the error with a specific code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| SyncError::with_internal(code, e.to_string(), e.to_string()).with_source(e))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DecodeFailed
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string())
            .with_source(error)
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(error: reqwest::Error) -> Self {
        let code = if error.is_timeout() || error.is_connect() || error.is_request() {
            ErrorCode::TransportUnavailable
        } else if let Some(status) = error.status() {
            if status.is_server_error() {
                ErrorCode::PublishFailed
            } else {
                ErrorCode::PublishRejected
            }
        } else {
            ErrorCode::PublishFailed
        };

        Self::with_internal(code, "Failed to reach central aggregator", error.to_string())
            .with_source(error)
    }
}
