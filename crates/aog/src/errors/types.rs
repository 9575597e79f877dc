//! Error type definitions for the AOG gateway
//!
//! One top-level enum covers every error kind the gateway can surface.
//! `thiserror` provides the trait plumbing; `business_code()` gives each kind
//! a stable numeric identity used in failure response bodies.

use std::collections::HashMap;

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AogError {
    /// Request validation failed before any work was done
    #[error("bad request: {message}")]
    BadRequest {
        message: String,
        /// Field-level validation details
        details: HashMap<String, String>,
    },

    /// No bound provider, or every candidate is unhealthy
    #[error("service unavailable: {service}")]
    ServiceUnavailable { service: String },

    /// Provider requires credentials but none are stored
    #[error("provider '{provider}' requires credentials but none are configured")]
    ProviderAuthMissing { provider: String },

    /// Stored credentials were rejected by the provider
    #[error("provider '{provider}' rejected the configured credentials")]
    ProviderAuthInvalid { provider: String },

    /// Provider URL could not be parsed
    #[error("provider URL is malformed: {url}")]
    ProviderUrlMalformed { url: String },

    /// The host platform is not supported for this operation
    #[error("unsupported platform: {detail}")]
    UnsupportedPlatform { detail: String },

    /// Local engine is not installed or not reachable
    #[error("engine '{flavor}' is unavailable: {message}")]
    EngineUnavailable { flavor: String, message: String },

    /// Engine install or start failed
    #[error("engine '{flavor}' failed to start: {message}")]
    EngineStart { flavor: String, message: String },

    /// Engine upgrade failed
    #[error("engine '{flavor}' upgrade failed: {message}")]
    EngineUpgrade { flavor: String, message: String },

    #[error("model '{model}' not found")]
    ModelNotFound { model: String },

    #[error("model '{model}' already exists")]
    ModelAlreadyExists { model: String },

    #[error("model pull failed: {message}")]
    ModelPullFailed { message: String },

    /// Engine never reflected the load/unload within the deadline
    #[error("model '{model}' load timed out")]
    ModelLoadTimeout { model: String },

    /// A converter step failed while translating a payload or stream chunk
    #[error("translation failed: {message}")]
    Translation { message: String },

    /// Remote provider returned a non-success status
    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out: {operation}")]
    Timeout { operation: String },

    /// Attempted delete of a system-scope provider
    #[error("provider '{provider}' is system-scoped and cannot be removed")]
    SystemProviderImmutable { provider: String },

    /// Database-related errors (SeaORM)
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// HTTP client errors
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic internal errors; detail is logged, never surfaced verbatim
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl AogError {
    /// Create a validation error with a plain message and no field details
    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::BadRequest {
            message: message.into(),
            details: HashMap::new(),
        }
    }

    /// Create a validation error carrying per-field details
    pub fn bad_request_fields<S: Into<String>>(
        message: S,
        details: HashMap<String, String>,
    ) -> Self {
        Self::BadRequest {
            message: message.into(),
            details,
        }
    }

    pub fn service_unavailable<S: Into<String>>(service: S) -> Self {
        Self::ServiceUnavailable {
            service: service.into(),
        }
    }

    pub fn translation<S: Into<String>>(message: S) -> Self {
        Self::Translation {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable numeric identity for the failure response body.
    ///
    /// Grouped by area: 1xxxx request, 2xxxx provider, 3xxxx engine,
    /// 4xxxx model, 5xxxx pipeline/transport, 9xxxx internal.
    pub fn business_code(&self) -> u32 {
        match self {
            Self::BadRequest { .. } => 10001,
            Self::ServiceUnavailable { .. } => 10002,
            Self::ProviderAuthMissing { .. } => 20001,
            Self::ProviderAuthInvalid { .. } => 20002,
            Self::ProviderUrlMalformed { .. } => 20003,
            Self::SystemProviderImmutable { .. } => 20004,
            Self::UnsupportedPlatform { .. } => 30001,
            Self::EngineUnavailable { .. } => 30002,
            Self::EngineStart { .. } => 30003,
            Self::EngineUpgrade { .. } => 30004,
            Self::ModelNotFound { .. } => 40001,
            Self::ModelAlreadyExists { .. } => 40002,
            Self::ModelPullFailed { .. } => 40003,
            Self::ModelLoadTimeout { .. } => 40004,
            Self::Translation { .. } => 50001,
            Self::Upstream { .. } => 50002,
            Self::Cancelled => 50003,
            Self::Timeout { .. } => 50004,
            Self::Database(_) | Self::Http(_) | Self::Internal { .. } => 90001,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_codes_are_distinct_per_kind() {
        let a = AogError::bad_request("x").business_code();
        let b = AogError::service_unavailable("chat").business_code();
        let c = AogError::Cancelled.business_code();
        assert_ne!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn display_does_not_leak_internal_detail_markers() {
        let err = AogError::internal("secret pointer 0xdead");
        // Display is for logs; the web layer must not echo Internal verbatim.
        assert!(err.to_string().contains("internal error"));
    }
}
