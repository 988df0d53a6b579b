//! Application error model with MCP error mapping
//!
//! Defines a typed error hierarchy using `thiserror` for internal error handling,
//! and maps each variant to the appropriate MCP `ErrorData` type for protocol
//! compliance.

use rmcp::model::ErrorData;
use serde_json::json;
use thiserror::Error;

/// Application error type
///
/// Covers all error cases the JMAP MCP server may encounter. Each variant maps
/// to an appropriate MCP error code in [`ErrorData`].
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid user input (validation failed, malformed request)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Session bootstrap failed (discovery document unreachable or malformed)
    #[error("discovery failed (status {status}): {body}")]
    Discovery { status: u16, body: String },
    /// A batched method-call HTTP request failed at the transport level
    #[error("jmap request failed (status {status}): {body}")]
    Request { status: u16, body: String },
    /// A mailbox label could not be mapped to a server identifier
    #[error("mailbox not found: {0}")]
    Resolution(String),
    /// The server rejected or omitted creation of a draft message
    #[error("draft creation failed: {0}")]
    Create(String),
    /// The server rejected or omitted creation of an email submission
    #[error("submission failed: {0}")]
    Submit(String),
    /// Resource not found (classified from message/status inspection)
    #[error("not found: {0}")]
    NotFound(String),
    /// Authentication failure (classified from message/status inspection)
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Access denied (classified from message/status inspection)
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Convert to MCP `ErrorData`
    ///
    /// Maps each `AppError` variant to the appropriate MCP error type and
    /// includes a structured `code` field for client error handling.
    ///
    /// # Mappings
    ///
    /// - `InvalidInput` → `invalid_params`
    /// - `Resolution`, `NotFound` → `resource_not_found`
    /// - `Unauthorized`, `Forbidden` → `invalid_request`
    /// - `Discovery`, `Request`, `Create`, `Submit`, `Internal` → `internal_error`
    pub fn to_error_data(&self) -> ErrorData {
        match self {
            Self::InvalidInput(msg) => {
                ErrorData::invalid_params(msg.clone(), Some(json!({ "code": "invalid_input" })))
            }
            Self::Discovery { .. } => {
                ErrorData::internal_error(self.to_string(), Some(json!({ "code": "discovery" })))
            }
            Self::Request { .. } => {
                ErrorData::internal_error(self.to_string(), Some(json!({ "code": "request" })))
            }
            Self::Resolution(msg) => {
                ErrorData::resource_not_found(msg.clone(), Some(json!({ "code": "resolution" })))
            }
            Self::Create(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "create" })))
            }
            Self::Submit(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "submit" })))
            }
            Self::NotFound(msg) => {
                ErrorData::resource_not_found(msg.clone(), Some(json!({ "code": "not_found" })))
            }
            Self::Unauthorized(msg) => {
                ErrorData::invalid_request(msg.clone(), Some(json!({ "code": "unauthorized" })))
            }
            Self::Forbidden(msg) => {
                ErrorData::invalid_request(msg.clone(), Some(json!({ "code": "forbidden" })))
            }
            Self::Internal(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "internal" })))
            }
        }
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type AppResult<T> = Result<T, AppError>;
