//! Input/output DTOs and schema-bearing types
//!
//! Defines all data structures used in MCP tool contracts. Each type is
//! annotated with `JsonSchema` for automatic schema generation.

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata included in all tool responses
///
/// Provides timing information and current UTC timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Meta {
    /// Current UTC timestamp in RFC 3339 format with milliseconds
    pub now_utc: String,
    /// Tool execution duration in milliseconds
    pub duration_ms: u64,
}

impl Meta {
    /// Create metadata populated with current time and elapsed duration
    pub fn now(duration_ms: u64) -> Self {
        Self {
            now_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms,
        }
    }
}

/// Standard response envelope for all tools
///
/// Wraps tool-specific data with human-readable summary and execution metadata.
/// This structure provides consistent response shape across all MCP tools.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolEnvelope<T>
where
    T: JsonSchema,
{
    /// Human-readable summary of the operation outcome
    pub summary: String,
    /// Tool-specific data payload
    pub data: T,
    /// Execution metadata (timestamp, duration)
    pub meta: Meta,
}

/// Session metadata (no credentials)
///
/// Returned by `jmap_connect` and `jmap_session_info`. The secret is
/// intentionally excluded.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionInfo {
    /// Whether a session is currently established
    pub connected: bool,
    /// Server base URL
    pub base_url: String,
    /// Authenticated username
    pub username: String,
    /// Mail account identifier selected for this session
    pub account_id: String,
    /// API endpoint URL from the discovery document
    pub api_url: String,
    /// Blob upload endpoint URL
    pub upload_url: String,
    /// Blob download endpoint URL template
    pub download_url: String,
    /// Push event-stream endpoint URL, when the server offers one
    pub event_source_url: Option<String>,
    /// Server state string from the discovery document
    pub state: String,
}

/// Result of the two-phase send workflow
///
/// Returned by `jmap_send_email`. Both identifiers are server-assigned.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SendResultData {
    /// Identifier of the created draft message
    pub draft_id: String,
    /// Identifier of the created submission
    pub submission_id: String,
    /// Raw draft-creation method response
    pub draft_response: Value,
    /// Raw submission-creation method response
    pub submission_response: Value,
}

/// Input: establish a session
///
/// Used by `jmap_connect`. Fields given here override the corresponding
/// startup configuration values; omitted fields fall back to configuration.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ConnectInput {
    /// Server base URL (e.g., `https://mail.example.com`)
    pub base_url: Option<String>,
    /// Username for HTTP basic authentication
    pub username: Option<String>,
    /// Password or app token for HTTP basic authentication
    pub secret: Option<String>,
    /// Explicit account identifier (overrides discovery-based selection)
    pub account_id: Option<String>,
}

/// Input: list mailboxes
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListMailboxesInput {
    /// Re-fetch mailboxes from the server instead of serving the cache
    #[serde(default)]
    pub refresh: bool,
}

/// Input: list recent emails
///
/// `mailbox_id` takes a server identifier directly; `mailbox` takes a
/// human-readable label which is resolved against the mailbox cache.
/// Providing both is rejected.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListEmailsInput {
    /// Server mailbox identifier to scope the listing to
    pub mailbox_id: Option<String>,
    /// Mailbox label to resolve (e.g., `Inbox`, `Sent`, `Archive`)
    pub mailbox: Option<String>,
    /// Maximum emails to return (1..50, default 10)
    #[serde(default = "default_email_limit")]
    pub limit: usize,
}

/// Input: fetch full email details
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetEmailInput {
    /// Server email identifier
    pub email_id: String,
}

/// Input: full-text email search
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchEmailsInput {
    /// Full-text search query
    pub query: String,
    /// Server mailbox identifier to scope the search to
    pub mailbox_id: Option<String>,
    /// Mailbox label to resolve (mutually exclusive with `mailbox_id`)
    pub mailbox: Option<String>,
    /// Maximum emails to return (1..50, default 10)
    #[serde(default = "default_email_limit")]
    pub limit: usize,
}

/// Input: compose and send an email
///
/// Used by `jmap_send_email`. Requires at least one recipient and at least
/// one body part.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct SendEmailInput {
    /// To recipients
    #[serde(default)]
    pub to: Vec<String>,
    /// Cc recipients
    #[serde(default)]
    pub cc: Vec<String>,
    /// Bcc recipients
    #[serde(default)]
    pub bcc: Vec<String>,
    /// Subject line
    pub subject: String,
    /// Plain text body
    pub text_body: Option<String>,
    /// HTML body
    pub html_body: Option<String>,
}

/// Input: flag or deletion operations over a batch of emails
///
/// Used by `jmap_mark_read`, `jmap_mark_unread`, and `jmap_delete_emails`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct EmailIdsInput {
    /// Server email identifiers (at least one required)
    pub email_ids: Vec<String>,
}

/// Input: list upcoming calendar events
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListEventsInput {
    /// Maximum events to return (1..50, default 20)
    #[serde(default = "default_event_limit")]
    pub limit: usize,
}

/// Input: fetch a single calendar event
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct EventIdInput {
    /// Server event identifier
    pub event_id: String,
}

/// Input: create a calendar event
///
/// `start` is a local date-time (e.g., `2026-09-01T09:00:00`) interpreted in
/// `time_zone`; `duration` is an ISO 8601 duration (e.g., `PT1H`).
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CreateEventInput {
    /// Calendar identifier to place the event in
    pub calendar_id: Option<String>,
    /// Event title
    pub title: String,
    /// Event description
    pub description: Option<String>,
    /// Start date-time without offset
    pub start: String,
    /// ISO 8601 duration
    pub duration: Option<String>,
    /// IANA time zone name (e.g., `Europe/Berlin`)
    pub time_zone: Option<String>,
    /// Participants keyed by participant id (passed through verbatim)
    pub participants: Option<Value>,
    /// Locations keyed by location id (passed through verbatim)
    pub locations: Option<Value>,
}

/// Input: patch a calendar event
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UpdateEventInput {
    /// Server event identifier
    pub event_id: String,
    /// Patch object with JSON-pointer style keys (passed through verbatim)
    pub patch: Value,
}

/// Input: list contacts
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListContactsInput {
    /// Maximum contacts to return (1..50, default 50)
    #[serde(default = "default_contact_limit")]
    pub limit: usize,
}

/// Input: fetch a single contact
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ContactIdInput {
    /// Server contact identifier
    pub contact_id: String,
}

/// Input: create a contact
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct CreateContactInput {
    /// Given name
    pub first_name: Option<String>,
    /// Family name
    pub last_name: Option<String>,
    /// Company name
    pub company: Option<String>,
    /// Job title
    pub job_title: Option<String>,
    /// Email entries (passed through verbatim)
    pub emails: Option<Value>,
    /// Phone entries (passed through verbatim)
    pub phones: Option<Value>,
    /// Postal address entries (passed through verbatim)
    pub addresses: Option<Value>,
    /// Free-form notes
    pub notes: Option<String>,
}

/// Input: patch a contact
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UpdateContactInput {
    /// Server contact identifier
    pub contact_id: String,
    /// Patch object (passed through verbatim)
    pub patch: Value,
}

fn default_email_limit() -> usize {
    10
}

fn default_event_limit() -> usize {
    20
}

fn default_contact_limit() -> usize {
    50
}
