//! MCP server implementation with tool handlers
//!
//! Implements the `ServerHandler` trait and registers 20 MCP tools. Handles
//! input validation, session lifecycle, business logic orchestration, and
//! response formatting.
//!
//! The JMAP client lives behind a mutex and starts out absent. Tools that
//! need a session return a soft `connected: false` payload until
//! `jmap_connect` succeeds, so agents can probe state without tripping
//! protocol errors.

use std::sync::Arc;
use std::time::Instant;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ErrorData, ServerCapabilities, ServerInfo};
use rmcp::{Json, ServerHandler, tool, tool_handler, tool_router};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::config::{Credentials, ServerConfig};
use crate::errors::{AppError, AppResult};
use crate::jmap::{JmapClient, Transport};
use crate::models::{
    ConnectInput, ContactIdInput, CreateContactInput, CreateEventInput, EmailIdsInput,
    EventIdInput, GetEmailInput, ListContactsInput, ListEmailsInput, ListEventsInput,
    ListMailboxesInput, Meta, SearchEmailsInput, SendEmailInput, SendResultData, SessionInfo,
    ToolEnvelope, UpdateContactInput, UpdateEventInput,
};
use crate::send::SendRequest;

/// Maximum items per listing or search page
const MAX_LIST_LIMIT: usize = 50;

/// JMAP MCP server
///
/// Holds shared configuration and the (optional) connected client. Implements
/// MCP tool handlers via `#[tool]` attribute macro and `ServerHandler` trait.
#[derive(Clone)]
pub struct JmapMcpServer {
    /// Server config (startup credentials, timeouts)
    config: Arc<ServerConfig>,
    /// Connected client, absent until `jmap_connect` succeeds
    client: Arc<Mutex<Option<JmapClient>>>,
    /// Tool router for dispatching MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl JmapMcpServer {
    /// Create a new MCP server instance
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            client: Arc::new(Mutex::new(None)),
            tool_router: Self::tool_router(),
        }
    }

    /// Tool: Establish a JMAP session
    ///
    /// Fetches the discovery document and selects the mail account. Inline
    /// credentials override startup configuration field by field.
    #[tool(
        name = "jmap_connect",
        description = "Connect to a JMAP server and establish a session"
    )]
    async fn connect(
        &self,
        Parameters(input): Parameters<ConnectInput>,
    ) -> Result<Json<ToolEnvelope<SessionInfo>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(started, self.connect_impl(input).await)
    }

    async fn connect_impl(&self, input: ConnectInput) -> AppResult<(String, SessionInfo)> {
        let credentials = merge_credentials(self.config.credentials.as_ref(), &input)?;
        let mut client = JmapClient::new(credentials, self.config.http_timeout_ms)?;
        client.connect().await?;
        let info = session_info(&client)?;
        let summary = format!(
            "Connected to {} as {} (account {})",
            info.base_url, info.username, info.account_id
        );
        *self.client.lock().await = Some(client);
        Ok((summary, info))
    }

    /// Tool: Describe the current session
    #[tool(
        name = "jmap_session_info",
        description = "Show the current JMAP session (account, endpoints, state)"
    )]
    async fn session_info(&self) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            let guard = self.client.lock().await;
            let Some(client) = guard.as_ref() else {
                return Ok(not_connected());
            };
            let info = session_info(client)?;
            let summary = format!("Session for account {}", info.account_id);
            Ok((summary, to_json(&info)?))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: List mailboxes
    ///
    /// Serves the cache by default; `refresh=true` re-fetches from the server.
    #[tool(
        name = "jmap_list_mailboxes",
        description = "List mailboxes with roles, counts, and writability"
    )]
    async fn list_mailboxes(
        &self,
        Parameters(input): Parameters<ListMailboxesInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            let mut guard = self.client.lock().await;
            let Some(client) = guard.as_mut() else {
                return Ok(not_connected());
            };
            let mailboxes = client.mailbox_listing(input.refresh).await?;
            let summary = format!("{} mailbox(es)", mailboxes.len());
            Ok((summary, to_json(&mailboxes)?))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: List recent emails
    #[tool(
        name = "jmap_list_emails",
        description = "List recent emails, newest first, optionally scoped to a mailbox"
    )]
    async fn list_emails(
        &self,
        Parameters(input): Parameters<ListEmailsInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            let mut guard = self.client.lock().await;
            let Some(client) = guard.as_mut() else {
                return Ok(not_connected());
            };
            let scope = resolve_scope(client, input.mailbox_id, input.mailbox).await?;
            let emails = client
                .list_emails(scope.as_deref(), clamp_limit(input.limit))
                .await?;
            let summary = format!("{} email(s)", emails.len());
            Ok((summary, Value::Array(emails)))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Fetch full email details
    #[tool(
        name = "jmap_get_email",
        description = "Fetch one email with headers, bodies, and attachment metadata"
    )]
    async fn get_email(
        &self,
        Parameters(input): Parameters<GetEmailInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            let mut guard = self.client.lock().await;
            let Some(client) = guard.as_mut() else {
                return Ok(not_connected());
            };
            let email = client.get_email(&input.email_id).await?;
            Ok(("Email retrieved".to_owned(), email))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Full-text email search
    #[tool(
        name = "jmap_search_emails",
        description = "Full-text search over emails, optionally scoped to a mailbox"
    )]
    async fn search_emails(
        &self,
        Parameters(input): Parameters<SearchEmailsInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            if input.query.trim().is_empty() {
                return Err(AppError::invalid("search query must not be empty"));
            }
            let mut guard = self.client.lock().await;
            let Some(client) = guard.as_mut() else {
                return Ok(not_connected());
            };
            let scope = resolve_scope(client, input.mailbox_id, input.mailbox).await?;
            let emails = client
                .search_emails(&input.query, scope.as_deref(), clamp_limit(input.limit))
                .await?;
            let summary = format!("{} email(s) matched", emails.len());
            Ok((summary, Value::Array(emails)))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Compose and send an email
    ///
    /// Two-phase: persists a draft, then submits it. If submission fails the
    /// draft is left in place and the error names both phases.
    #[tool(
        name = "jmap_send_email",
        description = "Send an email (creates a draft, then submits it)"
    )]
    async fn send_email(
        &self,
        Parameters(input): Parameters<SendEmailInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            let mut guard = self.client.lock().await;
            let Some(client) = guard.as_mut() else {
                return Ok(not_connected());
            };
            let request = SendRequest {
                to: input.to,
                cc: input.cc,
                bcc: input.bcc,
                subject: input.subject,
                text_body: input.text_body,
                html_body: input.html_body,
            };
            let outcome = client.send_email(&request).await?;
            let summary = format!(
                "Sent: draft {}, submission {}",
                outcome.draft_id, outcome.submission_id
            );
            let data = SendResultData {
                draft_id: outcome.draft_id,
                submission_id: outcome.submission_id,
                draft_response: outcome.draft_response,
                submission_response: outcome.submission_response,
            };
            Ok((summary, to_json(&data)?))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Mark emails as read
    #[tool(name = "jmap_mark_read", description = "Mark emails as read")]
    async fn mark_read(
        &self,
        Parameters(input): Parameters<EmailIdsInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            let mut guard = self.client.lock().await;
            let Some(client) = guard.as_mut() else {
                return Ok(not_connected());
            };
            let count = input.email_ids.len();
            let data = client.mark_read(&input.email_ids).await?;
            Ok((format!("Marked {count} email(s) read"), data))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Mark emails as unread
    #[tool(name = "jmap_mark_unread", description = "Mark emails as unread")]
    async fn mark_unread(
        &self,
        Parameters(input): Parameters<EmailIdsInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            let mut guard = self.client.lock().await;
            let Some(client) = guard.as_mut() else {
                return Ok(not_connected());
            };
            let count = input.email_ids.len();
            let data = client.mark_unread(&input.email_ids).await?;
            Ok((format!("Marked {count} email(s) unread"), data))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Flag emails as deleted
    ///
    /// Sets the `$deleted` keyword rather than destroying messages, matching
    /// servers that run deletion through a soft-delete sweep.
    #[tool(
        name = "jmap_delete_emails",
        description = "Flag emails as deleted (sets the $deleted keyword)"
    )]
    async fn delete_emails(
        &self,
        Parameters(input): Parameters<EmailIdsInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            let mut guard = self.client.lock().await;
            let Some(client) = guard.as_mut() else {
                return Ok(not_connected());
            };
            let count = input.email_ids.len();
            let data = client.delete_emails(&input.email_ids).await?;
            Ok((format!("Flagged {count} email(s) deleted"), data))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: List upcoming calendar events
    #[tool(
        name = "jmap_list_events",
        description = "List calendar events sorted by start time"
    )]
    async fn list_events(
        &self,
        Parameters(input): Parameters<ListEventsInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            let mut guard = self.client.lock().await;
            let Some(client) = guard.as_mut() else {
                return Ok(not_connected());
            };
            let events = client.list_events(clamp_limit(input.limit)).await?;
            let summary = format!("{} event(s)", events.len());
            Ok((summary, Value::Array(events)))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Fetch a single calendar event
    #[tool(name = "jmap_get_event", description = "Fetch one calendar event by id")]
    async fn get_event(
        &self,
        Parameters(input): Parameters<EventIdInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            let mut guard = self.client.lock().await;
            let Some(client) = guard.as_mut() else {
                return Ok(not_connected());
            };
            let event = client.get_event(&input.event_id).await?;
            Ok(("Event retrieved".to_owned(), event))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Create a calendar event
    #[tool(name = "jmap_create_event", description = "Create a calendar event")]
    async fn create_event(
        &self,
        Parameters(input): Parameters<CreateEventInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            if input.title.trim().is_empty() {
                return Err(AppError::invalid("event title must not be empty"));
            }
            if input.start.trim().is_empty() {
                return Err(AppError::invalid("event start must not be empty"));
            }
            let mut guard = self.client.lock().await;
            let Some(client) = guard.as_mut() else {
                return Ok(not_connected());
            };
            let (id, created) = client.create_event(&input).await?;
            let summary = format!("Event created: {id}");
            Ok((summary, json!({ "event_id": id, "created": created })))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Patch a calendar event
    #[tool(
        name = "jmap_update_event",
        description = "Update fields of a calendar event"
    )]
    async fn update_event(
        &self,
        Parameters(input): Parameters<UpdateEventInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            if !input.patch.is_object() {
                return Err(AppError::invalid("patch must be a JSON object"));
            }
            let mut guard = self.client.lock().await;
            let Some(client) = guard.as_mut() else {
                return Ok(not_connected());
            };
            let data = client.update_event(&input.event_id, input.patch).await?;
            Ok((format!("Event {} updated", input.event_id), data))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Destroy a calendar event
    #[tool(name = "jmap_delete_event", description = "Delete a calendar event")]
    async fn delete_event(
        &self,
        Parameters(input): Parameters<EventIdInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            let mut guard = self.client.lock().await;
            let Some(client) = guard.as_mut() else {
                return Ok(not_connected());
            };
            let data = client.delete_events(&[input.event_id.clone()]).await?;
            Ok((format!("Event {} deleted", input.event_id), data))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: List contacts
    #[tool(
        name = "jmap_list_contacts",
        description = "List contacts sorted by last name"
    )]
    async fn list_contacts(
        &self,
        Parameters(input): Parameters<ListContactsInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            let mut guard = self.client.lock().await;
            let Some(client) = guard.as_mut() else {
                return Ok(not_connected());
            };
            let contacts = client.list_contacts(clamp_limit(input.limit)).await?;
            let summary = format!("{} contact(s)", contacts.len());
            Ok((summary, Value::Array(contacts)))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Fetch a single contact
    #[tool(name = "jmap_get_contact", description = "Fetch one contact by id")]
    async fn get_contact(
        &self,
        Parameters(input): Parameters<ContactIdInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            let mut guard = self.client.lock().await;
            let Some(client) = guard.as_mut() else {
                return Ok(not_connected());
            };
            let contact = client.get_contact(&input.contact_id).await?;
            Ok(("Contact retrieved".to_owned(), contact))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Create a contact
    #[tool(name = "jmap_create_contact", description = "Create a contact")]
    async fn create_contact(
        &self,
        Parameters(input): Parameters<CreateContactInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            if input.first_name.as_deref().unwrap_or("").trim().is_empty()
                && input.last_name.as_deref().unwrap_or("").trim().is_empty()
            {
                return Err(AppError::invalid(
                    "contact requires a first name or a last name",
                ));
            }
            let mut guard = self.client.lock().await;
            let Some(client) = guard.as_mut() else {
                return Ok(not_connected());
            };
            let (id, created) = client.create_contact(&input).await?;
            let summary = format!("Contact created: {id}");
            Ok((summary, json!({ "contact_id": id, "created": created })))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Patch a contact
    #[tool(name = "jmap_update_contact", description = "Update fields of a contact")]
    async fn update_contact(
        &self,
        Parameters(input): Parameters<UpdateContactInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            if !input.patch.is_object() {
                return Err(AppError::invalid("patch must be a JSON object"));
            }
            let mut guard = self.client.lock().await;
            let Some(client) = guard.as_mut() else {
                return Ok(not_connected());
            };
            let data = client
                .update_contact(&input.contact_id, input.patch)
                .await?;
            Ok((format!("Contact {} updated", input.contact_id), data))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Destroy a contact
    #[tool(name = "jmap_delete_contact", description = "Delete a contact")]
    async fn delete_contact(
        &self,
        Parameters(input): Parameters<ContactIdInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            let mut guard = self.client.lock().await;
            let Some(client) = guard.as_mut() else {
                return Ok(not_connected());
            };
            let data = client.delete_contacts(&[input.contact_id.clone()]).await?;
            Ok((format!("Contact {} deleted", input.contact_id), data))
        }
        .await;
        finalize_tool(started, result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for JmapMcpServer {
    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo::default();
        info.instructions = Some(
            "JMAP MCP server for mail, calendars, and contacts. Call jmap_connect first; \
             until a session exists the other tools report connected=false."
                .to_owned(),
        );
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info
    }
}

/// Clamp a requested page size into the allowed range
fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_LIST_LIMIT)
}

/// Soft payload returned by session-dependent tools before `jmap_connect`
fn not_connected() -> (String, Value) {
    (
        "Not connected".to_owned(),
        json!({ "connected": false, "hint": "call jmap_connect to establish a session" }),
    )
}

/// Serialize a response payload, mapping the (unlikely) failure to `Internal`
fn to_json<T: serde::Serialize>(value: &T) -> AppResult<Value> {
    serde_json::to_value(value).map_err(|e| AppError::Internal(format!("serialize response: {e}")))
}

/// Merge inline connect fields over startup configuration
///
/// Each inline field individually overrides its configured counterpart. The
/// merged result must yield a complete credential set.
fn merge_credentials(
    configured: Option<&Credentials>,
    input: &ConnectInput,
) -> AppResult<Credentials> {
    let base_url = input
        .base_url
        .clone()
        .or_else(|| configured.map(|c| c.base_url.clone()));
    let username = input
        .username
        .clone()
        .or_else(|| configured.map(|c| c.username.clone()));
    let secret = input
        .secret
        .clone()
        .map(SecretString::from)
        .or_else(|| configured.map(|c| c.secret.clone()));
    let account_id = input
        .account_id
        .clone()
        .or_else(|| configured.and_then(|c| c.account_id.clone()));

    match (base_url, username, secret) {
        (Some(base_url), Some(username), Some(secret)) => {
            Credentials::new(base_url, username, secret, account_id)
        }
        _ => Err(AppError::invalid(
            "missing credentials: provide base_url, username, and secret \
             (inline or via environment)",
        )),
    }
}

/// Build the session description for a connected client
fn session_info(client: &JmapClient<impl Transport>) -> AppResult<SessionInfo> {
    let session = client
        .session()
        .ok_or_else(|| AppError::Internal("session not established".to_owned()))?;
    let credentials = client.credentials();
    Ok(SessionInfo {
        connected: true,
        base_url: credentials.base_url.clone(),
        username: credentials.username.clone(),
        account_id: session.account_id.clone(),
        api_url: session.api_url.clone(),
        upload_url: session.upload_url.clone(),
        download_url: session.download_url.clone(),
        event_source_url: session.event_source_url.clone(),
        state: session.state.clone(),
    })
}

/// Resolve the optional mailbox scope of a listing or search
///
/// `mailbox_id` passes through untouched; `mailbox` is resolved as a label.
/// Supplying both is ambiguous and rejected.
async fn resolve_scope<T: Transport>(
    client: &mut JmapClient<T>,
    mailbox_id: Option<String>,
    mailbox: Option<String>,
) -> AppResult<Option<String>> {
    match (mailbox_id, mailbox) {
        (Some(_), Some(_)) => Err(AppError::invalid(
            "provide either 'mailbox_id' or 'mailbox', not both",
        )),
        (Some(id), None) => Ok(Some(id)),
        (None, Some(label)) => Ok(Some(client.resolve_mailbox_id(&label).await?)),
        (None, None) => Ok(None),
    }
}

/// Millisecond duration since `started`, saturating
fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Build a standardized MCP tool response envelope from business logic output
fn finalize_tool<T>(
    started: Instant,
    result: AppResult<(String, T)>,
) -> Result<Json<ToolEnvelope<T>>, ErrorData>
where
    T: schemars::JsonSchema,
{
    match result {
        Ok((summary, data)) => Ok(Json(ToolEnvelope {
            summary,
            data,
            meta: Meta::now(duration_ms(started)),
        })),
        Err(e) => Err(e.to_error_data()),
    }
}
