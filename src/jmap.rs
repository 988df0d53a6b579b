//! JMAP transport, session discovery, and batched method-call execution
//!
//! Provides the HTTP transport seam, the session resolver that bootstraps a
//! client from the well-known discovery document, and the batch executor that
//! sends ordered method calls (with server-resolved back-references) to the
//! discovered API endpoint.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use secrecy::ExposeSecret;
use serde::ser::SerializeTuple;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::Credentials;
use crate::errors::{AppError, AppResult};
use crate::mailboxes::MailboxCache;

/// Capability URNs declared on every batched request
pub const CAPABILITIES: &[&str] = &[
    "urn:ietf:params:jmap:core",
    "urn:ietf:params:jmap:mail",
    "urn:ietf:params:jmap:calendars",
    "urn:ietf:params:jmap:contacts",
];

/// Capability key used to pick the primary mail account from the session
const MAIL_CAPABILITY: &str = "urn:ietf:params:jmap:mail";

/// Well-known discovery path (RFC 8620 §2.2)
const DISCOVERY_PATH: &str = "/.well-known/jmap";

/// Alternative discovery paths probed for diagnostics when the primary
/// path fails. A hit here is logged but never adopted; the primary failure
/// is what the caller sees.
const FALLBACK_DISCOVERY_PATHS: &[&str] = &["/jmap/session", "/session", "/api/session"];

/// Raw HTTP reply as seen by the client
///
/// The client inspects the status itself; the transport never interprets it.
#[derive(Debug)]
pub struct TransportReply {
    /// HTTP status code
    pub status: u16,
    /// Response body as text
    pub body: String,
}

/// HTTP transport seam
///
/// Abstracts the two request shapes the client needs so tests can substitute
/// a recording stub. `auth` is the full `Authorization` header value.
pub trait Transport: Send + Sync {
    /// Issue a GET request (discovery document fetch)
    fn get(&self, url: &str, auth: &str)
    -> impl Future<Output = AppResult<TransportReply>> + Send;

    /// Issue a POST request with a JSON body (batched method calls)
    fn post_json(
        &self,
        url: &str,
        auth: &str,
        body: &Value,
    ) -> impl Future<Output = AppResult<TransportReply>> + Send;
}

/// Production transport backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport with the configured request timeout
    pub fn new(timeout_ms: u64) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

impl Transport for HttpTransport {
    async fn get(&self, url: &str, auth: &str) -> AppResult<TransportReply> {
        let response = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, auth)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("http get failed: {e}")))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Internal(format!("http body read failed: {e}")))?;
        Ok(TransportReply { status, body })
    }

    async fn post_json(&self, url: &str, auth: &str, body: &Value) -> AppResult<TransportReply> {
        let response = self
            .http
            .post(url)
            .header(reqwest::header::AUTHORIZATION, auth)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("http post failed: {e}")))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Internal(format!("http body read failed: {e}")))?;
        Ok(TransportReply { status, body })
    }
}

/// Resolved per-account session state
///
/// Produced once by discovery and reused for every subsequent request on the
/// client instance. There is no refresh or expiry handling; a stale session
/// lasts until the process restarts or the caller reconnects.
#[derive(Debug, Clone)]
pub struct Session {
    /// Account identifier all method calls are scoped to
    pub account_id: String,
    /// API endpoint for batched method calls
    pub api_url: String,
    /// Blob upload endpoint
    pub upload_url: String,
    /// Blob download endpoint template
    pub download_url: String,
    /// Push event-stream endpoint, when the server offers one
    pub event_source_url: Option<String>,
    /// Server state token at discovery time
    pub state: String,
}

/// Discovery document wire shape (RFC 8620 §2)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionDocument {
    api_url: String,
    upload_url: String,
    download_url: String,
    #[serde(default)]
    event_source_url: Option<String>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    primary_accounts: BTreeMap<String, String>,
    #[serde(default)]
    accounts: BTreeMap<String, Value>,
}

/// A single named method call within a batch
///
/// Serializes to the three-element JMAP invocation array
/// `[method, args, tag]`. Tags must be unique within a batch; a
/// back-reference in a later call's args may name an earlier tag.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Method name (e.g. `Email/query`)
    pub method: String,
    /// Parameter object, possibly containing back-references
    pub args: Value,
    /// Caller-chosen call tag, unique within the batch
    pub tag: String,
}

impl Invocation {
    pub fn new(method: &str, args: Value, tag: &str) -> Self {
        Self {
            method: method.to_owned(),
            args,
            tag: tag.to_owned(),
        }
    }
}

impl Serialize for Invocation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.method)?;
        tuple.serialize_element(&self.args)?;
        tuple.serialize_element(&self.tag)?;
        tuple.end()
    }
}

/// Build a back-reference parameter value
///
/// Placed under a `#`-prefixed key in a later call's args; the server
/// resolves it to `path` within the result of the call tagged `tag` before
/// executing the referencing call. The referenced tag must appear earlier in
/// the same batch.
pub fn result_reference(tag: &str, method: &str, path: &str) -> Value {
    json!({ "resultOf": tag, "name": method, "path": path })
}

/// Request body for a batched call
#[derive(Debug, Serialize)]
struct JmapRequest<'a> {
    using: &'a [&'a str],
    #[serde(rename = "methodCalls")]
    method_calls: &'a [Invocation],
}

/// Response body of a batched call
#[derive(Debug, Deserialize)]
struct JmapResponse {
    #[serde(rename = "methodResponses")]
    method_responses: Vec<Value>,
}

/// JMAP client
///
/// Owns the credentials, the lazily-resolved session, and the mailbox cache.
/// Methods take `&mut self`: usage is strictly sequential, one request chain
/// at a time (the MCP shell serializes access behind a mutex).
pub struct JmapClient<T: Transport = HttpTransport> {
    transport: T,
    credentials: Credentials,
    auth_token: String,
    session: Option<Session>,
    pub(crate) mailboxes: MailboxCache,
}

impl JmapClient<HttpTransport> {
    /// Create a client over the production HTTP transport
    pub fn new(credentials: Credentials, http_timeout_ms: u64) -> AppResult<Self> {
        Ok(Self::with_transport(
            credentials,
            HttpTransport::new(http_timeout_ms)?,
        ))
    }
}

impl<T: Transport> JmapClient<T> {
    /// Create a client over an arbitrary transport
    ///
    /// The basic-auth token is computed once here and reused for every call.
    pub fn with_transport(credentials: Credentials, transport: T) -> Self {
        let auth_token = format!(
            "Basic {}",
            BASE64.encode(format!(
                "{}:{}",
                credentials.username,
                credentials.secret.expose_secret()
            ))
        );
        Self {
            transport,
            credentials,
            auth_token,
            session: None,
            mailboxes: MailboxCache::new(),
        }
    }

    /// Credentials this client was built with
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// The resolved session, if discovery has run
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Establish the session eagerly
    ///
    /// Equivalent to the first lazy resolution; exposed so the connect tool
    /// can surface discovery failures immediately.
    pub async fn connect(&mut self) -> AppResult<&Session> {
        self.ensure_session().await
    }

    /// Resolve the session from the discovery document, once
    ///
    /// Fetches `{base}/.well-known/jmap` with the stored basic-auth token. On
    /// a non-success status the alternative discovery paths are probed once
    /// each for diagnostics only; the primary failure is always what
    /// propagates. Account selection: explicit override, else the primary
    /// mail account, else the first entry of the accounts map.
    ///
    /// # Errors
    ///
    /// `Discovery` carrying the HTTP status and body of the failed primary
    /// call, or describing a malformed document.
    pub async fn ensure_session(&mut self) -> AppResult<&Session> {
        if self.session.is_none() {
            let url = format!("{}{}", self.credentials.base_url, DISCOVERY_PATH);
            debug!(url = %url, "fetching discovery document");
            let reply = self.transport.get(&url, &self.auth_token).await?;

            if !(200..300).contains(&reply.status) {
                self.probe_fallback_paths().await;
                return Err(AppError::Discovery {
                    status: reply.status,
                    body: reply.body,
                });
            }

            let document: SessionDocument =
                serde_json::from_str(&reply.body).map_err(|e| AppError::Discovery {
                    status: reply.status,
                    body: format!("malformed discovery document: {e}"),
                })?;
            let session = self.resolve_session(document)?;
            debug!(account_id = %session.account_id, api_url = %session.api_url, "session established");
            self.session = Some(session);
        }
        match self.session.as_ref() {
            Some(session) => Ok(session),
            None => Err(AppError::Internal("session not established".to_owned())),
        }
    }

    /// Account identifier, establishing the session if needed
    pub async fn account_id(&mut self) -> AppResult<String> {
        Ok(self.ensure_session().await?.account_id.clone())
    }

    /// Execute a batch of method calls
    ///
    /// Sends all calls as one request to the session's API endpoint and
    /// returns the method responses positionally (response N corresponds to
    /// request N). A method that failed server-side still occupies its slot;
    /// use [`method_result`] to inspect individual responses. No retry.
    ///
    /// # Errors
    ///
    /// `Request` carrying the HTTP status and body on a non-success status.
    pub async fn request(&mut self, calls: Vec<Invocation>) -> AppResult<Vec<Value>> {
        let api_url = self.ensure_session().await?.api_url.clone();
        let body = serde_json::to_value(JmapRequest {
            using: CAPABILITIES,
            method_calls: &calls,
        })
        .map_err(|e| AppError::Internal(format!("cannot serialize request: {e}")))?;

        debug!(url = %api_url, calls = calls.len(), "executing batch");
        let reply = self.transport.post_json(&api_url, &self.auth_token, &body).await?;
        if !(200..300).contains(&reply.status) {
            return Err(AppError::Request {
                status: reply.status,
                body: reply.body,
            });
        }

        let parsed: JmapResponse = serde_json::from_str(&reply.body)
            .map_err(|e| AppError::Internal(format!("malformed batch response: {e}")))?;
        Ok(parsed.method_responses)
    }

    /// Probe alternative discovery paths after a primary failure
    ///
    /// Best-effort, single attempt each, results discarded. A success is
    /// logged so an operator can spot a misconfigured base URL.
    async fn probe_fallback_paths(&self) {
        for path in FALLBACK_DISCOVERY_PATHS {
            let url = format!("{}{}", self.credentials.base_url, path);
            match self.transport.get(&url, &self.auth_token).await {
                Ok(reply) if (200..300).contains(&reply.status) => {
                    warn!(path, "alternative discovery path succeeded; primary failure is kept");
                }
                Ok(reply) => debug!(path, status = reply.status, "fallback probe failed"),
                Err(e) => debug!(path, error = %e, "fallback probe errored"),
            }
        }
    }

    /// Extract session fields and select the account identifier
    fn resolve_session(&self, document: SessionDocument) -> AppResult<Session> {
        let account_id = self
            .credentials
            .account_id
            .clone()
            .or_else(|| document.primary_accounts.get(MAIL_CAPABILITY).cloned())
            .or_else(|| document.accounts.keys().next().cloned())
            .ok_or_else(|| AppError::Discovery {
                status: 200,
                body: "discovery document lists no accounts".to_owned(),
            })?;

        Ok(Session {
            account_id,
            api_url: document.api_url,
            upload_url: document.upload_url,
            download_url: document.download_url,
            event_source_url: document.event_source_url,
            state: document.state,
        })
    }
}

/// Inspect one slot of a batch response
///
/// Validates positional correspondence by method name, rejects `error`
/// tuples, and returns the result object of the invocation.
///
/// # Errors
///
/// `Internal` if the slot is missing or malformed, or if the method reported
/// a server-side error (type and description are embedded in the message).
pub fn method_result<'a>(
    responses: &'a [Value],
    index: usize,
    expected_method: &str,
) -> AppResult<&'a Value> {
    let slot = responses.get(index).ok_or_else(|| {
        AppError::Internal(format!(
            "batch response has no slot {index} for {expected_method}"
        ))
    })?;
    let tuple = slot.as_array().ok_or_else(|| {
        AppError::Internal(format!("response slot {index} is not an invocation array"))
    })?;

    let method = tuple.first().and_then(Value::as_str).unwrap_or_default();
    let result = tuple.get(1).unwrap_or(&Value::Null);

    if method == "error" {
        let error_type = result
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let description = result
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("no description");
        return Err(AppError::Internal(format!(
            "{expected_method} returned error '{error_type}': {description}"
        )));
    }
    if method != expected_method {
        return Err(AppError::Internal(format!(
            "expected {expected_method} in slot {index}, server answered {method}"
        )));
    }
    Ok(result)
}

/// Deserialize one slot of a batch response into a typed value
pub fn parse_method_response<R: serde::de::DeserializeOwned>(
    responses: &[Value],
    index: usize,
    expected_method: &str,
) -> AppResult<R> {
    let result = method_result(responses, index, expected_method)?;
    serde_json::from_value(result.clone()).map_err(|e| {
        AppError::Internal(format!("malformed {expected_method} response: {e}"))
    })
}

/// Failure modes of a `*/set` creation
///
/// Callers map these into their own error variants (`Create` for drafts,
/// `Submit` for submissions, `Internal` elsewhere).
#[derive(Debug)]
pub enum SetCreateFailure {
    /// The server explicitly rejected the creation (`notCreated` entry)
    Rejected(String),
    /// The response carried no created entry at all (protocol-shape failure)
    MissingEntry(String),
}

/// Extract the created object for `key` from a `*/set` response slot
///
/// Returns the server-assigned id and the full created-object value.
pub fn created_entry(
    responses: &[Value],
    index: usize,
    method: &str,
    key: &str,
) -> AppResult<Result<(String, Value), SetCreateFailure>> {
    let result = method_result(responses, index, method)?;

    if let Some(rejection) = result.get("notCreated").and_then(|m| m.get(key)) {
        let error_type = rejection
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let description = rejection
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("no description");
        return Ok(Err(SetCreateFailure::Rejected(format!(
            "{method} rejected '{key}': {error_type}: {description}"
        ))));
    }

    match result.get("created").and_then(|m| m.get(key)) {
        Some(created) => {
            let id = created
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    AppError::Internal(format!("{method} created entry '{key}' has no id"))
                })?
                .to_owned();
            Ok(Ok((id, created.clone())))
        }
        None => Ok(Err(SetCreateFailure::MissingEntry(format!(
            "{method} response contains no created entry for '{key}'"
        )))),
    }
}
