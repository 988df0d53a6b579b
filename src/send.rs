//! Send workflow: validate, place a draft, then submit it for delivery
//!
//! Two independent server-side creations linked only by the draft identifier
//! captured between them. The draft is a real, persisted object the instant
//! the first step succeeds; if submission fails the draft remains on the
//! server with its `$draft` keyword set. No compensation step is attempted.

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::jmap::{Invocation, JmapClient, SetCreateFailure, Transport, created_entry};

/// Input to the send workflow
///
/// Address strings are bare `user@domain` values; display names are out of
/// scope for this surface.
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
}

/// Terminal success of the send workflow
#[derive(Debug)]
pub struct SendOutcome {
    /// Server-assigned identifier of the persisted draft
    pub draft_id: String,
    /// Server-assigned identifier of the submission object
    pub submission_id: String,
    /// Raw `Email/set` method response
    pub draft_response: Value,
    /// Raw `EmailSubmission/set` method response
    pub submission_response: Value,
}

impl SendRequest {
    /// Fail fast before any network call
    ///
    /// Requires at least one recipient across to/cc/bcc, a non-empty
    /// subject, at least one body variant, and an `@` in every address.
    fn validate(&self) -> AppResult<()> {
        if self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty() {
            return Err(AppError::invalid("at least one recipient is required"));
        }
        if self.subject.trim().is_empty() {
            return Err(AppError::invalid("subject is required"));
        }
        if self.text_body.is_none() && self.html_body.is_none() {
            return Err(AppError::invalid(
                "at least one of text_body or html_body is required",
            ));
        }
        for address in self.recipients() {
            if !address.contains('@') {
                return Err(AppError::invalid(format!(
                    "invalid address '{address}': missing '@'"
                )));
            }
        }
        Ok(())
    }

    /// All recipients merged from to/cc/bcc, in that order
    fn recipients(&self) -> impl Iterator<Item = &String> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }
}

impl<T: Transport> JmapClient<T> {
    /// Run the full send workflow
    ///
    /// 1. Validate (no network)
    /// 2. Resolve the draft placement mailbox from the cache
    /// 3. Create the draft (`Email/set`)
    /// 4. Create the submission referencing the draft (`EmailSubmission/set`)
    ///
    /// Transport failures in steps 3 and 4 are re-classified by message and
    /// status into not-found / unauthorized / forbidden where they match;
    /// everything else passes through unchanged.
    pub async fn send_email(&mut self, request: &SendRequest) -> AppResult<SendOutcome> {
        request.validate()?;

        self.ensure_mailboxes().await?;
        let target_id = self
            .mailboxes
            .draft_target()
            .map(|m| m.id.clone())
            .ok_or_else(|| {
                AppError::Resolution("no mailbox available for draft placement".to_owned())
            })?;
        let sender = self.sender_address()?;
        let account_id = self.account_id().await?;

        // Step 3: create the draft.
        let draft_object = build_draft_object(request, &target_id, &sender);
        let responses = self
            .request(vec![Invocation::new(
                "Email/set",
                json!({ "accountId": account_id, "create": { "draft": draft_object } }),
                "c0",
            )])
            .await
            .map_err(classify_send_failure)?;
        let (draft_id, _) = created_entry(&responses, 0, "Email/set", "draft")
            .map_err(classify_send_failure)?
            .map_err(|failure| match failure {
                SetCreateFailure::Rejected(msg) | SetCreateFailure::MissingEntry(msg) => {
                    AppError::Create(msg)
                }
            })?;
        let draft_response = raw_result(&responses);
        debug!(draft_id = %draft_id, mailbox_id = %target_id, "draft created");

        // Step 4: submit for delivery. A failure here leaves the draft on the
        // server; no rollback is attempted.
        let envelope = build_envelope(request, &sender);
        let responses = self
            .request(vec![Invocation::new(
                "EmailSubmission/set",
                json!({
                    "accountId": account_id,
                    "create": { "submission": { "emailId": draft_id, "envelope": envelope } }
                }),
                "s0",
            )])
            .await
            .map_err(classify_send_failure)?;
        let (submission_id, _) = created_entry(&responses, 0, "EmailSubmission/set", "submission")
            .map_err(classify_send_failure)?
            .map_err(|failure| match failure {
                SetCreateFailure::Rejected(msg) | SetCreateFailure::MissingEntry(msg) => {
                    AppError::Submit(msg)
                }
            })?;
        let submission_response = raw_result(&responses);
        debug!(submission_id = %submission_id, "submission created");

        Ok(SendOutcome {
            draft_id,
            submission_id,
            draft_response,
            submission_response,
        })
    }

    /// Sender address derived from the authenticated username
    ///
    /// When the username carries no domain, the base endpoint's hostname is
    /// appended with a leading `mail.` stripped.
    pub(crate) fn sender_address(&self) -> AppResult<String> {
        let username = &self.credentials().username;
        if username.contains('@') {
            return Ok(username.clone());
        }
        let host = self.credentials().host()?;
        let domain = host.strip_prefix("mail.").unwrap_or(&host);
        Ok(format!("{username}@{domain}"))
    }
}

/// Result object of the first (only) slot of a batch response
fn raw_result(responses: &[Value]) -> Value {
    responses
        .first()
        .and_then(|slot| slot.get(1))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Construct the draft creation object
fn build_draft_object(request: &SendRequest, mailbox_id: &str, sender: &str) -> Value {
    let mut email = Map::new();
    email.insert("mailboxIds".to_owned(), json!({ mailbox_id: true }));
    email.insert("keywords".to_owned(), json!({ "$draft": true }));
    email.insert("from".to_owned(), json!([{ "email": sender }]));
    email.insert("to".to_owned(), address_list(&request.to));
    if !request.cc.is_empty() {
        email.insert("cc".to_owned(), address_list(&request.cc));
    }
    if !request.bcc.is_empty() {
        email.insert("bcc".to_owned(), address_list(&request.bcc));
    }
    email.insert("subject".to_owned(), json!(request.subject));

    let (structure, values) = body_structure(request);
    email.insert("bodyStructure".to_owned(), structure);
    email.insert("bodyValues".to_owned(), values);

    Value::Object(email)
}

/// Build the body structure and body values
///
/// Both variants present: a two-part `multipart/alternative` with distinct
/// part identifiers, one value per part. A single variant: a one-part
/// structure of the corresponding media type.
fn body_structure(request: &SendRequest) -> (Value, Value) {
    match (&request.text_body, &request.html_body) {
        (Some(text), Some(html)) => (
            json!({
                "type": "multipart/alternative",
                "subParts": [
                    { "partId": "text", "type": "text/plain" },
                    { "partId": "html", "type": "text/html" },
                ]
            }),
            json!({
                "text": { "value": text },
                "html": { "value": html },
            }),
        ),
        (None, Some(html)) => (
            json!({ "partId": "html", "type": "text/html" }),
            json!({ "html": { "value": html } }),
        ),
        // Text-only is the default shape; validation guarantees at least one
        // variant, so (None, None) collapses to an empty text part.
        (text, None) => (
            json!({ "partId": "text", "type": "text/plain" }),
            json!({ "text": { "value": text.as_deref().unwrap_or("") } }),
        ),
    }
}

/// Envelope for the submission: sender plus all recipients merged
fn build_envelope(request: &SendRequest, sender: &str) -> Value {
    let rcpt_to: Vec<Value> = request
        .recipients()
        .map(|address| json!({ "email": address }))
        .collect();
    json!({ "mailFrom": { "email": sender }, "rcptTo": rcpt_to })
}

/// Map address strings to JMAP address objects
fn address_list(addresses: &[String]) -> Value {
    json!(
        addresses
            .iter()
            .map(|address| json!({ "email": address }))
            .collect::<Vec<_>>()
    )
}

/// Re-classify a generic transport failure by message and status
///
/// "not found"/404 becomes `NotFound`, "unauthorized"/401 becomes
/// `Unauthorized`, "forbidden"/403 becomes `Forbidden`; anything else passes
/// through unchanged. Applied only within the send workflow.
fn classify_send_failure(error: AppError) -> AppError {
    let status = match &error {
        AppError::Discovery { status, .. } | AppError::Request { status, .. } => Some(*status),
        _ => None,
    };
    let message = error.to_string();
    let lowered = message.to_lowercase();

    if lowered.contains("not found") || status == Some(404) {
        AppError::NotFound(message)
    } else if lowered.contains("unauthorized") || status == Some(401) {
        AppError::Unauthorized(message)
    } else if lowered.contains("forbidden") || status == Some(403) {
        AppError::Forbidden(message)
    } else {
        error
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use serde_json::json;

    use super::{SendRequest, classify_send_failure};
    use crate::config::Credentials;
    use crate::errors::AppError;
    use crate::jmap::JmapClient;
    use crate::jmap::stub::{StubTransport, batch, client_with_session, session_body};

    fn send_request() -> SendRequest {
        SendRequest {
            to: vec!["a@x.com".to_owned()],
            subject: "Hi".to_owned(),
            text_body: Some("Hello".to_owned()),
            ..SendRequest::default()
        }
    }

    fn mailbox_listing_reply(mailboxes: serde_json::Value) -> serde_json::Value {
        batch(vec![json!(["Mailbox/get", { "list": mailboxes }, "m0"])])
    }

    fn draft_created_reply() -> serde_json::Value {
        batch(vec![json!([
            "Email/set",
            { "created": { "draft": { "id": "D1" } } },
            "c0"
        ])])
    }

    #[tokio::test]
    async fn validation_failures_issue_no_network_calls() {
        let cases = [
            SendRequest {
                subject: "Hi".to_owned(),
                text_body: Some("Hello".to_owned()),
                ..SendRequest::default()
            },
            SendRequest {
                to: vec!["a@x.com".to_owned()],
                text_body: Some("Hello".to_owned()),
                ..SendRequest::default()
            },
            SendRequest {
                to: vec!["a@x.com".to_owned()],
                subject: "Hi".to_owned(),
                ..SendRequest::default()
            },
        ];

        for request in cases {
            let transport = StubTransport::new();
            let mut client = JmapClient::with_transport(
                crate::jmap::stub::credentials(None),
                transport.clone(),
            );
            let err = client.send_email(&request).await.expect_err("must fail");
            assert!(matches!(err, AppError::InvalidInput(_)), "got {err:?}");
            assert_eq!(transport.request_count(), 0);
        }
    }

    #[tokio::test]
    async fn malformed_address_aborts_before_submission() {
        let transport = StubTransport::new();
        let mut client =
            JmapClient::with_transport(crate::jmap::stub::credentials(None), transport.clone());
        let mut request = send_request();
        request.cc = vec!["no-at-sign".to_owned()];

        let err = client.send_email(&request).await.expect_err("must fail");
        assert!(err.to_string().contains("missing '@'"));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn send_places_draft_then_submits_with_envelope() {
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(
            200,
            mailbox_listing_reply(json!([
                { "id": "M1", "name": "Drafts", "role": "drafts" }
            ])),
        );
        transport.enqueue(200, draft_created_reply());
        transport.enqueue(
            200,
            batch(vec![json!([
                "EmailSubmission/set",
                { "created": { "submission": { "id": "S1" } } },
                "s0"
            ])]),
        );

        let mut request = send_request();
        request.cc = vec!["b@y.com".to_owned()];
        let outcome = client.send_email(&request).await.expect("send succeeds");
        assert_eq!(outcome.draft_id, "D1");
        assert_eq!(outcome.submission_id, "S1");
        assert_eq!(outcome.draft_response["created"]["draft"]["id"], json!("D1"));
        assert_eq!(
            outcome.submission_response["created"]["submission"]["id"],
            json!("S1")
        );

        let recorded = transport.recorded();
        let create = recorded[2].body.clone().expect("post body");
        let draft = &create["methodCalls"][0][1]["create"]["draft"];
        assert_eq!(draft["mailboxIds"], json!({ "M1": true }));
        assert_eq!(draft["keywords"], json!({ "$draft": true }));
        assert_eq!(draft["from"], json!([{ "email": "user@example.com" }]));

        let submit = recorded[3].body.clone().expect("post body");
        let submission = &submit["methodCalls"][0][1]["create"]["submission"];
        assert_eq!(submission["emailId"], json!("D1"));
        assert_eq!(
            submission["envelope"],
            json!({
                "mailFrom": { "email": "user@example.com" },
                "rcptTo": [{ "email": "a@x.com" }, { "email": "b@y.com" }]
            })
        );
    }

    #[tokio::test]
    async fn draft_targets_writable_mailbox_when_no_drafts_exists() {
        // End-to-end: only a writable inbox is available.
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(
            200,
            mailbox_listing_reply(json!([{
                "id": "M2",
                "name": "Inbox",
                "role": "inbox",
                "isReadOnly": false,
                "myRights": { "mayAddItems": true }
            }])),
        );
        transport.enqueue(200, draft_created_reply());
        transport.enqueue(
            200,
            batch(vec![json!([
                "EmailSubmission/set",
                { "created": { "submission": { "id": "S1" } } },
                "s0"
            ])]),
        );

        client.send_email(&send_request()).await.expect("send succeeds");

        let create = transport.recorded()[2].body.clone().expect("post body");
        assert_eq!(
            create["methodCalls"][0][1]["create"]["draft"]["mailboxIds"],
            json!({ "M2": true })
        );
    }

    #[tokio::test]
    async fn submit_rejection_leaves_draft_without_compensation() {
        // End-to-end: draft "D1" is created, submission reports
        // invalidRecipients. The draft stays orphaned; no delete is issued.
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(
            200,
            mailbox_listing_reply(json!([
                { "id": "M1", "name": "Drafts", "role": "drafts" }
            ])),
        );
        transport.enqueue(200, draft_created_reply());
        transport.enqueue(
            200,
            batch(vec![json!([
                "EmailSubmission/set",
                { "notCreated": { "submission": {
                    "type": "invalidRecipients",
                    "description": "unknown recipient domain"
                } } },
                "s0"
            ])]),
        );

        let err = client
            .send_email(&send_request())
            .await
            .expect_err("must fail");
        match err {
            AppError::Submit(msg) => assert!(msg.contains("invalidRecipients")),
            other => panic!("expected Submit error, got {other:?}"),
        }
        // Discovery, listing, draft create, submission. Nothing after.
        assert_eq!(transport.request_count(), 4);
    }

    #[tokio::test]
    async fn draft_rejection_maps_to_create_error() {
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(
            200,
            mailbox_listing_reply(json!([
                { "id": "M1", "name": "Drafts", "role": "drafts" }
            ])),
        );
        transport.enqueue(
            200,
            batch(vec![json!([
                "Email/set",
                { "notCreated": { "draft": { "type": "overQuota", "description": "full" } } },
                "c0"
            ])]),
        );

        let err = client
            .send_email(&send_request())
            .await
            .expect_err("must fail");
        match err {
            AppError::Create(msg) => assert!(msg.contains("overQuota")),
            other => panic!("expected Create error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_created_entry_is_a_protocol_shape_failure() {
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(
            200,
            mailbox_listing_reply(json!([
                { "id": "M1", "name": "Drafts", "role": "drafts" }
            ])),
        );
        transport.enqueue(200, batch(vec![json!(["Email/set", {}, "c0"])]));

        let err = client
            .send_email(&send_request())
            .await
            .expect_err("must fail");
        match err {
            AppError::Create(msg) => assert!(msg.contains("no created entry")),
            other => panic!("expected Create error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sender_domain_defaults_from_base_url_host() {
        let credentials = Credentials::new(
            "https://mail.example.com".to_owned(),
            "alice".to_owned(),
            SecretString::new("s".to_owned().into()),
            None,
        )
        .expect("credentials");
        let client = JmapClient::with_transport(credentials, StubTransport::new());
        // Leading "mail." is stripped from the host.
        assert_eq!(client.sender_address().expect("sender"), "alice@example.com");

        let full = JmapClient::with_transport(
            crate::jmap::stub::credentials(None),
            StubTransport::new(),
        );
        assert_eq!(
            full.sender_address().expect("sender"),
            "user@example.com"
        );
    }

    #[tokio::test]
    async fn transport_failures_are_classified_during_send() {
        let transport = StubTransport::new();
        transport.enqueue(200, session_body("acc1"));
        transport.enqueue(
            200,
            mailbox_listing_reply(json!([
                { "id": "M1", "name": "Drafts", "role": "drafts" }
            ])),
        );
        transport.enqueue(401, json!({ "detail": "bad token" }));
        let mut client =
            JmapClient::with_transport(crate::jmap::stub::credentials(None), transport.clone());

        let err = client
            .send_email(&send_request())
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::Unauthorized(_)), "got {err:?}");
    }

    #[test]
    fn classification_matches_message_content_and_status() {
        let not_found = classify_send_failure(AppError::Internal(
            "Email/set returned error 'serverFail': endpoint not found".to_owned(),
        ));
        assert!(matches!(not_found, AppError::NotFound(_)));

        let forbidden = classify_send_failure(AppError::Request {
            status: 403,
            body: "denied".to_owned(),
        });
        assert!(matches!(forbidden, AppError::Forbidden(_)));

        let passthrough = classify_send_failure(AppError::Create("overQuota".to_owned()));
        assert!(matches!(passthrough, AppError::Create(_)));
    }

    #[test]
    fn both_bodies_build_two_part_alternative_structure() {
        let request = SendRequest {
            to: vec!["a@x.com".to_owned()],
            subject: "Hi".to_owned(),
            text_body: Some("plain".to_owned()),
            html_body: Some("<p>rich</p>".to_owned()),
            ..SendRequest::default()
        };
        let (structure, values) = super::body_structure(&request);
        assert_eq!(structure["type"], json!("multipart/alternative"));
        assert_eq!(structure["subParts"][0]["partId"], json!("text"));
        assert_eq!(structure["subParts"][1]["partId"], json!("html"));
        assert_eq!(values["text"]["value"], json!("plain"));
        assert_eq!(values["html"]["value"], json!("<p>rich</p>"));
    }
}
