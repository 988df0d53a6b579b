//! Mail operations: list, fetch, search, flag updates, delete
//!
//! Every read operation is a fixed two-call batch: an `Email/query` producing
//! an ordered id list, then an `Email/get` back-referencing those ids with an
//! operation-specific property set. Flag mutations are single `Email/set`
//! batches with one update entry per target identifier. Sort tie-breaks,
//! pagination beyond the limit, and per-id partial failures are the server's
//! business; responses are surfaced as-is.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::errors::{AppError, AppResult};
use crate::jmap::{Invocation, JmapClient, Transport, parse_method_response, result_reference};

/// Summary property set for listings and search results (no bodies)
const EMAIL_SUMMARY_PROPERTIES: &[&str] = &[
    "id",
    "threadId",
    "mailboxIds",
    "keywords",
    "size",
    "receivedAt",
    "from",
    "to",
    "subject",
    "preview",
    "hasAttachment",
];

/// Full property set for single-message fetches
const EMAIL_DETAIL_PROPERTIES: &[&str] = &[
    "id",
    "blobId",
    "threadId",
    "mailboxIds",
    "keywords",
    "size",
    "receivedAt",
    "sentAt",
    "messageId",
    "inReplyTo",
    "references",
    "from",
    "to",
    "cc",
    "bcc",
    "replyTo",
    "subject",
    "preview",
    "hasAttachment",
    "textBody",
    "htmlBody",
    "bodyValues",
    "attachments",
];

/// Byte cap per fetched body part
const MAX_BODY_VALUE_BYTES: u64 = 100_000;

/// Wire shape of an `Email/get` response
#[derive(Debug, Deserialize)]
struct EmailGetResponse {
    #[serde(default)]
    list: Vec<Value>,
    #[serde(default, rename = "notFound")]
    not_found: Vec<String>,
}

impl<T: Transport> JmapClient<T> {
    /// List the most recent emails, optionally scoped to one mailbox
    ///
    /// Query sorted by receipt time descending, then a back-referenced get
    /// with the summary property set.
    pub async fn list_emails(
        &mut self,
        mailbox_id: Option<&str>,
        limit: usize,
    ) -> AppResult<Vec<Value>> {
        let filter = match mailbox_id {
            Some(id) => json!({ "inMailbox": id }),
            None => json!({}),
        };
        self.query_and_get(filter, limit).await
    }

    /// Free-text search, optionally narrowed to one mailbox
    ///
    /// Same call shape as listing with a `text` filter and the same reduced
    /// property set.
    pub async fn search_emails(
        &mut self,
        query: &str,
        mailbox_id: Option<&str>,
        limit: usize,
    ) -> AppResult<Vec<Value>> {
        let mut filter = json!({ "text": query });
        if let Some(id) = mailbox_id {
            filter["inMailbox"] = json!(id);
        }
        self.query_and_get(filter, limit).await
    }

    /// Fetch a single email with full body content
    ///
    /// Single get call, no query phase. Body values are fetched for both the
    /// text and HTML variants, capped per part.
    ///
    /// # Errors
    ///
    /// `NotFound` when the server reports the id in `notFound` or omits it
    /// from the list.
    pub async fn get_email(&mut self, email_id: &str) -> AppResult<Value> {
        let account_id = self.account_id().await?;
        let responses = self
            .request(vec![Invocation::new(
                "Email/get",
                json!({
                    "accountId": account_id,
                    "ids": [email_id],
                    "properties": EMAIL_DETAIL_PROPERTIES,
                    "fetchTextBodyValues": true,
                    "fetchHTMLBodyValues": true,
                    "maxBodyValueBytes": MAX_BODY_VALUE_BYTES,
                }),
                "g0",
            )])
            .await?;
        let parsed: EmailGetResponse = parse_method_response(&responses, 0, "Email/get")?;

        if parsed.not_found.iter().any(|id| id == email_id) {
            return Err(AppError::NotFound(format!("email '{email_id}' not found")));
        }
        parsed
            .list
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("email '{email_id}' not found")))
    }

    /// Set the `$seen` keyword on each identifier
    ///
    /// Idempotent at the server: repeating the call leaves the flag in the
    /// same steady state and does not raise.
    pub async fn mark_read(&mut self, email_ids: &[String]) -> AppResult<Value> {
        self.update_keyword(email_ids, "$seen", Some(true)).await
    }

    /// Clear the `$seen` keyword on each identifier
    pub async fn mark_unread(&mut self, email_ids: &[String]) -> AppResult<Value> {
        self.update_keyword(email_ids, "$seen", None).await
    }

    /// Set the `$deleted` keyword on each identifier
    ///
    /// A flag mutation only. Whether that means move-to-trash or eventual
    /// erasure is the remote service's semantics, not this client's.
    pub async fn delete_emails(&mut self, email_ids: &[String]) -> AppResult<Value> {
        self.update_keyword(email_ids, "$deleted", Some(true)).await
    }

    /// The shared query+get two-call batch
    async fn query_and_get(&mut self, filter: Value, limit: usize) -> AppResult<Vec<Value>> {
        let account_id = self.account_id().await?;
        let responses = self
            .request(vec![
                Invocation::new(
                    "Email/query",
                    json!({
                        "accountId": account_id,
                        "filter": filter,
                        "sort": [{ "property": "receivedAt", "isAscending": false }],
                        "limit": limit,
                    }),
                    "q0",
                ),
                Invocation::new(
                    "Email/get",
                    json!({
                        "accountId": account_id,
                        "#ids": result_reference("q0", "Email/query", "/ids"),
                        "properties": EMAIL_SUMMARY_PROPERTIES,
                    }),
                    "g0",
                ),
            ])
            .await?;
        let parsed: EmailGetResponse = parse_method_response(&responses, 1, "Email/get")?;
        Ok(parsed.list)
    }

    /// Single `Email/set` batch with one keyword patch per identifier
    ///
    /// `value: None` clears the keyword (JSON null in the patch). Partial
    /// per-id failures stay inside the returned response's `notUpdated` map.
    async fn update_keyword(
        &mut self,
        email_ids: &[String],
        keyword: &str,
        value: Option<bool>,
    ) -> AppResult<Value> {
        if email_ids.is_empty() {
            return Err(AppError::invalid("at least one email id is required"));
        }
        let account_id = self.account_id().await?;

        let patch_value = match value {
            Some(flag) => json!(flag),
            None => Value::Null,
        };
        let mut update = Map::new();
        for id in email_ids {
            let mut patch = Map::new();
            patch.insert(format!("keywords/{keyword}"), patch_value.clone());
            update.insert(id.clone(), Value::Object(patch));
        }

        let responses = self
            .request(vec![Invocation::new(
                "Email/set",
                json!({ "accountId": account_id, "update": update }),
                "s0",
            )])
            .await?;
        Ok(crate::jmap::method_result(&responses, 0, "Email/set")?.clone())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::errors::AppError;
    use crate::jmap::stub::{batch, client_with_session};

    fn email_set_ok() -> serde_json::Value {
        batch(vec![json!([
            "Email/set",
            { "updated": { "E1": null }, "notUpdated": null },
            "s0"
        ])])
    }

    #[tokio::test]
    async fn list_emails_builds_query_then_backreferenced_get() {
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(
            200,
            batch(vec![
                json!(["Email/query", { "ids": ["E1", "E2"] }, "q0"]),
                json!(["Email/get", { "list": [{ "id": "E1" }, { "id": "E2" }] }, "g0"]),
            ]),
        );

        let emails = client.list_emails(None, 10).await.expect("list succeeds");
        assert_eq!(emails.len(), 2);

        let body = transport.recorded()[1].body.clone().expect("post body");
        assert_eq!(body["methodCalls"][0][0], json!("Email/query"));
        assert_eq!(
            body["methodCalls"][0][1]["sort"],
            json!([{ "property": "receivedAt", "isAscending": false }])
        );
        // No filter when no mailbox scope was given.
        assert_eq!(body["methodCalls"][0][1]["filter"], json!({}));
        assert_eq!(
            body["methodCalls"][1][1]["#ids"],
            json!({ "resultOf": "q0", "name": "Email/query", "path": "/ids" })
        );
    }

    #[tokio::test]
    async fn list_emails_scoped_to_resolved_mailbox() {
        // End-to-end: label "Inbox" resolves to "M1", query filters on it.
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(
            200,
            batch(vec![json!([
                "Mailbox/get",
                { "list": [{ "id": "M1", "name": "Inbox", "role": "inbox" }] },
                "m0"
            ])]),
        );
        transport.enqueue(
            200,
            batch(vec![
                json!(["Email/query", { "ids": [] }, "q0"]),
                json!(["Email/get", { "list": [] }, "g0"]),
            ]),
        );

        let mailbox_id = client
            .resolve_mailbox_id("Inbox")
            .await
            .expect("label resolves");
        assert_eq!(mailbox_id, "M1");
        client
            .list_emails(Some(&mailbox_id), 10)
            .await
            .expect("list succeeds");

        let body = transport.recorded()[2].body.clone().expect("post body");
        assert_eq!(
            body["methodCalls"][0][1]["filter"],
            json!({ "inMailbox": "M1" })
        );
    }

    #[tokio::test]
    async fn search_combines_text_and_mailbox_filter() {
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(
            200,
            batch(vec![
                json!(["Email/query", { "ids": [] }, "q0"]),
                json!(["Email/get", { "list": [] }, "g0"]),
            ]),
        );

        client
            .search_emails("invoice", Some("M2"), 5)
            .await
            .expect("search succeeds");

        let body = transport.recorded()[1].body.clone().expect("post body");
        assert_eq!(
            body["methodCalls"][0][1]["filter"],
            json!({ "text": "invoice", "inMailbox": "M2" })
        );
        assert_eq!(body["methodCalls"][0][1]["limit"], json!(5));
        // Reduced property set, no bodies requested.
        let properties = &body["methodCalls"][1][1]["properties"];
        assert!(!properties.to_string().contains("bodyValues"));
    }

    #[tokio::test]
    async fn get_email_requests_capped_body_values() {
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(
            200,
            batch(vec![json!([
                "Email/get",
                { "list": [{ "id": "E1", "subject": "Hi" }], "notFound": [] },
                "g0"
            ])]),
        );

        let email = client.get_email("E1").await.expect("get succeeds");
        assert_eq!(email["subject"], json!("Hi"));

        let body = transport.recorded()[1].body.clone().expect("post body");
        let args = &body["methodCalls"][0][1];
        assert_eq!(args["fetchTextBodyValues"], json!(true));
        assert_eq!(args["fetchHTMLBodyValues"], json!(true));
        assert_eq!(args["maxBodyValueBytes"], json!(100_000));
    }

    #[tokio::test]
    async fn get_email_maps_not_found() {
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(
            200,
            batch(vec![json!([
                "Email/get",
                { "list": [], "notFound": ["E9"] },
                "g0"
            ])]),
        );

        let err = client.get_email("E9").await.expect_err("must fail");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn mark_read_patches_seen_keyword_per_id() {
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(
            200,
            batch(vec![json!([
                "Email/set",
                { "updated": { "E1": null, "E2": null } },
                "s0"
            ])]),
        );

        client
            .mark_read(&["E1".to_owned(), "E2".to_owned()])
            .await
            .expect("mark read succeeds");

        let body = transport.recorded()[1].body.clone().expect("post body");
        let update = &body["methodCalls"][0][1]["update"];
        assert_eq!(update["E1"], json!({ "keywords/$seen": true }));
        assert_eq!(update["E2"], json!({ "keywords/$seen": true }));
    }

    #[tokio::test]
    async fn mark_unread_clears_keyword_with_null() {
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(200, email_set_ok());

        client
            .mark_unread(&["E1".to_owned()])
            .await
            .expect("mark unread succeeds");

        let body = transport.recorded()[1].body.clone().expect("post body");
        assert_eq!(
            body["methodCalls"][0][1]["update"]["E1"],
            json!({ "keywords/$seen": null })
        );
    }

    #[tokio::test]
    async fn mark_read_twice_does_not_raise() {
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(200, email_set_ok());
        transport.enqueue(200, email_set_ok());

        let ids = vec!["E1".to_owned()];
        client.mark_read(&ids).await.expect("first call succeeds");
        client.mark_read(&ids).await.expect("second call succeeds");

        // Both calls carry the same steady-state patch.
        let recorded = transport.recorded();
        let first = recorded[1].body.clone().expect("post body");
        let second = recorded[2].body.clone().expect("post body");
        assert_eq!(first["methodCalls"], second["methodCalls"]);
    }

    #[tokio::test]
    async fn delete_sets_deleted_keyword_not_a_move() {
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(
            200,
            batch(vec![json!(["Email/set", { "updated": { "E1": null } }, "s0"])]),
        );

        client
            .delete_emails(&["E1".to_owned()])
            .await
            .expect("delete succeeds");

        let body = transport.recorded()[1].body.clone().expect("post body");
        let patch = &body["methodCalls"][0][1]["update"]["E1"];
        assert_eq!(*patch, json!({ "keywords/$deleted": true }));
    }

    #[tokio::test]
    async fn partial_failures_surface_raw_in_response() {
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(
            200,
            batch(vec![json!([
                "Email/set",
                {
                    "updated": { "E1": null },
                    "notUpdated": { "E2": { "type": "notFound" } }
                },
                "s0"
            ])]),
        );

        let result = client
            .mark_read(&["E1".to_owned(), "E2".to_owned()])
            .await
            .expect("call succeeds despite partial failure");
        assert_eq!(result["notUpdated"]["E2"]["type"], json!("notFound"));
    }

    #[tokio::test]
    async fn empty_id_list_is_rejected_before_any_network_call() {
        let (mut client, transport) = client_with_session("acc1");
        let err = client.mark_read(&[]).await.expect_err("must fail");
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert_eq!(transport.request_count(), 0);
    }
}
