//! Contact (address book) operations
//!
//! Mirrors the calendar module: query+get listing, single get, and
//! set-create/update/destroy against `Contact` objects. Email, phone, and
//! address sub-lists pass through as structured literals.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::errors::{AppError, AppResult};
use crate::jmap::{
    Invocation, JmapClient, SetCreateFailure, Transport, created_entry, method_result,
    parse_method_response, result_reference,
};
use crate::models::CreateContactInput;

/// Property set for contact fetches
const CONTACT_PROPERTIES: &[&str] = &[
    "id",
    "firstName",
    "lastName",
    "company",
    "jobTitle",
    "emails",
    "phones",
    "addresses",
    "notes",
];

/// Wire shape of a `Contact/get` response
#[derive(Debug, Deserialize)]
struct ContactGetResponse {
    #[serde(default)]
    list: Vec<Value>,
    #[serde(default, rename = "notFound")]
    not_found: Vec<String>,
}

impl<T: Transport> JmapClient<T> {
    /// List contacts, sorted by last name ascending
    pub async fn list_contacts(&mut self, limit: usize) -> AppResult<Vec<Value>> {
        let account_id = self.account_id().await?;
        let responses = self
            .request(vec![
                Invocation::new(
                    "Contact/query",
                    json!({
                        "accountId": account_id,
                        "filter": {},
                        "sort": [{ "property": "lastName", "isAscending": true }],
                        "limit": limit,
                    }),
                    "q0",
                ),
                Invocation::new(
                    "Contact/get",
                    json!({
                        "accountId": account_id,
                        "#ids": result_reference("q0", "Contact/query", "/ids"),
                        "properties": CONTACT_PROPERTIES,
                    }),
                    "g0",
                ),
            ])
            .await?;
        let parsed: ContactGetResponse = parse_method_response(&responses, 1, "Contact/get")?;
        Ok(parsed.list)
    }

    /// Fetch a single contact by identifier
    pub async fn get_contact(&mut self, contact_id: &str) -> AppResult<Value> {
        let account_id = self.account_id().await?;
        let responses = self
            .request(vec![Invocation::new(
                "Contact/get",
                json!({
                    "accountId": account_id,
                    "ids": [contact_id],
                    "properties": CONTACT_PROPERTIES,
                }),
                "g0",
            )])
            .await?;
        let parsed: ContactGetResponse = parse_method_response(&responses, 0, "Contact/get")?;

        if parsed.not_found.iter().any(|id| id == contact_id) {
            return Err(AppError::NotFound(format!(
                "contact '{contact_id}' not found"
            )));
        }
        parsed
            .list
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("contact '{contact_id}' not found")))
    }

    /// Create a contact, returning its server-assigned identifier
    pub async fn create_contact(
        &mut self,
        input: &CreateContactInput,
    ) -> AppResult<(String, Value)> {
        let account_id = self.account_id().await?;
        let contact = contact_object(input);
        let responses = self
            .request(vec![Invocation::new(
                "Contact/set",
                json!({ "accountId": account_id, "create": { "contact": contact } }),
                "c0",
            )])
            .await?;
        created_entry(&responses, 0, "Contact/set", "contact")?.map_err(|failure| match failure {
            SetCreateFailure::Rejected(msg) | SetCreateFailure::MissingEntry(msg) => {
                AppError::Internal(msg)
            }
        })
    }

    /// Apply a patch to a contact; returns the raw set response
    pub async fn update_contact(&mut self, contact_id: &str, patch: Value) -> AppResult<Value> {
        let account_id = self.account_id().await?;
        let responses = self
            .request(vec![Invocation::new(
                "Contact/set",
                json!({ "accountId": account_id, "update": { contact_id: patch } }),
                "u0",
            )])
            .await?;
        Ok(method_result(&responses, 0, "Contact/set")?.clone())
    }

    /// Destroy contacts by identifier; returns the raw set response
    pub async fn delete_contacts(&mut self, contact_ids: &[String]) -> AppResult<Value> {
        if contact_ids.is_empty() {
            return Err(AppError::invalid("at least one contact id is required"));
        }
        let account_id = self.account_id().await?;
        let responses = self
            .request(vec![Invocation::new(
                "Contact/set",
                json!({ "accountId": account_id, "destroy": contact_ids }),
                "d0",
            )])
            .await?;
        Ok(method_result(&responses, 0, "Contact/set")?.clone())
    }
}

/// Build the creation object, defaulting omitted optionals to empty values
fn contact_object(input: &CreateContactInput) -> Value {
    json!({
        "firstName": input.first_name.clone().unwrap_or_default(),
        "lastName": input.last_name.clone().unwrap_or_default(),
        "company": input.company.clone().unwrap_or_default(),
        "jobTitle": input.job_title.clone().unwrap_or_default(),
        "emails": input.emails.clone().unwrap_or_else(|| json!([])),
        "phones": input.phones.clone().unwrap_or_else(|| json!([])),
        "addresses": input.addresses.clone().unwrap_or_else(|| json!([])),
        "notes": input.notes.clone().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::errors::AppError;
    use crate::jmap::stub::{batch, client_with_session};
    use crate::models::CreateContactInput;

    #[tokio::test]
    async fn list_contacts_sorts_by_last_name() {
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(
            200,
            batch(vec![
                json!(["Contact/query", { "ids": ["P1", "P2"] }, "q0"]),
                json!([
                    "Contact/get",
                    { "list": [{ "id": "P1" }, { "id": "P2" }] },
                    "g0"
                ]),
            ]),
        );

        let contacts = client.list_contacts(50).await.expect("list succeeds");
        assert_eq!(contacts.len(), 2);

        let body = transport.recorded()[1].body.clone().expect("post body");
        assert_eq!(
            body["methodCalls"][0][1]["sort"],
            json!([{ "property": "lastName", "isAscending": true }])
        );
    }

    #[tokio::test]
    async fn create_contact_defaults_omitted_lists_to_empty() {
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(
            200,
            batch(vec![json!([
                "Contact/set",
                { "created": { "contact": { "id": "P1" } } },
                "c0"
            ])]),
        );

        let input = CreateContactInput {
            first_name: Some("Ada".to_owned()),
            last_name: Some("Lovelace".to_owned()),
            company: None,
            job_title: None,
            emails: Some(json!([{ "type": "personal", "value": "ada@example.com" }])),
            phones: None,
            addresses: None,
            notes: None,
        };
        let (id, _) = client.create_contact(&input).await.expect("create succeeds");
        assert_eq!(id, "P1");

        let body = transport.recorded()[1].body.clone().expect("post body");
        let contact = &body["methodCalls"][0][1]["create"]["contact"];
        assert_eq!(contact["firstName"], json!("Ada"));
        assert_eq!(contact["company"], json!(""));
        assert_eq!(
            contact["emails"],
            json!([{ "type": "personal", "value": "ada@example.com" }])
        );
        assert_eq!(contact["phones"], json!([]));
    }

    #[tokio::test]
    async fn update_contact_returns_raw_set_response() {
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(
            200,
            batch(vec![json!([
                "Contact/set",
                { "updated": { "P1": null }, "notUpdated": {} },
                "u0"
            ])]),
        );

        let result = client
            .update_contact("P1", json!({ "company": "Analytical Engines" }))
            .await
            .expect("update succeeds");
        assert!(result["updated"].get("P1").is_some());

        let body = transport.recorded()[1].body.clone().expect("post body");
        assert_eq!(
            body["methodCalls"][0][1]["update"]["P1"]["company"],
            json!("Analytical Engines")
        );
    }

    #[tokio::test]
    async fn delete_contacts_rejects_empty_id_list() {
        let (mut client, transport) = client_with_session("acc1");
        let err = client.delete_contacts(&[]).await.expect_err("must fail");
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn get_contact_maps_not_found() {
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(
            200,
            batch(vec![json!([
                "Contact/get",
                { "list": [], "notFound": ["P9"] },
                "g0"
            ])]),
        );

        let err = client.get_contact("P9").await.expect_err("must fail");
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
