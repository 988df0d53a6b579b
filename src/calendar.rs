//! Calendar event operations
//!
//! Same query+get and set-create/update/destroy batch shapes as the mail
//! operations, applied to `CalendarEvent` objects. Operations take server
//! identifiers directly; there is no label resolution for calendars.
//! Participant and location sub-objects pass through as structured literals.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::errors::{AppError, AppResult};
use crate::jmap::{
    Invocation, JmapClient, SetCreateFailure, Transport, created_entry, method_result,
    parse_method_response, result_reference,
};
use crate::models::CreateEventInput;

/// Property set for event fetches
const EVENT_PROPERTIES: &[&str] = &[
    "id",
    "calendarIds",
    "title",
    "description",
    "start",
    "duration",
    "timeZone",
    "status",
    "participants",
    "locations",
];

/// Wire shape of a `CalendarEvent/get` response
#[derive(Debug, Deserialize)]
struct EventGetResponse {
    #[serde(default)]
    list: Vec<Value>,
    #[serde(default, rename = "notFound")]
    not_found: Vec<String>,
}

impl<T: Transport> JmapClient<T> {
    /// List upcoming events, sorted by start time ascending
    pub async fn list_events(&mut self, limit: usize) -> AppResult<Vec<Value>> {
        let account_id = self.account_id().await?;
        let responses = self
            .request(vec![
                Invocation::new(
                    "CalendarEvent/query",
                    json!({
                        "accountId": account_id,
                        "filter": {},
                        "sort": [{ "property": "start", "isAscending": true }],
                        "limit": limit,
                    }),
                    "q0",
                ),
                Invocation::new(
                    "CalendarEvent/get",
                    json!({
                        "accountId": account_id,
                        "#ids": result_reference("q0", "CalendarEvent/query", "/ids"),
                        "properties": EVENT_PROPERTIES,
                    }),
                    "g0",
                ),
            ])
            .await?;
        let parsed: EventGetResponse = parse_method_response(&responses, 1, "CalendarEvent/get")?;
        Ok(parsed.list)
    }

    /// Fetch a single event by identifier
    pub async fn get_event(&mut self, event_id: &str) -> AppResult<Value> {
        let account_id = self.account_id().await?;
        let responses = self
            .request(vec![Invocation::new(
                "CalendarEvent/get",
                json!({
                    "accountId": account_id,
                    "ids": [event_id],
                    "properties": EVENT_PROPERTIES,
                }),
                "g0",
            )])
            .await?;
        let parsed: EventGetResponse = parse_method_response(&responses, 0, "CalendarEvent/get")?;

        if parsed.not_found.iter().any(|id| id == event_id) {
            return Err(AppError::NotFound(format!("event '{event_id}' not found")));
        }
        parsed
            .list
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("event '{event_id}' not found")))
    }

    /// Create an event, returning its server-assigned identifier
    pub async fn create_event(&mut self, input: &CreateEventInput) -> AppResult<(String, Value)> {
        let account_id = self.account_id().await?;
        let event = event_object(input);
        let responses = self
            .request(vec![Invocation::new(
                "CalendarEvent/set",
                json!({ "accountId": account_id, "create": { "event": event } }),
                "c0",
            )])
            .await?;
        created_entry(&responses, 0, "CalendarEvent/set", "event")?.map_err(|failure| {
            match failure {
                SetCreateFailure::Rejected(msg) | SetCreateFailure::MissingEntry(msg) => {
                    AppError::Internal(msg)
                }
            }
        })
    }

    /// Apply a patch to an event; returns the raw set response
    ///
    /// Per-id rejections are surfaced as-is in `notUpdated`.
    pub async fn update_event(&mut self, event_id: &str, patch: Value) -> AppResult<Value> {
        let account_id = self.account_id().await?;
        let responses = self
            .request(vec![Invocation::new(
                "CalendarEvent/set",
                json!({ "accountId": account_id, "update": { event_id: patch } }),
                "u0",
            )])
            .await?;
        Ok(method_result(&responses, 0, "CalendarEvent/set")?.clone())
    }

    /// Destroy events by identifier; returns the raw set response
    pub async fn delete_events(&mut self, event_ids: &[String]) -> AppResult<Value> {
        if event_ids.is_empty() {
            return Err(AppError::invalid("at least one event id is required"));
        }
        let account_id = self.account_id().await?;
        let responses = self
            .request(vec![Invocation::new(
                "CalendarEvent/set",
                json!({ "accountId": account_id, "destroy": event_ids }),
                "d0",
            )])
            .await?;
        Ok(method_result(&responses, 0, "CalendarEvent/set")?.clone())
    }
}

/// Build the creation object, defaulting omitted optionals to empty values
fn event_object(input: &CreateEventInput) -> Value {
    let calendar_ids = match &input.calendar_id {
        Some(id) => json!({ id.clone(): true }),
        None => json!({}),
    };
    json!({
        "@type": "Event",
        "calendarIds": calendar_ids,
        "title": input.title,
        "description": input.description.clone().unwrap_or_default(),
        "start": input.start,
        "duration": input.duration.clone().unwrap_or_default(),
        "timeZone": input.time_zone.clone().unwrap_or_default(),
        "participants": input.participants.clone().unwrap_or_else(|| json!({})),
        "locations": input.locations.clone().unwrap_or_else(|| json!({})),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::errors::AppError;
    use crate::jmap::stub::{batch, client_with_session};
    use crate::models::CreateEventInput;

    fn event_input() -> CreateEventInput {
        CreateEventInput {
            calendar_id: Some("C1".to_owned()),
            title: "Standup".to_owned(),
            description: None,
            start: "2026-09-01T09:00:00".to_owned(),
            duration: Some("PT15M".to_owned()),
            time_zone: Some("Europe/Berlin".to_owned()),
            participants: None,
            locations: None,
        }
    }

    #[tokio::test]
    async fn list_events_sorts_by_start_ascending() {
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(
            200,
            batch(vec![
                json!(["CalendarEvent/query", { "ids": ["V1"] }, "q0"]),
                json!(["CalendarEvent/get", { "list": [{ "id": "V1" }] }, "g0"]),
            ]),
        );

        let events = client.list_events(20).await.expect("list succeeds");
        assert_eq!(events.len(), 1);

        let body = transport.recorded()[1].body.clone().expect("post body");
        assert_eq!(
            body["methodCalls"][0][1]["sort"],
            json!([{ "property": "start", "isAscending": true }])
        );
        assert_eq!(
            body["methodCalls"][1][1]["#ids"],
            json!({ "resultOf": "q0", "name": "CalendarEvent/query", "path": "/ids" })
        );
    }

    #[tokio::test]
    async fn create_event_defaults_omitted_optionals_to_empty() {
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(
            200,
            batch(vec![json!([
                "CalendarEvent/set",
                { "created": { "event": { "id": "V1" } } },
                "c0"
            ])]),
        );

        let (id, _) = client
            .create_event(&event_input())
            .await
            .expect("create succeeds");
        assert_eq!(id, "V1");

        let body = transport.recorded()[1].body.clone().expect("post body");
        let event = &body["methodCalls"][0][1]["create"]["event"];
        assert_eq!(event["calendarIds"], json!({ "C1": true }));
        assert_eq!(event["description"], json!(""));
        assert_eq!(event["participants"], json!({}));
    }

    #[tokio::test]
    async fn create_event_rejection_surfaces_type_and_description() {
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(
            200,
            batch(vec![json!([
                "CalendarEvent/set",
                { "notCreated": { "event": { "type": "invalidProperties", "description": "bad start" } } },
                "c0"
            ])]),
        );

        let err = client
            .create_event(&event_input())
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("invalidProperties"));
        assert!(err.to_string().contains("bad start"));
    }

    #[tokio::test]
    async fn delete_events_uses_destroy_list() {
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(
            200,
            batch(vec![json!([
                "CalendarEvent/set",
                { "destroyed": ["V1", "V2"] },
                "d0"
            ])]),
        );

        let result = client
            .delete_events(&["V1".to_owned(), "V2".to_owned()])
            .await
            .expect("delete succeeds");
        assert_eq!(result["destroyed"], json!(["V1", "V2"]));

        let body = transport.recorded()[1].body.clone().expect("post body");
        assert_eq!(body["methodCalls"][0][1]["destroy"], json!(["V1", "V2"]));
    }

    #[tokio::test]
    async fn get_event_maps_not_found() {
        let (mut client, transport) = client_with_session("acc1");
        transport.enqueue(
            200,
            batch(vec![json!([
                "CalendarEvent/get",
                { "list": [], "notFound": ["V9"] },
                "g0"
            ])]),
        );

        let err = client.get_event("V9").await.expect_err("must fail");
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
