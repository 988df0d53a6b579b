//! Mailbox records, the refreshable cache, and label resolution
//!
//! Mailboxes are fetched in bulk on demand and held in a flat list on the
//! client. The cache is invalidated only by an explicit refresh: a mailbox
//! created or deleted elsewhere is not observed until then. Lookups are
//! linear scans; the list is small.

use std::time::Instant;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::{AppError, AppResult};
use crate::jmap::{Invocation, JmapClient, Transport, parse_method_response};

/// Properties requested on the bulk mailbox listing
const MAILBOX_PROPERTIES: &[&str] = &[
    "id",
    "name",
    "parentId",
    "role",
    "sortOrder",
    "isReadOnly",
    "myRights",
    "totalEmails",
    "unreadEmails",
];

/// Capability flags on a mailbox
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct MailboxRights {
    /// Whether messages may be added to this mailbox
    pub may_add_items: bool,
    /// Whether child mailboxes may be created under this one
    pub may_create_child: bool,
}

/// Mailbox record as returned by the server
///
/// The identifier is opaque and server-assigned; the display name and role
/// are what users address mailboxes by.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Mailbox {
    /// Opaque server-assigned identifier
    pub id: String,
    /// Display name (e.g. `Inbox`, `Projects/2026`)
    pub name: String,
    /// Semantic role, when the server assigns one
    /// (inbox/sent/drafts/trash/junk/archive/outbox)
    #[serde(default)]
    pub role: Option<String>,
    /// Whether the mailbox rejects all writes
    #[serde(default)]
    pub is_read_only: bool,
    /// Fine-grained capability flags
    #[serde(default)]
    pub my_rights: MailboxRights,
    /// Total message count, when reported
    #[serde(default)]
    pub total_emails: Option<u64>,
    /// Unread message count, when reported
    #[serde(default)]
    pub unread_emails: Option<u64>,
}

impl Mailbox {
    /// Whether a draft may be placed here
    ///
    /// True for the inbox role, and for any mailbox that is not read-only
    /// and explicitly permits adding items or creating children.
    fn is_writable(&self) -> bool {
        if self.role.as_deref() == Some("inbox") {
            return true;
        }
        !self.is_read_only && (self.my_rights.may_add_items || self.my_rights.may_create_child)
    }
}

/// Flat, explicitly-refreshable mailbox cache
///
/// Holds the last full listing plus a marker of when it was fetched. No TTL
/// and no partial invalidation.
#[derive(Debug, Default)]
pub struct MailboxCache {
    entries: Vec<Mailbox>,
    refreshed_at: Option<Instant>,
}

impl MailboxCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a listing has ever been stored
    pub fn is_populated(&self) -> bool {
        self.refreshed_at.is_some()
    }

    /// Cached entries (possibly empty)
    pub fn entries(&self) -> &[Mailbox] {
        &self.entries
    }

    /// Replace the cached listing wholesale
    pub fn replace(&mut self, entries: Vec<Mailbox>) {
        self.entries = entries;
        self.refreshed_at = Some(Instant::now());
    }

    /// Map a human-supplied label to a cached mailbox
    ///
    /// Match order, first hit wins:
    /// 1. case-insensitive exact match on display name
    /// 2. case-insensitive substring match on display name
    /// 3. fixed label-to-role table matched against each mailbox's role
    ///
    /// Returns `None` when no strategy matches; callers translate that into
    /// a user-facing error listing the cached names.
    pub fn resolve(&self, label: &str) -> Option<&Mailbox> {
        let needle = label.to_lowercase();

        if let Some(found) = self
            .entries
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(label))
        {
            return Some(found);
        }

        if let Some(found) = self
            .entries
            .iter()
            .find(|m| m.name.to_lowercase().contains(&needle))
        {
            return Some(found);
        }

        let role = role_for_label(&needle)?;
        self.entries.iter().find(|m| m.role.as_deref() == Some(role))
    }

    /// Pick the mailbox a draft should be placed into
    ///
    /// Selection order: role `drafts`; else a name containing `draft`
    /// (case-insensitive); else the first writable mailbox; else the first
    /// cached mailbox. `None` only when the cache is empty.
    pub fn draft_target(&self) -> Option<&Mailbox> {
        self.entries
            .iter()
            .find(|m| m.role.as_deref() == Some("drafts"))
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|m| m.name.to_lowercase().contains("draft"))
            })
            .or_else(|| self.entries.iter().find(|m| m.is_writable()))
            .or_else(|| self.entries.first())
    }

    /// Display names of all cached mailboxes, for error messages
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|m| m.name.clone()).collect()
    }
}

/// Fixed label-to-role table (strategy 3 of [`MailboxCache::resolve`])
fn role_for_label(label: &str) -> Option<&'static str> {
    match label {
        "inbox" => Some("inbox"),
        "sent" => Some("sent"),
        "draft" | "drafts" => Some("drafts"),
        "trash" | "deleted" => Some("trash"),
        "spam" | "junk" => Some("junk"),
        "archive" => Some("archive"),
        "outbox" => Some("outbox"),
        _ => None,
    }
}

/// Wire shape of a `Mailbox/get` response
#[derive(Debug, Deserialize)]
struct MailboxGetResponse {
    #[serde(default)]
    list: Vec<Mailbox>,
}

impl<T: Transport> JmapClient<T> {
    /// Fetch the full mailbox listing and replace the cache
    pub async fn refresh_mailboxes(&mut self) -> AppResult<&[Mailbox]> {
        let account_id = self.account_id().await?;
        let responses = self
            .request(vec![Invocation::new(
                "Mailbox/get",
                json!({
                    "accountId": account_id,
                    "ids": null,
                    "properties": MAILBOX_PROPERTIES,
                }),
                "m0",
            )])
            .await?;
        let parsed: MailboxGetResponse = parse_method_response(&responses, 0, "Mailbox/get")?;
        self.mailboxes.replace(parsed.list);
        Ok(self.mailboxes.entries())
    }

    /// Populate the mailbox cache lazily
    pub async fn ensure_mailboxes(&mut self) -> AppResult<()> {
        if !self.mailboxes.is_populated() {
            self.refresh_mailboxes().await?;
        }
        Ok(())
    }

    /// The mailbox listing, optionally forcing a refresh
    pub async fn mailbox_listing(&mut self, refresh: bool) -> AppResult<Vec<Mailbox>> {
        if refresh {
            self.refresh_mailboxes().await?;
        } else {
            self.ensure_mailboxes().await?;
        }
        Ok(self.mailboxes.entries().to_vec())
    }

    /// Resolve a human-supplied label to a mailbox identifier
    ///
    /// The caller decides whether a value is a label; opaque identifiers are
    /// passed through tool inputs on a separate field and never reach this
    /// method.
    ///
    /// # Errors
    ///
    /// `Resolution` listing the cached mailbox names when no match is found.
    pub async fn resolve_mailbox_id(&mut self, label: &str) -> AppResult<String> {
        self.ensure_mailboxes().await?;
        match self.mailboxes.resolve(label) {
            Some(mailbox) => Ok(mailbox.id.clone()),
            None => Err(AppError::Resolution(format!(
                "no mailbox matches '{label}'; known mailboxes: {}",
                self.mailboxes.names().join(", ")
            ))),
        }
    }
}
