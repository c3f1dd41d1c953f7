//! Support data model: customers, messages, canned replies, and the views
//! the dashboard reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Written by the customer.
    Incoming,
    /// Written by an agent in reply.
    Outgoing,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incoming" => Ok(Self::Incoming),
            "outgoing" => Ok(Self::Outgoing),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

/// Lifecycle status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Incoming, not yet opened by an agent.
    Unread,
    /// Incoming, opened but not answered.
    Read,
    /// Incoming, at least one reply recorded.
    Replied,
    /// Outgoing agent reply.
    Sent,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unread => "unread",
            Self::Read => "read",
            Self::Replied => "replied",
            Self::Sent => "sent",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unread" => Ok(Self::Unread),
            "read" => Ok(Self::Read),
            "replied" => Ok(Self::Replied),
            "sent" => Ok(Self::Sent),
            _ => Err(format!("Unknown message status: {}", s)),
        }
    }
}

/// A customer record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Customer {
    pub id: i64,
    /// External business key, unique across customers.
    pub customer_id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    /// Free-form JSON object, opaque to the console.
    pub profile_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A single utterance in a customer's conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: i64,
    /// Internal id of the owning customer.
    pub customer_id: i64,
    pub content: String,
    pub direction: Direction,
    /// Set only on outgoing messages.
    pub agent_id: Option<i64>,
    pub agent_name: Option<String>,
    pub status: MessageStatus,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub replied_at: Option<DateTime<Utc>>,
}

/// A reusable reply template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CannedMessage {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

// ── Inputs ──────────────────────────────────────────────────────────────

/// Who sent an incoming message. Used to resolve or create the customer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerInfo {
    /// External business key, preferred for lookup when present.
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    /// Profile keys to attach; merged into an existing customer's profile.
    #[serde(default)]
    pub profile: Option<serde_json::Value>,
}

impl CustomerInfo {
    pub fn with_email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Default::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_customer_id(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }

    /// External id, if a non-blank one was supplied.
    pub fn external_id(&self) -> Option<&str> {
        non_blank(self.customer_id.as_deref())
    }

    /// Email, if a non-blank one was supplied.
    pub fn lookup_email(&self) -> Option<&str> {
        non_blank(self.email.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// What the store needs to persist a new incoming message.
#[derive(Debug, Clone)]
pub struct NewIncoming {
    pub customer: CustomerInfo,
    pub content: String,
    pub priority: u8,
    /// External id to use if a new customer has to be created and none was supplied.
    pub generated_customer_id: String,
    /// Skip the insert if the customer already has an incoming message with identical content.
    pub skip_duplicate: bool,
}

/// Result of persisting an incoming message.
#[derive(Debug, Clone)]
pub enum IncomingOutcome {
    Created { customer: Customer, message: Message },
    Duplicate { customer: Customer, existing_id: i64 },
}

/// A stored customer submission.
#[derive(Debug, Clone)]
pub struct SubmittedMessage {
    pub message: Message,
    pub customer: Customer,
}

/// An agent's reply to a message.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplyDraft {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    #[serde(default = "default_agent_id")]
    pub agent_id: i64,
    #[serde(default = "default_agent_name")]
    pub agent_name: String,
}

impl ReplyDraft {
    pub fn new(content: impl Into<String>, agent_id: i64, agent_name: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            agent_id,
            agent_name: agent_name.into(),
        }
    }
}

/// Read an explicit JSON `null` as an empty string, so it fails validation
/// like a missing field instead of failing to parse.
pub(crate) fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn default_agent_id() -> i64 {
    1
}

fn default_agent_name() -> String {
    "Agent".into()
}

/// Result of recording a reply: the original after its status update, and the reply.
#[derive(Debug, Clone)]
pub struct RecordedReply {
    pub original: Message,
    pub reply: Message,
}

/// A new canned reply template.
#[derive(Debug, Clone, Deserialize)]
pub struct CannedDraft {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    #[serde(default = "default_category", deserialize_with = "null_as_empty")]
    pub category: String,
}

impl CannedDraft {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            category: category.into(),
        }
    }
}

fn default_category() -> String {
    "general".into()
}

/// Filter for the dashboard message list.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    /// `None` lists every status.
    pub status: Option<MessageStatus>,
    /// Only messages with `priority >= min_priority`.
    pub min_priority: Option<u8>,
    /// Substring over content, customer name, and customer email.
    pub search: Option<String>,
}

// ── Views ───────────────────────────────────────────────────────────────

/// A row of the dashboard message list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageSummary {
    pub id: i64,
    pub customer_id: i64,
    pub customer_name: String,
    pub customer_email: String,
    pub content: String,
    pub status: MessageStatus,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub replied_at: Option<DateTime<Utc>>,
}

/// A message together with its customer and the customer's full conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    pub message: Message,
    pub customer: Customer,
    /// Every message for the customer, oldest first.
    pub conversation: Vec<Message>,
}

/// Message hit in a global search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageHit {
    pub id: i64,
    /// First 100 characters of the message.
    pub content: String,
    pub customer_name: String,
    pub created_at: DateTime<Utc>,
}

/// Customer hit in a global search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerHit {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// Global search results.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResults {
    pub messages: Vec<MessageHit>,
    pub customers: Vec<CustomerHit>,
}
