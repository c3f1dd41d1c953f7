//! Backend-agnostic `Database` trait.
//!
//! Every method is one atomic unit of work against the store: the backend
//! acquires a connection for the call, runs its statements in a single
//! transaction, and releases the connection on every exit path.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::support::model::{
    CannedDraft, CannedMessage, ConversationView, Customer, CustomerHit, IncomingOutcome, Message,
    MessageFilter, MessageHit, MessageSummary, NewIncoming, RecordedReply, ReplyDraft,
};

#[async_trait]
pub trait Database: Send + Sync {
    /// Apply all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// Highest applied migration version (0 for an empty database).
    async fn schema_version(&self) -> Result<i64, DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Resolve or create the customer and insert an incoming message.
    async fn record_incoming(
        &self,
        incoming: &NewIncoming,
    ) -> Result<IncomingOutcome, DatabaseError>;

    /// Insert an outgoing reply and mark the original as replied.
    ///
    /// Returns `None` (and writes nothing) if `message_id` does not exist.
    async fn record_reply(
        &self,
        message_id: i64,
        draft: &ReplyDraft,
    ) -> Result<Option<RecordedReply>, DatabaseError>;

    /// Move an unread incoming message to read. Returns whether a row changed.
    async fn mark_read(&self, message_id: i64) -> Result<bool, DatabaseError>;

    /// Get a message by ID.
    async fn get_message(&self, id: i64) -> Result<Option<Message>, DatabaseError>;

    /// Incoming messages matching `filter`, most urgent and most recent first.
    async fn list_messages(
        &self,
        filter: &MessageFilter,
    ) -> Result<Vec<MessageSummary>, DatabaseError>;

    /// A message, its customer, and the customer's conversation, read from one snapshot.
    async fn get_conversation(
        &self,
        message_id: i64,
    ) -> Result<Option<ConversationView>, DatabaseError>;

    /// Messages of either direction whose content, customer name, or customer
    /// email contains `query`. Content is returned untruncated.
    async fn search_messages(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MessageHit>, DatabaseError>;

    // ── Customers ───────────────────────────────────────────────────

    /// Get a customer by internal ID.
    async fn get_customer(&self, id: i64) -> Result<Option<Customer>, DatabaseError>;

    /// Customers whose name, email, or phone contains `query`.
    async fn search_customers(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<CustomerHit>, DatabaseError>;

    // ── Canned messages ─────────────────────────────────────────────

    /// All canned messages, oldest first.
    async fn list_canned(&self) -> Result<Vec<CannedMessage>, DatabaseError>;

    /// Insert a canned message.
    async fn insert_canned(&self, draft: &CannedDraft) -> Result<CannedMessage, DatabaseError>;

    /// Insert a canned message unless one with the same title exists.
    async fn insert_canned_if_absent(
        &self,
        draft: &CannedDraft,
    ) -> Result<Option<CannedMessage>, DatabaseError>;
}
