//! Message service: validation, triage, persistence and event publication.
//!
//! Every mutator validates first, then makes exactly one store call (one
//! transaction), then publishes. Nothing is published for a write that
//! failed or was rejected.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use super::model::{
    CannedDraft, CannedMessage, ConversationView, CustomerInfo, IncomingOutcome, Message,
    MessageFilter, MessageSummary, NewIncoming, ReplyDraft, SearchResults, SubmittedMessage,
};
use super::notifier::{DashboardEvent, Notifier};
use crate::error::{DatabaseError, ServiceError};
use crate::store::Database;
use crate::triage;

/// Maximum message hits returned by `search`.
pub const SEARCH_MESSAGE_LIMIT: usize = 50;
/// Maximum customer hits returned by `search`.
pub const SEARCH_CUSTOMER_LIMIT: usize = 20;
/// Search hits carry at most this many characters of content.
const SEARCH_PREVIEW_CHARS: usize = 100;

pub struct MessageService {
    db: Arc<dyn Database>,
    notifier: Arc<dyn Notifier>,
}

impl MessageService {
    pub fn new(db: Arc<dyn Database>, notifier: Arc<dyn Notifier>) -> Self {
        Self { db, notifier }
    }

    /// Store a customer's message and announce it to the dashboard.
    pub async fn submit_incoming(
        &self,
        customer: CustomerInfo,
        content: &str,
    ) -> Result<SubmittedMessage, ServiceError> {
        let incoming = prepare_incoming(customer, content, None, false)?;

        match self.db.record_incoming(&incoming).await? {
            IncomingOutcome::Created { customer, message } => {
                info!(
                    message_id = message.id,
                    customer_id = %customer.customer_id,
                    priority = message.priority,
                    "Incoming message stored"
                );
                self.notifier
                    .publish(DashboardEvent::new_message(&message, &customer));
                Ok(SubmittedMessage { message, customer })
            }
            IncomingOutcome::Duplicate { existing_id, .. } => Err(DatabaseError::Query(format!(
                "store reported duplicate of message {existing_id} without dedupe"
            ))
            .into()),
        }
    }

    /// Like `submit_incoming`, but skips content the customer already sent.
    ///
    /// `generated_customer_id` names a customer that has to be created; it is
    /// never used to look one up.
    pub async fn import_incoming(
        &self,
        customer: CustomerInfo,
        content: &str,
        generated_customer_id: Option<String>,
    ) -> Result<IncomingOutcome, ServiceError> {
        let incoming = prepare_incoming(customer, content, generated_customer_id, true)?;
        let outcome = self.db.record_incoming(&incoming).await?;

        match &outcome {
            IncomingOutcome::Created { customer, message } => {
                debug!(message_id = message.id, customer_id = %customer.customer_id, "Imported message");
                self.notifier
                    .publish(DashboardEvent::new_message(message, customer));
            }
            IncomingOutcome::Duplicate { existing_id, .. } => {
                debug!(existing_id, "Skipping duplicate message");
            }
        }
        Ok(outcome)
    }

    /// Record an agent reply to `message_id`. Returns the stored reply.
    pub async fn reply(&self, message_id: i64, draft: ReplyDraft) -> Result<Message, ServiceError> {
        if draft.content.trim().is_empty() {
            return Err(ServiceError::Validation("Reply content is required".into()));
        }

        let recorded = self
            .db
            .record_reply(message_id, &draft)
            .await?
            .ok_or_else(|| ServiceError::message_not_found(message_id))?;

        info!(
            message_id,
            reply_id = recorded.reply.id,
            agent = %draft.agent_name,
            "Reply recorded"
        );
        self.notifier
            .publish(DashboardEvent::new_reply(message_id, &recorded.reply));
        Ok(recorded.reply)
    }

    /// Mark an unread message read. A no-op for anything else.
    pub async fn mark_read(&self, message_id: i64) -> Result<(), ServiceError> {
        if self.db.mark_read(message_id).await? {
            debug!(message_id, "Message marked read");
        }
        Ok(())
    }

    pub async fn list(&self, filter: &MessageFilter) -> Result<Vec<MessageSummary>, ServiceError> {
        Ok(self.db.list_messages(filter).await?)
    }

    pub async fn get_with_conversation(
        &self,
        message_id: i64,
    ) -> Result<ConversationView, ServiceError> {
        self.db
            .get_conversation(message_id)
            .await?
            .ok_or_else(|| ServiceError::message_not_found(message_id))
    }

    /// Global search over messages and customers. Blank queries match nothing.
    pub async fn search(&self, query: &str) -> Result<SearchResults, ServiceError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(SearchResults::default());
        }

        let mut messages = self.db.search_messages(query, SEARCH_MESSAGE_LIMIT).await?;
        for hit in &mut messages {
            hit.content = preview(&hit.content);
        }
        let customers = self
            .db
            .search_customers(query, SEARCH_CUSTOMER_LIMIT)
            .await?;

        Ok(SearchResults {
            messages,
            customers,
        })
    }

    pub async fn list_canned(&self) -> Result<Vec<CannedMessage>, ServiceError> {
        Ok(self.db.list_canned().await?)
    }

    pub async fn create_canned(&self, draft: CannedDraft) -> Result<CannedMessage, ServiceError> {
        let draft = validate_canned(draft)?;
        let canned = self.db.insert_canned(&draft).await?;
        info!(id = canned.id, title = %canned.title, "Canned message created");
        Ok(canned)
    }

    /// Insert a canned message unless one with the same title exists.
    pub async fn seed_canned(
        &self,
        draft: CannedDraft,
    ) -> Result<Option<CannedMessage>, ServiceError> {
        let draft = validate_canned(draft)?;
        Ok(self.db.insert_canned_if_absent(&draft).await?)
    }
}

fn prepare_incoming(
    customer: CustomerInfo,
    content: &str,
    generated_id: Option<String>,
    skip_duplicate: bool,
) -> Result<NewIncoming, ServiceError> {
    if content.trim().is_empty() {
        return Err(ServiceError::Validation("Message content is required".into()));
    }

    let priority = triage::score(content);
    Ok(NewIncoming {
        customer,
        content: content.to_string(),
        priority,
        generated_customer_id: generated_id.unwrap_or_else(generated_customer_id),
        skip_duplicate,
    })
}

/// `CUST_<UTC timestamp with microseconds>`. The store appends `_<n>` on collision.
fn generated_customer_id() -> String {
    format!("CUST_{}", Utc::now().format("%Y%m%d%H%M%S%6f"))
}

fn validate_canned(mut draft: CannedDraft) -> Result<CannedDraft, ServiceError> {
    if draft.title.trim().is_empty() {
        return Err(ServiceError::Validation("Title is required".into()));
    }
    if draft.content.trim().is_empty() {
        return Err(ServiceError::Validation("Content is required".into()));
    }
    if draft.category.trim().is_empty() {
        draft.category = "general".into();
    }
    Ok(draft)
}

/// First `SEARCH_PREVIEW_CHARS` characters of `content`.
fn preview(content: &str) -> String {
    content.chars().take(SEARCH_PREVIEW_CHARS).collect()
}
