//! libSQL backend: async `Database` trait implementation.
//!
//! Holds the `libsql::Database` handle only. Each trait method opens its own
//! connection, so no connection state is shared between requests. Writes run
//! inside `BEGIN IMMEDIATE` transactions and are rolled back on any error.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Transaction, TransactionBehavior, params};
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::Database;
use crate::support::model::{
    CannedDraft, CannedMessage, ConversationView, Customer, CustomerHit, CustomerInfo, Direction,
    IncomingOutcome, Message, MessageFilter, MessageHit, MessageStatus, MessageSummary,
    NewIncoming, RecordedReply, ReplyDraft,
};

/// Default name for a customer who did not give one.
const UNKNOWN_CUSTOMER: &str = "Unknown Customer";

/// libSQL database backend.
pub struct LibSqlBackend {
    db: LibSqlDatabase,
    busy_timeout: Duration,
}

impl LibSqlBackend {
    /// Open (or create) a local database file. Does not migrate.
    pub async fn new_local(path: &Path, busy_timeout: Duration) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::Pool(format!("Failed to create database directory: {e}"))
                })?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        info!(path = %path.display(), "Database opened");
        Ok(Self { db, busy_timeout })
    }

    /// Open a connection scoped to one operation.
    async fn connect(&self) -> Result<Connection, DatabaseError> {
        let conn = self
            .db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| DatabaseError::Pool(format!("Failed to set busy timeout: {e}")))?;
        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to enable foreign keys: {e}")))?;
        Ok(conn)
    }

    /// Fail with `SchemaOutdated` unless all migrations are applied.
    pub async fn ensure_schema_current(&self) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        migrations::ensure_current(&conn).await
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format: RFC 3339, microseconds, `Z`. Sorts lexically.
fn to_db_time(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time at the precision it is stored with.
fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Escape `%`, `_` and `\` so user input matches literally inside `LIKE ... ESCAPE '\'`.
fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_integer(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

/// Map a libsql error, keeping constraint failures distinguishable.
fn query_error(op: &str, e: libsql::Error) -> DatabaseError {
    let text = e.to_string();
    if text.contains("constraint") {
        DatabaseError::Constraint(format!("{op}: {text}"))
    } else {
        DatabaseError::Query(format!("{op}: {text}"))
    }
}

fn priority_from_db(value: i64) -> u8 {
    u8::try_from(value.clamp(0, 3)).unwrap_or(0)
}

const CUSTOMER_COLUMNS: &str = "id, customer_id, name, email, phone, profile_data, created_at";

const MESSAGE_COLUMNS: &str =
    "id, customer_id, content, direction, agent_id, agent_name, status, priority, created_at, replied_at";

/// Map a libsql Row to a Customer. Column order matches CUSTOMER_COLUMNS.
fn row_to_customer(row: &libsql::Row) -> Result<Customer, libsql::Error> {
    let profile_str: String = row.get(5).unwrap_or_else(|_| "{}".to_string());
    let created_str: String = row.get(6)?;

    Ok(Customer {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        name: row.get(2).unwrap_or_default(),
        email: row.get(3).unwrap_or_default(),
        phone: row.get(4).unwrap_or_default(),
        profile_data: serde_json::from_str(&profile_str).unwrap_or(serde_json::json!({})),
        created_at: parse_datetime(&created_str),
    })
}

/// Map a libsql Row to a Message. Column order matches MESSAGE_COLUMNS.
fn row_to_message(row: &libsql::Row) -> Result<Message, libsql::Error> {
    let direction_str: String = row.get(3)?;
    let status_str: String = row.get(6)?;
    let created_str: String = row.get(8)?;
    let replied_str: Option<String> = row.get(9).ok();

    Ok(Message {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        content: row.get(2)?,
        direction: direction_str.parse().unwrap_or(Direction::Incoming),
        agent_id: row.get(4).ok(),
        agent_name: row.get(5).ok(),
        status: status_str.parse().unwrap_or(MessageStatus::Unread),
        priority: priority_from_db(row.get(7)?),
        created_at: parse_datetime(&created_str),
        replied_at: parse_optional_datetime(&replied_str),
    })
}

fn row_to_summary(row: &libsql::Row) -> Result<MessageSummary, libsql::Error> {
    let status_str: String = row.get(5)?;
    let created_str: String = row.get(7)?;
    let replied_str: Option<String> = row.get(8).ok();

    Ok(MessageSummary {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        customer_name: row.get(2).unwrap_or_else(|_| "Unknown".to_string()),
        customer_email: row.get(3).unwrap_or_default(),
        content: row.get(4)?,
        status: status_str.parse().unwrap_or(MessageStatus::Unread),
        priority: priority_from_db(row.get(6)?),
        created_at: parse_datetime(&created_str),
        replied_at: parse_optional_datetime(&replied_str),
    })
}

fn row_to_canned(row: &libsql::Row) -> Result<CannedMessage, libsql::Error> {
    let created_str: String = row.get(4)?;
    Ok(CannedMessage {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        category: row.get(3).unwrap_or_else(|_| "general".to_string()),
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_message_hit(row: &libsql::Row) -> Result<MessageHit, libsql::Error> {
    let created_str: String = row.get(3)?;
    Ok(MessageHit {
        id: row.get(0)?,
        content: row.get(1)?,
        customer_name: row.get(2).unwrap_or_else(|_| "Unknown".to_string()),
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_customer_hit(row: &libsql::Row) -> Result<CustomerHit, libsql::Error> {
    Ok(CustomerHit {
        id: row.get(0)?,
        name: row.get(1).unwrap_or_default(),
        email: row.get(2).unwrap_or_default(),
        phone: row.get(3).unwrap_or_default(),
    })
}

/// Collect all rows, skipping (and logging) any that fail to parse.
async fn collect_rows<T>(
    mut rows: libsql::Rows,
    op: &str,
    parse: fn(&libsql::Row) -> Result<T, libsql::Error>,
) -> Result<Vec<T>, DatabaseError> {
    let mut items = Vec::new();
    while let Some(row) = rows.next().await.map_err(|e| query_error(op, e))? {
        match parse(&row) {
            Ok(item) => items.push(item),
            Err(e) => warn!(op, "Skipping row: {e}"),
        }
    }
    Ok(items)
}

/// Commit on success, roll back on failure.
async fn finish<T>(tx: Transaction, result: Result<T, DatabaseError>) -> Result<T, DatabaseError> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| query_error("commit", e))?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback failed");
            }
            Err(e)
        }
    }
}

// ── Statements shared by several operations ─────────────────────────

async fn fetch_message(conn: &Connection, id: i64) -> Result<Option<Message>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
            params![id],
        )
        .await
        .map_err(|e| query_error("get_message", e))?;

    match rows.next().await.map_err(|e| query_error("get_message", e))? {
        Some(row) => row_to_message(&row)
            .map(Some)
            .map_err(|e| DatabaseError::Query(format!("row parse: {e}"))),
        None => Ok(None),
    }
}

async fn fetch_customer_where(
    conn: &Connection,
    clause: &str,
    value: &str,
) -> Result<Option<Customer>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE {clause} ORDER BY id ASC LIMIT 1"),
            params![value],
        )
        .await
        .map_err(|e| query_error("find_customer", e))?;

    match rows.next().await.map_err(|e| query_error("find_customer", e))? {
        Some(row) => row_to_customer(&row)
            .map(Some)
            .map_err(|e| DatabaseError::Query(format!("row parse: {e}"))),
        None => Ok(None),
    }
}

async fn fetch_customer(conn: &Connection, id: i64) -> Result<Option<Customer>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ?1"),
            params![id],
        )
        .await
        .map_err(|e| query_error("get_customer", e))?;

    match rows.next().await.map_err(|e| query_error("get_customer", e))? {
        Some(row) => row_to_customer(&row)
            .map(Some)
            .map_err(|e| DatabaseError::Query(format!("row parse: {e}"))),
        None => Ok(None),
    }
}

/// Look up by external id first, then by email.
async fn find_customer(
    conn: &Connection,
    info: &CustomerInfo,
) -> Result<Option<Customer>, DatabaseError> {
    if let Some(external_id) = info.external_id() {
        if let Some(customer) = fetch_customer_where(conn, "customer_id = ?1", external_id).await? {
            return Ok(Some(customer));
        }
    }
    if let Some(email) = info.lookup_email() {
        return fetch_customer_where(conn, "email = ?1", email).await;
    }
    Ok(None)
}

async fn external_id_taken(conn: &Connection, external_id: &str) -> Result<bool, DatabaseError> {
    Ok(fetch_customer_where(conn, "customer_id = ?1", external_id)
        .await?
        .is_some())
}

/// Pick a free external id: `base`, then `base_1`, `base_2`, ...
async fn unique_external_id(conn: &Connection, base: &str) -> Result<String, DatabaseError> {
    if !external_id_taken(conn, base).await? {
        return Ok(base.to_string());
    }
    let mut n = 1u32;
    loop {
        let candidate = format!("{base}_{n}");
        if !external_id_taken(conn, &candidate).await? {
            return Ok(candidate);
        }
        n += 1;
    }
}

async fn insert_customer(
    conn: &Connection,
    info: &CustomerInfo,
    generated_id: &str,
) -> Result<Customer, DatabaseError> {
    let base_id = info.external_id().unwrap_or(generated_id);
    let external_id = unique_external_id(conn, base_id).await?;
    let name = info
        .name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_CUSTOMER);
    let email = info.email.as_deref().map(str::trim).unwrap_or_default();
    let phone = info.phone.as_deref().map(str::trim).unwrap_or_default();
    let profile = match &info.profile {
        Some(value @ serde_json::Value::Object(_)) => value.clone(),
        _ => serde_json::json!({}),
    };
    let profile_str =
        serde_json::to_string(&profile).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
    let now = now_micros();

    conn.execute(
        "INSERT INTO customers (customer_id, name, email, phone, profile_data, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            external_id.clone(),
            name,
            email,
            phone,
            profile_str,
            to_db_time(now)
        ],
    )
    .await
    .map_err(|e| query_error("insert_customer", e))?;

    let id = conn.last_insert_rowid();
    debug!(id, customer_id = %external_id, "Customer created");

    Ok(Customer {
        id,
        customer_id: external_id,
        name: name.to_string(),
        email: email.to_string(),
        phone: phone.to_string(),
        profile_data: profile,
        created_at: now,
    })
}

/// Shallow-merge `extra` into the customer's profile and persist it.
async fn extend_profile(
    conn: &Connection,
    mut customer: Customer,
    extra: Option<&serde_json::Value>,
) -> Result<Customer, DatabaseError> {
    let Some(serde_json::Value::Object(extra)) = extra else {
        return Ok(customer);
    };
    if extra.is_empty() {
        return Ok(customer);
    }

    if !customer.profile_data.is_object() {
        customer.profile_data = serde_json::json!({});
    }
    if let serde_json::Value::Object(ref mut map) = customer.profile_data {
        for (key, value) in extra {
            map.insert(key.clone(), value.clone());
        }
    }

    let profile_str = serde_json::to_string(&customer.profile_data)
        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
    conn.execute(
        "UPDATE customers SET profile_data = ?1 WHERE id = ?2",
        params![profile_str, customer.id],
    )
    .await
    .map_err(|e| query_error("extend_profile", e))?;

    Ok(customer)
}

async fn find_incoming_duplicate(
    conn: &Connection,
    customer_id: i64,
    content: &str,
) -> Result<Option<i64>, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT id FROM messages
             WHERE customer_id = ?1 AND content = ?2 AND direction = 'incoming'
             ORDER BY id ASC LIMIT 1",
            params![customer_id, content],
        )
        .await
        .map_err(|e| query_error("find_incoming_duplicate", e))?;

    match rows
        .next()
        .await
        .map_err(|e| query_error("find_incoming_duplicate", e))?
    {
        Some(row) => Ok(Some(
            row.get(0)
                .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
        )),
        None => Ok(None),
    }
}

/// Column values for a new message row.
struct MessageRow<'a> {
    customer_id: i64,
    content: &'a str,
    direction: Direction,
    agent_id: Option<i64>,
    agent_name: Option<&'a str>,
    status: MessageStatus,
    priority: u8,
}

async fn insert_message(conn: &Connection, row: MessageRow<'_>) -> Result<Message, DatabaseError> {
    let now = now_micros();
    conn.execute(
        "INSERT INTO messages (customer_id, content, direction, agent_id, agent_name,
            status, priority, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            row.customer_id,
            row.content,
            row.direction.as_str(),
            opt_integer(row.agent_id),
            opt_text(row.agent_name),
            row.status.as_str(),
            i64::from(row.priority),
            to_db_time(now)
        ],
    )
    .await
    .map_err(|e| query_error("insert_message", e))?;

    let id = conn.last_insert_rowid();
    debug!(id, customer_id = row.customer_id, direction = %row.direction, "Message inserted into DB");

    Ok(Message {
        id,
        customer_id: row.customer_id,
        content: row.content.to_string(),
        direction: row.direction,
        agent_id: row.agent_id,
        agent_name: row.agent_name.map(str::to_string),
        status: row.status,
        priority: row.priority,
        created_at: now,
        replied_at: None,
    })
}

async fn record_incoming_in(
    conn: &Connection,
    incoming: &NewIncoming,
) -> Result<IncomingOutcome, DatabaseError> {
    let customer = match find_customer(conn, &incoming.customer).await? {
        Some(existing) => extend_profile(conn, existing, incoming.customer.profile.as_ref()).await?,
        None => insert_customer(conn, &incoming.customer, &incoming.generated_customer_id).await?,
    };

    if incoming.skip_duplicate {
        if let Some(existing_id) =
            find_incoming_duplicate(conn, customer.id, &incoming.content).await?
        {
            return Ok(IncomingOutcome::Duplicate {
                customer,
                existing_id,
            });
        }
    }

    let message = insert_message(
        conn,
        MessageRow {
            customer_id: customer.id,
            content: &incoming.content,
            direction: Direction::Incoming,
            agent_id: None,
            agent_name: None,
            status: MessageStatus::Unread,
            priority: incoming.priority,
        },
    )
    .await?;

    Ok(IncomingOutcome::Created { customer, message })
}

async fn record_reply_in(
    conn: &Connection,
    message_id: i64,
    draft: &ReplyDraft,
) -> Result<Option<RecordedReply>, DatabaseError> {
    let Some(original) = fetch_message(conn, message_id).await? else {
        return Ok(None);
    };

    let reply = insert_message(
        conn,
        MessageRow {
            customer_id: original.customer_id,
            content: &draft.content,
            direction: Direction::Outgoing,
            agent_id: Some(draft.agent_id),
            agent_name: Some(&draft.agent_name),
            status: MessageStatus::Sent,
            priority: 0,
        },
    )
    .await?;

    if original.direction == Direction::Incoming {
        // replied_at keeps the time of the first reply
        conn.execute(
            "UPDATE messages SET status = 'replied', replied_at = COALESCE(replied_at, ?2)
             WHERE id = ?1",
            params![message_id, to_db_time(reply.created_at)],
        )
        .await
        .map_err(|e| query_error("mark_replied", e))?;
    }

    let original = fetch_message(conn, message_id)
        .await?
        .ok_or_else(|| DatabaseError::Query(format!("message {message_id} vanished mid-reply")))?;

    Ok(Some(RecordedReply { original, reply }))
}

async fn conversation_in(
    conn: &Connection,
    message_id: i64,
) -> Result<Option<ConversationView>, DatabaseError> {
    let Some(message) = fetch_message(conn, message_id).await? else {
        return Ok(None);
    };

    let customer = fetch_customer(conn, message.customer_id)
        .await?
        .ok_or_else(|| {
            DatabaseError::Constraint(format!(
                "message {} references missing customer {}",
                message.id, message.customer_id
            ))
        })?;

    let rows = conn
        .query(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE customer_id = ?1
                 ORDER BY created_at ASC, id ASC"
            ),
            params![customer.id],
        )
        .await
        .map_err(|e| query_error("list_conversation", e))?;
    let conversation = collect_rows(rows, "list_conversation", row_to_message).await?;

    Ok(Some(ConversationView {
        message,
        customer,
        conversation,
    }))
}

async fn find_canned_by_title(conn: &Connection, title: &str) -> Result<bool, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT id FROM canned_messages WHERE title = ?1 LIMIT 1",
            params![title],
        )
        .await
        .map_err(|e| query_error("find_canned_by_title", e))?;
    Ok(rows
        .next()
        .await
        .map_err(|e| query_error("find_canned_by_title", e))?
        .is_some())
}

async fn insert_canned_in(
    conn: &Connection,
    draft: &CannedDraft,
) -> Result<CannedMessage, DatabaseError> {
    let now = now_micros();
    conn.execute(
        "INSERT INTO canned_messages (title, content, category, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            draft.title.as_str(),
            draft.content.as_str(),
            draft.category.as_str(),
            to_db_time(now)
        ],
    )
    .await
    .map_err(|e| query_error("insert_canned", e))?;

    Ok(CannedMessage {
        id: conn.last_insert_rowid(),
        title: draft.title.clone(),
        content: draft.content.clone(),
        category: draft.category.clone(),
        created_at: now,
    })
}

// ── Trait implementation ────────────────────────────────────────────

impl LibSqlBackend {
    async fn begin_write(conn: &Connection) -> Result<Transaction, DatabaseError> {
        conn.transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(|e| query_error("begin", e))
    }
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        migrations::run_migrations(&conn).await
    }

    async fn schema_version(&self) -> Result<i64, DatabaseError> {
        let conn = self.connect().await?;
        migrations::current_version(&conn).await
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn record_incoming(
        &self,
        incoming: &NewIncoming,
    ) -> Result<IncomingOutcome, DatabaseError> {
        let conn = self.connect().await?;
        let tx = Self::begin_write(&conn).await?;
        let result = record_incoming_in(&tx, incoming).await;
        finish(tx, result).await
    }

    async fn record_reply(
        &self,
        message_id: i64,
        draft: &ReplyDraft,
    ) -> Result<Option<RecordedReply>, DatabaseError> {
        let conn = self.connect().await?;
        let tx = Self::begin_write(&conn).await?;
        let result = record_reply_in(&tx, message_id, draft).await;
        finish(tx, result).await
    }

    async fn mark_read(&self, message_id: i64) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let changed = conn
            .execute(
                "UPDATE messages SET status = 'read'
                 WHERE id = ?1 AND status = 'unread' AND direction = 'incoming'",
                params![message_id],
            )
            .await
            .map_err(|e| query_error("mark_read", e))?;

        debug!(message_id, changed, "mark_read");
        Ok(changed > 0)
    }

    async fn get_message(&self, id: i64) -> Result<Option<Message>, DatabaseError> {
        let conn = self.connect().await?;
        fetch_message(&conn, id).await
    }

    async fn list_messages(
        &self,
        filter: &MessageFilter,
    ) -> Result<Vec<MessageSummary>, DatabaseError> {
        let mut sql = String::from(
            "SELECT m.id, m.customer_id, c.name, c.email, m.content, m.status, m.priority,
                    m.created_at, m.replied_at
             FROM messages m JOIN customers c ON c.id = m.customer_id
             WHERE m.direction = 'incoming'",
        );
        let mut values: Vec<libsql::Value> = Vec::new();

        if let Some(status) = filter.status {
            sql.push_str(" AND m.status = ?");
            values.push(libsql::Value::Text(status.as_str().to_string()));
        }
        if let Some(min_priority) = filter.min_priority {
            sql.push_str(" AND m.priority >= ?");
            values.push(libsql::Value::Integer(i64::from(min_priority)));
        }
        if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
            sql.push_str(
                r" AND (m.content LIKE ? ESCAPE '\' OR c.name LIKE ? ESCAPE '\' OR c.email LIKE ? ESCAPE '\')",
            );
            let pattern = like_pattern(search);
            for _ in 0..3 {
                values.push(libsql::Value::Text(pattern.clone()));
            }
        }
        sql.push_str(" ORDER BY m.priority DESC, m.created_at DESC, m.id DESC");

        let conn = self.connect().await?;
        let rows = conn
            .query(&sql, values)
            .await
            .map_err(|e| query_error("list_messages", e))?;
        collect_rows(rows, "list_messages", row_to_summary).await
    }

    async fn get_conversation(
        &self,
        message_id: i64,
    ) -> Result<Option<ConversationView>, DatabaseError> {
        let conn = self.connect().await?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| query_error("begin", e))?;
        let result = conversation_in(&tx, message_id).await;
        finish(tx, result).await
    }

    async fn search_messages(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MessageHit>, DatabaseError> {
        let pattern = like_pattern(query);
        let conn = self.connect().await?;
        let rows = conn
            .query(
                r"SELECT m.id, m.content, c.name, m.created_at
                  FROM messages m JOIN customers c ON c.id = m.customer_id
                  WHERE m.content LIKE ?1 ESCAPE '\'
                     OR c.name LIKE ?1 ESCAPE '\'
                     OR c.email LIKE ?1 ESCAPE '\'
                  ORDER BY m.created_at DESC, m.id DESC
                  LIMIT ?2",
                params![pattern, limit as i64],
            )
            .await
            .map_err(|e| query_error("search_messages", e))?;

        collect_rows(rows, "search_messages", row_to_message_hit).await
    }

    // ── Customers ───────────────────────────────────────────────────

    async fn get_customer(&self, id: i64) -> Result<Option<Customer>, DatabaseError> {
        let conn = self.connect().await?;
        fetch_customer(&conn, id).await
    }

    async fn search_customers(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<CustomerHit>, DatabaseError> {
        let pattern = like_pattern(query);
        let conn = self.connect().await?;
        let rows = conn
            .query(
                r"SELECT id, name, email, phone FROM customers
                  WHERE name LIKE ?1 ESCAPE '\'
                     OR email LIKE ?1 ESCAPE '\'
                     OR phone LIKE ?1 ESCAPE '\'
                  ORDER BY created_at DESC, id DESC
                  LIMIT ?2",
                params![pattern, limit as i64],
            )
            .await
            .map_err(|e| query_error("search_customers", e))?;

        collect_rows(rows, "search_customers", row_to_customer_hit).await
    }

    // ── Canned messages ─────────────────────────────────────────────

    async fn list_canned(&self) -> Result<Vec<CannedMessage>, DatabaseError> {
        let conn = self.connect().await?;
        let rows = conn
            .query(
                "SELECT id, title, content, category, created_at FROM canned_messages
                 ORDER BY id ASC",
                (),
            )
            .await
            .map_err(|e| query_error("list_canned", e))?;
        collect_rows(rows, "list_canned", row_to_canned).await
    }

    async fn insert_canned(&self, draft: &CannedDraft) -> Result<CannedMessage, DatabaseError> {
        let conn = self.connect().await?;
        insert_canned_in(&conn, draft).await
    }

    async fn insert_canned_if_absent(
        &self,
        draft: &CannedDraft,
    ) -> Result<Option<CannedMessage>, DatabaseError> {
        let conn = self.connect().await?;
        let tx = Self::begin_write(&conn).await?;
        let result: Result<Option<CannedMessage>, DatabaseError> = async {
            if find_canned_by_title(&tx, &draft.title).await? {
                return Ok(None);
            }
            insert_canned_in(&tx, draft).await.map(Some)
        }
        .await;
        finish(tx, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// On-disk database in a temp dir; every call opens its own connection,
    /// which an in-memory database would not share.
    async fn test_db() -> (tempfile::TempDir, LibSqlBackend) {
        let tmp = tempfile::tempdir().unwrap();
        let db = LibSqlBackend::new_local(&tmp.path().join("test.db"), Duration::from_secs(5))
            .await
            .unwrap();
        db.run_migrations().await.unwrap();
        (tmp, db)
    }

    fn incoming(email: &str, content: &str, priority: u8) -> NewIncoming {
        NewIncoming {
            customer: CustomerInfo::with_email(email).named("Alice"),
            content: content.to_string(),
            priority,
            generated_customer_id: format!("CUST_TEST_{email}"),
            skip_duplicate: false,
        }
    }

    async fn create(db: &LibSqlBackend, email: &str, content: &str, priority: u8) -> Message {
        match db.record_incoming(&incoming(email, content, priority)).await.unwrap() {
            IncomingOutcome::Created { message, .. } => message,
            other => panic!("expected Created, got {other:?}"),
        }
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("loan"), "%loan%");
        assert_eq!(like_pattern("50%_off"), r"%50\%\_off%");
        assert_eq!(like_pattern(r"a\b"), r"%a\\b%");
    }

    #[test]
    fn db_time_is_sortable() {
        let now = now_micros();
        let a = to_db_time(now);
        let b = to_db_time(now + chrono::Duration::microseconds(1));
        assert!(a < b);
        assert!(a.ends_with('Z'));
        assert_eq!(parse_datetime(&a).timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn parse_datetime_accepts_sqlite_format() {
        let dt = parse_datetime("2026-03-01 12:30:00");
        assert_eq!(to_db_time(dt), "2026-03-01T12:30:00.000000Z");
        assert_eq!(parse_datetime("garbage"), DateTime::<Utc>::MIN_UTC);
    }

    #[tokio::test]
    async fn open_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("dir").join("console.db");
        let db = LibSqlBackend::new_local(&db_path, Duration::from_secs(1))
            .await
            .unwrap();
        db.run_migrations().await.unwrap();
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn unmigrated_database_is_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let db = LibSqlBackend::new_local(&tmp.path().join("fresh.db"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(db.schema_version().await.unwrap(), 0);
        assert!(matches!(
            db.ensure_schema_current().await,
            Err(DatabaseError::SchemaOutdated { .. })
        ));
        db.run_migrations().await.unwrap();
        db.ensure_schema_current().await.unwrap();
    }

    #[tokio::test]
    async fn incoming_creates_customer_and_unread_message() {
        let (_tmp, db) = test_db().await;
        let outcome = db
            .record_incoming(&incoming("alice@example.com", "hello", 2))
            .await
            .unwrap();
        let IncomingOutcome::Created { customer, message } = outcome else {
            panic!("expected Created");
        };
        assert_eq!(customer.email, "alice@example.com");
        assert_eq!(customer.name, "Alice");
        assert_eq!(customer.customer_id, "CUST_TEST_alice@example.com");
        assert_eq!(message.customer_id, customer.id);
        assert_eq!(message.status, MessageStatus::Unread);
        assert_eq!(message.direction, Direction::Incoming);
        assert_eq!(message.priority, 2);
        assert!(message.agent_id.is_none());

        let loaded = db.get_message(message.id).await.unwrap().unwrap();
        assert_eq!(loaded, message);
    }

    #[tokio::test]
    async fn same_email_resolves_to_same_customer() {
        let (_tmp, db) = test_db().await;
        let first = create(&db, "bob@example.com", "one", 0).await;
        let second = create(&db, "bob@example.com", "two", 0).await;
        assert_eq!(first.customer_id, second.customer_id);
    }

    #[tokio::test]
    async fn external_id_is_preferred_over_email() {
        let (_tmp, db) = test_db().await;
        let mut first = incoming("shared@example.com", "first", 0);
        first.customer = first.customer.with_customer_id("EXT-1");
        let IncomingOutcome::Created { customer: c1, .. } =
            db.record_incoming(&first).await.unwrap()
        else {
            panic!()
        };

        // Different email, same external id
        let mut second = incoming("other@example.com", "second", 0);
        second.customer = second.customer.with_customer_id("EXT-1");
        let IncomingOutcome::Created { customer: c2, .. } =
            db.record_incoming(&second).await.unwrap()
        else {
            panic!()
        };
        assert_eq!(c1.id, c2.id);

        // Unknown external id falls back to email
        let mut third = incoming("shared@example.com", "third", 0);
        third.customer = third.customer.with_customer_id("EXT-404");
        let IncomingOutcome::Created { customer: c3, .. } =
            db.record_incoming(&third).await.unwrap()
        else {
            panic!()
        };
        assert_eq!(c1.id, c3.id);
    }

    #[tokio::test]
    async fn generated_external_ids_stay_unique() {
        let (_tmp, db) = test_db().await;
        let mut ids = Vec::new();
        for email in ["a@x.com", "b@x.com", "c@x.com"] {
            let mut new = incoming(email, "hi", 0);
            new.generated_customer_id = "CUST_20260101000000".into();
            let IncomingOutcome::Created { customer, .. } =
                db.record_incoming(&new).await.unwrap()
            else {
                panic!()
            };
            ids.push(customer.customer_id);
        }
        assert_eq!(
            ids,
            vec![
                "CUST_20260101000000",
                "CUST_20260101000000_1",
                "CUST_20260101000000_2"
            ]
        );
    }

    #[tokio::test]
    async fn profile_is_extended_not_replaced() {
        let (_tmp, db) = test_db().await;
        let mut first = incoming("p@x.com", "one", 0);
        first.customer.profile = Some(serde_json::json!({"plan": "standard", "region": "KE"}));
        db.record_incoming(&first).await.unwrap();

        let mut second = incoming("p@x.com", "two", 0);
        second.customer.profile = Some(serde_json::json!({"plan": "premium"}));
        let IncomingOutcome::Created { customer, .. } = db.record_incoming(&second).await.unwrap()
        else {
            panic!()
        };
        assert_eq!(
            customer.profile_data,
            serde_json::json!({"plan": "premium", "region": "KE"})
        );
        let stored = db.get_customer(customer.id).await.unwrap().unwrap();
        assert_eq!(stored.profile_data, customer.profile_data);
    }

    #[tokio::test]
    async fn duplicate_incoming_is_skipped_when_requested() {
        let (_tmp, db) = test_db().await;
        let original = create(&db, "d@x.com", "same text", 0).await;

        let mut again = incoming("d@x.com", "same text", 0);
        again.skip_duplicate = true;
        match db.record_incoming(&again).await.unwrap() {
            IncomingOutcome::Duplicate { existing_id, .. } => assert_eq!(existing_id, original.id),
            other => panic!("expected Duplicate, got {other:?}"),
        }

        let all = db.list_messages(&MessageFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn reply_updates_original_and_binds_to_customer() {
        let (_tmp, db) = test_db().await;
        let original = create(&db, "r@x.com", "help", 1).await;

        let recorded = db
            .record_reply(original.id, &ReplyDraft::new("on it", 7, "Grace"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(recorded.original.status, MessageStatus::Replied);
        assert!(recorded.original.replied_at.is_some());
        assert_eq!(recorded.reply.customer_id, original.customer_id);
        assert_eq!(recorded.reply.direction, Direction::Outgoing);
        assert_eq!(recorded.reply.status, MessageStatus::Sent);
        assert_eq!(recorded.reply.agent_id, Some(7));
        assert_eq!(recorded.reply.agent_name.as_deref(), Some("Grace"));

        let stored_reply = db.get_message(recorded.reply.id).await.unwrap().unwrap();
        assert_eq!(stored_reply.agent_name.as_deref(), Some("Grace"));
    }

    #[tokio::test]
    async fn second_reply_keeps_first_replied_at() {
        let (_tmp, db) = test_db().await;
        let original = create(&db, "r2@x.com", "help", 1).await;

        let first = db
            .record_reply(original.id, &ReplyDraft::new("one", 1, "Agent"))
            .await
            .unwrap()
            .unwrap();
        let second = db
            .record_reply(original.id, &ReplyDraft::new("two", 1, "Agent"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.original.replied_at, second.original.replied_at);
    }

    #[tokio::test]
    async fn reply_to_missing_message_writes_nothing() {
        let (_tmp, db) = test_db().await;
        let result = db
            .record_reply(999, &ReplyDraft::new("hello?", 1, "Agent"))
            .await
            .unwrap();
        assert!(result.is_none());

        let conn = db.connect().await.unwrap();
        let mut rows = conn.query("SELECT COUNT(*) FROM messages", ()).await.unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn failed_reply_rolls_back() {
        let (_tmp, db) = test_db().await;
        let original = create(&db, "rb@x.com", "help", 1).await;

        // Empty content violates the CHECK constraint on insert.
        let err = db
            .record_reply(original.id, &ReplyDraft::new("", 1, "Agent"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)), "{err:?}");

        let stored = db.get_message(original.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Unread);
        assert!(stored.replied_at.is_none());
    }

    #[tokio::test]
    async fn mark_read_only_moves_unread() {
        let (_tmp, db) = test_db().await;
        let msg = create(&db, "m@x.com", "hi", 0).await;

        assert!(db.mark_read(msg.id).await.unwrap());
        assert!(!db.mark_read(msg.id).await.unwrap());
        assert!(!db.mark_read(12345).await.unwrap());

        db.record_reply(msg.id, &ReplyDraft::new("done", 1, "Agent"))
            .await
            .unwrap();
        assert!(!db.mark_read(msg.id).await.unwrap());
        let stored = db.get_message(msg.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Replied);
    }

    #[tokio::test]
    async fn list_filters_and_orders() {
        let (_tmp, db) = test_db().await;
        let low = create(&db, "a@x.com", "how to change", 1).await;
        let high_old = create(&db, "b@x.com", "urgent one", 3).await;
        let medium = create(&db, "c@x.com", "status?", 2).await;
        let high_new = create(&db, "d@x.com", "urgent two", 3).await;
        db.mark_read(medium.id).await.unwrap();

        let all = db.list_messages(&MessageFilter::default()).await.unwrap();
        let ids: Vec<i64> = all.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![high_new.id, high_old.id, medium.id, low.id]);

        let filter = MessageFilter {
            status: Some(MessageStatus::Unread),
            min_priority: Some(2),
            search: None,
        };
        let unread: Vec<i64> = db
            .list_messages(&filter)
            .await
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(unread, vec![high_new.id, high_old.id]);
    }

    #[tokio::test]
    async fn list_excludes_outgoing_and_searches_customer_fields() {
        let (_tmp, db) = test_db().await;
        let msg = create(&db, "zed@corp.io", "question", 0).await;
        db.record_reply(msg.id, &ReplyDraft::new("answer question", 1, "Agent"))
            .await
            .unwrap();

        let all = db.list_messages(&MessageFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].customer_email, "zed@corp.io");

        let by_email = MessageFilter {
            search: Some("corp.io".into()),
            ..Default::default()
        };
        assert_eq!(db.list_messages(&by_email).await.unwrap().len(), 1);

        let by_name = MessageFilter {
            search: Some("alic".into()),
            ..Default::default()
        };
        assert_eq!(db.list_messages(&by_name).await.unwrap().len(), 1);

        let wildcard = MessageFilter {
            search: Some("%".into()),
            ..Default::default()
        };
        assert!(db.list_messages(&wildcard).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn conversation_is_ordered_oldest_first() {
        let (_tmp, db) = test_db().await;
        let first = create(&db, "conv@x.com", "first", 0).await;
        let reply = db
            .record_reply(first.id, &ReplyDraft::new("reply", 1, "Agent"))
            .await
            .unwrap()
            .unwrap()
            .reply;
        let second = create(&db, "conv@x.com", "second", 0).await;
        create(&db, "someone-else@x.com", "unrelated", 0).await;

        let view = db.get_conversation(second.id).await.unwrap().unwrap();
        assert_eq!(view.message.id, second.id);
        assert_eq!(view.customer.email, "conv@x.com");
        let ids: Vec<i64> = view.conversation.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![first.id, reply.id, second.id]);

        assert!(db.get_conversation(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn search_respects_limits() {
        let (_tmp, db) = test_db().await;
        for i in 0..5 {
            create(&db, &format!("loan{i}@x.com"), "about my loan", 3).await;
        }
        let messages = db.search_messages("loan", 3).await.unwrap();
        assert_eq!(messages.len(), 3);
        let customers = db.search_customers("loan", 2).await.unwrap();
        assert_eq!(customers.len(), 2);
        assert!(db.search_customers("nobody", 20).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn canned_crud() {
        let (_tmp, db) = test_db().await;
        let draft = CannedDraft::new("Greeting", "Hello there", "general");
        let created = db.insert_canned(&draft).await.unwrap();
        assert_eq!(created.title, "Greeting");

        assert!(db.insert_canned_if_absent(&draft).await.unwrap().is_none());
        let other = CannedDraft::new("Farewell", "Bye", "general");
        assert!(db.insert_canned_if_absent(&other).await.unwrap().is_some());

        let all = db.list_canned().await.unwrap();
        let titles: Vec<&str> = all.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Greeting", "Farewell"]);
    }

    #[tokio::test]
    async fn malformed_search_rows_are_skipped() {
        let (_tmp, db) = test_db().await;
        let conn = db.connect().await.unwrap();

        let rows = conn
            .query(
                "SELECT NULL, 'lost', 'Ghost', '2026-01-01T00:00:00Z'
                 UNION ALL SELECT 7, 'loan', 'Bob', '2026-01-01T00:00:00Z'",
                (),
            )
            .await
            .unwrap();
        let hits = collect_rows(rows, "search_messages", row_to_message_hit)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 7);

        let rows = conn
            .query(
                "SELECT NULL, 'Ghost', '', '' UNION ALL SELECT 3, 'Bob', 'bob@x.com', ''",
                (),
            )
            .await
            .unwrap();
        let hits = collect_rows(rows, "search_customers", row_to_customer_hit)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 3);
    }
}
