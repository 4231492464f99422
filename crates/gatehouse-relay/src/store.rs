//! Event storage backend.
//!
//! The relay engine talks to storage only through [`EventStore`], so the
//! SQLite implementation can be swapped out (or replaced by an in-memory
//! database in tests). Single-letter tags are mirrored into a side table so
//! `#x` filter conditions can be answered by SQL.

use std::path::Path;

use gatehouse_core::{Event, Filter};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Transaction, params, params_from_iter};

/// Result count used when a filter has no `limit`.
pub const DEFAULT_QUERY_LIMIT: u64 = 500;

/// Upper bound on any single query.
pub const MAX_QUERY_LIMIT: u64 = 5000;

const PRAGMAS: &str = r#"
PRAGMA foreign_keys = ON;
PRAGMA synchronous = NORMAL;
"#;

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    pubkey TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    kind INTEGER NOT NULL,
    d_tag TEXT NOT NULL DEFAULT '',
    tags TEXT NOT NULL,
    content TEXT NOT NULL,
    sig TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_events_pubkey_kind ON events(pubkey, kind, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_events_kind_created ON events(kind, created_at DESC);

CREATE TABLE IF NOT EXISTS tags (
    event_id TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tags_name_value ON tags(name, value);
CREATE INDEX IF NOT EXISTS idx_tags_event ON tags(event_id);
"#;

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// What happened to an event handed to [`EventStore::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Written as a new event.
    Stored,
    /// Written, and older versions of the same replaceable event were removed.
    Replaced,
    /// An event with this ID already exists.
    Duplicate,
    /// A newer version of this replaceable event is already stored.
    Superseded,
}

impl SaveOutcome {
    /// Whether the event is now in storage because of this call.
    pub fn is_new(self) -> bool {
        matches!(self, Self::Stored | Self::Replaced)
    }
}

/// Durable event store used by the relay engine.
pub trait EventStore: Send + Sync {
    /// Persist an event, honouring replaceable/addressable semantics.
    fn save(&self, event: &Event) -> StoreResult<SaveOutcome>;

    /// Events matching `filter`, newest first, bounded by the filter limit.
    fn query(&self, filter: &Filter) -> StoreResult<Vec<Event>>;

    /// Number of events matching `filter` (ignores `limit`).
    fn count(&self, filter: &Filter) -> StoreResult<u64>;

    /// Fetch a single event by ID.
    fn get(&self, id: &str) -> StoreResult<Option<Event>>;

    /// Delete an event by ID. Returns `false` when it did not exist.
    fn delete(&self, id: &str) -> StoreResult<bool>;
}

/// SQLite-backed [`EventStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        let store = Self::init(conn)?;

        tracing::info!(path = %path.display(), journal_mode = %mode, "event store opened");
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(PRAGMAS)?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl EventStore for SqliteStore {
    fn save(&self, event: &Event) -> StoreResult<SaveOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let exists = tx
            .query_row("SELECT 1 FROM events WHERE id = ?1", [&event.id], |_| Ok(()))
            .optional()?
            .is_some();
        if exists {
            return Ok(SaveOutcome::Duplicate);
        }

        let mut replaced = false;
        if event.is_replaceable() || event.is_addressable() {
            let d_tag = if event.is_addressable() { event.d_tag() } else { "" };
            let existing = previous_versions(&tx, event, d_tag)?;

            // Newest wins; on equal timestamps the lowest ID wins.
            let newer_exists = existing.iter().any(|(id, created_at)| {
                *created_at > event.created_at
                    || (*created_at == event.created_at && id.as_str() < event.id.as_str())
            });
            if newer_exists {
                return Ok(SaveOutcome::Superseded);
            }

            for (id, _) in &existing {
                tx.execute("DELETE FROM events WHERE id = ?1", [id])?;
            }
            replaced = !existing.is_empty();
        }

        insert_event(&tx, event)?;
        tx.commit()?;

        Ok(if replaced {
            SaveOutcome::Replaced
        } else {
            SaveOutcome::Stored
        })
    }

    fn query(&self, filter: &Filter) -> StoreResult<Vec<Event>> {
        let (where_clause, mut values) = build_where(filter);
        let limit = filter
            .limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .min(MAX_QUERY_LIMIT);
        values.push(Value::Integer(limit as i64));

        let sql = format!(
            "SELECT id, pubkey, created_at, kind, tags, content, sig \
             FROM events WHERE {where_clause} \
             ORDER BY created_at DESC, id ASC LIMIT ?"
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), RawEvent::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawEvent::into_event).collect()
    }

    fn count(&self, filter: &Filter) -> StoreResult<u64> {
        let (where_clause, values) = build_where(filter);
        let sql = format!("SELECT COUNT(*) FROM events WHERE {where_clause}");

        let conn = self.conn.lock();
        let count: i64 = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn get(&self, id: &str) -> StoreResult<Option<Event>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                "SELECT id, pubkey, created_at, kind, tags, content, sig \
                 FROM events WHERE id = ?1",
                [id],
                RawEvent::from_row,
            )
            .optional()?;
        raw.map(RawEvent::into_event).transpose()
    }

    fn delete(&self, id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM events WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }
}

fn previous_versions(
    tx: &Transaction<'_>,
    event: &Event,
    d_tag: &str,
) -> StoreResult<Vec<(String, u64)>> {
    let mut stmt = tx.prepare(
        "SELECT id, created_at FROM events WHERE pubkey = ?1 AND kind = ?2 AND d_tag = ?3",
    )?;
    let rows = stmt
        .query_map(params![event.pubkey, event.kind, d_tag], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?.max(0) as u64))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn insert_event(tx: &Transaction<'_>, event: &Event) -> StoreResult<()> {
    let d_tag = if event.is_addressable() { event.d_tag() } else { "" };
    tx.execute(
        "INSERT INTO events (id, pubkey, created_at, kind, d_tag, tags, content, sig) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            event.id,
            event.pubkey,
            timestamp(event.created_at),
            event.kind,
            d_tag,
            serde_json::to_string(&event.tags)?,
            event.content,
            event.sig,
        ],
    )?;

    let mut stmt = tx.prepare("INSERT INTO tags (event_id, name, value) VALUES (?1, ?2, ?3)")?;
    for tag in &event.tags {
        if tag.len() >= 2 && is_single_letter(&tag[0]) {
            stmt.execute(params![event.id, tag[0], tag[1]])?;
        }
    }
    Ok(())
}

fn is_single_letter(name: &str) -> bool {
    let mut chars = name.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if c.is_ascii_alphabetic())
}

fn timestamp(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

/// Build a WHERE clause and its bound values from a filter.
///
/// An explicitly empty list (e.g. `"ids": []`) matches nothing, the same as
/// [`Filter::matches`].
fn build_where(filter: &Filter) -> (String, Vec<Value>) {
    let mut conditions: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    let mut push_in = |column: &str, items: Vec<Value>, conditions: &mut Vec<String>| {
        if items.is_empty() {
            conditions.push("0".to_string());
            return;
        }
        conditions.push(format!("{column} IN ({})", placeholders(items.len())));
        values.extend(items);
    };

    if let Some(ref ids) = filter.ids {
        push_in(
            "id",
            ids.iter().cloned().map(Value::Text).collect(),
            &mut conditions,
        );
    }
    if let Some(ref authors) = filter.authors {
        push_in(
            "pubkey",
            authors.iter().cloned().map(Value::Text).collect(),
            &mut conditions,
        );
    }
    if let Some(ref kinds) = filter.kinds {
        push_in(
            "kind",
            kinds.iter().map(|k| Value::Integer(i64::from(*k))).collect(),
            &mut conditions,
        );
    }

    if let Some(since) = filter.since {
        conditions.push("created_at >= ?".to_string());
        values.push(Value::Integer(timestamp(since)));
    }
    if let Some(until) = filter.until {
        conditions.push("created_at <= ?".to_string());
        values.push(Value::Integer(timestamp(until)));
    }

    for (letter, tag_values) in filter.tag_conditions() {
        if tag_values.is_empty() {
            conditions.push("0".to_string());
            continue;
        }
        conditions.push(format!(
            "EXISTS (SELECT 1 FROM tags t WHERE t.event_id = events.id \
             AND t.name = ? AND t.value IN ({}))",
            placeholders(tag_values.len())
        ));
        values.push(Value::Text(letter.to_string()));
        values.extend(tag_values.iter().cloned().map(Value::Text));
    }

    let where_clause = if conditions.is_empty() {
        "1=1".to_string()
    } else {
        conditions.join(" AND ")
    };
    (where_clause, values)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

struct RawEvent {
    id: String,
    pubkey: String,
    created_at: i64,
    kind: i64,
    tags: String,
    content: String,
    sig: String,
}

impl RawEvent {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            pubkey: row.get(1)?,
            created_at: row.get(2)?,
            kind: row.get(3)?,
            tags: row.get(4)?,
            content: row.get(5)?,
            sig: row.get(6)?,
        })
    }

    fn into_event(self) -> StoreResult<Event> {
        Ok(Event {
            id: self.id,
            pubkey: self.pubkey,
            created_at: self.created_at.max(0) as u64,
            kind: u16::try_from(self.kind).unwrap_or(u16::MAX),
            tags: serde_json::from_str(&self.tags)?,
            content: self.content,
            sig: self.sig,
        })
    }
}
