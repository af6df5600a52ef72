//! SQLite consequence store

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hub_core::{Consequence, ConsequenceStatus};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use crate::database::Database;
use crate::{ConsequenceStore, RecorderError, RecorderResult};

const SELECT_COLUMNS: &str =
    "SELECT id, event_id, rule_id, action, device_id, status, timestamp, executed_at
     FROM consequences";

/// Raw row before timestamps and status are parsed
struct ConsequenceRow {
    id: String,
    event_id: String,
    rule_id: String,
    action: String,
    device_id: String,
    status: String,
    timestamp: String,
    executed_at: Option<String>,
}

impl ConsequenceRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            event_id: row.get(1)?,
            rule_id: row.get(2)?,
            action: row.get(3)?,
            device_id: row.get(4)?,
            status: row.get(5)?,
            timestamp: row.get(6)?,
            executed_at: row.get(7)?,
        })
    }

    fn into_consequence(self) -> RecorderResult<Consequence> {
        let status = parse_status(&self.id, &self.status)?;
        let timestamp = parse_timestamp(&self.id, &self.timestamp)?;
        let executed_at = self
            .executed_at
            .as_deref()
            .map(|ts| parse_timestamp(&self.id, ts))
            .transpose()?;

        Ok(Consequence {
            id: self.id,
            event_id: self.event_id,
            rule_id: self.rule_id,
            action: self.action,
            device_id: self.device_id,
            status,
            timestamp,
            executed_at,
        })
    }
}

fn parse_status(id: &str, raw: &str) -> RecorderResult<ConsequenceStatus> {
    ConsequenceStatus::parse(raw).ok_or_else(|| RecorderError::Corrupt {
        id: id.to_string(),
        reason: format!("unknown status {raw:?}"),
    })
}

pub(crate) fn parse_timestamp(id: &str, raw: &str) -> RecorderResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| RecorderError::Corrupt {
            id: id.to_string(),
            reason: format!("bad timestamp {raw:?}: {e}"),
        })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn query_rows(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> RecorderResult<Vec<Consequence>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, ConsequenceRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(ConsequenceRow::into_consequence).collect()
}

fn query_one(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> RecorderResult<Option<Consequence>> {
    conn.query_row(sql, params, ConsequenceRow::from_row)
        .optional()?
        .map(ConsequenceRow::into_consequence)
        .transpose()
}

/// Consequence store backed by a SQLite database
pub struct SqliteConsequenceStore {
    db: Database,
}

impl SqliteConsequenceStore {
    /// Open (or create) the store in the given database file
    pub fn open<P: AsRef<Path>>(path: P) -> RecorderResult<Self> {
        Self::with_database(Database::open(path.as_ref())?)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> RecorderResult<Self> {
        Self::with_database(Database::in_memory()?)
    }

    fn with_database(db: Database) -> RecorderResult<Self> {
        db.init(Self::init_schema)?;
        Ok(Self { db })
    }

    fn init_schema(conn: &Connection) -> RecorderResult<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS consequences (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                event_id TEXT NOT NULL,
                rule_id TEXT NOT NULL,
                action TEXT NOT NULL,
                device_id TEXT NOT NULL,
                status TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                executed_at TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_consequences_event_rule
             ON consequences(event_id, rule_id)",
            [],
        )?;

        Ok(())
    }
}

#[async_trait]
impl ConsequenceStore for SqliteConsequenceStore {
    async fn insert(&self, consequence: &Consequence) -> RecorderResult<()> {
        let record = consequence.clone();
        self.db
            .call(move |conn| {
                let result = conn.execute(
                    "INSERT INTO consequences
                     (id, event_id, rule_id, action, device_id, status, timestamp, executed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        record.id,
                        record.event_id,
                        record.rule_id,
                        record.action,
                        record.device_id,
                        record.status.as_str(),
                        record.timestamp.to_rfc3339(),
                        record.executed_at.map(|ts| ts.to_rfc3339()),
                    ],
                );

                match result {
                    Ok(_) => Ok(()),
                    Err(e) if is_unique_violation(&e) => Err(RecorderError::Conflict {
                        event_id: record.event_id,
                        rule_id: record.rule_id,
                    }),
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    async fn get(&self, id: &str) -> RecorderResult<Option<Consequence>> {
        let id = id.to_string();
        self.db
            .call(move |conn| {
                query_one(conn, &format!("{SELECT_COLUMNS} WHERE id = ?1"), params![id])
            })
            .await
    }

    async fn update(
        &self,
        consequence: &Consequence,
        expected: ConsequenceStatus,
    ) -> RecorderResult<()> {
        let record = consequence.clone();
        self.db
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE consequences
                     SET action = ?2, device_id = ?3, status = ?4, timestamp = ?5, executed_at = ?6
                     WHERE id = ?1 AND status = ?7",
                    params![
                        record.id,
                        record.action,
                        record.device_id,
                        record.status.as_str(),
                        record.timestamp.to_rfc3339(),
                        record.executed_at.map(|ts| ts.to_rfc3339()),
                        expected.as_str(),
                    ],
                )?;
                if updated == 1 {
                    return Ok(());
                }

                let current: Option<String> = conn
                    .query_row(
                        "SELECT status FROM consequences WHERE id = ?1",
                        params![record.id],
                        |row| row.get(0),
                    )
                    .optional()?;

                match current {
                    None => Err(RecorderError::NotFound(record.id)),
                    Some(raw) => {
                        let actual = parse_status(&record.id, &raw)?;
                        Err(RecorderError::StatusChanged {
                            id: record.id,
                            expected,
                            actual,
                        })
                    }
                }
            })
            .await
    }

    async fn find_all(&self) -> RecorderResult<Vec<Consequence>> {
        self.db
            .call(|conn| query_rows(conn, &format!("{SELECT_COLUMNS} ORDER BY seq"), []))
            .await
    }

    async fn find_by_event(&self, event_id: &str) -> RecorderResult<Vec<Consequence>> {
        let event_id = event_id.to_string();
        self.db
            .call(move |conn| {
                query_rows(
                    conn,
                    &format!("{SELECT_COLUMNS} WHERE event_id = ?1 ORDER BY seq"),
                    params![event_id],
                )
            })
            .await
    }

    async fn find_by_event_and_rule(
        &self,
        event_id: &str,
        rule_id: &str,
    ) -> RecorderResult<Option<Consequence>> {
        let (event_id, rule_id) = (event_id.to_string(), rule_id.to_string());
        self.db
            .call(move |conn| {
                query_one(
                    conn,
                    &format!("{SELECT_COLUMNS} WHERE event_id = ?1 AND rule_id = ?2"),
                    params![event_id, rule_id],
                )
            })
            .await
    }
}
