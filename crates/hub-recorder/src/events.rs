//! Event log stores

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use hub_core::{Event, EventType};
use indexmap::IndexMap;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::RwLock;

use crate::database::Database;
use crate::sqlite::parse_timestamp;
use crate::{EventStore, RecorderError, RecorderResult};

/// Event log kept in process memory, in recording order
#[derive(Default)]
pub struct MemoryEventStore {
    events: RwLock<IndexMap<String, Event>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn record(&self, event: &Event) -> RecorderResult<bool> {
        let mut events = self.events.write().await;
        if events.contains_key(&event.id) {
            return Ok(false);
        }
        events.insert(event.id.clone(), event.clone());
        Ok(true)
    }

    async fn get(&self, id: &str) -> RecorderResult<Option<Event>> {
        Ok(self.events.read().await.get(id).cloned())
    }

    async fn find_all(&self) -> RecorderResult<Vec<Event>> {
        Ok(self.events.read().await.values().cloned().collect())
    }

    async fn find_by_device(&self, device_id: &str) -> RecorderResult<Vec<Event>> {
        Ok(self
            .events
            .read()
            .await
            .values()
            .filter(|e| e.device_id == device_id)
            .cloned()
            .collect())
    }
}

const SELECT_EVENTS: &str =
    "SELECT id, device_id, event_type, measurements, timestamp FROM events";

struct EventRow {
    id: String,
    device_id: String,
    event_type: String,
    measurements: String,
    timestamp: String,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            device_id: row.get(1)?,
            event_type: row.get(2)?,
            measurements: row.get(3)?,
            timestamp: row.get(4)?,
        })
    }

    fn into_event(self) -> RecorderResult<Event> {
        let measurements: BTreeMap<String, f64> = serde_json::from_str(&self.measurements)
            .map_err(|e| RecorderError::Corrupt {
                id: self.id.clone(),
                reason: format!("bad measurements: {e}"),
            })?;
        let timestamp = parse_timestamp(&self.id, &self.timestamp)?;

        Ok(Event {
            id: self.id,
            device_id: self.device_id,
            event_type: EventType::new(self.event_type),
            measurements,
            timestamp,
        })
    }
}

fn query_events(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> RecorderResult<Vec<Event>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, EventRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(EventRow::into_event).collect()
}

/// Event log backed by a SQLite database
pub struct SqliteEventStore {
    db: Database,
}

impl SqliteEventStore {
    /// Open (or create) the event log in the given database file
    pub fn open<P: AsRef<Path>>(path: P) -> RecorderResult<Self> {
        Self::with_database(Database::open(path.as_ref())?)
    }

    /// Create an in-memory event log (for testing)
    pub fn in_memory() -> RecorderResult<Self> {
        Self::with_database(Database::in_memory()?)
    }

    fn with_database(db: Database) -> RecorderResult<Self> {
        db.init(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS events (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL UNIQUE,
                    device_id TEXT NOT NULL,
                    event_type TEXT NOT NULL,
                    measurements TEXT NOT NULL,
                    timestamp TEXT NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_events_device ON events(device_id, seq)",
                [],
            )?;
            Ok(())
        })?;
        Ok(Self { db })
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn record(&self, event: &Event) -> RecorderResult<bool> {
        let measurements = serde_json::to_string(&event.measurements)?;
        let event = event.clone();
        self.db
            .call(move |conn| {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO events
                     (id, device_id, event_type, measurements, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        event.id,
                        event.device_id,
                        event.event_type.as_str(),
                        measurements,
                        event.timestamp.to_rfc3339(),
                    ],
                )?;
                Ok(inserted == 1)
            })
            .await
    }

    async fn get(&self, id: &str) -> RecorderResult<Option<Event>> {
        let id = id.to_string();
        self.db
            .call(move |conn| {
                conn.query_row(
                    &format!("{SELECT_EVENTS} WHERE id = ?1"),
                    params![id],
                    EventRow::from_row,
                )
                .optional()?
                .map(EventRow::into_event)
                .transpose()
            })
            .await
    }

    async fn find_all(&self) -> RecorderResult<Vec<Event>> {
        self.db
            .call(|conn| query_events(conn, &format!("{SELECT_EVENTS} ORDER BY seq"), []))
            .await
    }

    async fn find_by_device(&self, device_id: &str) -> RecorderResult<Vec<Event>> {
        let device_id = device_id.to_string();
        self.db
            .call(move |conn| {
                query_events(
                    conn,
                    &format!("{SELECT_EVENTS} WHERE device_id = ?1 ORDER BY seq"),
                    params![device_id],
                )
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn reading(device_id: &str, temperature: f64) -> Event {
        Event::new(
            device_id,
            "temperature_change",
            BTreeMap::from([("temperature".to_string(), temperature)]),
        )
    }

    async fn exercise(store: &dyn EventStore) {
        let first = reading("sensor-1", 21.5);
        let second = reading("sensor-2", 30.0);
        let third = reading("sensor-1", 22.0);

        assert!(store.record(&first).await.unwrap());
        assert!(store.record(&second).await.unwrap());
        assert!(store.record(&third).await.unwrap());
        // Redelivery of the same event
        assert!(!store.record(&first).await.unwrap());

        let loaded = store.get(&first.id).await.unwrap().unwrap();
        assert_eq!(loaded.measurement("temperature"), Some(21.5));
        assert_eq!(loaded.event_type, EventType::new("temperature_change"));
        assert!(store.get("missing").await.unwrap().is_none());

        let ids: Vec<String> = store
            .find_all()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![first.id.clone(), second.id, third.id.clone()]);

        let sensor_1: Vec<String> = store
            .find_by_device("sensor-1")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(sensor_1, vec![first.id, third.id]);
    }

    #[tokio::test]
    async fn test_memory_event_log() {
        let store = MemoryEventStore::new();
        exercise(&store).await;
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_sqlite_event_log() {
        exercise(&SqliteEventStore::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_events_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("hub.db");
        let event = reading("sensor-1", 19.0);

        {
            let store = SqliteEventStore::open(&path).unwrap();
            store.record(&event).await.unwrap();
        }

        let store = SqliteEventStore::open(&path).unwrap();
        let loaded = store.get(&event.id).await.unwrap().unwrap();
        assert_eq!(loaded.timestamp, event.timestamp);
        assert_eq!(loaded.device_id, "sensor-1");
    }
}
