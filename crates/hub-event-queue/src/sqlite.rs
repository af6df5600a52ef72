//! SQLite queue backend
//!
//! Messages are rows in the `event_queue` table. A row is `ready` until
//! leased by `dequeue`, and deleted on `ack`. Leased rows survive a crash
//! and are made ready again by `recover`.
//!
//! Statements run on the blocking pool. A lease that was started by a
//! cancelled `dequeue` is handed to the next `dequeue` call instead of
//! being left behind.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::database::Database;
use crate::{Delivery, EventQueue, QueueError, QueueResult};

/// Default interval for noticing rows inserted by other processes
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

const STATE_READY: &str = "ready";
const STATE_LEASED: &str = "leased";

type LeaseTask = JoinHandle<QueueResult<Option<Delivery>>>;

/// Durable FIFO queue stored in SQLite
pub struct SqliteQueue {
    db: Database,
    /// Lease still running on the blocking pool
    pending_lease: Mutex<Option<LeaseTask>>,
    /// Wakes a blocked `dequeue` on in-process enqueues
    ready_signal: Notify,
    poll_interval: Duration,
}

impl SqliteQueue {
    /// Open (or create) a queue in the given database file
    pub fn open<P: AsRef<Path>>(path: P) -> QueueResult<Self> {
        Self::with_database(Database::open(path.as_ref())?)
    }

    /// Create an in-memory queue (for testing)
    pub fn in_memory() -> QueueResult<Self> {
        Self::with_database(Database::in_memory()?)
    }

    fn with_database(db: Database) -> QueueResult<Self> {
        db.init(Self::init_schema)?;
        Ok(Self {
            db,
            pending_lease: Mutex::new(None),
            ready_signal: Notify::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Set how often `dequeue` re-checks the table while idle
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn init_schema(conn: &Connection) -> QueueResult<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS event_queue (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'ready',
                attempts INTEGER NOT NULL DEFAULT 0,
                enqueued_at TEXT NOT NULL,
                leased_at TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_event_queue_state_seq
             ON event_queue(state, seq)",
            [],
        )?;

        Ok(())
    }

    /// Lease the oldest ready row, if any
    async fn try_lease(&self) -> QueueResult<Option<Delivery>> {
        let mut pending = self.pending_lease.lock().await;
        let task = pending.get_or_insert_with(|| self.db.spawn(lease_oldest));

        // Cancelling here keeps the task for the next call
        let result = task.await;
        *pending = None;
        result?
    }
}

fn lease_oldest(conn: &mut Connection) -> QueueResult<Option<Delivery>> {
    let tx = conn.transaction()?;

    let row = tx
        .query_row(
            "SELECT seq, payload, attempts FROM event_queue
             WHERE state = ?1 ORDER BY seq LIMIT 1",
            params![STATE_READY],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                ))
            },
        )
        .optional()?;

    let Some((seq, payload, attempts)) = row else {
        return Ok(None);
    };

    tx.execute(
        "UPDATE event_queue SET state = ?1, attempts = attempts + 1, leased_at = ?2
         WHERE seq = ?3",
        params![STATE_LEASED, Utc::now().to_rfc3339(), seq],
    )?;
    tx.commit()?;

    Ok(Some(Delivery {
        tag: seq as u64,
        payload,
        attempts: attempts + 1,
    }))
}

#[async_trait]
impl EventQueue for SqliteQueue {
    async fn enqueue(&self, payload: String) -> QueueResult<()> {
        let seq = self
            .db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO event_queue (payload, state, attempts, enqueued_at)
                     VALUES (?1, ?2, 0, ?3)",
                    params![payload, STATE_READY, Utc::now().to_rfc3339()],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        trace!(seq, "Enqueued message");

        self.ready_signal.notify_one();
        Ok(())
    }

    async fn dequeue(&self) -> QueueResult<Delivery> {
        loop {
            if let Some(delivery) = self.try_lease().await? {
                return Ok(delivery);
            }

            tokio::select! {
                _ = self.ready_signal.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let tag = delivery.tag;
        self.db
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM event_queue WHERE seq = ?1 AND state = ?2",
                    params![tag as i64, STATE_LEASED],
                )?;

                if deleted == 0 {
                    return Err(QueueError::UnknownDelivery(tag));
                }
                Ok(())
            })
            .await
    }

    async fn nack(&self, delivery: &Delivery) -> QueueResult<()> {
        let tag = delivery.tag;
        self.db
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE event_queue SET state = ?1, leased_at = NULL
                     WHERE seq = ?2 AND state = ?3",
                    params![STATE_READY, tag as i64, STATE_LEASED],
                )?;

                if updated == 0 {
                    return Err(QueueError::UnknownDelivery(tag));
                }
                Ok(())
            })
            .await?;

        debug!(tag, "Message returned for redelivery");
        self.ready_signal.notify_one();
        Ok(())
    }

    async fn len(&self) -> QueueResult<usize> {
        self.db
            .call(|conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM event_queue WHERE state = ?1",
                    params![STATE_READY],
                    |row| row.get(0),
                )?;
                Ok(count as usize)
            })
            .await
    }

    async fn recover(&self) -> QueueResult<usize> {
        let recovered = self
            .db
            .call(|conn| {
                Ok(conn.execute(
                    "UPDATE event_queue SET state = ?1, leased_at = NULL WHERE state = ?2",
                    params![STATE_READY, STATE_LEASED],
                )?)
            })
            .await?;

        if recovered > 0 {
            info!(count = recovered, "Recovered leased queue messages");
            self.ready_signal.notify_one();
        }
        Ok(recovered)
    }
}
