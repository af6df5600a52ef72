//! Shared SQLite connection driven from the blocking pool

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rusqlite::Connection;
use tracing::info;

use crate::RecorderResult;

/// How long a write waits on a database locked by another connection
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A connection whose statements run on `spawn_blocking` threads
#[derive(Clone)]
pub(crate) struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub(crate) fn open(path: &Path) -> RecorderResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        info!(path = %path.display(), "Opened recorder database");
        Ok(Self::new(conn))
    }

    pub(crate) fn in_memory() -> RecorderResult<Self> {
        Ok(Self::new(Connection::open_in_memory()?))
    }

    fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run schema setup on the calling thread; only used while opening
    pub(crate) fn init(
        &self,
        f: impl FnOnce(&Connection) -> RecorderResult<()>,
    ) -> RecorderResult<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&conn)
    }

    /// Run `f` against the connection without blocking the async runtime
    pub(crate) async fn call<T, F>(&self, f: F) -> RecorderResult<T>
    where
        F: FnOnce(&mut Connection) -> RecorderResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut conn)
        })
        .await?
    }
}
