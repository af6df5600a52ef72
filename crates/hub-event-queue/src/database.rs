//! Queue connection driven from the blocking pool

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rusqlite::Connection;
use tokio::task::JoinHandle;
use tracing::info;

use crate::QueueResult;

/// How long a write waits on a database locked by another connection
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub(crate) struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub(crate) fn open(path: &Path) -> QueueResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        info!(path = %path.display(), "Opened event queue database");
        Ok(Self::new(conn))
    }

    pub(crate) fn in_memory() -> QueueResult<Self> {
        Ok(Self::new(Connection::open_in_memory()?))
    }

    fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run schema setup on the calling thread
    pub(crate) fn init(&self, f: impl FnOnce(&Connection) -> QueueResult<()>) -> QueueResult<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&conn)
    }

    /// Start `f` on a blocking thread. The work runs to completion even if
    /// the handle is dropped.
    pub(crate) fn spawn<T, F>(&self, f: F) -> JoinHandle<QueueResult<T>>
    where
        F: FnOnce(&mut Connection) -> QueueResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut conn)
        })
    }

    pub(crate) async fn call<T, F>(&self, f: F) -> QueueResult<T>
    where
        F: FnOnce(&mut Connection) -> QueueResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.spawn(f).await?
    }
}
