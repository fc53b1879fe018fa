use crate::Error;

use std::time::Duration;

use rusqlite::{Connection, OpenFlags, TransactionBehavior};

type Result<T, E = crate::Error> = anyhow::Result<T, E>;

/// Isolation a read session runs at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    // May observe rows other connections have not committed yet, never waits on writers
    ReadUncommitted,
    Serializable,
}

/// Opens a read transaction, runs `read` against it and releases it on every exit path.
#[async_trait::async_trait]
pub trait SessionFactory: Send + Sync {
    async fn read<T, F>(&self, isolation: IsolationLevel, read: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static;
}

/// Opens a fresh SQLite connection per session, on the blocking pool
#[derive(Debug, Clone)]
pub struct SqliteSessionFactory {
    path: String,
    busy_timeout: Duration,
}

impl SqliteSessionFactory {
    pub fn new(path: impl Into<String>, busy_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn open(&self, isolation: IsolationLevel) -> rusqlite::Result<Connection> {
        // URI paths allow shared cache databases, which is where read_uncommitted applies
        let connection = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        connection.busy_timeout(self.busy_timeout)?;
        connection.pragma_update(None, "query_only", true)?;
        connection.pragma_update(
            None,
            "read_uncommitted",
            isolation == IsolationLevel::ReadUncommitted,
        )?;
        Ok(connection)
    }

    fn read_blocking<T, F>(&self, isolation: IsolationLevel, read: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut connection = self.open(isolation).map_err(Error::SessionOpening)?;
        let transaction = connection
            .transaction_with_behavior(TransactionBehavior::Deferred)
            .map_err(Error::SessionOpening)?;
        let result = read(&transaction);
        // Nothing was written, rolling back just releases the snapshot
        finish(result, transaction.rollback())
    }
}

// The read's own error always wins over a failure to release the session
fn finish<T>(result: Result<T>, released: rusqlite::Result<()>) -> Result<T> {
    match (result, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(Error::Query("releasing read session", e)),
        (Err(e), released) => {
            if let Err(rollback) = released {
                tracing::warn!("releasing a failed read session: {rollback:?}");
            }
            Err(e)
        }
    }
}

#[async_trait::async_trait]
impl SessionFactory for SqliteSessionFactory {
    async fn read<T, F>(&self, isolation: IsolationLevel, read: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let factory = self.clone();
        tokio::task::spawn_blocking(move || factory.read_blocking(isolation, read)).await?
    }
}
