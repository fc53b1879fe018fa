// Queue backends and the registry that routes queue names to them
use crate::{
    invocation::JobCatalog,
    projector::{project_rows, EnqueuedJobDto, JobList, JobProjection},
    states::{rank_bounds, JobRow},
    Error,
};

use std::{collections::HashMap, sync::Arc};

use itertools::Itertools;
use rusqlite::{params, params_from_iter, Connection};
use serde::Serialize;

type Result<T, E = crate::Error> = anyhow::Result<T, E>;

/// Number of enqueued and fetched jobs in a queue.
/// `fetched` is `None` for backends that cannot tell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub enqueued: i64,
    pub fetched: Option<i64>,
}

/// Monitoring side of a job queue implementation.
/// Every call runs against the caller's read session.
pub trait QueueBackend: Send + Sync {
    // Queues that currently hold jobs
    fn queues(&self, connection: &Connection) -> Result<Vec<String>>;

    // Ids of jobs waiting in the queue, oldest first
    fn enqueued_job_ids(
        &self,
        connection: &Connection,
        queue: &str,
        from: usize,
        per_page: usize,
    ) -> Result<Vec<i64>>;

    // Ids of jobs a worker has taken but not finished, oldest first
    fn fetched_job_ids(
        &self,
        connection: &Connection,
        queue: &str,
        from: usize,
        per_page: usize,
    ) -> Result<Vec<i64>>;

    fn enqueued_and_fetched_count(&self, connection: &Connection, queue: &str)
        -> Result<QueueCounts>;
}

/// A queue kept in a table of `(id, job_id, queue, fetched_at)` rows
#[derive(Debug, Clone)]
pub struct TableJobQueue {
    table: String,
}

impl TableJobQueue {
    pub const DEFAULT_TABLE: &'static str = "jobby_job_queue";

    // The table name ends up in the SQL text, so only plain identifiers are accepted
    pub fn new(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        let valid = table
            .chars()
            .next()
            .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
            && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            Ok(Self { table })
        } else {
            Err(Error::InvalidQueueTable(table))
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn job_ids(
        &self,
        connection: &Connection,
        queue: &str,
        fetched: bool,
        from: usize,
        per_page: usize,
    ) -> Result<Vec<i64>> {
        let predicate = if fetched {
            "fetched_at IS NOT NULL"
        } else {
            "fetched_at IS NULL"
        };
        let sql = format!(
            r"
SELECT job_id
FROM (
    SELECT
        job_id,
        ROW_NUMBER() OVER (ORDER BY id ASC) AS row_num
    FROM {table}
    WHERE queue = ?1
    AND   {predicate}
) AS ranked
WHERE ranked.row_num BETWEEN ?2 AND ?3
ORDER BY ranked.row_num
;",
            table = self.table
        );
        let mut statement = connection
            .prepare_cached(&sql)
            .map_err(|e| Error::Query("queue job ids", e))?;
        let (first, last) = rank_bounds(from, per_page);
        let rows = statement
            .query_map(params![queue, first, last], |row| row.get(0))
            .map_err(|e| Error::Query("queue job ids", e))?;
        rows.collect::<rusqlite::Result<Vec<i64>>>()
            .map_err(|e| Error::Query("queue job ids", e))
    }
}

impl QueueBackend for TableJobQueue {
    fn queues(&self, connection: &Connection) -> Result<Vec<String>> {
        let sql = format!("SELECT DISTINCT queue FROM {} ORDER BY queue;", self.table);
        let mut statement = connection
            .prepare_cached(&sql)
            .map_err(|e| Error::Query("queues", e))?;
        let rows = statement
            .query_map([], |row| row.get(0))
            .map_err(|e| Error::Query("queues", e))?;
        rows.collect::<rusqlite::Result<Vec<String>>>()
            .map_err(|e| Error::Query("queues", e))
    }

    fn enqueued_job_ids(
        &self,
        connection: &Connection,
        queue: &str,
        from: usize,
        per_page: usize,
    ) -> Result<Vec<i64>> {
        self.job_ids(connection, queue, false, from, per_page)
    }

    fn fetched_job_ids(
        &self,
        connection: &Connection,
        queue: &str,
        from: usize,
        per_page: usize,
    ) -> Result<Vec<i64>> {
        self.job_ids(connection, queue, true, from, per_page)
    }

    fn enqueued_and_fetched_count(
        &self,
        connection: &Connection,
        queue: &str,
    ) -> Result<QueueCounts> {
        let sql = format!(
            r"
SELECT
    COALESCE(SUM(CASE WHEN fetched_at IS NULL THEN 1 ELSE 0 END), 0),
    COALESCE(SUM(CASE WHEN fetched_at IS NOT NULL THEN 1 ELSE 0 END), 0)
FROM {}
WHERE queue = ?1
;",
            self.table
        );
        connection
            .query_row(&sql, params![queue], |row| {
                Ok(QueueCounts {
                    enqueued: row.get(0)?,
                    fetched: Some(row.get(1)?),
                })
            })
            .map_err(|e| Error::Query("queue counts", e))
    }
}

/// Summary of one queue, built fresh on every call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub name: String,
    pub length: i64,
    pub fetched: Option<i64>,
    pub first_jobs: JobList<EnqueuedJobDto>,
}

/// Routes queue names to the backend that owns them
#[derive(Default, Clone)]
pub struct QueueRegistry {
    backends: Vec<Arc<dyn QueueBackend>>,
    by_queue: HashMap<String, usize>,
}

impl std::fmt::Debug for QueueRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueRegistry")
            .field("backends", &self.backends.len())
            .field("queues", &self.by_queue.keys().sorted().collect::<Vec<_>>())
            .finish()
    }
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Claims `queues` for `backend`. A later registration of the same name wins.
    #[must_use]
    pub fn register<I, S>(mut self, backend: Arc<dyn QueueBackend>, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let index = self.backends.len();
        self.backends.push(backend);
        for queue in queues {
            self.by_queue.insert(queue.into(), index);
        }
        self
    }

    pub fn resolve(&self, queue: &str) -> Result<&dyn QueueBackend> {
        self.by_queue
            .get(queue)
            .map(|index| self.backends[*index].as_ref())
            .ok_or_else(|| Error::QueueNotFound(queue.to_owned()))
    }

    fn queues_with_backends(
        &self,
        connection: &Connection,
    ) -> Result<Vec<(String, &dyn QueueBackend)>> {
        // Only names routed to the reporting backend, so every listed queue resolves
        let mut queues = vec![];
        for (index, backend) in self.backends.iter().enumerate() {
            for queue in backend.queues(connection)? {
                if self.by_queue.get(&queue) == Some(&index) {
                    queues.push((queue, backend.as_ref()));
                }
            }
        }
        Ok(queues
            .into_iter()
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .dedup_by(|a, b| a.0 == b.0)
            .collect())
    }

    /// Names of the registered queues that currently hold jobs, sorted
    pub fn list_queues(&self, connection: &Connection) -> Result<Vec<String>> {
        Ok(self
            .queues_with_backends(connection)?
            .into_iter()
            .map(|(queue, _)| queue)
            .collect())
    }

    pub fn snapshot(
        &self,
        connection: &Connection,
        catalog: &JobCatalog,
        queue: &str,
        preview: usize,
    ) -> Result<QueueSnapshot> {
        Self::snapshot_from(connection, catalog, self.resolve(queue)?, queue, preview)
    }

    /// Snapshots of every queue. Each queue is read through the backend that reported it.
    pub fn snapshots(
        &self,
        connection: &Connection,
        catalog: &JobCatalog,
        preview: usize,
    ) -> Result<Vec<QueueSnapshot>> {
        self.queues_with_backends(connection)?
            .into_iter()
            .map(|(queue, backend)| {
                Self::snapshot_from(connection, catalog, backend, &queue, preview)
            })
            .collect()
    }

    fn snapshot_from(
        connection: &Connection,
        catalog: &JobCatalog,
        backend: &dyn QueueBackend,
        queue: &str,
        preview: usize,
    ) -> Result<QueueSnapshot> {
        let ids = backend.enqueued_job_ids(connection, queue, 0, preview)?;
        let first_jobs = jobs_by_ids(connection, catalog, &ids)?;
        let counts = backend.enqueued_and_fetched_count(connection, queue)?;
        Ok(QueueSnapshot {
            name: queue.to_owned(),
            length: counts.enqueued,
            fetched: counts.fetched,
            first_jobs,
        })
    }
}

/// Loads the given jobs with their current state, in the order of `ids`.
/// Ids whose job no longer exists are skipped.
pub(crate) fn jobs_by_ids<T: JobProjection>(
    connection: &Connection,
    catalog: &JobCatalog,
    ids: &[i64],
) -> Result<JobList<T>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }
    let placeholders = (1..=ids.len()).map(|i| format!("?{i}")).join(", ");
    let sql = format!(
        r"
SELECT {columns}
FROM jobby_job j
LEFT JOIN jobby_state s ON s.id = j.state_id
WHERE j.id IN ({placeholders})
;",
        columns = JobRow::COLUMNS
    );
    let mut statement = connection
        .prepare(&sql)
        .map_err(|e| Error::Query("jobs by id", e))?;
    let mut found: HashMap<i64, JobRow> = statement
        .query_map(params_from_iter(ids.iter()), JobRow::from_row)
        .map_err(|e| Error::Query("jobs by id", e))?
        .map(|row| row.map(|row| (row.id, row)))
        .collect::<rusqlite::Result<_>>()
        .map_err(|e| Error::Query("jobs by id", e))?;
    let rows = ids
        .iter()
        .filter_map(|id| {
            let row = found.remove(id);
            if row.is_none() {
                tracing::warn!("job {id} is queued but no longer exists");
            }
            row
        })
        .collect();
    project_rows(catalog, rows)
}
