use crate::{
    invocation::{Job, JobCatalog},
    projector::{
        job_for_row, project_row, project_rows, state_data_for_row, DeletedJobDto, EnqueuedJobDto, FailedJobDto,
        FetchedJobDto, JobList, ProcessingJobDto, ScheduledJobDto, StateJobDto, StateListing,
        SucceededJobDto,
    },
    queue::{jobs_by_ids, QueueRegistry, QueueSnapshot},
    session::{IsolationLevel, SessionFactory, SqliteSessionFactory},
    state_data::StateData,
    states::{
        from_millis, parse_timestamp, rank_bounds, JobRow, ServerRow, StateHistoryRow, StateKind,
        TimelineKind,
    },
    timeline::{daily_buckets, hourly_buckets, resolve_counts},
    Error, JobId,
};

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

type Result<T, E = crate::Error> = anyhow::Result<T, E>;

const SUCCEEDED_COUNTER: &str = "stats:succeeded";
const DELETED_COUNTER: &str = "stats:deleted";
const RECURRING_JOBS_SET: &str = "recurring-jobs";
const RETRIES_SET: &str = "retries";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsDto {
    pub enqueued: i64,
    pub failed: i64,
    pub processing: i64,
    pub scheduled: i64,
    pub servers: i64,
    pub succeeded: i64,
    pub deleted: i64,
    pub recurring: i64,
    pub retries: i64,
    pub queues: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateHistoryDto {
    pub state_name: String,
    pub reason: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub data: StateData,
}

impl StateHistoryDto {
    fn from(job_id: i64, row: StateHistoryRow) -> Self {
        Self {
            data: state_data_for_row(job_id, row.data.as_deref()).unwrap_or_default(),
            state_name: row.name,
            reason: row.reason,
            created_at: from_millis(row.created_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobDetailsDto {
    pub job: Option<Job>,
    pub created_at: Option<DateTime<Utc>>,
    pub expire_at: Option<DateTime<Utc>>,
    pub properties: HashMap<String, Option<String>>,
    // Newest first
    pub history: Vec<StateHistoryDto>,
}

// Descriptor a server writes when it registers
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ServerData {
    worker_count: i64,
    queues: Vec<String>,
    started_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerDto {
    pub name: String,
    pub worker_count: i64,
    pub queues: Vec<String>,
    // `DateTime::<Utc>::MIN_UTC` when the server did not say
    pub started_at: DateTime<Utc>,
    pub heartbeat: Option<DateTime<Utc>>,
}

impl ServerDto {
    fn from(row: ServerRow) -> Result<Self> {
        let data: ServerData = match row.data.as_deref().filter(|data| !data.trim().is_empty()) {
            Some(data) => serde_json::from_str(data)?,
            None => ServerData::default(),
        };
        Ok(Self {
            name: row.id,
            worker_count: data.worker_count,
            queues: data.queues,
            started_at: data
                .started_at
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            heartbeat: row.last_heartbeat.and_then(from_millis),
        })
    }
}

/// Settings shared by every monitoring call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoringOptions {
    // Per-state counts never show less than this
    pub min_displayed_count: Option<u64>,
    pub queue_preview_count: usize,
}

impl Default for MonitoringOptions {
    fn default() -> Self {
        Self {
            min_displayed_count: None,
            queue_preview_count: 5,
        }
    }
}

#[derive(Debug)]
pub(crate) struct MonitoringContext {
    pub(crate) catalog: JobCatalog,
    pub(crate) queues: QueueRegistry,
    pub(crate) options: MonitoringOptions,
}

/// Every read the dashboard makes, against one open session
pub struct MonitoringReader<'a> {
    connection: &'a Connection,
    catalog: &'a JobCatalog,
    queues: &'a QueueRegistry,
    options: &'a MonitoringOptions,
}

impl<'a> MonitoringReader<'a> {
    pub fn new(
        connection: &'a Connection,
        catalog: &'a JobCatalog,
        queues: &'a QueueRegistry,
        options: &'a MonitoringOptions,
    ) -> Self {
        Self {
            connection,
            catalog,
            queues,
            options,
        }
    }

    fn state_rows(&self, state_name: &str, from: usize, count: usize) -> Result<Vec<JobRow>> {
        // Ranks are taken over the filtered set so a page means the same thing for
        // the whole transaction
        let sql = format!(
            r"
SELECT {columns}
FROM (
    SELECT
        id,
        ROW_NUMBER() OVER (ORDER BY id DESC) AS row_num
    FROM jobby_job
    WHERE state_name = ?1
) AS ranked
JOIN jobby_job j ON j.id = ranked.id
LEFT JOIN jobby_state s ON s.id = j.state_id
WHERE ranked.row_num BETWEEN ?2 AND ?3
ORDER BY ranked.row_num
;",
            columns = JobRow::COLUMNS
        );
        let mut statement = self
            .connection
            .prepare_cached(&sql)
            .map_err(|e| Error::Query("jobs by state", e))?;
        let (first, last) = rank_bounds(from, count);
        let rows = statement
            .query_map(params![state_name, first, last], JobRow::from_row)
            .map_err(|e| Error::Query("jobs by state", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Query("jobs by state", e))
    }

    /// Jobs currently in `T::STATE`, newest first
    pub fn jobs_in_state<T: StateListing>(&self, from: usize, count: usize) -> Result<JobList<T>> {
        let rows = self.state_rows(T::STATE.name(), from, count)?;
        project_rows(self.catalog, rows)
    }

    /// Same as `jobs_in_state`, for a state only known at runtime
    pub fn jobs_by_state(
        &self,
        kind: StateKind,
        from: usize,
        count: usize,
    ) -> Result<JobList<StateJobDto>> {
        self.state_rows(kind.name(), from, count)?
            .into_iter()
            .map(|row| -> Result<_> {
                let dto = project_row(self.catalog, &row, |row, job, data| {
                    StateJobDto::project(kind, row, job, data)
                })?;
                Ok((row.job_id(), dto))
            })
            .collect()
    }

    pub fn processing_jobs(&self, from: usize, count: usize) -> Result<JobList<ProcessingJobDto>> {
        self.jobs_in_state(from, count)
    }

    pub fn scheduled_jobs(&self, from: usize, count: usize) -> Result<JobList<ScheduledJobDto>> {
        self.jobs_in_state(from, count)
    }

    pub fn succeeded_jobs(&self, from: usize, count: usize) -> Result<JobList<SucceededJobDto>> {
        self.jobs_in_state(from, count)
    }

    pub fn failed_jobs(&self, from: usize, count: usize) -> Result<JobList<FailedJobDto>> {
        self.jobs_in_state(from, count)
    }

    pub fn deleted_jobs(&self, from: usize, count: usize) -> Result<JobList<DeletedJobDto>> {
        self.jobs_in_state(from, count)
    }

    pub fn enqueued_jobs(
        &self,
        queue: &str,
        from: usize,
        per_page: usize,
    ) -> Result<JobList<EnqueuedJobDto>> {
        let ids = self
            .queues
            .resolve(queue)?
            .enqueued_job_ids(self.connection, queue, from, per_page)?;
        jobs_by_ids(self.connection, self.catalog, &ids)
    }

    pub fn fetched_jobs(
        &self,
        queue: &str,
        from: usize,
        per_page: usize,
    ) -> Result<JobList<FetchedJobDto>> {
        let ids = self
            .queues
            .resolve(queue)?
            .fetched_job_ids(self.connection, queue, from, per_page)?;
        jobs_by_ids(self.connection, self.catalog, &ids)
    }

    /// Jobs in the state, raised to the configured display floor
    pub fn count_by_state(&self, state_name: &str) -> Result<i64> {
        let count: i64 = self
            .connection
            .query_row(
                "SELECT COUNT(*) FROM jobby_job WHERE state_name = ?1;",
                params![state_name],
                |row| row.get(0),
            )
            .map_err(|e| Error::Query("count by state", e))?;
        Ok(match self.options.min_displayed_count {
            Some(floor) => count.max(i64::try_from(floor).unwrap_or(i64::MAX)),
            None => count,
        })
    }

    pub fn scheduled_count(&self) -> Result<i64> {
        self.count_by_state(StateKind::Scheduled.name())
    }

    pub fn failed_count(&self) -> Result<i64> {
        self.count_by_state(StateKind::Failed.name())
    }

    pub fn processing_count(&self) -> Result<i64> {
        self.count_by_state(StateKind::Processing.name())
    }

    pub fn succeeded_list_count(&self) -> Result<i64> {
        self.count_by_state(StateKind::Succeeded.name())
    }

    pub fn deleted_list_count(&self) -> Result<i64> {
        self.count_by_state(StateKind::Deleted.name())
    }

    pub fn enqueued_count(&self, queue: &str) -> Result<i64> {
        Ok(self
            .queues
            .resolve(queue)?
            .enqueued_and_fetched_count(self.connection, queue)?
            .enqueued)
    }

    pub fn fetched_count(&self, queue: &str) -> Result<i64> {
        Ok(self
            .queues
            .resolve(queue)?
            .enqueued_and_fetched_count(self.connection, queue)?
            .fetched
            .unwrap_or_default())
    }

    pub fn queues(&self) -> Result<Vec<QueueSnapshot>> {
        self.queues.snapshots(
            self.connection,
            self.catalog,
            self.options.queue_preview_count,
        )
    }

    pub fn servers(&self) -> Result<Vec<ServerDto>> {
        let mut statement = self
            .connection
            .prepare_cached("SELECT id, data, last_heartbeat FROM jobby_server ORDER BY id;")
            .map_err(|e| Error::Query("servers", e))?;
        let rows = statement
            .query_map([], |row| {
                Ok(ServerRow {
                    id: row.get("id")?,
                    data: row.get("data")?,
                    last_heartbeat: row.get("last_heartbeat")?,
                })
            })
            .map_err(|e| Error::Query("servers", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Query("servers", e))?;
        rows.into_iter().map(ServerDto::from).collect()
    }

    /// `None` when there is no such job
    pub fn job_details(&self, job_id: &str) -> Result<Option<JobDetailsDto>> {
        let Ok(id) = job_id.trim().parse::<i64>() else {
            return Ok(None);
        };
        let row = self
            .connection
            .query_row(
                r"
SELECT
    id,
    invocation_data,
    arguments,
    created_at,
    expire_at,
    state_name,
    NULL AS state_reason,
    NULL AS state_data
FROM jobby_job
WHERE id = ?1
;",
                params![id],
                JobRow::from_row,
            )
            .optional()
            .map_err(|e| Error::Query("job details", e))?;
        let Some(row) = row else {
            return Ok(None);
        };

        let properties = {
            // Later rows win when a name repeats
            let mut statement = self
                .connection
                .prepare_cached(
                    "SELECT name, value FROM jobby_job_parameter WHERE job_id = ?1 ORDER BY id;",
                )
                .map_err(|e| Error::Query("job parameters", e))?;
            let rows = statement
                .query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(|e| Error::Query("job parameters", e))?;
            rows.collect::<rusqlite::Result<HashMap<String, Option<String>>>>()
                .map_err(|e| Error::Query("job parameters", e))?
        };

        let history = {
            // Ids, not timestamps, order the history; timestamps can tie
            let mut statement = self
                .connection
                .prepare_cached(
                    r"
SELECT name, reason, data, created_at
FROM jobby_state
WHERE job_id = ?1
ORDER BY id DESC
;",
                )
                .map_err(|e| Error::Query("job history", e))?;
            let rows = statement
                .query_map(params![id], |row| {
                    Ok(StateHistoryRow {
                        name: row.get("name")?,
                        reason: row.get("reason")?,
                        data: row.get("data")?,
                        created_at: row.get("created_at")?,
                    })
                })
                .map_err(|e| Error::Query("job history", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::Query("job history", e))?;
            rows.into_iter()
                .map(|state| StateHistoryDto::from(id, state))
                .collect::<Vec<_>>()
        };

        Ok(Some(JobDetailsDto {
            job: job_for_row(self.catalog, &row),
            created_at: from_millis(row.created_at),
            expire_at: row.expire_at.and_then(from_millis),
            properties,
            history,
        }))
    }

    fn set_count(&self, key: &str) -> Result<i64> {
        self.connection
            .query_row(
                "SELECT COUNT(*) FROM jobby_set WHERE key = ?1;",
                params![key],
                |row| row.get(0),
            )
            .map_err(|e| Error::Query("set count", e))
    }

    pub fn statistics(&self) -> Result<StatisticsDto> {
        let by_state: HashMap<String, i64> = {
            let mut statement = self
                .connection
                .prepare_cached(
                    r"
SELECT state_name, COUNT(*)
FROM jobby_job
WHERE state_name IN (?1, ?2, ?3, ?4)
GROUP BY state_name
;",
                )
                .map_err(|e| Error::Query("statistics", e))?;
            let rows = statement
                .query_map(
                    params![
                        StateKind::Enqueued.name(),
                        StateKind::Failed.name(),
                        StateKind::Processing.name(),
                        StateKind::Scheduled.name(),
                    ],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(|e| Error::Query("statistics", e))?;
            rows.collect::<rusqlite::Result<_>>()
                .map_err(|e| Error::Query("statistics", e))?
        };
        let state_count =
            |kind: StateKind| by_state.get(kind.name()).copied().unwrap_or_default();

        let counters = resolve_counts(self.connection, &[SUCCEEDED_COUNTER, DELETED_COUNTER])?;
        let counter = |key: &str| counters.get(key).copied().unwrap_or_default();
        let servers: i64 = self
            .connection
            .query_row("SELECT COUNT(*) FROM jobby_server;", [], |row| row.get(0))
            .map_err(|e| Error::Query("statistics", e))?;

        Ok(StatisticsDto {
            enqueued: state_count(StateKind::Enqueued),
            failed: state_count(StateKind::Failed),
            processing: state_count(StateKind::Processing),
            scheduled: state_count(StateKind::Scheduled),
            servers,
            succeeded: counter(SUCCEEDED_COUNTER),
            deleted: counter(DELETED_COUNTER),
            recurring: self.set_count(RECURRING_JOBS_SET)?,
            retries: self.set_count(RETRIES_SET)?,
            queues: self.queues.list_queues(self.connection)?.len() as i64,
        })
    }

    pub fn succeeded_by_dates_count(&self, now: DateTime<Utc>) -> Result<Vec<(NaiveDate, i64)>> {
        daily_buckets(self.connection, now, TimelineKind::Succeeded)
    }

    pub fn failed_by_dates_count(&self, now: DateTime<Utc>) -> Result<Vec<(NaiveDate, i64)>> {
        daily_buckets(self.connection, now, TimelineKind::Failed)
    }

    pub fn hourly_succeeded_jobs(&self, now: DateTime<Utc>) -> Result<Vec<(DateTime<Utc>, i64)>> {
        hourly_buckets(self.connection, now, TimelineKind::Succeeded)
    }

    pub fn hourly_failed_jobs(&self, now: DateTime<Utc>) -> Result<Vec<(DateTime<Utc>, i64)>> {
        hourly_buckets(self.connection, now, TimelineKind::Failed)
    }
}

/// Monitoring API for the dashboard. Each call opens its own read uncommitted
/// session and keeps nothing once it returns.
pub struct MonitoringApi<S> {
    sessions: S,
    context: Arc<MonitoringContext>,
}

pub type SqliteMonitoringApi = MonitoringApi<SqliteSessionFactory>;

impl<S: SessionFactory> MonitoringApi<S> {
    pub fn new(
        sessions: S,
        catalog: JobCatalog,
        queues: QueueRegistry,
        options: MonitoringOptions,
    ) -> Self {
        Self {
            sessions,
            context: Arc::new(MonitoringContext {
                catalog,
                queues,
                options,
            }),
        }
    }

    pub fn sessions(&self) -> &S {
        &self.sessions
    }

    pub fn options(&self) -> &MonitoringOptions {
        &self.context.options
    }

    async fn run<T, F>(&self, operation: &'static str, read: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&MonitoringReader<'_>) -> Result<T> + Send + 'static,
    {
        let context = Arc::clone(&self.context);
        let result = self
            .sessions
            .read(IsolationLevel::ReadUncommitted, move |connection| {
                let reader = MonitoringReader::new(
                    connection,
                    &context.catalog,
                    &context.queues,
                    &context.options,
                );
                read(&reader)
            })
            .await;
        if let Err(e) = &result {
            tracing::debug!("monitoring {operation} failed: {e:?}");
        }
        result
    }

    pub async fn statistics(&self) -> Result<StatisticsDto> {
        self.run("statistics", |reader| reader.statistics()).await
    }

    pub async fn queues(&self) -> Result<Vec<QueueSnapshot>> {
        self.run("queues", |reader| reader.queues()).await
    }

    pub async fn servers(&self) -> Result<Vec<ServerDto>> {
        self.run("servers", |reader| reader.servers()).await
    }

    pub async fn job_details(&self, job_id: JobId) -> Result<Option<JobDetailsDto>> {
        self.run("job details", move |reader| reader.job_details(&job_id))
            .await
    }

    pub async fn jobs_by_state(
        &self,
        kind: StateKind,
        from: usize,
        count: usize,
    ) -> Result<JobList<StateJobDto>> {
        self.run("jobs by state", move |reader| {
            reader.jobs_by_state(kind, from, count)
        })
        .await
    }

    pub async fn processing_jobs(
        &self,
        from: usize,
        count: usize,
    ) -> Result<JobList<ProcessingJobDto>> {
        self.run("processing jobs", move |reader| {
            reader.processing_jobs(from, count)
        })
        .await
    }

    pub async fn scheduled_jobs(
        &self,
        from: usize,
        count: usize,
    ) -> Result<JobList<ScheduledJobDto>> {
        self.run("scheduled jobs", move |reader| {
            reader.scheduled_jobs(from, count)
        })
        .await
    }

    pub async fn succeeded_jobs(
        &self,
        from: usize,
        count: usize,
    ) -> Result<JobList<SucceededJobDto>> {
        self.run("succeeded jobs", move |reader| {
            reader.succeeded_jobs(from, count)
        })
        .await
    }

    pub async fn failed_jobs(&self, from: usize, count: usize) -> Result<JobList<FailedJobDto>> {
        self.run("failed jobs", move |reader| reader.failed_jobs(from, count))
            .await
    }

    pub async fn deleted_jobs(&self, from: usize, count: usize) -> Result<JobList<DeletedJobDto>> {
        self.run("deleted jobs", move |reader| reader.deleted_jobs(from, count))
            .await
    }

    pub async fn enqueued_jobs(
        &self,
        queue: String,
        from: usize,
        per_page: usize,
    ) -> Result<JobList<EnqueuedJobDto>> {
        self.run("enqueued jobs", move |reader| {
            reader.enqueued_jobs(&queue, from, per_page)
        })
        .await
    }

    pub async fn fetched_jobs(
        &self,
        queue: String,
        from: usize,
        per_page: usize,
    ) -> Result<JobList<FetchedJobDto>> {
        self.run("fetched jobs", move |reader| {
            reader.fetched_jobs(&queue, from, per_page)
        })
        .await
    }

    pub async fn scheduled_count(&self) -> Result<i64> {
        self.run("scheduled count", |reader| reader.scheduled_count())
            .await
    }

    pub async fn enqueued_count(&self, queue: String) -> Result<i64> {
        self.run("enqueued count", move |reader| reader.enqueued_count(&queue))
            .await
    }

    pub async fn fetched_count(&self, queue: String) -> Result<i64> {
        self.run("fetched count", move |reader| reader.fetched_count(&queue))
            .await
    }

    pub async fn failed_count(&self) -> Result<i64> {
        self.run("failed count", |reader| reader.failed_count()).await
    }

    pub async fn processing_count(&self) -> Result<i64> {
        self.run("processing count", |reader| reader.processing_count())
            .await
    }

    pub async fn succeeded_list_count(&self) -> Result<i64> {
        self.run("succeeded count", |reader| reader.succeeded_list_count())
            .await
    }

    pub async fn deleted_list_count(&self) -> Result<i64> {
        self.run("deleted count", |reader| reader.deleted_list_count())
            .await
    }

    pub async fn succeeded_by_dates_count(&self) -> Result<Vec<(NaiveDate, i64)>> {
        let now = Utc::now();
        self.run("succeeded by dates", move |reader| {
            reader.succeeded_by_dates_count(now)
        })
        .await
    }

    pub async fn failed_by_dates_count(&self) -> Result<Vec<(NaiveDate, i64)>> {
        let now = Utc::now();
        self.run("failed by dates", move |reader| {
            reader.failed_by_dates_count(now)
        })
        .await
    }

    pub async fn hourly_succeeded_jobs(&self) -> Result<Vec<(DateTime<Utc>, i64)>> {
        let now = Utc::now();
        self.run("hourly succeeded", move |reader| {
            reader.hourly_succeeded_jobs(now)
        })
        .await
    }

    pub async fn hourly_failed_jobs(&self) -> Result<Vec<(DateTime<Utc>, i64)>> {
        let now = Utc::now();
        self.run("hourly failed", move |reader| reader.hourly_failed_jobs(now))
            .await
    }
}
