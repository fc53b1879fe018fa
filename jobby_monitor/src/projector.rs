// Projections of job rows into per-state DTOs
use crate::{
    invocation::{decode_job, Job, JobCatalog},
    state_data::{decode_state_data, StateData},
    states::{parse_timestamp, JobRow, StateKind},
    Error, JobId,
};

use chrono::{DateTime, Utc};
use serde::Serialize;

type Result<T, E = crate::Error> = anyhow::Result<T, E>;

/// Ordered `(job id, dto)` pairs, in the order the listing defines
pub type JobList<T> = Vec<(JobId, T)>;

/// Maps one job row, its decoded job and its current state data into a DTO.
/// `job` is `None` when the job's method could not be loaded.
pub trait JobProjection: Sized {
    fn project(row: &JobRow, job: Option<Job>, data: Option<&StateData>) -> Result<Self>;
}

/// A projection used for a listing of all jobs in one state
pub trait StateListing: JobProjection {
    const STATE: StateKind;
}

fn text(data: Option<&StateData>, key: &str) -> Option<String> {
    data.and_then(|data| data.get(key)).map(ToOwned::to_owned)
}

fn timestamp(data: Option<&StateData>, key: &str) -> Option<DateTime<Utc>> {
    data.and_then(|data| data.get(key)).and_then(parse_timestamp)
}

fn number(data: Option<&StateData>, key: &str) -> Option<i64> {
    data.and_then(|data| data.get(key))
        .and_then(|value| value.trim().parse().ok())
}

fn required<'a>(
    row: &JobRow,
    data: Option<&'a StateData>,
    kind: StateKind,
    key: &'static str,
) -> Result<&'a str> {
    data.and_then(|data| data.get(key))
        .ok_or_else(|| Error::MissingStateData(row.job_id(), kind.name(), key))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnqueuedJobDto {
    pub job: Option<Job>,
    pub state: Option<String>,
    // Only set while the job is still enqueued
    pub enqueued_at: Option<DateTime<Utc>>,
    pub in_enqueued_state: bool,
}

impl JobProjection for EnqueuedJobDto {
    fn project(row: &JobRow, job: Option<Job>, data: Option<&StateData>) -> Result<Self> {
        let in_enqueued_state = row.is_in_state(StateKind::Enqueued);
        let enqueued_at = if in_enqueued_state {
            timestamp(data, "EnqueuedAt")
        } else {
            None
        };
        Ok(Self {
            job,
            state: row.state_name.clone(),
            enqueued_at,
            in_enqueued_state,
        })
    }
}

impl StateListing for EnqueuedJobDto {
    const STATE: StateKind = StateKind::Enqueued;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchedJobDto {
    pub job: Option<Job>,
    pub state: Option<String>,
}

impl JobProjection for FetchedJobDto {
    fn project(row: &JobRow, job: Option<Job>, _data: Option<&StateData>) -> Result<Self> {
        Ok(Self {
            job,
            state: row.state_name.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingJobDto {
    pub job: Option<Job>,
    pub server_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl JobProjection for ProcessingJobDto {
    fn project(_row: &JobRow, job: Option<Job>, data: Option<&StateData>) -> Result<Self> {
        // Older servers wrote ServerName instead
        let server_id = text(data, "ServerId").or_else(|| text(data, "ServerName"));
        Ok(Self {
            job,
            server_id,
            started_at: timestamp(data, "StartedAt"),
        })
    }
}

impl StateListing for ProcessingJobDto {
    const STATE: StateKind = StateKind::Processing;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledJobDto {
    pub job: Option<Job>,
    pub enqueue_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl JobProjection for ScheduledJobDto {
    fn project(_row: &JobRow, job: Option<Job>, data: Option<&StateData>) -> Result<Self> {
        Ok(Self {
            job,
            enqueue_at: timestamp(data, "EnqueueAt"),
            scheduled_at: timestamp(data, "ScheduledAt"),
        })
    }
}

impl StateListing for ScheduledJobDto {
    const STATE: StateKind = StateKind::Scheduled;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SucceededJobDto {
    pub job: Option<Job>,
    pub result: Option<String>,
    // In ms, performance duration plus latency
    pub total_duration: Option<i64>,
    pub succeeded_at: Option<DateTime<Utc>>,
}

impl JobProjection for SucceededJobDto {
    fn project(_row: &JobRow, job: Option<Job>, data: Option<&StateData>) -> Result<Self> {
        let total_duration = match (
            number(data, "PerformanceDuration"),
            number(data, "Latency"),
        ) {
            (Some(duration), Some(latency)) => duration.checked_add(latency),
            _ => None,
        };
        Ok(Self {
            job,
            result: text(data, "Result"),
            total_duration,
            succeeded_at: timestamp(data, "SucceededAt"),
        })
    }
}

impl StateListing for SucceededJobDto {
    const STATE: StateKind = StateKind::Succeeded;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedJobDto {
    pub job: Option<Job>,
    pub reason: Option<String>,
    pub failed_at: Option<DateTime<Utc>>,
    pub exception_type: String,
    pub exception_message: String,
    pub exception_details: String,
}

impl JobProjection for FailedJobDto {
    // Failure metadata is written together with the state, a gap is a broken row
    fn project(row: &JobRow, job: Option<Job>, data: Option<&StateData>) -> Result<Self> {
        let kind = StateKind::Failed;
        let exception_details = required(row, data, kind, "ExceptionDetails")?.to_owned();
        let exception_message = required(row, data, kind, "ExceptionMessage")?.to_owned();
        let exception_type = required(row, data, kind, "ExceptionType")?.to_owned();
        let failed_at = parse_timestamp(required(row, data, kind, "FailedAt")?);
        Ok(Self {
            job,
            reason: row.state_reason.clone(),
            failed_at,
            exception_type,
            exception_message,
            exception_details,
        })
    }
}

impl StateListing for FailedJobDto {
    const STATE: StateKind = StateKind::Failed;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletedJobDto {
    pub job: Option<Job>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl JobProjection for DeletedJobDto {
    fn project(_row: &JobRow, job: Option<Job>, data: Option<&StateData>) -> Result<Self> {
        Ok(Self {
            job,
            deleted_at: timestamp(data, "DeletedAt"),
        })
    }
}

impl StateListing for DeletedJobDto {
    const STATE: StateKind = StateKind::Deleted;
}

/// Any per-state DTO, for listings where the state is only known at runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum StateJobDto {
    Enqueued(EnqueuedJobDto),
    Scheduled(ScheduledJobDto),
    Processing(ProcessingJobDto),
    Succeeded(SucceededJobDto),
    Failed(FailedJobDto),
    Deleted(DeletedJobDto),
}

impl StateJobDto {
    pub fn project(
        kind: StateKind,
        row: &JobRow,
        job: Option<Job>,
        data: Option<&StateData>,
    ) -> Result<Self> {
        Ok(match kind {
            StateKind::Enqueued => Self::Enqueued(EnqueuedJobDto::project(row, job, data)?),
            StateKind::Scheduled => Self::Scheduled(ScheduledJobDto::project(row, job, data)?),
            StateKind::Processing => Self::Processing(ProcessingJobDto::project(row, job, data)?),
            StateKind::Succeeded => Self::Succeeded(SucceededJobDto::project(row, job, data)?),
            StateKind::Failed => Self::Failed(FailedJobDto::project(row, job, data)?),
            StateKind::Deleted => Self::Deleted(DeletedJobDto::project(row, job, data)?),
        })
    }
}

// A payload that does not even parse only costs this row its job description
pub(crate) fn job_for_row(catalog: &JobCatalog, row: &JobRow) -> Option<Job> {
    decode_job(
        catalog,
        row.invocation_data.as_deref(),
        row.arguments.as_deref(),
    )
    .unwrap_or_else(|e| {
        tracing::warn!("job {} has a malformed invocation payload: {e:?}", row.id);
        None
    })
}

// Same for state data: an unreadable blob reads as no data at all
pub(crate) fn state_data_for_row(job_id: i64, blob: Option<&str>) -> Option<StateData> {
    decode_state_data(blob).unwrap_or_else(|e| {
        tracing::warn!("job {job_id} has malformed state data: {e:?}");
        None
    })
}

pub(crate) fn project_row<F, T>(catalog: &JobCatalog, row: &JobRow, projection: F) -> Result<T>
where
    F: FnOnce(&JobRow, Option<Job>, Option<&StateData>) -> Result<T>,
{
    let job = job_for_row(catalog, row);
    let data = state_data_for_row(row.id, row.state_data.as_deref());
    projection(row, job, data.as_ref())
}

pub(crate) fn project_rows<T: JobProjection>(
    catalog: &JobCatalog,
    rows: Vec<JobRow>,
) -> Result<JobList<T>> {
    rows.into_iter()
        .map(|row| -> Result<_> { Ok((row.job_id(), project_row(catalog, &row, T::project)?)) })
        .collect()
}
