// States and raw rows read from the job storage
use chrono::{DateTime, TimeZone, Utc};
use strum_macros::IntoStaticStr;

/// A `JobId` is the string form of a job's integer identity, as shown to
/// dashboard users and accepted back from them
pub type JobId = String;

/// Well known job states. The persisted state name is the variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum StateKind {
    Enqueued,
    Scheduled,
    Processing,
    Succeeded,
    Failed,
    Deleted,
}

impl StateKind {
    pub const ALL: [Self; 6] = [
        Self::Enqueued,
        Self::Scheduled,
        Self::Processing,
        Self::Succeeded,
        Self::Failed,
        Self::Deleted,
    ];

    pub fn name(self) -> &'static str {
        self.into()
    }

    // State names are compared exactly, the write side never varies the case
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// Counter series that have per-day and per-hour buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum TimelineKind {
    Succeeded,
    Failed,
}

impl TimelineKind {
    pub fn name(self) -> &'static str {
        self.into()
    }
}

// A job row joined with its current state, as used by every listing
#[derive(Debug, Clone)]
pub struct JobRow {
    pub(crate) id: i64,
    pub(crate) invocation_data: Option<String>,
    pub(crate) arguments: Option<String>,
    pub(crate) created_at: i64,
    pub(crate) expire_at: Option<i64>,
    pub(crate) state_name: Option<String>,
    pub(crate) state_reason: Option<String>,
    pub(crate) state_data: Option<String>,
}

impl JobRow {
    pub(crate) const COLUMNS: &'static str = r"
    j.id AS id,
    j.invocation_data AS invocation_data,
    j.arguments AS arguments,
    j.created_at AS created_at,
    j.expire_at AS expire_at,
    j.state_name AS state_name,
    s.reason AS state_reason,
    s.data AS state_data";

    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            invocation_data: row.get("invocation_data")?,
            arguments: row.get("arguments")?,
            created_at: row.get("created_at")?,
            expire_at: row.get("expire_at")?,
            state_name: row.get("state_name")?,
            state_reason: row.get("state_reason")?,
            state_data: row.get("state_data")?,
        })
    }

    pub fn job_id(&self) -> JobId {
        self.id.to_string()
    }

    pub fn state_name(&self) -> Option<&str> {
        self.state_name.as_deref()
    }

    pub fn state_reason(&self) -> Option<&str> {
        self.state_reason.as_deref()
    }

    pub fn is_in_state(&self, kind: StateKind) -> bool {
        self.state_name.as_deref() == Some(kind.name())
    }
}

// One entry of a job's state history
#[derive(Debug, Clone)]
pub(crate) struct StateHistoryRow {
    pub(crate) name: String,
    pub(crate) reason: Option<String>,
    pub(crate) data: Option<String>,
    pub(crate) created_at: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct ServerRow {
    pub(crate) id: String,
    pub(crate) data: Option<String>,
    pub(crate) last_heartbeat: Option<i64>,
}

// Stored timestamps are unix milliseconds
pub(crate) fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

// Inclusive 1-based ROW_NUMBER bounds of the page `from..from + count`, clamped to i64
pub(crate) fn rank_bounds(from: usize, count: usize) -> (i64, i64) {
    let first = i64::try_from(from).unwrap_or(i64::MAX).saturating_add(1);
    let last = i64::try_from(from.saturating_add(count)).unwrap_or(i64::MAX);
    (first, last)
}

// Timestamps inside serialized payloads are either unix milliseconds or RFC 3339
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(millis) = value.parse::<i64>() {
        return from_millis(millis);
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}
