use crate::JobId;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Opening read session: {0:?}")]
    SessionOpening(rusqlite::Error),
    #[error("Querying {0}: {1:?}")]
    Query(&'static str, rusqlite::Error),
    #[error("serde: {0:?}")]
    Serde(#[from] serde_json::Error),
    #[error("No queue backend registered for queue {0:?}")]
    QueueNotFound(String),
    #[error("State data of job {0} in state {1} is missing required key {2:?}")]
    MissingStateData(JobId, &'static str, &'static str),
    #[error("Invalid queue table name: {0:?}")]
    InvalidQueueTable(String),
    #[error("async join: {0:?}")]
    AsyncJoin(#[from] tokio::task::JoinError),
    #[error("Invalid duration {0:?}: {1}")]
    InvalidDuration(String, humantime::DurationError),
    #[error("Configuration: {0}")]
    Configuration(#[from] rocket::figment::Error),
}
