#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    // too many linter FPs: https://github.com/rust-lang/rust-clippy/issues/9271
    clippy::missing_const_for_fn,
    // Need a lot of usize <-> i64 due to sqlite
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::struct_field_names
)]

mod config;
mod error;
mod invocation;
mod monitoring;
mod projector;
mod queue;
mod rocket_stage;
mod session;
mod state_data;
mod states;
#[cfg(test)]
mod testing;
mod timeline;

pub use inventory;
pub use rocket;

pub use error::Error;
pub use invocation::{decode_job, Job, JobCatalog, JobMethod};
pub use monitoring::{
    JobDetailsDto, MonitoringApi, MonitoringOptions, MonitoringReader, ServerDto,
    SqliteMonitoringApi, StateHistoryDto, StatisticsDto,
};
pub use projector::{
    DeletedJobDto, EnqueuedJobDto, FailedJobDto, FetchedJobDto, JobList, JobProjection,
    ProcessingJobDto, ScheduledJobDto, StateJobDto, StateListing, SucceededJobDto,
};
pub use queue::{QueueBackend, QueueCounts, QueueRegistry, QueueSnapshot, TableJobQueue};
pub use rocket_stage::stage;
pub use session::{IsolationLevel, SessionFactory, SqliteSessionFactory};
pub use state_data::{decode_state_data, StateData};
pub use states::{JobId, JobRow, StateKind, TimelineKind};
pub use timeline::{daily_buckets, daily_keys, hourly_buckets, hourly_keys, resolve_counts};
