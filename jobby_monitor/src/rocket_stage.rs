use crate::{
    config::Config,
    monitoring::{MonitoringApi, MonitoringOptions, SqliteMonitoringApi},
    session::SqliteSessionFactory,
    JobCatalog, QueueRegistry,
};

use rocket::{
    fairing::AdHoc,
    request::{FromRequest, Outcome, Request},
    Build, Rocket, State,
};

type Result<T, E = crate::Error> = anyhow::Result<T, E>;

fn build(rocket: &Rocket<Build>, queues: QueueRegistry) -> Result<SqliteMonitoringApi> {
    let config = Config::from(rocket)?;
    let sessions = SqliteSessionFactory::new(config.database.clone(), config.busy_timeout()?);
    let catalog = JobCatalog::from_inventory();
    tracing::debug!("{} job methods registered for monitoring", catalog.len());
    Ok(MonitoringApi::new(
        sessions,
        catalog,
        queues,
        MonitoringOptions {
            min_displayed_count: config.min_displayed_count,
            queue_preview_count: config.queue_preview_count,
        },
    ))
}

/// Manages a `SqliteMonitoringApi` reading the `monitoring` config table.
/// Job methods come from `inventory`, queue names from `queues`.
pub fn stage(queues: QueueRegistry) -> AdHoc {
    AdHoc::try_on_ignite("setup jobby monitoring", |rocket| async move {
        match build(&rocket, queues) {
            Ok(api) => {
                tracing::info!(
                    "jobby monitoring reading from {}",
                    api.sessions().path()
                );
                Ok(rocket.manage(api))
            }
            Err(e) => {
                tracing::error!("Error creating jobby monitoring: {e:?}");
                Err(rocket)
            }
        }
    })
}

#[async_trait::async_trait]
impl<'r> FromRequest<'r> for &'r SqliteMonitoringApi {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match request.guard::<&State<SqliteMonitoringApi>>().await {
            Outcome::Success(api) => Outcome::Success(api.inner()),
            Outcome::Error((status, ())) => Outcome::Error((status, ())),
            Outcome::Forward(f) => Outcome::Forward(f),
        }
    }
}
