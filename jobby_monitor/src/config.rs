use crate::Error;

use std::time::Duration;

use rocket::{
    figment::{providers::Serialized, Figment},
    Build, Rocket,
};
use serde::Deserialize;

type Result<T, E = crate::Error> = anyhow::Result<T, E>;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    // SQLite path, or a file: URI
    pub(crate) database: String,
    // humantime string, e.g. "5s"
    pub(crate) busy_timeout: String,
    // Floor for the per-state counts shown on the dashboard
    #[serde(default)]
    pub(crate) min_displayed_count: Option<u64>,
    pub(crate) queue_preview_count: usize,
}

impl Config {
    pub(crate) fn from(rocket: &Rocket<Build>) -> Result<Self> {
        Self::from_figment(rocket.figment())
    }

    pub(crate) fn from_figment(figment: &Figment) -> Result<Self> {
        Ok(Self::figment(figment).extract::<Self>()?)
    }

    fn figment(figment: &Figment) -> Figment {
        let figment = Figment::from(figment)
            .focus("monitoring")
            .join(Serialized::default("busy_timeout", "5s"))
            .join(Serialized::default("queue_preview_count", 5_usize));

        figment
    }

    pub(crate) fn busy_timeout(&self) -> Result<Duration> {
        humantime::parse_duration(&self.busy_timeout)
            .map_err(|e| Error::InvalidDuration(self.busy_timeout.clone(), e))
    }
}
