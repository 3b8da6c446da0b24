//! OctoPrint print job status

use async_trait::async_trait;
use meter_core::state::{BLUE, GREEN, METER, RED};
use meter_core::{
    DesiredPatch, Error, OptionSpec, OptionStore, ReportedState, Result, Source, SourceFactory,
};
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::info;

/// Number of completion samples that must match to call a print stalled
const STALL_WINDOW: usize = 5;

/// Indicator level for state lights
const LIGHT: f64 = 25.0;

#[derive(Debug, Deserialize)]
struct JobResponse {
    state: String,
    #[serde(default)]
    progress: Option<Progress>,
}

#[derive(Debug, Deserialize)]
struct Progress {
    #[serde(default)]
    completion: Option<f64>,
}

/// Current print completion from an OctoPrint server
///
/// # Security
///
/// The Debug implementation does NOT expose the API key.
pub struct OctoPrint {
    name: String,
    min_cycle: Duration,
    hostname: String,
    api_key: String,
    history: VecDeque<f64>,
    client: reqwest::Client,
}

impl std::fmt::Debug for OctoPrint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctoPrint")
            .field("name", &self.name)
            .field("hostname", &self.hostname)
            .field("api_key", &"<REDACTED>")
            .field("history", &self.history)
            .finish()
    }
}

impl OctoPrint {
    pub fn new(
        name: impl Into<String>,
        min_cycle: Duration,
        hostname: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            min_cycle,
            hostname: hostname.into(),
            api_key: api_key.into(),
            history: std::iter::repeat_n(-1.0, STALL_WINDOW).collect(),
            client: crate::http_client(),
        }
    }

    async fn fetch_job(&self) -> Result<JobResponse> {
        let url = format!("http://{}/api/job", self.hostname);
        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| Error::source(&self.name, format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::source(
                &self.name,
                format!("HTTP error: {}", response.status()),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| Error::source(&self.name, format!("Malformed job response: {}", e)))
    }

    /// Record a completion sample and build the patch for `state`
    fn observe(&mut self, state: &str, completion: f64) -> DesiredPatch {
        self.history.push_back(completion);
        self.history.pop_front();

        // Flat progress usually means the filament sensor paused the job
        let stalled = self.history.iter().all(|sample| *sample == completion);

        let mut patch = DesiredPatch::new()
            .with(METER, completion)
            .with(RED, 0.0)
            .with(GREEN, 0.0)
            .with(BLUE, if stalled { LIGHT } else { 0.0 });

        match state {
            "Operational" => patch.set(GREEN, LIGHT),
            "Printing" => {}
            _ => patch.set(RED, LIGHT),
        }
        patch
    }
}

#[async_trait]
impl Source for OctoPrint {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_cycle(&self) -> Duration {
        self.min_cycle
    }

    async fn update(&mut self, _reported: &ReportedState) -> Result<DesiredPatch> {
        let job = self.fetch_job().await?;
        let completion = job
            .progress
            .and_then(|progress| progress.completion)
            .unwrap_or(0.0);
        info!("{} {:.1}%", job.state, completion);

        Ok(self.observe(&job.state, completion))
    }
}

/// Factory for [`OctoPrint`]
pub struct OctoPrintFactory;

#[async_trait]
impl SourceFactory for OctoPrintFactory {
    fn description(&self) -> &'static str {
        "OctoPrint current print status"
    }

    fn options(&self) -> Vec<OptionSpec> {
        vec![
            OptionSpec::value("--hostname")
                .required()
                .help("OctoPrint host, optionally with :port"),
            OptionSpec::value("--api-key").required(),
        ]
    }

    async fn create(
        &self,
        name: &str,
        args: &[String],
        min_cycle: Duration,
        store: &mut OptionStore,
    ) -> Result<Box<dyn Source>> {
        let options = store.resolve(name, &self.options(), args).await?;
        Ok(Box::new(OctoPrint::new(
            name,
            min_cycle,
            options.require_str("hostname")?,
            options.require_str("api_key")?,
        )))
    }
}
