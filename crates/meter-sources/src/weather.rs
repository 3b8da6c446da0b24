//! Outside temperature from Open-Meteo
//!
//! Open-Meteo refreshes its current conditions hourly, so the source fetches
//! at most once per hour and has no opinion in between.

use async_trait::async_trait;
use meter_core::state::{METER, c_to_f};
use meter_core::{
    DesiredPatch, Error, OptionSpec, OptionStore, ReportedState, Result, Source, SourceFactory,
};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Open-Meteo forecast endpoint
const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Minimum time between two upstream fetches
const FETCH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Lowest cycle time this source runs at
const MIN_CYCLE_FLOOR: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current_weather: CurrentWeather,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature: f64,
    #[serde(default)]
    time: Option<String>,
}

/// Outside temperature in °F for a fixed location
#[derive(Debug)]
pub struct OutsideTemp {
    name: String,
    min_cycle: Duration,
    latitude: f64,
    longitude: f64,
    base_url: String,
    last_fetch: Option<Instant>,
    client: reqwest::Client,
}

impl OutsideTemp {
    /// `min_cycle` is raised to at least one minute
    pub fn new(name: impl Into<String>, min_cycle: Duration, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.into(),
            min_cycle: min_cycle.max(MIN_CYCLE_FLOOR),
            latitude,
            longitude,
            base_url: OPEN_METEO_URL.to_string(),
            last_fetch: None,
            client: crate::http_client(),
        }
    }

    /// Point at a different forecast endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn fetch_due(&self, now: Instant) -> bool {
        match self.last_fetch {
            Some(last) => now.duration_since(last) >= FETCH_INTERVAL,
            None => true,
        }
    }

    async fn fetch(&self) -> Result<CurrentWeather> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("latitude", self.latitude.to_string()),
                ("longitude", self.longitude.to_string()),
                ("current_weather", "true".to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::source(&self.name, format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::source(
                &self.name,
                format!("HTTP error: {}", response.status()),
            ));
        }

        let forecast: ForecastResponse = response
            .json()
            .await
            .map_err(|e| Error::source(&self.name, format!("Malformed forecast: {}", e)))?;
        Ok(forecast.current_weather)
    }
}

/// Parse `LAT,LON`
fn parse_coords(raw: &str) -> Result<(f64, f64)> {
    let invalid = || Error::config(format!("argument --coords: expected LAT,LON, got '{}'", raw));

    let (lat, lon) = raw.split_once(',').ok_or_else(invalid)?;
    let latitude: f64 = lat.trim().parse().map_err(|_| invalid())?;
    let longitude: f64 = lon.trim().parse().map_err(|_| invalid())?;

    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(invalid());
    }
    Ok((latitude, longitude))
}

#[async_trait]
impl Source for OutsideTemp {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_cycle(&self) -> Duration {
        self.min_cycle
    }

    async fn update(&mut self, _reported: &ReportedState) -> Result<DesiredPatch> {
        let now = Instant::now();
        if !self.fetch_due(now) {
            return Ok(DesiredPatch::new());
        }

        let weather = self.fetch().await?;
        self.last_fetch = Some(now);
        info!(
            "Outside: {:.1} C at {}",
            weather.temperature,
            weather.time.as_deref().unwrap_or("unknown time")
        );

        Ok(DesiredPatch::new().with(METER, c_to_f(weather.temperature)))
    }
}

/// Factory for [`OutsideTemp`]
pub struct OutsideTempFactory;

#[async_trait]
impl SourceFactory for OutsideTempFactory {
    fn description(&self) -> &'static str {
        "Outside temperature from Open-Meteo.com"
    }

    fn options(&self) -> Vec<OptionSpec> {
        vec![
            OptionSpec::value("--coords")
                .required()
                .metavar("LAT,LON")
                .help("location to report the temperature for"),
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
        let (latitude, longitude) = parse_coords(options.require_str("coords")?)?;
        Ok(Box::new(OutsideTemp::new(name, min_cycle, latitude, longitude)))
    }
}
