//! Device-reported temperature

use async_trait::async_trait;
use meter_core::state::{METER, c_to_f};
use meter_core::{DesiredPatch, Error, OptionStore, ReportedState, Result, Source, SourceFactory};
use std::time::Duration;

/// Shows the temperature the meter itself reports, in °F
#[derive(Debug)]
pub struct InsideTemp {
    name: String,
    min_cycle: Duration,
}

impl InsideTemp {
    pub fn new(name: impl Into<String>, min_cycle: Duration) -> Self {
        Self {
            name: name.into(),
            min_cycle,
        }
    }
}

#[async_trait]
impl Source for InsideTemp {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_cycle(&self) -> Duration {
        self.min_cycle
    }

    async fn update(&mut self, reported: &ReportedState) -> Result<DesiredPatch> {
        let celsius = reported
            .get_f64("temp")
            .ok_or_else(|| Error::source(&self.name, "device did not report a temperature"))?;

        Ok(DesiredPatch::new().with(METER, c_to_f(celsius)))
    }
}

/// Factory for [`InsideTemp`]
pub struct InsideTempFactory;

#[async_trait]
impl SourceFactory for InsideTempFactory {
    fn description(&self) -> &'static str {
        "Temperature reported by the meter itself"
    }

    async fn create(
        &self,
        name: &str,
        args: &[String],
        min_cycle: Duration,
        store: &mut OptionStore,
    ) -> Result<Box<dyn Source>> {
        store.resolve(name, &self.options(), args).await?;
        Ok(Box::new(InsideTemp::new(name, min_cycle)))
    }
}
