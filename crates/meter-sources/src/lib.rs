// # Built-in Sources
//
// Data sources shipped with the `meter` binary.
//
// | Name             | Upstream                          | Meter shows            |
// |------------------|-----------------------------------|------------------------|
// | `InsideTemp`     | The device's own `temp` report    | °F                     |
// | `OutsideTemp`    | Open-Meteo current weather        | °F (hourly)            |
// | `OctoPrint`      | OctoPrint `/api/job`              | Print completion %     |
// | `Pomodoro`       | Local clock                       | Phase progress %       |
// | `CountdownTimer` | Local clock                       | Remaining time %       |
// | `ApcUps`         | apcupsd network information server| Battery charge %       |
//
// ## Rules
//
// - ✅ Resolve options in the source's own namespace before anything else
// - ✅ One upstream request per `update` at most
// - ❌ NO writes to the device (owned by the Meter)
// - ❌ NO background tasks

mod apcupsd;
mod inside_temp;
mod octoprint;
mod timers;
mod weather;

#[cfg(test)]
pub(crate) mod test_support;

pub use apcupsd::{ApcUps, ApcUpsFactory};
pub use inside_temp::{InsideTemp, InsideTempFactory};
pub use octoprint::{OctoPrint, OctoPrintFactory};
pub use timers::{CountdownTimer, CountdownTimerFactory, Direction, Pomodoro, PomodoroFactory};
pub use weather::{OutsideTemp, OutsideTempFactory};

use meter_core::SourceRegistry;
use std::time::Duration;

/// Timeout for upstream HTTP requests made by sources
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Register every built-in source under its name
pub fn register_builtin(registry: &mut SourceRegistry) {
    registry.register("InsideTemp", Box::new(InsideTempFactory));
    registry.register("OutsideTemp", Box::new(OutsideTempFactory));
    registry.register("OctoPrint", Box::new(OctoPrintFactory));
    registry.register("Pomodoro", Box::new(PomodoroFactory));
    registry.register("CountdownTimer", Box::new(CountdownTimerFactory));
    registry.register("ApcUps", Box::new(ApcUpsFactory));
}

/// A registry holding every built-in source
pub fn builtin_registry() -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    register_builtin(&mut registry);
    registry
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_default()
}
