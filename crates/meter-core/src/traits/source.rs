// # Source Trait
//
// Defines the contract every pluggable data source satisfies.
//
// ## Implementations
//
// - Built-in sources: `meter-sources` crate (weather, OctoPrint, timers, UPS)
// - Anything else registered into a `SourceRegistry`
//
// ## Usage
//
// ```rust,ignore
// use meter_core::{OptionStore, ReportedState, SourceRegistry};
// use std::time::Duration;
//
// let mut store = OptionStore::in_memory();
// let mut source = registry
//     .create("Pomodoro", &args, Duration::from_secs(4), &mut store)
//     .await?;
//
// let patch = source.update(&ReportedState::new()).await?;
// ```

use async_trait::async_trait;
use std::time::Duration;

use crate::options::{OptionSpec, OptionStore};
use crate::state::{DesiredPatch, ReportedState};

/// Trait for data source implementations
///
/// A source is driven by the [`Meter`](crate::Meter) once per cycle. It receives
/// a read-only snapshot of the device's reported state and answers with the
/// fields it wants changed.
///
/// # Cadence
///
/// [`Source::min_cycle`] starts from the process-wide hint passed to the
/// factory. A source backed by a rate-limited upstream may raise it, never
/// lower it. The engine runs at `max(global, source.min_cycle())`.
///
/// # Rules
///
/// - ✅ Block inside `update` on network I/O, subprocesses or stream reads
/// - ✅ Return an empty patch to express "no opinion this cycle"
/// - ✅ Keep private state between cycles (`update` takes `&mut self`)
/// - ❌ Spawn background work that outlives the `update` call
/// - ❌ Write to the device (owned by `Meter`)
/// - ❌ Swallow upstream failures into a corrupt patch; return `Err` instead
#[async_trait]
pub trait Source: Send {
    /// Name of the source (its registry key and option namespace)
    fn name(&self) -> &str;

    /// Minimum interval between two `update` calls
    fn min_cycle(&self) -> Duration;

    /// Compute the desired patch for this cycle
    ///
    /// # Parameters
    ///
    /// - `reported`: The device's last reported state
    ///
    /// # Returns
    ///
    /// - `Ok(DesiredPatch)`: Fields to change (possibly empty)
    /// - `Err(Error)`: Upstream or computation failure
    async fn update(&mut self, reported: &ReportedState) -> Result<DesiredPatch, crate::Error>;
}

/// Helper trait for constructing sources from raw option tokens
#[async_trait]
pub trait SourceFactory: Send + Sync {
    /// One-line description shown in the source listing
    fn description(&self) -> &'static str;

    /// Options this source accepts
    fn options(&self) -> Vec<OptionSpec> {
        Vec::new()
    }

    /// Create a Source instance
    ///
    /// Options are resolved through `store` in the source's own namespace
    /// before any source-specific initialization runs.
    ///
    /// # Parameters
    ///
    /// - `name`: The registry name (used as the option namespace)
    /// - `args`: Raw option tokens for this source
    /// - `min_cycle`: Inherited process-wide minimum cycle time
    /// - `store`: Persisted option defaults
    ///
    /// # Returns
    ///
    /// A boxed Source trait object
    async fn create(
        &self,
        name: &str,
        args: &[String],
        min_cycle: Duration,
        store: &mut OptionStore,
    ) -> Result<Box<dyn Source>, crate::Error>;
}
