//! Core meter engine
//!
//! The Meter is responsible for:
//! - Pacing cycles through the [`CycleScheduler`]
//! - Keeping cross-account credentials fresh
//! - Reading the device's reported state
//! - Asking the active [`Source`] for a desired patch
//! - Writing the patch only when it changes something
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────┐
//!                 │  CycleScheduler  │
//!                 └────────┬─────────┘
//!                          │ proceed
//!                          ▼
//! ┌──────────────┐   ┌──────────┐   ┌───────────────┐
//! │ Credential   │◄──│  Meter   │──►│ ShadowClient  │
//! │ Manager      │   └────┬─────┘   │ (get/update)  │
//! └──────────────┘        │         └───────────────┘
//!                         ▼
//!                   ┌──────────┐
//!                   │  Source  │  reported ─► patch
//!                   └──────────┘
//! ```
//!
//! ## Cycle Flow
//!
//! 1. Wait for the next deadline
//! 2. Refresh credentials if unset or expiring
//! 3. Read `state.reported`
//! 4. Optionally log the device temperature
//! 5. `source.update(reported)`
//! 6. Write `state.desired` iff the patch differs from what is reported

use std::future::Future;
use std::time::Duration;

use crate::config::{CallPolicy, EngineConfig, FailurePolicy};
use crate::credentials::CredentialManager;
use crate::error::{Error, Result};
use crate::scheduler::CycleScheduler;
use crate::state::{DesiredPatch, ReportedState, c_to_f};
use crate::traits::{ShadowClient, Source};
use tracing::{debug, error, info, trace, warn};

/// What a single cycle did
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The patch differed from the reported state and was written
    Updated(DesiredPatch),
    /// Nothing to change; no write was issued
    Unchanged,
}

/// Shadow synchronizer
///
/// Owns the device transport and the credential manager. Exactly one cycle
/// is in flight at any time; nothing is spawned.
///
/// ## Lifecycle
///
/// 1. Create with [`Meter::new()`]
/// 2. Drive a source with [`Meter::run()`] or [`Meter::run_until()`]
/// 3. On shutdown the meter is cleared (all lights and the gauge to zero)
pub struct Meter {
    /// Device shadow transport
    shadow: Box<dyn ShadowClient>,

    /// Cross-account credential lifecycle
    credentials: CredentialManager,

    /// Engine settings
    config: EngineConfig,

    /// Timeout and failure handling for network calls
    policy: CallPolicy,
}

impl Meter {
    /// Create a new meter engine
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `config` is invalid. No I/O happens here.
    pub fn new(
        config: EngineConfig,
        shadow: Box<dyn ShadowClient>,
        credentials: CredentialManager,
    ) -> Result<Self> {
        config.validate()?;
        let policy = config.call_policy();

        Ok(Self {
            shadow,
            credentials,
            config,
            policy,
        })
    }

    /// Override the network call policy
    pub fn with_call_policy(mut self, policy: CallPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The thing being driven
    pub fn thing_name(&self) -> &str {
        &self.config.thing_name
    }

    /// The credential manager
    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    /// Run cycles forever (until an error under [`FailurePolicy::Terminate`])
    pub async fn run(&mut self, source: &mut dyn Source) -> Result<()> {
        self.run_until(source, std::future::pending::<()>()).await
    }

    /// Run cycles until `shutdown` resolves, then clear the meter
    ///
    /// `shutdown` is observed between cycles, never in the middle of one.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown (the clear write is best-effort)
    /// - `Err(Error)`: Configuration error, or a cycle failure under
    ///   [`FailurePolicy::Terminate`]
    pub async fn run_until<F>(&mut self, source: &mut dyn Source, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut scheduler = CycleScheduler::for_source(self.config.min_cycle, source.min_cycle());
        info!(
            "Driving {} from source {} every {:?}",
            self.config.thing_name,
            source.name(),
            scheduler.min_interval()
        );

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = scheduler.wait_and_advance() => {}
            }

            match self.cycle(source).await {
                Ok(CycleOutcome::Updated(_)) => trace!("Cycle complete: updated"),
                Ok(CycleOutcome::Unchanged) => trace!("Cycle complete: unchanged"),
                Err(e) if e.is_configuration() => return Err(e),
                Err(e) => match self.policy.on_failure {
                    FailurePolicy::Terminate => return Err(e),
                    FailurePolicy::SkipCycle => {
                        error!("Cycle failed, waiting for next cycle: {}", e);
                    }
                },
            }
        }

        if let Err(e) = self.clear().await {
            error!("Failed to clear meter on shutdown: {}", e);
        }

        Ok(())
    }

    /// Run exactly one read–compute–conditionally-write cycle
    ///
    /// Credential failures surface before any device I/O.
    pub async fn cycle(&mut self, source: &mut dyn Source) -> Result<CycleOutcome> {
        self.ensure_credentials().await?;

        let reported = call_with_timeout(
            self.policy.timeout,
            "shadow read",
            self.shadow.get_reported(&self.config.thing_name),
        )
        .await?;
        debug!("Reported: {:?}", reported);

        if self.config.show_temperature {
            log_temperature(&reported);
        }

        let desired = source.update(&reported).await?;
        if !desired.differs_from(&reported) {
            debug!("No change for {}", self.config.thing_name);
            return Ok(CycleOutcome::Unchanged);
        }

        debug!("Update: {:?}", desired);
        call_with_timeout(
            self.policy.timeout,
            "shadow write",
            self.shadow.update_desired(&self.config.thing_name, &desired),
        )
        .await?;

        Ok(CycleOutcome::Updated(desired))
    }

    /// Push the all-off state regardless of what is reported
    pub async fn clear(&mut self) -> Result<()> {
        self.ensure_credentials().await?;

        call_with_timeout(
            self.policy.timeout,
            "shadow write",
            self.shadow
                .update_desired(&self.config.thing_name, &DesiredPatch::all_off()),
        )
        .await?;

        info!("Cleared {}", self.config.thing_name);
        Ok(())
    }

    /// Refresh credentials when unset or expiring and hand them to the shadow client
    ///
    /// If the shadow client rejects fresh credentials they are discarded, so
    /// the next cycle assumes the role again.
    async fn ensure_credentials(&mut self) -> Result<()> {
        let refreshed = call_with_timeout(
            self.policy.timeout,
            "credential refresh",
            self.credentials.refresh_if_needed(),
        )
        .await?;

        if let Some(credentials) = refreshed
            && let Err(e) = self.shadow.apply_credentials(credentials)
        {
            self.credentials.invalidate();
            return Err(e);
        }
        Ok(())
    }
}

async fn call_with_timeout<T, F>(
    limit: Option<Duration>,
    operation: &'static str,
    call: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(after) => tokio::time::timeout(after, call)
            .await
            .map_err(|_| Error::Timeout { operation, after })?,
        None => call.await,
    }
}

fn log_temperature(reported: &ReportedState) {
    match reported.get_f64("temp") {
        Some(celsius) => info!("Meter temperature: {:.1} F", c_to_f(celsius)),
        None => warn!("Meter did not report a temperature"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_wraps_hung_call() {
        let result: Result<()> = call_with_timeout(
            Some(Duration::from_secs(5)),
            "shadow read",
            std::future::pending(),
        )
        .await;

        match result {
            Err(Error::Timeout { operation, after }) => {
                assert_eq!(operation, "shadow read");
                assert_eq!(after, Duration::from_secs(5));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_timeout_passes_through() {
        let result = call_with_timeout(None, "shadow read", async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
