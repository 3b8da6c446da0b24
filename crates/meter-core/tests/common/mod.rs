//! Test doubles and common utilities for engine contract tests
//!
//! These doubles record what the engine does without talking to a device.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use meter_core::credentials::CredentialSet;
use meter_core::error::{Error, Result};
use meter_core::{CredentialIssuer, DesiredPatch, ReportedState, ShadowClient, Source};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A shadow client that serves a fixed reported state and records writes
#[derive(Clone, Default)]
pub struct RecordingShadow {
    reported: Arc<Mutex<ReportedState>>,
    writes: Arc<Mutex<Vec<DesiredPatch>>>,
    applied: Arc<Mutex<Vec<CredentialSet>>>,
    read_count: Arc<AtomicUsize>,
    failing_reads: Arc<AtomicUsize>,
    failing_writes: Arc<AtomicBool>,
    hang_reads: Arc<AtomicBool>,
    rejected_credentials: Arc<AtomicUsize>,
    /// Merge every write into the reported state, like a converged device
    reflect_writes: bool,
}

impl RecordingShadow {
    pub fn new(reported: ReportedState) -> Self {
        Self {
            reported: Arc::new(Mutex::new(reported)),
            ..Self::default()
        }
    }

    /// A shadow whose reported state follows the desired writes
    pub fn converging(reported: ReportedState) -> Self {
        Self {
            reflect_writes: true,
            ..Self::new(reported)
        }
    }

    /// Make the next `n` reads fail
    pub fn fail_next_reads(&self, n: usize) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Make every write fail
    pub fn fail_writes(&self) {
        self.failing_writes.store(true, Ordering::SeqCst);
    }

    /// Make every read hang forever
    pub fn hang_reads(&self) {
        self.hang_reads.store(true, Ordering::SeqCst);
    }

    /// Make the next `n` credential swaps fail
    pub fn reject_next_credentials(&self, n: usize) {
        self.rejected_credentials.store(n, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<DesiredPatch> {
        self.writes.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    pub fn read_count(&self) -> usize {
        self.read_count.load(Ordering::SeqCst)
    }

    pub fn applied_credentials(&self) -> Vec<CredentialSet> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl ShadowClient for RecordingShadow {
    async fn get_reported(&self, _thing_name: &str) -> Result<ReportedState> {
        if self.hang_reads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.read_count.fetch_add(1, Ordering::SeqCst);

        let remaining = self.failing_reads.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_reads.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::shadow("connection reset"));
        }

        Ok(self.reported.lock().unwrap().clone())
    }

    async fn update_desired(&self, _thing_name: &str, patch: &DesiredPatch) -> Result<()> {
        if self.failing_writes.load(Ordering::SeqCst) {
            return Err(Error::shadow("write rejected"));
        }
        self.writes.lock().unwrap().push(patch.clone());

        if self.reflect_writes {
            let mut reported = self.reported.lock().unwrap();
            let mut next = reported.clone();
            for (field, value) in patch.iter() {
                next = next.with(field.clone(), value.clone());
            }
            *reported = next;
        }
        Ok(())
    }

    fn apply_credentials(&mut self, credentials: &CredentialSet) -> Result<()> {
        let remaining = self.rejected_credentials.load(Ordering::SeqCst);
        if remaining > 0 {
            self.rejected_credentials.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::credential("client rebuild failed"));
        }
        self.applied.lock().unwrap().push(credentials.clone());
        Ok(())
    }
}

/// An issuer handing out credentials with a fixed lifetime
#[derive(Clone)]
pub struct ScriptedIssuer {
    lifetime: chrono::Duration,
    calls: Arc<AtomicUsize>,
    requested: Arc<Mutex<Vec<(String, String, Duration)>>>,
    failing: Arc<AtomicBool>,
}

impl ScriptedIssuer {
    pub fn new(lifetime: chrono::Duration) -> Self {
        Self {
            lifetime,
            calls: Arc::new(AtomicUsize::new(0)),
            requested: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(String, String, Duration)> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialIssuer for ScriptedIssuer {
    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
        duration: Duration,
    ) -> Result<CredentialSet> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested
            .lock()
            .unwrap()
            .push((role_arn.to_string(), session_name.to_string(), duration));

        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::credential("AccessDenied"));
        }

        Ok(CredentialSet {
            access_key_id: format!("ASIA{call}"),
            secret_access_key: "secret".to_string(),
            session_token: "token".to_string(),
            expiration: Utc::now() + self.lifetime,
        })
    }
}

/// A source that replays a script of patches (the last one repeats)
pub struct ScriptedSource {
    patches: Vec<DesiredPatch>,
    min_cycle: Duration,
    updates: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<ReportedState>>>,
}

impl ScriptedSource {
    pub fn new(patches: Vec<DesiredPatch>) -> Self {
        Self {
            patches,
            min_cycle: Duration::from_secs(4),
            updates: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn repeating(patch: DesiredPatch) -> Self {
        Self::new(vec![patch])
    }

    pub fn with_min_cycle(mut self, min_cycle: Duration) -> Self {
        self.min_cycle = min_cycle;
        self
    }

    /// Shared counter of update calls
    pub fn update_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.updates)
    }

    /// Shared log of the reported states the source was shown
    pub fn seen_log(&self) -> Arc<Mutex<Vec<ReportedState>>> {
        Arc::clone(&self.seen)
    }
}

#[async_trait]
impl Source for ScriptedSource {
    fn name(&self) -> &str {
        "Scripted"
    }

    fn min_cycle(&self) -> Duration {
        self.min_cycle
    }

    async fn update(&mut self, reported: &ReportedState) -> Result<DesiredPatch> {
        let index = self.updates.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(reported.clone());

        let patch = self
            .patches
            .get(index)
            .or_else(|| self.patches.last())
            .cloned()
            .unwrap_or_default();
        Ok(patch)
    }
}

/// A typical reported state for a lit meter
pub fn lit_meter() -> ReportedState {
    ReportedState::new()
        .with("meter", 87.0)
        .with("red", 50.0)
        .with("green", 0.0)
        .with("blue", 0.0)
        .with("temp", 22.0)
}

/// The all-off patch as a literal
pub fn all_off_literal() -> DesiredPatch {
    DesiredPatch::new()
        .with("meter", 0.0)
        .with("red", 0.0)
        .with("green", 0.0)
        .with("blue", 0.0)
}
