//! Configuration types for the meter engine
//!
//! This module defines the settings the [`Meter`](crate::Meter) is built from.
//! The binary fills them from resolved command-line options.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::credentials::RoleTarget;

/// Main engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// IoT thing whose shadow drives the meter
    #[serde(default = "default_thing_name")]
    pub thing_name: String,

    /// Process-wide minimum time between cycles
    #[serde(default = "default_min_cycle", with = "duration_secs")]
    pub min_cycle: Duration,

    /// Account id or role ARN to assume before talking to the device
    #[serde(default)]
    pub assume_role: Option<String>,

    /// Log the device's temperature (°F) every cycle
    #[serde(default)]
    pub show_temperature: bool,

    /// Timeout applied to every credential, shadow read and shadow write call
    ///
    /// Set to 0 to disable (a hung upstream then stalls the loop).
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// What to do when a cycle fails
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl EngineConfig {
    /// Create a configuration for `thing_name` with defaults
    pub fn new(thing_name: impl Into<String>) -> Self {
        Self {
            thing_name: thing_name.into(),
            ..Self::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.thing_name.trim().is_empty() {
            return Err(crate::Error::config("Thing name cannot be empty"));
        }
        if self.min_cycle.is_zero() {
            return Err(crate::Error::config("Minimum cycle time must be > 0"));
        }
        if let Some(role) = &self.assume_role {
            RoleTarget::parse(role)?;
        }
        Ok(())
    }

    /// Network call policy derived from this configuration
    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy {
            timeout: (self.call_timeout_secs > 0)
                .then(|| Duration::from_secs(self.call_timeout_secs)),
            on_failure: self.failure_policy,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thing_name: default_thing_name(),
            min_cycle: default_min_cycle(),
            assume_role: None,
            show_temperature: false,
            call_timeout_secs: default_call_timeout_secs(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// Behaviour when a cycle fails with a credential or transport error
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Propagate the error out of the run loop
    #[default]
    Terminate,
    /// Log the error and wait for the next scheduled cycle
    SkipCycle,
}

impl std::str::FromStr for FailurePolicy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "terminate" => Ok(Self::Terminate),
            "skip" | "skip_cycle" | "skip-cycle" => Ok(Self::SkipCycle),
            other => Err(crate::Error::config(format!(
                "Unknown failure policy '{}' (expected terminate or skip)",
                other
            ))),
        }
    }
}

/// Timeout and failure handling for network calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    pub timeout: Option<Duration>,
    pub on_failure: FailurePolicy,
}

impl Default for CallPolicy {
    fn default() -> Self {
        EngineConfig::default().call_policy()
    }
}

fn default_thing_name() -> String {
    "pico_w_meter".to_string()
}

fn default_min_cycle() -> Duration {
    Duration::from_secs(4)
}

fn default_call_timeout_secs() -> u64 {
    30
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
