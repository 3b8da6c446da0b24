// # meter-core
//
// Synchronization engine for the ambient status meter.
//
// ## Architecture Overview
//
// This library drives a physical meter (a numeric gauge plus red, green and
// blue indicator lights) from one pluggable data source:
// - **Source**: Trait every data source implements (reported state -> desired patch)
// - **SourceRegistry**: Name -> factory lookup for sources selected at runtime
// - **OptionStore**: Persisted per-source option defaults with write-through
// - **CycleScheduler**: Fixed-cadence wait without cumulative drift
// - **CredentialManager**: Cross-account temporary credential lifecycle
// - **Meter**: Run loop that reads the device shadow, asks the source, and
//   writes the desired document only when something changed
//
// ## Design Principles
//
// 1. **Sequential**: Exactly one cycle is in flight; nothing is spawned per cycle
// 2. **Plugin-Based**: Sources and device transports sit behind traits
// 3. **Diff-Suppressed**: The device is written only when the patch differs
// 4. **Library-First**: The `meter` binary is a thin bootstrap over this crate

pub mod traits;
pub mod engine;
pub mod registry;
pub mod options;
pub mod scheduler;
pub mod credentials;
pub mod state;
pub mod config;
pub mod error;

// Re-export core types for convenience
pub use traits::{Source, SourceFactory, ShadowClient, CredentialIssuer};
pub use engine::{Meter, CycleOutcome};
pub use registry::SourceRegistry;
pub use options::{OptionSpec, OptionStore, ResolvedOptions};
pub use scheduler::CycleScheduler;
pub use credentials::{CredentialManager, CredentialSet, CredentialStatus, RoleTarget};
pub use state::{DesiredPatch, ReportedState};
pub use config::{EngineConfig, FailurePolicy};
pub use error::{Error, Result};
