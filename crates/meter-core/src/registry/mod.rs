//! Plugin-based source registry
//!
//! The registry maps a source name, as typed on the command line, to the
//! factory that builds it. This keeps the binary free of hardcoded
//! if-else chains over source types.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meter_core::{OptionStore, SourceRegistry};
//! use std::time::Duration;
//!
//! let mut registry = SourceRegistry::new();
//! meter_sources::register_builtin(&mut registry);
//!
//! let mut store = OptionStore::in_memory();
//! let source = registry
//!     .create("OutsideTemp", &args, Duration::from_secs(4), &mut store)
//!     .await?;
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::options::OptionStore;
use crate::traits::{Source, SourceFactory};

/// Source registry for name-based source creation
///
/// Registration happens once at startup through `&mut self`; lookups are
/// read-only afterwards.
#[derive(Default)]
pub struct SourceRegistry {
    factories: BTreeMap<String, Box<dyn SourceFactory>>,
}

impl SourceRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source factory under `name`
    ///
    /// Registering the same name twice replaces the earlier factory.
    pub fn register(&mut self, name: impl Into<String>, factory: Box<dyn SourceFactory>) {
        self.factories.insert(name.into(), factory);
    }

    /// Check if a source name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Factory registered under `name`
    pub fn factory(&self, name: &str) -> Option<&dyn SourceFactory> {
        self.factories.get(name).map(|f| f.as_ref())
    }

    /// Registered `(name, description)` pairs, sorted by name
    pub fn list(&self) -> Vec<(&str, &'static str)> {
        self.factories
            .iter()
            .map(|(name, factory)| (name.as_str(), factory.description()))
            .collect()
    }

    /// Create the source registered under `name`
    ///
    /// # Errors
    ///
    /// - `Error::UnknownSource` if nothing is registered under `name`
    /// - Whatever the factory returns (typically `Error::Config`)
    pub async fn create(
        &self,
        name: &str,
        args: &[String],
        min_cycle: Duration,
        store: &mut OptionStore,
    ) -> Result<Box<dyn Source>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::UnknownSource(name.to_string()))?;

        factory.create(name, args, min_cycle, store).await
    }
}
