// # Option Store
//
// File-backed store of per-namespace option values with crash recovery.
//
// ## Purpose
//
// Remembers the options a source (or the process itself) was last run with,
// so a later invocation can omit them. The store is both a cache and a
// write-through log: every successful resolution rewrites the whole file.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Automatic backup: Keeps .backup of the previous file
// - Recovery: Falls back to backup, then to an empty store, on corruption
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "namespaces": {
//     "MAIN": { "thing_name": "pico_w_meter", "period": "4" },
//     "Pomodoro": { "work_time": "25", "break_time": "5", "direction": "down" }
//   }
// }
// ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, trace, warn};

use super::{OptionSpec, ResolvedOptions, layer_values, parse_all, parse_known};
use crate::error::{Error, Result};

/// Namespace holding the process-wide options
pub const GLOBAL_NAMESPACE: &str = "MAIN";

/// Store file format version
const STORE_FILE_VERSION: &str = "1.0";

type Namespace = BTreeMap<String, String>;

/// Serializable store file format
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct StoreFileFormat {
    version: String,
    #[serde(default)]
    namespaces: BTreeMap<String, Namespace>,
}

/// Persisted option defaults, keyed by namespace then option name
///
/// Passed explicitly to the process bootstrap and to every source factory;
/// there is no global instance.
///
/// # Example
///
/// ```rust,no_run
/// use meter_core::{OptionSpec, OptionStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut store = OptionStore::open("/home/pi/.meter.json").await?;
///     let specs = [OptionSpec::value("--coords").required()];
///
///     // Falls back to the coordinates remembered from the last run
///     let options = store.resolve("OutsideTemp", &specs, &[]).await?;
///     println!("{:?}", options.get_str("coords"));
///     Ok(())
/// }
/// ```
#[derive(Debug, Default)]
pub struct OptionStore {
    path: Option<PathBuf>,
    namespaces: BTreeMap<String, Namespace>,
    flushes: usize,
}

impl OptionStore {
    /// Store that never touches disk (tests, one-off runs)
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the store at `path`, creating parent directories as needed
    ///
    /// A missing file yields an empty store. A corrupted file is recovered
    /// from its backup, or replaced by an empty store.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::option_store(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let namespaces = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path: Some(path),
            namespaces,
            flushes: 0,
        })
    }

    /// Backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Persisted value for `namespace`/`key`
    pub fn get(&self, namespace: &str, key: &str) -> Option<&str> {
        self.namespaces
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .map(String::as_str)
    }

    /// Set a value in memory (persisted on the next flush)
    pub fn set(&mut self, namespace: &str, key: impl Into<String>, value: impl Into<String>) {
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(key.into(), value.into());
    }

    /// Whether `namespace` exists in the store
    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.namespaces.contains_key(namespace)
    }

    /// Number of completed flushes since this store was opened
    pub fn flush_count(&self) -> usize {
        self.flushes
    }

    /// Resolve `args` for `namespace`; every token must be recognised
    ///
    /// # Errors
    ///
    /// - `Error::Config` for unknown, malformed or missing options
    /// - `Error::HelpRequested` when `--help` is present
    /// - `Error::OptionStore` when the write-through fails
    pub async fn resolve(
        &mut self,
        namespace: &str,
        specs: &[OptionSpec],
        args: &[String],
    ) -> Result<ResolvedOptions> {
        let explicit = parse_all(namespace, specs, args)?;
        self.finish_resolution(namespace, specs, explicit).await
    }

    /// Resolve the tokens of `args` that `specs` recognise for `namespace`
    ///
    /// Recognised options may appear anywhere in `args`. Unrecognised tokens
    /// are returned in order for the next consumer.
    pub async fn resolve_known(
        &mut self,
        namespace: &str,
        program: &str,
        specs: &[OptionSpec],
        args: &[String],
    ) -> Result<(ResolvedOptions, Vec<String>)> {
        let (explicit, rest) = parse_known(program, specs, args)?;
        let resolved = self.finish_resolution(namespace, specs, explicit).await?;
        Ok((resolved, rest))
    }

    async fn finish_resolution(
        &mut self,
        namespace: &str,
        specs: &[OptionSpec],
        explicit: BTreeMap<String, String>,
    ) -> Result<ResolvedOptions> {
        let resolved = layer_values(specs, explicit, self.namespaces.get(namespace))?;

        let section = self.namespaces.entry(namespace.to_string()).or_default();
        for spec in specs.iter().filter(|s| s.persist) {
            let dest = spec.dest();
            if let Some(value) = resolved.get_str(&dest) {
                section.insert(dest, value.to_string());
            }
        }

        self.flush().await?;
        debug!("Resolved options for {}: {:?}", namespace, resolved);
        Ok(resolved)
    }

    /// Rewrite the whole store to disk (no-op for in-memory stores)
    pub async fn flush(&mut self) -> Result<()> {
        if let Some(path) = &self.path {
            Self::write_store(path, &self.namespaces).await?;
        }
        self.flushes += 1;
        Ok(())
    }

    /// Load store from file with automatic recovery
    async fn load_with_recovery(path: &Path) -> Result<BTreeMap<String, Namespace>> {
        match Self::load(path).await {
            Ok(namespaces) => {
                debug!("Loaded option store: {} namespace(s)", namespaces.len());
                Ok(namespaces)
            }
            Err(Error::Json(e)) => {
                warn!(
                    "Option store {} appears corrupted: {}. Attempting recovery from backup.",
                    path.display(),
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    warn!("No backup file found. Starting with empty option store.");
                    return Ok(BTreeMap::new());
                }

                match Self::load(&backup_path).await {
                    Ok(namespaces) => {
                        info!("Recovered option store from backup");
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            error!("Failed to restore option store from backup: {}", restore_err);
                        }
                        Ok(namespaces)
                    }
                    Err(backup_err) => {
                        error!(
                            "Backup also unreadable: {}. Starting with empty option store.",
                            backup_err
                        );
                        Ok(BTreeMap::new())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn load(path: &Path) -> Result<BTreeMap<String, Namespace>> {
        if !path.exists() {
            debug!("Option store does not exist yet: {}", path.display());
            return Ok(BTreeMap::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::option_store(format!("Failed to read {}: {}", path.display(), e))
        })?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        let file: StoreFileFormat = serde_json::from_str(&content)?;
        if file.version != STORE_FILE_VERSION {
            warn!(
                "Option store version mismatch: expected {}, got {}. Attempting to load anyway.",
                STORE_FILE_VERSION, file.version
            );
        }

        Ok(file.namespaces)
    }

    /// Write store to file atomically
    async fn write_store(path: &Path, namespaces: &BTreeMap<String, Namespace>) -> Result<()> {
        let file = StoreFileFormat {
            version: STORE_FILE_VERSION.to_string(),
            namespaces: namespaces.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let temp_path = Self::temp_path(path);
        {
            let mut temp = fs::File::create(&temp_path).await.map_err(|e| {
                Error::option_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            temp.write_all(json.as_bytes()).await.map_err(|e| {
                Error::option_store(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            temp.flush().await?;
        }

        if path.exists() {
            let backup_path = Self::backup_path(path);
            if let Err(e) = fs::copy(path, &backup_path).await {
                warn!("Failed to create option store backup: {}", e);
            }
        }

        fs::rename(&temp_path, path).await.map_err(|e| {
            Error::option_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                path.display(),
                e
            ))
        })?;

        trace!("Option store written to {}", path.display());
        Ok(())
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut temp = path.to_path_buf();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}
