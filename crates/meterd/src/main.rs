// # meter - Ambient Meter Driver
//
// Thin bootstrap over meter-core:
// 1. Resolving global options (persisted under `MAIN` in the option store)
// 2. Initializing logging
// 3. Creating the selected source from the registry
// 4. Wiring AWS credentials and the device shadow client
// 5. Running the meter until SIGINT/SIGTERM, then clearing it
//
// No synchronization logic lives here; it all belongs in meter-core.
//
// ## Usage
//
// ```bash
// meter [-v...] [--thing-name NAME] [-t ACCOUNT-ID-OR-ARN] [-T BOOL] \
//       [-s SECONDS] <source> [source options]
//
// meter -v -t 123456789012 OutsideTemp --coords 47.6,-122.3
// meter Pomodoro --help
// ```
//
// Global options may appear before or after the source name; every token
// they do not recognise goes to the source. Every option except `-v` and the
// source name is remembered in the option store, so later runs can omit it.
//
// ## Environment
//
// - `METER_CONFIG`: Option store path (default `~/.meter.json`)
// - `METER_LOG`: Log level override (trace, debug, info, warn, error)
// - `METER_IOT_ENDPOINT`: IoT data plane endpoint URL override
// - Standard AWS variables for region and ambient credentials

use meter_aws::{AwsShadowClient, StsCredentialIssuer};
use meter_core::options::{GLOBAL_NAMESPACE, render_usage};
use meter_core::{
    CredentialManager, EngineConfig, Error, Meter, OptionSpec, OptionStore, ResolvedOptions,
    SourceRegistry,
};
use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};

/// Program name used in usage text
const PROGRAM: &str = "meter";

/// Option store path override
const CONFIG_ENV: &str = "METER_CONFIG";

/// Log level override
const LOG_ENV: &str = "METER_LOG";

/// Option store file name under `$HOME`
const DEFAULT_STORE_FILE: &str = ".meter.json";

/// Exit codes for different termination scenarios
///
/// - 0: Clean shutdown (or help printed)
/// - 1: Configuration error (bad option, unknown source, bad role)
/// - 2: Runtime error (credentials, device, source failures)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MeterExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<MeterExitCode> for ExitCode {
    fn from(code: MeterExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Exit code for an error that ended the run
fn exit_code_for(error: &Error) -> MeterExitCode {
    match error {
        Error::HelpRequested(_) => MeterExitCode::CleanShutdown,
        e if e.is_configuration() => MeterExitCode::ConfigError,
        Error::OptionStore(_) => MeterExitCode::ConfigError,
        _ => MeterExitCode::RuntimeError,
    }
}

/// Options understood anywhere on the command line
fn global_options() -> Vec<OptionSpec> {
    vec![
        OptionSpec::count("--verbose")
            .short('v')
            .help("more output (repeat for debug)"),
        OptionSpec::value("--thing-name")
            .default("pico_w_meter")
            .metavar("NAME")
            .help("IoT thing whose shadow drives the meter"),
        OptionSpec::value("--iot-assume-role-to")
            .short('t')
            .metavar("ACCOUNT-ID-OR-ARN")
            .help("assume the meter-update role in another account"),
        OptionSpec::value("--show-temperature")
            .short('T')
            .boolean()
            .default("false")
            .metavar("BOOL")
            .help("log the meter's temperature every cycle"),
        OptionSpec::value("--period")
            .short('s')
            .float()
            .default("4")
            .metavar("SECONDS")
            .help("minimum time between cycles"),
        OptionSpec::value("--call-timeout")
            .integer()
            .default("30")
            .metavar("SECONDS")
            .help("timeout for every AWS call (0 disables)"),
        OptionSpec::value("--on-failure")
            .choices(&["terminate", "skip"])
            .default("terminate")
            .help("what to do when a cycle fails"),
        OptionSpec::positional("source").help("data source to drive the meter from"),
    ]
}

/// Build the engine configuration from resolved global options
fn engine_config(options: &ResolvedOptions) -> Result<EngineConfig, Error> {
    let period: f64 = options.require("period")?;
    let min_cycle = Duration::try_from_secs_f64(period)
        .map_err(|_| Error::config(format!("argument --period: invalid duration '{}'", period)))?;

    Ok(EngineConfig {
        thing_name: options.require_str("thing_name")?.to_string(),
        min_cycle,
        assume_role: options
            .get_str("iot_assume_role_to")
            .map(str::trim)
            .filter(|role| !role.is_empty())
            .map(str::to_string),
        show_temperature: options.get_bool("show_temperature"),
        call_timeout_secs: options.require("call_timeout")?,
        failure_policy: options.require("on_failure")?,
    })
}

/// Option store path: `$METER_CONFIG`, else `$HOME/.meter.json`
fn store_path(config_override: Option<OsString>, home: Option<OsString>) -> PathBuf {
    if let Some(path) = config_override.filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    home.map(PathBuf::from)
        .unwrap_or_default()
        .join(DEFAULT_STORE_FILE)
}

/// Log level from the `-v` count, overridden by `METER_LOG`
fn log_level(verbose: u32, env_override: Option<&str>) -> Result<Level, Error> {
    if let Some(level) = env_override {
        return match level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            _ => Err(Error::config(format!(
                "{} '{}' is not valid. Valid levels: trace, debug, info, warn, error",
                LOG_ENV, level
            ))),
        };
    }

    Ok(match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    })
}

fn init_tracing(verbose: u32) -> Result<(), Error> {
    let level = log_level(verbose, env::var(LOG_ENV).ok().as_deref())?;
    let detailed = verbose >= 2;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_file(detailed)
        .with_line_number(detailed)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Other(format!("Failed to set tracing subscriber: {}", e)))
}

fn print_sources(registry: &SourceRegistry) {
    println!("\nAvailable sources:");
    for (name, description) in registry.list() {
        println!("  {:<16} {}", name, description);
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to create tokio runtime: {}", e);
            return MeterExitCode::RuntimeError.into();
        }
    };

    rt.block_on(run(args)).into()
}

async fn run(args: Vec<String>) -> MeterExitCode {
    let registry = meter_sources::builtin_registry();
    let path = store_path(env::var_os(CONFIG_ENV), env::var_os("HOME"));

    let mut store = match OptionStore::open(&path).await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return MeterExitCode::ConfigError;
        }
    };

    let (options, source_args) = match store
        .resolve_known(GLOBAL_NAMESPACE, PROGRAM, &global_options(), &args)
        .await
    {
        Ok(resolved) => resolved,
        Err(Error::HelpRequested(text)) => {
            print!("{}", text);
            print_sources(&registry);
            return MeterExitCode::CleanShutdown;
        }
        Err(e) => {
            eprintln!("{}", render_usage(PROGRAM, &global_options()));
            eprintln!("{}: error: {}", PROGRAM, e);
            return exit_code_for(&e);
        }
    };

    let verbose = options.get::<u32>("verbose").ok().flatten().unwrap_or(0);
    if let Err(e) = init_tracing(verbose) {
        eprintln!("{}", e);
        return MeterExitCode::ConfigError;
    }

    match drive(&options, &source_args, &mut store, &registry).await {
        Ok(()) => {
            warn!("Clean exit.");
            MeterExitCode::CleanShutdown
        }
        Err(Error::HelpRequested(text)) => {
            print!("{}", text);
            MeterExitCode::CleanShutdown
        }
        Err(Error::UnknownSource(name)) => {
            println!("source {} not found!", name);
            print_sources(&registry);
            MeterExitCode::ConfigError
        }
        Err(e) => {
            let code = exit_code_for(&e);
            if code == MeterExitCode::ConfigError {
                error!("Configuration error: {}", e);
            } else {
                error!("Meter error: {}", e);
            }
            code
        }
    }
}

/// Create the source and engine, then run until a shutdown signal
///
/// Everything that can be validated without I/O is validated before AWS is
/// touched.
async fn drive(
    options: &ResolvedOptions,
    source_args: &[String],
    store: &mut OptionStore,
    registry: &SourceRegistry,
) -> Result<(), Error> {
    let config = engine_config(options)?;
    config.validate()?;

    let source_name = options.require_str("source")?;
    let mut source = registry
        .create(source_name, source_args, config.min_cycle, store)
        .await?;

    let sdk_config = meter_aws::load_sdk_config().await;
    let credentials = match &config.assume_role {
        Some(role) => {
            CredentialManager::cross_account(role, Box::new(StsCredentialIssuer::new(&sdk_config)))?
        }
        None => CredentialManager::disabled(),
    };
    if let Some(role_arn) = credentials.role_arn() {
        info!("Assuming {} for device access", role_arn);
    }

    let shadow = AwsShadowClient::from_env(sdk_config);
    let mut meter = Meter::new(config, Box::new(shadow), credentials)?;

    let shutdown = ShutdownSignal::install()?;
    meter.run_until(source.as_mut(), shutdown.recv()).await
}

/// SIGTERM/SIGINT listener, installed before the first cycle
#[cfg(unix)]
struct ShutdownSignal {
    sigterm: Signal,
    sigint: Signal,
}

#[cfg(unix)]
impl ShutdownSignal {
    fn install() -> anyhow::Result<Self> {
        let sigterm = signal(SignalKind::terminate())
            .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
        let sigint = signal(SignalKind::interrupt())
            .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;
        Ok(Self { sigterm, sigint })
    }

    async fn recv(mut self) {
        let name = tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
        };
        info!("Received shutdown signal: {}", name);
    }
}

/// CTRL-C listener (fallback for non-Unix platforms)
#[cfg(not(unix))]
struct ShutdownSignal;

#[cfg(not(unix))]
impl ShutdownSignal {
    fn install() -> anyhow::Result<Self> {
        Ok(Self)
    }

    async fn recv(self) {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal: SIGINT"),
            Err(e) => {
                error!("Failed to wait for CTRL-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meter_core::FailurePolicy;

    fn args(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    async fn resolve(store: &mut OptionStore, tokens: &[&str]) -> (ResolvedOptions, Vec<String>) {
        store
            .resolve_known(GLOBAL_NAMESPACE, PROGRAM, &global_options(), &args(tokens))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_global_options_before_source() {
        let mut store = OptionStore::in_memory();

        let (options, rest) = resolve(
            &mut store,
            &["-vv", "-t", "123456789012", "-s", "10", "Pomodoro", "--work-time", "50"],
        )
        .await;

        assert_eq!(options.get_str("source"), Some("Pomodoro"));
        assert_eq!(options.get::<u32>("verbose").unwrap(), Some(2));
        assert_eq!(rest, args(&["--work-time", "50"]));

        let config = engine_config(&options).unwrap();
        assert_eq!(config.thing_name, "pico_w_meter");
        assert_eq!(config.min_cycle, Duration::from_secs(10));
        assert_eq!(config.assume_role.as_deref(), Some("123456789012"));
        assert!(!config.show_temperature);
        assert_eq!(config.call_timeout_secs, 30);
        assert_eq!(config.failure_policy, FailurePolicy::Terminate);
    }

    #[tokio::test]
    async fn test_global_options_after_source_name() {
        let mut store = OptionStore::in_memory();

        let (options, rest) = resolve(&mut store, &["InsideTemp", "-v"]).await;
        assert_eq!(options.get_str("source"), Some("InsideTemp"));
        assert_eq!(options.get::<u32>("verbose").unwrap(), Some(1));
        assert!(rest.is_empty());

        let (options, rest) = resolve(
            &mut store,
            &["Pomodoro", "--period", "10", "--work-time", "50", "-T", "yes"],
        )
        .await;
        assert_eq!(rest, args(&["--work-time", "50"]));
        let config = engine_config(&options).unwrap();
        assert_eq!(config.min_cycle, Duration::from_secs(10));
        assert!(config.show_temperature);
    }

    #[tokio::test]
    async fn test_trailing_global_flag_reaches_source_creation() {
        let mut store = OptionStore::in_memory();
        let registry = meter_sources::builtin_registry();
        let (options, rest) = resolve(&mut store, &["InsideTemp", "-v"]).await;

        let config = engine_config(&options).unwrap();
        let source = registry
            .create("InsideTemp", &rest, config.min_cycle, &mut store)
            .await
            .unwrap();
        assert_eq!(source.name(), "InsideTemp");
    }

    #[tokio::test]
    async fn test_global_help_without_source() {
        let mut store = OptionStore::in_memory();

        let err = store
            .resolve_known(GLOBAL_NAMESPACE, PROGRAM, &global_options(), &args(&["--help"]))
            .await
            .unwrap_err();

        match &err {
            Error::HelpRequested(text) => assert!(text.contains("--thing-name")),
            other => panic!("expected help, got {other:?}"),
        }
        assert_eq!(exit_code_for(&err), MeterExitCode::CleanShutdown);
    }

    #[tokio::test]
    async fn test_missing_source_is_config_error() {
        let mut store = OptionStore::in_memory();

        let err = store
            .resolve_known(GLOBAL_NAMESPACE, PROGRAM, &global_options(), &args(&["-v"]))
            .await
            .unwrap_err();

        assert!(err.is_configuration());
        assert!(err.to_string().contains("source"), "{err}");
    }

    #[tokio::test]
    async fn test_source_and_verbosity_are_not_persisted() {
        let mut store = OptionStore::in_memory();

        resolve(&mut store, &["-v", "-T", "yes", "--thing-name", "den_meter", "InsideTemp"]).await;

        assert_eq!(store.get(GLOBAL_NAMESPACE, "thing_name"), Some("den_meter"));
        assert_eq!(store.get(GLOBAL_NAMESPACE, "show_temperature"), Some("yes"));
        assert_eq!(store.get(GLOBAL_NAMESPACE, "verbose"), None);
        assert_eq!(store.get(GLOBAL_NAMESPACE, "source"), None);

        // Next run remembers the thing name and temperature logging
        let (options, _) = resolve(&mut store, &["InsideTemp"]).await;
        let config = engine_config(&options).unwrap();
        assert_eq!(config.thing_name, "den_meter");
        assert!(config.show_temperature);
    }

    #[tokio::test]
    async fn test_empty_role_disables_assume_role() {
        let mut store = OptionStore::in_memory();

        let (options, _) = resolve(&mut store, &["-t", "", "--on-failure", "skip", "InsideTemp"]).await;
        let config = engine_config(&options).unwrap();

        assert_eq!(config.assume_role, None);
        assert_eq!(config.failure_policy, FailurePolicy::SkipCycle);
    }

    #[tokio::test]
    async fn test_unknown_source_rejected_before_aws() {
        let mut store = OptionStore::in_memory();
        let registry = meter_sources::builtin_registry();
        let (options, rest) = resolve(&mut store, &["NoSuchSource"]).await;

        let err = drive(&options, &rest, &mut store, &registry).await.unwrap_err();

        assert!(matches!(err, Error::UnknownSource(ref name) if name == "NoSuchSource"));
        assert_eq!(exit_code_for(&err), MeterExitCode::ConfigError);
    }

    #[tokio::test]
    async fn test_malformed_role_rejected_before_aws() {
        let mut store = OptionStore::in_memory();
        let registry = meter_sources::builtin_registry();
        let (options, rest) = resolve(&mut store, &["-t", "not-an-account", "InsideTemp"]).await;

        let err = drive(&options, &rest, &mut store, &registry).await.unwrap_err();

        assert!(err.is_configuration());
        assert_eq!(exit_code_for(&err), MeterExitCode::ConfigError);
    }

    #[tokio::test]
    async fn test_source_help_is_clean_exit() {
        let mut store = OptionStore::in_memory();
        let registry = meter_sources::builtin_registry();
        let (options, rest) = resolve(&mut store, &["Pomodoro", "--help"]).await;

        let err = drive(&options, &rest, &mut store, &registry).await.unwrap_err();

        match &err {
            Error::HelpRequested(text) => assert!(text.contains("--work-time")),
            other => panic!("expected help, got {other:?}"),
        }
        assert_eq!(exit_code_for(&err), MeterExitCode::CleanShutdown);
    }

    #[tokio::test]
    async fn test_invalid_period_is_config_error() {
        let mut store = OptionStore::in_memory();
        store.set(GLOBAL_NAMESPACE, "period", "-1");
        let (options, _) = resolve(&mut store, &["InsideTemp"]).await;

        let err = engine_config(&options).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_log_level_from_verbosity() {
        assert_eq!(log_level(0, None).unwrap(), Level::WARN);
        assert_eq!(log_level(1, None).unwrap(), Level::INFO);
        assert_eq!(log_level(2, None).unwrap(), Level::DEBUG);
        assert_eq!(log_level(5, None).unwrap(), Level::DEBUG);
        assert_eq!(log_level(0, Some("TRACE")).unwrap(), Level::TRACE);
        assert!(log_level(0, Some("loud")).is_err());
    }

    #[test]
    fn test_store_path_resolution() {
        assert_eq!(
            store_path(Some("/etc/meter.json".into()), Some("/home/pi".into())),
            PathBuf::from("/etc/meter.json")
        );
        assert_eq!(
            store_path(None, Some("/home/pi".into())),
            PathBuf::from("/home/pi/.meter.json")
        );
        assert_eq!(
            store_path(Some("".into()), Some("/home/pi".into())),
            PathBuf::from("/home/pi/.meter.json")
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for(&Error::config("bad")), MeterExitCode::ConfigError);
        assert_eq!(exit_code_for(&Error::option_store("disk full")), MeterExitCode::ConfigError);
        assert_eq!(exit_code_for(&Error::credential("denied")), MeterExitCode::RuntimeError);
        assert_eq!(exit_code_for(&Error::shadow("reset")), MeterExitCode::RuntimeError);
    }
}
