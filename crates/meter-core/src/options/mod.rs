//! Config-backed option resolution
//!
//! Every source (and the top-level process, under [`GLOBAL_NAMESPACE`])
//! declares its options as [`OptionSpec`]s. Resolution layers three sources
//! of values, highest precedence first:
//!
//! 1. Tokens supplied on this invocation (`--work-time 30`)
//! 2. The value persisted by a previous run in the same namespace
//! 3. The option's static default
//!
//! Positionals are the exception: they must be given on every invocation.
//! Tokens are parsed with a clap [`Command`] built from the specs.
//!
//! After a successful resolution every persistable value is written back to
//! the [`OptionStore`] and the store is flushed in full. Counters and
//! positionals are never persisted.

mod store;

pub use store::{OptionStore, GLOBAL_NAMESPACE};

use clap::builder::PossibleValuesParser;
use clap::error::ErrorKind;
use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use crate::error::{Error, Result};

/// How an option consumes tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// `--name VALUE` or `--name=VALUE`
    Value,
    /// `--name` sets the option to `true`
    Flag,
    /// Each occurrence (`-v`, `-vv`) increments a counter
    Count,
    /// Bare token, filled in declaration order
    Positional,
}

/// Type a value must parse as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Integer,
    Float,
    Bool,
}

/// Declaration of one option
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSpec {
    /// Long name without leading dashes (`work-time`)
    pub name: &'static str,
    /// Short alias (`v` for `-v`)
    pub short: Option<char>,
    pub kind: OptionKind,
    pub value_type: ValueType,
    /// Static default, used when neither supplied nor persisted
    pub default: Option<&'static str>,
    pub choices: Option<&'static [&'static str]>,
    pub required: bool,
    /// Whether the resolved value is written back to the store
    pub persist: bool,
    pub help: Option<&'static str>,
    pub metavar: Option<&'static str>,
}

impl OptionSpec {
    fn new(name: &'static str, kind: OptionKind, value_type: ValueType) -> Self {
        Self {
            name: name.trim_start_matches('-'),
            short: None,
            kind,
            value_type,
            default: None,
            choices: None,
            required: false,
            persist: !matches!(kind, OptionKind::Count | OptionKind::Positional),
            help: None,
            metavar: None,
        }
    }

    /// `--name VALUE` option holding a string
    pub fn value(name: &'static str) -> Self {
        Self::new(name, OptionKind::Value, ValueType::String)
    }

    /// `--name` boolean switch, `false` unless given
    pub fn flag(name: &'static str) -> Self {
        Self::new(name, OptionKind::Flag, ValueType::Bool).default("false")
    }

    /// Repeatable counter such as `-vv`
    pub fn count(name: &'static str) -> Self {
        Self::new(name, OptionKind::Count, ValueType::Integer).default("0")
    }

    /// Positional argument
    pub fn positional(name: &'static str) -> Self {
        Self::new(name, OptionKind::Positional, ValueType::String).required()
    }

    pub fn short(mut self, short: char) -> Self {
        self.short = Some(short);
        self
    }

    pub fn integer(mut self) -> Self {
        self.value_type = ValueType::Integer;
        self
    }

    pub fn float(mut self) -> Self {
        self.value_type = ValueType::Float;
        self
    }

    pub fn boolean(mut self) -> Self {
        self.value_type = ValueType::Bool;
        self
    }

    pub fn default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }

    pub fn choices(mut self, choices: &'static [&'static str]) -> Self {
        self.choices = Some(choices);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Never persist this option (one-shot values such as targets or durations)
    ///
    /// Counters and positionals are never persisted to begin with.
    pub fn no_persist(mut self) -> Self {
        self.persist = false;
        self
    }

    pub fn help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }

    pub fn metavar(mut self, metavar: &'static str) -> Self {
        self.metavar = Some(metavar);
        self
    }

    /// Storage key: `--work-time` becomes `work_time`
    pub fn dest(&self) -> String {
        self.name.replace('-', "_")
    }

    fn display_name(&self) -> String {
        match self.kind {
            OptionKind::Positional => self.name.to_string(),
            _ => format!("--{}", self.name),
        }
    }

    fn validate(&self, value: &str) -> Result<()> {
        let type_ok = match self.value_type {
            ValueType::String | ValueType::Bool => true,
            ValueType::Integer => value.parse::<i64>().is_ok(),
            ValueType::Float => value.parse::<f64>().is_ok(),
        };
        if !type_ok {
            return Err(Error::config(format!(
                "argument {}: invalid {:?} value: '{}'",
                self.display_name(),
                self.value_type,
                value
            )));
        }
        if let Some(choices) = self.choices
            && !choices.contains(&value)
        {
            return Err(Error::config(format!(
                "argument {}: invalid choice: '{}' (choose from {})",
                self.display_name(),
                value,
                choices.join(", ")
            )));
        }
        Ok(())
    }
}

/// Interpret a stored or supplied string as a boolean
///
/// `yes`, `true`, `t` and `1` (any case) are true; everything else is false.
pub fn to_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "yes" | "true" | "t" | "1")
}

/// Result of resolving a namespace's options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedOptions {
    values: BTreeMap<String, String>,
    explicit: BTreeSet<String>,
}

impl ResolvedOptions {
    /// Raw value for `dest`, if any
    pub fn get_str(&self, dest: &str) -> Option<&str> {
        self.values.get(dest).map(String::as_str)
    }

    /// Raw value for `dest`, failing if absent
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the option has no value.
    pub fn require_str(&self, dest: &str) -> Result<&str> {
        self.get_str(dest)
            .ok_or_else(|| Error::config(format!("missing required option '{}'", dest)))
    }

    /// Typed value for `dest`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the value does not parse as `T`.
    pub fn get<T: FromStr>(&self, dest: &str) -> Result<Option<T>> {
        self.get_str(dest)
            .map(|raw| {
                raw.parse::<T>().map_err(|_| {
                    Error::config(format!("option '{}' has invalid value '{}'", dest, raw))
                })
            })
            .transpose()
    }

    /// Typed value for `dest`, failing if absent
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when absent or unparsable.
    pub fn require<T: FromStr>(&self, dest: &str) -> Result<T> {
        self.get(dest)?
            .ok_or_else(|| Error::config(format!("missing required option '{}'", dest)))
    }

    /// Boolean value for `dest` (absent is false)
    pub fn get_bool(&self, dest: &str) -> bool {
        self.get_str(dest).is_some_and(to_bool)
    }

    /// Whether `dest` was supplied on this invocation
    pub fn is_explicit(&self, dest: &str) -> bool {
        self.explicit.contains(dest)
    }

    /// Iterate over all resolved values
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl OptionSpec {
    /// The clap argument for this spec
    ///
    /// Defaults are shown in help only; layering happens in [`layer_values`].
    fn to_arg(&self, require_positionals: bool) -> Arg {
        let mut arg = Arg::new(self.dest());
        arg = match self.kind {
            OptionKind::Positional => arg
                .action(ArgAction::Set)
                .required(self.required && require_positionals),
            OptionKind::Flag => arg.long(self.name).action(ArgAction::SetTrue),
            OptionKind::Count => arg.long(self.name).action(ArgAction::Count),
            OptionKind::Value => arg
                .long(self.name)
                .action(ArgAction::Set)
                .allow_hyphen_values(true),
        };
        if let Some(short) = self.short {
            arg = arg.short(short);
        }

        if matches!(self.kind, OptionKind::Value | OptionKind::Positional) {
            arg = match (self.choices, self.value_type) {
                (Some(choices), _) => {
                    arg.value_parser(PossibleValuesParser::new(choices.iter().copied()))
                }
                (None, ValueType::Integer) => arg.value_parser(clap::value_parser!(i64)),
                (None, ValueType::Float) => arg.value_parser(clap::value_parser!(f64)),
                (None, ValueType::String | ValueType::Bool) => arg,
            };
            if let Some(metavar) = self.metavar {
                arg = arg.value_name(metavar);
            }
            if let Some(default) = self.default {
                arg = arg.default_value(default);
            }
        }

        if let Some(help) = self.help {
            arg = arg.help(help);
        }
        arg
    }
}

/// Build the clap command for `program` from `specs`
fn command(program: &str, specs: &[OptionSpec], require_positionals: bool) -> Command {
    Command::new(program.to_string())
        .no_binary_name(true)
        .args(specs.iter().map(|spec| spec.to_arg(require_positionals)))
}

/// Usage line for `program`, as clap renders it
pub fn render_usage(program: &str, specs: &[OptionSpec]) -> String {
    command(program, specs, true).render_usage().to_string()
}

fn get_matches(command: Command, args: &[String]) -> Result<ArgMatches> {
    command.try_get_matches_from(args).map_err(|e| match e.kind() {
        ErrorKind::DisplayHelp => Error::HelpRequested(e.render().to_string()),
        _ => Error::config(summary(&e)),
    })
}

/// The leading paragraph of a clap error, on one line
fn summary(error: &clap::Error) -> String {
    let rendered = error.render().to_string();
    let message = rendered
        .lines()
        .take_while(|line| !line.trim().is_empty())
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(" ");
    message
        .strip_prefix("error: ")
        .map(str::to_string)
        .unwrap_or(message)
}

/// Values given on the command line, keyed by destination
fn explicit_values(specs: &[OptionSpec], matches: &ArgMatches) -> BTreeMap<String, String> {
    let mut explicit = BTreeMap::new();
    for spec in specs {
        let dest = spec.dest();
        if matches.value_source(&dest) != Some(ValueSource::CommandLine) {
            continue;
        }

        let value = match spec.kind {
            OptionKind::Flag => Some("true".to_string()),
            OptionKind::Count => Some(matches.get_count(&dest).to_string()),
            OptionKind::Value | OptionKind::Positional => matches
                .get_raw(&dest)
                .and_then(|raw| raw.last())
                .map(|raw| raw.to_string_lossy().into_owned()),
        };
        if let Some(value) = value {
            explicit.insert(dest, value);
        }
    }
    explicit
}

/// Parse `args`; every token must be recognised
pub(crate) fn parse_all(
    program: &str,
    specs: &[OptionSpec],
    args: &[String],
) -> Result<BTreeMap<String, String>> {
    let matches = get_matches(command(program, specs, true), args)?;
    Ok(explicit_values(specs, &matches))
}

/// Parse the tokens `specs` recognise and hand back the others
///
/// Recognised options are taken wherever they appear and bare tokens fill
/// the positionals in order. Everything else keeps its original order in
/// the returned remainder, as does everything after `--`. `-h`/`--help`
/// belongs to the remainder unless a positional is still unfilled.
pub(crate) fn parse_known(
    program: &str,
    specs: &[OptionSpec],
    args: &[String],
) -> Result<(BTreeMap<String, String>, Vec<String>)> {
    let mut full = command(program, specs, true);
    let (known, rest) = split_known(&full, args);
    let matches = get_matches(command(program, specs, false), &known)?;
    let explicit = explicit_values(specs, &matches);

    let unfilled = specs
        .iter()
        .any(|s| s.kind == OptionKind::Positional && !explicit.contains_key(&s.dest()));
    if unfilled && rest.iter().any(|t| t == "-h" || t == "--help") {
        return Err(Error::HelpRequested(full.render_help().to_string()));
    }

    Ok((explicit, rest))
}

fn split_known(command: &Command, args: &[String]) -> (Vec<String>, Vec<String>) {
    let mut open_positionals = command.get_positionals().count();
    let mut known = Vec::new();
    let mut rest = Vec::new();
    let mut tokens = args.iter();

    while let Some(token) = tokens.next() {
        if token == "--" {
            rest.push(token.clone());
            rest.extend(tokens.by_ref().cloned());
            break;
        }

        let takes_value = if let Some(long) = token.strip_prefix("--") {
            let (name, inline) = match long.split_once('=') {
                Some((name, _)) => (name, true),
                None => (long, false),
            };
            command
                .get_arguments()
                .find(|arg| arg.get_long() == Some(name))
                .map(|arg| arg.get_action().takes_values() && !inline)
        } else if let Some(cluster) = token.strip_prefix('-').filter(|c| !c.is_empty()) {
            short_cluster(command, cluster)
        } else if open_positionals > 0 {
            open_positionals -= 1;
            known.push(token.clone());
            continue;
        } else {
            rest.push(token.clone());
            continue;
        };

        match takes_value {
            Some(needs_value) => {
                known.push(token.clone());
                if needs_value && let Some(value) = tokens.next() {
                    known.push(value.clone());
                }
            }
            None => rest.push(token.clone()),
        }
    }

    (known, rest)
}

/// Whether `-<cluster>` is recognised, and if so whether it needs the next token
fn short_cluster(command: &Command, cluster: &str) -> Option<bool> {
    for (offset, short) in cluster.char_indices() {
        let arg = command
            .get_arguments()
            .find(|arg| arg.get_short() == Some(short))?;
        if arg.get_action().takes_values() {
            // `-s10` carries its value, `-s 10` does not
            return Some(offset + short.len_utf8() == cluster.len());
        }
    }
    Some(false)
}

/// Layer explicit, persisted and default values, then validate
pub(crate) fn layer_values(
    specs: &[OptionSpec],
    explicit: BTreeMap<String, String>,
    persisted: Option<&BTreeMap<String, String>>,
) -> Result<ResolvedOptions> {
    let mut resolved = ResolvedOptions::default();
    let mut missing = Vec::new();

    for spec in specs {
        let dest = spec.dest();
        let value = if let Some(value) = explicit.get(&dest) {
            resolved.explicit.insert(dest.clone());
            Some(value.clone())
        } else if let Some(value) = persisted
            .filter(|_| spec.kind != OptionKind::Positional)
            .and_then(|p| p.get(&dest))
        {
            Some(value.clone())
        } else {
            spec.default.map(str::to_string)
        };

        match value {
            Some(value) => {
                spec.validate(&value)?;
                resolved.values.insert(dest, value);
            }
            None if spec.required => missing.push(spec.display_name()),
            None => {}
        }
    }

    if !missing.is_empty() {
        return Err(Error::config(format!(
            "the following arguments are required: {}",
            missing.join(", ")
        )));
    }

    Ok(resolved)
}
