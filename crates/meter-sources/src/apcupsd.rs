//! APC UPS battery level via apcupsd's network information server (NIS)
//!
//! ## Wire format
//!
//! Every message is a big-endian `u16` length followed by that many bytes.
//! The client sends `status`; the server answers with one `KEY : value`
//! record per message and ends with a zero-length message.

use async_trait::async_trait;
use meter_core::state::{GREEN, METER, RED};
use meter_core::{
    DesiredPatch, Error, OptionSpec, OptionStore, ReportedState, Result, Source, SourceFactory,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// apcupsd NIS default port
const DEFAULT_NIS_PORT: u16 = 3551;

/// Indicator level for power lights
const LIGHT: f64 = 25.0;

/// Battery charge from an apcupsd daemon
#[derive(Debug)]
pub struct ApcUps {
    name: String,
    min_cycle: Duration,
    address: String,
}

impl ApcUps {
    /// `hostname` is `host` or `host:port`
    pub fn new(name: impl Into<String>, min_cycle: Duration, hostname: &str) -> Self {
        Self {
            name: name.into(),
            min_cycle,
            address: with_default_port(hostname),
        }
    }

    async fn query_status(&self) -> Result<BTreeMap<String, String>> {
        let mut stream = TcpStream::connect(&self.address).await.map_err(|e| {
            Error::source(&self.name, format!("Failed to connect to {}: {}", self.address, e))
        })?;

        write_message(&mut stream, b"status")
            .await
            .map_err(|e| Error::source(&self.name, format!("Failed to send status request: {}", e)))?;

        let mut records = Vec::new();
        loop {
            let record = read_message(&mut stream)
                .await
                .map_err(|e| Error::source(&self.name, format!("Failed to read status: {}", e)))?;
            if record.is_empty() {
                break;
            }
            records.push(String::from_utf8_lossy(&record).into_owned());
        }

        Ok(parse_status(records.iter().map(String::as_str)))
    }
}

fn with_default_port(hostname: &str) -> String {
    let has_port = hostname
        .rsplit_once(':')
        .is_some_and(|(_, port)| port.parse::<u16>().is_ok());
    if has_port {
        hostname.to_string()
    } else {
        format!("{}:{}", hostname, DEFAULT_NIS_PORT)
    }
}

async fn write_message(stream: &mut TcpStream, body: &[u8]) -> std::io::Result<()> {
    let len = u16::try_from(body.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "message too long"))?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await
}

async fn read_message(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let len = stream.read_u16().await?;
    let mut body = vec![0u8; usize::from(len)];
    stream.read_exact(&mut body).await?;
    Ok(body)
}

/// Parse `KEY : value` records, keeping only the first token of each value
///
/// apcupsd appends units (`100.0 Percent`); the first token is the number.
/// `STATUS` keeps its whole value since it is a flag list (`ONLINE LOWBATT`).
fn parse_status<'a>(records: impl Iterator<Item = &'a str>) -> BTreeMap<String, String> {
    records
        .filter_map(|record| record.split_once(':'))
        .map(|(key, value)| {
            let key = key.trim().to_string();
            let value = value.trim();
            let value = if key == "STATUS" {
                value
            } else {
                value.split_whitespace().next().unwrap_or("")
            };
            (key, value.to_string())
        })
        .collect()
}

#[async_trait]
impl Source for ApcUps {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_cycle(&self) -> Duration {
        self.min_cycle
    }

    async fn update(&mut self, _reported: &ReportedState) -> Result<DesiredPatch> {
        let status = self.query_status().await?;
        debug!("apcupsd status: {:?}", status);

        let charge: f64 = status
            .get("BCHARGE")
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| Error::source(&self.name, "status has no numeric BCHARGE"))?;
        let flags = status.get("STATUS").map(String::as_str).unwrap_or("");

        Ok(DesiredPatch::new()
            .with(METER, charge)
            .with(RED, if flags.contains("ONBATT") { LIGHT } else { 0.0 })
            .with(GREEN, if flags.contains("ONLINE") { LIGHT } else { 0.0 }))
    }
}

/// Factory for [`ApcUps`]
pub struct ApcUpsFactory;

#[async_trait]
impl SourceFactory for ApcUpsFactory {
    fn description(&self) -> &'static str {
        "APC UPS current battery level"
    }

    fn options(&self) -> Vec<OptionSpec> {
        vec![
            OptionSpec::value("--hostname")
                .required()
                .metavar("HOST[:PORT]")
                .help("apcupsd host (port defaults to 3551)"),
        ]
    }

    async fn create(
        &self,
        name: &str,
        args: &[String],
        min_cycle: Duration,
        store: &mut OptionStore,
    ) -> Result<Box<dyn Source>> {
        let options = store.resolve(name, &self.options(), args).await?;
        Ok(Box::new(ApcUps::new(name, min_cycle, options.require_str("hostname")?)))
    }
}
