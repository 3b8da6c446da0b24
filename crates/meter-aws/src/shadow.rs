//! IoT data plane shadow client

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_iotdataplane::config::{Builder as IotConfigBuilder, Credentials};
use aws_sdk_iotdataplane::error::DisplayErrorContext;
use aws_sdk_iotdataplane::primitives::Blob;
use meter_core::credentials::CredentialSet;
use meter_core::{DesiredPatch, Error, ReportedState, Result, ShadowClient};
use serde_json::Value;
use std::time::SystemTime;
use tracing::{debug, info};

/// Environment variable overriding the data plane endpoint URL
pub const ENDPOINT_ENV: &str = "METER_IOT_ENDPOINT";

/// Provider name attached to assumed-role credentials
const CREDENTIALS_PROVIDER: &str = "meter-assume-role";

/// Device shadow client for the AWS IoT data plane
///
/// # Security
///
/// The Debug implementation does NOT expose credentials.
pub struct AwsShadowClient {
    sdk_config: SdkConfig,
    endpoint: Option<String>,
    client: aws_sdk_iotdataplane::Client,
}

impl std::fmt::Debug for AwsShadowClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsShadowClient")
            .field("region", &self.sdk_config.region())
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl AwsShadowClient {
    /// Create a client using ambient credentials
    ///
    /// `endpoint` overrides the data plane URL (see [`ENDPOINT_ENV`]).
    pub fn new(sdk_config: SdkConfig, endpoint: Option<String>) -> Self {
        let client = Self::build_client(&sdk_config, endpoint.as_deref(), None);
        Self {
            sdk_config,
            endpoint,
            client,
        }
    }

    /// Create a client, taking the endpoint override from the environment
    pub fn from_env(sdk_config: SdkConfig) -> Self {
        let endpoint = std::env::var(ENDPOINT_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty());
        Self::new(sdk_config, endpoint)
    }

    fn build_client(
        sdk_config: &SdkConfig,
        endpoint: Option<&str>,
        credentials: Option<Credentials>,
    ) -> aws_sdk_iotdataplane::Client {
        let mut builder = IotConfigBuilder::from(sdk_config);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if let Some(credentials) = credentials {
            builder = builder.credentials_provider(credentials);
        }
        aws_sdk_iotdataplane::Client::from_conf(builder.build())
    }
}

#[async_trait]
impl ShadowClient for AwsShadowClient {
    async fn get_reported(&self, thing_name: &str) -> Result<ReportedState> {
        let output = self
            .client
            .get_thing_shadow()
            .thing_name(thing_name)
            .send()
            .await
            .map_err(|e| {
                Error::shadow(format!(
                    "GetThingShadow {} failed: {}",
                    thing_name,
                    DisplayErrorContext(&e)
                ))
            })?;

        match output.payload() {
            Some(payload) => parse_reported(payload.as_ref()),
            None => Ok(ReportedState::new()),
        }
    }

    async fn update_desired(&self, thing_name: &str, patch: &DesiredPatch) -> Result<()> {
        let payload = desired_payload(patch)?;
        debug!("UpdateThingShadow {}: {} bytes", thing_name, payload.len());

        self.client
            .update_thing_shadow()
            .thing_name(thing_name)
            .payload(Blob::new(payload))
            .send()
            .await
            .map_err(|e| {
                Error::shadow(format!(
                    "UpdateThingShadow {} failed: {}",
                    thing_name,
                    DisplayErrorContext(&e)
                ))
            })?;

        Ok(())
    }

    fn apply_credentials(&mut self, credentials: &CredentialSet) -> Result<()> {
        let static_credentials = Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            Some(credentials.session_token.clone()),
            Some(SystemTime::from(credentials.expiration)),
            CREDENTIALS_PROVIDER,
        );

        self.client = Self::build_client(
            &self.sdk_config,
            self.endpoint.as_deref(),
            Some(static_credentials),
        );
        info!("Shadow client switched to assumed-role credentials");
        Ok(())
    }
}

/// Extract `state.reported` from a shadow document
///
/// A document without a reported section yields an empty state.
pub fn parse_reported(payload: &[u8]) -> Result<ReportedState> {
    let document: Value = serde_json::from_slice(payload)
        .map_err(|e| Error::shadow(format!("Malformed shadow document: {}", e)))?;

    match document.pointer("/state/reported") {
        None | Some(Value::Null) => Ok(ReportedState::new()),
        Some(Value::Object(reported)) => Ok(ReportedState::from(reported.clone())),
        Some(other) => Err(Error::shadow(format!(
            "state.reported is not an object: {}",
            other
        ))),
    }
}

/// Render `patch` as an UpdateThingShadow payload
pub fn desired_payload(patch: &DesiredPatch) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&patch.to_desired_document())?)
}
