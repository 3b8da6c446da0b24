//! STS-backed credential issuer

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_sts::error::DisplayErrorContext;
use chrono::{DateTime, Utc};
use meter_core::credentials::CredentialSet;
use meter_core::{CredentialIssuer, Error, Result};
use std::time::Duration;
use tracing::debug;

/// Credential issuer calling `sts:AssumeRole` with ambient credentials
#[derive(Debug, Clone)]
pub struct StsCredentialIssuer {
    client: aws_sdk_sts::Client,
}

impl StsCredentialIssuer {
    /// Create an issuer from a loaded AWS configuration
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_sts::Client::new(sdk_config),
        }
    }
}

#[async_trait]
impl CredentialIssuer for StsCredentialIssuer {
    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
        duration: Duration,
    ) -> Result<CredentialSet> {
        let duration_seconds = i32::try_from(duration.as_secs())
            .map_err(|_| Error::config(format!("Session duration too long: {:?}", duration)))?;

        debug!("AssumeRole {} ({}s)", role_arn, duration_seconds);
        let output = self
            .client
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(session_name)
            .duration_seconds(duration_seconds)
            .send()
            .await
            .map_err(|e| {
                Error::credential(format!(
                    "AssumeRole {} failed: {}",
                    role_arn,
                    DisplayErrorContext(&e)
                ))
            })?;

        let credentials = output
            .credentials()
            .ok_or_else(|| Error::credential("AssumeRole returned no credentials"))?;

        let expiration = credentials.expiration();
        let expiration = to_utc(expiration.secs(), expiration.subsec_nanos())?;

        Ok(CredentialSet {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().to_string(),
            expiration,
        })
    }
}

fn to_utc(secs: i64, nanos: u32) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| Error::credential(format!("Invalid expiration timestamp {}", secs)))
}
