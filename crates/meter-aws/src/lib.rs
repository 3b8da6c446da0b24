// # AWS Adapters
//
// This crate connects the meter engine to AWS:
//
// - `StsCredentialIssuer`: `sts:AssumeRole` for cross-account access
// - `AwsShadowClient`: IoT data plane `GetThingShadow` / `UpdateThingShadow`
//
// ## Architectural Constraints
//
// Adapters are single-shot transports:
//
// - ✅ Perform exactly one API call per trait method
// - ✅ Parse the service response into core types
// - ❌ NO retry logic (owned by the Meter's failure policy)
// - ❌ NO timeouts of their own (owned by the Meter's call policy)
// - ❌ NO caching of shadow documents between cycles
// - ❌ NO background tasks
//
// ## Security Requirements
//
// - Secret keys and session tokens NEVER appear in logs or Debug output
// - Ambient credentials come from the standard AWS provider chain
//
// ## Environment
//
// - Standard AWS variables (`AWS_REGION`, `AWS_PROFILE`, ...)
// - `METER_IOT_ENDPOINT`: Optional data plane endpoint URL override

mod shadow;
mod sts;

pub use shadow::{AwsShadowClient, ENDPOINT_ENV, desired_payload, parse_reported};
pub use sts::StsCredentialIssuer;

use aws_config::{BehaviorVersion, SdkConfig};

/// Load the shared AWS configuration from the standard provider chain
pub async fn load_sdk_config() -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest()).load().await
}
