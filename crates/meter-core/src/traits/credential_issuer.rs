// # Credential Issuer Trait
//
// Boundary to temporary credential issuance:
// `assume_role(role_arn, session_name, duration) -> CredentialSet`.
//
// ## Implementations
//
// - AWS STS: `meter-aws` crate

use async_trait::async_trait;
use std::time::Duration;

use crate::credentials::CredentialSet;

/// Trait for temporary credential issuers
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Assume `role_arn` and return the issued session credentials
    ///
    /// # Parameters
    ///
    /// - `role_arn`: Fully-qualified role ARN
    /// - `session_name`: Session name recorded by the issuer
    /// - `duration`: Requested session lifetime
    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
        duration: Duration,
    ) -> Result<CredentialSet, crate::Error>;
}
