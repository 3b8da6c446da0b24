// # Shadow Client Trait
//
// Boundary to the device shadow protocol:
//
// - `get(thing) -> {"state": {"reported": {...}}}`
// - `update(thing, {"state": {"desired": {...}}})`
//
// ## Implementations
//
// - AWS IoT data plane: `meter-aws` crate

use async_trait::async_trait;

use crate::credentials::CredentialSet;
use crate::state::{DesiredPatch, ReportedState};

/// Trait for device shadow transports
///
/// Implementations perform exactly one request per call. Retry, timeout and
/// diff decisions are owned by the [`Meter`](crate::Meter).
#[async_trait]
pub trait ShadowClient: Send + Sync {
    /// Fetch the `state.reported` side of the thing's shadow document
    async fn get_reported(&self, thing_name: &str) -> Result<ReportedState, crate::Error>;

    /// Write `patch` as the thing's `state.desired` document
    async fn update_desired(
        &self,
        thing_name: &str,
        patch: &DesiredPatch,
    ) -> Result<(), crate::Error>;

    /// Switch to freshly issued cross-account credentials
    ///
    /// Called after every credential refresh. Clients using ambient
    /// credentials only can keep the default no-op.
    fn apply_credentials(&mut self, _credentials: &CredentialSet) -> Result<(), crate::Error> {
        Ok(())
    }
}
