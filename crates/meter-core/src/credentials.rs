//! Cross-account credential lifecycle
//!
//! When a role to assume is configured, the [`CredentialManager`] obtains
//! temporary credentials through a [`CredentialIssuer`] and replaces them
//! wholesale once their remaining lifetime drops below [`REFRESH_MARGIN`].
//! Without a role it stays [`CredentialStatus::Disabled`] forever and the
//! shadow client keeps using ambient credentials.
//!
//! ```text
//!   Disabled (permanent)
//!
//!   Unset ──refresh──► Valid ──time passes──► Expiring
//!                        ▲                        │
//!                        └────────refresh─────────┘
//! ```

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::traits::CredentialIssuer;

/// Role name created in the device-owning account
pub const ROLE_NAME: &str = "meter-update";

/// Session name passed to the issuer
pub const SESSION_NAME: &str = "meter";

/// Requested session lifetime (12 hours)
pub const SESSION_DURATION: Duration = Duration::from_secs(12 * 60 * 60);

/// Refresh once less than this much lifetime remains (1 hour)
pub const REFRESH_MARGIN: Duration = Duration::from_secs(60 * 60);

/// Temporary credentials issued for the cross-account role
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSet {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

// Secrets never reach the logs
impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<REDACTED>")
            .field("session_token", &"<REDACTED>")
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl CredentialSet {
    /// Lifetime left at `now` (zero once expired)
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expiration - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether these credentials must be refreshed before use at `now`
    pub fn is_expiring_at(&self, now: DateTime<Utc>) -> bool {
        self.remaining_at(now) < REFRESH_MARGIN
    }
}

/// Which role to assume, as supplied by the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleTarget {
    /// 12-digit account id, expanded to `arn:aws:iam::<id>:role/meter-update`
    Account(String),
    /// Explicit role ARN
    Arn(String),
}

impl RoleTarget {
    /// Parse an account id or role ARN
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for anything that is neither exactly 12
    /// decimal digits nor an IAM role ARN.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if is_account_id(value) {
            return Ok(Self::Account(value.to_string()));
        }
        if is_role_arn(value) {
            return Ok(Self::Arn(value.to_string()));
        }
        Err(Error::config(format!(
            "'{}' is neither a 12-digit account id nor an IAM role ARN \
            (arn:aws:iam::<account-id>:role/<name>)",
            value
        )))
    }

    /// The fully-qualified role ARN to assume
    pub fn role_arn(&self) -> String {
        match self {
            Self::Account(account_id) => {
                format!("arn:aws:iam::{}:role/{}", account_id, ROLE_NAME)
            }
            Self::Arn(arn) => arn.clone(),
        }
    }
}

fn is_account_id(value: &str) -> bool {
    value.len() == 12 && value.bytes().all(|b| b.is_ascii_digit())
}

fn is_role_arn(value: &str) -> bool {
    let parts: Vec<&str> = value.splitn(6, ':').collect();
    match parts.as_slice() {
        ["arn", partition, "iam", "", account_id, resource] => {
            partition.starts_with("aws")
                && is_account_id(account_id)
                && resource.strip_prefix("role/").is_some_and(|name| !name.is_empty())
        }
        _ => false,
    }
}

/// Observable credential state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    /// No cross-account role configured; ambient credentials are used
    Disabled,
    /// Role configured, nothing issued yet
    Unset,
    /// Credentials present with more than the refresh margin left
    Valid,
    /// Credentials present but inside the refresh margin
    Expiring,
}

impl CredentialStatus {
    /// Whether the next use must refresh first
    pub fn needs_refresh(self) -> bool {
        matches!(self, Self::Unset | Self::Expiring)
    }
}

enum Mode {
    Disabled,
    CrossAccount {
        role_arn: String,
        issuer: Box<dyn CredentialIssuer>,
        credentials: Option<CredentialSet>,
    },
}

/// Owner of the single live [`CredentialSet`]
pub struct CredentialManager {
    mode: Mode,
}

impl fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mode {
            Mode::Disabled => f.debug_struct("CredentialManager").field("mode", &"disabled").finish(),
            Mode::CrossAccount {
                role_arn,
                credentials,
                ..
            } => f
                .debug_struct("CredentialManager")
                .field("role_arn", role_arn)
                .field("credentials", credentials)
                .finish(),
        }
    }
}

impl CredentialManager {
    /// Manager for ambient credentials; never refreshes
    pub fn disabled() -> Self {
        Self { mode: Mode::Disabled }
    }

    /// Manager assuming `role` (account id or ARN) through `issuer`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `role` is malformed. Validation happens
    /// here, before any I/O.
    pub fn cross_account(role: &str, issuer: Box<dyn CredentialIssuer>) -> Result<Self> {
        let target = RoleTarget::parse(role)?;
        Ok(Self {
            mode: Mode::CrossAccount {
                role_arn: target.role_arn(),
                issuer,
                credentials: None,
            },
        })
    }

    /// The role ARN being assumed, if any
    pub fn role_arn(&self) -> Option<&str> {
        match &self.mode {
            Mode::Disabled => None,
            Mode::CrossAccount { role_arn, .. } => Some(role_arn),
        }
    }

    /// Currently live credentials, if any
    pub fn current(&self) -> Option<&CredentialSet> {
        match &self.mode {
            Mode::Disabled => None,
            Mode::CrossAccount { credentials, .. } => credentials.as_ref(),
        }
    }

    /// Credential state as observed at `now`
    pub fn status_at(&self, now: DateTime<Utc>) -> CredentialStatus {
        match &self.mode {
            Mode::Disabled => CredentialStatus::Disabled,
            Mode::CrossAccount {
                credentials: None, ..
            } => CredentialStatus::Unset,
            Mode::CrossAccount {
                credentials: Some(credentials),
                ..
            } => {
                if credentials.is_expiring_at(now) {
                    CredentialStatus::Expiring
                } else {
                    CredentialStatus::Valid
                }
            }
        }
    }

    /// Credential state right now
    pub fn status(&self) -> CredentialStatus {
        self.status_at(Utc::now())
    }

    /// Refresh if the credentials are unset or expiring
    ///
    /// # Returns
    ///
    /// - `Ok(Some(credentials))`: New credentials were issued
    /// - `Ok(None)`: Nothing to do (disabled, or still valid)
    /// - `Err(Error)`: Issuance failed; the previous credentials are kept
    pub async fn refresh_if_needed(&mut self) -> Result<Option<&CredentialSet>> {
        self.refresh_if_needed_at(Utc::now()).await
    }

    /// [`refresh_if_needed`](Self::refresh_if_needed) against an explicit clock
    pub async fn refresh_if_needed_at(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Option<&CredentialSet>> {
        if !self.status_at(now).needs_refresh() {
            return Ok(None);
        }

        let Mode::CrossAccount {
            role_arn,
            issuer,
            credentials,
        } = &mut self.mode
        else {
            return Ok(None);
        };

        debug!("Assuming role {}", role_arn);
        let issued = issuer
            .assume_role(role_arn, SESSION_NAME, SESSION_DURATION)
            .await
            .map_err(|e| match e {
                Error::Credential(_) | Error::Timeout { .. } => e,
                other => Error::credential(other.to_string()),
            })?;

        info!("Refreshed credentials, expiration {}", issued.expiration);
        Ok(Some(&*credentials.insert(issued)))
    }

    /// Drop the live credentials so the next use refreshes again
    ///
    /// A disabled manager is left untouched.
    pub fn invalidate(&mut self) {
        if let Mode::CrossAccount { credentials, .. } = &mut self.mode
            && credentials.take().is_some()
        {
            debug!("Discarded cross-account credentials");
        }
    }
}
