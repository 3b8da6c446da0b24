//! Core traits for the meter system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`Source`]: Map the device's reported state to a desired patch
//! - [`ShadowClient`]: Read and write the device shadow document
//! - [`CredentialIssuer`]: Issue temporary cross-account credentials

pub mod source;
pub mod shadow;
pub mod credential_issuer;

pub use source::{Source, SourceFactory};
pub use shadow::ShadowClient;
pub use credential_issuer::CredentialIssuer;
