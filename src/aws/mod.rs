//! AWS interaction module
//!
//! Talks to the AWS APIs directly with SigV4-signed requests:
//!
//! - [`credentials`] - environment and shared-file credentials
//! - [`signing`] - Signature Version 4
//! - [`client`] - Query, JSON and REST protocols, error decoding
//! - [`organizations`], [`sts`] - hierarchy and member-account roles
//! - [`ec2`], [`ecs`], [`lambda`] - compute inventory
//! - [`provider`] - [`Provider`](crate::inventory::Provider) implementation

pub mod client;
pub mod credentials;
pub mod ec2;
pub mod ecs;
pub mod lambda;
pub mod organizations;
pub mod provider;
pub mod signing;
pub mod sts;

pub use credentials::AwsCredentials;
pub use provider::AwsProvider;
