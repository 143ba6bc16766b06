//! GCP API interaction module
//!
//! # Module Structure
//!
//! - [`auth`] - GCP authentication using Application Default Credentials
//! - [`client`] - Main GCP client: URL builders and pagination
//! - [`http`] - HTTP utilities and Google error decoding
//! - [`projects`] - Project and folder listing (Resource Manager)
//! - [`compute`] - Instances and machine types (Compute Engine)
//! - [`provider`] - [`Provider`](crate::inventory::Provider) implementation
//!
//! # Example
//!
//! ```ignore
//! use vcensus::gcp::{auth::GcpCredentials, client::GcpClient};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let client = GcpClient::new(GcpCredentials::new().await?, Duration::from_secs(30))?;
//!     let listing = vcensus::gcp::compute::list_instances(&client, "my-project").await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod compute;
pub mod http;
pub mod projects;
pub mod provider;

pub use provider::GcpProvider;
