//! Azure Resource Manager interaction module
//!
//! - [`auth`] - service principal and Azure CLI tokens
//! - [`client`] - ARM GETs, pagination, error decoding
//! - [`management`] - management groups and subscriptions
//! - [`compute`] - VMs, scale sets, SKU catalog
//! - [`provider`] - [`Provider`](crate::inventory::Provider) implementation

pub mod auth;
pub mod client;
pub mod compute;
pub mod management;
pub mod provider;

pub use provider::AzureProvider;
