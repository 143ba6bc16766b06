//! vcensus: licensable vCPU inventory across cloud account hierarchies

pub mod aws;
pub mod azure;
pub mod config;
pub mod gcp;
pub mod inventory;
pub mod report;
