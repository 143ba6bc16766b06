//! Inventory engine
//!
//! Provider-independent core: scope discovery, per-scope collection, SKU
//! resolution, failure classification and the bottom-up fold.

pub mod aggregate;
pub mod classify;
pub mod collector;
pub mod enumerator;
pub mod error;
pub mod model;
pub mod provider;
pub mod resolver;
pub mod retry;
pub mod scan;

pub use error::{ApiError, SetupError};
pub use model::{Scope, ScopeKind, ScopeResult, ScopeStatus, Tally};
pub use provider::Provider;
pub use scan::{run_scan, ScanOptions, ScanReport, ScopeRequest};
