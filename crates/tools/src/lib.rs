//! Tool execution for cairn.
//!
//! - [`health`]: per-provider circuit breaker shared by all requests
//! - [`gateway`]: runs one tool call with a timeout and reports the outcome
//! - [`catalog`]: runtime tool discovery, ordered by provider health
//! - [`local`]: in-process provider over [`cairn_core::tool::Tool`] impls
//! - [`sanitize`]: log-safe copies of tool arguments

pub mod builtin;
pub mod catalog;
pub mod gateway;
pub mod health;
pub mod local;
pub mod sanitize;

pub use builtin::builtin_provider;
pub use catalog::{CatalogEntry, CatalogSnapshot, DEGRADED_HINT, OfferedTools, ToolCatalog};
pub use gateway::{ToolExecution, ToolGateway};
pub use health::{HealthStatus, HealthThresholds, HealthTracker, ToolHealth};
pub use local::LocalToolProvider;
