//! Traffic Refinery core: flow classification and pluggable per-flow
//! counter collection.

pub mod anonymize;
pub mod cache;
pub mod config;
pub mod counters;
pub mod error;
pub mod flowcache;
pub mod servicemap;
pub mod stats;

pub use config::Config;
pub use error::{RefineryError, Result};
pub use flowcache::FlowCache;
pub use servicemap::ServiceMap;
