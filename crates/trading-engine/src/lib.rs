//! Trading Engine
//!
//! Market analysis and the protected-order placement protocol: a pure
//! sequential analyzer, the execution manager that turns admitted intents
//! into broker order groups, the shared group registry, and the typed
//! service facade consumed by the transport layer.

pub mod analyzer;
pub mod error;
pub mod executor;
pub mod group_store;
pub mod service;

pub use analyzer::SequentialAnalyzer;
pub use error::ExecutionError;
pub use executor::ExecutionManager;
pub use group_store::GroupStore;
pub use service::{GroupQuery, TradingService};
