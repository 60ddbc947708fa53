//! Kite Core Library
//!
//! Shared types, broker gateway, configuration, and database models for the
//! protected-order trading system.

pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod types;

pub use error::{Error, Result};
