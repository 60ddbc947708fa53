//! Risk Manager
//!
//! Admission gate and realized-P&L accounting for the protected-order
//! trading system. Every order intent passes through [`RiskManager::admit`]
//! before it may reach execution.

pub mod manager;

pub use manager::{AdmissionResult, RejectReason, RiskManager};
