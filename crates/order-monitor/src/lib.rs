//! Order Monitor
//!
//! Background reconciliation for open order groups: polls broker order state
//! on a fixed cadence, advances each group's lifecycle state machine, and
//! enforces mutual cancellation of protective legs.

pub mod monitor;

pub use monitor::OrderMonitor;
