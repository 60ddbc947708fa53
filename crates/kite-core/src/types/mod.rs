//! Core domain types for instruments, orders, quotes, and order groups.

mod analysis;
mod group;
mod instrument;
mod order;
mod quote;

pub use analysis::{AnalysisResult, Confidence, Decision, ReasoningStep};
pub use group::{GroupState, OrderGroup, PlacementRoute};
pub use instrument::{Exchange, Instrument};
pub use order::{
    OrderIntent, OrderSide, OrderSnapshot, OrderStatus, OrderType, ProductType,
};
pub use quote::{Candle, Margins, Quote};
