//! Broker gateway boundary.
//!
//! The trait below is the only seam through which the core talks to the
//! brokerage network API. `KiteClient` is the production implementation;
//! `MockBroker` is a scriptable in-memory stand-in for tests.

mod kite;
pub mod mock;

pub use kite::KiteClient;

use crate::error::Result;
use crate::types::{Candle, Instrument, Margins, OrderSnapshot, Quote};
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{OrderIntent, OrderSide, OrderType, ProductType};

/// Wire-level specification of a single order placement.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub instrument: Instrument,
    pub side: OrderSide,
    pub quantity: u32,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    /// Trigger price for SL / SL-M orders.
    pub trigger_price: Option<Decimal>,
    pub product: ProductType,
    /// Caller-generated tag; the only handle for re-querying an order whose
    /// placement call timed out.
    pub tag: String,
}

impl OrderSpec {
    /// The primary leg of an intent, carrying the intent's own side and price.
    pub fn primary(intent: &OrderIntent, tag: String) -> Self {
        Self {
            instrument: intent.instrument.clone(),
            side: intent.side,
            quantity: intent.quantity,
            order_type: intent.order_type,
            price: intent.limit_price,
            trigger_price: None,
            product: intent.product,
            tag,
        }
    }

    /// A stop-loss leg closing the intent's position: opposite side, SL-M at
    /// the stop price.
    pub fn stop_leg(intent: &OrderIntent, stop_price: Decimal, tag: String) -> Self {
        Self {
            instrument: intent.instrument.clone(),
            side: intent.side.opposite(),
            quantity: intent.quantity,
            order_type: OrderType::StopLossMarket,
            price: None,
            trigger_price: Some(stop_price),
            product: intent.product,
            tag,
        }
    }

    /// A target leg closing the intent's position: opposite side, limit at
    /// the target price.
    pub fn target_leg(intent: &OrderIntent, target_price: Decimal, tag: String) -> Self {
        Self {
            instrument: intent.instrument.clone(),
            side: intent.side.opposite(),
            quantity: intent.quantity,
            order_type: OrderType::Limit,
            price: Some(target_price),
            trigger_price: None,
            product: intent.product,
            tag,
        }
    }

    /// Override the quantity (used when protecting a partially adjusted fill).
    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }
}

/// Wire-level specification of a native bracket-order placement.
#[derive(Debug, Clone, PartialEq)]
pub struct BracketSpec {
    pub instrument: Instrument,
    pub side: OrderSide,
    pub quantity: u32,
    pub price: Decimal,
    /// Stop-loss offset from the entry price (broker-side points).
    pub stop_loss_offset: Decimal,
    /// Target offset from the entry price (broker-side points).
    pub target_offset: Decimal,
    pub tag: String,
}

impl BracketSpec {
    /// Build from an intent; requires a limit price and both protective prices.
    pub fn from_intent(intent: &OrderIntent, reference_price: Decimal, tag: String) -> Option<Self> {
        let stop = intent.stop_loss_price?;
        let target = intent.target_price?;
        let price = intent.limit_price.unwrap_or(reference_price);
        Some(Self {
            instrument: intent.instrument.clone(),
            side: intent.side,
            quantity: intent.quantity,
            price,
            stop_loss_offset: (price - stop).abs(),
            target_offset: (target - price).abs(),
            tag,
        })
    }
}

/// Identifiers returned by a successful bracket placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BracketIds {
    pub primary_id: String,
    pub stop_id: String,
    pub target_id: String,
}

/// Outcome of a cancellation request. "Already closed" is success: the
/// position the cancel was protecting against no longer exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelAck {
    Cancelled,
    AlreadyClosed,
}

/// The brokerage network boundary required by the core.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Place a single order; returns the broker order id.
    async fn place_order(&self, spec: &OrderSpec) -> Result<String>;

    /// Place a native bracket order bundling entry, stop-loss, and target.
    async fn place_bracket_order(&self, spec: &BracketSpec) -> Result<BracketIds>;

    /// Cancel an order, tolerating orders that already reached terminal state.
    async fn cancel_order(&self, order_id: &str) -> Result<CancelAck>;

    /// Current state of an order.
    async fn order_status(&self, order_id: &str) -> Result<OrderSnapshot>;

    /// Look up an order by its placement tag. Used to resolve unknown-outcome
    /// placements after a timeout.
    async fn find_order_by_tag(&self, tag: &str) -> Result<Option<(String, OrderSnapshot)>>;

    /// Last-traded snapshot for an instrument.
    async fn quote(&self, instrument: &Instrument) -> Result<Quote>;

    /// Daily candles for the trailing `days` calendar days.
    async fn historical_candles(&self, instrument: &Instrument, days: u32) -> Result<Vec<Candle>>;

    /// Account margin summary.
    async fn margins(&self) -> Result<Margins>;
}
