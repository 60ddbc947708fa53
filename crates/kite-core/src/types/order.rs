//! Order intents and broker-side order state.

use crate::error::{Error, Result};
use crate::types::Instrument;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of the order (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The closing side for a position opened on this side.
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Broker order type (Kite MARKET / LIMIT / SL / SL-M).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    /// Stop-loss limit: trigger price plus limit price.
    StopLoss,
    /// Stop-loss market: trigger price only.
    StopLossMarket,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::StopLoss => "SL",
            OrderType::StopLossMarket => "SL-M",
        }
    }
}

/// Broker settlement/margin classification (Kite MIS / NRML / CNC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    Intraday,
    CarryForward,
    Delivery,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::Intraday => "MIS",
            ProductType::CarryForward => "NRML",
            ProductType::Delivery => "CNC",
        }
    }
}

/// A caller-constructed trading intent, validated at the boundary before it
/// reaches admission or execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub instrument: Instrument,
    pub side: OrderSide,
    pub quantity: u32,
    pub order_type: OrderType,
    /// Limit price; required for limit orders.
    pub limit_price: Option<Decimal>,
    /// Protective stop-loss level; a leg is placed when set.
    pub stop_loss_price: Option<Decimal>,
    /// Protective target level; a leg is placed when set.
    pub target_price: Option<Decimal>,
    pub product: ProductType,
    /// Request native bracket-order placement when the broker supports it.
    pub use_bracket: bool,
}

impl OrderIntent {
    pub fn market(instrument: Instrument, side: OrderSide, quantity: u32) -> Self {
        Self {
            instrument,
            side,
            quantity,
            order_type: OrderType::Market,
            limit_price: None,
            stop_loss_price: None,
            target_price: None,
            product: ProductType::Delivery,
            use_bracket: false,
        }
    }

    pub fn limit(instrument: Instrument, side: OrderSide, quantity: u32, price: Decimal) -> Self {
        Self {
            instrument,
            side,
            quantity,
            order_type: OrderType::Limit,
            limit_price: Some(price),
            stop_loss_price: None,
            target_price: None,
            product: ProductType::Delivery,
            use_bracket: false,
        }
    }

    pub fn with_stop_loss(mut self, price: Decimal) -> Self {
        self.stop_loss_price = Some(price);
        self
    }

    pub fn with_target(mut self, price: Decimal) -> Self {
        self.target_price = Some(price);
        self
    }

    pub fn with_product(mut self, product: ProductType) -> Self {
        self.product = product;
        self
    }

    pub fn with_bracket(mut self) -> Self {
        self.use_bracket = true;
        self
    }

    pub fn has_protection(&self) -> bool {
        self.stop_loss_price.is_some() || self.target_price.is_some()
    }

    /// Validate the intent against its instrument. Caller errors are surfaced
    /// immediately and never retried.
    pub fn validate(&self) -> Result<()> {
        if self.quantity == 0 {
            return Err(Error::Validation("quantity must be positive".to_string()));
        }

        if self.instrument.exchange.is_derivative()
            && self.instrument.lot_size > 0
            && self.quantity % self.instrument.lot_size != 0
        {
            return Err(Error::Validation(format!(
                "quantity {} is not a multiple of lot size {} for {}",
                self.quantity, self.instrument.lot_size, self.instrument.tradingsymbol
            )));
        }

        match self.order_type {
            OrderType::Limit | OrderType::StopLoss => match self.limit_price {
                Some(p) if p > Decimal::ZERO => {}
                _ => {
                    return Err(Error::Validation(format!(
                        "{} order requires a positive limit price",
                        self.order_type.as_str()
                    )))
                }
            },
            _ => {}
        }

        for price in [self.stop_loss_price, self.target_price].into_iter().flatten() {
            if price <= Decimal::ZERO {
                return Err(Error::Validation(
                    "protective prices must be positive".to_string(),
                ));
            }
        }

        // Protective legs must sit on the correct side of the entry price.
        if let Some(reference) = self.limit_price {
            let (stop_ok, target_ok) = match self.side {
                OrderSide::Buy => (
                    self.stop_loss_price.map_or(true, |s| s < reference),
                    self.target_price.map_or(true, |t| t > reference),
                ),
                OrderSide::Sell => (
                    self.stop_loss_price.map_or(true, |s| s > reference),
                    self.target_price.map_or(true, |t| t < reference),
                ),
            };
            if !stop_ok {
                return Err(Error::Validation(format!(
                    "stop-loss must be on the loss side of the {} entry price",
                    self.side.as_str()
                )));
            }
            if !target_ok {
                return Err(Error::Validation(format!(
                    "target must be on the profit side of the {} entry price",
                    self.side.as_str()
                )));
            }
        }

        if self.use_bracket && !(self.stop_loss_price.is_some() && self.target_price.is_some()) {
            return Err(Error::Validation(
                "bracket orders require both stop-loss and target prices".to_string(),
            ));
        }

        Ok(())
    }
}

/// Current broker-side status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Accepted by the broker, resting on the book.
    Open,
    /// Stop order accepted, trigger not yet hit.
    TriggerPending,
    PartiallyFilled,
    Complete,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Complete | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// Broker order state as seen by a status poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub status: OrderStatus,
    pub filled_quantity: u32,
    pub average_price: Decimal,
}

impl OrderSnapshot {
    pub fn new(status: OrderStatus, filled_quantity: u32, average_price: Decimal) -> Self {
        Self {
            status,
            filled_quantity,
            average_price,
        }
    }

    pub fn filled(quantity: u32, price: Decimal) -> Self {
        Self::new(OrderStatus::Complete, quantity, price)
    }

    pub fn open() -> Self {
        Self::new(OrderStatus::Open, 0, Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Exchange;

    fn nifty_fut() -> Instrument {
        Instrument::new(Exchange::Nfo, "NIFTY24AUGFUT").with_lot_size(25)
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let intent = OrderIntent::market(Instrument::new(Exchange::Nse, "TCS"), OrderSide::Buy, 0);
        assert!(matches!(intent.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_lot_size_enforced_for_derivatives() {
        let intent = OrderIntent::market(nifty_fut(), OrderSide::Buy, 30);
        assert!(intent.validate().is_err());

        let intent = OrderIntent::market(nifty_fut(), OrderSide::Buy, 50);
        assert!(intent.validate().is_ok());
    }

    #[test]
    fn test_lot_size_not_enforced_for_equity() {
        let intent =
            OrderIntent::market(Instrument::new(Exchange::Nse, "TCS"), OrderSide::Buy, 7);
        assert!(intent.validate().is_ok());
    }

    #[test]
    fn test_limit_order_requires_price() {
        let mut intent =
            OrderIntent::market(Instrument::new(Exchange::Nse, "TCS"), OrderSide::Buy, 10);
        intent.order_type = OrderType::Limit;
        assert!(intent.validate().is_err());
    }

    #[test]
    fn test_protective_prices_on_correct_side() {
        let inst = Instrument::new(Exchange::Nse, "INFY");

        // Buy at 1380: stop must be below, target above.
        let good = OrderIntent::limit(inst.clone(), OrderSide::Buy, 10, Decimal::new(1380, 0))
            .with_stop_loss(Decimal::new(1360, 0))
            .with_target(Decimal::new(1420, 0));
        assert!(good.validate().is_ok());

        let inverted = OrderIntent::limit(inst.clone(), OrderSide::Buy, 10, Decimal::new(1380, 0))
            .with_stop_loss(Decimal::new(1400, 0));
        assert!(inverted.validate().is_err());

        // Sell side mirrors.
        let sell = OrderIntent::limit(inst, OrderSide::Sell, 10, Decimal::new(1380, 0))
            .with_stop_loss(Decimal::new(1400, 0))
            .with_target(Decimal::new(1340, 0));
        assert!(sell.validate().is_ok());
    }

    #[test]
    fn test_bracket_requires_both_legs() {
        let intent = OrderIntent::limit(
            Instrument::new(Exchange::Nse, "INFY"),
            OrderSide::Buy,
            10,
            Decimal::new(1380, 0),
        )
        .with_stop_loss(Decimal::new(1360, 0))
        .with_bracket();
        assert!(intent.validate().is_err());
    }

    #[test]
    fn test_opposite_side() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }
}
