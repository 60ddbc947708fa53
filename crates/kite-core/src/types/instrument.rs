//! Exchange-listed instrument reference data.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Exchange segment an instrument trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Exchange {
    Nse,
    Bse,
    Nfo,
    Mcx,
}

impl Exchange {
    /// Derivative segments enforce lot-size multiples on order quantity.
    pub fn is_derivative(&self) -> bool {
        matches!(self, Exchange::Nfo | Exchange::Mcx)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Nse => "NSE",
            Exchange::Bse => "BSE",
            Exchange::Nfo => "NFO",
            Exchange::Mcx => "MCX",
        }
    }
}

/// Immutable instrument reference data, owned externally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub exchange: Exchange,
    pub tradingsymbol: String,
    /// Minimum tradable unit multiple (1 for equities).
    pub lot_size: u32,
    /// Minimum price increment.
    pub tick_size: Decimal,
    /// Broker-assigned numeric token, required for historical data lookups.
    pub instrument_token: Option<u64>,
}

impl Instrument {
    pub fn new(exchange: Exchange, tradingsymbol: impl Into<String>) -> Self {
        Self {
            exchange,
            tradingsymbol: tradingsymbol.into(),
            lot_size: 1,
            tick_size: Decimal::new(5, 2),
            instrument_token: None,
        }
    }

    pub fn with_lot_size(mut self, lot_size: u32) -> Self {
        self.lot_size = lot_size;
        self
    }

    pub fn with_token(mut self, token: u64) -> Self {
        self.instrument_token = Some(token);
        self
    }

    /// Instrument key in the broker's `EXCHANGE:SYMBOL` format.
    pub fn key(&self) -> String {
        format!("{}:{}", self.exchange.as_str(), self.tradingsymbol)
    }
}
