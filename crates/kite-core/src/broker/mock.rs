//! Scriptable in-memory broker for tests.
//!
//! `MockBroker` accepts every order by default, handing out sequential ids.
//! Tests script deviations up front (rejections, timeouts, fills) and assert
//! on the recorded call log afterwards.

use super::{BracketIds, BracketSpec, BrokerGateway, CancelAck, OrderSpec};
use crate::error::{Error, Result};
use crate::types::{Candle, Instrument, Margins, OrderSnapshot, OrderStatus, Quote};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// One recorded gateway call.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerCall {
    Place(OrderSpec),
    PlaceBracket(BracketSpec),
    Cancel(String),
    Status(String),
    FindByTag(String),
}

/// Scripted response for the next placement call.
#[derive(Debug, Clone)]
pub enum PlaceScript {
    Accept,
    Reject(String),
    /// Simulate a transport timeout. When `landed` is true the order still
    /// reached the broker and is discoverable by tag.
    Timeout { landed: bool },
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    place_scripts: VecDeque<PlaceScript>,
    orders: HashMap<String, OrderSnapshot>,
    tags: HashMap<String, String>,
    quotes: HashMap<String, Quote>,
    candles: HashMap<String, Vec<Candle>>,
    available_cash: Decimal,
    calls: Vec<BrokerCall>,
}

#[derive(Default)]
pub struct MockBroker {
    inner: Mutex<Inner>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a scripted response for the next placement (applies to both
    /// single and bracket placements, consumed in order).
    pub fn script_place(&self, script: PlaceScript) {
        self.inner.lock().unwrap().place_scripts.push_back(script);
    }

    /// Overwrite the broker-side state of an order, driving poll transitions.
    pub fn set_order_status(&self, order_id: &str, snapshot: OrderSnapshot) {
        self.inner
            .lock()
            .unwrap()
            .orders
            .insert(order_id.to_string(), snapshot);
    }

    pub fn set_quote(&self, instrument: &Instrument, quote: Quote) {
        self.inner
            .lock()
            .unwrap()
            .quotes
            .insert(instrument.key(), quote);
    }

    pub fn set_candles(&self, instrument: &Instrument, candles: Vec<Candle>) {
        self.inner
            .lock()
            .unwrap()
            .candles
            .insert(instrument.key(), candles);
    }

    pub fn set_available_cash(&self, cash: Decimal) {
        self.inner.lock().unwrap().available_cash = cash;
    }

    pub fn calls(&self) -> Vec<BrokerCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn cancel_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| matches!(c, BrokerCall::Cancel(_)))
            .count()
    }

    fn accept_order(inner: &mut Inner, tag: &str) -> String {
        inner.next_id += 1;
        let order_id = format!("MOCK-{}", inner.next_id);
        inner.orders.insert(order_id.clone(), OrderSnapshot::open());
        inner.tags.insert(tag.to_string(), order_id.clone());
        order_id
    }

    fn place(&self, tag: &str) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        match inner.place_scripts.pop_front().unwrap_or(PlaceScript::Accept) {
            PlaceScript::Accept => Ok(Self::accept_order(&mut inner, tag)),
            PlaceScript::Reject(message) => Err(Error::Broker { message }),
            PlaceScript::Timeout { landed } => {
                if landed {
                    Self::accept_order(&mut inner, tag);
                }
                Err(Error::BrokerUnavailable {
                    message: "simulated timeout".to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl BrokerGateway for MockBroker {
    async fn place_order(&self, spec: &OrderSpec) -> Result<String> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .push(BrokerCall::Place(spec.clone()));
        self.place(&spec.tag)
    }

    async fn place_bracket_order(&self, spec: &BracketSpec) -> Result<BracketIds> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .push(BrokerCall::PlaceBracket(spec.clone()));
        let primary_id = self.place(&spec.tag)?;

        let mut inner = self.inner.lock().unwrap();
        let stop_id = Self::accept_order(&mut inner, &format!("{}-sl", spec.tag));
        let target_id = Self::accept_order(&mut inner, &format!("{}-tp", spec.tag));
        inner
            .orders
            .insert(stop_id.clone(), OrderSnapshot::new(OrderStatus::TriggerPending, 0, Decimal::ZERO));
        Ok(BracketIds {
            primary_id,
            stop_id,
            target_id,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<CancelAck> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(BrokerCall::Cancel(order_id.to_string()));
        match inner.orders.get_mut(order_id) {
            Some(snapshot) if snapshot.status.is_terminal() => Ok(CancelAck::AlreadyClosed),
            Some(snapshot) => {
                snapshot.status = OrderStatus::Cancelled;
                Ok(CancelAck::Cancelled)
            }
            None => Err(Error::OrderNotFound(order_id.to_string())),
        }
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderSnapshot> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(BrokerCall::Status(order_id.to_string()));
        inner
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| Error::OrderNotFound(order_id.to_string()))
    }

    async fn find_order_by_tag(&self, tag: &str) -> Result<Option<(String, OrderSnapshot)>> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(BrokerCall::FindByTag(tag.to_string()));
        Ok(inner.tags.get(tag).map(|order_id| {
            let snapshot = inner.orders[order_id].clone();
            (order_id.clone(), snapshot)
        }))
    }

    async fn quote(&self, instrument: &Instrument) -> Result<Quote> {
        self.inner
            .lock()
            .unwrap()
            .quotes
            .get(&instrument.key())
            .cloned()
            .ok_or_else(|| Error::Broker {
                message: format!("no quote scripted for {}", instrument.key()),
            })
    }

    async fn historical_candles(&self, instrument: &Instrument, _days: u32) -> Result<Vec<Candle>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .candles
            .get(&instrument.key())
            .cloned()
            .unwrap_or_default())
    }

    async fn margins(&self) -> Result<Margins> {
        Ok(Margins {
            available_cash: self.inner.lock().unwrap().available_cash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Exchange, OrderIntent, OrderSide};

    fn spec() -> OrderSpec {
        let intent = OrderIntent::market(Instrument::new(Exchange::Nse, "TCS"), OrderSide::Buy, 5);
        OrderSpec::primary(&intent, "tag-1".to_string())
    }

    #[tokio::test]
    async fn test_default_accepts_with_sequential_ids() {
        let broker = MockBroker::new();
        let first = broker.place_order(&spec()).await.unwrap();
        let second = broker.place_order(&spec()).await.unwrap();
        assert_eq!(first, "MOCK-1");
        assert_eq!(second, "MOCK-2");
    }

    #[tokio::test]
    async fn test_scripted_timeout_with_landed_order_found_by_tag() {
        let broker = MockBroker::new();
        broker.script_place(PlaceScript::Timeout { landed: true });

        let err = broker.place_order(&spec()).await.unwrap_err();
        assert!(err.is_unknown_outcome());

        let found = broker.find_order_by_tag("tag-1").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_margins_report_scripted_cash() {
        let broker = MockBroker::new();
        broker.set_available_cash(Decimal::new(75_000, 0));
        let margins = broker.margins().await.unwrap();
        assert_eq!(margins.available_cash, Decimal::new(75_000, 0));
    }

    #[tokio::test]
    async fn test_cancel_of_filled_order_reports_already_closed() {
        let broker = MockBroker::new();
        let id = broker.place_order(&spec()).await.unwrap();
        broker.set_order_status(&id, OrderSnapshot::filled(5, Decimal::new(100, 0)));
        assert_eq!(broker.cancel_order(&id).await.unwrap(), CancelAck::AlreadyClosed);
    }
}
