//! Typed tool-call surface.
//!
//! `TradingService` is the facade an external transport (MCP server, CLI,
//! HTTP handler) talks to. It owns no state of its own; it wires the
//! analyzer, executor, and group store together behind four operations.

use crate::analyzer::{SequentialAnalyzer, TREND_WINDOW};
use crate::error::ExecutionError;
use crate::executor::ExecutionManager;
use crate::group_store::GroupStore;
use kite_core::broker::{BrokerGateway, CancelAck};
use kite_core::types::{AnalysisResult, GroupState, Instrument, OrderGroup, OrderIntent};
use kite_core::{Error, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// How to look up order groups.
#[derive(Debug, Clone)]
pub enum GroupQuery {
    Id(Uuid),
    Instrument(String),
}

pub struct TradingService {
    broker: Arc<dyn BrokerGateway>,
    analyzer: SequentialAnalyzer,
    executor: ExecutionManager,
    store: Arc<GroupStore>,
}

impl TradingService {
    pub fn new(
        broker: Arc<dyn BrokerGateway>,
        executor: ExecutionManager,
        store: Arc<GroupStore>,
    ) -> Self {
        Self {
            broker,
            analyzer: SequentialAnalyzer::new(),
            executor,
            store,
        }
    }

    /// Run the sequential analysis over the trailing `lookback_days` of daily
    /// candles plus the live quote as the most recent data point.
    pub async fn analyze(
        &self,
        instrument: &Instrument,
        lookback_days: u32,
    ) -> Result<AnalysisResult> {
        if (lookback_days as usize) < TREND_WINDOW {
            return Err(Error::Validation(format!(
                "lookback must be at least {TREND_WINDOW} days"
            )));
        }

        let candles = self.broker.historical_candles(instrument, lookback_days).await?;
        let quote = self.broker.quote(instrument).await?;

        let mut closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
        let mut volumes: Vec<u64> = candles.iter().map(|c| c.volume).collect();
        closes.push(quote.last_price);
        volumes.push(quote.volume);

        self.analyzer.analyze(instrument, &closes, &volumes)
    }

    /// Submit a protected order. See [`ExecutionManager::submit`].
    pub async fn submit_protected_order(
        &self,
        intent: OrderIntent,
    ) -> std::result::Result<OrderGroup, ExecutionError> {
        self.executor.submit(intent).await
    }

    /// Retry placement of a group's missing protective legs.
    pub async fn retry_protection(
        &self,
        group_id: Uuid,
    ) -> std::result::Result<OrderGroup, ExecutionError> {
        self.executor.retry_protection(group_id).await
    }

    /// Look up order groups by id or by trading symbol.
    pub fn order_group_status(&self, query: &GroupQuery) -> Vec<OrderGroup> {
        match query {
            GroupQuery::Id(id) => self.store.get(*id).into_iter().collect(),
            GroupQuery::Instrument(symbol) => self.store.find_by_symbol(symbol),
        }
    }

    /// Request cancellation of a non-terminal group. This only issues broker
    /// cancellations for the group's live orders; the monitor observes them
    /// and drives the group to `ClosedManual`. A group with no live broker
    /// orders left to cancel is closed directly.
    pub async fn cancel_order_group(&self, group_id: Uuid) -> Result<()> {
        let group = self
            .store
            .get(group_id)
            .ok_or_else(|| Error::Validation(format!("unknown order group {group_id}")))?;
        if group.is_terminal() {
            return Err(Error::Validation(format!(
                "order group {group_id} is already terminal"
            )));
        }

        let mut open_orders = Vec::new();
        if matches!(
            group.state,
            GroupState::PendingPrimary | GroupState::PrimaryOpen
        ) {
            open_orders.push(group.primary_order_id.clone());
        }
        open_orders.extend(group.stop_loss_order_id.iter().cloned());
        open_orders.extend(group.target_order_id.iter().cloned());

        if open_orders.is_empty() {
            // Nothing in flight at the broker; there is no cancellation for
            // the monitor to observe, so close the group here.
            self.store
                .update_with(group_id, |g| {
                    g.state = GroupState::ClosedManual;
                    g.touch();
                })
                .await?;
            info!(%group_id, "Closed unprotected order group on request");
            return Ok(());
        }

        for order_id in open_orders {
            match self.broker.cancel_order(&order_id).await? {
                CancelAck::Cancelled => {
                    info!(%group_id, order_id, "Cancelled order")
                }
                CancelAck::AlreadyClosed => {
                    info!(%group_id, order_id, "Order already closed, nothing to cancel")
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kite_core::broker::mock::MockBroker;
    use kite_core::config::RiskConfig;
    use kite_core::types::{Candle, Decision, Exchange, OrderSide, Quote};
    use risk_manager::RiskManager;

    fn service() -> (Arc<MockBroker>, Arc<GroupStore>, TradingService) {
        let broker = Arc::new(MockBroker::new());
        let store = Arc::new(GroupStore::new());
        let risk = Arc::new(RiskManager::new(RiskConfig {
            enforce_market_hours: false,
            ..RiskConfig::default()
        }));
        let executor = ExecutionManager::new(broker.clone(), risk, store.clone());
        let service = TradingService::new(broker.clone(), executor, store.clone());
        (broker, store, service)
    }

    fn candle(close: i64, volume: u64) -> Candle {
        let now = chrono::Utc::now();
        let price = Decimal::new(close, 0);
        Candle {
            date: now,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }

    #[tokio::test]
    async fn test_analyze_feeds_candles_and_quote() {
        let (broker, _store, service) = service();
        let instrument = Instrument::new(Exchange::Nse, "INFY");
        broker.set_candles(
            &instrument,
            vec![
                candle(100, 100),
                candle(102, 100),
                candle(104, 100),
                candle(106, 100),
            ],
        );
        broker.set_quote(
            &instrument,
            Quote {
                last_price: Decimal::new(110, 0),
                prev_close: Decimal::new(106, 0),
                volume: 200,
            },
        );

        let result = service.analyze(&instrument, 10).await.unwrap();
        assert_eq!(result.decision, Decision::Buy);
    }

    #[tokio::test]
    async fn test_analyze_rejects_short_lookback() {
        let (_broker, _store, service) = service();
        let instrument = Instrument::new(Exchange::Nse, "INFY");
        let err = service.analyze(&instrument, 3).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_cancel_issues_broker_cancels_only() {
        let (broker, store, service) = service();
        let intent = OrderIntent::limit(
            Instrument::new(Exchange::Nse, "INFY"),
            OrderSide::Buy,
            10,
            Decimal::new(1380, 0),
        )
        .with_stop_loss(Decimal::new(1360, 0))
        .with_target(Decimal::new(1420, 0));

        let group = service.submit_protected_order(intent).await.unwrap();
        service.cancel_order_group(group.id).await.unwrap();

        // Primary plus both protective legs cancelled broker-side; the group
        // itself stays non-terminal until the monitor observes this.
        assert_eq!(broker.cancel_count(), 3);
        assert_eq!(store.get(group.id).unwrap().state, GroupState::PendingPrimary);
    }

    #[tokio::test]
    async fn test_cancel_of_terminal_group_rejected() {
        let (_broker, store, service) = service();
        let intent = OrderIntent::market(
            Instrument::new(Exchange::Nse, "INFY"),
            OrderSide::Buy,
            10,
        );
        let group = OrderGroup::new(
            intent,
            kite_core::types::PlacementRoute::Legged,
            "P-1".to_string(),
            None,
            None,
        );
        let mut closed = group.clone();
        closed.state = GroupState::ClosedByStop;
        store.insert(closed).await.unwrap();

        assert!(service.cancel_order_group(group.id).await.is_err());
    }
}
