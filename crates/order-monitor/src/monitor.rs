//! Reconciliation loop advancing order-group state machines.
//!
//! The monitor is the only mutator of order groups after creation. Each poll
//! pass reads broker order state and applies the enumerated transitions:
//!
//! `PendingPrimary → PrimaryOpen → Protected → {ClosedByStop,
//! ClosedByTarget, ClosedManual, Failed}`
//!
//! When a protective leg fills, the sibling leg's cancellation is issued
//! before the group is marked terminal. Cancellation failures caused by the
//! sibling having filled or closed concurrently are benign: over-cancelling
//! is harmless, a missed cancellation is not.

use kite_core::broker::{BrokerGateway, CancelAck};
use kite_core::types::{GroupState, OrderGroup, OrderSide, OrderSnapshot, OrderStatus};
use kite_core::Result;
use risk_manager::RiskManager;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use trading_engine::GroupStore;

pub struct OrderMonitor {
    broker: Arc<dyn BrokerGateway>,
    store: Arc<GroupStore>,
    risk: Arc<RiskManager>,
    poll_interval: Duration,
}

impl OrderMonitor {
    pub fn new(
        broker: Arc<dyn BrokerGateway>,
        store: Arc<GroupStore>,
        risk: Arc<RiskManager>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            broker,
            store,
            risk,
            poll_interval,
        }
    }

    /// Run the poll loop until `shutdown` fires. Open groups are resumed from
    /// persistence before the first pass; on shutdown the in-flight pass
    /// completes and one final pass reconciles protected groups before exit.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let resumed = self.store.load_open().await?;
        info!(
            resumed,
            poll_secs = self.poll_interval.as_secs(),
            "Order monitor started"
        );

        let mut tick = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.run_once().await;
                }
                _ = shutdown.changed() => {
                    info!("Shutdown requested, draining reconciliation");
                    self.run_once().await;
                    break;
                }
            }
        }

        info!("Order monitor stopped");
        Ok(())
    }

    /// One reconciliation pass over all open groups. Per-group failures are
    /// logged and retried on the next pass rather than aborting the loop.
    pub async fn run_once(&self) {
        for group in self.store.open_groups() {
            let group_id = group.id;
            if let Err(e) = self.reconcile(group).await {
                warn!(%group_id, error = %e, "Reconciliation failed, will retry next pass");
            }
        }
    }

    async fn reconcile(&self, group: OrderGroup) -> Result<()> {
        match group.state {
            GroupState::PendingPrimary | GroupState::PrimaryOpen => {
                self.reconcile_primary(group).await
            }
            GroupState::Protected => self.reconcile_protected(group).await,
            _ => Ok(()),
        }
    }

    /// Advance a group whose primary order has not yet fully filled.
    async fn reconcile_primary(&self, group: OrderGroup) -> Result<()> {
        let snapshot = self.broker.order_status(&group.primary_order_id).await?;

        let next = match snapshot.status {
            OrderStatus::Complete => GroupState::Protected,
            OrderStatus::PartiallyFilled if group.state == GroupState::PendingPrimary => {
                GroupState::PrimaryOpen
            }
            OrderStatus::Rejected | OrderStatus::Cancelled => GroupState::Failed,
            _ => return Ok(()),
        };

        info!(
            group_id = %group.id,
            from = ?group.state,
            to = ?next,
            "Order group transition"
        );
        self.store
            .update_with(group.id, |g| {
                if next == GroupState::Protected {
                    g.entry_price = Some(snapshot.average_price);
                }
                g.state = next;
                g.touch();
            })
            .await?;
        Ok(())
    }

    /// Advance a protected group: watch the protective legs, cancel the
    /// sibling on a fill, and record the realized outcome exactly once.
    async fn reconcile_protected(&self, group: OrderGroup) -> Result<()> {
        let stop = match &group.stop_loss_order_id {
            Some(id) => Some((id.clone(), self.broker.order_status(id).await?)),
            None => None,
        };
        let target = match &group.target_order_id {
            Some(id) => Some((id.clone(), self.broker.order_status(id).await?)),
            None => None,
        };

        if let Some((stop_id, snapshot)) = &stop {
            if snapshot.status == OrderStatus::Complete {
                self.cancel_sibling(&group, stop_id).await;
                return self
                    .close(group, GroupState::ClosedByStop, stop_id, snapshot)
                    .await;
            }
        }

        if let Some((target_id, snapshot)) = &target {
            if snapshot.status == OrderStatus::Complete {
                self.cancel_sibling(&group, target_id).await;
                return self
                    .close(group, GroupState::ClosedByTarget, target_id, snapshot)
                    .await;
            }
        }

        // A leg the broker rejects after placement (resting-order RMS check)
        // leaves the position unprotected. Drop the dead id so a protection
        // retry places a replacement.
        let stop_rejected = stop
            .as_ref()
            .is_some_and(|(_, s)| s.status == OrderStatus::Rejected);
        let target_rejected = target
            .as_ref()
            .is_some_and(|(_, s)| s.status == OrderStatus::Rejected);
        if stop_rejected || target_rejected {
            warn!(
                group_id = %group.id,
                stop_rejected,
                target_rejected,
                "Protective leg rejected by broker, protection lost"
            );
            self.store
                .update_with(group.id, |g| {
                    if stop_rejected {
                        g.stop_loss_order_id = None;
                    }
                    if target_rejected {
                        g.target_order_id = None;
                    }
                    g.touch();
                })
                .await?;
            return Ok(());
        }

        // Both protective legs cancelled without a fill means the caller
        // requested cancellation broker-side.
        let all_cancelled = group.has_protection()
            && stop
                .iter()
                .chain(target.iter())
                .all(|(_, s)| s.status == OrderStatus::Cancelled);
        if all_cancelled {
            info!(group_id = %group.id, "Protective legs cancelled, closing group manually");
            self.store
                .update_with(group.id, |g| {
                    g.state = GroupState::ClosedManual;
                    g.touch();
                })
                .await?;
        }

        Ok(())
    }

    /// Cancel the protective leg opposite `filled_leg`. Failures are treated
    /// as benign: the sibling may have filled or been cancelled concurrently,
    /// and the next pass will observe whatever actually happened.
    async fn cancel_sibling(&self, group: &OrderGroup, filled_leg: &str) {
        let Some(sibling) = group.sibling_of(filled_leg) else {
            return;
        };
        match self.broker.cancel_order(sibling).await {
            Ok(CancelAck::Cancelled) => {
                info!(group_id = %group.id, order_id = sibling, "Cancelled sibling leg")
            }
            Ok(CancelAck::AlreadyClosed) => {
                debug!(group_id = %group.id, order_id = sibling, "Sibling leg already closed")
            }
            Err(e) => {
                warn!(group_id = %group.id, order_id = sibling, error = %e, "Sibling cancellation failed")
            }
        }
    }

    /// Mark the group terminal and record realized P&L, keyed by the exit
    /// order id so duplicate observation of the same fill stays idempotent.
    async fn close(
        &self,
        group: OrderGroup,
        state: GroupState,
        exit_order_id: &str,
        exit: &OrderSnapshot,
    ) -> Result<()> {
        let entry_price = match group.entry_price {
            Some(price) => price,
            // Resumed group whose entry fill was never observed in memory.
            None => {
                self.broker
                    .order_status(&group.primary_order_id)
                    .await?
                    .average_price
            }
        };

        let quantity = Decimal::from(exit.filled_quantity);
        let pnl = match group.intent.side {
            OrderSide::Buy => (exit.average_price - entry_price) * quantity,
            OrderSide::Sell => (entry_price - exit.average_price) * quantity,
        };

        self.risk.record_outcome(exit_order_id, pnl);

        info!(
            group_id = %group.id,
            to = ?state,
            %pnl,
            exit_price = %exit.average_price,
            "Order group closed"
        );
        let exit_price = exit.average_price;
        self.store
            .update_with(group.id, |g| {
                g.state = state;
                g.entry_price = Some(entry_price);
                g.exit_price = Some(exit_price);
                g.realized_pnl = Some(pnl);
                g.touch();
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kite_core::broker::mock::MockBroker;
    use kite_core::config::RiskConfig;
    use kite_core::types::{
        Exchange, Instrument, OrderIntent, OrderSide, PlacementRoute,
    };

    fn monitor() -> (Arc<MockBroker>, Arc<GroupStore>, Arc<RiskManager>, OrderMonitor) {
        let broker = Arc::new(MockBroker::new());
        let store = Arc::new(GroupStore::new());
        let risk = Arc::new(RiskManager::new(RiskConfig {
            enforce_market_hours: false,
            ..RiskConfig::default()
        }));
        let monitor = OrderMonitor::new(
            broker.clone(),
            store.clone(),
            risk.clone(),
            Duration::from_secs(1),
        );
        (broker, store, risk, monitor)
    }

    async fn protected_group(
        broker: &MockBroker,
        store: &GroupStore,
        side: OrderSide,
    ) -> OrderGroup {
        let intent = OrderIntent::limit(
            Instrument::new(Exchange::Nse, "INFY"),
            side,
            10,
            Decimal::new(1380, 0),
        );
        let mut group = OrderGroup::new(
            intent,
            PlacementRoute::Legged,
            "P-1".to_string(),
            Some("S-1".to_string()),
            Some("T-1".to_string()),
        );
        group.state = GroupState::Protected;
        group.entry_price = Some(Decimal::new(1380, 0));
        store.insert(group.clone()).await.unwrap();

        broker.set_order_status("P-1", OrderSnapshot::filled(10, Decimal::new(1380, 0)));
        broker.set_order_status("S-1", OrderSnapshot::open());
        broker.set_order_status("T-1", OrderSnapshot::open());
        group
    }

    #[tokio::test]
    async fn test_primary_fill_moves_group_to_protected() {
        let (broker, store, _risk, monitor) = monitor();
        let intent = OrderIntent::market(
            Instrument::new(Exchange::Nse, "INFY"),
            OrderSide::Buy,
            10,
        );
        let group = OrderGroup::new(
            intent,
            PlacementRoute::Legged,
            "P-1".to_string(),
            Some("S-1".to_string()),
            None,
        );
        store.insert(group.clone()).await.unwrap();
        broker.set_order_status("P-1", OrderSnapshot::filled(10, Decimal::new(1381, 0)));
        broker.set_order_status("S-1", OrderSnapshot::open());

        monitor.run_once().await;

        let group = store.get(group.id).unwrap();
        assert_eq!(group.state, GroupState::Protected);
        assert_eq!(group.entry_price, Some(Decimal::new(1381, 0)));
    }

    #[tokio::test]
    async fn test_partial_fill_moves_group_to_primary_open() {
        let (broker, store, _risk, monitor) = monitor();
        let intent = OrderIntent::market(
            Instrument::new(Exchange::Nse, "INFY"),
            OrderSide::Buy,
            10,
        );
        let group = OrderGroup::new(intent, PlacementRoute::Legged, "P-1".to_string(), None, None);
        store.insert(group.clone()).await.unwrap();
        broker.set_order_status(
            "P-1",
            OrderSnapshot::new(OrderStatus::PartiallyFilled, 4, Decimal::new(1380, 0)),
        );

        monitor.run_once().await;
        assert_eq!(store.get(group.id).unwrap().state, GroupState::PrimaryOpen);
    }

    #[tokio::test]
    async fn test_rejected_primary_fails_group_without_outcome() {
        let (broker, store, risk, monitor) = monitor();
        let intent = OrderIntent::market(
            Instrument::new(Exchange::Nse, "INFY"),
            OrderSide::Buy,
            10,
        );
        let group = OrderGroup::new(intent, PlacementRoute::Legged, "P-1".to_string(), None, None);
        store.insert(group.clone()).await.unwrap();
        broker.set_order_status(
            "P-1",
            OrderSnapshot::new(OrderStatus::Rejected, 0, Decimal::ZERO),
        );

        monitor.run_once().await;
        assert_eq!(store.get(group.id).unwrap().state, GroupState::Failed);
        assert_eq!(risk.cumulative_loss(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_stop_fill_cancels_target_and_closes_by_stop() {
        let (broker, store, risk, monitor) = monitor();
        let group = protected_group(&broker, &store, OrderSide::Buy).await;

        broker.set_order_status("S-1", OrderSnapshot::filled(10, Decimal::new(1360, 0)));
        monitor.run_once().await;

        let group = store.get(group.id).unwrap();
        assert_eq!(group.state, GroupState::ClosedByStop);
        assert_eq!(group.exit_price, Some(Decimal::new(1360, 0)));
        // (1360 - 1380) * 10 = -200 realized on a Buy position.
        assert_eq!(group.realized_pnl, Some(Decimal::new(-200, 0)));
        assert_eq!(risk.cumulative_loss(), Decimal::new(200, 0));
        assert_eq!(broker.cancel_count(), 1);
    }

    #[tokio::test]
    async fn test_target_fill_cancels_stop_and_closes_by_target() {
        let (broker, store, risk, monitor) = monitor();
        let group = protected_group(&broker, &store, OrderSide::Buy).await;

        broker.set_order_status("T-1", OrderSnapshot::filled(10, Decimal::new(1420, 0)));
        monitor.run_once().await;

        let group = store.get(group.id).unwrap();
        assert_eq!(group.state, GroupState::ClosedByTarget);
        assert_eq!(group.realized_pnl, Some(Decimal::new(400, 0)));
        // Profits never grow the loss counter.
        assert_eq!(risk.cumulative_loss(), Decimal::ZERO);
        assert_eq!(broker.cancel_count(), 1);
    }

    #[tokio::test]
    async fn test_sell_side_pnl_is_negated() {
        let (broker, store, _risk, monitor) = monitor();
        let group = protected_group(&broker, &store, OrderSide::Sell).await;

        // A short entered at 1380 exiting at 1360 is a profit.
        broker.set_order_status("S-1", OrderSnapshot::filled(10, Decimal::new(1360, 0)));
        monitor.run_once().await;

        assert_eq!(
            store.get(group.id).unwrap().realized_pnl,
            Some(Decimal::new(200, 0))
        );
    }

    #[tokio::test]
    async fn test_sibling_already_closed_is_benign() {
        let (broker, store, _risk, monitor) = monitor();
        let group = protected_group(&broker, &store, OrderSide::Buy).await;

        // Both legs raced to terminal state at the broker.
        broker.set_order_status("S-1", OrderSnapshot::filled(10, Decimal::new(1360, 0)));
        broker.set_order_status("T-1", OrderSnapshot::filled(10, Decimal::new(1420, 0)));
        monitor.run_once().await;

        // Still closes by stop; the failed cancellation does not block.
        assert_eq!(store.get(group.id).unwrap().state, GroupState::ClosedByStop);
    }

    #[tokio::test]
    async fn test_duplicate_observation_records_outcome_once() {
        let (broker, store, risk, monitor) = monitor();
        let group = protected_group(&broker, &store, OrderSide::Buy).await;

        broker.set_order_status("S-1", OrderSnapshot::filled(10, Decimal::new(1360, 0)));
        monitor.run_once().await;

        // Force the group back to Protected to simulate a replayed pass.
        let mut replay = store.get(group.id).unwrap();
        replay.state = GroupState::Protected;
        store.update(replay).await.unwrap();
        monitor.run_once().await;

        assert_eq!(risk.cumulative_loss(), Decimal::new(200, 0));
    }

    #[tokio::test]
    async fn test_both_legs_cancelled_closes_manually() {
        let (broker, store, risk, monitor) = monitor();
        let group = protected_group(&broker, &store, OrderSide::Buy).await;

        broker.set_order_status(
            "S-1",
            OrderSnapshot::new(OrderStatus::Cancelled, 0, Decimal::ZERO),
        );
        broker.set_order_status(
            "T-1",
            OrderSnapshot::new(OrderStatus::Cancelled, 0, Decimal::ZERO),
        );
        monitor.run_once().await;

        assert_eq!(store.get(group.id).unwrap().state, GroupState::ClosedManual);
        assert_eq!(risk.cumulative_loss(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_rejected_stop_leg_is_dropped_for_replacement() {
        let (broker, store, risk, monitor) = monitor();
        let group = protected_group(&broker, &store, OrderSide::Buy).await;

        // The broker rejects the resting stop after placement.
        broker.set_order_status(
            "S-1",
            OrderSnapshot::new(OrderStatus::Rejected, 0, Decimal::ZERO),
        );
        monitor.run_once().await;

        let group = store.get(group.id).unwrap();
        // Still protected by the target leg, but the dead stop id is gone so
        // a protection retry will place a replacement.
        assert_eq!(group.state, GroupState::Protected);
        assert_eq!(group.stop_loss_order_id, None);
        assert_eq!(group.target_order_id, Some("T-1".to_string()));
        assert_eq!(risk.cumulative_loss(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_shutdown_drains_current_pass() {
        let (broker, store, _risk, monitor) = monitor();
        let group = protected_group(&broker, &store, OrderSide::Buy).await;
        broker.set_order_status("S-1", OrderSnapshot::filled(10, Decimal::new(1360, 0)));

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        monitor.run(rx).await.unwrap();

        assert_eq!(store.get(group.id).unwrap().state, GroupState::ClosedByStop);
    }
}
