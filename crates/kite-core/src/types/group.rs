//! Order groups: one logical protected position and its lifecycle state.

use crate::types::OrderIntent;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an order group. Advanced only by the order monitor
/// after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    /// Primary order accepted by the broker, not yet filled.
    PendingPrimary,
    /// Primary partially filled.
    PrimaryOpen,
    /// Primary fully filled; protective legs (if any) are live.
    Protected,
    ClosedByStop,
    ClosedByTarget,
    ClosedManual,
    Failed,
}

impl GroupState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GroupState::ClosedByStop
                | GroupState::ClosedByTarget
                | GroupState::ClosedManual
                | GroupState::Failed
        )
    }
}

/// Which placement branch produced the group's broker orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementRoute {
    /// Single native bracket-order request.
    Bracketed,
    /// Primary plus individually placed protective legs.
    Legged,
}

/// One logical protected position: primary order plus optional protective
/// legs, tracked to terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderGroup {
    pub id: Uuid,
    pub intent: OrderIntent,
    pub route: PlacementRoute,
    pub primary_order_id: String,
    pub stop_loss_order_id: Option<String>,
    pub target_order_id: Option<String>,
    pub state: GroupState,
    /// Average fill price of the primary leg, once observed.
    pub entry_price: Option<Decimal>,
    /// Average fill price of the closing leg, once observed.
    pub exit_price: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderGroup {
    pub fn new(
        intent: OrderIntent,
        route: PlacementRoute,
        primary_order_id: String,
        stop_loss_order_id: Option<String>,
        target_order_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            intent,
            route,
            primary_order_id,
            stop_loss_order_id,
            target_order_id,
            state: GroupState::PendingPrimary,
            entry_price: None,
            exit_price: None,
            realized_pnl: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn has_protection(&self) -> bool {
        self.stop_loss_order_id.is_some() || self.target_order_id.is_some()
    }

    /// The protective leg that must be cancelled when `filled_leg` fills.
    pub fn sibling_of(&self, filled_leg: &str) -> Option<&str> {
        match (&self.stop_loss_order_id, &self.target_order_id) {
            (Some(stop), Some(target)) if stop == filled_leg => Some(target.as_str()),
            (Some(stop), Some(target)) if target == filled_leg => Some(stop.as_str()),
            _ => None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Exchange, Instrument, OrderSide};

    fn test_group() -> OrderGroup {
        let intent = OrderIntent::market(Instrument::new(Exchange::Nse, "INFY"), OrderSide::Buy, 10);
        OrderGroup::new(
            intent,
            PlacementRoute::Legged,
            "P-1".to_string(),
            Some("S-1".to_string()),
            Some("T-1".to_string()),
        )
    }

    #[test]
    fn test_new_group_starts_pending() {
        let group = test_group();
        assert_eq!(group.state, GroupState::PendingPrimary);
        assert!(!group.is_terminal());
        assert!(group.has_protection());
    }

    #[test]
    fn test_sibling_lookup() {
        let group = test_group();
        assert_eq!(group.sibling_of("S-1"), Some("T-1"));
        assert_eq!(group.sibling_of("T-1"), Some("S-1"));
        assert_eq!(group.sibling_of("P-1"), None);
    }

    #[test]
    fn test_sibling_lookup_without_both_legs() {
        let mut group = test_group();
        group.target_order_id = None;
        assert_eq!(group.sibling_of("S-1"), None);
    }

    #[test]
    fn test_terminal_states() {
        for state in [
            GroupState::ClosedByStop,
            GroupState::ClosedByTarget,
            GroupState::ClosedManual,
            GroupState::Failed,
        ] {
            assert!(state.is_terminal());
        }
        for state in [
            GroupState::PendingPrimary,
            GroupState::PrimaryOpen,
            GroupState::Protected,
        ] {
            assert!(!state.is_terminal());
        }
    }
}
