//! Protected-order placement protocol.
//!
//! Turns an admitted intent into a broker order group: either one native
//! bracket order, or a primary order plus individually placed protective
//! legs. Placement is rollback-safe in one direction only: a failed primary
//! leaves nothing behind, while a failed protective leg leaves the primary
//! live and surfaces `ProtectionIncomplete` so protection can be retried.
//! The manager performs no intent deduplication; avoiding duplicate
//! submissions is the caller's contract.

use crate::error::ExecutionError;
use crate::group_store::GroupStore;
use kite_core::broker::{BracketSpec, BrokerGateway, OrderSpec};
use kite_core::types::{OrderGroup, OrderIntent, OrderStatus, PlacementRoute};
use kite_core::Error;
use risk_manager::{AdmissionResult, RiskManager};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct ExecutionManager {
    broker: Arc<dyn BrokerGateway>,
    risk: Arc<RiskManager>,
    store: Arc<GroupStore>,
}

impl ExecutionManager {
    pub fn new(
        broker: Arc<dyn BrokerGateway>,
        risk: Arc<RiskManager>,
        store: Arc<GroupStore>,
    ) -> Self {
        Self {
            broker,
            risk,
            store,
        }
    }

    /// Submit an intent through the full protocol: validate, admit, place,
    /// persist. The returned group starts in `PendingPrimary` and is advanced
    /// by the order monitor from here on.
    pub async fn submit(&self, intent: OrderIntent) -> Result<OrderGroup, ExecutionError> {
        intent.validate().map_err(ExecutionError::Core)?;

        let reference_price = match intent.limit_price {
            Some(price) => price,
            None => self.broker.quote(&intent.instrument).await?.last_price,
        };

        match self.risk.admit(&intent, reference_price) {
            AdmissionResult::Admitted => {}
            AdmissionResult::Rejected(reason) => {
                return Err(ExecutionError::AdmissionRejected(reason));
            }
        }

        // Kite order tags are short; eight hex chars is enough to re-find an
        // order whose placement call timed out.
        let tag_seed: String = Uuid::new_v4().simple().to_string()[..8].to_string();

        if Self::bracket_eligible(&intent) {
            if let Some(group) = self.try_bracket(&intent, reference_price, &tag_seed).await? {
                return Ok(group);
            }
            info!(
                symbol = %intent.instrument.tradingsymbol,
                "Bracket placement refused, falling back to individual legs"
            );
        }

        self.submit_legged(intent, &tag_seed).await
    }

    /// Native brackets are an intraday-only product and need both protective
    /// prices for the broker-side offsets.
    fn bracket_eligible(intent: &OrderIntent) -> bool {
        intent.use_bracket
            && intent.product == kite_core::types::ProductType::Intraday
            && intent.stop_loss_price.is_some()
            && intent.target_price.is_some()
    }

    /// Attempt the bracket route. `Ok(None)` means the bracket was refused in
    /// a way that permits falling back to the legged route.
    async fn try_bracket(
        &self,
        intent: &OrderIntent,
        reference_price: Decimal,
        tag_seed: &str,
    ) -> Result<Option<OrderGroup>, ExecutionError> {
        let tag = format!("{tag_seed}-b");
        let Some(spec) = BracketSpec::from_intent(intent, reference_price, tag.clone()) else {
            return Ok(None);
        };

        match self.broker.place_bracket_order(&spec).await {
            Ok(ids) => {
                let group = OrderGroup::new(
                    intent.clone(),
                    PlacementRoute::Bracketed,
                    ids.primary_id,
                    Some(ids.stop_id),
                    Some(ids.target_id),
                );
                self.store.insert(group.clone()).await?;
                info!(
                    group_id = %group.id,
                    primary_order_id = %group.primary_order_id,
                    "Placed bracket order group"
                );
                Ok(Some(group))
            }
            Err(e) if e.is_unknown_outcome() => {
                // The bracket may or may not have reached the broker. Re-query
                // by tag before deciding anything.
                match self.broker.find_order_by_tag(&tag).await? {
                    Some((primary_id, _)) => {
                        // Landed. The child leg ids are unknown here, but the
                        // broker manages bracket legs natively, so track the
                        // primary and leave leg discovery to the broker side.
                        warn!(
                            %primary_id,
                            "Bracket placement timed out but landed; tracking primary only"
                        );
                        let group = OrderGroup::new(
                            intent.clone(),
                            PlacementRoute::Bracketed,
                            primary_id,
                            None,
                            None,
                        );
                        self.store.insert(group.clone()).await?;
                        Ok(Some(group))
                    }
                    // Never reached the broker; the legged route is safe.
                    None => Ok(None),
                }
            }
            // Bracket-specific rejection (product/instrument not supported):
            // fall back rather than fail outright.
            Err(Error::Broker { message }) => {
                warn!(message, "Broker rejected bracket order");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn submit_legged(
        &self,
        intent: OrderIntent,
        tag_seed: &str,
    ) -> Result<OrderGroup, ExecutionError> {
        let primary_tag = format!("{tag_seed}-p");
        let primary_spec = OrderSpec::primary(&intent, primary_tag.clone());

        let primary_order_id = match self.broker.place_order(&primary_spec).await {
            Ok(id) => id,
            Err(e) if e.is_unknown_outcome() => {
                match self.broker.find_order_by_tag(&primary_tag).await? {
                    Some((id, _)) => {
                        warn!(order_id = %id, "Primary placement timed out but landed");
                        id
                    }
                    None => return Err(e.into()),
                }
            }
            Err(Error::Broker { message }) => {
                // Nothing was placed; nothing to roll back.
                return Err(ExecutionError::PrimaryRejected(message));
            }
            Err(e) => return Err(e.into()),
        };

        let mut protection_complete = true;

        let stop_loss_order_id = match intent.stop_loss_price {
            Some(stop_price) => {
                let spec = OrderSpec::stop_leg(&intent, stop_price, format!("{tag_seed}-sl"));
                match self.place_protective(&spec).await {
                    Some(id) => Some(id),
                    None => {
                        protection_complete = false;
                        None
                    }
                }
            }
            None => None,
        };

        let target_order_id = match intent.target_price {
            Some(target_price) => {
                let spec = OrderSpec::target_leg(&intent, target_price, format!("{tag_seed}-tp"));
                match self.place_protective(&spec).await {
                    Some(id) => Some(id),
                    None => {
                        protection_complete = false;
                        None
                    }
                }
            }
            None => None,
        };

        let group = OrderGroup::new(
            intent,
            PlacementRoute::Legged,
            primary_order_id,
            stop_loss_order_id,
            target_order_id,
        );
        // The group is durably recorded even when protection is incomplete:
        // the primary has live market exposure and must be tracked.
        self.store.insert(group.clone()).await?;

        if protection_complete {
            info!(
                group_id = %group.id,
                primary_order_id = %group.primary_order_id,
                "Placed legged order group"
            );
            Ok(group)
        } else {
            Err(ExecutionError::ProtectionIncomplete {
                group_id: group.id,
                primary_order_id: group.primary_order_id,
            })
        }
    }

    /// Place one protective leg, recovering a timed-out-but-landed order by
    /// tag. Returns `None` on failure; the caller reports the incomplete
    /// protection rather than cancelling the primary.
    async fn place_protective(&self, spec: &OrderSpec) -> Option<String> {
        match self.broker.place_order(spec).await {
            Ok(id) => Some(id),
            Err(e) if e.is_unknown_outcome() => {
                match self.broker.find_order_by_tag(&spec.tag).await {
                    Ok(Some((id, _))) => Some(id),
                    _ => {
                        warn!(tag = %spec.tag, error = %e, "Protective leg placement outcome unknown");
                        None
                    }
                }
            }
            Err(e) => {
                warn!(tag = %spec.tag, error = %e, "Protective leg placement failed");
                None
            }
        }
    }

    /// Place the protective legs a group is missing, sized to the primary's
    /// filled quantity once it is fully filled.
    pub async fn retry_protection(&self, group_id: Uuid) -> Result<OrderGroup, ExecutionError> {
        let group = self.store.get(group_id).ok_or_else(|| {
            ExecutionError::Core(Error::Validation(format!("unknown order group {group_id}")))
        })?;
        if group.is_terminal() {
            return Err(ExecutionError::Core(Error::Validation(format!(
                "order group {group_id} is already terminal"
            ))));
        }

        let snapshot = self.broker.order_status(&group.primary_order_id).await?;
        let quantity = if snapshot.status == OrderStatus::Complete && snapshot.filled_quantity > 0 {
            snapshot.filled_quantity
        } else {
            group.intent.quantity
        };

        let tag_seed: String = Uuid::new_v4().simple().to_string()[..8].to_string();
        let mut protection_complete = true;
        let mut new_stop_id = None;
        let mut new_target_id = None;

        if group.stop_loss_order_id.is_none() {
            if let Some(stop_price) = group.intent.stop_loss_price {
                let spec = OrderSpec::stop_leg(&group.intent, stop_price, format!("{tag_seed}-sl"))
                    .with_quantity(quantity);
                match self.place_protective(&spec).await {
                    Some(id) => new_stop_id = Some(id),
                    None => protection_complete = false,
                }
            }
        }

        if group.target_order_id.is_none() {
            if let Some(target_price) = group.intent.target_price {
                let spec =
                    OrderSpec::target_leg(&group.intent, target_price, format!("{tag_seed}-tp"))
                        .with_quantity(quantity);
                match self.place_protective(&spec).await {
                    Some(id) => new_target_id = Some(id),
                    None => protection_complete = false,
                }
            }
        }

        // Only the new leg ids are written, under the store entry's lock, so
        // a monitor transition racing this call is never overwritten.
        let updated = self
            .store
            .update_with(group_id, |g| {
                if let Some(id) = new_stop_id {
                    g.stop_loss_order_id = Some(id);
                }
                if let Some(id) = new_target_id {
                    g.target_order_id = Some(id);
                }
                g.touch();
            })
            .await?
            .ok_or_else(|| {
                ExecutionError::Core(Error::Validation(format!(
                    "unknown order group {group_id}"
                )))
            })?;

        if protection_complete {
            info!(group_id = %updated.id, "Protection completed");
            Ok(updated)
        } else {
            Err(ExecutionError::ProtectionIncomplete {
                group_id: updated.id,
                primary_order_id: updated.primary_order_id,
            })
        }
    }
}
