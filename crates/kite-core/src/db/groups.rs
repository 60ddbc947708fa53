//! Database operations for order groups.

use crate::types::{GroupState, OrderGroup, OrderIntent, PlacementRoute};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Repository for order group data.
pub struct OrderGroupRepository {
    pool: PgPool,
}

impl OrderGroupRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new order group.
    pub async fn insert(&self, group: &OrderGroup) -> Result<()> {
        let intent_json = serde_json::to_string(&group.intent)?;

        sqlx::query(
            r#"
            INSERT INTO order_groups (
                id, intent, route, primary_order_id, stop_loss_order_id,
                target_order_id, state, entry_price, exit_price, realized_pnl,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(group.id)
        .bind(intent_json)
        .bind(route_str(group.route))
        .bind(&group.primary_order_id)
        .bind(&group.stop_loss_order_id)
        .bind(&group.target_order_id)
        .bind(state_str(group.state))
        .bind(group.entry_price)
        .bind(group.exit_price)
        .bind(group.realized_pnl)
        .bind(group.created_at)
        .bind(group.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Update a group's state, fill prices, and realized P&L.
    pub async fn update(&self, group: &OrderGroup) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE order_groups SET
                stop_loss_order_id = $2,
                target_order_id = $3,
                state = $4,
                entry_price = $5,
                exit_price = $6,
                realized_pnl = $7,
                updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(group.id)
        .bind(&group.stop_loss_order_id)
        .bind(&group.target_order_id)
        .bind(state_str(group.state))
        .bind(group.entry_price)
        .bind(group.exit_price)
        .bind(group.realized_pnl)
        .bind(group.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get an order group by ID.
    pub async fn get(&self, id: Uuid) -> Result<Option<OrderGroup>> {
        let row = sqlx::query(
            r#"
            SELECT
                id, intent, route, primary_order_id, stop_loss_order_id,
                target_order_id, state, entry_price, exit_price, realized_pnl,
                created_at, updated_at
            FROM order_groups
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_group(&r)).transpose()
    }

    /// Load all groups that have not reached a terminal state. Used by the
    /// monitor to resume tracking after a restart.
    pub async fn load_open(&self) -> Result<Vec<OrderGroup>> {
        let rows = sqlx::query(
            r#"
            SELECT
                id, intent, route, primary_order_id, stop_loss_order_id,
                target_order_id, state, entry_price, exit_price, realized_pnl,
                created_at, updated_at
            FROM order_groups
            WHERE state IN ('pending_primary', 'primary_open', 'protected')
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_group).collect()
    }
}

fn state_str(state: GroupState) -> &'static str {
    match state {
        GroupState::PendingPrimary => "pending_primary",
        GroupState::PrimaryOpen => "primary_open",
        GroupState::Protected => "protected",
        GroupState::ClosedByStop => "closed_by_stop",
        GroupState::ClosedByTarget => "closed_by_target",
        GroupState::ClosedManual => "closed_manual",
        GroupState::Failed => "failed",
    }
}

fn parse_state(s: &str) -> Result<GroupState> {
    Ok(match s {
        "pending_primary" => GroupState::PendingPrimary,
        "primary_open" => GroupState::PrimaryOpen,
        "protected" => GroupState::Protected,
        "closed_by_stop" => GroupState::ClosedByStop,
        "closed_by_target" => GroupState::ClosedByTarget,
        "closed_manual" => GroupState::ClosedManual,
        "failed" => GroupState::Failed,
        other => {
            return Err(Error::Validation(format!(
                "unknown group state in database: {other}"
            )))
        }
    })
}

fn route_str(route: PlacementRoute) -> &'static str {
    match route {
        PlacementRoute::Bracketed => "bracketed",
        PlacementRoute::Legged => "legged",
    }
}

fn parse_route(s: &str) -> Result<PlacementRoute> {
    Ok(match s {
        "bracketed" => PlacementRoute::Bracketed,
        "legged" => PlacementRoute::Legged,
        other => {
            return Err(Error::Validation(format!(
                "unknown placement route in database: {other}"
            )))
        }
    })
}

fn row_to_group(r: &sqlx::postgres::PgRow) -> Result<OrderGroup> {
    let intent: OrderIntent = serde_json::from_str(&r.get::<String, _>("intent"))?;

    Ok(OrderGroup {
        id: r.get::<Uuid, _>("id"),
        intent,
        route: parse_route(&r.get::<String, _>("route"))?,
        primary_order_id: r.get("primary_order_id"),
        stop_loss_order_id: r.get("stop_loss_order_id"),
        target_order_id: r.get("target_order_id"),
        state: parse_state(&r.get::<String, _>("state"))?,
        entry_price: r.get::<Option<Decimal>, _>("entry_price"),
        exit_price: r.get::<Option<Decimal>, _>("exit_price"),
        realized_pnl: r.get::<Option<Decimal>, _>("realized_pnl"),
        created_at: r.get::<DateTime<Utc>, _>("created_at"),
        updated_at: r.get::<DateTime<Utc>, _>("updated_at"),
    })
}
