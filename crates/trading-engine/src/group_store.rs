//! Shared order-group registry.
//!
//! In-memory map of all known groups with optional write-through to the
//! Postgres repository. Every mutation is durably recorded before the call
//! returns, so no order identifier is ever held only in volatile state.

use dashmap::DashMap;
use kite_core::db::OrderGroupRepository;
use kite_core::types::OrderGroup;
use kite_core::Result;
use tracing::info;
use uuid::Uuid;

#[derive(Default)]
pub struct GroupStore {
    groups: DashMap<Uuid, OrderGroup>,
    repo: Option<OrderGroupRepository>,
}

impl GroupStore {
    /// In-memory only store; groups do not survive a restart.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with write-through persistence.
    pub fn with_repository(repo: OrderGroupRepository) -> Self {
        Self {
            groups: DashMap::new(),
            repo: Some(repo),
        }
    }

    /// Register a newly created group.
    pub async fn insert(&self, group: OrderGroup) -> Result<()> {
        if let Some(repo) = &self.repo {
            repo.insert(&group).await?;
        }
        self.groups.insert(group.id, group);
        Ok(())
    }

    /// Persist an updated group wholesale. Only safe where no concurrent
    /// writer exists; concurrent paths go through [`GroupStore::update_with`].
    pub async fn update(&self, group: OrderGroup) -> Result<()> {
        if let Some(repo) = &self.repo {
            repo.update(&group).await?;
        }
        self.groups.insert(group.id, group);
        Ok(())
    }

    /// Apply a targeted mutation to a group under its map entry's lock, then
    /// persist the merged record. Writers that each touch only their own
    /// fields cannot overwrite one another's, even when their broker calls
    /// interleave. Returns `None` when the group is unknown.
    pub async fn update_with<F>(&self, id: Uuid, mutate: F) -> Result<Option<OrderGroup>>
    where
        F: FnOnce(&mut OrderGroup),
    {
        let updated = match self.groups.get_mut(&id) {
            Some(mut entry) => {
                mutate(entry.value_mut());
                entry.value().clone()
            }
            None => return Ok(None),
        };
        if let Some(repo) = &self.repo {
            repo.update(&updated).await?;
        }
        Ok(Some(updated))
    }

    pub fn get(&self, id: Uuid) -> Option<OrderGroup> {
        self.groups.get(&id).map(|g| g.clone())
    }

    /// All groups for a trading symbol, newest first.
    pub fn find_by_symbol(&self, tradingsymbol: &str) -> Vec<OrderGroup> {
        let mut groups: Vec<OrderGroup> = self
            .groups
            .iter()
            .filter(|g| g.intent.instrument.tradingsymbol == tradingsymbol)
            .map(|g| g.clone())
            .collect();
        groups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        groups
    }

    /// All non-terminal groups, oldest first.
    pub fn open_groups(&self) -> Vec<OrderGroup> {
        let mut groups: Vec<OrderGroup> = self
            .groups
            .iter()
            .filter(|g| !g.is_terminal())
            .map(|g| g.clone())
            .collect();
        groups.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        groups
    }

    /// Load non-terminal groups from the repository into memory. Called once
    /// at startup so the monitor can resume tracking across restarts.
    pub async fn load_open(&self) -> Result<usize> {
        let Some(repo) = &self.repo else {
            return Ok(0);
        };

        let groups = repo.load_open().await?;
        let count = groups.len();
        for group in groups {
            self.groups.insert(group.id, group);
        }
        if count > 0 {
            info!(count, "Resumed open order groups from database");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kite_core::types::{
        Exchange, GroupState, Instrument, OrderIntent, OrderSide, PlacementRoute,
    };

    fn group(symbol: &str) -> OrderGroup {
        let intent =
            OrderIntent::market(Instrument::new(Exchange::Nse, symbol), OrderSide::Buy, 10);
        OrderGroup::new(intent, PlacementRoute::Legged, "P-1".to_string(), None, None)
    }

    #[tokio::test]
    async fn test_open_groups_excludes_terminal() {
        let store = GroupStore::new();
        let open = group("INFY");
        let mut closed = group("TCS");
        closed.state = GroupState::ClosedByTarget;

        store.insert(open.clone()).await.unwrap();
        store.insert(closed).await.unwrap();

        let result = store.open_groups();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, open.id);
    }

    #[tokio::test]
    async fn test_update_with_merges_independent_writers() {
        let store = GroupStore::new();
        let group = group("INFY");
        store.insert(group.clone()).await.unwrap();

        // Two writers race from the same stale read: one advances the state,
        // the other records a freshly placed protective leg.
        store
            .update_with(group.id, |g| g.state = GroupState::Protected)
            .await
            .unwrap();
        store
            .update_with(group.id, |g| {
                g.stop_loss_order_id = Some("S-9".to_string())
            })
            .await
            .unwrap();

        let merged = store.get(group.id).unwrap();
        assert_eq!(merged.state, GroupState::Protected);
        assert_eq!(merged.stop_loss_order_id, Some("S-9".to_string()));
    }

    #[tokio::test]
    async fn test_update_with_unknown_group_is_none() {
        let store = GroupStore::new();
        let result = store
            .update_with(uuid::Uuid::new_v4(), |g| g.state = GroupState::Failed)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_find_by_symbol() {
        let store = GroupStore::new();
        store.insert(group("INFY")).await.unwrap();
        store.insert(group("INFY")).await.unwrap();
        store.insert(group("TCS")).await.unwrap();

        assert_eq!(store.find_by_symbol("INFY").len(), 2);
        assert_eq!(store.find_by_symbol("RELIANCE").len(), 0);
    }
}
