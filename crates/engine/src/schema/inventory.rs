//! Fungible inventories and the tables that hold them on the ground and
//! inside buildings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use skarn_store::{Handle, Id, Table};

use crate::geometry::Hex;
use crate::params::{Params, Quantity};
use crate::schema::TransactionBoundary;

/// A set of fungible items with positive counts.
///
/// Entries are removed as soon as their count reaches zero, so an inventory
/// is empty iff its map is empty and two inventories with equal content
/// compare equal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    fungible: BTreeMap<String, Quantity>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, item: &str) -> Quantity {
        self.fungible.get(item).copied().unwrap_or(0)
    }

    pub fn set_count(&mut self, item: &str, count: Quantity) {
        assert!(count >= 0, "negative count for {item}");
        if count == 0 {
            self.fungible.remove(item);
        } else {
            self.fungible.insert(item.to_string(), count);
        }
    }

    /// Adds (or with a negative delta, removes) items.  Going below zero is
    /// a consistency bug and panics.
    pub fn add(&mut self, item: &str, delta: Quantity) {
        let cur = self.count(item);
        let next = cur + delta;
        assert!(next >= 0, "inventory underflow for {item}: {cur} + {delta}");
        self.set_count(item, next);
    }

    pub fn is_empty(&self) -> bool {
        self.fungible.is_empty()
    }

    /// Iterates entries ascending by item name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Quantity)> {
        self.fungible.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Total cargo units the content occupies.
    pub fn used_space(&self, params: &Params) -> u64 {
        self.iter()
            .map(|(item, n)| params.item_checked(item).space as u64 * n as u64)
            .sum()
    }

    /// Moves every entry into `other`, leaving this inventory empty.
    pub fn drain_into(&mut self, other: &mut Inventory) {
        for (item, n) in std::mem::take(&mut self.fungible) {
            other.add(&item, n);
        }
    }
}

/// Loot lying on the ground, keyed by position.  Rows are created on first
/// drop and cleaned up by the block finaliser once empty.
#[derive(Clone)]
pub struct GroundLootTable {
    table: Table<Hex, Inventory>,
}

impl GroundLootTable {
    pub fn new() -> Self {
        Self {
            table: Table::new("ground_loot"),
        }
    }

    /// Returns a handle for the loot at a position, creating an empty row if
    /// there is none yet.
    pub fn get(&self, pos: Hex) -> Handle<Hex, Inventory> {
        match self.table.get(&pos) {
            Some(h) => h,
            None => self.table.create(pos, Inventory::new()),
        }
    }

    /// Positions with loot, ascending.
    pub fn positions(&self) -> Vec<Hex> {
        self.table.keys()
    }

    /// Removes rows whose inventory became empty.
    pub fn prune_empty(&self) {
        for pos in self.table.keys_where(|_, inv| inv.is_empty()) {
            self.table.delete(&pos);
        }
    }
}

impl TransactionBoundary for GroundLootTable {
    fn begin(&self) {
        self.table.begin().expect("ground loot transaction");
    }

    fn commit(&self) {
        self.table.commit().expect("ground loot transaction");
    }

    fn rollback(&self) {
        self.table.rollback().expect("ground loot transaction");
    }
}

/// Per-account item storage inside finished buildings, keyed by
/// `(building, account)`.
#[derive(Clone)]
pub struct BuildingInventoriesTable {
    table: Table<(Id, String), Inventory>,
}

impl BuildingInventoriesTable {
    pub fn new() -> Self {
        Self {
            table: Table::new("building_inventories"),
        }
    }

    pub fn get(&self, building: Id, account: &str) -> Handle<(Id, String), Inventory> {
        let key = (building, account.to_string());
        match self.table.get(&key) {
            Some(h) => h,
            None => self.table.create(key, Inventory::new()),
        }
    }

    /// Peeks at an inventory without creating or leasing it.
    pub fn count_in(&self, building: Id, account: &str, item: &str) -> Quantity {
        self.table
            .read(&(building, account.to_string()), |inv| inv.count(item))
            .unwrap_or(0)
    }

    /// All `(building, account)` keys, ascending.
    pub fn keys(&self) -> Vec<(Id, String)> {
        self.table.keys()
    }

    /// Keys for one building, ascending by account.
    pub fn keys_for_building(&self, building: Id) -> Vec<(Id, String)> {
        self.table.keys_where(|(b, _), _| *b == building)
    }

    pub fn prune_empty(&self) {
        for key in self.table.keys_where(|_, inv| inv.is_empty()) {
            self.table.delete(&key);
        }
    }

    /// Drops all inventories of a destroyed building, returning the content.
    pub fn remove_for_building(&self, building: Id) -> Inventory {
        let mut all = Inventory::new();
        for key in self.keys_for_building(building) {
            let mut h = self.table.get(&key).expect("listed key exists");
            h.payload_mut().drain_into(&mut all);
            h.delete();
        }
        all
    }
}

impl TransactionBoundary for BuildingInventoriesTable {
    fn begin(&self) {
        self.table.begin().expect("building inventory transaction");
    }

    fn commit(&self) {
        self.table.commit().expect("building inventory transaction");
    }

    fn rollback(&self) {
        self.table.rollback().expect("building inventory transaction");
    }
}
