//! DEX orderbook and trade history.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use skarn_store::{Handle, Id, Table};

use crate::params::{Amount, Quantity};
use crate::schema::TransactionBoundary;

/// Order side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Bid,
    Ask,
}

/// One open order.  The escrow (coins for bids, items for asks) has already
/// been deducted from the owner when the order was placed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DexOrderRow {
    pub building: Id,
    pub account: String,
    pub order_type: OrderType,
    pub item: String,
    pub quantity: Quantity,
    pub price: Amount,
}

pub struct DexOrder {
    id: Id,
    handle: Handle<Id, DexOrderRow>,
}

impl DexOrder {
    pub fn id(&self) -> Id {
        self.id
    }

    pub fn row(&self) -> &DexOrderRow {
        &self.handle
    }

    /// Fills part of the order; deletes it once fully matched.
    pub fn reduce_quantity(mut self, filled: Quantity) {
        let cur = self.handle.quantity;
        assert!(
            (1..=cur).contains(&filled),
            "invalid fill of {filled} against order {} with {cur}",
            self.id
        );
        if filled == cur {
            self.handle.delete();
        } else {
            self.handle.fields_mut().quantity = cur - filled;
        }
    }

    pub fn delete(self) {
        self.handle.delete();
    }
}

#[derive(Clone)]
pub struct DexOrderTable {
    table: Table<Id, DexOrderRow>,
}

impl DexOrderTable {
    pub fn new() -> Self {
        Self {
            table: Table::new("dex_orders"),
        }
    }

    pub fn create(
        &self,
        id: Id,
        building: Id,
        account: &str,
        order_type: OrderType,
        item: &str,
        quantity: Quantity,
        price: Amount,
    ) -> DexOrder {
        assert!(quantity > 0 && price >= 0);
        let row = DexOrderRow {
            building,
            account: account.to_string(),
            order_type,
            item: item.to_string(),
            quantity,
            price,
        };
        DexOrder {
            id,
            handle: self.table.create(id, row),
        }
    }

    pub fn get(&self, id: Id) -> Option<DexOrder> {
        self.table.get(&id).map(|handle| DexOrder { id, handle })
    }

    pub fn ids(&self) -> Vec<Id> {
        self.table.keys()
    }

    pub fn ids_for_building(&self, building: Id) -> Vec<Id> {
        self.table.keys_where(|_, r| r.building == building)
    }

    pub fn read<T>(&self, id: Id, f: impl FnOnce(&DexOrderRow) -> T) -> Option<T> {
        self.table.read(&id, f)
    }

    /// Asks that a bid at `price` can fill, cheapest first, ties by id.
    pub fn ids_to_match_bid(&self, building: Id, item: &str, price: Amount) -> Vec<Id> {
        let mut ids = self.table.keys_where(|_, r| {
            r.building == building
                && r.item == item
                && r.order_type == OrderType::Ask
                && r.price <= price
        });
        self.sort_by_price(&mut ids, false);
        ids
    }

    /// Bids that an ask at `price` can fill, highest first, ties by id.
    pub fn ids_to_match_ask(&self, building: Id, item: &str, price: Amount) -> Vec<Id> {
        let mut ids = self.table.keys_where(|_, r| {
            r.building == building
                && r.item == item
                && r.order_type == OrderType::Bid
                && r.price >= price
        });
        self.sort_by_price(&mut ids, true);
        ids
    }

    fn sort_by_price(&self, ids: &mut [Id], descending: bool) {
        ids.sort_by_key(|id| {
            let price = self.read(*id, |r| r.price).expect("listed order exists");
            let price_key = if descending { -price } else { price };
            (price_key, *id)
        });
    }

    /// Coins reserved in open bids, per account.
    pub fn reserved_coins(&self) -> BTreeMap<String, Amount> {
        let mut res = BTreeMap::new();
        for id in self.ids() {
            self.table
                .read(&id, |r| {
                    if r.order_type == OrderType::Bid {
                        *res.entry(r.account.clone()).or_insert(0) += r.quantity * r.price;
                    }
                })
                .expect("listed order exists");
        }
        res
    }

    /// Item quantities reserved in open asks of one building, per item.
    pub fn reserved_quantities(&self, building: Id) -> BTreeMap<String, Quantity> {
        let mut res = BTreeMap::new();
        for id in self.ids_for_building(building) {
            self.table
                .read(&id, |r| {
                    if r.order_type == OrderType::Ask {
                        *res.entry(r.item.clone()).or_insert(0) += r.quantity;
                    }
                })
                .expect("listed order exists");
        }
        res
    }
}

impl TransactionBoundary for DexOrderTable {
    fn begin(&self) {
        self.table.begin().expect("dex orders transaction");
    }

    fn commit(&self) {
        self.table.commit().expect("dex orders transaction");
    }

    fn rollback(&self) {
        self.table.rollback().expect("dex orders transaction");
    }
}

/// One executed trade, recorded for the history queries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DexTradeRow {
    pub height: u64,
    pub timestamp: i64,
    pub building: Id,
    pub item: String,
    pub quantity: Quantity,
    pub price: Amount,
    pub seller: String,
    pub buyer: String,
}

#[derive(Clone)]
pub struct DexHistoryTable {
    table: Table<Id, DexTradeRow>,
    ids: skarn_store::IdAllocator,
}

impl DexHistoryTable {
    pub fn new() -> Self {
        Self {
            table: Table::new("dex_history"),
            ids: skarn_store::IdAllocator::default(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_trade(
        &self,
        height: u64,
        timestamp: i64,
        building: Id,
        item: &str,
        quantity: Quantity,
        price: Amount,
        seller: &str,
        buyer: &str,
    ) {
        self.table.create(
            self.ids.next_id(),
            DexTradeRow {
                height,
                timestamp,
                building,
                item: item.to_string(),
                quantity,
                price,
                seller: seller.to_string(),
                buyer: buyer.to_string(),
            },
        );
    }

    /// Trades of an item in a building, oldest first.
    pub fn trades_for(&self, item: &str, building: Id) -> Vec<DexTradeRow> {
        self.table
            .keys_where(|_, r| r.item == item && r.building == building)
            .into_iter()
            .map(|id| self.table.read(&id, |r| r.clone()).expect("listed trade"))
            .collect()
    }
}

impl TransactionBoundary for DexHistoryTable {
    fn begin(&self) {
        self.table.begin().expect("dex history transaction");
    }

    fn commit(&self) {
        self.table.commit().expect("dex history transaction");
    }

    fn rollback(&self) {
        self.table.rollback().expect("dex history transaction");
    }
}
