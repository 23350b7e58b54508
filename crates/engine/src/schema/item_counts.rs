//! Global found-counters for limited items (prospecting prizes).

use serde::{Deserialize, Serialize};
use skarn_store::Table;

use crate::schema::TransactionBoundary;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountEntry {
    pub found: u32,
}

#[derive(Clone)]
pub struct ItemCounts {
    table: Table<String, CountEntry>,
}

impl ItemCounts {
    pub fn new() -> Self {
        Self {
            table: Table::new("item_counts"),
        }
    }

    pub fn found(&self, item: &str) -> u32 {
        self.table
            .read(&item.to_string(), |e| e.found)
            .unwrap_or(0)
    }

    pub fn increment(&self, item: &str) {
        let key = item.to_string();
        match self.table.get(&key) {
            Some(mut h) => h.fields_mut().found += 1,
            None => {
                self.table.create(key, CountEntry { found: 1 });
            }
        }
    }
}

impl TransactionBoundary for ItemCounts {
    fn begin(&self) {
        self.table.begin().expect("item counts transaction");
    }

    fn commit(&self) {
        self.table.commit().expect("item counts transaction");
    }

    fn rollback(&self) {
        self.table.rollback().expect("item counts transaction");
    }
}
