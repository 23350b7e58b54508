//! Money-supply bookkeeping.
//!
//! Tracks how many coins entered circulation through which channel, and how
//! many were destroyed again as base fees, so the balance invariant
//! (`sum of balances + reserved + burnt = sum of inflows`) can be asserted
//! by the validator.

use serde::{Deserialize, Serialize};
use skarn_store::Table;

use crate::params::Amount;
use crate::schema::TransactionBoundary;

/// Channels through which coins enter circulation.
pub const INFLOW_KEYS: [&str; 2] = ["burnsale", "gifted"];

/// Key tracking coins destroyed as base fees.
pub const BURNT_KEY: &str = "burntfees";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyEntry {
    pub amount: Amount,
}

#[derive(Clone)]
pub struct MoneySupply {
    table: Table<&'static str, SupplyEntry>,
}

impl MoneySupply {
    pub fn new() -> Self {
        let table = Table::new("money_supply");
        for key in INFLOW_KEYS {
            table.create(key, SupplyEntry::default());
        }
        table.create(BURNT_KEY, SupplyEntry::default());
        Self { table }
    }

    fn check_key(key: &str) -> &'static str {
        INFLOW_KEYS
            .iter()
            .chain(std::iter::once(&BURNT_KEY))
            .find(|k| **k == key)
            .copied()
            .unwrap_or_else(|| panic!("invalid money supply key {key}"))
    }

    pub fn get(&self, key: &str) -> Amount {
        let key = Self::check_key(key);
        self.table.read(&key, |e| e.amount).expect("key initialised")
    }

    pub fn add(&self, key: &str, amount: Amount) {
        assert!(amount >= 0);
        let key = Self::check_key(key);
        self.table
            .get(&key)
            .expect("key initialised")
            .fields_mut()
            .amount += amount;
    }

    /// Records coins destroyed as a base fee.
    pub fn burn_fee(&self, amount: Amount) {
        self.add(BURNT_KEY, amount);
    }

    /// Total coins that ever entered circulation.
    pub fn total_inflow(&self) -> Amount {
        INFLOW_KEYS.iter().map(|k| self.get(k)).sum()
    }

    /// Coins currently in circulation.
    pub fn circulating(&self) -> Amount {
        self.total_inflow() - self.get(BURNT_KEY)
    }
}

impl TransactionBoundary for MoneySupply {
    fn begin(&self) {
        self.table.begin().expect("money supply transaction");
    }

    fn commit(&self) {
        self.table.commit().expect("money supply transaction");
    }

    fn rollback(&self) {
        self.table.rollback().expect("money supply transaction");
    }
}
