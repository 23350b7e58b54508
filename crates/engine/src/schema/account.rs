//! Player accounts.

use serde::{Deserialize, Serialize};
use skarn_store::{Handle, Table};

use crate::faction::Faction;
use crate::params::Amount;
use crate::schema::TransactionBoundary;

/// One account row, keyed by the chain name.
///
/// An account exists from the first move sent under its name; the faction is
/// only set ("initialised") by the first valid character creation and is
/// immutable afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRow {
    pub faction: Option<Faction>,
    pub balance: Amount,
    /// Coins bought through the burnsale, for the money-supply breakdown.
    pub burnsale_balance: Amount,
    pub kills: u32,
    pub fame: u32,
}

/// Handle wrapper exposing domain accessors.
pub struct Account {
    handle: Handle<String, AccountRow>,
}

impl Account {
    pub fn name(&self) -> &str {
        self.handle.key()
    }

    pub fn row(&self) -> &AccountRow {
        &self.handle
    }

    pub fn is_initialised(&self) -> bool {
        self.handle.faction.is_some()
    }

    pub fn faction(&self) -> Faction {
        self.handle
            .faction
            .unwrap_or_else(|| panic!("account {} is not initialised", self.handle.key()))
    }

    pub fn set_faction(&mut self, f: Faction) {
        assert!(
            self.handle.faction.is_none(),
            "account {} already has a faction",
            self.handle.key()
        );
        self.handle.fields_mut().faction = Some(f);
    }

    pub fn balance(&self) -> Amount {
        self.handle.balance
    }

    pub fn add_balance(&mut self, delta: Amount) {
        let cur = self.handle.balance;
        assert!(
            cur + delta >= 0,
            "balance of {} would go negative: {cur} + {delta}",
            self.handle.key()
        );
        self.handle.fields_mut().balance = cur + delta;
    }

    pub fn add_burnsale(&mut self, amount: Amount) {
        self.handle.fields_mut().burnsale_balance += amount;
    }

    pub fn increment_kills(&mut self) {
        self.handle.fields_mut().kills += 1;
    }

    pub fn set_fame(&mut self, fame: u32) {
        self.handle.fields_mut().fame = fame;
    }
}

#[derive(Clone)]
pub struct AccountsTable {
    table: Table<String, AccountRow>,
}

impl AccountsTable {
    pub fn new() -> Self {
        Self {
            table: Table::new("accounts"),
        }
    }

    /// Creates a fresh, uninitialised account with start fame.
    pub fn create(&self, name: &str) -> Account {
        Account {
            handle: self.table.create(
                name.to_string(),
                AccountRow {
                    fame: 100,
                    ..Default::default()
                },
            ),
        }
    }

    pub fn get(&self, name: &str) -> Option<Account> {
        self.table
            .get(&name.to_string())
            .map(|handle| Account { handle })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains(&name.to_string())
    }

    /// All account names, ascending.
    pub fn names(&self) -> Vec<String> {
        self.table.keys()
    }

    /// Reads a field without leasing the row.
    pub fn read<T>(&self, name: &str, f: impl FnOnce(&AccountRow) -> T) -> Option<T> {
        self.table.read(&name.to_string(), f)
    }
}

impl TransactionBoundary for AccountsTable {
    fn begin(&self) {
        self.table.begin().expect("accounts transaction");
    }

    fn commit(&self) {
        self.table.commit().expect("accounts transaction");
    }

    fn rollback(&self) {
        self.table.rollback().expect("accounts transaction");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialisation_is_one_shot() {
        let tbl = AccountsTable::new();
        {
            let mut a = tbl.create("domob");
            assert!(!a.is_initialised());
            a.set_faction(Faction::Red);
        }

        let a = tbl.get("domob").unwrap();
        assert!(a.is_initialised());
        assert_eq!(a.faction(), Faction::Red);
        assert_eq!(a.row().fame, 100);
    }

    #[test]
    #[should_panic(expected = "already has a faction")]
    fn faction_is_immutable() {
        let tbl = AccountsTable::new();
        let mut a = tbl.create("domob");
        a.set_faction(Faction::Red);
        a.set_faction(Faction::Green);
    }

    #[test]
    #[should_panic(expected = "would go negative")]
    fn balance_cannot_go_negative() {
        let tbl = AccountsTable::new();
        let mut a = tbl.create("domob");
        a.add_balance(10);
        a.add_balance(-11);
    }
}
