//! Damage lists: who hit whom recently.
//!
//! Entries pair a victim with an attacker and remember the height of the
//! last hit.  They feed kill attribution (kills and fame) and expire after
//! a configured number of blocks without a refresh.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use skarn_store::{Id, Table};

use crate::schema::TransactionBoundary;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageEntry {
    pub last_hit_height: u64,
}

#[derive(Clone)]
pub struct DamageLists {
    table: Table<(Id, Id), DamageEntry>,
}

impl DamageLists {
    pub fn new() -> Self {
        Self {
            table: Table::new("damage_lists"),
        }
    }

    /// Records (or refreshes) a hit of `attacker` on `victim`.
    pub fn add_entry(&self, victim: Id, attacker: Id, height: u64) {
        let key = (victim, attacker);
        match self.table.get(&key) {
            Some(mut h) => h.fields_mut().last_hit_height = height,
            None => {
                self.table.create(
                    key,
                    DamageEntry {
                        last_hit_height: height,
                    },
                );
            }
        }
    }

    /// The set of attackers with a live entry against the victim.
    pub fn attackers(&self, victim: Id) -> BTreeSet<Id> {
        self.table
            .keys_where(|(v, _), _| *v == victim)
            .into_iter()
            .map(|(_, attacker)| attacker)
            .collect()
    }

    /// Removes all entries in which the character appears, as victim or as
    /// attacker.  Used when the character dies.
    pub fn remove_character(&self, id: Id) {
        for key in self.table.keys_where(|(v, a), _| *v == id || *a == id) {
            self.table.delete(&key);
        }
    }

    /// Counts entries that should have been aged out already, without
    /// touching them.  Used by the (pure) state validator.
    pub fn stale_count(&self, height: u64, age: u64) -> usize {
        self.table
            .keys_where(|_, e| e.last_hit_height + age <= height)
            .len()
    }

    /// Drops entries that have not been refreshed for `age` blocks.
    pub fn remove_old(&self, height: u64, age: u64) {
        for key in self
            .table
            .keys_where(|_, e| e.last_hit_height + age <= height)
        {
            self.table.delete(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl TransactionBoundary for DamageLists {
    fn begin(&self) {
        self.table.begin().expect("damage lists transaction");
    }

    fn commit(&self) {
        self.table.commit().expect("damage lists transaction");
    }

    fn rollback(&self) {
        self.table.rollback().expect("damage lists transaction");
    }
}
