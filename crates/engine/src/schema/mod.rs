//! Entity rows and typed tables.
//!
//! Every persistent entity lives in a table from `skarn-store`; the modules
//! here define the row layout, a thin handle wrapper exposing domain
//! accessors with the right dirty-bit granularity, and the indexed queries
//! each phase needs.  Iteration is always in ascending key order.

pub mod account;
pub mod building;
pub mod character;
pub mod damage_lists;
pub mod dex;
pub mod inventory;
pub mod item_counts;
pub mod money;
pub mod ongoing;
pub mod region;

mod combat_data;

pub use combat_data::{
    Attack, AttackEffects, CombatData, CombatEffects, Damage, FighterKind, Hp, RegenData, TargetId,
};

use skarn_store::IdAllocator;

use crate::params::COIN;

/// All tables of one game state, as shared references.
///
/// Cloning the bundle clones the references, not the data; phases receive a
/// clone and check out handles as needed.
#[derive(Clone)]
pub struct Tables {
    pub ids: IdAllocator,
    pub accounts: account::AccountsTable,
    pub characters: character::CharacterTable,
    pub buildings: building::BuildingsTable,
    pub regions: region::RegionsTable,
    pub ongoings: ongoing::OngoingsTable,
    pub ground_loot: inventory::GroundLootTable,
    pub building_inv: inventory::BuildingInventoriesTable,
    pub orders: dex::DexOrderTable,
    pub trades: dex::DexHistoryTable,
    pub damage_lists: damage_lists::DamageLists,
    pub money: money::MoneySupply,
    pub item_counts: item_counts::ItemCounts,
}

impl Tables {
    pub fn new() -> Self {
        Self {
            ids: IdAllocator::default(),
            accounts: account::AccountsTable::new(),
            characters: character::CharacterTable::new(),
            buildings: building::BuildingsTable::new(),
            regions: region::RegionsTable::new(),
            ongoings: ongoing::OngoingsTable::new(),
            ground_loot: inventory::GroundLootTable::new(),
            building_inv: inventory::BuildingInventoriesTable::new(),
            orders: dex::DexOrderTable::new(),
            trades: dex::DexHistoryTable::new(),
            damage_lists: damage_lists::DamageLists::new(),
            money: money::MoneySupply::new(),
            item_counts: item_counts::ItemCounts::new(),
        }
    }

    /// Opens the per-block transaction on all tables.
    pub fn begin_block(&self) {
        self.for_each_table(|t| t.begin());
    }

    /// Commits the block on all tables.
    pub fn commit_block(&self) {
        self.for_each_table(|t| t.commit());
    }

    /// Rolls all tables back to the start of the block.
    pub fn rollback_block(&self) {
        self.for_each_table(|t| t.rollback());
    }

    fn for_each_table(&self, f: impl Fn(&dyn TransactionBoundary)) {
        f(&self.accounts);
        f(&self.characters);
        f(&self.buildings);
        f(&self.regions);
        f(&self.ongoings);
        f(&self.ground_loot);
        f(&self.building_inv);
        f(&self.orders);
        f(&self.trades);
        f(&self.damage_lists);
        f(&self.money);
        f(&self.item_counts);
    }

    /// Gifts coins into an account, tracked in the money supply so the
    /// balance invariant keeps holding.  Only allowed off-mainnet.
    pub fn gift_coins(&self, name: &str, amount: crate::params::Amount) {
        let mut a = self
            .accounts
            .get(name)
            .unwrap_or_else(|| self.accounts.create(name));
        a.add_balance(amount);
        self.money.add("gifted", amount);
    }
}

impl Default for Tables {
    fn default() -> Self {
        Self::new()
    }
}

/// Object-safe view of a table's transaction operations.
pub trait TransactionBoundary {
    fn begin(&self);
    fn commit(&self);
    fn rollback(&self);
}

/// Formats a coin amount in whole coins for diagnostics.
pub fn format_coins(amount: crate::params::Amount) -> String {
    format!("{}.{:08}", amount / COIN, (amount % COIN).abs())
}
