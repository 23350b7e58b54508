//! Deterministic per-block state-transition engine for the Skarn game.
//!
//! The engine receives one batch of per-player moves per block and produces
//! a new game state that is bit-identical across all honest nodes.  All
//! state lives in tables from `skarn-store`; [`logic::update_state`] is the
//! single entry point driving the fixed phase pipeline, and [`Game`] bundles
//! the pieces for embedders that do not need to wire them up individually.

pub mod combat;
pub mod context;
pub mod dex_ops;
pub mod dyn_obstacles;
pub mod faction;
pub mod fighter;
pub mod geometry;
pub mod jsonutil;
pub mod logic;
pub mod map;
pub mod mining;
pub mod movement;
pub mod moves;
pub mod ongoings;
pub mod params;
pub mod pending;
pub mod prospecting;
pub mod rng;
pub mod schema;
pub mod services;
pub mod spawn;
pub mod state_json;

use serde_json::Value;
use skarn_store::Id;

pub use context::Context;
pub use faction::Faction;
pub use geometry::Hex;
pub use map::{BaseMap, GridMap};
pub use params::{Amount, Chain, Params, Quantity};
pub use rng::Rng;
pub use schema::Tables;

/// A complete engine instance: parameters, map, tables and the pending
/// projection, with the high-level entry points the chain driver calls.
pub struct Game {
    params: Params,
    map: GridMap,
    tables: Tables,
    pending: pending::PendingState,
    last_height: u64,
}

impl Game {
    pub fn new(chain: Chain) -> Self {
        Self {
            params: Params::new(chain),
            map: GridMap::default(),
            tables: Tables::new(),
            pending: pending::PendingState::new(),
            last_height: 0,
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn map(&self) -> &GridMap {
        &self.map
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Applies one confirmed block and resets the pending projection.
    pub fn update_state(&mut self, block_data: &Value) {
        logic::update_state(&self.tables, &self.params, &self.map, block_data);
        self.last_height = block_data["block"]["height"]
            .as_u64()
            .expect("height checked by update_state");
        self.pending.clear();
    }

    /// Feeds one mempool move into the pending projection.
    pub fn add_pending_move(&mut self, mv: &Value) {
        let ctx = Context::new(&self.params, &self.map, self.last_height + 1, 0);
        let mut updater = pending::PendingStateUpdater::new(&self.tables, &ctx, &mut self.pending);
        updater.process_move(mv);
    }

    pub fn pending_json(&self) -> Value {
        self.pending.to_json()
    }

    /// The full confirmed state as JSON.
    pub fn full_state(&self) -> Value {
        let ctx = Context::new(&self.params, &self.map, self.last_height, 0);
        state_json::full_state(&self.tables, &ctx)
    }

    pub fn bootstrap_data(&self) -> Value {
        state_json::bootstrap_data(&self.tables)
    }

    pub fn trade_history(&self, item: &str, building: Id) -> Value {
        state_json::trade_history(&self.tables, item, building)
    }

    /// Runs the offline consistency check over the current state.
    pub fn validate_state(&self) {
        let ctx = Context::new(&self.params, &self.map, self.last_height, 0);
        logic::validate_state(&self.tables, &ctx);
    }
}
