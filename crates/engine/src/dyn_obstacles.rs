//! Per-block dynamic obstacle map.
//!
//! Rebuilt at the start of every block from the character and building
//! tables; movement and spawn placement query it and keep it in sync as
//! positions change within the block.  Newly founded buildings are added
//! immediately so they block movement in the very block they appear.

use std::collections::{BTreeMap, BTreeSet};

use crate::faction::Faction;
use crate::geometry::Hex;
use crate::params::Params;
use crate::schema::Tables;

pub struct DynObstacles {
    /// Vehicles by tile.  A tile holds at most one vehicle.
    vehicles: BTreeMap<Hex, Faction>,
    /// Tiles occupied by buildings (finished or foundations).
    building_tiles: BTreeSet<Hex>,
}

impl DynObstacles {
    /// Builds the map from the current entity tables.
    pub fn build(tables: &Tables, params: &Params) -> Self {
        let mut res = Self {
            vehicles: BTreeMap::new(),
            building_tiles: BTreeSet::new(),
        };

        for id in tables.characters.ids() {
            tables
                .characters
                .read(id, |r| {
                    if !r.is_in_building() {
                        res.add_vehicle(r.pos, r.faction);
                    }
                })
                .expect("listed id exists");
        }

        for id in tables.buildings.ids() {
            let b = tables.buildings.get(id).expect("listed id exists");
            for tile in b.shape_tiles(params) {
                res.add_building_tile(tile);
            }
        }

        res
    }

    /// Whether a vehicle may be placed on the tile.
    ///
    /// All vehicles block, regardless of faction; only empty tiles are
    /// entered.  The faction map is still kept so the projection layer can
    /// tell whose vehicle occupies a tile.
    pub fn is_free(&self, pos: Hex) -> bool {
        !self.building_tiles.contains(&pos) && !self.vehicles.contains_key(&pos)
    }

    /// The faction of the vehicle on a tile, if any.
    pub fn vehicle_at(&self, pos: Hex) -> Option<Faction> {
        self.vehicles.get(&pos).copied()
    }

    pub fn add_vehicle(&mut self, pos: Hex, faction: Faction) {
        let previous = self.vehicles.insert(pos, faction);
        assert!(previous.is_none(), "two vehicles on tile {pos}");
    }

    pub fn remove_vehicle(&mut self, pos: Hex, faction: Faction) {
        let removed = self.vehicles.remove(&pos);
        assert_eq!(removed, Some(faction), "no such vehicle on tile {pos}");
    }

    pub fn move_vehicle(&mut self, from: Hex, to: Hex, faction: Faction) {
        self.remove_vehicle(from, faction);
        self.add_vehicle(to, faction);
    }

    pub fn add_building_tile(&mut self, pos: Hex) {
        self.building_tiles.insert(pos);
    }

    /// Whether a building occupies the tile.  Building tiles are static for
    /// pathfinding purposes; vehicles are checked per step instead.
    pub fn building_at(&self, pos: Hex) -> bool {
        self.building_tiles.contains(&pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Chain;

    #[test]
    fn vehicles_block_all_factions() {
        let tables = Tables::new();
        let params = Params::new(Chain::Regtest);
        tables
            .characters
            .create(1, "domob", Faction::Red)
            .set_pos(Hex::new(1, 0));

        let dyn_obstacles = DynObstacles::build(&tables, &params);
        assert!(!dyn_obstacles.is_free(Hex::new(1, 0)));
        assert!(dyn_obstacles.is_free(Hex::new(2, 0)));
        assert_eq!(dyn_obstacles.vehicle_at(Hex::new(1, 0)), Some(Faction::Red));
    }

    #[test]
    fn characters_in_buildings_do_not_block() {
        let tables = Tables::new();
        let params = Params::new(Chain::Regtest);
        tables
            .characters
            .create(1, "domob", Faction::Red)
            .enter_building(5);

        let dyn_obstacles = DynObstacles::build(&tables, &params);
        assert!(dyn_obstacles.is_free(Hex::ORIGIN));
    }

    #[test]
    fn building_shapes_block() {
        let tables = Tables::new();
        let params = Params::new(Chain::Regtest);
        tables
            .buildings
            .create(1, "workshop", "domob", Faction::Red)
            .set_centre(Hex::new(5, 5));

        let dyn_obstacles = DynObstacles::build(&tables, &params);
        assert!(!dyn_obstacles.is_free(Hex::new(5, 5)));
        assert!(!dyn_obstacles.is_free(Hex::new(6, 5)));
        assert!(!dyn_obstacles.is_free(Hex::new(5, 6)));
        assert!(dyn_obstacles.is_free(Hex::new(4, 5)));
    }

    #[test]
    fn vehicle_movement_updates_the_map() {
        let tables = Tables::new();
        let params = Params::new(Chain::Regtest);
        tables
            .characters
            .create(1, "domob", Faction::Red)
            .set_pos(Hex::ORIGIN);

        let mut dyn_obstacles = DynObstacles::build(&tables, &params);
        dyn_obstacles.move_vehicle(Hex::ORIGIN, Hex::new(1, 0), Faction::Red);
        assert!(dyn_obstacles.is_free(Hex::ORIGIN));
        assert!(!dyn_obstacles.is_free(Hex::new(1, 0)));
    }

    #[test]
    #[should_panic(expected = "two vehicles on tile")]
    fn double_occupancy_panics() {
        let mut dyn_obstacles = DynObstacles {
            vehicles: BTreeMap::new(),
            building_tiles: BTreeSet::new(),
        };
        dyn_obstacles.add_vehicle(Hex::ORIGIN, Faction::Red);
        dyn_obstacles.add_vehicle(Hex::ORIGIN, Faction::Green);
    }
}
