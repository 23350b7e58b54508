//! Buildings and their table.

use serde::{Deserialize, Serialize};
use skarn_store::{Handle, Id, Table, EMPTY_ID};
use tracing::trace;

use crate::faction::Faction;
use crate::geometry::Hex;
use crate::params::Params;
use crate::schema::inventory::Inventory;
use crate::schema::{CombatData, CombatEffects, Hp, RegenData, TargetId, TransactionBoundary};

/// Founding and completion heights of a building.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeData {
    pub founded_height: u64,
    pub finished_height: Option<u64>,
}

/// Owner-settable building configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildingConfig {
    /// Fee on service base cost, in percent.
    pub service_fee_percent: Option<u32>,
    /// Fee on DEX trades, in basis points.
    pub dex_fee_bps: Option<u32>,
}

impl BuildingConfig {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overlays set fields of `other` onto this config.
    pub fn merge_from(&mut self, other: &BuildingConfig) {
        if let Some(sf) = other.service_fee_percent {
            self.service_fee_percent = Some(sf);
        }
        if let Some(xf) = other.dex_fee_bps {
            self.dex_fee_bps = Some(xf);
        }
    }
}

/// The infrequently-changing payload of a building.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildingProto {
    /// Rotation of the shape in 60 degree steps.
    pub rotation_steps: u32,
    pub foundation: bool,
    pub age_data: AgeData,
    pub config: BuildingConfig,
    pub combat: CombatData,
    /// Materials delivered towards construction while a foundation.
    pub construction_inventory: Inventory,
    /// The building-construction operation, while one is scheduled.
    pub ongoing_construction: Id,
}

/// One building row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildingRow {
    pub kind: String,
    /// Empty for Ancient buildings.
    pub owner: String,
    pub faction: Faction,
    pub centre: Hex,
    pub hp: Hp,
    pub regen: RegenData,
    pub target: Option<TargetId>,
    pub effects: CombatEffects,
    pub proto: BuildingProto,
}

impl BuildingRow {
    pub fn has_target(&self) -> bool {
        self.target.is_some()
    }

    pub fn can_regen(&self) -> bool {
        self.regen.shield_regen_mhp > 0 && self.hp.shield < self.regen.max_shield
    }
}

/// Handle wrapper for one building.
pub struct Building {
    id: Id,
    handle: Handle<Id, BuildingRow>,
}

impl Building {
    pub fn id(&self) -> Id {
        self.id
    }

    pub fn row(&self) -> &BuildingRow {
        &self.handle
    }

    pub fn kind(&self) -> &str {
        &self.handle.kind
    }

    pub fn owner(&self) -> &str {
        assert_ne!(
            self.handle.faction,
            Faction::Ancient,
            "Ancient building {} has no owner",
            self.id
        );
        &self.handle.owner
    }

    pub fn set_owner(&mut self, owner: &str) {
        self.handle.fields_mut().owner = owner.to_string();
    }

    pub fn faction(&self) -> Faction {
        self.handle.faction
    }

    pub fn centre(&self) -> Hex {
        self.handle.centre
    }

    pub fn set_centre(&mut self, centre: Hex) {
        self.handle.fields_mut().centre = centre;
    }

    pub fn hp(&self) -> &Hp {
        &self.handle.hp
    }

    pub fn hp_mut(&mut self) -> &mut Hp {
        &mut self.handle.fields_mut().hp
    }

    pub fn regen(&self) -> &RegenData {
        &self.handle.regen
    }

    pub fn regen_mut(&mut self) -> &mut RegenData {
        &mut self.handle.fields_mut().regen
    }

    pub fn target(&self) -> Option<TargetId> {
        self.handle.target
    }

    pub fn set_target(&mut self, target: Option<TargetId>) {
        self.handle.fields_mut().target = target;
    }

    pub fn effects(&self) -> &CombatEffects {
        &self.handle.effects
    }

    pub fn set_effects(&mut self, effects: CombatEffects) {
        self.handle.fields_mut().effects = effects;
    }

    pub fn proto(&self) -> &BuildingProto {
        &self.handle.proto
    }

    pub fn proto_mut(&mut self) -> &mut BuildingProto {
        &mut self.handle.payload_mut().proto
    }

    /// The tiles this building occupies on the map.
    pub fn shape_tiles(&self, params: &Params) -> Vec<Hex> {
        shape_tiles(
            params,
            &self.handle.kind,
            self.handle.centre,
            self.handle.proto.rotation_steps,
        )
    }

    pub fn delete(self) {
        trace!(id = self.id, "deleting building");
        self.handle.delete();
    }
}

/// Computes a building shape's occupied tiles for a placement.
pub fn shape_tiles(params: &Params, kind: &str, centre: Hex, rotation_steps: u32) -> Vec<Hex> {
    params
        .building_checked(kind)
        .shape
        .iter()
        .map(|t| centre + t.rotated(rotation_steps))
        .collect()
}

#[derive(Clone)]
pub struct BuildingsTable {
    table: Table<Id, BuildingRow>,
}

impl BuildingsTable {
    pub fn new() -> Self {
        Self {
            table: Table::new("buildings"),
        }
    }

    pub fn create(&self, id: Id, kind: &str, owner: &str, faction: Faction) -> Building {
        assert_eq!(
            owner.is_empty(),
            faction == Faction::Ancient,
            "building owner must be empty exactly for Ancient buildings"
        );
        let row = BuildingRow {
            kind: kind.to_string(),
            owner: owner.to_string(),
            faction,
            centre: Hex::ORIGIN,
            hp: Hp::default(),
            regen: RegenData::default(),
            target: None,
            effects: CombatEffects::default(),
            proto: BuildingProto::default(),
        };
        Building {
            id,
            handle: self.table.create(id, row),
        }
    }

    pub fn get(&self, id: Id) -> Option<Building> {
        self.table.get(&id).map(|handle| Building { id, handle })
    }

    pub fn contains(&self, id: Id) -> bool {
        self.table.contains(&id)
    }

    pub fn ids(&self) -> Vec<Id> {
        self.table.keys()
    }

    pub fn ids_with_target(&self) -> Vec<Id> {
        self.table.keys_where(|_, r| r.has_target())
    }

    pub fn ids_with_attacks(&self) -> Vec<Id> {
        self.table.keys_where(|_, r| r.proto.combat.has_attacks())
    }

    pub fn ids_for_regen(&self) -> Vec<Id> {
        self.table.keys_where(|_, r| r.can_regen())
    }

    /// Ids of buildings with active combat effects.
    pub fn ids_with_effects(&self) -> Vec<Id> {
        self.table.keys_where(|_, r| !r.effects.is_empty())
    }

    pub fn read<T>(&self, id: Id, f: impl FnOnce(&BuildingRow) -> T) -> Option<T> {
        self.table.read(&id, f)
    }
}

impl TransactionBoundary for BuildingsTable {
    fn begin(&self) {
        self.table.begin().expect("buildings transaction");
    }

    fn commit(&self) {
        self.table.commit().expect("buildings transaction");
    }

    fn rollback(&self) {
        self.table.rollback().expect("buildings transaction");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Chain;

    #[test]
    fn ancient_buildings_have_no_owner() {
        let tbl = BuildingsTable::new();
        tbl.create(1, "obelisk", "", Faction::Ancient);
        let b = tbl.get(1).unwrap();
        assert_eq!(b.faction(), Faction::Ancient);
    }

    #[test]
    #[should_panic(expected = "has no owner")]
    fn ancient_owner_access_panics() {
        let tbl = BuildingsTable::new();
        tbl.create(1, "obelisk", "", Faction::Ancient);
        tbl.get(1).unwrap().owner();
    }

    #[test]
    #[should_panic(expected = "owner must be empty")]
    fn owned_ancient_is_rejected() {
        let tbl = BuildingsTable::new();
        tbl.create(1, "obelisk", "domob", Faction::Ancient);
    }

    #[test]
    fn shape_rotation() {
        let params = Params::new(Chain::Regtest);
        let tbl = BuildingsTable::new();
        {
            let mut b = tbl.create(1, "workshop", "domob", Faction::Red);
            b.set_centre(Hex::new(10, 10));
        }

        let b = tbl.get(1).unwrap();
        let tiles = b.shape_tiles(&params);
        assert_eq!(tiles.len(), 3);
        assert!(tiles.contains(&Hex::new(10, 10)));
        assert!(tiles.contains(&Hex::new(11, 10)));

        drop(b);
        tbl.get(1).unwrap().proto_mut().rotation_steps = 1;
        let rotated = tbl.get(1).unwrap().shape_tiles(&params);
        assert_eq!(rotated.len(), 3);
        assert!(rotated.contains(&Hex::new(10, 10)));
        assert!(!rotated.contains(&Hex::new(11, 10)));
    }

    #[test]
    fn config_merge() {
        let mut cfg = BuildingConfig::default();
        cfg.merge_from(&BuildingConfig {
            service_fee_percent: Some(50),
            dex_fee_bps: None,
        });
        cfg.merge_from(&BuildingConfig {
            service_fee_percent: None,
            dex_fee_bps: Some(30),
        });
        assert_eq!(cfg.service_fee_percent, Some(50));
        assert_eq!(cfg.dex_fee_bps, Some(30));
    }
}
