//! Characters (vehicles) and their table.

use serde::{Deserialize, Serialize};
use skarn_store::{Handle, Id, Table, EMPTY_ID};
use tracing::trace;

use crate::faction::Faction;
use crate::geometry::Hex;
use crate::params::Params;
use crate::schema::inventory::Inventory;
use crate::schema::{CombatData, CombatEffects, Hp, RegenData, TargetId, TransactionBoundary};

/// Movement bookkeeping that changes nearly every block and is therefore
/// kept out of the main payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolatileMovement {
    /// Accumulated movement credit in milli-tiles.
    pub partial_step: u32,
    /// Consecutive blocks the next step has been blocked.
    pub blocked_turns: u32,
}

/// Waypoint queue of a moving character.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub waypoints: Vec<Hex>,
}

/// Mining capability and its activation state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mining {
    pub rate_min: i64,
    pub rate_max: i64,
    pub active: bool,
}

/// The infrequently-changing payload of a character.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterProto {
    /// Base speed in milli-tiles per block.
    pub speed: u32,
    pub cargo_space: u32,
    pub combat: CombatData,
    pub movement: Option<Movement>,
    pub mining: Option<Mining>,
    /// Blocks a prospection by this character takes; `None` means the
    /// character cannot prospect.
    pub prospecting_blocks: Option<u32>,
    /// Ongoing operation this character is busy with.
    pub ongoing: Id,
    pub inventory: Inventory,
}

/// One character row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterRow {
    pub owner: String,
    pub faction: Faction,
    /// Valid iff `building_id == EMPTY_ID`.
    pub pos: Hex,
    /// Building the character is inside, or `EMPTY_ID`.
    pub building_id: Id,
    /// Pending enter-building intent, or `EMPTY_ID`.
    pub enter_building: Id,
    pub volatile_mv: VolatileMovement,
    pub hp: Hp,
    pub regen: RegenData,
    pub busy: bool,
    pub target: Option<TargetId>,
    pub effects: CombatEffects,
    pub proto: CharacterProto,
}

impl CharacterRow {
    /// Index column: the character needs movement processing.
    pub fn is_moving(&self) -> bool {
        self.proto.movement.is_some()
    }

    /// Index column: the character needs damage processing.
    pub fn has_target(&self) -> bool {
        self.target.is_some()
    }

    /// Index column: the character regenerates shield this block.
    pub fn can_regen(&self) -> bool {
        self.regen.shield_regen_mhp > 0 && self.hp.shield < self.regen.max_shield
    }

    pub fn is_in_building(&self) -> bool {
        self.building_id != EMPTY_ID
    }
}

/// Handle wrapper for one character.
pub struct Character {
    id: Id,
    handle: Handle<Id, CharacterRow>,
}

impl Character {
    pub fn id(&self) -> Id {
        self.id
    }

    pub fn row(&self) -> &CharacterRow {
        &self.handle
    }

    pub fn owner(&self) -> &str {
        &self.handle.owner
    }

    pub fn set_owner(&mut self, owner: &str) {
        self.handle.fields_mut().owner = owner.to_string();
    }

    pub fn faction(&self) -> Faction {
        self.handle.faction
    }

    /// Position outside of buildings.  Panics when inside one.
    pub fn pos(&self) -> Hex {
        assert!(
            !self.handle.is_in_building(),
            "character {} is inside a building and has no position",
            self.id
        );
        self.handle.pos
    }

    pub fn set_pos(&mut self, pos: Hex) {
        let row = self.handle.fields_mut();
        row.building_id = EMPTY_ID;
        row.pos = pos;
    }

    pub fn is_in_building(&self) -> bool {
        self.handle.is_in_building()
    }

    pub fn building_id(&self) -> Id {
        self.handle.building_id
    }

    /// Moves the character into a building, clearing the field position.
    pub fn enter_building(&mut self, building: Id) {
        assert_ne!(building, EMPTY_ID);
        let row = self.handle.fields_mut();
        row.building_id = building;
        row.pos = Hex::ORIGIN;
    }

    pub fn enter_building_intent(&self) -> Id {
        self.handle.enter_building
    }

    pub fn set_enter_building_intent(&mut self, building: Id) {
        self.handle.fields_mut().enter_building = building;
    }

    pub fn volatile_mv(&self) -> &VolatileMovement {
        &self.handle.volatile_mv
    }

    pub fn volatile_mv_mut(&mut self) -> &mut VolatileMovement {
        &mut self.handle.fields_mut().volatile_mv
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

    pub fn is_busy(&self) -> bool {
        self.handle.busy
    }

    pub fn set_busy(&mut self, busy: bool) {
        self.handle.fields_mut().busy = busy;
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

    pub fn proto(&self) -> &CharacterProto {
        &self.handle.proto
    }

    pub fn proto_mut(&mut self) -> &mut CharacterProto {
        &mut self.handle.payload_mut().proto
    }

    pub fn inventory(&self) -> &Inventory {
        &self.handle.proto.inventory
    }

    pub fn inventory_mut(&mut self) -> &mut Inventory {
        &mut self.proto_mut().inventory
    }

    /// Free cargo units.
    pub fn free_cargo(&self, params: &Params) -> u64 {
        let used = self.inventory().used_space(params);
        (self.proto().cargo_space as u64).saturating_sub(used)
    }

    /// Clears movement state entirely (queue, partial step, blocked turns).
    pub fn stop_moving(&mut self) {
        self.proto_mut().movement = None;
        *self.volatile_mv_mut() = VolatileMovement::default();
    }

    pub fn delete(self) {
        trace!(id = self.id, "deleting character");
        self.handle.delete();
    }
}

#[derive(Clone)]
pub struct CharacterTable {
    table: Table<Id, CharacterRow>,
}

impl CharacterTable {
    pub fn new() -> Self {
        Self {
            table: Table::new("characters"),
        }
    }

    /// Creates a fresh character for the owner.  Stats are filled in by the
    /// spawn logic.
    pub fn create(&self, id: Id, owner: &str, faction: Faction) -> Character {
        let row = CharacterRow {
            owner: owner.to_string(),
            faction,
            pos: Hex::ORIGIN,
            building_id: EMPTY_ID,
            enter_building: EMPTY_ID,
            volatile_mv: VolatileMovement::default(),
            hp: Hp::default(),
            regen: RegenData::default(),
            busy: false,
            target: None,
            effects: CombatEffects::default(),
            proto: CharacterProto::default(),
        };
        Character {
            id,
            handle: self.table.create(id, row),
        }
    }

    pub fn get(&self, id: Id) -> Option<Character> {
        self.table.get(&id).map(|handle| Character { id, handle })
    }

    pub fn contains(&self, id: Id) -> bool {
        self.table.contains(&id)
    }

    /// All character ids, ascending.
    pub fn ids(&self) -> Vec<Id> {
        self.table.keys()
    }

    /// Ids of characters owned by the given account, ascending.
    pub fn ids_for_owner(&self, owner: &str) -> Vec<Id> {
        self.table.keys_where(|_, r| r.owner == owner)
    }

    /// Ids of characters with a waypoint queue.
    pub fn ids_moving(&self) -> Vec<Id> {
        self.table.keys_where(|_, r| r.is_moving())
    }

    /// Ids of characters with a combat target.
    pub fn ids_with_target(&self) -> Vec<Id> {
        self.table.keys_where(|_, r| r.has_target())
    }

    /// Ids of characters with attacks, outside of buildings.
    pub fn ids_with_attacks(&self) -> Vec<Id> {
        self.table
            .keys_where(|_, r| !r.is_in_building() && r.proto.combat.has_attacks())
    }

    /// Ids of characters that regenerate this block.
    pub fn ids_for_regen(&self) -> Vec<Id> {
        self.table.keys_where(|_, r| r.can_regen())
    }

    /// Ids of characters with active combat effects.
    pub fn ids_with_effects(&self) -> Vec<Id> {
        self.table.keys_where(|_, r| !r.effects.is_empty())
    }

    /// Ids of characters with a pending enter-building intent.
    pub fn ids_entering(&self) -> Vec<Id> {
        self.table
            .keys_where(|_, r| r.enter_building != EMPTY_ID && !r.is_in_building())
    }

    /// Ids of active miners.
    pub fn ids_mining(&self) -> Vec<Id> {
        self.table
            .keys_where(|_, r| r.proto.mining.map(|m| m.active).unwrap_or(false))
    }

    pub fn read<T>(&self, id: Id, f: impl FnOnce(&CharacterRow) -> T) -> Option<T> {
        self.table.read(&id, f)
    }

    pub fn count_for_owner(&self, owner: &str) -> usize {
        self.ids_for_owner(owner).len()
    }
}

impl TransactionBoundary for CharacterTable {
    fn begin(&self) {
        self.table.begin().expect("characters transaction");
    }

    fn commit(&self) {
        self.table.commit().expect("characters transaction");
    }

    fn rollback(&self) {
        self.table.rollback().expect("characters transaction");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_one() -> CharacterTable {
        let tbl = CharacterTable::new();
        tbl.create(1, "domob", Faction::Red);
        tbl
    }

    #[test]
    fn position_and_building_are_exclusive() {
        let tbl = table_with_one();

        let mut c = tbl.get(1).unwrap();
        c.set_pos(Hex::new(2, 3));
        assert_eq!(c.pos(), Hex::new(2, 3));
        assert!(!c.is_in_building());

        c.enter_building(42);
        assert!(c.is_in_building());
        assert_eq!(c.building_id(), 42);
    }

    #[test]
    #[should_panic(expected = "inside a building")]
    fn position_inside_building_panics() {
        let tbl = table_with_one();
        let mut c = tbl.get(1).unwrap();
        c.enter_building(42);
        c.pos();
    }

    #[test]
    fn index_queries() {
        let tbl = table_with_one();
        {
            let mut c = tbl.get(1).unwrap();
            c.proto_mut().movement = Some(Movement {
                waypoints: vec![Hex::new(1, 0)],
            });
            c.set_target(Some(TargetId::character(7)));
        }
        tbl.create(2, "andy", Faction::Green);

        assert_eq!(tbl.ids_moving(), vec![1]);
        assert_eq!(tbl.ids_with_target(), vec![1]);
        assert_eq!(tbl.ids(), vec![1, 2]);
        assert_eq!(tbl.ids_for_owner("andy"), vec![2]);
    }

    #[test]
    fn regen_index_tracks_hp() {
        let tbl = table_with_one();
        assert!(tbl.ids_for_regen().is_empty());

        {
            let mut c = tbl.get(1).unwrap();
            c.regen_mut().max_shield = 10;
            c.regen_mut().shield_regen_mhp = 500;
            c.hp_mut().shield = 5;
        }
        assert_eq!(tbl.ids_for_regen(), vec![1]);

        tbl.get(1).unwrap().hp_mut().shield = 10;
        assert!(tbl.ids_for_regen().is_empty());
    }

    #[test]
    fn stop_moving_clears_volatile_state() {
        let tbl = table_with_one();
        let mut c = tbl.get(1).unwrap();
        c.proto_mut().movement = Some(Movement {
            waypoints: vec![Hex::new(5, 0)],
        });
        c.volatile_mv_mut().partial_step = 700;
        c.stop_moving();
        assert!(c.proto().movement.is_none());
        assert_eq!(c.volatile_mv().partial_step, 0);
    }
}
