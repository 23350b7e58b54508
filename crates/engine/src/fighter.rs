//! Uniform combat view over characters and buildings.
//!
//! Combat code never cares which kind of entity it is shooting at; the
//! [`Fighter`] wrapper dispatches on the tag and exposes exactly the
//! capability surface the combat phases need.

use skarn_store::Id;

use crate::faction::Faction;
use crate::geometry::Hex;
use crate::schema::building::{Building, BuildingsTable};
use crate::schema::character::{Character, CharacterTable};
use crate::schema::{CombatData, CombatEffects, FighterKind, Hp, RegenData, TargetId};

pub enum Fighter {
    Character(Character),
    Building(Building),
}

impl Fighter {
    pub fn target_id(&self) -> TargetId {
        match self {
            Fighter::Character(c) => TargetId::character(c.id()),
            Fighter::Building(b) => TargetId::building(b.id()),
        }
    }

    pub fn faction(&self) -> Faction {
        match self {
            Fighter::Character(c) => c.faction(),
            Fighter::Building(b) => b.faction(),
        }
    }

    pub fn position(&self) -> Hex {
        match self {
            Fighter::Character(c) => c.pos(),
            Fighter::Building(b) => b.centre(),
        }
    }

    pub fn combat_data(&self) -> &CombatData {
        match self {
            Fighter::Character(c) => &c.proto().combat,
            Fighter::Building(b) => &b.proto().combat,
        }
    }

    pub fn hp(&self) -> &Hp {
        match self {
            Fighter::Character(c) => c.hp(),
            Fighter::Building(b) => b.hp(),
        }
    }

    pub fn hp_mut(&mut self) -> &mut Hp {
        match self {
            Fighter::Character(c) => c.hp_mut(),
            Fighter::Building(b) => b.hp_mut(),
        }
    }

    pub fn regen_data(&self) -> &RegenData {
        match self {
            Fighter::Character(c) => c.regen(),
            Fighter::Building(b) => b.regen(),
        }
    }

    pub fn target(&self) -> Option<TargetId> {
        match self {
            Fighter::Character(c) => c.target(),
            Fighter::Building(b) => b.target(),
        }
    }

    pub fn set_target(&mut self, target: TargetId) {
        match self {
            Fighter::Character(c) => c.set_target(Some(target)),
            Fighter::Building(b) => b.set_target(Some(target)),
        }
    }

    pub fn clear_target(&mut self) {
        match self {
            Fighter::Character(c) => c.set_target(None),
            Fighter::Building(b) => b.set_target(None),
        }
    }

    pub fn effects(&self) -> CombatEffects {
        match self {
            Fighter::Character(c) => *c.effects(),
            Fighter::Building(b) => *b.effects(),
        }
    }

    pub fn set_effects(&mut self, effects: CombatEffects) {
        match self {
            Fighter::Character(c) => c.set_effects(effects),
            Fighter::Building(b) => b.set_effects(effects),
        }
    }
}

/// Factory for fighters over the two entity tables.
#[derive(Clone)]
pub struct FighterTable {
    characters: CharacterTable,
    buildings: BuildingsTable,
}

impl FighterTable {
    pub fn new(characters: CharacterTable, buildings: BuildingsTable) -> Self {
        Self {
            characters,
            buildings,
        }
    }

    /// Looks up the fighter for a target reference.
    pub fn get(&self, id: TargetId) -> Option<Fighter> {
        match id.kind {
            FighterKind::Building => self.buildings.get(id.id).map(Fighter::Building),
            FighterKind::Character => self.characters.get(id.id).map(Fighter::Character),
        }
    }

    /// Target ids of all fighters with attacks, in `(kind, id)` order.
    pub fn ids_with_attacks(&self) -> Vec<TargetId> {
        self.collect(
            self.buildings.ids_with_attacks(),
            self.characters.ids_with_attacks(),
        )
    }

    /// Target ids of all fighters with a target, in `(kind, id)` order.
    pub fn ids_with_target(&self) -> Vec<TargetId> {
        self.collect(
            self.buildings.ids_with_target(),
            self.characters.ids_with_target(),
        )
    }

    /// Target ids of all fighters due for regeneration, in `(kind, id)`
    /// order.
    pub fn ids_for_regen(&self) -> Vec<TargetId> {
        self.collect(
            self.buildings.ids_for_regen(),
            self.characters.ids_for_regen(),
        )
    }

    /// Target ids of all fighters with active effects, in `(kind, id)`
    /// order.
    pub fn ids_with_effects(&self) -> Vec<TargetId> {
        self.collect(
            self.buildings.ids_with_effects(),
            self.characters.ids_with_effects(),
        )
    }

    /// All possible target candidates (fighters on the map), in `(kind, id)`
    /// order.
    pub fn all_candidates(&self) -> Vec<TargetId> {
        let characters = self
            .characters
            .ids()
            .into_iter()
            .filter(|id| {
                !self
                    .characters
                    .read(*id, |r| r.is_in_building())
                    .expect("listed id exists")
            })
            .collect();
        self.collect(self.buildings.ids(), characters)
    }

    fn collect(&self, buildings: Vec<Id>, characters: Vec<Id>) -> Vec<TargetId> {
        buildings
            .into_iter()
            .map(TargetId::building)
            .chain(characters.into_iter().map(TargetId::character))
            .collect()
    }
}
