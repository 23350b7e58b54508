//! Shared combat value types embedded in character and building rows.

use serde::{Deserialize, Serialize};

/// Hit points with a milli-HP fraction on the shield.
///
/// The fraction only ever accumulates through regeneration; damage operates
/// on whole points.  Keeping it as an integer avoids floating point in
/// consensus-relevant code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hp {
    pub armour: u32,
    pub shield: u32,
    pub shield_mhp: u32,
}

impl Hp {
    /// Total whole hit points.
    pub fn total(&self) -> u32 {
        self.armour + self.shield
    }
}

/// Static regeneration data: maximum HP and the per-block shield regen in
/// milli-HP.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegenData {
    pub max_armour: u32,
    pub max_shield: u32,
    pub shield_regen_mhp: u32,
}

/// Damage range of one attack; rolls are uniform in `[min, max]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Damage {
    pub min: u32,
    pub max: u32,
}

/// Status effects an attack applies to whatever it hits.  They become part
/// of the victim's active effects for the following phases and expire unless
/// refreshed by another hit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackEffects {
    /// Percent modifier on movement speed, e.g. -50 halves it.
    pub speed_percent: i32,
    /// Percent modifier on attack and area ranges.
    pub range_percent: i32,
    /// Mental control: the victim treats friendlies as enemies.
    pub mentecon: bool,
}

impl AttackEffects {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One attack of a fighter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attack {
    /// Range for a targeted attack.
    pub range: Option<u32>,
    /// Radius for an area attack centred on the fighter.
    pub area: Option<u32>,
    /// Area attacks hit friendlies instead of enemies when set.
    pub friendlies: bool,
    pub damage: Option<Damage>,
    pub effects: Option<AttackEffects>,
}

/// All attacks of a fighter.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatData {
    pub attacks: Vec<Attack>,
}

impl CombatData {
    /// Largest targeted-attack range, before effects.
    pub fn max_attack_range(&self) -> Option<u32> {
        self.attacks.iter().filter_map(|a| a.range).max()
    }

    pub fn has_attacks(&self) -> bool {
        !self.attacks.is_empty()
    }
}

/// Discriminates the two kinds of combat entity.
///
/// The derived order (buildings before characters) is the iteration order of
/// combat phases and is consensus-relevant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FighterKind {
    Building,
    Character,
}

/// Reference to a combat entity, used as an attack target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId {
    pub kind: FighterKind,
    pub id: skarn_store::Id,
}

impl TargetId {
    pub fn character(id: skarn_store::Id) -> Self {
        Self {
            kind: FighterKind::Character,
            id,
        }
    }

    pub fn building(id: skarn_store::Id) -> Self {
        Self {
            kind: FighterKind::Building,
            id,
        }
    }
}

/// Active status effects on a fighter, refreshed every damage phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatEffects {
    pub speed_percent: i32,
    pub range_percent: i32,
    pub mentecon: bool,
}

impl CombatEffects {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn accumulate(&mut self, applied: &AttackEffects) {
        self.speed_percent += applied.speed_percent;
        self.range_percent += applied.range_percent;
        self.mentecon |= applied.mentecon;
    }

    /// Applies the percent range modifier to a base range.
    pub fn modified_range(&self, base: u32) -> u32 {
        modified_by_percent(base, self.range_percent)
    }

    /// Applies the percent speed modifier to a base speed.
    pub fn modified_speed(&self, base: u32) -> u32 {
        modified_by_percent(base, self.speed_percent)
    }
}

fn modified_by_percent(base: u32, percent: i32) -> u32 {
    let scaled = base as i64 * (100 + percent as i64) / 100;
    scaled.clamp(0, u32::MAX as i64) as u32
}
