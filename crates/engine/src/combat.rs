//! Combat phases: damage dealing, kill processing, target acquisition and
//! regeneration.
//!
//! Damage at the start of a block uses the targets acquired at the end of
//! the previous one.  Effects applied by hits become active right away and
//! stay active until the next damage phase replaces them, so they influence
//! movement of the same block and targeting at its end.

use std::collections::{BTreeMap, BTreeSet};

use skarn_store::{Id, EMPTY_ID};
use tracing::{debug, trace};

use crate::context::Context;
use crate::faction::Faction;
use crate::fighter::{Fighter, FighterTable};
use crate::geometry::Hex;
use crate::rng::Rng;
use crate::schema::{CombatEffects, FighterKind, Tables, TargetId};

/// Maximum value for the fame of an account.
const MAX_FAME: u32 = 9_999;

/// Fame transferred for a kill.
const FAME_PER_KILL: u32 = 100;

/// Acquires combat targets for all fighters with attacks.
///
/// Candidates are live fighters on the map of the opposing faction (or the
/// own faction while mentecon is active), within the fighter's largest
/// effective attack or area range.  Among the strictly closest candidates
/// one is chosen uniformly at random.
pub fn find_targets(tables: &Tables, rng: &mut Rng) {
    let fighters = FighterTable::new(tables.characters.clone(), tables.buildings.clone());

    // Position and faction of every possible candidate, fixed for the
    // phase.  Targets set while iterating never change these.
    let candidates: Vec<(TargetId, Faction, Hex)> = fighters
        .all_candidates()
        .into_iter()
        .map(|id| {
            let f = fighters.get(id).expect("candidate exists");
            (id, f.faction(), f.position())
        })
        .collect();

    for id in fighters.ids_with_attacks() {
        let mut fighter = fighters.get(id).expect("listed fighter exists");
        let range = match acquisition_range(&fighter) {
            Some(r) => r,
            None => continue,
        };
        let want_enemy = !fighter.effects().mentecon;

        let mut closest: Vec<TargetId> = Vec::new();
        let mut closest_dist = u32::MAX;
        for (cand, faction, pos) in &candidates {
            if *cand == id {
                continue;
            }
            if faction.is_enemy(fighter.faction()) != want_enemy {
                continue;
            }
            let dist = Hex::distance_l1(fighter.position(), *pos);
            if dist > range {
                continue;
            }
            match dist.cmp(&closest_dist) {
                std::cmp::Ordering::Less => {
                    closest_dist = dist;
                    closest = vec![*cand];
                }
                std::cmp::Ordering::Equal => closest.push(*cand),
                std::cmp::Ordering::Greater => (),
            }
        }

        if closest.is_empty() {
            fighter.clear_target();
            continue;
        }

        let chosen = closest[rng.next_int(closest.len() as u32) as usize];
        trace!(fighter = ?id, target = ?chosen, dist = closest_dist, "acquired target");
        fighter.set_target(chosen);
    }
}

/// The range within which a fighter acquires targets: the largest attack or
/// area range, with active range effects applied.
fn acquisition_range(fighter: &Fighter) -> Option<u32> {
    let base = fighter
        .combat_data()
        .attacks
        .iter()
        .filter_map(|a| a.range.max(a.area))
        .max()?;
    Some(fighter.effects().modified_range(base))
}

/// Deals damage from all fighters with a target and returns the entities
/// whose HP reached zero, in processing order.
///
/// Also records character-on-character hits in the damage lists and
/// replaces every fighter's active effects with those applied this phase.
pub fn deal_damage(tables: &Tables, rng: &mut Rng, ctx: &Context) -> Vec<TargetId> {
    let fighters = FighterTable::new(tables.characters.clone(), tables.buildings.clone());

    let candidates: Vec<(TargetId, Faction, Hex)> = fighters
        .all_candidates()
        .into_iter()
        .map(|id| {
            let f = fighters.get(id).expect("candidate exists");
            (id, f.faction(), f.position())
        })
        .collect();

    let mut dead: Vec<TargetId> = Vec::new();
    let mut dead_seen: BTreeSet<TargetId> = BTreeSet::new();
    let mut new_effects: BTreeMap<TargetId, CombatEffects> = BTreeMap::new();

    for attacker_id in fighters.ids_with_target() {
        let attacker = fighters.get(attacker_id).expect("listed fighter exists");
        let target = attacker.target().expect("indexed fighter has a target");
        let attacker_pos = attacker.position();
        let attacker_faction = attacker.faction();
        let attacker_effects = attacker.effects();
        let attacks = attacker.combat_data().attacks.clone();
        let attacker_char = match attacker_id.kind {
            FighterKind::Character => attacker_id.id,
            FighterKind::Building => EMPTY_ID,
        };
        drop(attacker);

        let target_pos = {
            let t = fighters.get(target).unwrap_or_else(|| {
                panic!("target {target:?} of fighter {attacker_id:?} does not exist")
            });
            t.position()
        };

        for attack in &attacks {
            if let Some(range) = attack.range {
                let range = attacker_effects.modified_range(range);
                if Hex::distance_l1(attacker_pos, target_pos) <= range {
                    let dmg = attack
                        .damage
                        .map(|d| rng.next_range(d.min, d.max))
                        .unwrap_or(0);
                    hit(
                        tables, &fighters, ctx, target, attacker_char, dmg, attack,
                        &mut new_effects, &mut dead, &mut dead_seen,
                    );
                }
            }

            if let Some(area) = attack.area {
                let area = attacker_effects.modified_range(area);
                let want_enemy = !attack.friendlies != attacker_effects.mentecon;
                let eligible: Vec<TargetId> = candidates
                    .iter()
                    .filter(|(cand, faction, pos)| {
                        *cand != attacker_id
                            && faction.is_enemy(attacker_faction) == want_enemy
                            && Hex::distance_l1(attacker_pos, *pos) <= area
                    })
                    .map(|(cand, _, _)| *cand)
                    .collect();
                if eligible.is_empty() {
                    continue;
                }

                // A single roll per area attack, shared by all victims.
                let dmg = attack
                    .damage
                    .map(|d| rng.next_range(d.min, d.max))
                    .unwrap_or(0);
                for cand in eligible {
                    hit(
                        tables, &fighters, ctx, cand, attacker_char, dmg, attack,
                        &mut new_effects, &mut dead, &mut dead_seen,
                    );
                }
            }
        }
    }

    // Active effects are exactly what this block's hits applied; everything
    // else expires now.
    let mut to_update: BTreeSet<TargetId> = fighters.ids_with_effects().into_iter().collect();
    to_update.extend(new_effects.keys().copied());
    for id in to_update {
        let mut fighter = fighters.get(id).expect("fighter with effects exists");
        fighter.set_effects(new_effects.get(&id).copied().unwrap_or_default());
    }

    dead
}

#[allow(clippy::too_many_arguments)]
fn hit(
    tables: &Tables,
    fighters: &FighterTable,
    ctx: &Context,
    victim: TargetId,
    attacker_char: Id,
    dmg: u32,
    attack: &crate::schema::Attack,
    new_effects: &mut BTreeMap<TargetId, CombatEffects>,
    dead: &mut Vec<TargetId>,
    dead_seen: &mut BTreeSet<TargetId>,
) {
    if let Some(effects) = &attack.effects {
        new_effects.entry(victim).or_default().accumulate(effects);
    }

    if dmg == 0 {
        return;
    }

    let mut f = fighters.get(victim).expect("hit victim exists");
    let hp = f.hp_mut();
    let shield_dmg = dmg.min(hp.shield);
    hp.shield -= shield_dmg;
    let armour_dmg = (dmg - shield_dmg).min(hp.armour);
    hp.armour -= armour_dmg;
    let dead_now = hp.total() == 0;
    drop(f);

    trace!(victim = ?victim, dmg, "hit");

    if attacker_char != EMPTY_ID && victim.kind == FighterKind::Character {
        tables
            .damage_lists
            .add_entry(victim.id, attacker_char, ctx.height());
    }

    if dead_now && dead_seen.insert(victim) {
        debug!(victim = ?victim, "fighter killed");
        dead.push(victim);
    }
}

/// Accumulates fame deltas over the kills of one block and applies them in
/// one batch, clamped to the valid range.
struct FameFrame {
    deltas: BTreeMap<String, i64>,
}

impl FameFrame {
    fn new() -> Self {
        Self {
            deltas: BTreeMap::new(),
        }
    }

    fn level(fame: u32) -> u32 {
        (fame / 1_000).min(8)
    }

    /// Updates kills counters and fame deltas for one killed character.
    fn update_for_kill(&mut self, tables: &Tables, victim: Id) {
        let victim_owner = tables
            .characters
            .read(victim, |r| r.owner.clone())
            .expect("victim still exists during kill processing");
        let victim_fame = tables
            .accounts
            .read(&victim_owner, |a| a.fame)
            .expect("victim owner exists");
        let victim_level = Self::level(victim_fame);

        let mut owners: BTreeSet<String> = BTreeSet::new();
        for attacker in tables.damage_lists.attackers(victim) {
            let owner = tables
                .characters
                .read(attacker, |r| r.owner.clone())
                .expect("attacker on damage list exists");
            owners.insert(owner);
        }
        if owners.is_empty() {
            return;
        }

        let mut in_range: Vec<String> = Vec::new();
        for owner in &owners {
            let mut a = tables.accounts.get(owner).expect("attacker owner exists");
            a.increment_kills();
            let level = Self::level(a.row().fame);
            if level.abs_diff(victim_level) <= 1 {
                in_range.push(owner.clone());
            }
        }

        if in_range.is_empty() {
            return;
        }

        let fame_lost = victim_fame.min(FAME_PER_KILL) as i64;
        let per_killer = fame_lost / owners.len() as i64;
        for owner in in_range {
            *self.deltas.entry(owner).or_insert(0) += per_killer;
        }
        *self.deltas.entry(victim_owner).or_insert(0) -= fame_lost;
    }

    fn apply(self, tables: &Tables) {
        for (owner, delta) in self.deltas {
            let mut a = tables.accounts.get(&owner).expect("account exists");
            let fame = (a.row().fame as i64 + delta).clamp(0, MAX_FAME as i64) as u32;
            debug!(%owner, fame, delta, "applying fame delta");
            a.set_fame(fame);
        }
    }
}

/// Processes the killed entities: loot drops, prospection cancellation,
/// order and operation cleanup, kill and fame accounting, row deletion.
pub fn process_kills(tables: &Tables, dead: Vec<TargetId>, ctx: &Context) {
    let mut fame = FameFrame::new();
    let mut queue: Vec<TargetId> = dead;
    let mut processed: BTreeSet<TargetId> = BTreeSet::new();

    let mut i = 0;
    while i < queue.len() {
        let victim = queue[i];
        i += 1;
        if !processed.insert(victim) {
            continue;
        }

        match victim.kind {
            FighterKind::Character => {
                fame.update_for_kill(tables, victim.id);
                kill_character(tables, victim.id, ctx);
            }
            FighterKind::Building => {
                // Characters inside the building go down with it.
                for ch in tables.characters.ids() {
                    let inside = tables
                        .characters
                        .read(ch, |r| r.building_id == victim.id)
                        .expect("listed id exists");
                    if inside {
                        queue.push(TargetId::character(ch));
                    }
                }
                kill_building(tables, victim.id, ctx);
            }
        }
    }

    fame.apply(tables);
}

fn kill_character(tables: &Tables, id: Id, ctx: &Context) {
    let c = tables.characters.get(id).expect("killed character exists");
    debug!(id, owner = c.owner(), "processing killed character");

    // Cancel an in-progress prospection attribution.
    if !c.is_in_building() {
        let region_id = ctx.map().region_id(c.pos());
        if tables.regions.prospector_of(region_id) == id {
            let mut r = tables.regions.get(region_id, ctx.height());
            r.set_prospecting_character(EMPTY_ID);
        }
    }

    if !c.inventory().is_empty() && !c.is_in_building() {
        let pos = c.pos();
        let mut loot = tables.ground_loot.get(pos);
        let mut inv = c.inventory().clone();
        inv.drain_into(loot.payload_mut());
    }

    for op in tables.ongoings.ids_for_character(id) {
        tables.ongoings.delete(op);
    }

    tables.damage_lists.remove_character(id);
    c.delete();
}

fn kill_building(tables: &Tables, id: Id, ctx: &Context) {
    let b = tables.buildings.get(id).expect("killed building exists");
    debug!(id, kind = b.kind(), "processing destroyed building");
    let centre = b.centre();

    let mut dropped = tables.building_inv.remove_for_building(id);
    let mut construction = b.proto().construction_inventory.clone();
    construction.drain_into(&mut dropped);

    // Blueprint originals held by operations inside return as loot as well.
    for op_id in tables.ongoings.ids_for_building(id) {
        let original = tables
            .ongoings
            .read(op_id, |r| match &r.op {
                crate::schema::ongoing::OngoingOp::BlueprintCopy { original_type, .. } => {
                    Some(original_type.clone())
                }
                crate::schema::ongoing::OngoingOp::ItemConstruction {
                    original_type: Some(t),
                    ..
                } => Some(t.clone()),
                _ => None,
            })
            .expect("listed op exists")
            .into_iter()
            .next();
        if let Some(item) = original {
            dropped.add(&item, 1);
        }
        tables.ongoings.delete(op_id);
    }

    // Open orders are cancelled: coins return to the bidder, escrowed items
    // drop as loot since the building inventories are gone.
    for order_id in tables.orders.ids_for_building(id) {
        let order = tables.orders.get(order_id).expect("listed order exists");
        match order.row().order_type {
            crate::schema::dex::OrderType::Bid => {
                let refund = order.row().quantity * order.row().price;
                let mut a = tables
                    .accounts
                    .get(&order.row().account.clone())
                    .expect("order owner exists");
                a.add_balance(refund);
            }
            crate::schema::dex::OrderType::Ask => {
                dropped.add(&order.row().item.clone(), order.row().quantity);
            }
        }
        order.delete();
    }

    if !dropped.is_empty() {
        let mut loot = tables.ground_loot.get(centre);
        dropped.drain_into(loot.payload_mut());
    }

    b.delete();
}

/// Adds the per-block shield regeneration to all fighters below their
/// maximum, carrying milli-HP into whole points and capping at the maximum.
pub fn regenerate_hp(tables: &Tables) {
    let fighters = FighterTable::new(tables.characters.clone(), tables.buildings.clone());

    for id in fighters.ids_for_regen() {
        let mut f = fighters.get(id).expect("listed fighter exists");
        let regen = *f.regen_data();
        let hp = f.hp_mut();

        let mhp = hp.shield_mhp + regen.shield_regen_mhp;
        hp.shield += mhp / 1_000;
        hp.shield_mhp = mhp % 1_000;
        if hp.shield >= regen.max_shield {
            hp.shield = regen.max_shield;
            hp.shield_mhp = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{BaseMap, GridMap};
    use crate::params::{Chain, Params};
    use crate::schema::{Attack, Damage};

    fn ctx_fixture() -> (Params, GridMap) {
        (Params::new(Chain::Regtest), GridMap::default())
    }

    fn unity_attack(range: u32) -> Attack {
        Attack {
            range: Some(range),
            damage: Some(Damage { min: 1, max: 1 }),
            ..Default::default()
        }
    }

    fn rng() -> Rng {
        Rng::seed_from_block_hash("0123")
    }

    #[test]
    fn closest_target_is_always_picked() {
        let tables = Tables::new();
        {
            let mut c = tables.characters.create(1, "domob", Faction::Red);
            c.set_pos(Hex::new(0, 0));
            c.proto_mut().combat.attacks.push(unity_attack(10));
        }
        tables
            .characters
            .create(2, "andy", Faction::Green)
            .set_pos(Hex::new(2, 2));
        tables
            .characters
            .create(3, "andy", Faction::Green)
            .set_pos(Hex::new(1, 1));

        let mut rng = rng();
        for _ in 0..50 {
            find_targets(&tables, &mut rng);
            assert_eq!(
                tables.characters.get(1).unwrap().target(),
                Some(TargetId::character(3))
            );
        }
    }

    #[test]
    fn same_faction_is_no_target_without_mentecon() {
        let tables = Tables::new();
        {
            let mut c = tables.characters.create(1, "domob", Faction::Red);
            c.set_pos(Hex::new(0, 0));
            c.proto_mut().combat.attacks.push(unity_attack(10));
        }
        tables
            .characters
            .create(2, "domob", Faction::Red)
            .set_pos(Hex::new(1, 0));

        find_targets(&tables, &mut rng());
        assert_eq!(tables.characters.get(1).unwrap().target(), None);

        // With mentecon active the friendly becomes the target.
        tables.characters.get(1).unwrap().set_effects(CombatEffects {
            mentecon: true,
            ..Default::default()
        });
        find_targets(&tables, &mut rng());
        assert_eq!(
            tables.characters.get(1).unwrap().target(),
            Some(TargetId::character(2))
        );
    }

    #[test]
    fn randomisation_covers_all_closest() {
        let tables = Tables::new();
        {
            let mut c = tables.characters.create(1, "domob", Faction::Red);
            c.set_pos(Hex::new(0, 0));
            c.proto_mut().combat.attacks.push(unity_attack(10));
        }
        for (i, pos) in [Hex::new(1, 1), Hex::new(-1, 2), Hex::new(2, 0)]
            .into_iter()
            .enumerate()
        {
            tables
                .characters
                .create(2 + i as Id, "andy", Faction::Green)
                .set_pos(pos);
        }

        let mut rng = rng();
        let mut seen = BTreeSet::new();
        for _ in 0..200 {
            find_targets(&tables, &mut rng);
            seen.insert(tables.characters.get(1).unwrap().target().unwrap());
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn shield_takes_damage_first() {
        let (params, map) = ctx_fixture();
        let ctx = Context::new(&params, &map, 10, 0);
        let tables = Tables::new();
        {
            let mut c = tables.characters.create(1, "domob", Faction::Red);
            c.set_pos(Hex::new(0, 0));
            c.proto_mut().combat.attacks.push(Attack {
                range: Some(1),
                damage: Some(Damage { min: 2, max: 2 }),
                ..Default::default()
            });
            c.set_target(Some(TargetId::character(2)));
        }
        {
            let mut c = tables.characters.create(2, "andy", Faction::Green);
            c.set_pos(Hex::new(1, 0));
            c.hp_mut().shield = 1;
            c.hp_mut().shield_mhp = 999;
            c.hp_mut().armour = 10;
        }

        let dead = deal_damage(&tables, &mut rng(), &ctx);
        assert!(dead.is_empty());

        let c = tables.characters.get(2).unwrap();
        assert_eq!(c.hp().shield, 0);
        assert_eq!(c.hp().armour, 9);
        assert_eq!(c.hp().shield_mhp, 999);
    }

    #[test]
    fn mutual_kills_in_one_phase() {
        let (params, map) = ctx_fixture();
        let ctx = Context::new(&params, &map, 10, 0);
        let tables = Tables::new();
        for (id, name, faction, pos) in [
            (1, "domob", Faction::Red, Hex::new(0, 0)),
            (2, "andy", Faction::Green, Hex::new(1, 0)),
        ] {
            tables.accounts.create(name).set_faction(faction);
            let mut c = tables.characters.create(id, name, faction);
            c.set_pos(pos);
            c.proto_mut().combat.attacks.push(unity_attack(1));
            c.hp_mut().shield = 1;
            c.set_target(Some(TargetId::character(3 - id)));
        }

        // Character 1 fires first and kills 2; then 2, not yet removed,
        // fires back.  The dead list is in order of death.
        let dead = deal_damage(&tables, &mut rng(), &ctx);
        assert_eq!(
            dead,
            vec![TargetId::character(2), TargetId::character(1)]
        );

        process_kills(&tables, dead, &ctx);
        assert!(tables.characters.get(1).is_none());
        assert!(tables.characters.get(2).is_none());
        assert_eq!(tables.accounts.read("domob", |a| a.kills), Some(1));
        assert_eq!(tables.accounts.read("andy", |a| a.kills), Some(1));
    }

    #[test]
    fn kill_drops_loot_and_cancels_prospection() {
        let (params, map) = ctx_fixture();
        let ctx = Context::new(&params, &map, 10, 0);
        let tables = Tables::new();
        tables.accounts.create("andy").set_faction(Faction::Green);

        let pos = Hex::new(3, 3);
        {
            let mut c = tables.characters.create(1, "andy", Faction::Green);
            c.set_pos(pos);
            c.inventory_mut().add("foo", 5);
            c.set_busy(true);
        }
        let region = map.region_id(pos);
        tables.regions.get(region, 5).set_prospecting_character(1);

        process_kills(&tables, vec![TargetId::character(1)], &ctx);

        assert!(tables.characters.get(1).is_none());
        assert_eq!(tables.ground_loot.get(pos).count("foo"), 5);
        assert_eq!(tables.regions.prospector_of(region), EMPTY_ID);
    }

    #[test]
    fn building_kill_cascades() {
        let (params, map) = ctx_fixture();
        let ctx = Context::new(&params, &map, 10, 0);
        let tables = Tables::new();
        tables.accounts.create("domob").set_faction(Faction::Red);

        let centre = Hex::new(4, 4);
        {
            let mut b = tables.buildings.create(1, "hut", "domob", Faction::Red);
            b.set_centre(centre);
        }
        tables.building_inv.get(1, "domob").payload_mut().add("foo", 7);
        tables.characters.create(2, "domob", Faction::Red).enter_building(1);
        tables.gift_coins("domob", 1_000);
        tables
            .orders
            .create(10, 1, "domob", crate::schema::dex::OrderType::Bid, "foo", 2, 50);
        tables
            .accounts
            .get("domob")
            .unwrap()
            .add_balance(-100);

        process_kills(&tables, vec![TargetId::building(1)], &ctx);

        assert!(tables.buildings.get(1).is_none());
        assert!(tables.characters.get(2).is_none());
        assert_eq!(tables.ground_loot.get(centre).count("foo"), 7);
        assert!(tables.orders.get(10).is_none());
        // The escrowed bid coins came back.
        assert_eq!(tables.accounts.read("domob", |a| a.balance), Some(1_000));
    }

    #[test]
    fn regeneration_cases() {
        let tables = Tables::new();
        let cases = [
            // (regen, mhp before, shield before, mhp after, shield after)
            (0u32, 100u32, 50u32, 100u32, 50u32),
            (500, 0, 50, 500, 50),
            (500, 500, 50, 0, 51),
            (750, 750, 50, 500, 51),
            (2_000, 0, 50, 0, 52),
            (500, 900, 99, 0, 100),
            (100, 0, 100, 0, 100),
            (2_000, 999, 99, 0, 100),
        ];

        tables.characters.create(1, "domob", Faction::Red);
        for (regen, mhp_before, shield_before, mhp_after, shield_after) in cases {
            {
                let mut c = tables.characters.get(1).unwrap();
                c.regen_mut().max_shield = 100;
                c.regen_mut().shield_regen_mhp = regen;
                c.hp_mut().shield = shield_before;
                c.hp_mut().shield_mhp = mhp_before;
            }

            regenerate_hp(&tables);

            let c = tables.characters.get(1).unwrap();
            assert_eq!(c.hp().shield, shield_after, "regen {regen}");
            assert_eq!(c.hp().shield_mhp, mhp_after, "regen {regen}");
        }
    }

    #[test]
    fn effects_expire_unless_refreshed() {
        let (params, map) = ctx_fixture();
        let ctx = Context::new(&params, &map, 10, 0);
        let tables = Tables::new();
        {
            let mut c = tables.characters.create(1, "domob", Faction::Red);
            c.set_pos(Hex::new(0, 0));
            c.proto_mut().combat.attacks.push(Attack {
                range: Some(10),
                effects: Some(crate::schema::AttackEffects {
                    speed_percent: -50,
                    ..Default::default()
                }),
                ..Default::default()
            });
            c.set_target(Some(TargetId::character(2)));
        }
        tables
            .characters
            .create(2, "andy", Faction::Green)
            .set_pos(Hex::new(5, 0));

        let mut r = rng();
        deal_damage(&tables, &mut r, &ctx);
        assert_eq!(
            tables.characters.get(2).unwrap().effects().speed_percent,
            -50
        );

        // No attacker fires the next phase; the effect expires.
        tables.characters.get(1).unwrap().set_target(None);
        deal_damage(&tables, &mut r, &ctx);
        assert!(tables.characters.get(2).unwrap().effects().is_empty());
    }
}
