//! Placement and initialisation of newly created characters.

use tracing::debug;

use crate::context::Context;
use crate::dyn_obstacles::DynObstacles;
use crate::faction::Faction;
use crate::geometry::{Hex, L1Ring};
use crate::rng::Rng;
use crate::schema::character::Character;
use crate::schema::Tables;

/// Picks a random location within the given L1 distance of the centre.
///
/// A uniform point from the bounding coordinate square is drawn and
/// re-drawn until it lands inside the hex disk; the acceptance chance per
/// try is roughly pi/4, and rejection draws are part of the seeded stream,
/// so all nodes retry identically.
fn random_disk_location(centre: Hex, radius: u32, rng: &mut Rng) -> Hex {
    loop {
        let span = 2 * radius + 1;
        let x_offs = rng.next_int(span) as i32 - radius as i32;
        let y_offs = rng.next_int(span) as i32 - radius as i32;

        let res = centre + Hex::new(x_offs, y_offs);
        if Hex::distance_l1(res, centre) <= radius {
            return res;
        }
    }
}

/// Chooses the actual spawn tile for a new character of the given faction:
/// a random point in the faction's spawn disk, then expanding L1 rings
/// until a passable, unoccupied tile is found.
fn choose_spawn_location(
    faction: Faction,
    rng: &mut Rng,
    dyn_obstacles: &DynObstacles,
    ctx: &Context,
) -> Hex {
    let (spawn_centre, radius) = ctx.params().spawn_area(faction);
    let ring_centre = random_disk_location(spawn_centre, radius, rng);

    for ring_radius in 0.. {
        let ring = L1Ring::new(ring_centre, ring_radius);

        let mut found_on_map = false;
        for pos in ring {
            if !ctx.map().is_on_map(pos) {
                continue;
            }
            found_on_map = true;

            if ctx.map().is_passable(pos) && dyn_obstacles.is_free(pos) {
                return pos;
            }
        }

        // Once a whole ring lies off the map, no further ring will help.
        assert!(found_on_map, "no spawn tile found for faction {faction}");
    }
    unreachable!();
}

/// Creates and places one new character.
pub fn spawn_character(
    owner: &str,
    faction: Faction,
    tables: &Tables,
    dyn_obstacles: &mut DynObstacles,
    rng: &mut Rng,
    ctx: &Context,
) -> Character {
    let pos = choose_spawn_location(faction, rng, dyn_obstacles, ctx);
    debug!(owner, %faction, %pos, "spawning new character");

    let mut c = tables
        .characters
        .create(tables.ids.next_id(), owner, faction);
    c.set_pos(pos);
    dyn_obstacles.add_vehicle(pos, faction);

    let params = ctx.params();
    c.regen_mut().max_armour = 100;
    c.regen_mut().max_shield = 30;
    c.regen_mut().shield_regen_mhp = 500;
    c.hp_mut().armour = 100;
    c.hp_mut().shield = 30;
    {
        let proto = c.proto_mut();
        proto.speed = params.spawn_character_speed;
        proto.cargo_space = params.spawn_character_cargo;
        proto.prospecting_blocks = Some(params.prospecting_blocks);
    }

    c
}
