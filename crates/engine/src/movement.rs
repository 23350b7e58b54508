//! Movement stepping and building entry/exit.

use skarn_store::EMPTY_ID;
use tracing::{debug, trace, warn};

use crate::context::Context;
use crate::dyn_obstacles::DynObstacles;
use crate::geometry::{Hex, L1Ring, PathFinder, NO_CONNECTION};
use crate::schema::character::Character;
use crate::schema::Tables;

/// Milli-tiles of movement credit one step over flat ground costs.
const STEP_COST: u32 = 1_000;

/// Characters within this L1 distance of a building's centre may enter it.
pub const ENTER_BUILDING_RANGE: u32 = 5;

/// Extra pathfinding range beyond the straight-line distance, so moderate
/// detours around obstacles are found without unbounded searches.
const PATH_RANGE_SLACK: u32 = 10;

/// Advances all moving characters by their speed credit for this block.
pub fn process_all_movement(tables: &Tables, dyn_obstacles: &mut DynObstacles, ctx: &Context) {
    for id in tables.characters.ids_moving() {
        let mut c = tables.characters.get(id).expect("listed id exists");
        if c.is_busy() {
            // Busy operations clear movement when they start; a busy mover
            // would mean that invariant broke.
            panic!("busy character {id} has movement");
        }
        step_character(&mut c, dyn_obstacles, ctx);
    }
}

fn step_character(c: &mut Character, dyn_obstacles: &mut DynObstacles, ctx: &Context) {
    let base_speed = c.proto().speed;
    let speed = c
        .effects()
        .modified_speed(base_speed)
        .max(ctx.params().min_speed);
    c.volatile_mv_mut().partial_step += speed;
    trace!(
        id = c.id(),
        speed,
        credit = c.volatile_mv().partial_step,
        "processing movement"
    );

    let mut finder: Option<PathFinder> = None;

    loop {
        let Some(movement) = c.proto().movement.as_ref() else {
            break;
        };
        let Some(&waypoint) = movement.waypoints.first() else {
            c.stop_moving();
            break;
        };

        let pos = c.pos();
        if pos == waypoint {
            pop_waypoint(c);
            finder = None;
            continue;
        }

        // (Re)compute the distance field towards the current waypoint.
        let recompute = finder
            .as_ref()
            .map(|f| f.target() != waypoint || f.distance(pos) == NO_CONNECTION)
            .unwrap_or(true);
        if recompute {
            let mut f = PathFinder::new(waypoint);
            let range = Hex::distance_l1(pos, waypoint) + PATH_RANGE_SLACK;
            let map = ctx.map();
            // Both endpoints must be clear: this also rules out paths from
            // or to blocked tiles, including the waypoint itself.
            let clear = |t: Hex| map.is_passable(t) && !dyn_obstacles.building_at(t);
            let dist = f.compute(|from, to| clear(from) && clear(to), pos, range);
            if dist == NO_CONNECTION {
                debug!(id = c.id(), %waypoint, "waypoint unreachable, stopping");
                c.stop_moving();
                break;
            }
            finder = Some(f);
        }
        let pf = finder.as_ref().expect("distance field just computed");

        let mut stepper = pf.step_path(pos);
        let cost = stepper.next() * STEP_COST;
        let dest = stepper.position();

        if c.volatile_mv().partial_step < cost {
            break;
        }

        if !dyn_obstacles.is_free(dest) {
            let blocked = {
                let v = c.volatile_mv_mut();
                v.blocked_turns += 1;
                v.blocked_turns
            };
            trace!(id = c.id(), %dest, blocked, "step blocked");
            if blocked > ctx.params().blocked_step_patience {
                debug!(id = c.id(), %waypoint, "patience exhausted, dropping waypoint");
                pop_waypoint(c);
                c.volatile_mv_mut().blocked_turns = 0;
            }
            break;
        }

        c.volatile_mv_mut().partial_step -= cost;
        c.volatile_mv_mut().blocked_turns = 0;
        dyn_obstacles.move_vehicle(pos, dest, c.faction());
        c.set_pos(dest);

        if dest == waypoint {
            pop_waypoint(c);
        }
    }
}

fn pop_waypoint(c: &mut Character) {
    let movement = c
        .proto_mut()
        .movement
        .as_mut()
        .expect("waypoint pop without movement");
    movement.waypoints.remove(0);
    if movement.waypoints.is_empty() {
        c.stop_moving();
    }
}

/// Resolves pending enter-building intents after all steps of the block.
pub fn process_enter_buildings(tables: &Tables, dyn_obstacles: &mut DynObstacles) {
    for id in tables.characters.ids_entering() {
        let mut c = tables.characters.get(id).expect("listed id exists");
        let building = c.enter_building_intent();

        let Some(centre) = tables.buildings.read(building, |b| b.centre) else {
            warn!(id, building, "enter intent for non-existing building");
            c.set_enter_building_intent(EMPTY_ID);
            continue;
        };

        let pos = c.pos();
        if Hex::distance_l1(pos, centre) > ENTER_BUILDING_RANGE {
            continue;
        }

        debug!(id, building, "character enters building");
        dyn_obstacles.remove_vehicle(pos, c.faction());
        c.enter_building(building);
        c.set_enter_building_intent(EMPTY_ID);
        c.set_target(None);
        c.stop_moving();
    }
}

/// Picks the spot where a character leaving the given building appears: the
/// first free passable tile on expanding rings around the centre.
pub fn find_exit_spot(
    centre: Hex,
    dyn_obstacles: &DynObstacles,
    ctx: &Context,
) -> Option<Hex> {
    for radius in 1..=ENTER_BUILDING_RANGE + 2 {
        for pos in L1Ring::new(centre, radius) {
            if ctx.map().is_passable(pos) && dyn_obstacles.is_free(pos) {
                return Some(pos);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faction::Faction;
    use crate::map::GridMap;
    use crate::params::{Chain, Params};
    use crate::schema::character::Movement;
    use skarn_store::Id;

    struct Fixture {
        params: Params,
        map: GridMap,
        tables: Tables,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                params: Params::new(Chain::Regtest),
                map: GridMap::default(),
                tables: Tables::new(),
            }
        }

        fn ctx(&self) -> Context<'_> {
            Context::new(&self.params, &self.map, 42, 0)
        }

        fn character(&self, id: Id, pos: Hex, speed: u32, waypoints: Vec<Hex>) {
            let mut c = self.tables.characters.create(id, "domob", Faction::Red);
            c.set_pos(pos);
            c.proto_mut().speed = speed;
            if !waypoints.is_empty() {
                c.proto_mut().movement = Some(Movement { waypoints });
            }
        }

        fn step(&self) {
            let mut dyn_obstacles = DynObstacles::build(&self.tables, &self.params);
            process_all_movement(&self.tables, &mut dyn_obstacles, &self.ctx());
        }

        fn pos(&self, id: Id) -> Hex {
            self.tables.characters.get(id).unwrap().pos()
        }
    }

    #[test]
    fn partial_steps_accumulate() {
        let fx = Fixture::new();
        fx.character(1, Hex::new(0, 0), 750, vec![Hex::new(5, 0)]);

        fx.step();
        assert_eq!(fx.pos(1), Hex::new(0, 0));
        fx.step();
        assert_eq!(fx.pos(1), Hex::new(1, 0));
        fx.step();
        assert_eq!(fx.pos(1), Hex::new(2, 0));
    }

    #[test]
    fn fast_characters_take_multiple_steps() {
        let fx = Fixture::new();
        fx.character(1, Hex::new(0, 0), 2_000, vec![Hex::new(5, 0)]);

        fx.step();
        assert_eq!(fx.pos(1), Hex::new(2, 0));
    }

    #[test]
    fn reaching_the_last_waypoint_clears_movement() {
        let fx = Fixture::new();
        fx.character(1, Hex::new(0, 0), 1_000, vec![Hex::new(1, 0)]);

        fx.step();
        assert_eq!(fx.pos(1), Hex::new(1, 0));
        let c = fx.tables.characters.get(1).unwrap();
        assert!(c.proto().movement.is_none());
        assert_eq!(c.volatile_mv().partial_step, 0);
    }

    #[test]
    fn vehicle_on_path_blocks_the_step() {
        let fx = Fixture::new();
        fx.character(1, Hex::new(0, 0), 1_000, vec![Hex::new(2, 0)]);
        fx.character(2, Hex::new(1, 0), 0, vec![]);

        fx.step();
        // The straight-line step is blocked by the vehicle; the character
        // waits instead of entering the occupied tile.
        assert_eq!(fx.pos(1), Hex::new(0, 0));
        let c = fx.tables.characters.get(1).unwrap();
        assert_eq!(c.volatile_mv().blocked_turns, 1);
        assert!(c.proto().movement.is_some());
    }

    #[test]
    fn vehicles_block_and_patience_drops_waypoint() {
        let mut fx = Fixture::new();
        // Wall off everything except the tile occupied by the blocker, so
        // no detour exists.
        for y in -2..=2 {
            for x in -2..=4 {
                let pos = Hex::new(x, y);
                if pos != Hex::new(0, 0) && pos != Hex::new(1, 0) && pos != Hex::new(2, 0) {
                    fx.map.add_obstacle(pos);
                }
            }
        }
        fx.character(1, Hex::new(0, 0), 1_000, vec![Hex::new(2, 0)]);
        fx.character(2, Hex::new(1, 0), 0, vec![]);

        for _ in 0..fx.params.blocked_step_patience {
            fx.step();
            assert_eq!(fx.pos(1), Hex::new(0, 0));
            let c = fx.tables.characters.get(1).unwrap();
            assert!(c.proto().movement.is_some());
        }

        // One more blocked turn exhausts the patience.
        fx.step();
        let c = fx.tables.characters.get(1).unwrap();
        assert!(c.proto().movement.is_none());
    }

    #[test]
    fn unreachable_waypoint_stops_movement() {
        let mut fx = Fixture::new();
        fx.map.add_obstacle(Hex::new(5, 0));
        fx.character(1, Hex::new(0, 0), 1_000, vec![Hex::new(5, 0)]);

        fx.step();
        assert!(fx.tables.characters.get(1).unwrap().proto().movement.is_none());
        assert_eq!(fx.pos(1), Hex::new(0, 0));
    }

    #[test]
    fn speed_effects_slow_movement() {
        let fx = Fixture::new();
        fx.character(1, Hex::new(0, 0), 2_000, vec![Hex::new(10, 0)]);
        fx.tables
            .characters
            .get(1)
            .unwrap()
            .set_effects(crate::schema::CombatEffects {
                speed_percent: -50,
                ..Default::default()
            });

        fx.step();
        assert_eq!(fx.pos(1), Hex::new(1, 0));
    }

    #[test]
    fn entering_requires_range() {
        let fx = Fixture::new();
        {
            let mut b = fx.tables.buildings.create(1, "obelisk", "", Faction::Ancient);
            b.set_centre(Hex::new(0, 0));
        }
        fx.character(2, Hex::new(6, 0), 0, vec![]);
        fx.tables
            .characters
            .get(2)
            .unwrap()
            .set_enter_building_intent(1);

        let mut dyn_obstacles = DynObstacles::build(&fx.tables, &fx.params);
        process_enter_buildings(&fx.tables, &mut dyn_obstacles);
        assert!(!fx.tables.characters.get(2).unwrap().is_in_building());

        fx.tables.characters.get(2).unwrap().set_pos(Hex::new(5, 0));
        let mut dyn_obstacles = DynObstacles::build(&fx.tables, &fx.params);
        process_enter_buildings(&fx.tables, &mut dyn_obstacles);

        let c = fx.tables.characters.get(2).unwrap();
        assert!(c.is_in_building());
        assert_eq!(c.building_id(), 1);
        assert_eq!(c.enter_building_intent(), EMPTY_ID);
    }

    #[test]
    fn exit_spot_avoids_occupied_tiles() {
        let fx = Fixture::new();
        {
            let mut b = fx.tables.buildings.create(1, "obelisk", "", Faction::Ancient);
            b.set_centre(Hex::new(0, 0));
        }
        fx.character(2, Hex::new(-1, 1), 0, vec![]);

        let dyn_obstacles = DynObstacles::build(&fx.tables, &fx.params);
        let spot = find_exit_spot(Hex::new(0, 0), &dyn_obstacles, &fx.ctx()).unwrap();
        assert_eq!(Hex::distance_l1(spot, Hex::new(0, 0)), 1);
        assert_ne!(spot, Hex::new(-1, 1));
        assert_ne!(spot, Hex::new(0, 0));
    }
}
