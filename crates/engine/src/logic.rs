//! The per-block state-update pipeline and the offline state validator.
//!
//! [`update_state`] is the single entry point the chain driver calls with
//! the block data.  The phase order is fixed and consensus-relevant:
//!
//! 1. seed the RNG from the block hash
//! 2. deal combat damage (using last block's targets) and process kills,
//!    so loot of fresh kills can be collected by this block's moves and
//!    killed vehicles no longer block movement
//! 3. age the damage lists
//! 4. complete ongoing operations due at this height, so e.g. a finished
//!    prospection can be followed by `mine` in the same block
//! 5. build the dynamic obstacle map
//! 6. process moves (foundations placed here block movement right away)
//! 7. movement stepping
//! 8. building-entry resolution
//! 9. spawn newly created characters
//! 10. acquire combat targets for the next block
//! 11. shield regeneration (the dead were removed back in step 2)
//! 12. mining ticks
//! 13. finalize: drop empty inventories, assert invariants

use serde_json::Value;
use skarn_store::EMPTY_ID;
use tracing::{debug, info};

use crate::combat;
use crate::context::Context;
use crate::dyn_obstacles::DynObstacles;
use crate::faction::Faction;
use crate::map::BaseMap;
use crate::mining;
use crate::movement;
use crate::moves::MoveProcessor;
use crate::ongoings;
use crate::params::Params;
use crate::rng::Rng;
use crate::schema::ongoing::OngoingOp;
use crate::schema::Tables;
use crate::spawn;

/// Applies one block to the game state.
///
/// The block data carries `{block: {height, timestamp, hash}, moves: [...],
/// admin: [...]}`.  Structural errors in it are bugs of the chain driver and
/// fatal.  The per-block store transaction is committed on success; if the
/// pipeline panics, the driver rolls the tables back instead.
pub fn update_state(tables: &Tables, params: &Params, map: &dyn BaseMap, block_data: &Value) {
    let block = block_data
        .get("block")
        .expect("block data has no block member");
    let height = block
        .get("height")
        .and_then(|h| h.as_u64())
        .expect("block height is not an integer");
    let timestamp = block
        .get("timestamp")
        .and_then(|t| t.as_i64())
        .unwrap_or(0);
    let hash = block
        .get("hash")
        .and_then(|h| h.as_str())
        .map(|h| h.to_string())
        .unwrap_or_else(|| height.to_string());

    if let Some(admin) = block_data.get("admin") {
        // Admin commands are an extension hook; only their shape is checked.
        assert!(admin.is_array(), "admin commands are not an array");
    }
    let moves = block_data
        .get("moves")
        .expect("block data has no moves member");

    let ctx = Context::new(params, map, height, timestamp);
    let mut rng = Rng::seed_from_block_hash(&hash);
    info!(height, "processing block");

    tables.begin_block();

    let dead = combat::deal_damage(tables, &mut rng, &ctx);
    combat::process_kills(tables, dead, &ctx);

    tables
        .damage_lists
        .remove_old(height, params.damage_list_age);

    ongoings::process_all_ongoings(tables, &mut rng, &ctx);

    let mut dyn_obstacles = DynObstacles::build(tables, params);

    let spawn_queue = {
        let mut proc = MoveProcessor::new(tables, &mut dyn_obstacles, &ctx);
        proc.process_all(moves);
        proc.into_spawn_queue()
    };

    movement::process_all_movement(tables, &mut dyn_obstacles, &ctx);
    movement::process_enter_buildings(tables, &mut dyn_obstacles);

    for (owner, faction) in spawn_queue {
        spawn::spawn_character(&owner, faction, tables, &mut dyn_obstacles, &mut rng, &ctx);
    }

    combat::find_targets(tables, &mut rng);
    combat::regenerate_hp(tables);
    mining::process_all_mining(tables, &mut rng, &ctx);

    tables.ground_loot.prune_empty();
    tables.building_inv.prune_empty();

    #[cfg(debug_assertions)]
    validate_state(tables, &ctx);

    tables.commit_block();
    debug!(height, "block committed");
}

/// One-shot consistency check over the full state.
///
/// Every violated invariant panics with a diagnostic naming it; swallowing
/// such a condition would let nodes diverge silently, so these are bugs by
/// definition.  The check never mutates anything.
pub fn validate_state(tables: &Tables, ctx: &Context) {
    validate_accounts(tables);
    validate_characters(tables, ctx);
    validate_buildings(tables, ctx);
    validate_ongoings(tables);
    validate_regions(tables, ctx);
    validate_inventories(tables);
    validate_dex_orders(tables);
    validate_damage_lists(tables, ctx);
    validate_money_supply(tables);
}

fn account_faction(tables: &Tables, name: &str) -> Option<Option<Faction>> {
    tables.accounts.read(name, |a| a.faction)
}

fn validate_accounts(tables: &Tables) {
    for name in tables.accounts.names() {
        let faction = account_faction(tables, &name).expect("listed account");
        if faction == Some(Faction::Ancient) {
            panic!("account {name} has invalid faction");
        }
    }
}

fn validate_characters(tables: &Tables, ctx: &Context) {
    let limit = ctx.params().character_limit as usize;

    for id in tables.characters.ids() {
        let row = tables
            .characters
            .read(id, |r| r.clone())
            .expect("listed id");

        match account_faction(tables, &row.owner) {
            Some(Some(f)) if f == row.faction => (),
            Some(Some(_)) => panic!("character {id}: Faction mismatch with owner {}", row.owner),
            _ => panic!("character {id} is owned by uninitialised account {}", row.owner),
        }

        let used = row.proto.inventory.used_space(ctx.params());
        if used > row.proto.cargo_space as u64 {
            panic!("character {id} exceeds cargo limit: {used}");
        }

        if row.is_in_building() {
            let building = tables
                .buildings
                .read(row.building_id, |b| b.faction)
                .unwrap_or_else(|| {
                    panic!("character {id} is in non-existant building {}", row.building_id)
                });
            if building != Faction::Ancient && building != row.faction {
                panic!("character {id} is in building of opposing faction");
            }
        }

        if row.proto.ongoing != EMPTY_ID {
            let back = tables
                .ongoings
                .read(row.proto.ongoing, |op| op.character_id)
                .unwrap_or_else(|| {
                    panic!("character {id} has non-existing ongoing {}", row.proto.ongoing)
                });
            if back != id {
                panic!("ongoing {} does not refer back to character {id}", row.proto.ongoing);
            }
            if !row.busy {
                panic!("character {id} has an ongoing operation but is not busy");
            }
        } else if row.busy {
            panic!("character {id} is busy without an ongoing operation");
        }
    }

    for name in tables.accounts.names() {
        let count = tables.characters.count_for_owner(&name);
        if count > limit {
            panic!("Account {name} has too many characters: {count}");
        }
    }
}

fn validate_buildings(tables: &Tables, ctx: &Context) {
    for id in tables.buildings.ids() {
        let row = tables.buildings.read(id, |b| b.clone()).expect("listed id");

        if row.faction != Faction::Ancient {
            match account_faction(tables, &row.owner) {
                Some(Some(f)) if f == row.faction => (),
                Some(Some(_)) => {
                    panic!("building {id}: Faction mismatch with owner {}", row.owner)
                }
                _ => panic!("building {id} is owned by uninitialised account {}", row.owner),
            }
        }

        let age = row.proto.age_data;
        if age.founded_height > ctx.height() {
            panic!("building {id} was founded in the future");
        }
        if row.proto.foundation {
            if age.finished_height.is_some() {
                panic!("foundation {id} has already finished height");
            }
        } else {
            let Some(finished) = age.finished_height else {
                panic!("building {id} has no finished height");
            };
            if finished < age.founded_height {
                panic!("building {id} was finished before being founded");
            }
            if finished > ctx.height() {
                panic!("building {id} was finished in the future");
            }
            if !row.proto.construction_inventory.is_empty() {
                panic!("finished building {id} has construction inventory");
            }
        }

        if row.proto.ongoing_construction != EMPTY_ID {
            let op = tables
                .ongoings
                .read(row.proto.ongoing_construction, |op| {
                    (op.building_id, matches!(op.op, OngoingOp::BuildingConstruction))
                })
                .unwrap_or_else(|| {
                    panic!(
                        "building {id} has non-existing ongoing {}",
                        row.proto.ongoing_construction
                    )
                });
            if op.0 != id {
                panic!(
                    "ongoing {} does not refer back to building {id}",
                    row.proto.ongoing_construction
                );
            }
            if !op.1 {
                panic!(
                    "building {id} refers to ongoing {} that is not a building construction",
                    row.proto.ongoing_construction
                );
            }
        }
    }
}

fn validate_ongoings(tables: &Tables) {
    for id in tables.ongoings.ids() {
        let row = tables.ongoings.read(id, |r| r.clone()).expect("listed id");

        let has_character = row.character_id != EMPTY_ID;
        let has_building = row.building_id != EMPTY_ID;
        if has_character == has_building {
            panic!("ongoing {id} must have exactly one carrier");
        }

        if has_character {
            let back = tables
                .characters
                .read(row.character_id, |c| c.proto.ongoing)
                .unwrap_or_else(|| {
                    panic!("ongoing {id} refers to non-existing character {}", row.character_id)
                });
            if back != id {
                panic!("character {} does not refer back to ongoing {id}", row.character_id);
            }
        }

        if has_building {
            let back = tables
                .buildings
                .read(row.building_id, |b| b.proto.ongoing_construction)
                .unwrap_or_else(|| {
                    panic!("ongoing {id} refers to non-existing building {}", row.building_id)
                });
            // Only building constructions are back-referenced; services
            // running inside the building are not.
            if matches!(row.op, OngoingOp::BuildingConstruction) && back != id {
                panic!("building {} does not refer back to ongoing {id}", row.building_id);
            }
        }
    }
}

fn validate_regions(tables: &Tables, ctx: &Context) {
    for id in tables.regions.ids() {
        let prospector = tables
            .regions
            .read(id, |r| r.prospecting_character)
            .expect("listed id");
        if prospector == EMPTY_ID {
            continue;
        }

        let Some((busy, in_building, pos, ongoing)) = tables
            .characters
            .read(prospector, |c| (c.busy, c.is_in_building(), c.pos, c.proto.ongoing))
        else {
            panic!("region {id} refers to non-existing character {prospector}");
        };
        if !busy || in_building {
            panic!("region {id}: prospecting character {prospector} is not busy on it");
        }
        let is_prospection = tables
            .ongoings
            .read(ongoing, |op| matches!(op.op, OngoingOp::Prospection))
            .unwrap_or(false);
        if !is_prospection {
            panic!("region {id}: prospecting character {prospector} is not prospecting");
        }
        if ctx.map().region_id(pos) != id {
            panic!("region {id}: prospecting region mismatch for character {prospector}");
        }
    }
}

fn validate_inventories(tables: &Tables) {
    for (building, account) in tables.building_inv.keys() {
        if !tables.accounts.contains(&account) {
            panic!("building inventory for non-existant account {account}");
        }
        let foundation = tables
            .buildings
            .read(building, |b| b.proto.foundation)
            .unwrap_or_else(|| panic!("building inventory in non-existant building {building}"));
        if foundation {
            panic!("building inventory in foundation {building}");
        }
    }
}

fn validate_dex_orders(tables: &Tables) {
    for id in tables.orders.ids() {
        let (building, account) = tables
            .orders
            .read(id, |r| (r.building, r.account.clone()))
            .expect("listed id");

        if !tables.accounts.contains(&account) {
            panic!("order {id} refers to non-existing account {account}");
        }
        let foundation = tables
            .buildings
            .read(building, |b| b.proto.foundation)
            .unwrap_or_else(|| panic!("order {id} refers to non-existing building {building}"));
        if foundation {
            panic!("order {id} is in foundation {building}");
        }
    }
}

fn validate_damage_lists(tables: &Tables, ctx: &Context) {
    // Aging runs every block, so a stale entry means the pipeline skipped
    // it somehow.
    let age = ctx.params().damage_list_age;
    let stale = tables.damage_lists.stale_count(ctx.height(), age);
    if stale > 0 {
        panic!("{stale} stale damage list entries were present");
    }
}

fn validate_money_supply(tables: &Tables) {
    let mut balances = 0;
    for name in tables.accounts.names() {
        balances += tables.accounts.read(&name, |a| a.balance).expect("listed");
    }
    let reserved: i64 = tables.orders.reserved_coins().values().sum();

    let circulating = tables.money.circulating();
    if balances + reserved != circulating {
        panic!(
            "money supply mismatch: {balances} in balances plus {reserved} reserved \
             against {circulating} circulating"
        );
    }
}
