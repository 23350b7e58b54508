//! Completion of ongoing operations scheduled for the current height.

use skarn_store::{Id, EMPTY_ID};
use tracing::{debug, info};

use crate::context::Context;
use crate::prospecting;
use crate::rng::Rng;
use crate::schema::ongoing::OngoingOp;
use crate::schema::Tables;

/// Processes all operations whose scheduled height is the current block, in
/// ascending id order.  Per-unit operations (blueprint copies, construction
/// from an original) deliver one unit and re-schedule themselves until done.
pub fn process_all_ongoings(tables: &Tables, rng: &mut Rng, ctx: &Context) {
    for id in tables.ongoings.ids_for_height(ctx.height()) {
        let op = tables.ongoings.get(id).expect("listed op exists");
        let op_kind = op.op().clone();
        drop(op);

        debug!(id, ?op_kind, "processing due operation");
        match op_kind {
            OngoingOp::Prospection => finish_prospection(tables, rng, ctx, id),
            OngoingOp::ArmourRepair => finish_armour_repair(tables, id),
            OngoingOp::BlueprintCopy { .. } => step_blueprint_copy(tables, ctx, id),
            OngoingOp::ItemConstruction { .. } => step_item_construction(tables, ctx, id),
            OngoingOp::BuildingConstruction => finish_building_construction(tables, ctx, id),
            OngoingOp::BuildingUpdate { new_config } => {
                let op = tables.ongoings.get(id).expect("op still exists");
                let building = op.building_id();
                let mut b = tables
                    .buildings
                    .get(building)
                    .expect("building update refers to live building");
                info!(building, "applying delayed config update");
                b.proto_mut().config.merge_from(&new_config);
                drop(b);
                op.delete();
            }
        }
    }
}

fn release_character(tables: &Tables, character: Id) {
    let mut c = tables
        .characters
        .get(character)
        .expect("operation refers to live character");
    c.set_busy(false);
    c.proto_mut().ongoing = EMPTY_ID;
}

fn finish_prospection(tables: &Tables, rng: &mut Rng, ctx: &Context, id: Id) {
    let op = tables.ongoings.get(id).expect("op still exists");
    let character = op.character_id();
    op.delete();

    let mut c = tables
        .characters
        .get(character)
        .expect("prospection refers to live character");
    let region_id = ctx.map().region_id(c.pos());
    let mut r = tables.regions.get(region_id, ctx.height());
    prospecting::finish_prospecting(&mut c, &mut r, tables, rng, ctx);
}

fn finish_armour_repair(tables: &Tables, id: Id) {
    let op = tables.ongoings.get(id).expect("op still exists");
    let character = op.character_id();
    op.delete();

    let mut c = tables
        .characters
        .get(character)
        .expect("repair refers to live character");
    let max = c.regen().max_armour;
    c.hp_mut().armour = max;
    info!(character, "armour repair finished");
    drop(c);

    release_character(tables, character);
}

fn step_blueprint_copy(tables: &Tables, ctx: &Context, id: Id) {
    let mut op = tables.ongoings.get(id).expect("op still exists");
    let building = op.building_id();
    let OngoingOp::BlueprintCopy {
        account,
        original_type,
        copy_type,
        num_copies,
    } = op.op().clone()
    else {
        unreachable!("dispatched on the op tag");
    };

    let mut inv = tables.building_inv.get(building, &account);
    inv.payload_mut().add(&copy_type, 1);
    drop(inv);

    if num_copies > 1 {
        let delta = ctx.params().bp_copy_blocks(&original_type) as u64;
        let height = op.height();
        op.set_height(height + delta);
        match op.op_mut() {
            OngoingOp::BlueprintCopy { num_copies, .. } => *num_copies -= 1,
            _ => unreachable!(),
        }
        return;
    }

    // Last copy done: the original goes back to the owner.
    info!(building, %account, %copy_type, "blueprint copying finished");
    tables
        .building_inv
        .get(building, &account)
        .payload_mut()
        .add(&original_type, 1);
    op.delete();
}

fn step_item_construction(tables: &Tables, ctx: &Context, id: Id) {
    let mut op = tables.ongoings.get(id).expect("op still exists");
    let building = op.building_id();
    let OngoingOp::ItemConstruction {
        account,
        output_type,
        num_items,
        original_type,
    } = op.op().clone()
    else {
        unreachable!("dispatched on the op tag");
    };

    match original_type {
        None => {
            // Construction from copies delivers everything at once.
            let mut inv = tables.building_inv.get(building, &account);
            inv.payload_mut().add(&output_type, num_items);
            info!(building, %account, %output_type, num_items, "construction finished");
            drop(inv);
            op.delete();
        }
        Some(original) => {
            let mut inv = tables.building_inv.get(building, &account);
            inv.payload_mut().add(&output_type, 1);
            drop(inv);

            if num_items > 1 {
                let delta = ctx.params().construction_blocks(&output_type) as u64;
                let height = op.height();
                op.set_height(height + delta);
                match op.op_mut() {
                    OngoingOp::ItemConstruction { num_items, .. } => *num_items -= 1,
                    _ => unreachable!(),
                }
                return;
            }

            info!(building, %account, %output_type, "construction finished");
            tables
                .building_inv
                .get(building, &account)
                .payload_mut()
                .add(&original, 1);
            op.delete();
        }
    }
}

fn finish_building_construction(tables: &Tables, ctx: &Context, id: Id) {
    let op = tables.ongoings.get(id).expect("op still exists");
    let building = op.building_id();
    op.delete();

    let mut b = tables
        .buildings
        .get(building)
        .expect("construction refers to live building");
    info!(building, kind = b.kind(), "building construction finished");

    let proto = b.proto_mut();
    assert!(proto.foundation, "constructed building is not a foundation");
    proto.foundation = false;
    proto.age_data.finished_height = Some(ctx.height());
    proto.construction_inventory = crate::schema::inventory::Inventory::new();
    proto.ongoing_construction = EMPTY_ID;
}
