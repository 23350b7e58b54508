//! Region prospecting: eligibility, starting and finishing.

use skarn_store::EMPTY_ID;
use tracing::{debug, info};

use crate::context::Context;

use crate::rng::Rng;
use crate::schema::character::Character;
use crate::schema::ongoing::OngoingOp;
use crate::schema::region::{Prospection, Region};
use crate::schema::Tables;

/// Whether the given character may start prospecting the given region.
///
/// The region must not be prospected by someone else right now, and any
/// existing prospection must be expired *and* mined out before the region
/// can be surveyed again.
pub fn can_prospect_region(c: &Character, r: &Region, ctx: &Context) -> bool {
    if r.prospecting_character() != EMPTY_ID {
        debug!(
            region = r.id(),
            character = c.id(),
            "region is already being prospected"
        );
        return false;
    }

    if let Some(p) = r.prospection() {
        if p.height + ctx.params().prospection_expiry > ctx.height() {
            debug!(region = r.id(), "prospection is not yet expired");
            return false;
        }
        if !p.resource.is_empty() && r.resource_left() > 0 {
            debug!(region = r.id(), "region still has resources to mine");
            return false;
        }
    }

    true
}

/// Starts prospecting: clears movement and mining, marks the character busy
/// on a new ongoing operation and attributes the region to it.
pub fn start_prospecting(c: &mut Character, r: &mut Region, tables: &Tables, ctx: &Context) {
    let blocks = c
        .proto()
        .prospecting_blocks
        .expect("caller verified prospecting ability");

    info!(character = c.id(), region = r.id(), "starting prospection");

    c.stop_moving();
    if let Some(mining) = c.proto().mining {
        if mining.active {
            c.proto_mut().mining.as_mut().expect("checked above").active = false;
        }
    }

    let mut op = tables
        .ongoings
        .create(tables.ids.next_id(), ctx.height(), OngoingOp::Prospection);
    op.set_height(ctx.height() + blocks as u64);
    op.set_character_id(c.id());

    c.set_busy(true);
    c.proto_mut().ongoing = op.id();
    r.set_prospecting_character(c.id());
}

/// Finishes a prospection: rolls the region's resource and prize drops,
/// writes the result and releases the character.
///
/// The ongoing-operation row itself is removed by the caller.
pub fn finish_prospecting(c: &mut Character, r: &mut Region, tables: &Tables, rng: &mut Rng, ctx: &Context) {
    assert_eq!(
        r.prospecting_character(),
        c.id(),
        "prospection attribution mismatch for region"
    );

    let (resource, amount) = roll_resource(rng, ctx);
    info!(
        character = c.id(),
        region = r.id(),
        %resource,
        amount,
        "prospection finished"
    );

    r.set_prospecting_character(EMPTY_ID);
    r.set_prospection(Some(Prospection {
        name: c.owner().to_string(),
        height: ctx.height(),
        resource: resource.clone(),
    }));
    r.set_resource_left(amount);

    roll_prizes(c, tables, rng, ctx);

    c.set_busy(false);
    c.proto_mut().ongoing = EMPTY_ID;
}

/// Rolls which resource a region holds and how much of it.
fn roll_resource(rng: &mut Rng, ctx: &Context) -> (String, i64) {
    let resources = ctx.params().resources();
    let total_weight: u32 = resources.iter().map(|r| r.weight).sum();
    assert!(total_weight > 0, "no resources configured");

    let mut roll = rng.next_int(total_weight);
    for res in resources {
        if roll < res.weight {
            let amount = rng.next_range(res.yield_min as u32, res.yield_max as u32) as i64;
            return (res.name.clone(), amount);
        }
        roll -= res.weight;
    }
    unreachable!("weighted roll out of range");
}

/// Rolls the prospecting prizes, in the configured order, and awards any
/// wins straight into the character inventory.
fn roll_prizes(c: &mut Character, tables: &Tables, rng: &mut Rng, ctx: &Context) {
    for prize in ctx.params().prizes() {
        let item = format!("{} prize", prize.name);
        if tables.item_counts.found(&item) >= prize.number {
            continue;
        }
        if !rng.chance(prize.probability) {
            continue;
        }

        info!(character = c.id(), prize = %prize.name, "prospection prize won");
        tables.item_counts.increment(&item);
        c.inventory_mut().add(&item, 1);
    }
}
