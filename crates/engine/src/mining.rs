//! Per-block mining ticks.

use tracing::{debug, trace};

use crate::context::Context;
use crate::rng::Rng;
use crate::schema::Tables;

/// Processes one mining tick for every active miner, in ascending id order.
///
/// The mined amount is a roll in the miner's rate range, limited by the
/// region's remaining deposit and by the cargo space left.  A tick that
/// cannot store a single unit deactivates mining; dropping cargo first (in
/// the same block's move phase) keeps it going.
pub fn process_all_mining(tables: &Tables, rng: &mut Rng, ctx: &Context) {
    for id in tables.characters.ids_mining() {
        let mut c = tables.characters.get(id).expect("listed id exists");
        if c.is_busy() || c.is_in_building() {
            // Busy operations and building entry deactivate mining when
            // they start; an active miner in that state is a bug.
            panic!("active miner {id} is busy or inside a building");
        }

        let mining = c.proto().mining.expect("indexed miner has mining data");
        let region_id = ctx.map().region_id(c.pos());
        let mut region = tables.regions.get(region_id, ctx.height());

        let (resource, left) = match region.prospection() {
            Some(p) => (p.resource.clone(), region.resource_left()),
            None => {
                // The region got re-prospected away underneath the miner.
                debug!(id, region = region_id, "mined region no longer prospected");
                c.proto_mut().mining.as_mut().expect("checked above").active = false;
                continue;
            }
        };

        let roll = rng.next_range(mining.rate_min as u32, mining.rate_max as u32) as i64;

        let space = c.free_cargo(ctx.params());
        let per_unit = ctx.params().item_checked(&resource).space.max(1) as u64;
        let storable = (space / per_unit) as i64;

        let mined = roll.min(left).min(storable);
        trace!(id, %resource, roll, left, storable, mined, "mining tick");

        if mined > 0 {
            c.inventory_mut().add(&resource, mined);
            region.set_resource_left(left - mined);
        } else {
            debug!(id, "mining stopped, nothing could be mined");
            c.proto_mut().mining.as_mut().expect("checked above").active = false;
        }
    }
}
