//! Parsing, validation and application of the per-block move bundle.
//!
//! A block's moves are an ordered array of `{name, move, out?}` entries.
//! Malformed data coming from the chain daemon itself (missing members,
//! non-numeric amounts) is fatal; anything a *player* controls is validated
//! per sub-intent and silently dropped on failure, so one bad intent never
//! aborts its siblings.  Consensus depends on every node dropping exactly
//! the same intents.

use serde_json::Value;
use skarn_store::{Id, EMPTY_ID};
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::dex_ops::DexOp;
use crate::dyn_obstacles::DynObstacles;
use crate::faction::Faction;
use crate::geometry::Hex;
use crate::jsonutil;
use crate::movement::find_exit_spot;
use crate::params::{Amount, Quantity};
use crate::prospecting;
use crate::schema::building::{shape_tiles, BuildingConfig};
use crate::schema::character::{Character, Movement};
use crate::schema::ongoing::OngoingOp;
use crate::schema::Tables;
use crate::services::ServiceOp;

/// Processes all moves of one block.
pub struct MoveProcessor<'a, 'c> {
    tables: &'a Tables,
    dyn_obstacles: &'a mut DynObstacles,
    ctx: &'a Context<'c>,
    /// Characters to spawn once all moves are processed, in move order.
    spawn_queue: Vec<(String, Faction)>,
}

impl<'a, 'c> MoveProcessor<'a, 'c> {
    pub fn new(tables: &'a Tables, dyn_obstacles: &'a mut DynObstacles, ctx: &'a Context<'c>) -> Self {
        Self {
            tables,
            dyn_obstacles,
            ctx,
            spawn_queue: Vec::new(),
        }
    }

    /// The creations queued for the spawn phase.
    pub fn into_spawn_queue(self) -> Vec<(String, Faction)> {
        self.spawn_queue
    }

    /// Processes the full move array in order.
    pub fn process_all(&mut self, moves: &Value) {
        let arr = moves.as_array().expect("block moves are not an array");
        debug!(count = arr.len(), "processing moves");
        for entry in arr {
            self.process_one(entry);
        }
    }

    fn process_one(&mut self, entry: &Value) {
        let (name, mv, paid_to_dev, burnt) = self.extract_move_basics(entry);

        if !self.tables.accounts.contains(&name) {
            self.tables.accounts.create(&name);
        }

        self.try_coin_operations(&name, &mv, burnt);
        self.try_dex_operations(&name, &mv);

        let initialised = self
            .tables
            .accounts
            .read(&name, |a| a.faction.is_some())
            .expect("account just ensured");
        let creates = mv.get("nc").is_some();
        if !initialised && !creates {
            return;
        }

        self.try_character_updates(&name, &mv);
        self.try_character_creation(&name, &mv, paid_to_dev);
        self.try_building_updates(&name, &mv);
        self.try_service_operations(&name, &mv);
    }

    /// Extracts name, move data and chain payments.  The outer structure
    /// comes from the chain daemon, so a wrong shape is a bug, not user
    /// error.
    fn extract_move_basics(&self, entry: &Value) -> (String, Value, Amount, Amount) {
        let obj = entry.as_object().expect("move entry is not an object");
        assert!(obj.contains_key("move"), "move entry has no move member");

        let name_val = obj.get("name").expect("move entry has no name member");
        let name = name_val
            .as_str()
            .expect("move entry name is not a string")
            .to_string();

        let mut paid_to_dev = 0;
        if let Some(out) = obj.get("out") {
            let out = out.as_object().expect("move entry out is not an object");
            for (addr, amount_val) in out {
                let amount = jsonutil::parse_chain_amount(amount_val)
                    .expect("JSON value for amount is not numeric");
                if *addr == self.ctx.params().developer_address {
                    paid_to_dev += amount;
                }
            }
        }

        let burnt = obj
            .get("burnt")
            .map(|b| jsonutil::parse_chain_amount(b).expect("JSON value for amount is not numeric"))
            .unwrap_or(0);

        (name, obj["move"].clone(), paid_to_dev, burnt)
    }

    // -----------------------------------------------------------------
    // Coin operations

    /// Handles `vc`: coin transfers between accounts and burnsale minting.
    fn try_coin_operations(&mut self, name: &str, mv: &Value, burnt: Amount) {
        let Some(vc) = mv.get("vc").and_then(|v| v.as_object()) else {
            return;
        };

        if let Some(b) = vc.get("b") {
            if let Some(burn) = jsonutil::parse_coin_amount(b) {
                let burn = burn.min(burnt);
                if burn > 0 {
                    self.mint_from_burnsale(name, burn);
                }
            } else {
                warn!(name, "invalid burnsale amount");
            }
        }

        if let Some(t) = vc.get("t").and_then(|t| t.as_object()) {
            let mut transfers: Vec<(String, Amount)> = Vec::new();
            let mut total = 0;
            for (recipient, amount_val) in t {
                match jsonutil::parse_coin_amount(amount_val) {
                    Some(amount) if amount > 0 => {
                        total += amount;
                        transfers.push((recipient.clone(), amount));
                    }
                    _ => warn!(name, recipient = recipient.as_str(), "invalid coin transfer amount"),
                }
            }

            let balance = self
                .tables
                .accounts
                .read(name, |a| a.balance)
                .expect("sender ensured");
            if total > balance {
                warn!(name, total, balance, "coin transfers exceed balance");
                return;
            }

            for (recipient, amount) in transfers {
                if recipient == name {
                    continue;
                }
                info!(name, recipient = recipient.as_str(), amount, "transferring coins");
                self.tables
                    .accounts
                    .get(name)
                    .expect("sender ensured")
                    .add_balance(-amount);
                let mut r = self
                    .tables
                    .accounts
                    .get(&recipient)
                    .unwrap_or_else(|| self.tables.accounts.create(&recipient));
                r.add_balance(amount);
            }
        }
    }

    /// Converts burnt chain value into coins according to the burnsale
    /// stages.
    fn mint_from_burnsale(&mut self, name: &str, burnt_sat: Amount) {
        let mut sold_before = self.tables.money.get("burnsale");
        let mut remaining_sat = burnt_sat;
        let mut minted_total = 0;

        for stage in self.ctx.params().burnsale_stages() {
            if remaining_sat == 0 {
                break;
            }

            let available = stage.amount_sold - sold_before.min(stage.amount_sold);
            sold_before -= stage.amount_sold.min(sold_before);
            if available == 0 {
                continue;
            }

            // Coins per sat in this stage, floored to whole minor units.
            // The products exceed 64 bits for large burns, so widen.
            let affordable =
                (remaining_sat as i128 * crate::params::COIN as i128) / stage.price_sat as i128;
            let minted = affordable.min(available as i128) as Amount;
            if minted == 0 {
                break;
            }

            let spent =
                (minted as i128 * stage.price_sat as i128) / crate::params::COIN as i128;
            remaining_sat -= spent as Amount;
            minted_total += minted;
        }

        if minted_total == 0 {
            return;
        }

        info!(name, minted_total, "minting coins from burnsale");
        let mut a = self.tables.accounts.get(name).expect("account ensured");
        a.add_balance(minted_total);
        a.add_burnsale(minted_total);
        drop(a);
        self.tables.money.add("burnsale", minted_total);
    }

    // -----------------------------------------------------------------
    // Character creation

    fn try_character_creation(&mut self, name: &str, mv: &Value, paid_to_dev: Amount) {
        let Some(nc) = mv.get("nc") else {
            return;
        };
        let Some(creations) = nc.as_array() else {
            warn!(name, "nc is not an array");
            return;
        };

        let mut remaining = paid_to_dev;
        let cost = self.ctx.params().character_cost;
        let limit = self.ctx.params().character_limit as usize;

        for creation in creations {
            let Some(obj) = creation.as_object() else {
                warn!(name, "invalid character creation entry");
                continue;
            };

            let faction = {
                let account_faction = self
                    .tables
                    .accounts
                    .read(name, |a| a.faction)
                    .expect("account ensured");
                match (obj.get("faction"), account_faction) {
                    (Some(f), None) => {
                        let Some(f) = f.as_str().and_then(Faction::from_move_str) else {
                            warn!(name, "invalid faction in character creation");
                            continue;
                        };
                        f
                    }
                    (Some(f), Some(account_faction)) => {
                        let Some(f) = f.as_str().and_then(Faction::from_move_str) else {
                            warn!(name, "invalid faction in character creation");
                            continue;
                        };
                        if f != account_faction {
                            warn!(name, "creation faction differs from account");
                            continue;
                        }
                        f
                    }
                    (None, Some(account_faction)) => account_faction,
                    (None, None) => {
                        warn!(name, "first character creation needs a faction");
                        continue;
                    }
                }
            };
            if obj.len() > 1 || (obj.len() == 1 && !obj.contains_key("faction")) {
                warn!(name, "unknown fields in character creation");
                continue;
            }

            if remaining < cost {
                warn!(name, "developer payment does not cover another character");
                continue;
            }

            let existing = self.tables.characters.count_for_owner(name);
            let queued = self
                .spawn_queue
                .iter()
                .filter(|(owner, _)| owner == name)
                .count();
            if existing + queued >= limit {
                warn!(name, "character limit reached");
                continue;
            }

            remaining -= cost;
            let account_faction = self
                .tables
                .accounts
                .read(name, |a| a.faction)
                .expect("account ensured");
            if account_faction.is_none() {
                self.tables
                    .accounts
                    .get(name)
                    .expect("account ensured")
                    .set_faction(faction);
            }

            debug!(name, %faction, "queueing character creation");
            self.spawn_queue.push((name.to_string(), faction));
        }
    }

    // -----------------------------------------------------------------
    // Character updates

    fn try_character_updates(&mut self, name: &str, mv: &Value) {
        let Some(c) = mv.get("c") else {
            return;
        };
        let Some(upd) = c.as_object() else {
            warn!(name, "character update is not an object");
            return;
        };

        // Keys are canonical decimal id strings; processing is in ascending
        // numeric order regardless of the JSON text order.
        let mut ids: Vec<(Id, &Value)> = Vec::new();
        for (key, value) in upd {
            match jsonutil::parse_id_string(key) {
                Some(id) => ids.push((id, value)),
                None => warn!(name, key = key.as_str(), "invalid character id key"),
            }
        }
        ids.sort_by_key(|(id, _)| *id);

        for (id, value) in ids {
            let Some(upd) = value.as_object() else {
                warn!(name, id, "character update entry is not an object");
                continue;
            };

            let owner = self.tables.characters.read(id, |r| r.owner.clone());
            match owner {
                None => {
                    warn!(name, id, "update for non-existing character");
                    continue;
                }
                Some(owner) if owner != name => {
                    warn!(name, id, %owner, "update for foreign character");
                    continue;
                }
                Some(_) => (),
            }

            self.apply_character_update(name, id, upd);
        }
    }

    fn apply_character_update(
        &mut self,
        name: &str,
        id: Id,
        upd: &serde_json::Map<String, Value>,
    ) {
        if let Some(send) = upd.get("send") {
            self.try_transfer_character(name, id, send);
        }
        if let Some(wp) = upd.get("wp") {
            self.try_set_waypoints(id, wp);
        }
        if let Some(eb) = upd.get("eb") {
            self.try_enter_building(id, eb);
        }
        if let Some(xb) = upd.get("xb") {
            self.try_exit_building(id, xb);
        }
        if let Some(prospect) = upd.get("prospect") {
            self.try_prospect(id, prospect);
        }
        if let Some(mine) = upd.get("mine") {
            self.try_mine(id, mine);
        }
        if let Some(drop_val) = upd.get("drop") {
            self.try_drop(id, drop_val);
        }
        if let Some(pu) = upd.get("pu") {
            self.try_pickup(id, pu);
        }
        if let Some(fb) = upd.get("fb") {
            self.try_found_building(name, id, fb);
        }
    }

    fn try_transfer_character(&mut self, name: &str, id: Id, send: &Value) {
        let Some(recipient) = send.as_str() else {
            warn!(name, id, "invalid send target");
            return;
        };

        let faction = self
            .tables
            .characters
            .read(id, |r| r.faction)
            .expect("checked above");
        match self.tables.accounts.read(recipient, |a| a.faction) {
            Some(Some(f)) if f == faction => (),
            _ => {
                warn!(name, id, recipient = recipient, "send target invalid or wrong faction");
                return;
            }
        }

        info!(id, from = name, to = recipient, "transferring character");
        self.tables
            .characters
            .get(id)
            .expect("checked above")
            .set_owner(recipient);
    }

    fn try_set_waypoints(&mut self, id: Id, wp: &Value) {
        let Some(coords) = jsonutil::parse_coord_array(wp) else {
            warn!(id, "invalid waypoints");
            return;
        };

        let mut c = self.tables.characters.get(id).expect("checked above");
        if c.is_busy() || c.is_in_building() {
            warn!(id, "busy or sheltered character cannot move");
            return;
        }

        debug!(id, count = coords.len(), "setting waypoints");
        c.stop_moving();
        if let Some(mining) = c.proto().mining {
            if mining.active {
                c.proto_mut().mining.as_mut().expect("checked").active = false;
            }
        }
        if !coords.is_empty() {
            c.proto_mut().movement = Some(Movement { waypoints: coords });
        }
    }

    fn try_enter_building(&mut self, id: Id, eb: &Value) {
        let mut c = self.tables.characters.get(id).expect("checked above");
        if c.is_in_building() || c.is_busy() {
            warn!(id, "cannot set enter intent now");
            return;
        }

        if eb.is_null() {
            c.set_enter_building_intent(EMPTY_ID);
            return;
        }
        let Some(building) = jsonutil::parse_id(eb) else {
            warn!(id, "invalid enter-building id");
            return;
        };
        if !self.tables.buildings.contains(building) {
            warn!(id, building, "enter intent for non-existing building");
            return;
        }

        debug!(id, building, "setting enter-building intent");
        c.set_enter_building_intent(building);
    }

    fn try_exit_building(&mut self, id: Id, xb: &Value) {
        if !xb.as_object().map(|o| o.is_empty()).unwrap_or(false) {
            warn!(id, "invalid exit-building move");
            return;
        }

        let mut c = self.tables.characters.get(id).expect("checked above");
        if !c.is_in_building() || c.is_busy() {
            warn!(id, "character cannot exit a building now");
            return;
        }

        let building = c.building_id();
        let centre = self
            .tables
            .buildings
            .read(building, |b| b.centre)
            .expect("character is in existing building");
        let Some(spot) = find_exit_spot(centre, self.dyn_obstacles, self.ctx) else {
            warn!(id, building, "no free spot to exit the building");
            return;
        };

        debug!(id, building, %spot, "character exits building");
        c.set_pos(spot);
        self.dyn_obstacles.add_vehicle(spot, c.faction());
    }

    fn try_prospect(&mut self, id: Id, prospect: &Value) {
        if !prospect.as_object().map(|o| o.is_empty()).unwrap_or(false) {
            warn!(id, "invalid prospect move");
            return;
        }

        let mut c = self.tables.characters.get(id).expect("checked above");
        if c.is_busy() || c.is_in_building() {
            warn!(id, "character cannot prospect now");
            return;
        }
        if c.proto().prospecting_blocks.is_none() {
            warn!(id, "character cannot prospect at all");
            return;
        }

        let region_id = self.ctx.map().region_id(c.pos());
        let mut r = self.tables.regions.get(region_id, self.ctx.height());
        if !prospecting::can_prospect_region(&c, &r, self.ctx) {
            warn!(id, region = region_id, "region cannot be prospected");
            return;
        }

        // Re-prospecting clears the old result right away.
        if r.prospection().is_some() {
            r.set_prospection(None);
            r.set_resource_left(0);
        }

        prospecting::start_prospecting(&mut c, &mut r, self.tables, self.ctx);
    }

    fn try_mine(&mut self, id: Id, mine: &Value) {
        if !mine.as_object().map(|o| o.is_empty()).unwrap_or(false) {
            warn!(id, "invalid mine move");
            return;
        }

        let mut c = self.tables.characters.get(id).expect("checked above");
        if c.is_busy() || c.is_in_building() {
            warn!(id, "character cannot mine now");
            return;
        }
        if c.proto().mining.is_none() {
            warn!(id, "character has no mining rig");
            return;
        }
        if c.proto().movement.is_some() {
            warn!(id, "moving characters cannot mine");
            return;
        }

        let region_id = self.ctx.map().region_id(c.pos());
        let prospected = self
            .tables
            .regions
            .read(region_id, |r| {
                r.prospection.is_some() && r.resource_left > 0
            })
            .unwrap_or(false);
        if !prospected {
            warn!(id, region = region_id, "region is not minable");
            return;
        }

        debug!(id, region = region_id, "starting to mine");
        c.proto_mut().mining.as_mut().expect("checked").active = true;
    }

    fn try_drop(&mut self, id: Id, drop_val: &Value) {
        let Some(items) = drop_val
            .as_object()
            .and_then(|o| o.get("f"))
            .and_then(|f| jsonutil::parse_fungible_map(f))
        else {
            warn!(id, "invalid drop move");
            return;
        };

        let mut c = self.tables.characters.get(id).expect("checked above");

        enum DropTarget {
            Ground(Hex),
            Foundation(Id),
            BuildingInv(Id),
        }
        let target = if c.is_in_building() {
            let building = c.building_id();
            let foundation = self
                .tables
                .buildings
                .read(building, |b| b.proto.foundation)
                .expect("character is in existing building");
            if foundation {
                DropTarget::Foundation(building)
            } else {
                DropTarget::BuildingInv(building)
            }
        } else {
            DropTarget::Ground(c.pos())
        };

        for (item, requested) in items {
            let held = c.inventory().count(&item);
            let dropped = requested.min(held);
            if dropped == 0 {
                continue;
            }

            c.inventory_mut().add(&item, -dropped);
            match &target {
                DropTarget::Ground(pos) => {
                    self.tables.ground_loot.get(*pos).payload_mut().add(&item, dropped);
                }
                DropTarget::Foundation(building) => {
                    let mut b = self.tables.buildings.get(*building).expect("checked");
                    b.proto_mut().construction_inventory.add(&item, dropped);
                }
                DropTarget::BuildingInv(building) => {
                    self.tables
                        .building_inv
                        .get(*building, c.owner())
                        .payload_mut()
                        .add(&item, dropped);
                }
            }
            debug!(id, item = item.as_str(), dropped, "dropped items");
        }
        drop(c);

        if let DropTarget::Foundation(building) = target {
            self.maybe_start_construction(building);
        }
    }

    /// Schedules the building-construction operation once a foundation's
    /// inventory covers the full construction cost.
    fn maybe_start_construction(&mut self, building: Id) {
        let mut b = self.tables.buildings.get(building).expect("checked above");
        if b.proto().ongoing_construction != EMPTY_ID {
            return;
        }

        let data = self.ctx.params().building_checked(b.kind()).clone();
        let covered = data
            .construction_cost
            .iter()
            .all(|(item, needed)| b.proto().construction_inventory.count(item) >= *needed);
        if !covered {
            return;
        }

        info!(building, "construction inventory complete, starting build");
        let mut op = self.tables.ongoings.create(
            self.tables.ids.next_id(),
            self.ctx.height(),
            OngoingOp::BuildingConstruction,
        );
        op.set_height(self.ctx.height() + data.construction_blocks as u64);
        op.set_building_id(building);
        b.proto_mut().ongoing_construction = op.id();
    }

    fn try_pickup(&mut self, id: Id, pu: &Value) {
        let Some(items) = pu
            .as_object()
            .and_then(|o| o.get("f"))
            .and_then(|f| jsonutil::parse_fungible_map(f))
        else {
            warn!(id, "invalid pickup move");
            return;
        };

        let mut c = self.tables.characters.get(id).expect("checked above");

        if c.is_in_building() {
            let building = c.building_id();
            let foundation = self
                .tables
                .buildings
                .read(building, |b| b.proto.foundation)
                .expect("character is in existing building");
            if foundation {
                warn!(id, building, "cannot pick up inside a foundation");
                return;
            }
            let owner = c.owner().to_string();
            for (item, requested) in items {
                let available = self.tables.building_inv.count_in(building, &owner, &item);
                let taken = self.pickup_amount(&c, &item, requested, available);
                if taken > 0 {
                    self.tables
                        .building_inv
                        .get(building, &owner)
                        .payload_mut()
                        .add(&item, -taken);
                    c.inventory_mut().add(&item, taken);
                }
            }
            return;
        }

        let pos = c.pos();
        let mut loot = self.tables.ground_loot.get(pos);
        for (item, requested) in items {
            let available = loot.count(&item);
            let taken = self.pickup_amount(&c, &item, requested, available);
            if taken > 0 {
                loot.payload_mut().add(&item, -taken);
                c.inventory_mut().add(&item, taken);
                debug!(id, item = item.as_str(), taken, "picked up items");
            }
        }
    }

    /// How much of a pickup request actually fits: bounded by availability
    /// and free cargo.
    fn pickup_amount(
        &self,
        c: &Character,
        item: &str,
        requested: Quantity,
        available: Quantity,
    ) -> Quantity {
        let space = c.free_cargo(self.ctx.params());
        let per_unit = self.ctx.params().item_checked(item).space.max(1) as u64;
        let fits = (space / per_unit) as Quantity;
        requested.min(available).min(fits)
    }

    fn try_found_building(&mut self, name: &str, id: Id, fb: &Value) {
        let parsed = (|| -> Option<(String, u32)> {
            let obj = fb.as_object()?;
            if obj.len() != 2 {
                return None;
            }
            let kind = obj.get("t")?.as_str()?.to_string();
            let rot = obj.get("rot")?.as_u64()?;
            // Out-of-range rotations are rejected, not normalised.
            if rot > 5 {
                return None;
            }
            Some((kind, rot as u32))
        })();
        let Some((kind, rot)) = parsed else {
            warn!(id, "invalid found-building move");
            return;
        };

        let Some(data) = self.ctx.params().building(&kind) else {
            warn!(id, kind = kind.as_str(), "unknown building type");
            return;
        };
        if !data.may_found {
            warn!(id, kind = kind.as_str(), "building type cannot be founded");
            return;
        }
        let data = data.clone();

        let mut c = self.tables.characters.get(id).expect("checked above");
        if c.is_busy() || c.is_in_building() {
            warn!(id, "character cannot found a building now");
            return;
        }

        for (item, needed) in &data.foundation_cost {
            if c.inventory().count(item) < *needed {
                warn!(id, item = item.as_str(), "missing foundation materials");
                return;
            }
        }

        let centre = c.pos();
        let tiles = shape_tiles(self.ctx.params(), &kind, centre, rot);
        for tile in &tiles {
            if !self.ctx.map().is_passable(*tile) {
                warn!(id, %tile, "foundation tile not passable");
                return;
            }
            if self.dyn_obstacles.building_at(*tile) {
                warn!(id, %tile, "foundation tile has a building");
                return;
            }
            // The founder's own vehicle does not block the placement; it
            // moves into the new foundation.
            if *tile != centre && self.dyn_obstacles.vehicle_at(*tile).is_some() {
                warn!(id, %tile, "foundation tile has a vehicle");
                return;
            }
        }

        info!(id, name, kind = kind.as_str(), %centre, "founding building");

        for (item, needed) in &data.foundation_cost {
            c.inventory_mut().add(item, -*needed);
        }

        let mut b =
            self.tables
                .buildings
                .create(self.tables.ids.next_id(), &kind, name, c.faction());
        b.set_centre(centre);
        {
            let proto = b.proto_mut();
            proto.rotation_steps = rot;
            proto.foundation = true;
            proto.age_data.founded_height = self.ctx.height();
        }
        let building_id = b.id();
        drop(b);

        // The new foundation blocks movement from this moment on, and the
        // founder moves inside.
        self.dyn_obstacles.remove_vehicle(centre, c.faction());
        for tile in tiles {
            self.dyn_obstacles.add_building_tile(tile);
        }
        c.stop_moving();
        c.set_target(None);
        c.enter_building(building_id);
    }

    // -----------------------------------------------------------------
    // Building updates

    fn try_building_updates(&mut self, name: &str, mv: &Value) {
        let Some(b) = mv.get("b") else {
            return;
        };
        let Some(upd) = b.as_object() else {
            warn!(name, "building update is not an object");
            return;
        };

        let mut ids: Vec<(Id, &Value)> = Vec::new();
        for (key, value) in upd {
            match jsonutil::parse_id_string(key) {
                Some(id) => ids.push((id, value)),
                None => warn!(name, key = key.as_str(), "invalid building id key"),
            }
        }
        ids.sort_by_key(|(id, _)| *id);

        for (id, value) in ids {
            self.try_building_update(name, id, value);
        }
    }

    fn try_building_update(&mut self, name: &str, id: Id, upd: &Value) {
        let Some(upd) = upd.as_object() else {
            warn!(name, id, "building update entry is not an object");
            return;
        };

        match self.tables.buildings.read(id, |b| {
            (b.faction, b.owner.clone(), b.proto.foundation)
        }) {
            None => {
                warn!(name, id, "update for non-existing building");
                return;
            }
            Some((Faction::Ancient, _, _)) => {
                warn!(name, id, "Ancient buildings cannot be updated");
                return;
            }
            Some((_, owner, _)) if owner != name => {
                warn!(name, id, %owner, "update for foreign building");
                return;
            }
            Some((_, _, true)) => {
                warn!(name, id, "foundations cannot be configured");
                return;
            }
            Some(_) => (),
        }

        let mut new_config = BuildingConfig::default();
        if let Some(sf) = upd.get("sf") {
            match sf.as_u64() {
                Some(percent) if percent <= 1_000 => {
                    new_config.service_fee_percent = Some(percent as u32);
                }
                _ => {
                    warn!(name, id, "invalid service fee");
                    return;
                }
            }
        }
        if let Some(xf) = upd.get("xf") {
            match xf.as_u64() {
                Some(bps) if bps <= 10_000 => {
                    new_config.dex_fee_bps = Some(bps as u32);
                }
                _ => {
                    warn!(name, id, "invalid dex fee");
                    return;
                }
            }
        }
        if new_config.is_empty() {
            warn!(name, id, "building update without changes");
            return;
        }

        info!(building = id, ?new_config, "scheduling delayed config update");
        let mut op = self.tables.ongoings.create(
            self.tables.ids.next_id(),
            self.ctx.height(),
            OngoingOp::BuildingUpdate { new_config },
        );
        op.set_height(self.ctx.height() + self.ctx.params().building_update_delay);
        op.set_building_id(id);
    }

    // -----------------------------------------------------------------
    // Services and DEX

    fn try_service_operations(&mut self, name: &str, mv: &Value) {
        let Some(s) = mv.get("s") else {
            return;
        };
        let Some(ops) = s.as_array() else {
            warn!(name, "service operations are not an array");
            return;
        };

        for op_val in ops {
            let Some(op) = ServiceOp::parse(op_val) else {
                warn!(name, "invalid service operation");
                continue;
            };
            match op.validate(name, self.tables, self.ctx) {
                Ok(()) => op.execute(name, self.tables, self.ctx),
                Err(err) => warn!(name, %err, "dropping service operation"),
            }
        }
    }

    fn try_dex_operations(&mut self, name: &str, mv: &Value) {
        let Some(x) = mv.get("x") else {
            return;
        };
        let Some(ops) = x.as_array() else {
            warn!(name, "dex operations are not an array");
            return;
        };

        for op_val in ops {
            let Some(op) = DexOp::parse(op_val) else {
                warn!(name, "invalid dex operation");
                continue;
            };
            match op.validate(name, self.tables, self.ctx) {
                Ok(()) => op.execute(name, self.tables, self.ctx),
                Err(err) => warn!(name, %err, "dropping dex operation"),
            }
        }
    }
}
