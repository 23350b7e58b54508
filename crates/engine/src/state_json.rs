//! JSON export of the confirmed game state.
//!
//! The output feeds the chain interface and frontends.  All integer fields
//! serialize as JSON integers; HP values carry their milli fraction as
//! `full + millis / 1000` only when the fraction is non-zero, so integral
//! values stay integers.  Object keys come from sorted maps throughout, so
//! the output is byte-stable.

use serde_json::{json, Map, Value};
use skarn_store::{Id, EMPTY_ID};

use crate::context::Context;
use crate::faction::Faction;
use crate::schema::character::CharacterRow;
use crate::schema::building::BuildingRow;
use crate::schema::inventory::Inventory;
use crate::schema::ongoing::{OngoingOp, OngoingRow};
use crate::schema::region::RegionRow;
use crate::schema::{CombatData, CombatEffects, FighterKind, Hp, RegenData, Tables, TargetId};

fn hp_value(full: u32, millis: u32) -> Value {
    if millis == 0 {
        json!(full)
    } else {
        json!(full as f64 + millis as f64 / 1_000.0)
    }
}

fn hp_json(hp: &Hp) -> Value {
    json!({
        "armour": hp_value(hp.armour, 0),
        "shield": hp_value(hp.shield, hp.shield_mhp),
    })
}

fn target_json(target: TargetId) -> Value {
    let kind = match target.kind {
        FighterKind::Character => "character",
        FighterKind::Building => "building",
    };
    json!({"id": target.id, "type": kind})
}

fn inventory_json(inv: &Inventory) -> Value {
    let mut fungible = Map::new();
    for (item, count) in inv.iter() {
        fungible.insert(item.to_string(), json!(count));
    }
    json!({"fungible": fungible})
}

fn combat_json(
    combat: &CombatData,
    hp: &Hp,
    regen: &RegenData,
    target: Option<TargetId>,
    effects: &CombatEffects,
) -> Value {
    let mut res = Map::new();

    if let Some(t) = target {
        res.insert("target".to_string(), target_json(t));
    }

    let mut attacks = Vec::new();
    for attack in &combat.attacks {
        let mut obj = Map::new();
        if let Some(range) = attack.range {
            obj.insert("range".to_string(), json!(range));
        }
        if let Some(area) = attack.area {
            obj.insert("area".to_string(), json!(area));
        }
        if attack.friendlies {
            obj.insert("friendlies".to_string(), json!(true));
        }
        if let Some(dmg) = attack.damage {
            obj.insert("damage".to_string(), json!({"min": dmg.min, "max": dmg.max}));
        }
        attacks.push(Value::Object(obj));
    }
    if !attacks.is_empty() {
        res.insert("attacks".to_string(), Value::Array(attacks));
    }

    res.insert(
        "hp".to_string(),
        json!({
            "max": json!({
                "armour": hp_value(regen.max_armour, 0),
                "shield": hp_value(regen.max_shield, 0),
            }),
            "current": hp_json(hp),
            "regeneration": json!({
                "armour": hp_value(0, 0),
                "shield": hp_value(0, regen.shield_regen_mhp),
            }),
        }),
    );

    if !effects.is_empty() {
        let mut fx = Map::new();
        if effects.speed_percent != 0 {
            fx.insert("speed".to_string(), json!({"percent": effects.speed_percent}));
        }
        if effects.range_percent != 0 {
            fx.insert("range".to_string(), json!({"percent": effects.range_percent}));
        }
        if effects.mentecon {
            fx.insert("mentecon".to_string(), json!(true));
        }
        res.insert("effects".to_string(), Value::Object(fx));
    }

    Value::Object(res)
}

fn character_json(tables: &Tables, ctx: &Context, id: Id, c: &CharacterRow) -> Value {
    let mut res = Map::new();
    res.insert("id".to_string(), json!(id));
    res.insert("owner".to_string(), json!(c.owner));
    res.insert("faction".to_string(), json!(c.faction.as_str()));

    if c.is_in_building() {
        res.insert("inbuilding".to_string(), json!(c.building_id));
    } else {
        res.insert("position".to_string(), json!({"x": c.pos.x, "y": c.pos.y}));
    }
    if c.enter_building != EMPTY_ID {
        res.insert("enterbuilding".to_string(), json!(c.enter_building));
    }

    let mut combat = combat_json(&c.proto.combat, &c.hp, &c.regen, c.target, &c.effects);
    {
        let attackers: Vec<Id> = tables.damage_lists.attackers(id).into_iter().collect();
        if !attackers.is_empty() {
            combat
                .as_object_mut()
                .expect("combat is an object")
                .insert("attackers".to_string(), json!(attackers));
        }
    }
    res.insert("combat".to_string(), combat);

    res.insert("speed".to_string(), json!(c.proto.speed));
    res.insert("inventory".to_string(), inventory_json(&c.proto.inventory));

    let used = c.proto.inventory.used_space(ctx.params());
    res.insert(
        "cargospace".to_string(),
        json!({
            "total": c.proto.cargo_space,
            "used": used,
            "free": c.proto.cargo_space as u64 - used,
        }),
    );

    let mut movement = Map::new();
    if c.volatile_mv.partial_step != 0 {
        movement.insert("partialstep".to_string(), json!(c.volatile_mv.partial_step));
    }
    if c.volatile_mv.blocked_turns != 0 {
        movement.insert("blockedturns".to_string(), json!(c.volatile_mv.blocked_turns));
    }
    if let Some(mv) = &c.proto.movement {
        let wp: Vec<Value> = mv
            .waypoints
            .iter()
            .map(|w| json!({"x": w.x, "y": w.y}))
            .collect();
        if !wp.is_empty() {
            movement.insert("waypoints".to_string(), Value::Array(wp));
        }
    }
    if !movement.is_empty() {
        res.insert("movement".to_string(), Value::Object(movement));
    }

    if c.busy {
        res.insert("busy".to_string(), json!(c.proto.ongoing));
    }

    if let Some(mining) = &c.proto.mining {
        let mut obj = Map::new();
        obj.insert(
            "rate".to_string(),
            json!({"min": mining.rate_min, "max": mining.rate_max}),
        );
        obj.insert("active".to_string(), json!(mining.active));
        if mining.active {
            obj.insert("region".to_string(), json!(ctx.map().region_id(c.pos)));
        }
        res.insert("mining".to_string(), Value::Object(obj));
    }

    if let Some(blocks) = c.proto.prospecting_blocks {
        res.insert("prospectingblocks".to_string(), json!(blocks));
    }

    Value::Object(res)
}

fn config_json(config: &crate::schema::building::BuildingConfig) -> Value {
    let mut res = Map::new();
    if let Some(sf) = config.service_fee_percent {
        res.insert("servicefee".to_string(), json!(sf));
    }
    if let Some(xf) = config.dex_fee_bps {
        res.insert("dexfee".to_string(), json!(xf as f64 / 100.0));
    }
    Value::Object(res)
}

fn orderbook_json(tables: &Tables, building: Id) -> Value {
    let mut book: Map<String, Value> = Map::new();

    for id in tables.orders.ids_for_building(building) {
        let row = tables
            .orders
            .read(id, |r| r.clone())
            .expect("listed order exists");

        let entry = book.entry(row.item.clone()).or_insert_with(|| {
            json!({
                "item": row.item,
                "bids": [],
                "asks": [],
            })
        });

        let cur = json!({
            "id": id,
            "account": row.account,
            "quantity": row.quantity,
            "price": row.price,
        });
        let key = match row.order_type {
            crate::schema::dex::OrderType::Bid => "bids",
            crate::schema::dex::OrderType::Ask => "asks",
        };
        entry[key].as_array_mut().expect("array").push(cur);
    }

    // Sort by price: best bid (highest) and best ask (lowest) first, ties
    // by id.
    for entry in book.values_mut() {
        for (key, descending) in [("bids", true), ("asks", false)] {
            let arr = entry[key].as_array_mut().expect("array");
            arr.sort_by_key(|o| {
                let price = o["price"].as_i64().expect("price");
                let id = o["id"].as_u64().expect("id");
                (if descending { -price } else { price }, id)
            });
        }
    }

    Value::Object(book)
}

fn building_json(tables: &Tables, ctx: &Context, id: Id, b: &BuildingRow) -> Value {
    let mut res = Map::new();
    res.insert("id".to_string(), json!(id));
    res.insert("type".to_string(), json!(b.kind));
    if b.proto.foundation {
        res.insert("foundation".to_string(), json!(true));
    }

    res.insert("faction".to_string(), json!(b.faction.as_str()));
    if b.faction != Faction::Ancient {
        res.insert("owner".to_string(), json!(b.owner));
    }
    res.insert("centre".to_string(), json!({"x": b.centre.x, "y": b.centre.y}));
    res.insert("rotationsteps".to_string(), json!(b.proto.rotation_steps));
    res.insert("config".to_string(), config_json(&b.proto.config));

    let tiles: Vec<Value> = crate::schema::building::shape_tiles(
        ctx.params(),
        &b.kind,
        b.centre,
        b.proto.rotation_steps,
    )
    .into_iter()
    .map(|t| json!({"x": t.x, "y": t.y}))
    .collect();
    res.insert("tiles".to_string(), Value::Array(tiles));

    res.insert(
        "combat".to_string(),
        combat_json(&b.proto.combat, &b.hp, &b.regen, b.target, &b.effects),
    );

    if b.proto.foundation {
        let mut constr = Map::new();
        if b.proto.ongoing_construction != EMPTY_ID {
            constr.insert("ongoing".to_string(), json!(b.proto.ongoing_construction));
        }
        constr.insert(
            "inventory".to_string(),
            inventory_json(&b.proto.construction_inventory),
        );
        res.insert("construction".to_string(), Value::Object(constr));
    } else {
        let mut inv = Map::new();
        for (building, account) in tables.building_inv.keys_for_building(id) {
            debug_assert_eq!(building, id);
            let json = tables
                .building_inv
                .get(building, &account)
                .iter()
                .map(|(item, count)| (item.to_string(), json!(count)))
                .collect::<Map<String, Value>>();
            inv.insert(account, json!({"fungible": json}));
        }
        res.insert("inventories".to_string(), Value::Object(inv));

        let mut reserved = Map::new();
        for (item, quantity) in tables.orders.reserved_quantities(id) {
            reserved.insert(item, json!(quantity));
        }
        res.insert("reserved".to_string(), Value::Object(reserved));

        res.insert("orderbook".to_string(), orderbook_json(tables, id));
    }

    let mut age = Map::new();
    age.insert("founded".to_string(), json!(b.proto.age_data.founded_height));
    if let Some(finished) = b.proto.age_data.finished_height {
        age.insert("finished".to_string(), json!(finished));
    }
    res.insert("age".to_string(), Value::Object(age));

    Value::Object(res)
}

fn ongoing_json(ctx: &Context, id: Id, op: &OngoingRow) -> Value {
    let mut res = Map::new();
    res.insert("id".to_string(), json!(id));
    res.insert("start_height".to_string(), json!(op.start_height));
    if op.character_id != EMPTY_ID {
        res.insert("characterid".to_string(), json!(op.character_id));
    }
    if op.building_id != EMPTY_ID {
        res.insert("buildingid".to_string(), json!(op.building_id));
    }

    // Per-unit operations complete in several steps; the advertised end
    // height accounts for the units still queued after the next step.
    let mut end_delta = 0u64;

    match &op.op {
        OngoingOp::Prospection => {
            res.insert("operation".to_string(), json!("prospecting"));
        }
        OngoingOp::ArmourRepair => {
            res.insert("operation".to_string(), json!("armourrepair"));
        }
        OngoingOp::BlueprintCopy {
            account,
            original_type,
            copy_type,
            num_copies,
        } => {
            res.insert("operation".to_string(), json!("bpcopy"));
            res.insert("account".to_string(), json!(account));
            res.insert("original".to_string(), json!(original_type));
            let mut output = Map::new();
            output.insert(copy_type.clone(), json!(num_copies));
            res.insert("output".to_string(), Value::Object(output));
            end_delta = (*num_copies as u64 - 1) * ctx.params().bp_copy_blocks(original_type) as u64;
        }
        OngoingOp::ItemConstruction {
            account,
            output_type,
            num_items,
            original_type,
        } => {
            res.insert("operation".to_string(), json!("construct"));
            res.insert("account".to_string(), json!(account));
            let mut output = Map::new();
            output.insert(output_type.clone(), json!(num_items));
            res.insert("output".to_string(), Value::Object(output));
            if let Some(original) = original_type {
                res.insert("original".to_string(), json!(original));
                end_delta =
                    (*num_items as u64 - 1) * ctx.params().construction_blocks(output_type) as u64;
            }
        }
        OngoingOp::BuildingConstruction => {
            res.insert("operation".to_string(), json!("build"));
        }
        OngoingOp::BuildingUpdate { new_config } => {
            res.insert("operation".to_string(), json!("config"));
            res.insert("newconfig".to_string(), config_json(new_config));
        }
    }

    res.insert("end_height".to_string(), json!(op.height + end_delta));
    Value::Object(res)
}

fn region_json(id: u64, r: &RegionRow) -> Value {
    let mut res = Map::new();
    res.insert("id".to_string(), json!(id));

    let mut prospection = Map::new();
    if r.prospecting_character != EMPTY_ID {
        prospection.insert("inprogress".to_string(), json!(r.prospecting_character));
    }
    if let Some(p) = &r.prospection {
        prospection.insert("name".to_string(), json!(p.name));
        prospection.insert("height".to_string(), json!(p.height));
    }
    if !prospection.is_empty() {
        res.insert("prospection".to_string(), Value::Object(prospection));
    }

    if let Some(p) = &r.prospection {
        res.insert(
            "resource".to_string(),
            json!({
                "type": p.resource,
                "amount": r.resource_left,
            }),
        );
    }

    Value::Object(res)
}

/// All accounts, with balances broken into available and reserved parts.
pub fn accounts(tables: &Tables) -> Value {
    let reserved = tables.orders.reserved_coins();

    let mut res = Vec::new();
    for name in tables.accounts.names() {
        let row = tables
            .accounts
            .read(&name, |a| a.clone())
            .expect("listed account");

        let mut obj = Map::new();
        obj.insert("name".to_string(), json!(name));
        obj.insert("minted".to_string(), json!(row.burnsale_balance));

        let locked = reserved.get(&name).copied().unwrap_or(0);
        obj.insert(
            "balance".to_string(),
            json!({
                "available": row.balance,
                "reserved": locked,
                "total": row.balance + locked,
            }),
        );

        if let Some(faction) = row.faction {
            obj.insert("faction".to_string(), json!(faction.as_str()));
            obj.insert("kills".to_string(), json!(row.kills));
            obj.insert("fame".to_string(), json!(row.fame));
        }

        res.push(Value::Object(obj));
    }
    Value::Array(res)
}

pub fn characters(tables: &Tables, ctx: &Context) -> Value {
    let res: Vec<Value> = tables
        .characters
        .ids()
        .into_iter()
        .map(|id| {
            let row = tables.characters.read(id, |r| r.clone()).expect("listed");
            character_json(tables, ctx, id, &row)
        })
        .collect();
    Value::Array(res)
}

pub fn buildings(tables: &Tables, ctx: &Context) -> Value {
    let res: Vec<Value> = tables
        .buildings
        .ids()
        .into_iter()
        .map(|id| {
            let row = tables.buildings.read(id, |r| r.clone()).expect("listed");
            building_json(tables, ctx, id, &row)
        })
        .collect();
    Value::Array(res)
}

pub fn ground_loot(tables: &Tables) -> Value {
    let res: Vec<Value> = tables
        .ground_loot
        .positions()
        .into_iter()
        .map(|pos| {
            let inv = tables.ground_loot.get(pos);
            json!({
                "position": {"x": pos.x, "y": pos.y},
                "inventory": inventory_json(&inv),
            })
        })
        .collect();
    Value::Array(res)
}

pub fn ongoing_operations(tables: &Tables, ctx: &Context) -> Value {
    let res: Vec<Value> = tables
        .ongoings
        .ids()
        .into_iter()
        .map(|id| {
            let row = tables.ongoings.read(id, |r| r.clone()).expect("listed");
            ongoing_json(ctx, id, &row)
        })
        .collect();
    Value::Array(res)
}

/// Regions modified at or after the given height.  `0` yields all regions
/// ever written.
pub fn regions(tables: &Tables, height: u64) -> Value {
    let res: Vec<Value> = tables
        .regions
        .ids_modified_since(height)
        .into_iter()
        .map(|id| {
            let row = tables.regions.read(id, |r| r.clone()).expect("listed");
            region_json(id, &row)
        })
        .collect();
    Value::Array(res)
}

pub fn money_supply(tables: &Tables, ctx: &Context) -> Value {
    let mut entries = Map::new();
    for key in crate::schema::money::INFLOW_KEYS {
        if key == "gifted" && !ctx.params().god_mode() {
            assert_eq!(tables.money.get(key), 0, "gifted coins outside god mode");
            continue;
        }
        entries.insert(key.to_string(), json!(tables.money.get(key)));
    }
    entries.insert(
        crate::schema::money::BURNT_KEY.to_string(),
        json!(tables.money.get(crate::schema::money::BURNT_KEY)),
    );

    let mut burnsale = Vec::new();
    let mut sold = tables.money.get("burnsale");
    for (i, stage) in ctx.params().burnsale_stages().iter().enumerate() {
        let already = sold.min(stage.amount_sold);
        sold -= already;
        burnsale.push(json!({
            "stage": i + 1,
            "price": stage.price_sat as f64 / crate::params::COIN as f64,
            "total": stage.amount_sold,
            "sold": already,
            "available": stage.amount_sold - already,
        }));
    }

    json!({
        "total": tables.money.circulating(),
        "entries": entries,
        "burnsale": burnsale,
    })
}

pub fn prize_stats(tables: &Tables, ctx: &Context) -> Value {
    let mut res = Map::new();
    for prize in ctx.params().prizes() {
        let found = tables.item_counts.found(&format!("{} prize", prize.name));
        assert!(found <= prize.number, "more prizes found than exist");
        res.insert(
            prize.name.clone(),
            json!({
                "number": prize.number,
                "probability": prize.probability,
                "found": found,
                "available": prize.number - found,
            }),
        );
    }
    Value::Object(res)
}

/// The full game state as one JSON object.
pub fn full_state(tables: &Tables, ctx: &Context) -> Value {
    json!({
        "accounts": accounts(tables),
        "buildings": buildings(tables, ctx),
        "characters": characters(tables, ctx),
        "groundloot": ground_loot(tables),
        "ongoings": ongoing_operations(tables, ctx),
        "moneysupply": money_supply(tables, ctx),
        "regions": regions(tables, 0),
        "prizes": prize_stats(tables, ctx),
    })
}

/// The minimal data a fresh frontend needs to bootstrap.
pub fn bootstrap_data(tables: &Tables) -> Value {
    json!({
        "regions": regions(tables, 0),
    })
}

/// Trade history of an item inside a building, oldest first.
pub fn trade_history(tables: &Tables, item: &str, building: Id) -> Value {
    let res: Vec<Value> = tables
        .trades
        .trades_for(item, building)
        .into_iter()
        .map(|t| {
            json!({
                "height": t.height,
                "timestamp": t.timestamp,
                "buildingid": t.building,
                "item": t.item,
                "quantity": t.quantity,
                "price": t.price,
                "cost": t.quantity * t.price,
                "seller": t.seller,
                "buyer": t.buyer,
            })
        })
        .collect();
    Value::Array(res)
}
