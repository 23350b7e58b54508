//! Projection of mempool-visible moves into a preview state.
//!
//! The pending state is not consensus data: it is rebuilt from scratch
//! whenever a new block confirms and only powers a read-only JSON preview.
//! Intents are nevertheless validated against the confirmed state, so the
//! preview reflects what would plausibly happen, and mutually exclusive
//! intents knock each other out the way the real pipeline would.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use skarn_store::{Id, EMPTY_ID};
use tracing::{debug, warn};

use crate::context::Context;
use crate::dex_ops::DexOp;
use crate::faction::Faction;
use crate::geometry::Hex;
use crate::jsonutil;
use crate::map::RegionId;
use crate::params::Amount;
use crate::schema::building::BuildingConfig;
use crate::schema::Tables;
use crate::services::ServiceOp;

/// Pending intents for one character.
#[derive(Debug, Default)]
pub struct CharacterPending {
    waypoints: Option<Vec<Hex>>,
    drop: bool,
    pickup: bool,
    prospecting_region: Option<RegionId>,
    mining_region: Option<RegionId>,
    /// `Some(EMPTY_ID)` records a pending cancellation of the intent.
    enter_building: Option<Id>,
    exit_building: Option<Id>,
    found_building: Option<Value>,
}

/// Pending intents for one building.
#[derive(Debug, Default)]
pub struct BuildingPending {
    new_config: BuildingConfig,
}

/// Pending coin operations of one account.
#[derive(Debug, Default)]
pub struct CoinOps {
    burnt: Amount,
    transfers: BTreeMap<String, Amount>,
}

/// Pending intents for one account.
#[derive(Debug, Default)]
pub struct AccountPending {
    coin_ops: Option<CoinOps>,
    service_ops: Vec<Value>,
    dex_ops: Vec<Value>,
}

/// Accumulated pending intents of all mempool moves.
#[derive(Debug, Default)]
pub struct PendingState {
    characters: BTreeMap<Id, CharacterPending>,
    buildings: BTreeMap<Id, BuildingPending>,
    accounts: BTreeMap<String, AccountPending>,
    new_characters: BTreeMap<String, Vec<Faction>>,
}

impl PendingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets all accumulated state.
    pub fn clear(&mut self) {
        self.characters.clear();
        self.buildings.clear();
        self.accounts.clear();
        self.new_characters.clear();
    }

    fn character(&mut self, id: Id) -> &mut CharacterPending {
        self.characters.entry(id).or_default()
    }

    pub fn add_character_waypoints(&mut self, id: Id, wp: Vec<Hex>) {
        let ch = self.character(id);

        if ch.prospecting_region.is_some() {
            warn!(id, "pending prospection, ignoring waypoints");
            return;
        }

        // Setting waypoints stops any mining, so assume the character will
        // not start mining once both moves confirm.
        if ch.mining_region.take().is_some() {
            warn!(id, "setting waypoints, dropping pending mining");
        }

        ch.waypoints = Some(wp);
    }

    pub fn add_character_prospecting(&mut self, id: Id, region: RegionId) {
        let ch = self.character(id);

        // The region is derived from the character's confirmed position,
        // which cannot change between rebuilds of the pending state.  A
        // different region here is a programmer error.
        if let Some(prev) = ch.prospecting_region {
            assert_eq!(
                prev, region,
                "character {id} is pending to prospect another region"
            );
        }
        ch.prospecting_region = Some(region);

        if ch.waypoints.take().is_some() {
            warn!(id, "pending prospection clears pending waypoints");
        }
    }

    pub fn add_character_mining(&mut self, id: Id, region: RegionId) {
        let ch = self.character(id);

        if ch.prospecting_region.is_some() {
            warn!(id, "pending prospection, cannot mine as well");
            return;
        }
        if ch.waypoints.is_some() {
            warn!(id, "pending waypoints, cannot mine");
            return;
        }

        if let Some(prev) = ch.mining_region {
            assert_eq!(
                prev, region,
                "character {id} is pending to mine another region"
            );
        }
        ch.mining_region = Some(region);
    }

    pub fn add_character_drop(&mut self, id: Id) {
        self.character(id).drop = true;
    }

    pub fn add_character_pickup(&mut self, id: Id) {
        self.character(id).pickup = true;
    }

    pub fn add_enter_building(&mut self, id: Id, building: Id) {
        self.character(id).enter_building = Some(building);
    }

    pub fn add_exit_building(&mut self, id: Id, building: Id) {
        self.character(id).exit_building = Some(building);
    }

    pub fn add_found_building(&mut self, id: Id, kind: &str, rot: u32) {
        let ch = self.character(id);
        // A character founding two buildings in one block is technically
        // possible (found, exit, found again) but not worth predicting.
        if ch.found_building.is_some() {
            warn!(id, "already has a pending found-building move");
            return;
        }
        ch.found_building = Some(json!({
            "type": kind,
            "rotationsteps": rot,
        }));
    }

    pub fn add_character_creation(&mut self, name: &str, faction: Faction) {
        debug!(name, %faction, "pending character creation");
        self.new_characters
            .entry(name.to_string())
            .or_default()
            .push(faction);
    }

    pub fn add_coin_ops(&mut self, name: &str, burnt: Amount, transfers: &BTreeMap<String, Amount>) {
        let acc = self.accounts.entry(name.to_string()).or_default();
        let ops = acc.coin_ops.get_or_insert_with(CoinOps::default);
        ops.burnt += burnt;
        for (recipient, amount) in transfers {
            *ops.transfers.entry(recipient.clone()).or_insert(0) += amount;
        }
    }

    pub fn add_service_op(&mut self, name: &str, op: Value) {
        self.accounts
            .entry(name.to_string())
            .or_default()
            .service_ops
            .push(op);
    }

    pub fn add_dex_op(&mut self, name: &str, op: Value) {
        self.accounts
            .entry(name.to_string())
            .or_default()
            .dex_ops
            .push(op);
    }

    pub fn add_building_config(&mut self, id: Id, config: &BuildingConfig) {
        self.buildings
            .entry(id)
            .or_default()
            .new_config
            .merge_from(config);
    }

    pub fn has_pending_waypoints(&self, id: Id) -> bool {
        self.characters
            .get(&id)
            .and_then(|ch| ch.waypoints.as_ref())
            .map(|wp| !wp.is_empty())
            .unwrap_or(false)
    }

    /// The full preview JSON.
    pub fn to_json(&self) -> Value {
        let characters: Vec<Value> = self
            .characters
            .iter()
            .map(|(id, ch)| {
                let mut obj = Map::new();
                obj.insert("id".to_string(), json!(id));
                if let Some(wp) = &ch.waypoints {
                    let coords: Vec<Value> =
                        wp.iter().map(|c| json!({"x": c.x, "y": c.y})).collect();
                    obj.insert("waypoints".to_string(), Value::Array(coords));
                }
                if let Some(building) = ch.enter_building {
                    let val = if building == EMPTY_ID {
                        Value::Null
                    } else {
                        json!(building)
                    };
                    obj.insert("enterbuilding".to_string(), val);
                }
                if let Some(building) = ch.exit_building {
                    obj.insert("exitbuilding".to_string(), json!({"building": building}));
                }
                obj.insert("drop".to_string(), json!(ch.drop));
                obj.insert("pickup".to_string(), json!(ch.pickup));
                if let Some(region) = ch.prospecting_region {
                    obj.insert("prospecting".to_string(), json!(region));
                }
                if let Some(region) = ch.mining_region {
                    obj.insert("mining".to_string(), json!(region));
                }
                if let Some(fb) = &ch.found_building {
                    obj.insert("foundbuilding".to_string(), fb.clone());
                }
                Value::Object(obj)
            })
            .collect();

        let new_characters: Vec<Value> = self
            .new_characters
            .iter()
            .map(|(name, creations)| {
                let arr: Vec<Value> = creations
                    .iter()
                    .map(|f| json!({"faction": f.as_str()}))
                    .collect();
                json!({"name": name, "creations": arr})
            })
            .collect();

        let buildings: Vec<Value> = self
            .buildings
            .iter()
            .map(|(id, b)| {
                let mut obj = Map::new();
                obj.insert("id".to_string(), json!(id));
                if !b.new_config.is_empty() {
                    let mut cfg = Map::new();
                    if let Some(sf) = b.new_config.service_fee_percent {
                        cfg.insert("servicefee".to_string(), json!(sf));
                    }
                    if let Some(xf) = b.new_config.dex_fee_bps {
                        cfg.insert("dexfee".to_string(), json!(xf as f64 / 100.0));
                    }
                    obj.insert("newconfig".to_string(), Value::Object(cfg));
                }
                Value::Object(obj)
            })
            .collect();

        let accounts: Vec<Value> = self
            .accounts
            .iter()
            .map(|(name, acc)| {
                let mut obj = Map::new();
                obj.insert("name".to_string(), json!(name));
                if let Some(coin) = &acc.coin_ops {
                    obj.insert(
                        "coinops".to_string(),
                        json!({
                            "burnt": coin.burnt,
                            "transfers": coin.transfers,
                        }),
                    );
                }
                if !acc.service_ops.is_empty() {
                    obj.insert("serviceops".to_string(), Value::Array(acc.service_ops.clone()));
                }
                if !acc.dex_ops.is_empty() {
                    obj.insert("dexops".to_string(), Value::Array(acc.dex_ops.clone()));
                }
                Value::Object(obj)
            })
            .collect();

        json!({
            "characters": characters,
            "newcharacters": new_characters,
            "buildings": buildings,
            "accounts": accounts,
        })
    }
}

/// Applies one mempool move to the pending state, validating intents
/// against the confirmed tables.
pub struct PendingStateUpdater<'a, 'c> {
    tables: &'a Tables,
    ctx: &'a Context<'c>,
    state: &'a mut PendingState,
}

impl<'a, 'c> PendingStateUpdater<'a, 'c> {
    pub fn new(tables: &'a Tables, ctx: &'a Context<'c>, state: &'a mut PendingState) -> Self {
        Self { tables, ctx, state }
    }

    /// Processes one pending move.  Unlike confirmed processing, malformed
    /// outer structure is simply ignored here: the mempool may contain moves
    /// of future or foreign formats.
    pub fn process_move(&mut self, entry: &Value) {
        let Some(obj) = entry.as_object() else {
            return;
        };
        let Some(name) = obj.get("name").and_then(|n| n.as_str()) else {
            return;
        };
        let Some(mv) = obj.get("move") else {
            return;
        };

        if !self.tables.accounts.contains(name) {
            // Also triggered by moves registering a fresh account, which is
            // nothing remarkable.
            debug!(name, "pending move for unknown account");
            return;
        }

        let mut paid_to_dev = 0;
        if let Some(out) = obj.get("out").and_then(|o| o.as_object()) {
            for (addr, amount_val) in out {
                if *addr == self.ctx.params().developer_address {
                    paid_to_dev += jsonutil::parse_chain_amount(amount_val).unwrap_or(0);
                }
            }
        }

        self.try_coin_ops(name, mv);
        self.try_dex_ops(name, mv);

        let initialised = self
            .tables
            .accounts
            .read(name, |a| a.faction.is_some())
            .unwrap_or(false);
        if !initialised {
            // Any further action would be invalid; the initialisation move
            // itself is an edge case not worth predicting.
            return;
        }

        self.try_character_updates(name, mv);
        self.try_character_creations(name, mv, paid_to_dev);
        self.try_building_updates(name, mv);
        self.try_service_ops(name, mv);
    }

    fn try_coin_ops(&mut self, name: &str, mv: &Value) {
        let Some(vc) = mv.get("vc").and_then(|v| v.as_object()) else {
            return;
        };

        let mut burnt = 0;
        if let Some(b) = vc.get("b") {
            burnt = jsonutil::parse_coin_amount(b).unwrap_or(0);
        }

        let mut transfers = BTreeMap::new();
        if let Some(t) = vc.get("t").and_then(|t| t.as_object()) {
            for (recipient, amount_val) in t {
                if let Some(amount) = jsonutil::parse_coin_amount(amount_val) {
                    if amount > 0 {
                        transfers.insert(recipient.clone(), amount);
                    }
                }
            }
        }

        if burnt > 0 || !transfers.is_empty() {
            self.state.add_coin_ops(name, burnt, &transfers);
        }
    }

    fn try_character_creations(&mut self, name: &str, mv: &Value, paid_to_dev: Amount) {
        let Some(creations) = mv.get("nc").and_then(|nc| nc.as_array()) else {
            return;
        };
        let faction = self
            .tables
            .accounts
            .read(name, |a| a.faction)
            .unwrap_or(None);

        let mut remaining = paid_to_dev;
        for creation in creations {
            let Some(obj) = creation.as_object() else {
                continue;
            };
            let requested = obj
                .get("faction")
                .and_then(|f| f.as_str())
                .and_then(Faction::from_move_str);
            let f = match (requested, faction) {
                (Some(f), Some(af)) if f == af => f,
                (None, Some(af)) => af,
                _ => continue,
            };

            if remaining < self.ctx.params().character_cost {
                continue;
            }
            remaining -= self.ctx.params().character_cost;
            self.state.add_character_creation(name, f);
        }
    }

    fn try_character_updates(&mut self, name: &str, mv: &Value) {
        let Some(upd) = mv.get("c").and_then(|c| c.as_object()) else {
            return;
        };

        let mut ids: Vec<(Id, &Value)> = Vec::new();
        for (key, value) in upd {
            if let Some(id) = jsonutil::parse_id_string(key) {
                ids.push((id, value));
            }
        }
        ids.sort_by_key(|(id, _)| *id);

        for (id, value) in ids {
            let Some(upd) = value.as_object() else {
                continue;
            };
            let owned = self
                .tables
                .characters
                .read(id, |r| r.owner == name)
                .unwrap_or(false);
            if !owned {
                continue;
            }
            self.update_character(id, upd);
        }
    }

    fn update_character(&mut self, id: Id, upd: &Map<String, Value>) {
        let (busy, in_building, building_id, pos, can_prospect, can_mine) = self
            .tables
            .characters
            .read(id, |r| {
                (
                    r.busy,
                    r.is_in_building(),
                    r.building_id,
                    r.pos,
                    r.proto.prospecting_blocks.is_some(),
                    r.proto.mining.is_some(),
                )
            })
            .expect("ownership checked");

        if let Some(prospect) = upd.get("prospect") {
            let valid = prospect.as_object().map(|o| o.is_empty()).unwrap_or(false);
            if valid && !busy && !in_building && can_prospect {
                let region = self.ctx.map().region_id(pos);
                self.state.add_character_prospecting(id, region);
            }
        }

        if let Some(mine) = upd.get("mine") {
            let valid = mine.as_object().map(|o| o.is_empty()).unwrap_or(false);
            if valid && !busy && !in_building && can_mine {
                let region = self.ctx.map().region_id(pos);
                self.state.add_character_mining(id, region);
            }
        }

        if let Some(pu) = upd.get("pu") {
            let items = pu
                .as_object()
                .and_then(|o| o.get("f"))
                .and_then(jsonutil::parse_fungible_map);
            if let Some(items) = items {
                let in_foundation = in_building
                    && self
                        .tables
                        .buildings
                        .read(building_id, |b| b.proto.foundation)
                        .unwrap_or(false);
                if !items.is_empty() && !in_foundation {
                    self.state.add_character_pickup(id);
                } else if in_foundation {
                    warn!(id, "ignoring pending pickup inside a foundation");
                }
            }
        }
        if let Some(drop_val) = upd.get("drop") {
            let items = drop_val
                .as_object()
                .and_then(|o| o.get("f"))
                .and_then(jsonutil::parse_fungible_map);
            if matches!(items, Some(ref i) if !i.is_empty()) {
                self.state.add_character_drop(id);
            }
        }

        if let Some(wp) = upd.get("wp") {
            if let Some(coords) = jsonutil::parse_coord_array(wp) {
                if !busy && !in_building {
                    self.state.add_character_waypoints(id, coords);
                }
            }
        }

        if let Some(eb) = upd.get("eb") {
            if eb.is_null() {
                self.state.add_enter_building(id, EMPTY_ID);
            } else if let Some(building) = jsonutil::parse_id(eb) {
                if self.tables.buildings.contains(building) && !in_building && !busy {
                    self.state.add_enter_building(id, building);
                }
            }
        }
        if let Some(xb) = upd.get("xb") {
            let valid = xb.as_object().map(|o| o.is_empty()).unwrap_or(false);
            if valid && in_building && !busy {
                self.state.add_exit_building(id, building_id);
            }
        }

        if let Some(fb) = upd.get("fb") {
            let parsed = (|| -> Option<(String, u32)> {
                let obj = fb.as_object()?;
                let kind = obj.get("t")?.as_str()?.to_string();
                let rot = obj.get("rot")?.as_u64()?;
                if rot > 5 || obj.len() != 2 {
                    return None;
                }
                Some((kind, rot as u32))
            })();
            if let Some((kind, rot)) = parsed {
                let known = self
                    .ctx
                    .params()
                    .building(&kind)
                    .map(|b| b.may_found)
                    .unwrap_or(false);
                if known && !busy && !in_building {
                    self.state.add_found_building(id, &kind, rot);
                }
            }
        }
    }

    fn try_building_updates(&mut self, name: &str, mv: &Value) {
        let Some(upd) = mv.get("b").and_then(|b| b.as_object()) else {
            return;
        };

        for (key, value) in upd {
            let Some(id) = jsonutil::parse_id_string(key) else {
                continue;
            };
            let owned = self
                .tables
                .buildings
                .read(id, |b| b.faction != Faction::Ancient && b.owner == name)
                .unwrap_or(false);
            if !owned {
                continue;
            }
            let Some(upd) = value.as_object() else {
                continue;
            };

            let mut config = BuildingConfig::default();
            if let Some(sf) = upd.get("sf").and_then(|v| v.as_u64()) {
                if sf <= 1_000 {
                    config.service_fee_percent = Some(sf as u32);
                }
            }
            if let Some(xf) = upd.get("xf").and_then(|v| v.as_u64()) {
                if xf <= 10_000 {
                    config.dex_fee_bps = Some(xf as u32);
                }
            }
            if !config.is_empty() {
                self.state.add_building_config(id, &config);
            }
        }
    }

    fn try_service_ops(&mut self, name: &str, mv: &Value) {
        let Some(ops) = mv.get("s").and_then(|s| s.as_array()) else {
            return;
        };
        for op_val in ops {
            if let Some(op) = ServiceOp::parse(op_val) {
                if op.validate(name, self.tables, self.ctx).is_ok() {
                    self.state.add_service_op(name, op.pending_json());
                }
            }
        }
    }

    fn try_dex_ops(&mut self, name: &str, mv: &Value) {
        let Some(ops) = mv.get("x").and_then(|x| x.as_array()) else {
            return;
        };
        for op_val in ops {
            if let Some(op) = DexOp::parse(op_val) {
                if op.validate(name, self.tables, self.ctx).is_ok() {
                    self.state.add_dex_op(name, op.pending_json());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{BaseMap, GridMap};
    use crate::params::{Chain, Params};

    struct Fixture {
        params: Params,
        map: GridMap,
        tables: Tables,
        state: PendingState,
    }

    impl Fixture {
        fn new() -> Self {
            let fx = Self {
                params: Params::new(Chain::Regtest),
                map: GridMap::default(),
                tables: Tables::new(),
                state: PendingState::new(),
            };
            fx.tables.accounts.create("domob").set_faction(Faction::Red);
            let mut c = fx.tables.characters.create(1, "domob", Faction::Red);
            c.set_pos(Hex::new(5, 5));
            c.proto_mut().prospecting_blocks = Some(10);
            c.proto_mut().mining = Some(crate::schema::character::Mining {
                rate_min: 1,
                rate_max: 1,
                active: false,
            });
            drop(c);
            fx
        }

        fn process(&mut self, entry: Value) {
            let ctx = Context::new(&self.params, &self.map, 42, 0);
            let mut updater = PendingStateUpdater::new(&self.tables, &ctx, &mut self.state);
            updater.process_move(&entry);
        }

        fn region(&self) -> RegionId {
            self.map.region_id(Hex::new(5, 5))
        }
    }

    #[test]
    fn clear_resets_everything() {
        let mut state = PendingState::new();
        state.add_character_creation("domob", Faction::Red);
        state.add_character_drop(4);
        state.clear();
        assert_eq!(state.to_json(), PendingState::new().to_json());
    }

    #[test]
    fn waypoints_and_mining_are_exclusive() {
        let mut state = PendingState::new();

        state.add_character_mining(1, 42);
        state.add_character_waypoints(1, vec![Hex::new(1, 0)]);
        let js = state.to_json();
        let ch = &js["characters"][0];
        assert!(ch.get("mining").is_none());
        assert!(ch.get("waypoints").is_some());

        // And the other way round: waypoints first block mining.
        state.clear();
        state.add_character_waypoints(1, vec![Hex::new(1, 0)]);
        state.add_character_mining(1, 42);
        let js = state.to_json();
        assert!(js["characters"][0].get("mining").is_none());
    }

    #[test]
    fn prospecting_beats_waypoints() {
        let mut state = PendingState::new();
        state.add_character_waypoints(1, vec![Hex::new(1, 0)]);
        state.add_character_prospecting(1, 42);
        state.add_character_waypoints(1, vec![Hex::new(2, 0)]);

        let js = state.to_json();
        let ch = &js["characters"][0];
        assert_eq!(ch["prospecting"], json!(42));
        assert!(ch.get("waypoints").is_none());
    }

    #[test]
    #[should_panic(expected = "pending to prospect another region")]
    fn prospecting_two_regions_is_a_bug() {
        let mut state = PendingState::new();
        state.add_character_prospecting(1, 42);
        state.add_character_prospecting(1, 43);
    }

    #[test]
    fn json_is_sorted_and_grouped() {
        let mut state = PendingState::new();
        state.add_character_drop(7);
        state.add_character_drop(2);
        state.add_character_creation("zed", Faction::Blue);
        state.add_character_creation("abe", Faction::Red);
        state.add_character_creation("zed", Faction::Blue);

        let js = state.to_json();
        assert_eq!(js["characters"][0]["id"], json!(2));
        assert_eq!(js["characters"][1]["id"], json!(7));

        assert_eq!(js["newcharacters"][0]["name"], json!("abe"));
        assert_eq!(js["newcharacters"][1]["name"], json!("zed"));
        assert_eq!(
            js["newcharacters"][1]["creations"],
            json!([{"faction": "b"}, {"faction": "b"}])
        );
    }

    #[test]
    fn updater_validates_ownership_and_state() {
        let mut fx = Fixture::new();

        // Unknown account: ignored entirely.
        fx.process(json!({"name": "ghost", "move": {"c": {"1": {"drop": {"f": {"foo": 1}}}}}}));
        // Foreign character: ignored.
        fx.tables.accounts.create("andy").set_faction(Faction::Red);
        fx.process(json!({"name": "andy", "move": {"c": {"1": {"drop": {"f": {"foo": 1}}}}}}));
        assert_eq!(fx.state.to_json()["characters"], json!([]));

        fx.process(json!({"name": "domob", "move": {"c": {"1": {
            "drop": {"f": {"foo": 1}},
            "prospect": {}
        }}}}));
        let js = fx.state.to_json();
        assert_eq!(js["characters"][0]["id"], json!(1));
        assert_eq!(js["characters"][0]["drop"], json!(true));
        assert_eq!(js["characters"][0]["prospecting"], json!(fx.region()));
    }

    #[test]
    fn updater_mirrors_real_add_sequence() {
        // The round-trip law: applying adds through the updater equals
        // applying the same adds on a fresh state.
        let mut fx = Fixture::new();
        fx.process(json!({"name": "domob", "move": {"c": {"1": {
            "wp": [{"x": 1, "y": 0}]
        }}}}));
        let via_updater = fx.state.to_json();

        let mut direct = PendingState::new();
        direct.add_character_waypoints(1, vec![Hex::new(1, 0)]);
        assert_eq!(via_updater, direct.to_json());
    }

    #[test]
    fn busy_characters_get_no_pending_intents() {
        let mut fx = Fixture::new();
        fx.tables.characters.get(1).unwrap().set_busy(true);

        fx.process(json!({"name": "domob", "move": {"c": {"1": {
            "wp": [{"x": 1, "y": 0}],
            "prospect": {},
            "mine": {}
        }}}}));
        assert_eq!(fx.state.to_json()["characters"], json!([]));
    }
}
