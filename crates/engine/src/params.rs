//! Immutable per-chain game parameters.
//!
//! The parameter block bundles all balancing values together with the static
//! item, building and resource registries.  Values differ between the main,
//! test and regtest chains; game logic receives the block through the
//! [`crate::context::Context`] and treats it as opaque configuration.

use std::collections::BTreeMap;

use crate::faction::Faction;
use crate::geometry::Hex;

/// Currency amount in minor units ("coins" scaled by [`COIN`]).
pub type Amount = i64;

/// Item quantity.
pub type Quantity = i64;

/// Minor units per whole coin, used when parsing chain-value JSON.
pub const COIN: Amount = 100_000_000;

/// Largest quantity accepted in any single move, keeping all products of
/// quantity and price comfortably inside `i64`.
pub const MAX_QUANTITY: Quantity = 1_000_000_000;

/// The chain a game instance runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Chain {
    Main,
    Test,
    Regtest,
}

/// Static data for one item type.
#[derive(Clone, Debug)]
pub struct ItemData {
    /// Cargo units one piece occupies.
    pub space: u32,
    /// Construction recipe, for items that can be built from a blueprint.
    pub construction: Option<ConstructionData>,
    /// Set when the item is a blueprint; names the item it constructs.
    pub blueprint: Option<BlueprintData>,
}

#[derive(Clone, Debug)]
pub struct ConstructionData {
    /// Blocks needed per copy.
    pub blocks: u32,
    /// Base service cost per copy, before the building owner fee.
    pub cost: Amount,
    /// Input resources consumed per copy.
    pub inputs: BTreeMap<String, Quantity>,
}

#[derive(Clone, Debug)]
pub struct BlueprintData {
    /// The item this blueprint constructs.
    pub for_item: String,
    /// Originals can be copied; copies are consumed on construction.
    pub original: bool,
}

/// Static data for one building type.
#[derive(Clone, Debug)]
pub struct BuildingData {
    /// Occupied tiles relative to the centre, before rotation.
    pub shape: Vec<Hex>,
    /// Materials a character must carry (and consume) to place the
    /// foundation.
    pub foundation_cost: BTreeMap<String, Quantity>,
    /// Materials the construction inventory must hold for the full build.
    pub construction_cost: BTreeMap<String, Quantity>,
    /// Blocks from construction start to the finished building.
    pub construction_blocks: u32,
    /// Whether players may found this type (Ancient-only types may not).
    pub may_found: bool,
}

/// One stage of the coin burnsale.
#[derive(Clone, Copy, Debug)]
pub struct BurnsaleStage {
    /// Coins sold in this stage.
    pub amount_sold: Amount,
    /// Price in burnt chain satoshi per coin.
    pub price_sat: Amount,
}

/// One prospecting prize tier.
#[derive(Clone, Debug)]
pub struct PrizeData {
    pub name: String,
    /// How many exist in total.
    pub number: u32,
    /// Inverse probability: a prize is won with chance `1 / probability`.
    pub probability: u32,
}

/// One minable resource type with its prospecting odds and yield.
#[derive(Clone, Debug)]
pub struct ResourceData {
    pub name: String,
    /// Relative weight in the prospection roll.
    pub weight: u32,
    pub yield_min: Quantity,
    pub yield_max: Quantity,
}

/// The full immutable parameter block.
#[derive(Clone, Debug)]
pub struct Params {
    chain: Chain,

    pub character_cost: Amount,
    pub character_limit: u32,
    pub damage_list_age: u64,
    pub building_update_delay: u64,
    pub prospection_expiry: u64,
    pub prospecting_blocks: u32,
    pub blocked_step_patience: u32,
    pub min_speed: u32,
    pub dex_base_fee_bps: u32,
    pub armour_repair_hp_per_block: u32,
    pub armour_repair_cost_millis: Amount,
    pub bp_copy_blocks: u32,
    pub bp_copy_cost: Amount,
    pub spawn_radius: u32,
    pub spawn_character_speed: u32,
    pub spawn_character_cargo: u32,
    pub developer_address: String,

    burnsale_stages: Vec<BurnsaleStage>,
    prizes: Vec<PrizeData>,
    resources: Vec<ResourceData>,
    items: BTreeMap<String, ItemData>,
    buildings: BTreeMap<String, BuildingData>,
}

impl Params {
    pub fn new(chain: Chain) -> Self {
        let mut res = Self {
            chain,
            character_cost: 5 * COIN,
            character_limit: 20,
            damage_list_age: 100,
            building_update_delay: 10,
            prospection_expiry: 100,
            prospecting_blocks: 10,
            blocked_step_patience: 10,
            min_speed: 1,
            dex_base_fee_bps: 1_000,
            armour_repair_hp_per_block: 100,
            armour_repair_cost_millis: 100,
            bp_copy_blocks: 10,
            bp_copy_cost: 10,
            spawn_radius: 50,
            spawn_character_speed: 750,
            spawn_character_cargo: 1_000,
            developer_address: "SkXw615KLevE23LVRVZVxGeqxadRGyiFW4".to_string(),
            burnsale_stages: vec![
                BurnsaleStage {
                    amount_sold: 10_000_000 * COIN,
                    price_sat: 10_000,
                },
                BurnsaleStage {
                    amount_sold: 10_000_000 * COIN,
                    price_sat: 20_000,
                },
                BurnsaleStage {
                    amount_sold: 10_000_000 * COIN,
                    price_sat: 40_000,
                },
            ],
            prizes: vec![
                PrizeData {
                    name: "gold".to_string(),
                    number: 3,
                    probability: 2_000,
                },
                PrizeData {
                    name: "silver".to_string(),
                    number: 1_000,
                    probability: 10,
                },
                PrizeData {
                    name: "bronze".to_string(),
                    number: 1,
                    probability: 1,
                },
            ],
            resources: Vec::new(),
            items: BTreeMap::new(),
            buildings: BTreeMap::new(),
        };

        res.register_resources();
        res.register_items();
        res.register_buildings();

        if chain == Chain::Main {
            res.character_limit = 50;
        }

        res
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// Whether god-mode style balance gifts are allowed (never on mainnet).
    pub fn god_mode(&self) -> bool {
        self.chain == Chain::Regtest
    }

    /// Spawn disk for a faction: centre and L1 radius.
    pub fn spawn_area(&self, f: Faction) -> (Hex, u32) {
        let centre = match f {
            Faction::Red => Hex::new(-100, 0),
            Faction::Green => Hex::new(100, -100),
            Faction::Blue => Hex::new(0, 100),
            Faction::Ancient => panic!("Ancient faction has no spawn area"),
        };
        (centre, self.spawn_radius)
    }

    pub fn item(&self, name: &str) -> Option<&ItemData> {
        self.items.get(name)
    }

    /// Looks up item data, asserting the item exists.
    pub fn item_checked(&self, name: &str) -> &ItemData {
        self.item(name)
            .unwrap_or_else(|| panic!("item {name} is not defined"))
    }

    pub fn building(&self, kind: &str) -> Option<&BuildingData> {
        self.buildings.get(kind)
    }

    pub fn building_checked(&self, kind: &str) -> &BuildingData {
        self.building(kind)
            .unwrap_or_else(|| panic!("building type {kind} is not defined"))
    }

    pub fn resources(&self) -> &[ResourceData] {
        &self.resources
    }

    pub fn prizes(&self) -> &[PrizeData] {
        &self.prizes
    }

    pub fn burnsale_stages(&self) -> &[BurnsaleStage] {
        &self.burnsale_stages
    }

    /// Blocks needed to copy one blueprint of the given original.
    pub fn bp_copy_blocks(&self, _original: &str) -> u32 {
        self.bp_copy_blocks
    }

    /// Blocks needed to construct one unit of the given item.
    pub fn construction_blocks(&self, output: &str) -> u32 {
        self.item_checked(output)
            .construction
            .as_ref()
            .map(|c| c.blocks)
            .unwrap_or(0)
    }

    fn register_resources(&mut self) {
        // Falling weights so early letters are more common, mirroring how
        // prospection odds favour basic ores.
        for (i, letter) in "abcdefghi".chars().enumerate() {
            self.resources.push(ResourceData {
                name: format!("raw {letter}"),
                weight: (9 - i) as u32,
                yield_min: 100,
                yield_max: 1_000,
            });
            self.items.insert(
                format!("raw {letter}"),
                ItemData {
                    space: 10,
                    construction: None,
                    blueprint: None,
                },
            );
        }
    }

    fn register_items(&mut self) {
        let simple = |space| ItemData {
            space,
            construction: None,
            blueprint: None,
        };

        self.items.insert("foo".to_string(), simple(10));
        self.items.insert("bar".to_string(), simple(20));
        self.items.insert("zerospace".to_string(), simple(0));

        for prize in &self.prizes {
            self.items.insert(format!("{} prize", prize.name), simple(0));
        }

        self.items.insert(
            "sword".to_string(),
            ItemData {
                space: 20,
                construction: Some(ConstructionData {
                    blocks: 10,
                    cost: 100,
                    inputs: BTreeMap::from([("raw a".to_string(), 5)]),
                }),
                blueprint: None,
            },
        );
        self.items.insert(
            "sword bpo".to_string(),
            ItemData {
                space: 1,
                construction: None,
                blueprint: Some(BlueprintData {
                    for_item: "sword".to_string(),
                    original: true,
                }),
            },
        );
        self.items.insert(
            "sword bpc".to_string(),
            ItemData {
                space: 1,
                construction: None,
                blueprint: Some(BlueprintData {
                    for_item: "sword".to_string(),
                    original: false,
                }),
            },
        );
    }

    fn register_buildings(&mut self) {
        self.buildings.insert(
            "hut".to_string(),
            BuildingData {
                shape: vec![Hex::new(0, 0)],
                foundation_cost: BTreeMap::from([("foo".to_string(), 10)]),
                construction_cost: BTreeMap::from([("foo".to_string(), 50)]),
                construction_blocks: 20,
                may_found: true,
            },
        );
        self.buildings.insert(
            "workshop".to_string(),
            BuildingData {
                shape: vec![Hex::new(0, 0), Hex::new(1, 0), Hex::new(0, 1)],
                foundation_cost: BTreeMap::from([("foo".to_string(), 20)]),
                construction_cost: BTreeMap::from([
                    ("foo".to_string(), 100),
                    ("bar".to_string(), 20),
                ]),
                construction_blocks: 50,
                may_found: true,
            },
        );
        self.buildings.insert(
            "obelisk".to_string(),
            BuildingData {
                shape: vec![Hex::new(0, 0)],
                foundation_cost: BTreeMap::new(),
                construction_cost: BTreeMap::new(),
                construction_blocks: 0,
                may_found: false,
            },
        );
    }
}
