//! Service operations performed inside finished buildings.
//!
//! Services charge their base cost upfront (destroyed) plus the building
//! owner's configured fee percentage (credited to the owner) and schedule an
//! ongoing operation for the actual work.  The fee in effect is the config
//! at execution time; pending config updates only count once their delayed
//! operation has completed.

use serde_json::{json, Value};
use skarn_store::Id;
use tracing::info;

use crate::context::Context;
use crate::faction::Faction;
use crate::jsonutil;
use crate::params::{Amount, Quantity};
use crate::schema::ongoing::{service_fee, OngoingOp};
use crate::schema::Tables;

/// Why a service operation cannot be executed.  User-input errors: logged
/// and dropped at the call site, never fatal.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("building {0} does not exist")]
    UnknownBuilding(Id),

    #[error("building {0} is still a foundation")]
    InFoundation(Id),

    #[error("balance {balance} cannot cover the cost of {cost}")]
    InsufficientBalance { balance: Amount, cost: Amount },

    #[error("character {0} does not exist")]
    UnknownCharacter(Id),

    #[error("character {character} belongs to {owner}")]
    ForeignCharacter { character: Id, owner: String },

    #[error("character {0} is not inside the building")]
    NotInsideBuilding(Id),

    #[error("character {0} is busy")]
    CharacterBusy(Id),

    #[error("character {0} has full armour")]
    NothingToRepair(Id),

    #[error("{0} is not a usable blueprint")]
    NotABlueprint(String),

    #[error("{0} cannot be constructed")]
    NotConstructable(String),

    #[error("not enough {0} in the building inventory")]
    MissingItems(String),
}

/// One parsed service operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServiceOp {
    /// Repair a character's armour inside the building.
    ArmourRepair { building: Id, character: Id },
    /// Copy a blueprint original.
    BlueprintCopy {
        building: Id,
        original: String,
        num: Quantity,
    },
    /// Construct items from a blueprint.
    Construct {
        building: Id,
        blueprint: String,
        num: Quantity,
    },
}

impl ServiceOp {
    /// Parses one entry of the `s` move array.
    pub fn parse(data: &Value) -> Option<ServiceOp> {
        let obj = data.as_object()?;
        let building = jsonutil::parse_id(obj.get("b")?)?;

        match obj.get("t")?.as_str()? {
            "fix" => {
                if obj.len() != 3 {
                    return None;
                }
                let character = jsonutil::parse_id(obj.get("c")?)?;
                Some(ServiceOp::ArmourRepair {
                    building,
                    character,
                })
            }
            "cp" => {
                if obj.len() != 4 {
                    return None;
                }
                let original = obj.get("i")?.as_str()?.to_string();
                let num = jsonutil::parse_quantity(obj.get("n")?)?;
                Some(ServiceOp::BlueprintCopy {
                    building,
                    original,
                    num,
                })
            }
            "bld" => {
                if obj.len() != 4 {
                    return None;
                }
                let blueprint = obj.get("i")?.as_str()?.to_string();
                let num = jsonutil::parse_quantity(obj.get("n")?)?;
                Some(ServiceOp::Construct {
                    building,
                    blueprint,
                    num,
                })
            }
            _ => None,
        }
    }

    fn building(&self) -> Id {
        match self {
            ServiceOp::ArmourRepair { building, .. }
            | ServiceOp::BlueprintCopy { building, .. }
            | ServiceOp::Construct { building, .. } => *building,
        }
    }

    /// The base cost of the operation, before the owner fee.
    fn base_cost(&self, tables: &Tables, ctx: &Context) -> Amount {
        match self {
            ServiceOp::ArmourRepair { character, .. } => {
                let missing = tables
                    .characters
                    .read(*character, |r| {
                        r.regen.max_armour.saturating_sub(r.hp.armour)
                    })
                    .unwrap_or(0) as Amount;
                let total = missing * ctx.params().armour_repair_cost_millis;
                (total + 999) / 1_000
            }
            ServiceOp::BlueprintCopy { num, .. } => num * ctx.params().bp_copy_cost,
            ServiceOp::Construct { blueprint, num, .. } => {
                let per_item = ctx
                    .params()
                    .item(blueprint)
                    .and_then(|bp| bp.blueprint.as_ref())
                    .and_then(|bp| ctx.params().item(&bp.for_item))
                    .and_then(|item| item.construction.as_ref())
                    .map(|c| c.cost)
                    .unwrap_or(0);
                per_item * num
            }
        }
    }

    /// Full cost including the owner fee under the current building config.
    pub fn total_cost(&self, tables: &Tables, ctx: &Context) -> Amount {
        let base = self.base_cost(tables, ctx);
        let fee_percent = tables
            .buildings
            .read(self.building(), |b| {
                b.proto.config.service_fee_percent.unwrap_or(0)
            })
            .unwrap_or(0);
        base + service_fee(base, fee_percent)
    }

    /// Checks whether the operation can be executed for the account.
    pub fn validate(
        &self,
        account: &str,
        tables: &Tables,
        ctx: &Context,
    ) -> Result<(), ServiceError> {
        let building = self.building();
        match tables.buildings.read(building, |b| b.proto.foundation) {
            None => return Err(ServiceError::UnknownBuilding(building)),
            Some(true) => return Err(ServiceError::InFoundation(building)),
            Some(false) => (),
        }

        let balance = tables.accounts.read(account, |a| a.balance).unwrap_or(0);
        let cost = self.total_cost(tables, ctx);
        if balance < cost {
            return Err(ServiceError::InsufficientBalance { balance, cost });
        }

        match self {
            ServiceOp::ArmourRepair {
                building,
                character,
            } => {
                let Some((owner, inside, busy, missing)) = tables.characters.read(*character, |r| {
                    (
                        r.owner.clone(),
                        r.building_id == *building,
                        r.busy,
                        r.regen.max_armour.saturating_sub(r.hp.armour),
                    )
                }) else {
                    return Err(ServiceError::UnknownCharacter(*character));
                };
                if owner != account {
                    return Err(ServiceError::ForeignCharacter {
                        character: *character,
                        owner,
                    });
                }
                if !inside {
                    return Err(ServiceError::NotInsideBuilding(*character));
                }
                if busy {
                    return Err(ServiceError::CharacterBusy(*character));
                }
                if missing == 0 {
                    return Err(ServiceError::NothingToRepair(*character));
                }
                Ok(())
            }

            ServiceOp::BlueprintCopy {
                building,
                original,
                ..
            } => {
                let is_original = ctx
                    .params()
                    .item(original)
                    .and_then(|i| i.blueprint.as_ref())
                    .map(|bp| bp.original)
                    .unwrap_or(false);
                if !is_original {
                    return Err(ServiceError::NotABlueprint(original.clone()));
                }
                if tables.building_inv.count_in(*building, account, original) < 1 {
                    return Err(ServiceError::MissingItems(original.clone()));
                }
                Ok(())
            }

            ServiceOp::Construct {
                building,
                blueprint,
                num,
            } => {
                let Some(bp) = ctx.params().item(blueprint).and_then(|i| i.blueprint.clone())
                else {
                    return Err(ServiceError::NotABlueprint(blueprint.clone()));
                };
                let Some(construction) = ctx
                    .params()
                    .item(&bp.for_item)
                    .and_then(|i| i.construction.clone())
                else {
                    return Err(ServiceError::NotConstructable(bp.for_item.clone()));
                };

                let needed_bps = if bp.original { 1 } else { *num };
                if tables.building_inv.count_in(*building, account, blueprint) < needed_bps {
                    return Err(ServiceError::MissingItems(blueprint.clone()));
                }

                for (input, per_item) in &construction.inputs {
                    let needed = per_item * num;
                    if tables.building_inv.count_in(*building, account, input) < needed {
                        return Err(ServiceError::MissingItems(input.clone()));
                    }
                }
                Ok(())
            }
        }
    }

    /// Executes a validated operation: charges the cost, consumes inputs and
    /// schedules the ongoing work.
    pub fn execute(&self, account: &str, tables: &Tables, ctx: &Context) {
        let building = self.building();
        let base = self.base_cost(tables, ctx);
        let total = self.total_cost(tables, ctx);
        let owner_fee = total - base;

        {
            let mut a = tables.accounts.get(account).expect("validated account");
            a.add_balance(-total);
        }
        tables.money.burn_fee(base);
        if owner_fee > 0 {
            let (owner, faction) = tables
                .buildings
                .read(building, |b| (b.owner.clone(), b.faction))
                .expect("validated building");
            assert_ne!(faction, Faction::Ancient, "Ancient building charged a fee");
            let mut a = tables
                .accounts
                .get(&owner)
                .unwrap_or_else(|| tables.accounts.create(&owner));
            a.add_balance(owner_fee);
        }

        info!(account, building, base, owner_fee, "starting service operation");

        match self {
            ServiceOp::ArmourRepair {
                building: _,
                character,
            } => {
                let missing = tables
                    .characters
                    .read(*character, |r| {
                        r.regen.max_armour.saturating_sub(r.hp.armour)
                    })
                    .expect("validated character") as u64;
                let blocks =
                    missing.div_ceil(ctx.params().armour_repair_hp_per_block as u64).max(1);

                let mut op =
                    tables
                        .ongoings
                        .create(tables.ids.next_id(), ctx.height(), OngoingOp::ArmourRepair);
                op.set_height(ctx.height() + blocks);
                op.set_character_id(*character);
                let op_id = op.id();
                drop(op);

                let mut c = tables.characters.get(*character).expect("validated character");
                c.set_busy(true);
                c.proto_mut().ongoing = op_id;
            }

            ServiceOp::BlueprintCopy {
                building,
                original,
                num,
            } => {
                tables
                    .building_inv
                    .get(*building, account)
                    .payload_mut()
                    .add(original, -1);

                let copy_type = ctx
                    .params()
                    .item(original)
                    .and_then(|i| i.blueprint.as_ref())
                    .map(|bp| format!("{} bpc", bp.for_item))
                    .expect("validated original");

                let mut op = tables.ongoings.create(
                    tables.ids.next_id(),
                    ctx.height(),
                    OngoingOp::BlueprintCopy {
                        account: account.to_string(),
                        original_type: original.clone(),
                        copy_type,
                        num_copies: *num,
                    },
                );
                op.set_height(ctx.height() + ctx.params().bp_copy_blocks(original) as u64);
                op.set_building_id(*building);
            }

            ServiceOp::Construct {
                building,
                blueprint,
                num,
            } => {
                let bp = ctx
                    .params()
                    .item(blueprint)
                    .and_then(|i| i.blueprint.clone())
                    .expect("validated blueprint");
                let construction = ctx
                    .params()
                    .item(&bp.for_item)
                    .and_then(|i| i.construction.clone())
                    .expect("validated construction");

                {
                    let mut inv = tables.building_inv.get(*building, account);
                    let consumed_bps = if bp.original { 1 } else { *num };
                    inv.payload_mut().add(blueprint, -consumed_bps);
                    for (input, per_item) in &construction.inputs {
                        inv.payload_mut().add(input, -(per_item * num));
                    }
                }

                let original_type = bp.original.then(|| blueprint.clone());
                let blocks = construction.blocks as u64;
                // From an original the items are delivered one by one; from
                // copies the whole batch completes together.
                let first_due = if original_type.is_some() {
                    ctx.height() + blocks
                } else {
                    ctx.height() + blocks * *num as u64
                };

                let mut op = tables.ongoings.create(
                    tables.ids.next_id(),
                    ctx.height(),
                    OngoingOp::ItemConstruction {
                        account: account.to_string(),
                        output_type: bp.for_item.clone(),
                        num_items: *num,
                        original_type,
                    },
                );
                op.set_height(first_due);
                op.set_building_id(*building);
            }
        }
    }

    /// The JSON form used in the pending-state projection.
    pub fn pending_json(&self) -> Value {
        match self {
            ServiceOp::ArmourRepair {
                building,
                character,
            } => json!({
                "op": "fix",
                "building": building,
                "character": character,
            }),
            ServiceOp::BlueprintCopy {
                building,
                original,
                num,
            } => json!({
                "op": "bpcopy",
                "building": building,
                "original": original,
                "num": num,
            }),
            ServiceOp::Construct {
                building,
                blueprint,
                num,
            } => json!({
                "op": "construct",
                "building": building,
                "blueprint": blueprint,
                "num": num,
            }),
        }
    }
}
