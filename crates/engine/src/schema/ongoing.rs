//! Ongoing multi-block operations.

use serde::{Deserialize, Serialize};
use skarn_store::{Handle, Id, Table, EMPTY_ID};

use crate::params::{Amount, Quantity};
use crate::schema::building::BuildingConfig;
use crate::schema::TransactionBoundary;

/// The operation-specific payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OngoingOp {
    Prospection,
    ArmourRepair,
    BlueprintCopy {
        account: String,
        original_type: String,
        copy_type: String,
        num_copies: Quantity,
    },
    ItemConstruction {
        account: String,
        output_type: String,
        num_items: Quantity,
        /// Blueprint original held by the operation, returned on completion.
        original_type: Option<String>,
    },
    BuildingConstruction,
    BuildingUpdate {
        new_config: BuildingConfig,
    },
}

/// One ongoing-operation row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OngoingRow {
    pub start_height: u64,
    /// Height at which the operation next needs processing.
    pub height: u64,
    /// Associated character (or `EMPTY_ID`).
    pub character_id: Id,
    /// Associated building (or `EMPTY_ID`).
    pub building_id: Id,
    pub op: OngoingOp,
}

pub struct Ongoing {
    id: Id,
    handle: Handle<Id, OngoingRow>,
}

impl Ongoing {
    pub fn id(&self) -> Id {
        self.id
    }

    pub fn row(&self) -> &OngoingRow {
        &self.handle
    }

    pub fn height(&self) -> u64 {
        self.handle.height
    }

    pub fn set_height(&mut self, height: u64) {
        self.handle.fields_mut().height = height;
    }

    pub fn character_id(&self) -> Id {
        self.handle.character_id
    }

    pub fn set_character_id(&mut self, id: Id) {
        self.handle.fields_mut().character_id = id;
    }

    pub fn building_id(&self) -> Id {
        self.handle.building_id
    }

    pub fn set_building_id(&mut self, id: Id) {
        self.handle.fields_mut().building_id = id;
    }

    pub fn op(&self) -> &OngoingOp {
        &self.handle.op
    }

    pub fn op_mut(&mut self) -> &mut OngoingOp {
        &mut self.handle.payload_mut().op
    }

    pub fn delete(self) {
        self.handle.delete();
    }

    /// The externally visible end height: operations processed per unit
    /// (copies, items) re-schedule themselves, so the final height lies
    /// beyond the next processing height.
    pub fn end_height(&self, per_unit_blocks: impl Fn(&OngoingOp) -> u64) -> u64 {
        let extra = match &self.handle.op {
            OngoingOp::BlueprintCopy { num_copies, .. } => {
                (num_copies - 1).max(0) as u64 * per_unit_blocks(&self.handle.op)
            }
            OngoingOp::ItemConstruction {
                num_items,
                original_type: Some(_),
                ..
            } => (num_items - 1).max(0) as u64 * per_unit_blocks(&self.handle.op),
            _ => 0,
        };
        self.handle.height + extra
    }
}

#[derive(Clone)]
pub struct OngoingsTable {
    table: Table<Id, OngoingRow>,
}

impl OngoingsTable {
    pub fn new() -> Self {
        Self {
            table: Table::new("ongoings"),
        }
    }

    pub fn create(&self, id: Id, start_height: u64, op: OngoingOp) -> Ongoing {
        let row = OngoingRow {
            start_height,
            height: start_height,
            character_id: EMPTY_ID,
            building_id: EMPTY_ID,
            op,
        };
        Ongoing {
            id,
            handle: self.table.create(id, row),
        }
    }

    pub fn get(&self, id: Id) -> Option<Ongoing> {
        self.table.get(&id).map(|handle| Ongoing { id, handle })
    }

    pub fn ids(&self) -> Vec<Id> {
        self.table.keys()
    }

    /// Operations due at the given height, ascending by id.
    pub fn ids_for_height(&self, height: u64) -> Vec<Id> {
        self.table.keys_where(|_, r| r.height == height)
    }

    /// Operations attached to a building, ascending by id.
    pub fn ids_for_building(&self, building: Id) -> Vec<Id> {
        self.table.keys_where(|_, r| r.building_id == building)
    }

    /// Operations attached to a character, ascending by id.
    pub fn ids_for_character(&self, character: Id) -> Vec<Id> {
        self.table.keys_where(|_, r| r.character_id == character)
    }

    pub fn read<T>(&self, id: Id, f: impl FnOnce(&OngoingRow) -> T) -> Option<T> {
        self.table.read(&id, f)
    }

    pub fn delete(&self, id: Id) -> bool {
        self.table.delete(&id)
    }
}

impl TransactionBoundary for OngoingsTable {
    fn begin(&self) {
        self.table.begin().expect("ongoings transaction");
    }

    fn commit(&self) {
        self.table.commit().expect("ongoings transaction");
    }

    fn rollback(&self) {
        self.table.rollback().expect("ongoings transaction");
    }
}

/// Per-item service charge helper shared by services and their completion.
pub fn service_fee(base_cost: Amount, fee_percent: u32) -> Amount {
    let total = base_cost * fee_percent as Amount;
    (total + 99) / 100
}
