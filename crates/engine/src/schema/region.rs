//! Regions: prospecting and resource bookkeeping per map partition cell.
//!
//! Regions exist implicitly; a row is only written once a region deviates
//! from the default state.  Reads of unknown regions return the default.

use serde::{Deserialize, Serialize};
use skarn_store::{Handle, Id, Table, EMPTY_ID};

use crate::map::RegionId;
use crate::params::Quantity;
use crate::schema::TransactionBoundary;

/// The outcome of a finished prospection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prospection {
    /// Account that prospected the region.
    pub name: String,
    /// Block height at which prospecting finished.
    pub height: u64,
    /// Resource found.
    pub resource: String,
}

/// One region row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionRow {
    /// Character currently prospecting the region, or `EMPTY_ID`.
    pub prospecting_character: Id,
    pub prospection: Option<Prospection>,
    pub resource_left: Quantity,
    /// Height of the last modification, for incremental state export.
    pub modified_height: u64,
}

/// Handle wrapper for one region.
pub struct Region {
    id: RegionId,
    height: u64,
    handle: Handle<RegionId, RegionRow>,
}

impl Region {
    pub fn id(&self) -> RegionId {
        self.id
    }

    pub fn row(&self) -> &RegionRow {
        &self.handle
    }

    pub fn prospecting_character(&self) -> Id {
        self.handle.prospecting_character
    }

    pub fn set_prospecting_character(&mut self, character: Id) {
        let h = self.height;
        let row = self.handle.fields_mut();
        row.prospecting_character = character;
        row.modified_height = h;
    }

    pub fn prospection(&self) -> Option<&Prospection> {
        self.handle.prospection.as_ref()
    }

    pub fn set_prospection(&mut self, p: Option<Prospection>) {
        let h = self.height;
        let row = self.handle.payload_mut();
        row.prospection = p;
        row.modified_height = h;
    }

    /// Amount of minable resource left.  Must only be called once the region
    /// has been prospected.
    pub fn resource_left(&self) -> Quantity {
        assert!(
            self.handle.prospection.is_some(),
            "resource query for unprospected region {}",
            self.id
        );
        self.handle.resource_left
    }

    pub fn set_resource_left(&mut self, left: Quantity) {
        assert!(left >= 0);
        let h = self.height;
        let row = self.handle.fields_mut();
        row.resource_left = left;
        row.modified_height = h;
    }
}

#[derive(Clone)]
pub struct RegionsTable {
    table: Table<RegionId, RegionRow>,
}

impl RegionsTable {
    pub fn new() -> Self {
        Self {
            table: Table::new("regions"),
        }
    }

    /// Returns a handle for the region, materialising the default row if it
    /// was never written.  `height` is recorded as the modification height
    /// should the handle end up dirty.
    pub fn get(&self, id: RegionId, height: u64) -> Region {
        let handle = match self.table.get(&id) {
            Some(h) => h,
            None => {
                let mut h = self.table.create(id, RegionRow::default());
                h.fields_mut().modified_height = height;
                h
            }
        };
        Region { id, height, handle }
    }

    /// Region ids with a non-default row, ascending.
    pub fn ids(&self) -> Vec<RegionId> {
        self.table.keys()
    }

    /// Region ids modified at or after the given height.
    pub fn ids_modified_since(&self, height: u64) -> Vec<RegionId> {
        self.table.keys_where(|_, r| r.modified_height >= height)
    }

    pub fn read<T>(&self, id: RegionId, f: impl FnOnce(&RegionRow) -> T) -> Option<T> {
        self.table.read(&id, f)
    }

    /// Checks whether some character is attributed as prospecting the given
    /// region, without materialising a row.
    pub fn prospector_of(&self, id: RegionId) -> Id {
        self.read(id, |r| r.prospecting_character)
            .unwrap_or(EMPTY_ID)
    }
}

impl TransactionBoundary for RegionsTable {
    fn begin(&self) {
        self.table.begin().expect("regions transaction");
    }

    fn commit(&self) {
        self.table.commit().expect("regions transaction");
    }

    fn rollback(&self) {
        self.table.rollback().expect("regions transaction");
    }
}
