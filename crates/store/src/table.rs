use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::ops::Deref;
use std::rc::Rc;

use tracing::trace;

use crate::StoreError;

struct TableInner<K, R> {
    name: &'static str,
    rows: BTreeMap<K, R>,
    /// Keys with a live handle checked out.
    leased: BTreeSet<K>,
    /// Rollback copy of `rows` while a block transaction is open.
    snapshot: Option<BTreeMap<K, R>>,
}

/// A shared, named collection of rows keyed by an ordered key.
///
/// Cloning a table clones the shared reference, not the data.  All queries
/// iterate in ascending key order, which is part of the engine's determinism
/// contract.
pub struct Table<K, R> {
    inner: Rc<RefCell<TableInner<K, R>>>,
}

impl<K, R> Clone for Table<K, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K, R> Table<K, R>
where
    K: Ord + Clone + Debug,
    R: Clone,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Rc::new(RefCell::new(TableInner {
                name,
                rows: BTreeMap::new(),
                leased: BTreeSet::new(),
                snapshot: None,
            })),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.borrow().name
    }

    fn lease(&self, key: &K) {
        let mut inner = self.inner.borrow_mut();
        if !inner.leased.insert(key.clone()) {
            panic!("double handle for {} row {:?}", inner.name, key);
        }
    }

    /// Inserts a fresh row and returns the handle for initialising it.
    ///
    /// Panics if the key is already present: id reuse is a consistency bug.
    pub fn create(&self, key: K, row: R) -> Handle<K, R> {
        {
            let inner = self.inner.borrow();
            if inner.rows.contains_key(&key) {
                panic!("duplicate insert into {} for row {:?}", inner.name, key);
            }
        }
        self.lease(&key);
        trace!(table = self.name(), key = ?key, "created row");
        Handle {
            table: self.clone(),
            key: Some(key),
            row,
            is_new: true,
            dirty_fields: true,
            dirty_payload: true,
        }
    }

    /// Checks out the row with the given key, or `None` if there is none.
    pub fn get(&self, key: &K) -> Option<Handle<K, R>> {
        let row = self.inner.borrow().rows.get(key).cloned()?;
        self.lease(key);
        Some(Handle {
            table: self.clone(),
            key: Some(key.clone()),
            row,
            is_new: false,
            dirty_fields: false,
            dirty_payload: false,
        })
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.borrow().rows.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().rows.is_empty()
    }

    /// All keys, ascending.
    pub fn keys(&self) -> Vec<K> {
        self.inner.borrow().rows.keys().cloned().collect()
    }

    /// Keys of rows matching the predicate, ascending.
    ///
    /// The predicate is meant to read cheap indexed columns only; engine row
    /// types keep those in sync precisely so selection scans never need the
    /// full payload.
    pub fn keys_where(&self, pred: impl Fn(&K, &R) -> bool) -> Vec<K> {
        self.inner
            .borrow()
            .rows
            .iter()
            .filter(|(k, r)| pred(k, r))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Reads a single value out of a row without leasing it.
    pub fn read<T>(&self, key: &K, f: impl FnOnce(&R) -> T) -> Option<T> {
        self.inner.borrow().rows.get(key).map(f)
    }

    /// Deletes the row with the given key.  Returns whether it existed.
    ///
    /// Panics if the row is currently leased; the holder must delete through
    /// its handle instead, otherwise drop order would decide the outcome.
    pub fn delete(&self, key: &K) -> bool {
        let mut inner = self.inner.borrow_mut();
        if inner.leased.contains(key) {
            panic!("deleting leased {} row {:?}", inner.name, key);
        }
        inner.rows.remove(key).is_some()
    }

    /// Opens the per-block transaction by snapshotting all rows.
    pub fn begin(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.borrow_mut();
        if !inner.leased.is_empty() {
            return Err(StoreError::LiveHandles(inner.name));
        }
        if inner.snapshot.is_some() {
            return Err(StoreError::SnapshotOpen(inner.name));
        }
        inner.snapshot = Some(inner.rows.clone());
        Ok(())
    }

    /// Commits the open transaction, keeping all modifications.
    pub fn commit(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.borrow_mut();
        if !inner.leased.is_empty() {
            return Err(StoreError::LiveHandles(inner.name));
        }
        inner
            .snapshot
            .take()
            .map(|_| ())
            .ok_or(StoreError::NoSnapshot(inner.name))
    }

    /// Rolls back to the state at [`Table::begin`].
    pub fn rollback(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.borrow_mut();
        if !inner.leased.is_empty() {
            return Err(StoreError::LiveHandles(inner.name));
        }
        match inner.snapshot.take() {
            Some(rows) => {
                inner.rows = rows;
                Ok(())
            }
            None => Err(StoreError::NoSnapshot(inner.name)),
        }
    }
}

/// Exclusive lease on one row of a [`Table`].
///
/// Dereferences to the row for reads.  Mutation goes through
/// [`Handle::fields_mut`] (cheap indexed columns) or
/// [`Handle::payload_mut`] (full payload); either marks the handle dirty so
/// the row is written back when the handle is dropped.
pub struct Handle<K, R>
where
    K: Ord + Clone + Debug,
    R: Clone,
{
    table: Table<K, R>,
    /// `None` once the row was deleted through this handle.
    key: Option<K>,
    row: R,
    is_new: bool,
    dirty_fields: bool,
    dirty_payload: bool,
}

impl<K, R> Handle<K, R>
where
    K: Ord + Clone + Debug,
    R: Clone,
{
    pub fn key(&self) -> &K {
        self.key.as_ref().expect("handle already deleted")
    }

    /// Mutable access marking the cheap-columns dirty bit.
    pub fn fields_mut(&mut self) -> &mut R {
        self.dirty_fields = true;
        &mut self.row
    }

    /// Mutable access marking the full-payload dirty bit.
    pub fn payload_mut(&mut self) -> &mut R {
        self.dirty_payload = true;
        &mut self.row
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_fields || self.dirty_payload
    }

    /// Deletes the underlying row and consumes the handle.
    pub fn delete(mut self) {
        let key = self.key.take().expect("handle already deleted");
        let mut inner = self.table.inner.borrow_mut();
        trace!(table = inner.name, key = ?key, "deleted row");
        inner.rows.remove(&key);
        inner.leased.remove(&key);
    }
}

impl<K, R> Deref for Handle<K, R>
where
    K: Ord + Clone + Debug,
    R: Clone,
{
    type Target = R;

    fn deref(&self) -> &R {
        &self.row
    }
}

impl<K, R> Drop for Handle<K, R>
where
    K: Ord + Clone + Debug,
    R: Clone,
{
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let mut inner = self.table.inner.borrow_mut();
        inner.leased.remove(&key);
        if self.dirty_fields || self.dirty_payload {
            trace!(
                table = inner.name,
                key = ?key,
                new = self.is_new,
                payload = self.dirty_payload,
                "writing back row"
            );
            inner.rows.insert(key, self.row.clone());
        }
    }
}
