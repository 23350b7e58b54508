//! Transactional in-memory row store for the Skarn game state.
//!
//! The engine never touches rows directly: every read-modify-write cycle
//! goes through a [`Handle`] checked out from a [`Table`].  A handle holds an
//! exclusive lease on its row for its lifetime and writes the row back on
//! drop if (and only if) it was modified.  Two dirty bits separate cheap
//! column updates from full payload rewrites, mirroring what a SQL backend
//! would do with indexed columns versus a serialized blob.
//!
//! Tables are cheaply cloneable shared references; the engine bundles them
//! per block and treats the bundle as its database.  A per-block transaction
//! boundary is provided through [`Table::begin`] / [`Table::commit`] /
//! [`Table::rollback`].

mod alloc;
mod error;
mod table;

pub use alloc::IdAllocator;
pub use error::StoreError;
pub use table::{Handle, Table};

/// Integer row id.  `0` is reserved for "none".
pub type Id = u64;

/// The reserved "no row" id.
pub const EMPTY_ID: Id = 0;
