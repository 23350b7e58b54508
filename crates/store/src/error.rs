use thiserror::Error;

/// Errors from transaction-boundary operations.
///
/// Note that row-level consistency violations (double handles, deleting a
/// leased row) are not errors but bugs, and panic instead.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("table {0} has no open snapshot to roll back to")]
    NoSnapshot(&'static str),

    #[error("table {0} already has an open snapshot")]
    SnapshotOpen(&'static str),

    #[error("table {0} has live handles at a transaction boundary")]
    LiveHandles(&'static str),
}
