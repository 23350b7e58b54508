//! Per-block processing context.

use crate::map::BaseMap;
use crate::params::{Chain, Params};

/// Block height.
pub type Height = u64;

/// Bundles the immutable data every phase needs: chain parameters, the
/// static map and the block metadata.  Phases receive the context by
/// reference; nothing in it is mutable.
pub struct Context<'a> {
    params: &'a Params,
    map: &'a dyn BaseMap,
    height: Height,
    timestamp: i64,
}

impl<'a> Context<'a> {
    pub fn new(params: &'a Params, map: &'a dyn BaseMap, height: Height, timestamp: i64) -> Self {
        Self {
            params,
            map,
            height,
            timestamp,
        }
    }

    pub fn chain(&self) -> Chain {
        self.params.chain()
    }

    pub fn params(&self) -> &'a Params {
        self.params
    }

    pub fn map(&self) -> &'a dyn BaseMap {
        self.map
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}
