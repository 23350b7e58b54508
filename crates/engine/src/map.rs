//! The static base map: terrain passability and the region partition.
//!
//! The engine only ever reads the map through the [`BaseMap`] trait so tests
//! and tools can supply their own geometry without dragging real map data
//! around.

use std::collections::BTreeSet;

use crate::geometry::Hex;

/// Region identifier derived from the map partition.
pub type RegionId = u64;

/// Read-only view of the static world geometry.
pub trait BaseMap {
    /// Whether the coordinate lies on the map at all.
    fn is_on_map(&self, c: Hex) -> bool;

    /// Whether the terrain at the coordinate is passable.  Implies
    /// [`BaseMap::is_on_map`].
    fn is_passable(&self, c: Hex) -> bool;

    /// The region containing the coordinate.  Must only be called for
    /// on-map coordinates.
    fn region_id(&self, c: Hex) -> RegionId;
}

/// Side length of the square super-grid cells that form regions.
const REGION_SIZE: i32 = 24;

/// Base map used by the standard chains: a bounded hexagon of the given L1
/// radius with an explicit set of impassable tiles, partitioned into
/// square-ish regions of [`REGION_SIZE`].
#[derive(Clone, Debug)]
pub struct GridMap {
    radius: u32,
    obstacles: BTreeSet<Hex>,
}

impl GridMap {
    pub fn new(radius: u32) -> Self {
        Self {
            radius,
            obstacles: BTreeSet::new(),
        }
    }

    /// Adds a static obstacle.  Meant for map construction and tests.
    pub fn add_obstacle(&mut self, c: Hex) {
        self.obstacles.insert(c);
    }
}

impl Default for GridMap {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl BaseMap for GridMap {
    fn is_on_map(&self, c: Hex) -> bool {
        Hex::distance_l1(c, Hex::ORIGIN) <= self.radius
    }

    fn is_passable(&self, c: Hex) -> bool {
        self.is_on_map(c) && !self.obstacles.contains(&c)
    }

    fn region_id(&self, c: Hex) -> RegionId {
        assert!(self.is_on_map(c), "region lookup for off-map tile {c}");
        let rx = c.x.div_euclid(REGION_SIZE) as i64 as u64;
        let ry = c.y.div_euclid(REGION_SIZE) as i64 as u64;
        (rx << 32) ^ (ry & 0xffff_ffff)
    }
}
