//! Hex-grid geometry: axial coordinates, rings and pathfinding.

mod coord;
mod pathfinder;
mod ring;

pub use coord::Hex;
pub use pathfinder::{PathFinder, Stepper, NO_CONNECTION};
pub use ring::L1Ring;
