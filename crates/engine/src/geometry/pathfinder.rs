use std::collections::{BTreeMap, VecDeque};

use super::Hex;

/// Marker distance for unreachable tiles.
pub const NO_CONNECTION: u32 = u32::MAX;

/// Breadth-first distance field over a bounded hex region.
///
/// Distances are computed outward from the *target* with uniform edge cost
/// one; the externally supplied edge function decides which transitions are
/// passable (static obstacles, faction-aware building access and so on).
/// Stepping then walks from any computed tile back towards the target along
/// strictly decreasing distances.
pub struct PathFinder {
    target: Hex,
    distances: BTreeMap<Hex, u32>,
}

impl PathFinder {
    pub fn new(target: Hex) -> Self {
        Self {
            target,
            distances: BTreeMap::new(),
        }
    }

    pub fn target(&self) -> Hex {
        self.target
    }

    /// Computes the distance field until `source` is reached, considering
    /// only tiles within `l1_range` of the target.  Returns the distance of
    /// `source` or [`NO_CONNECTION`].
    ///
    /// The edge function is called as `edge(from, to)` and must be symmetric
    /// for the result to be meaningful as a path for a vehicle travelling in
    /// the opposite direction.
    pub fn compute(&mut self, edge: impl Fn(Hex, Hex) -> bool, source: Hex, l1_range: u32) -> u32 {
        self.distances.clear();

        if Hex::distance_l1(self.target, source) > l1_range {
            return NO_CONNECTION;
        }

        let mut queue = VecDeque::new();
        self.distances.insert(self.target, 0);
        queue.push_back(self.target);

        while let Some(cur) = queue.pop_front() {
            let cur_dist = self.distances[&cur];
            if cur == source {
                return cur_dist;
            }

            for n in cur.neighbours() {
                if Hex::distance_l1(self.target, n) > l1_range {
                    continue;
                }
                if self.distances.contains_key(&n) {
                    continue;
                }
                if !edge(cur, n) {
                    continue;
                }
                self.distances.insert(n, cur_dist + 1);
                queue.push_back(n);
            }
        }

        NO_CONNECTION
    }

    /// Distance of an individual tile in the computed field.
    pub fn distance(&self, pos: Hex) -> u32 {
        self.distances.get(&pos).copied().unwrap_or(NO_CONNECTION)
    }

    /// Starts stepping along the path from the given source tile.
    ///
    /// Panics if no path from that source has been computed; callers check
    /// [`PathFinder::compute`]'s result first.
    pub fn step_path(&self, source: Hex) -> Stepper<'_> {
        assert!(
            self.distance(source) != NO_CONNECTION,
            "no path from {source} has been computed yet"
        );
        Stepper {
            finder: self,
            position: source,
        }
    }
}

/// Step-by-step walk along a computed distance field towards the target.
pub struct Stepper<'a> {
    finder: &'a PathFinder,
    position: Hex,
}

impl Stepper<'_> {
    pub fn position(&self) -> Hex {
        self.position
    }

    pub fn has_more(&self) -> bool {
        self.position != self.finder.target
    }

    /// Advances one tile towards the target and returns the cost consumed.
    ///
    /// Among neighbours with the smallest distance, the first in neighbour
    /// enumeration order wins; this tie-breaking is consensus-relevant.
    pub fn next(&mut self) -> u32 {
        assert!(self.has_more(), "stepped past the path target");

        let cur_dist = self.finder.distance(self.position);
        debug_assert_ne!(cur_dist, NO_CONNECTION);

        let mut best_dist = NO_CONNECTION;
        let mut best = self.position;
        for n in self.position.neighbours() {
            let dist = self.finder.distance(n);
            if dist == NO_CONNECTION {
                continue;
            }
            if best_dist == NO_CONNECTION || dist < best_dist {
                best_dist = dist;
                best = n;
            }
        }

        assert_ne!(best_dist, NO_CONNECTION, "no good neighbour along path");
        assert!(best_dist <= cur_dist);

        self.position = best;
        cur_dist - best_dist
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(_: Hex, _: Hex) -> bool {
        true
    }

    #[test]
    fn direct_path_on_open_ground() {
        let mut pf = PathFinder::new(Hex::new(5, 0));
        assert_eq!(pf.compute(open, Hex::new(0, 0), 10), 5);

        let mut stepper = pf.step_path(Hex::new(0, 0));
        let mut total = 0;
        while stepper.has_more() {
            total += stepper.next();
        }
        assert_eq!(total, 5);
        assert_eq!(stepper.position(), Hex::new(5, 0));
    }

    #[test]
    fn out_of_range_source_has_no_connection() {
        let mut pf = PathFinder::new(Hex::ORIGIN);
        assert_eq!(pf.compute(open, Hex::new(11, 0), 10), NO_CONNECTION);
    }

    #[test]
    fn routes_around_a_wall() {
        // A wall on the x = 1 column with a gap at y = 3.
        let edge = |_: Hex, to: Hex| to.x != 1 || to.y == 3;

        let mut pf = PathFinder::new(Hex::new(2, 0));
        let dist = pf.compute(edge, Hex::new(0, 0), 20);
        assert_ne!(dist, NO_CONNECTION);
        assert!(dist > 2);

        let mut stepper = pf.step_path(Hex::new(0, 0));
        let mut walked = 0;
        while stepper.has_more() {
            walked += stepper.next();
            let pos = stepper.position();
            assert!(pos.x != 1 || pos.y == 3);
        }
        assert_eq!(walked, dist);
    }

    #[test]
    fn fully_blocked_target_is_unreachable() {
        let edge = |_: Hex, to: Hex| Hex::distance_l1(to, Hex::ORIGIN) != 1;

        let mut pf = PathFinder::new(Hex::ORIGIN);
        assert_eq!(pf.compute(edge, Hex::new(5, 5), 30), NO_CONNECTION);
    }

    #[test]
    #[should_panic(expected = "no path from")]
    fn stepping_without_compute_panics() {
        let pf = PathFinder::new(Hex::ORIGIN);
        pf.step_path(Hex::new(1, 0));
    }
}
