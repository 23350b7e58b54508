use std::fmt;

use serde::{Deserialize, Serialize};

/// Team identity of accounts, characters and buildings.
///
/// `Ancient` is reserved for ownerless map-placed buildings; player accounts
/// can only ever be Red, Green or Blue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Faction {
    Red,
    Green,
    Blue,
    Ancient,
}

impl Faction {
    /// Parses the one-letter move encoding ("r", "g" or "b").
    pub fn from_move_str(s: &str) -> Option<Faction> {
        match s {
            "r" => Some(Faction::Red),
            "g" => Some(Faction::Green),
            "b" => Some(Faction::Blue),
            _ => None,
        }
    }

    /// The one-letter game-state encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Faction::Red => "r",
            Faction::Green => "g",
            Faction::Blue => "b",
            Faction::Ancient => "a",
        }
    }

    /// Whether fighters of these two factions may attack each other.
    pub fn is_enemy(self, other: Faction) -> bool {
        self != other
    }
}

impl fmt::Display for Faction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
