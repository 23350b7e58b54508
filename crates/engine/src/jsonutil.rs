//! Strict JSON parsing helpers for move data.
//!
//! Move JSON comes from untrusted players; every helper returns `None` for
//! anything that is not exactly the expected shape.  Fractional numbers,
//! out-of-range values and wrong types are all rejected rather than coerced,
//! since lenient parsing on one node and strict parsing on another would
//! fork the chain.

use serde_json::Value;
use skarn_store::Id;

use crate::geometry::Hex;
use crate::params::{Amount, Quantity, COIN, MAX_QUANTITY};

/// Parses an entity id: a positive integer within the id range.
pub fn parse_id(val: &Value) -> Option<Id> {
    let id = val.as_u64()?;
    if id == 0 {
        return None;
    }
    Some(id)
}

/// Parses an item quantity in `(0, MAX_QUANTITY]`.
pub fn parse_quantity(val: &Value) -> Option<Quantity> {
    let n = val.as_i64()?;
    if n <= 0 || n > MAX_QUANTITY {
        return None;
    }
    Some(n)
}

/// Parses a coin amount in minor units, non-negative.
pub fn parse_coin_amount(val: &Value) -> Option<Amount> {
    let n = val.as_i64()?;
    if n < 0 {
        return None;
    }
    Some(n)
}

/// Parses a chain-value amount (e.g. an `out` payment), given with decimal
/// scaling as a JSON number.  Returns `None` for non-numeric values; the
/// caller decides whether that is fatal.
pub fn parse_chain_amount(val: &Value) -> Option<Amount> {
    let x = val.as_f64()?;
    if !(0.0..=21_000_000.0).contains(&x) {
        return None;
    }
    Some((x * COIN as f64).round() as Amount)
}

/// Parses one hex coordinate given as `{"x": int, "y": int}`.
pub fn parse_coord(val: &Value) -> Option<Hex> {
    let obj = val.as_object()?;
    if obj.len() != 2 {
        return None;
    }
    let x = obj.get("x")?.as_i64()?;
    let y = obj.get("y")?.as_i64()?;
    if x < i32::MIN as i64 || x > i32::MAX as i64 || y < i32::MIN as i64 || y > i32::MAX as i64 {
        return None;
    }
    Some(Hex::new(x as i32, y as i32))
}

/// Parses an array of hex coordinates.
pub fn parse_coord_array(val: &Value) -> Option<Vec<Hex>> {
    val.as_array()?.iter().map(parse_coord).collect()
}

/// Parses a fungible item map `{"item": count, ...}` with valid quantities.
pub fn parse_fungible_map(val: &Value) -> Option<Vec<(String, Quantity)>> {
    let obj = val.as_object()?;
    let mut res = Vec::with_capacity(obj.len());
    for (item, count) in obj {
        res.push((item.clone(), parse_quantity(count)?));
    }
    Some(res)
}

/// Checks that a string is a canonical decimal id ("0" or no leading zero,
/// no sign, no whitespace) and parses it.
pub fn parse_id_string(s: &str) -> Option<Id> {
    if s.is_empty() || (s.len() > 1 && s.starts_with('0')) {
        return None;
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let id = s.parse::<Id>().ok()?;
    if id == 0 {
        return None;
    }
    Some(id)
}
