//! Coordinate to LED index mapping for the three 8x8 display panels.
//!
//! In 2D the left panel covers `x < 8, y < 8`, the right panel extends along
//! x (`8 <= x < 16`) and the top panel extends along y (`8 <= y < 16`). In 3D
//! each panel is a face of the cube: `z == 8` (left), `x == 8` (right) and
//! `y == 8` (top). Coordinates outside every panel map to nothing.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{BridgeError, Result};
use crate::protocol::keyed_map;

pub const PANEL_SIZE: i64 = 8;
pub const LED_COUNT: usize = 192;

pub fn led_index(x: i64, y: i64) -> Option<u32> {
    if x < 0 || y < 0 {
        return None;
    }
    let index = if x < 8 && y < 8 {
        63 - x - 8 * y
    } else if x < 16 && y < 8 {
        7 - y + 8 * x
    } else if x < 8 && y < 16 {
        176 + y - 8 * x
    } else {
        return None;
    };
    Some(index as u32)
}

pub fn led_index_3d(x: i64, y: i64, z: i64) -> Option<u32> {
    if x < 0 || y < 0 || z < 0 {
        return None;
    }
    let index = if x < 8 && y < 8 && z == 8 {
        63 - x - 8 * y
    } else if y < 8 && z < 8 && x == 8 {
        127 - y - 8 * z
    } else if z < 8 && x < 8 && y == 8 {
        191 - z - 8 * x
    } else {
        return None;
    };
    Some(index as u32)
}

/// Every 2D coordinate that lands on a panel.
pub fn all_coordinates() -> impl Iterator<Item = (i64, i64)> {
    (0..16)
        .flat_map(|y| (0..16).map(move |x| (x, y)))
        .filter(|&(x, y)| x < 8 || y < 8)
}

/// Lays out `rows` top-down on one named panel.
pub fn panel_coordinates<C: Clone>(panel: &str, rows: &[Vec<C>]) -> Result<Vec<((i64, i64), C)>> {
    let (start_x, top_y) = match panel {
        "left" => (0, 7),
        "right" => (8, 7),
        "top" => (0, 15),
        _ => {
            return Err(BridgeError::invalid(
                "The panel must be 'left', 'right', or 'top'",
            ))
        }
    };

    let mut placed = Vec::new();
    for (row_offset, colours) in rows.iter().enumerate() {
        let y = top_y - row_offset as i64;
        for (column, colour) in colours.iter().enumerate() {
            placed.push(((start_x + column as i64, y), colour.clone()));
        }
    }
    Ok(placed)
}

/// Parses `"x,y"` or `"x,y,z"` into exactly `dimensions` integers.
pub fn parse_coordinate(text: &str, dimensions: usize) -> Result<Vec<i64>> {
    let parts = text
        .split(',')
        .map(|part| part.trim().parse::<i64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| BridgeError::invalid(format!("invalid coordinate {:?}", text)))?;

    if parts.len() != dimensions {
        return Err(BridgeError::invalid(format!(
            "coordinate {:?} must have {} components",
            text, dimensions
        )));
    }
    Ok(parts)
}

/// Collects `index -> colour` pairs into the map `display.set` expects.
/// Later entries for the same index win.
pub fn index_map<V: Into<Value>>(entries: impl IntoIterator<Item = (u32, V)>) -> Value {
    let ordered: BTreeMap<u32, Value> = entries
        .into_iter()
        .map(|(index, colour)| (index, colour.into()))
        .collect();
    keyed_map(ordered)
}
