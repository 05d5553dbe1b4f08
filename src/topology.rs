//! Topology resolution
//!
//! Maps logical anchor names (`"desktop1"`, `"firewall1"`) to scene
//! positions. Teaching scenes load asynchronously, so an anchor that is not
//! in the scene yet simply resolves to `None`; callers defer and retry.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical name of a topology node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Anchor(pub String);

impl Anchor {
    /// Creates an anchor from a node name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the node name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Anchor {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Scene position of a resolved anchor.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate
    pub x: f64,
    /// Y coordinate (up)
    pub y: f64,
    /// Z coordinate
    pub z: f64,
}

impl Position {
    /// Creates a position from coordinates.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Returns the offset that moves `distance` units from `self` towards
    /// `toward`.
    ///
    /// Coincident points yield a zero offset; a distance longer than the
    /// gap is clamped so the offset never overshoots `toward`.
    #[must_use]
    pub fn offset_toward(&self, toward: &Self, distance: f64) -> Offset {
        let (dx, dy, dz) = (toward.x - self.x, toward.y - self.y, toward.z - self.z);
        let len = dz.mul_add(dz, dx.mul_add(dx, dy * dy)).sqrt();
        if len <= f64::EPSILON || distance <= 0.0 {
            return Offset::ZERO;
        }
        let scale = distance.min(len) / len;
        Offset {
            dx: dx * scale,
            dy: dy * scale,
            dz: dz * scale,
        }
    }
}

/// Displacement relative to an anchor's resolved position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Offset {
    /// X displacement
    pub dx: f64,
    /// Y displacement
    pub dy: f64,
    /// Z displacement
    pub dz: f64,
}

impl Offset {
    /// No displacement.
    pub const ZERO: Self = Self {
        dx: 0.0,
        dy: 0.0,
        dz: 0.0,
    };
}

/// Resolves anchors to positions.
///
/// Implementations never block and never error.
pub trait TopologyResolver {
    /// Returns the anchor's position, or `None` if it is not in the scene.
    fn resolve(&self, anchor: &Anchor) -> Option<Position>;
}

/// In-memory scene graph of placed anchors.
#[derive(Debug, Clone, Default)]
pub struct SceneTopology {
    nodes: HashMap<Anchor, Position>,
}

impl SceneTopology {
    /// Creates an empty scene.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Places (or moves) an anchor in the scene.
    pub fn place(&mut self, anchor: Anchor, position: Position) {
        self.nodes.insert(anchor, position);
    }

    /// Removes an anchor from the scene, returning its last position.
    pub fn remove(&mut self, anchor: &Anchor) -> Option<Position> {
        self.nodes.remove(anchor)
    }

    /// Returns whether the anchor is present.
    #[must_use]
    pub fn contains(&self, anchor: &Anchor) -> bool {
        self.nodes.contains_key(anchor)
    }

    /// Returns the number of placed anchors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns whether no anchors are placed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl TopologyResolver for SceneTopology {
    fn resolve(&self, anchor: &Anchor) -> Option<Position> {
        self.nodes.get(anchor).copied()
    }
}

impl FromIterator<(Anchor, Position)> for SceneTopology {
    fn from_iter<I: IntoIterator<Item = (Anchor, Position)>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}
