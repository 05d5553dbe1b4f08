//! Room file schema.
//!
//! These types mirror the YAML layout one-to-one. Durations stay as
//! strings here (`"1500ms"`, `"2s"`) so validation can report every bad
//! value with its path; the loader converts a validated config into a
//! [`crate::phase::Room`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::firewall::{FirewallRule, Zone};
use crate::phase::room::{Easing, Segment};

/// Root of a room file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoomConfig {
    /// Room-wide settings
    pub room: RoomSettings,

    /// Scene anchors by name
    #[serde(default)]
    pub anchors: IndexMap<String, AnchorConfig>,

    /// Anchors at which hops are inspected
    #[serde(default)]
    pub inspection_nodes: Vec<String>,

    /// Phases by id, in display order
    #[serde(default)]
    pub phases: IndexMap<String, PhaseConfig>,

    /// Auto-chain successors (`from: to`)
    #[serde(default)]
    pub chains: IndexMap<String, String>,

    /// Initial firewall rules
    #[serde(default)]
    pub rules: Vec<FirewallRule>,
}

/// Room-wide settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoomSettings {
    /// Display name
    pub name: String,

    /// Phase selected initially; defaults to the first phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_phase: Option<String>,

    /// Phase started by `simulate_attack`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attack_phase: Option<String>,

    /// Whether auto-chaining starts enabled
    #[serde(default)]
    pub auto_run: bool,

    /// How long the approval indicator stays lit (3s to 8s)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_window: Option<String>,

    /// Pause at inspection nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspection_hold: Option<String>,

    /// Distance short of an inspection node where held hops stop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standoff: Option<f64>,

    /// Height above anchors at which packets travel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lift: Option<f64>,

    /// Interval between anchor resolution retries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_poll: Option<String>,

    /// Retries before a deferred dispatch is abandoned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_poll_limit: Option<u32>,
}

/// One scene anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnchorConfig {
    /// `[x, y, z]`
    pub position: [f64; 3],

    /// Network zone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<Zone>,

    /// Delay before the anchor appears in the scene
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appears_after: Option<String>,
}

/// One phase: profile overrides plus its path.
///
/// Unset profile fields fall back to the stock profile for the phase id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseConfig {
    /// Packet label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Protocol name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    /// Destination port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Whether the payload is shown as encrypted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<bool>,

    /// Source zone for anchors without one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_zone: Option<Zone>,

    /// Destination zone for anchors without one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_zone: Option<Zone>,

    /// Travel time of one hop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub travel: Option<String>,

    /// Easing of plain hops
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub easing: Option<Easing>,

    /// Event a learner must send before an allowed hop continues
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledge_event: Option<String>,

    /// Ordered hops
    #[serde(default)]
    pub path: Vec<Segment>,
}
