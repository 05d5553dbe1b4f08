//! Room model: the static configuration a set of phase tracks plays in.
//!
//! A room names its phases and their paths, the zone of each anchor, which
//! anchors are inspection nodes, the starting firewall rules, and timing.
//! Rooms are built from YAML by [`crate::config`] and are read-only to the
//! core.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::state::PhaseId;
use crate::firewall::{FirewallRule, Zone};
use crate::topology::{Anchor, Position, SceneTopology};

/// Shortest allowed approval window.
pub const MIN_APPROVAL_WINDOW: Duration = Duration::from_secs(3);

/// Longest allowed approval window.
pub const MAX_APPROVAL_WINDOW: Duration = Duration::from_secs(8);

// ============================================================================
// Paths
// ============================================================================

/// One hop of a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Origin anchor
    pub from: Anchor,
    /// Destination anchor
    pub to: Anchor,
    /// Curved route id, resolved by the renderer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curve: Option<String>,
}

impl Segment {
    /// Creates a straight segment.
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: Anchor::new(from),
            to: Anchor::new(to),
            curve: None,
        }
    }

    /// Returns this segment routed along a named curve.
    #[must_use]
    pub fn with_curve(mut self, curve: impl Into<String>) -> Self {
        self.curve = Some(curve.into());
        self
    }
}

// ============================================================================
// Phase Profiles
// ============================================================================

/// Interpolation used by the renderer for a hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Easing {
    /// Constant speed
    Linear,
    /// Accelerate
    EaseIn,
    /// Decelerate
    EaseOut,
    /// Accelerate then decelerate
    #[default]
    EaseInOut,
}

/// Default traffic direction of a phase, used for anchors without a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Direction {
    /// Source zone
    pub src: Zone,
    /// Destination zone
    pub dst: Zone,
}

/// Per-phase presentation and traffic parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseProfile {
    /// Packet label
    pub label: String,
    /// Protocol name
    pub protocol: String,
    /// Destination port
    pub port: u16,
    /// Whether the payload is shown as encrypted
    pub encrypted: bool,
    /// Default direction
    pub direction: Direction,
    /// Travel time of one hop
    #[serde(with = "crate::serde_ext::duration_ms")]
    pub travel: Duration,
    /// Easing of a plain hop
    pub easing: Easing,
    /// Event a learner must send before an allowed hop continues
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledge_event: Option<String>,
}

impl PhaseProfile {
    /// Returns the stock profile for a phase id.
    ///
    /// Ids without a stock profile get a generic outbound TCP profile
    /// labelled with the id.
    #[must_use]
    pub fn builtin(id: &str) -> Self {
        let profile = |label: &str, protocol: &str, port, encrypted, src, dst, ms| Self {
            label: label.to_string(),
            protocol: protocol.to_string(),
            port,
            encrypted,
            direction: Direction { src, dst },
            travel: Duration::from_millis(ms),
            easing: Easing::EaseInOut,
            acknowledge_event: None,
        };
        match id {
            "dns" => profile("DNS query", "UDP", 53, false, Zone::Lan, Zone::Wan, 1200),
            "tls" => profile("TLS handshake", "TCP", 443, true, Zone::Lan, Zone::Wan, 1400),
            "https" => profile("HTTPS request", "TCP", 443, true, Zone::Lan, Zone::Wan, 1400),
            "vpn" => Self {
                acknowledge_event: Some("vpn-continue".to_string()),
                ..profile("VPN tunnel", "UDP", 1194, true, Zone::Vpn, Zone::Lan, 1600)
            },
            "attack" => profile("SSH brute force", "TCP", 22, false, Zone::Wan, Zone::Lan, 1000),
            other => profile(&other.to_uppercase(), "TCP", 80, false, Zone::Lan, Zone::Wan, 1200),
        }
    }
}

/// A phase's profile and path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhasePlan {
    /// Presentation and traffic parameters
    pub profile: PhaseProfile,
    /// Ordered hops
    pub path: Vec<Segment>,
}

// ============================================================================
// Timing and Geometry
// ============================================================================

/// Room-wide timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomTiming {
    /// Pause at an inspection node; also the fallback for acknowledged holds
    pub inspection_hold: Duration,
    /// How long the approval indicator stays lit
    pub approval_window: Duration,
    /// Interval between anchor resolution retries
    pub anchor_poll: Duration,
    /// Retries before a deferred dispatch is abandoned
    pub anchor_poll_limit: u32,
}

impl RoomTiming {
    /// Clamps an approval window into the supported range.
    #[must_use]
    pub fn clamp_approval_window(window: Duration) -> Duration {
        window.clamp(MIN_APPROVAL_WINDOW, MAX_APPROVAL_WINDOW)
    }
}

impl Default for RoomTiming {
    fn default() -> Self {
        Self {
            inspection_hold: Duration::from_secs(2),
            approval_window: Duration::from_secs(5),
            anchor_poll: Duration::from_millis(100),
            anchor_poll_limit: 50,
        }
    }
}

/// Offset geometry for hops around inspection nodes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    /// How far short of an inspection node a held hop stops
    pub standoff: f64,
    /// Height above anchors at which packets travel
    pub lift: f64,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            standoff: 0.6,
            lift: 0.0,
        }
    }
}

/// Placement of an anchor in the scene.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorSpec {
    /// Scene position
    pub position: Position,
    /// Network zone, if the anchor sits in one
    pub zone: Option<Zone>,
    /// Delay before the anchor appears in the scene
    pub appears_after: Duration,
}

// ============================================================================
// Room
// ============================================================================

/// Static room configuration.
#[derive(Debug, Clone)]
pub struct Room {
    /// Display name
    pub name: String,
    /// Phases in declaration order
    pub phases: IndexMap<PhaseId, PhasePlan>,
    /// Phase selected initially and for unknown ids
    pub default_phase: PhaseId,
    /// Phase started by `simulate_attack`
    pub attack_phase: Option<PhaseId>,
    /// Auto-chain successors
    pub chains: HashMap<PhaseId, PhaseId>,
    /// Whether auto-chaining starts enabled
    pub auto_run: bool,
    /// Scene anchors
    pub anchors: IndexMap<Anchor, AnchorSpec>,
    /// Anchors at which hops are inspected
    pub inspection_nodes: BTreeSet<Anchor>,
    /// Timing
    pub timing: RoomTiming,
    /// Offset geometry
    pub geometry: Geometry,
    /// Initial firewall rules
    pub rules: Vec<FirewallRule>,
}

impl Room {
    /// Creates an empty room whose default phase is `default_phase`.
    #[must_use]
    pub fn new(name: impl Into<String>, default_phase: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phases: IndexMap::new(),
            default_phase: PhaseId::new(default_phase),
            attack_phase: None,
            chains: HashMap::new(),
            auto_run: false,
            anchors: IndexMap::new(),
            inspection_nodes: BTreeSet::new(),
            timing: RoomTiming::default(),
            geometry: Geometry::default(),
            rules: Vec::new(),
        }
    }

    /// Adds a phase with its stock profile.
    #[must_use]
    pub fn with_phase(mut self, id: &str, path: Vec<Segment>) -> Self {
        self.phases.insert(
            PhaseId::new(id),
            PhasePlan {
                profile: PhaseProfile::builtin(id),
                path,
            },
        );
        self
    }

    /// Places an anchor at `position`, immediately present.
    #[must_use]
    pub fn with_anchor(mut self, name: &str, position: Position, zone: Option<Zone>) -> Self {
        self.anchors.insert(
            Anchor::new(name),
            AnchorSpec {
                position,
                zone,
                appears_after: Duration::ZERO,
            },
        );
        self
    }

    /// Marks an anchor as an inspection node.
    #[must_use]
    pub fn with_inspection_node(mut self, name: &str) -> Self {
        self.inspection_nodes.insert(Anchor::new(name));
        self
    }

    /// Returns a phase's path; unknown phases have an empty path.
    #[must_use]
    pub fn path(&self, phase: &PhaseId) -> &[Segment] {
        self.phases.get(phase).map_or(&[], |p| p.path.as_slice())
    }

    /// Returns a phase's profile, falling back to the stock profile.
    #[must_use]
    pub fn profile(&self, phase: &PhaseId) -> PhaseProfile {
        self.phases
            .get(phase)
            .map_or_else(|| PhaseProfile::builtin(phase.as_str()), |p| p.profile.clone())
    }

    /// Maps `phase` to itself if the room has it, else to the default phase.
    #[must_use]
    pub fn coerce_phase(&self, phase: &PhaseId) -> PhaseId {
        if self.phases.contains_key(phase) {
            phase.clone()
        } else {
            self.default_phase.clone()
        }
    }

    /// Returns the phase auto-chained after `phase`.
    #[must_use]
    pub fn successor(&self, phase: &PhaseId) -> Option<&PhaseId> {
        self.chains.get(phase)
    }

    /// Returns whether `anchor` is an inspection node.
    #[must_use]
    pub fn is_inspection_node(&self, anchor: &Anchor) -> bool {
        self.inspection_nodes.contains(anchor)
    }

    /// Returns the zone of `anchor`, if configured.
    #[must_use]
    pub fn zone_of(&self, anchor: &Anchor) -> Option<Zone> {
        self.anchors.get(anchor).and_then(|a| a.zone)
    }

    /// Builds the scene as it looks at time zero.
    #[must_use]
    pub fn initial_scene(&self) -> SceneTopology {
        self.anchors
            .iter()
            .filter(|(_, spec)| spec.appears_after.is_zero())
            .map(|(name, spec)| (name.clone(), spec.position))
            .collect()
    }

    /// Anchors that load after time zero, with their delay.
    pub fn late_anchors(&self) -> impl Iterator<Item = (&Anchor, &AnchorSpec)> {
        self.anchors
            .iter()
            .filter(|(_, spec)| !spec.appears_after.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::TopologyResolver;

    fn room() -> Room {
        Room::new("lab", "dns")
            .with_phase("dns", vec![Segment::new("pc", "fw"), Segment::new("fw", "dns")])
            .with_phase("https", vec![])
            .with_anchor("pc", Position::new(0.0, 0.0, 0.0), Some(Zone::Lan))
            .with_anchor("fw", Position::new(2.0, 0.0, 0.0), None)
            .with_inspection_node("fw")
    }

    #[test]
    fn test_coerce_unknown_phase_to_default() {
        let r = room();
        assert_eq!(r.coerce_phase(&PhaseId::new("https")).as_str(), "https");
        assert_eq!(r.coerce_phase(&PhaseId::new("gopher")).as_str(), "dns");
    }

    #[test]
    fn test_unknown_phase_has_empty_path() {
        let r = room();
        assert_eq!(r.path(&PhaseId::new("dns")).len(), 2);
        assert!(r.path(&PhaseId::new("nope")).is_empty());
    }

    #[test]
    fn test_builtin_profiles() {
        let dns = PhaseProfile::builtin("dns");
        assert_eq!((dns.protocol.as_str(), dns.port, dns.encrypted), ("UDP", 53, false));

        let https = PhaseProfile::builtin("https");
        assert_eq!((https.protocol.as_str(), https.port, https.encrypted), ("TCP", 443, true));

        let attack = PhaseProfile::builtin("attack");
        assert_eq!(attack.direction.src, Zone::Wan);
        assert_eq!(attack.direction.dst, Zone::Lan);

        assert_eq!(
            PhaseProfile::builtin("vpn").acknowledge_event.as_deref(),
            Some("vpn-continue")
        );
        assert_eq!(PhaseProfile::builtin("smtp").label, "SMTP");
    }

    #[test]
    fn test_approval_window_clamp() {
        assert_eq!(
            RoomTiming::clamp_approval_window(Duration::from_secs(1)),
            MIN_APPROVAL_WINDOW
        );
        assert_eq!(
            RoomTiming::clamp_approval_window(Duration::from_secs(60)),
            MAX_APPROVAL_WINDOW
        );
        assert_eq!(
            RoomTiming::clamp_approval_window(Duration::from_secs(4)),
            Duration::from_secs(4)
        );
    }

    #[test]
    fn test_initial_scene_skips_late_anchors() {
        let mut r = room();
        r.anchors.insert(
            Anchor::new("dns"),
            AnchorSpec {
                position: Position::new(4.0, 0.0, 0.0),
                zone: Some(Zone::Wan),
                appears_after: Duration::from_millis(300),
            },
        );
        let scene = r.initial_scene();
        assert!(scene.resolve(&Anchor::new("pc")).is_some());
        assert!(scene.resolve(&Anchor::new("dns")).is_none());
        assert_eq!(r.late_anchors().count(), 1);
    }
}
