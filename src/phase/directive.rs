//! Hop directive builder.
//!
//! [`build`] turns one path segment into the immutable [`HopDirective`] the
//! renderer animates. It is a pure function of its inputs: the same phase,
//! step, generation, room, rules, and anchor positions always produce an
//! equal directive, so replaying a step is just building it again.
//!
//! A segment whose destination is an inspection node is *entering*: it is
//! evaluated against the firewall rules, held short of the node, and marked
//! terminal on deny. A segment whose origin is an inspection node is
//! *leaving* and starts from where the entering hop stopped.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::room::{Easing, Room, Segment};
use super::state::{Generation, HopId, PhaseId};
use crate::firewall::{Decision, FirewallRule, FirewallTraffic, evaluate};
use crate::topology::{Anchor, Offset, Position, TopologyResolver};

// ============================================================================
// Directive
// ============================================================================

/// Curved route the renderer resolves on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathOverride {
    /// Route id
    pub curve: String,
}

/// Travel timing of a hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Travel {
    /// Animation duration
    #[serde(with = "crate::serde_ext::duration_ms")]
    pub duration: Duration,
    /// Animation easing
    pub easing: Easing,
}

/// Key/value shown next to a held packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chip {
    /// Chip label
    pub key: String,
    /// Chip content
    pub value: String,
}

impl Chip {
    fn new(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            value: value.into(),
        }
    }
}

/// Firewall inspection attached to an entering hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inspection {
    /// Inspection node
    pub node: Anchor,
    /// Traffic that was evaluated
    pub traffic: FirewallTraffic,
    /// Evaluation result
    pub decision: Decision,
    /// Chips shown while held
    pub chips: Vec<Chip>,
}

/// Immutable description of one hop, consumed by the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HopDirective {
    /// Hop identity
    pub hop_id: HopId,
    /// Packet label
    pub label: String,
    /// Protocol name
    pub protocol: String,
    /// Destination port
    pub port: u16,
    /// Whether the payload is shown as encrypted
    pub encrypted: bool,
    /// Origin anchor
    pub from: Anchor,
    /// Destination anchor
    pub to: Anchor,
    /// Curved route
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_override: Option<PathOverride>,
    /// Travel timing
    pub travel: Travel,
    /// Hold duration at the end of travel
    #[serde(
        default,
        with = "crate::serde_ext::option_duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub hold: Option<Duration>,
    /// External event that ends the hold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_until_event: Option<String>,
    /// Start point relative to `from`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_offset: Option<Offset>,
    /// End point relative to `to`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_offset: Option<Offset>,
    /// Inspection details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspection: Option<Inspection>,
    /// Whether the run halts after this hop
    #[serde(default)]
    pub blocks_after_hold: bool,
}

impl HopDirective {
    /// Returns whether the hop pauses before completing.
    #[must_use]
    pub const fn holds(&self) -> bool {
        self.hold.is_some() || self.hold_until_event.is_some()
    }

    /// Returns the inspection decision, if the hop was inspected.
    #[must_use]
    pub fn decision(&self) -> Option<&Decision> {
        self.inspection.as_ref().map(|i| &i.decision)
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Everything [`build`] reads besides the step itself.
#[derive(Clone, Copy)]
pub struct BuildContext<'a> {
    /// Room configuration
    pub room: &'a Room,
    /// Rule snapshot to evaluate against
    pub rules: &'a [FirewallRule],
    /// Anchor positions
    pub topology: &'a dyn TopologyResolver,
}

/// Result of building a directive.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    /// Directive ready to dispatch
    Ready(HopDirective),
    /// An anchor is not in the scene yet
    Deferred {
        /// First anchor that failed to resolve
        missing: Anchor,
    },
}

fn resolve(ctx: &BuildContext<'_>, anchor: &Anchor) -> Result<Position, Anchor> {
    ctx.topology.resolve(anchor).ok_or_else(|| anchor.clone())
}

fn lifted(offset: Offset, lift: f64) -> Offset {
    Offset {
        dy: offset.dy + lift,
        ..offset
    }
}

/// Builds the directive for `segment`, step `step` of `phase`.
#[must_use]
pub fn build(
    phase: &PhaseId,
    step: usize,
    segment: &Segment,
    generation: Generation,
    ctx: &BuildContext<'_>,
) -> BuildOutcome {
    match try_build(phase, step, segment, generation, ctx) {
        Ok(directive) => BuildOutcome::Ready(directive),
        Err(missing) => BuildOutcome::Deferred { missing },
    }
}

fn try_build(
    phase: &PhaseId,
    step: usize,
    segment: &Segment,
    generation: Generation,
    ctx: &BuildContext<'_>,
) -> Result<HopDirective, Anchor> {
    let room = ctx.room;
    let path = room.path(phase);
    let profile = room.profile(phase);
    let geometry = room.geometry;

    let from_pos = resolve(ctx, &segment.from)?;
    let to_pos = resolve(ctx, &segment.to)?;

    let mut directive = HopDirective {
        hop_id: HopId::new(phase.clone(), step, generation),
        label: profile.label.clone(),
        protocol: profile.protocol.clone(),
        port: profile.port,
        encrypted: profile.encrypted,
        from: segment.from.clone(),
        to: segment.to.clone(),
        path_override: segment.curve.clone().map(|curve| PathOverride { curve }),
        travel: Travel {
            duration: profile.travel,
            easing: profile.easing,
        },
        hold: None,
        hold_until_event: None,
        start_offset: None,
        end_offset: None,
        inspection: None,
        blocks_after_hold: false,
    };

    if geometry.lift != 0.0 {
        directive.start_offset = Some(lifted(Offset::ZERO, geometry.lift));
        directive.end_offset = Some(lifted(Offset::ZERO, geometry.lift));
    }

    // Leaving: pick up where the entering hop stopped.
    if room.is_inspection_node(&segment.from) {
        let entering = step
            .checked_sub(1)
            .and_then(|i| path.get(i))
            .filter(|prev| prev.to == segment.from);
        if let Some(prev) = entering {
            let prev_from = resolve(ctx, &prev.from)?;
            directive.start_offset = Some(lifted(
                from_pos.offset_toward(&prev_from, geometry.standoff),
                geometry.lift,
            ));
        }
    }

    // Entering: evaluate, hold short of the node.
    if room.is_inspection_node(&segment.to) {
        let beyond = path
            .get(step + 1)
            .filter(|next| next.from == segment.to)
            .map(|next| &next.to);
        let traffic = FirewallTraffic {
            src_zone: room
                .zone_of(&segment.from)
                .unwrap_or(profile.direction.src),
            dst_zone: beyond
                .and_then(|a| room.zone_of(a))
                .unwrap_or(profile.direction.dst),
            protocol: profile.protocol.clone(),
            port: profile.port,
        };
        let decision = evaluate(ctx.rules, &traffic);
        let allowed = decision.is_allowed();

        directive.travel.easing = Easing::EaseOut;
        directive.hold = Some(room.timing.inspection_hold);
        directive.end_offset = Some(lifted(
            to_pos.offset_toward(&from_pos, geometry.standoff),
            geometry.lift,
        ));
        directive.blocks_after_hold = !allowed;
        if allowed {
            directive.hold_until_event.clone_from(&profile.acknowledge_event);
        }
        directive.inspection = Some(Inspection {
            node: segment.to.clone(),
            chips: chips(&segment.to, &traffic, &decision),
            traffic,
            decision,
        });
    }

    Ok(directive)
}

fn chips(node: &Anchor, traffic: &FirewallTraffic, decision: &Decision) -> Vec<Chip> {
    let rule = decision
        .matched_rule_id
        .clone()
        .unwrap_or_else(|| "default deny".to_string());
    vec![
        Chip::new("node", node.as_str()),
        Chip::new("traffic", format!("{}→{}", traffic.src_zone, traffic.dst_zone)),
        Chip::new("service", format!("{}/{}", traffic.protocol, traffic.port)),
        Chip::new("rule", rule),
        Chip::new("verdict", decision.action.as_str().to_uppercase()),
    ]
}
