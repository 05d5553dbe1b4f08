//! Inputs consumed and effects produced by the choreography core.
//!
//! The core performs no I/O. Runtimes feed it [`Input`]s and carry out the
//! [`Effect`]s it returns: render commands go to the renderer, timer
//! requests go to a clock, notifications go to observers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::approval::ApprovalIndicator;
use super::directive::HopDirective;
use super::state::{Generation, HopId, PhaseId, RunOutcome};
use crate::firewall::{Decision, FirewallRule};

// ============================================================================
// Renderer Protocol
// ============================================================================

/// Instruction for the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum RenderCommand {
    /// Animate one hop
    Dispatch(HopDirective),
    /// Stop any animation belonging to the track
    Cancel {
        /// Track whose visuals to cancel
        track: PhaseId,
    },
    /// End a hold and let the hop finish
    ReleaseHold {
        /// Held hop
        hop: HopId,
    },
}

/// Lifecycle event reported by the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RendererEvent {
    /// Hop animation began
    Launch {
        /// Hop
        hop: HopId,
    },
    /// Hop animation paused
    Pause {
        /// Hop
        hop: HopId,
    },
    /// Hop animation resumed
    Resume {
        /// Hop
        hop: HopId,
    },
    /// Hop reached its hold point
    #[serde(alias = "holdStart")]
    HoldStart {
        /// Hop
        hop: HopId,
    },
    /// Renderer-side hold animation finished
    #[serde(alias = "holdComplete")]
    HoldComplete {
        /// Hop
        hop: HopId,
    },
    /// Hop reached its destination
    Arrival {
        /// Hop
        hop: HopId,
        /// Generation captured when the hop was dispatched
        generation: Generation,
    },
}

impl RendererEvent {
    /// Returns the hop the event refers to.
    #[must_use]
    pub const fn hop(&self) -> &HopId {
        match self {
            Self::Launch { hop }
            | Self::Pause { hop }
            | Self::Resume { hop }
            | Self::HoldStart { hop }
            | Self::HoldComplete { hop }
            | Self::Arrival { hop, .. } => hop,
        }
    }
}

// ============================================================================
// Timers
// ============================================================================

/// Identity of a requested timer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "timer", rename_all = "snake_case")]
pub enum TimerId {
    /// Safety fallback ending a hold
    HoldFallback {
        /// Held hop
        hop: HopId,
    },
    /// Retry of a dispatch deferred on a missing anchor
    AnchorPoll {
        /// Deferred hop
        hop: HopId,
        /// 1-based retry number
        attempt: u32,
    },
    /// Auto-revert of the approval indicator
    ApprovalRevert {
        /// Indicator epoch the timer belongs to
        epoch: u64,
    },
}

impl TimerId {
    /// Returns the track the timer belongs to, if any.
    #[must_use]
    pub const fn track(&self) -> Option<&PhaseId> {
        match self {
            Self::HoldFallback { hop } | Self::AnchorPoll { hop, .. } => Some(&hop.track),
            Self::ApprovalRevert { .. } => None,
        }
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Observer-facing notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "notification", rename_all = "snake_case")]
pub enum Notification {
    /// Track stopped running
    TrackIdle {
        /// Track
        track: PhaseId,
        /// How the run ended
        outcome: RunOutcome,
    },
    /// Track halted on a deny decision
    TrackBlocked {
        /// Track
        track: PhaseId,
        /// Step that was denied
        step: usize,
        /// The deny decision
        decision: Decision,
    },
    /// An inspected hop completed with a decision
    DecisionMade {
        /// Track
        track: PhaseId,
        /// Inspected step
        step: usize,
        /// The decision
        decision: Decision,
    },
    /// Approval indicator changed
    ApprovalChanged {
        /// New indicator value
        indicator: ApprovalIndicator,
    },
    /// Selected phase changed
    PhaseSelected {
        /// Newly selected phase
        phase: PhaseId,
        /// Previously selected phase
        previous: Option<PhaseId>,
    },
}

// ============================================================================
// Effects and Inputs
// ============================================================================

/// Side effect requested by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
    /// Send a command to the renderer
    Render(RenderCommand),
    /// Fire `TimerFired(id)` after a delay
    StartTimer {
        /// Timer identity
        id: TimerId,
        /// Delay from now
        #[serde(with = "crate::serde_ext::duration_ms")]
        after: Duration,
    },
    /// Drop a previously requested timer
    CancelTimer {
        /// Timer identity
        id: TimerId,
    },
    /// Inform observers
    Notify(Notification),
}

impl Effect {
    pub(crate) const fn start_timer(id: TimerId, after: Duration) -> Self {
        Self::StartTimer { id, after }
    }

    pub(crate) const fn cancel_timer(id: TimerId) -> Self {
        Self::CancelTimer { id }
    }
}

/// Control-surface command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    /// Start the selected track from its first step
    Start,
    /// Stop the selected track and clear the approval indicator
    Stop,
    /// Dispatch the following step
    Next,
    /// Dispatch the preceding step
    Prev,
    /// Dispatch the current step again
    Replay,
    /// Reset and start the selected track
    Restart,
    /// Select a phase; unknown ids select the room default
    #[serde(alias = "setPhase")]
    SetPhase {
        /// Phase to select
        phase: PhaseId,
    },
    /// Select and restart the room's attack phase
    #[serde(alias = "simulateAttack")]
    SimulateAttack,
    /// Deliver a named external continuation event
    Acknowledge {
        /// Event name
        event: String,
    },
    /// Replace the firewall rule list
    SetRules {
        /// New rules
        rules: Vec<FirewallRule>,
    },
    /// Insert or replace one rule by id
    UpsertRule {
        /// Rule
        rule: FirewallRule,
    },
    /// Remove one rule by id
    RemoveRule {
        /// Rule id
        id: String,
    },
    /// Restore the room's rule list
    ResetRules,
    /// Enable or disable auto-chaining
    SetAutoRun {
        /// Whether completed phases start their successor
        enabled: bool,
    },
}

/// Anything the core reacts to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Input {
    /// Control-surface command
    Command(Command),
    /// Renderer lifecycle event
    Renderer(RendererEvent),
    /// A requested timer elapsed
    TimerFired(TimerId),
}

impl From<Command> for Input {
    fn from(c: Command) -> Self {
        Self::Command(c)
    }
}

impl From<RendererEvent> for Input {
    fn from(e: RendererEvent) -> Self {
        Self::Renderer(e)
    }
}
