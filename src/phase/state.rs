//! Track state and identifiers.
//!
//! A track's mutable state is one [`FlowTrackState`]: a step index, a
//! generation counter, and a single status. Every asynchronous continuation
//! carries the generation it was scheduled under, and is dropped when that
//! generation is no longer current.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Identifiers
// ============================================================================

/// Phase track identifier (`"dns"`, `"tls"`, `"https"`, `"vpn"`, `"attack"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseId(pub String);

impl PhaseId {
    /// Creates a phase id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PhaseId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Run counter of a track. Bumped by start, restart, stop, and phase switches.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(pub u64);

impl Generation {
    /// Returns the following generation.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one dispatched hop: `"<track>:<step>:<generation>"`.
///
/// The track id may itself contain `:`; parsing splits from the right.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct HopId {
    /// Owning track
    pub track: PhaseId,
    /// Step index within the track's path
    pub step: usize,
    /// Generation the hop was dispatched under
    pub generation: Generation,
}

impl HopId {
    /// Creates a hop id.
    #[must_use]
    pub const fn new(track: PhaseId, step: usize, generation: Generation) -> Self {
        Self {
            track,
            step,
            generation,
        }
    }
}

impl fmt::Display for HopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.track, self.step, self.generation)
    }
}

/// Error parsing a [`HopId`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid hop id '{input}': expected '<track>:<step>:<generation>'")]
pub struct HopIdParseError {
    /// Rejected input
    pub input: String,
}

impl FromStr for HopId {
    type Err = HopIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || HopIdParseError {
            input: s.to_string(),
        };
        let mut parts = s.rsplitn(3, ':');
        let generation = parts.next().and_then(|g| g.parse().ok()).ok_or_else(err)?;
        let step = parts.next().and_then(|n| n.parse().ok()).ok_or_else(err)?;
        let track = parts.next().filter(|t| !t.is_empty()).ok_or_else(err)?;
        Ok(Self::new(PhaseId::new(track), step, Generation(generation)))
    }
}

impl From<HopId> for String {
    fn from(id: HopId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for HopId {
    type Error = HopIdParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

// ============================================================================
// Track State
// ============================================================================

/// Status of a phase track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    /// Not running; step index says where a resume would pick up
    #[default]
    Idle,
    /// Waiting for an anchor before dispatching the current step
    Pending,
    /// Hop dispatched, awaiting arrival
    Active,
    /// Hop paused at an inspection node
    Holding,
    /// Run ended on a deny decision
    Blocked,
}

impl TrackStatus {
    /// Returns whether a hop is outstanding or about to be.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Pending | Self::Active | Self::Holding)
    }
}

/// Snapshot of one track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowTrackState {
    /// Track id
    pub phase_id: PhaseId,
    /// Current step, `-1` when no step is current
    pub step_index: i64,
    /// Current generation
    pub generation: Generation,
    /// Current status
    pub status: TrackStatus,
    /// Whether the renderer reported the current hop as paused
    pub paused: bool,
}

impl FlowTrackState {
    /// Creates the initial state of a track.
    #[must_use]
    pub const fn new(phase_id: PhaseId) -> Self {
        Self {
            phase_id,
            step_index: -1,
            generation: Generation(0),
            status: TrackStatus::Idle,
            paused: false,
        }
    }

    /// Returns the current step as an index, if there is one.
    #[must_use]
    pub fn current_step(&self) -> Option<usize> {
        usize::try_from(self.step_index).ok()
    }
}

/// How a run of a track ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every hop arrived
    Completed,
    /// An anchor never appeared and the run was given up
    Abandoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_id_text_form() {
        let id = HopId::new(PhaseId::new("dns"), 2, Generation(7));
        assert_eq!(id.to_string(), "dns:2:7");
        assert_eq!("dns:2:7".parse::<HopId>().unwrap(), id);
    }

    #[test]
    fn test_hop_id_track_may_contain_colon() {
        let id: HopId = "lab:vpn:0:3".parse().unwrap();
        assert_eq!(id.track.as_str(), "lab:vpn");
        assert_eq!(id.step, 0);
        assert_eq!(id.generation, Generation(3));
    }

    #[test]
    fn test_hop_id_rejects_malformed() {
        for bad in ["", "dns", "dns:1", ":1:2", "dns:x:2", "dns:1:-2", "dns:-1:2"] {
            assert!(bad.parse::<HopId>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_hop_id_serializes_as_string() {
        let id = HopId::new(PhaseId::new("tls"), 0, Generation(1));
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"tls:0:1\"");
        let back: HopId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_generation_next() {
        assert_eq!(Generation(0).next(), Generation(1));
        assert_eq!(Generation(u64::MAX).next(), Generation(0));
    }

    #[test]
    fn test_initial_track_state() {
        let s = FlowTrackState::new(PhaseId::new("https"));
        assert_eq!(s.step_index, -1);
        assert_eq!(s.current_step(), None);
        assert_eq!(s.status, TrackStatus::Idle);
        assert!(!s.status.is_running());
    }
}
