//! Structured event stream for `packetwalk`.
//!
//! Typed events serialized as newline-delimited JSON, each carrying a
//! monotonically increasing sequence number. Choreography events also carry
//! the core's clock (`clock_ms`), which is simulated time under `play`.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::firewall::RuleAction;
use crate::phase::{ApprovalValue, Effect, Notification, PhaseId, RenderCommand, RunOutcome};

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A discrete event emitted while a room plays.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A session began.
    SessionStarted {
        /// Wall-clock time.
        timestamp: DateTime<Utc>,
        /// Random session id.
        session_id: String,
        /// Room name.
        room: String,
    },

    /// A session ended.
    SessionStopped {
        /// Wall-clock time.
        timestamp: DateTime<Utc>,
        /// Human-readable stop reason.
        reason: String,
    },

    /// The selected phase changed.
    PhaseSelected {
        /// Wall-clock time.
        timestamp: DateTime<Utc>,
        /// Core clock in milliseconds.
        clock_ms: u64,
        /// Newly selected phase.
        phase: String,
        /// Previously selected phase.
        previous: Option<String>,
    },

    /// A hop directive was handed to the renderer.
    HopDispatched {
        /// Wall-clock time.
        timestamp: DateTime<Utc>,
        /// Core clock in milliseconds.
        clock_ms: u64,
        /// Hop id (`track:step:generation`).
        hop_id: String,
        /// Origin anchor.
        from: String,
        /// Destination anchor.
        to: String,
        /// Packet label.
        label: String,
        /// Whether the hop is inspected.
        inspected: bool,
        /// Whether the run halts after this hop.
        blocks_after_hold: bool,
    },

    /// A firewall decision was reached.
    DecisionMade {
        /// Wall-clock time.
        timestamp: DateTime<Utc>,
        /// Core clock in milliseconds.
        clock_ms: u64,
        /// Track.
        track: String,
        /// Inspected step.
        step: usize,
        /// Resulting action.
        action: RuleAction,
        /// Matched rule, absent under default-deny.
        matched_rule_id: Option<String>,
    },

    /// A run halted on a deny decision.
    TrackBlocked {
        /// Wall-clock time.
        timestamp: DateTime<Utc>,
        /// Core clock in milliseconds.
        clock_ms: u64,
        /// Track.
        track: String,
        /// Denied step.
        step: usize,
    },

    /// A run finished.
    TrackIdle {
        /// Wall-clock time.
        timestamp: DateTime<Utc>,
        /// Core clock in milliseconds.
        clock_ms: u64,
        /// Track.
        track: String,
        /// How the run ended.
        outcome: RunOutcome,
    },

    /// The approval indicator changed.
    ApprovalChanged {
        /// Wall-clock time.
        timestamp: DateTime<Utc>,
        /// Core clock in milliseconds.
        clock_ms: u64,
        /// New value.
        value: ApprovalValue,
        /// Core clock at which the value reverts.
        expires_at_ms: Option<u64>,
    },
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn name(phase: &PhaseId) -> String {
    phase.as_str().to_string()
}

impl Event {
    /// Creates a session start event with a fresh session id.
    #[must_use]
    pub fn session_started(room: &str) -> Self {
        Self::SessionStarted {
            timestamp: Utc::now(),
            session_id: uuid::Uuid::new_v4().to_string(),
            room: room.to_string(),
        }
    }

    /// Creates a session stop event.
    #[must_use]
    pub fn session_stopped(reason: impl Into<String>) -> Self {
        Self::SessionStopped {
            timestamp: Utc::now(),
            reason: reason.into(),
        }
    }

    /// Maps an effect to the event observers care about, if any.
    ///
    /// Timer bookkeeping and cancel/release commands have no event.
    #[must_use]
    pub fn from_effect(effect: &Effect, clock: Duration) -> Option<Self> {
        let timestamp = Utc::now();
        let clock_ms = millis(clock);
        let event = match effect {
            Effect::Render(RenderCommand::Dispatch(d)) => Self::HopDispatched {
                timestamp,
                clock_ms,
                hop_id: d.hop_id.to_string(),
                from: d.from.to_string(),
                to: d.to.to_string(),
                label: d.label.clone(),
                inspected: d.inspection.is_some(),
                blocks_after_hold: d.blocks_after_hold,
            },
            Effect::Notify(Notification::PhaseSelected { phase, previous }) => {
                Self::PhaseSelected {
                    timestamp,
                    clock_ms,
                    phase: name(phase),
                    previous: previous.as_ref().map(name),
                }
            }
            Effect::Notify(Notification::DecisionMade {
                track,
                step,
                decision,
            }) => Self::DecisionMade {
                timestamp,
                clock_ms,
                track: name(track),
                step: *step,
                action: decision.action,
                matched_rule_id: decision.matched_rule_id.clone(),
            },
            Effect::Notify(Notification::TrackBlocked { track, step, .. }) => Self::TrackBlocked {
                timestamp,
                clock_ms,
                track: name(track),
                step: *step,
            },
            Effect::Notify(Notification::TrackIdle { track, outcome }) => Self::TrackIdle {
                timestamp,
                clock_ms,
                track: name(track),
                outcome: *outcome,
            },
            Effect::Notify(Notification::ApprovalChanged { indicator }) => Self::ApprovalChanged {
                timestamp,
                clock_ms,
                value: indicator.value,
                expires_at_ms: indicator.expires_at.map(millis),
            },
            Effect::Render(_) | Effect::StartTimer { .. } | Effect::CancelTimer { .. } => {
                return None;
            }
        };
        Some(event)
    }
}

// ---------------------------------------------------------------------------
// Envelope (adds sequence number via serde flatten)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EventEnvelope {
    sequence: u64,
    #[serde(flatten)]
    event: Event,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Serialization or I/O failures are dropped: observability never stops
/// a session.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Creates an emitter that writes to stderr.
    ///
    /// The live loop uses stdout for effects, so its events go here.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates an emitter that discards all events.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that writes to a file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Emits an event as a single JSONL line.
    pub fn emit(&self, event: Event) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            sequence: seq,
            event,
        };

        if let Ok(mut w) = self.writer.lock()
            && let Ok(line) = serde_json::to_string(&envelope)
        {
            let _ = writeln!(w, "{line}");
            let _ = w.flush();
        }
    }

    /// Emits the event for each effect that has one.
    pub fn emit_effects(&self, effects: &[Effect], clock: Duration) {
        for event in effects.iter().filter_map(|e| Event::from_effect(e, clock)) {
            self.emit(event);
        }
    }

    /// Number of events emitted so far.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}
