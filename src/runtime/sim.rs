//! Deterministic simulation runtime.
//!
//! Drives a [`PhaseOrchestrator`] against a scripted renderer on a virtual
//! clock. Timers, renderer events and late-loading anchors share one
//! ordered queue keyed by `(due time, insertion order)`, so a run is fully
//! reproducible and takes no wall-clock time.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, trace};

use crate::error::PacketwalkError;
use crate::phase::{
    Command, Effect, Input, PhaseId, PhaseOrchestrator, RenderCommand, RendererEvent, Room, TimerId,
};
use crate::serde_ext::parse_duration;
use crate::topology::{Anchor, Position};

/// Longest stretch of virtual time [`Simulation::settle`] will run.
pub const DEFAULT_SETTLE_LIMIT: Duration = Duration::from_secs(600);

// ============================================================================
// Renderer
// ============================================================================

/// A renderer event due some time after the command that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scheduled {
    /// Delay from the command
    pub after: Duration,
    /// Event to deliver
    pub event: RendererEvent,
}

/// Stand-in for the animation layer.
pub trait Renderer {
    /// Reacts to a render command with the events it will report.
    fn render(&mut self, command: &RenderCommand) -> Vec<Scheduled>;
}

/// Renderer that plays every hop for exactly its travel time.
///
/// A held hop reports `hold_start` on reaching its hold point and, unless
/// the hold waits for an external event, `hold_complete` once the hold
/// animation would finish. Other hops report `arrival`.
#[derive(Debug, Clone)]
pub struct ScriptedRenderer {
    report_hold_complete: bool,
    silent: bool,
}

impl Default for ScriptedRenderer {
    fn default() -> Self {
        Self {
            report_hold_complete: true,
            silent: false,
        }
    }
}

impl ScriptedRenderer {
    /// Creates a renderer that reports every lifecycle event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a renderer that reports nothing; events are injected by hand.
    #[must_use]
    pub const fn silent() -> Self {
        Self {
            report_hold_complete: false,
            silent: true,
        }
    }

    /// Leaves hold endings to the core's fallback timer.
    #[must_use]
    pub const fn without_hold_complete(mut self) -> Self {
        self.report_hold_complete = false;
        self
    }
}

impl Renderer for ScriptedRenderer {
    fn render(&mut self, command: &RenderCommand) -> Vec<Scheduled> {
        let RenderCommand::Dispatch(directive) = command else {
            return Vec::new();
        };
        if self.silent {
            return Vec::new();
        }

        let hop = directive.hop_id.clone();
        let travel = directive.travel.duration;
        let mut events = vec![Scheduled {
            after: Duration::ZERO,
            event: RendererEvent::Launch { hop: hop.clone() },
        }];

        if directive.holds() {
            events.push(Scheduled {
                after: travel,
                event: RendererEvent::HoldStart { hop: hop.clone() },
            });
            if self.report_hold_complete
                && directive.hold_until_event.is_none()
                && let Some(hold) = directive.hold
            {
                events.push(Scheduled {
                    after: travel + hold,
                    event: RendererEvent::HoldComplete { hop },
                });
            }
        } else {
            events.push(Scheduled {
                after: travel,
                event: RendererEvent::Arrival {
                    generation: hop.generation,
                    hop,
                },
            });
        }
        events
    }
}

// ============================================================================
// Trace
// ============================================================================

/// One effect together with the virtual time it was produced at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEntry {
    /// Virtual time
    #[serde(rename = "at_ms", with = "crate::serde_ext::duration_ms")]
    pub at: Duration,
    /// The effect
    pub effect: Effect,
}

#[derive(Debug, Clone)]
enum Queued {
    Timer(TimerId),
    Renderer(RendererEvent),
    Anchor(Anchor, Position),
}

type QueueKey = (Duration, u64);

// ============================================================================
// Simulation
// ============================================================================

/// Virtual-clock runtime for one room.
#[derive(Debug)]
pub struct Simulation<R: Renderer = ScriptedRenderer> {
    orchestrator: PhaseOrchestrator,
    renderer: R,
    queue: BTreeMap<QueueKey, Queued>,
    timers: HashMap<TimerId, QueueKey>,
    seq: u64,
    now: Duration,
    trace: Vec<TraceEntry>,
}

impl Simulation<ScriptedRenderer> {
    /// Creates a simulation with the default scripted renderer.
    #[must_use]
    pub fn with_scripted_renderer(room: Room) -> Self {
        Self::new(room, ScriptedRenderer::new())
    }
}

impl<R: Renderer> Simulation<R> {
    /// Creates a simulation at time zero.
    ///
    /// Anchors with `appears_after` are placed into the scene when their
    /// delay elapses.
    #[must_use]
    pub fn new(room: Room, renderer: R) -> Self {
        let scene = room.initial_scene();
        let late: Vec<(Duration, Anchor, Position)> = room
            .late_anchors()
            .map(|(name, spec)| (spec.appears_after, name.clone(), spec.position))
            .collect();

        let mut sim = Self {
            orchestrator: PhaseOrchestrator::new(room, scene),
            renderer,
            queue: BTreeMap::new(),
            timers: HashMap::new(),
            seq: 0,
            now: Duration::ZERO,
            trace: Vec::new(),
        };
        for (at, name, position) in late {
            sim.enqueue(at, Queued::Anchor(name, position));
        }
        sim
    }

    /// Current virtual time.
    #[must_use]
    pub const fn now(&self) -> Duration {
        self.now
    }

    /// The orchestrator being driven.
    #[must_use]
    pub const fn orchestrator(&self) -> &PhaseOrchestrator {
        &self.orchestrator
    }

    /// Every effect produced so far, in order.
    #[must_use]
    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    /// Drains the trace.
    pub fn take_trace(&mut self) -> Vec<TraceEntry> {
        std::mem::take(&mut self.trace)
    }

    /// Number of queued timers, renderer events and anchors.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Due time of the earliest queued item.
    #[must_use]
    pub fn next_due(&self) -> Option<Duration> {
        self.queue.keys().next().map(|(at, _)| *at)
    }

    /// Feeds one input at the current time and carries out its effects.
    pub fn send(&mut self, input: impl Into<Input>) -> Vec<Effect> {
        self.orchestrator.set_time(self.now);
        let effects = self.orchestrator.handle(input.into());
        self.apply(&effects);
        effects
    }

    /// Sends a control-surface command.
    pub fn command(&mut self, command: Command) -> Vec<Effect> {
        self.send(command)
    }

    /// Delivers the earliest queued item. Returns `false` if nothing is queued.
    pub fn step(&mut self) -> bool {
        let Some(((at, seq), item)) = self.queue.pop_first() else {
            return false;
        };
        self.now = self.now.max(at);
        trace!(at = ?self.now, seq, ?item, "delivering");
        match item {
            Queued::Timer(id) => {
                self.timers.remove(&id);
                self.send(Input::TimerFired(id));
            }
            Queued::Renderer(event) => {
                self.send(event);
            }
            Queued::Anchor(name, position) => {
                debug!(anchor = %name, "anchor appeared");
                self.orchestrator.topology_mut().place(name, position);
            }
        }
        true
    }

    /// Runs everything due within `by`, then moves the clock to `now + by`.
    pub fn advance(&mut self, by: Duration) {
        let deadline = self.now + by;
        while self.next_due().is_some_and(|at| at <= deadline) {
            self.step();
        }
        self.now = deadline;
    }

    /// Runs until nothing is queued or `limit` of virtual time has passed.
    ///
    /// Returns `true` if the queue drained.
    pub fn settle(&mut self, limit: Duration) -> bool {
        let deadline = self.now + limit;
        while let Some(at) = self.next_due() {
            if at > deadline {
                debug!(pending = self.pending(), "settle limit reached");
                return false;
            }
            self.step();
        }
        true
    }

    /// Plays a script.
    pub fn run_script(&mut self, steps: &[ScriptStep]) {
        for step in steps {
            match step {
                ScriptStep::Command(command) => {
                    self.command(command.clone());
                }
                ScriptStep::Wait(by) => self.advance(*by),
                ScriptStep::Settle => {
                    self.settle(DEFAULT_SETTLE_LIMIT);
                }
            }
        }
    }

    fn apply(&mut self, effects: &[Effect]) {
        for effect in effects {
            self.trace.push(TraceEntry {
                at: self.now,
                effect: effect.clone(),
            });
            match effect {
                Effect::StartTimer { id, after } => {
                    self.cancel_timer(id);
                    let key = self.enqueue(self.now + *after, Queued::Timer(id.clone()));
                    self.timers.insert(id.clone(), key);
                }
                Effect::CancelTimer { id } => self.cancel_timer(id),
                Effect::Render(command) => {
                    if let RenderCommand::Cancel { track } = command {
                        self.drop_renderer_events(track);
                    }
                    for scheduled in self.renderer.render(command) {
                        self.enqueue(
                            self.now + scheduled.after,
                            Queued::Renderer(scheduled.event),
                        );
                    }
                }
                Effect::Notify(_) => {}
            }
        }
    }

    fn enqueue(&mut self, at: Duration, item: Queued) -> QueueKey {
        let key = (at, self.seq);
        self.seq += 1;
        self.queue.insert(key, item);
        key
    }

    fn cancel_timer(&mut self, id: &TimerId) {
        if let Some(key) = self.timers.remove(id) {
            self.queue.remove(&key);
        }
    }

    fn drop_renderer_events(&mut self, track: &PhaseId) {
        self.queue.retain(|_, item| match item {
            Queued::Renderer(event) => &event.hop().track != track,
            _ => true,
        });
    }
}

// ============================================================================
// Scripts
// ============================================================================

/// One step of a `play` script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// Send a command
    Command(Command),
    /// Let virtual time pass
    Wait(Duration),
    /// Run until nothing is pending
    Settle,
}

impl FromStr for ScriptStep {
    type Err = PacketwalkError;

    /// Parses `start`, `stop`, `next`, `prev`, `replay`, `restart`,
    /// `attack`, `settle`, `reset-rules`, `phase:<id>`, `ack:<event>`,
    /// `wait:<duration>`, `auto:on|off` and `remove-rule:<id>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let usage = |reason: &str| PacketwalkError::Usage(format!("invalid script step '{s}': {reason}"));
        let (head, arg) = match s.split_once(':') {
            Some((head, arg)) => (head, Some(arg.trim())),
            None => (s, None),
        };

        let step = match (head, arg) {
            ("start", None) => Self::Command(Command::Start),
            ("stop", None) => Self::Command(Command::Stop),
            ("next", None) => Self::Command(Command::Next),
            ("prev", None) => Self::Command(Command::Prev),
            ("replay", None) => Self::Command(Command::Replay),
            ("restart", None) => Self::Command(Command::Restart),
            ("attack", None) => Self::Command(Command::SimulateAttack),
            ("reset-rules", None) => Self::Command(Command::ResetRules),
            ("settle", None) => Self::Settle,
            ("phase", Some(id)) if !id.is_empty() => Self::Command(Command::SetPhase {
                phase: PhaseId::new(id),
            }),
            ("ack", Some(event)) if !event.is_empty() => Self::Command(Command::Acknowledge {
                event: event.to_string(),
            }),
            ("remove-rule", Some(id)) if !id.is_empty() => Self::Command(Command::RemoveRule {
                id: id.to_string(),
            }),
            ("wait", Some(d)) => Self::Wait(parse_duration(d).map_err(|e| usage(&e))?),
            ("auto", Some("on")) => Self::Command(Command::SetAutoRun { enabled: true }),
            ("auto", Some("off")) => Self::Command(Command::SetAutoRun { enabled: false }),
            ("auto", _) => return Err(usage("expected auto:on or auto:off")),
            _ => return Err(usage("unknown step")),
        };
        Ok(step)
    }
}

impl fmt::Display for ScriptStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wait(d) => write!(f, "wait:{}", humantime::format_duration(*d)),
            Self::Settle => f.write_str("settle"),
            Self::Command(c) => match c {
                Command::Start => f.write_str("start"),
                Command::Stop => f.write_str("stop"),
                Command::Next => f.write_str("next"),
                Command::Prev => f.write_str("prev"),
                Command::Replay => f.write_str("replay"),
                Command::Restart => f.write_str("restart"),
                Command::SimulateAttack => f.write_str("attack"),
                Command::ResetRules => f.write_str("reset-rules"),
                Command::SetPhase { phase } => write!(f, "phase:{phase}"),
                Command::Acknowledge { event } => write!(f, "ack:{event}"),
                Command::RemoveRule { id } => write!(f, "remove-rule:{id}"),
                Command::SetAutoRun { enabled } => {
                    write!(f, "auto:{}", if *enabled { "on" } else { "off" })
                }
                Command::SetRules { .. } | Command::UpsertRule { .. } => write!(f, "{c:?}"),
            },
        }
    }
}

/// Parses a comma- or whitespace-separated script.
///
/// # Errors
///
/// Returns a usage error naming the first step that does not parse.
pub fn parse_script(text: &str) -> Result<Vec<ScriptStep>, PacketwalkError> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}
