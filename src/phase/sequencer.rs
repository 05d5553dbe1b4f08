//! Flow sequencer: the per-track state machine.
//!
//! A sequencer walks one phase's path hop by hop. It dispatches at most one
//! directive at a time and suspends in two places only: waiting for the
//! renderer's `arrival`, and waiting for a hold to end. Every continuation
//! (renderer events, timers) carries the generation it was created under
//! and is discarded if that generation is no longer current.
//!
//! State transitions:
//!
//! ```text
//! Idle(-1) --start--> Active(0) --arrival--> Active(1) ... --arrival--> Idle(-1)
//!                        |  ^                     |
//!                 holdStart  release        deny decision
//!                        v  |                     v
//!                     Holding(i)              Blocked(i)
//! ```
//!
//! `Pending(i)` stands in for `Active(i)` while an anchor of step `i` is not
//! yet in the scene.

use tracing::{debug, info, warn};

use super::directive::{BuildContext, BuildOutcome, HopDirective, build};
use super::effect::{Effect, Notification, RenderCommand, TimerId};
use super::state::{FlowTrackState, Generation, HopId, PhaseId, RunOutcome, TrackStatus};
use crate::observability::metrics;

/// Dispatched hop awaiting completion.
#[derive(Debug, Clone)]
struct Outstanding {
    directive: HopDirective,
    awaiting_event: Option<String>,
}

/// State machine for one phase track.
#[derive(Debug, Clone)]
pub struct FlowSequencer {
    state: FlowTrackState,
    outstanding: Option<Outstanding>,
    timer: Option<TimerId>,
    poll_attempts: u32,
}

impl FlowSequencer {
    /// Creates an idle track.
    #[must_use]
    pub const fn new(phase_id: PhaseId) -> Self {
        Self {
            state: FlowTrackState::new(phase_id),
            outstanding: None,
            timer: None,
            poll_attempts: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &FlowTrackState {
        &self.state
    }

    /// Track id.
    #[must_use]
    pub const fn phase_id(&self) -> &PhaseId {
        &self.state.phase_id
    }

    /// Directive currently dispatched, if any.
    #[must_use]
    pub fn outstanding(&self) -> Option<&HopDirective> {
        self.outstanding.as_ref().map(|o| &o.directive)
    }

    // ========================================================================
    // Control surface
    // ========================================================================

    /// Starts a fresh run from step 0. Ignored unless the track is idle.
    pub fn start(&mut self, ctx: &BuildContext<'_>) -> Vec<Effect> {
        if self.state.status != TrackStatus::Idle {
            debug!(track = %self.state.phase_id, status = ?self.state.status, "start ignored");
            return Vec::new();
        }
        self.bump_generation();
        info!(track = %self.state.phase_id, generation = %self.state.generation, "track started");

        if ctx.room.path(&self.state.phase_id).is_empty() {
            return self.finish();
        }
        self.dispatch_step(0, ctx)
    }

    /// Abandons the run and cancels its visuals.
    pub fn stop(&mut self) -> Vec<Effect> {
        self.bump_generation();
        let mut effects = self.clear_timer();
        self.outstanding = None;
        effects.push(self.cancel_render());
        self.state.step_index = -1;
        self.state.status = TrackStatus::Idle;
        info!(track = %self.state.phase_id, "track stopped");
        effects
    }

    /// Stops the run but keeps the step index so `replay` can resume it.
    pub fn freeze(&mut self) -> Vec<Effect> {
        self.bump_generation();
        let mut effects = self.clear_timer();
        if self.outstanding.take().is_some() || self.state.status.is_running() {
            effects.push(self.cancel_render());
        }
        self.state.status = TrackStatus::Idle;
        debug!(track = %self.state.phase_id, step = self.state.step_index, "track frozen");
        effects
    }

    /// Resets the track and starts a new run.
    pub fn restart(&mut self, ctx: &BuildContext<'_>) -> Vec<Effect> {
        let mut effects = self.stop();
        effects.extend(self.start(ctx));
        effects
    }

    /// Dispatches the step after the current one. No-op past the last step.
    pub fn next(&mut self, ctx: &BuildContext<'_>) -> Vec<Effect> {
        let target = self.state.step_index + 1;
        self.step_to(target, ctx)
    }

    /// Dispatches the step before the current one, stopping at step 0.
    pub fn prev(&mut self, ctx: &BuildContext<'_>) -> Vec<Effect> {
        let target = (self.state.step_index - 1).max(0);
        self.step_to(target, ctx)
    }

    /// Dispatches the current step again. No-op when no step is current.
    pub fn replay(&mut self, ctx: &BuildContext<'_>) -> Vec<Effect> {
        if self.state.step_index < 0 {
            return Vec::new();
        }
        self.step_to(self.state.step_index, ctx)
    }

    /// Invalidates all continuations without touching anything else.
    pub fn bump_generation(&mut self) {
        self.state.generation = self.state.generation.next();
    }

    fn step_to(&mut self, target: i64, ctx: &BuildContext<'_>) -> Vec<Effect> {
        // A denied run only leaves Blocked through stop or restart.
        if self.state.status == TrackStatus::Blocked {
            debug!(track = %self.state.phase_id, target, "manual step ignored while blocked");
            return Vec::new();
        }
        let len = ctx.room.path(&self.state.phase_id).len();
        let Some(step) = usize::try_from(target).ok().filter(|&s| s < len) else {
            debug!(track = %self.state.phase_id, target, len, "step out of range");
            return Vec::new();
        };
        let mut effects = self.clear_timer();
        if self.outstanding.take().is_some() {
            effects.push(self.cancel_render());
        }
        effects.extend(self.dispatch_step(step, ctx));
        effects
    }

    // ========================================================================
    // Renderer events
    // ========================================================================

    /// Handles `arrival(hop, generation)`.
    pub fn arrival(
        &mut self,
        hop: &HopId,
        generation: Generation,
        ctx: &BuildContext<'_>,
    ) -> Vec<Effect> {
        if generation != hop.generation || !self.is_current(hop) {
            self.discard("arrival", hop);
            return Vec::new();
        }
        match self.state.status {
            TrackStatus::Active => self.complete_hop(ctx),
            TrackStatus::Holding => {
                debug!(%hop, "arrival ignored while holding");
                Vec::new()
            }
            _ => {
                self.discard("arrival", hop);
                Vec::new()
            }
        }
    }

    /// Handles `holdStart(hop)`.
    pub fn hold_start(&mut self, hop: &HopId, ctx: &BuildContext<'_>) -> Vec<Effect> {
        if !self.is_current(hop) || self.state.status != TrackStatus::Active {
            self.discard("hold_start", hop);
            return Vec::new();
        }
        let Some(outstanding) = self.outstanding.as_mut() else {
            return Vec::new();
        };
        let directive = &outstanding.directive;
        if !directive.holds() {
            debug!(%hop, "hold_start for a hop without a hold");
            return Vec::new();
        }

        let wait = directive.hold.unwrap_or(ctx.room.timing.inspection_hold);
        outstanding.awaiting_event.clone_from(&directive.hold_until_event);
        let timer = TimerId::HoldFallback { hop: hop.clone() };
        self.timer = Some(timer.clone());
        self.state.status = TrackStatus::Holding;
        debug!(%hop, ?wait, event = ?outstanding.awaiting_event, "holding");
        vec![Effect::start_timer(timer, wait)]
    }

    /// Handles `holdComplete(hop)`. An awaited external event takes precedence.
    pub fn hold_complete(&mut self, hop: &HopId, ctx: &BuildContext<'_>) -> Vec<Effect> {
        if !self.is_current(hop) || self.state.status != TrackStatus::Holding {
            self.discard("hold_complete", hop);
            return Vec::new();
        }
        if let Some(event) = self.outstanding.as_ref().and_then(|o| o.awaiting_event.as_ref()) {
            debug!(%hop, %event, "hold_complete ignored, awaiting event");
            return Vec::new();
        }
        self.end_hold(ctx)
    }

    /// Handles `launch`, `pause` and `resume`.
    pub fn lifecycle(&mut self, hop: &HopId, paused: Option<bool>) {
        if !self.is_current(hop) {
            self.discard("lifecycle", hop);
            return;
        }
        if let Some(paused) = paused {
            self.state.paused = paused;
        }
    }

    /// Delivers a named external event. Returns effects if it ended a hold.
    pub fn acknowledge(&mut self, event: &str, ctx: &BuildContext<'_>) -> Vec<Effect> {
        let awaited = self
            .outstanding
            .as_ref()
            .and_then(|o| o.awaiting_event.as_deref())
            == Some(event);
        if self.state.status != TrackStatus::Holding || !awaited {
            return Vec::new();
        }
        info!(track = %self.state.phase_id, event, "hold acknowledged");
        self.end_hold(ctx)
    }

    /// Handles a fired timer addressed to this track.
    pub fn timer_fired(&mut self, id: &TimerId, ctx: &BuildContext<'_>) -> Vec<Effect> {
        if self.timer.as_ref() != Some(id) {
            debug!(?id, "ignoring stale timer");
            metrics::record_stale_event("timer");
            return Vec::new();
        }
        self.timer = None;
        match (id, self.state.status) {
            (TimerId::HoldFallback { hop }, TrackStatus::Holding) if self.is_current(hop) => {
                debug!(%hop, "hold fallback elapsed");
                self.end_hold(ctx)
            }
            (TimerId::AnchorPoll { hop, .. }, TrackStatus::Pending)
                if hop.generation == self.state.generation =>
            {
                self.try_dispatch(hop.step, ctx)
            }
            _ => {
                debug!(?id, status = ?self.state.status, "timer no longer applies");
                Vec::new()
            }
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn is_current(&self, hop: &HopId) -> bool {
        hop.generation == self.state.generation
            && self
                .outstanding
                .as_ref()
                .is_some_and(|o| &o.directive.hop_id == hop)
    }

    fn discard(&self, kind: &'static str, hop: &HopId) {
        debug!(
            %hop,
            kind,
            current = %self.state.generation,
            step = self.state.step_index,
            "discarding stale event"
        );
        metrics::record_stale_event(kind);
    }

    fn dispatch_step(&mut self, step: usize, ctx: &BuildContext<'_>) -> Vec<Effect> {
        self.poll_attempts = 0;
        self.try_dispatch(step, ctx)
    }

    fn try_dispatch(&mut self, step: usize, ctx: &BuildContext<'_>) -> Vec<Effect> {
        let phase = self.state.phase_id.clone();
        let Some(segment) = ctx.room.path(&phase).get(step) else {
            return self.finish();
        };
        self.state.step_index = i64::try_from(step).unwrap_or(i64::MAX);
        self.state.paused = false;

        match build(&phase, step, segment, self.state.generation, ctx) {
            BuildOutcome::Ready(directive) => {
                debug!(hop = %directive.hop_id, from = %directive.from, to = %directive.to, "dispatching hop");
                metrics::record_hop_dispatched(phase.as_str());
                self.state.status = TrackStatus::Active;
                self.outstanding = Some(Outstanding {
                    directive: directive.clone(),
                    awaiting_event: None,
                });
                vec![Effect::Render(RenderCommand::Dispatch(directive))]
            }
            BuildOutcome::Deferred { missing } => {
                if self.poll_attempts >= ctx.room.timing.anchor_poll_limit {
                    warn!(
                        track = %phase,
                        step,
                        anchor = %missing,
                        attempts = self.poll_attempts,
                        "anchor never appeared; giving up"
                    );
                    self.state.status = TrackStatus::Idle;
                    self.state.step_index = -1;
                    return vec![Effect::Notify(Notification::TrackIdle {
                        track: phase,
                        outcome: RunOutcome::Abandoned,
                    })];
                }
                self.poll_attempts += 1;
                debug!(track = %phase, step, anchor = %missing, attempt = self.poll_attempts, "anchor missing; deferring");
                let timer = TimerId::AnchorPoll {
                    hop: HopId::new(phase, step, self.state.generation),
                    attempt: self.poll_attempts,
                };
                self.timer = Some(timer.clone());
                self.state.status = TrackStatus::Pending;
                vec![Effect::start_timer(timer, ctx.room.timing.anchor_poll)]
            }
        }
    }

    fn end_hold(&mut self, ctx: &BuildContext<'_>) -> Vec<Effect> {
        let mut effects = self.clear_timer();
        if let Some(o) = &self.outstanding {
            effects.push(Effect::Render(RenderCommand::ReleaseHold {
                hop: o.directive.hop_id.clone(),
            }));
        }
        self.state.status = TrackStatus::Active;
        effects.extend(self.complete_hop(ctx));
        effects
    }

    fn complete_hop(&mut self, ctx: &BuildContext<'_>) -> Vec<Effect> {
        let Some(Outstanding { directive, .. }) = self.outstanding.take() else {
            return Vec::new();
        };
        let step = directive.hop_id.step;
        let track = self.state.phase_id.clone();
        let mut effects = Vec::new();

        if let Some(decision) = directive.decision() {
            effects.push(Effect::Notify(Notification::DecisionMade {
                track: track.clone(),
                step,
                decision: decision.clone(),
            }));
            if directive.blocks_after_hold {
                info!(%track, step, "track blocked");
                metrics::record_track_blocked(track.as_str());
                self.state.status = TrackStatus::Blocked;
                effects.push(Effect::Notify(Notification::TrackBlocked {
                    track,
                    step,
                    decision: decision.clone(),
                }));
                return effects;
            }
        }

        if step + 1 >= ctx.room.path(&track).len() {
            effects.extend(self.finish());
        } else {
            effects.extend(self.dispatch_step(step + 1, ctx));
        }
        effects
    }

    fn finish(&mut self) -> Vec<Effect> {
        self.state.status = TrackStatus::Idle;
        self.state.step_index = -1;
        self.outstanding = None;
        info!(track = %self.state.phase_id, "track completed");
        vec![Effect::Notify(Notification::TrackIdle {
            track: self.state.phase_id.clone(),
            outcome: RunOutcome::Completed,
        })]
    }

    fn clear_timer(&mut self) -> Vec<Effect> {
        self.timer
            .take()
            .map(Effect::cancel_timer)
            .into_iter()
            .collect()
    }

    fn cancel_render(&self) -> Effect {
        Effect::Render(RenderCommand::Cancel {
            track: self.state.phase_id.clone(),
        })
    }
}
