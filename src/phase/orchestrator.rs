//! Phase orchestrator: multiplexes flow sequencers over one room.
//!
//! The orchestrator is the single entry point of the core. It owns the
//! sequencers, the firewall rule book, the selected phase and the approval
//! indicator, and reacts to [`Input`]s by returning [`Effect`]s. It never
//! blocks and never fails; time only advances through [`set_time`].
//!
//! [`set_time`]: PhaseOrchestrator::set_time

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::approval::{ApprovalIndicator, ApprovalState};
use super::directive::BuildContext;
use super::effect::{Command, Effect, Input, Notification, RendererEvent, TimerId};
use super::room::{Room, RoomTiming};
use super::sequencer::FlowSequencer;
use super::state::{FlowTrackState, PhaseId, RunOutcome};
use crate::firewall::RuleBook;
use crate::observability::metrics;
use crate::topology::{SceneTopology, TopologyResolver};

/// Composes one [`FlowSequencer`] per phase of a room.
#[derive(Debug)]
pub struct PhaseOrchestrator<T: TopologyResolver = SceneTopology> {
    room: Room,
    topology: T,
    rules: RuleBook,
    tracks: BTreeMap<PhaseId, FlowSequencer>,
    selected: PhaseId,
    auto_run: bool,
    approval: ApprovalState,
    now: Duration,
}

impl<T: TopologyResolver> PhaseOrchestrator<T> {
    /// Creates an orchestrator with the room's default phase selected.
    #[must_use]
    pub fn new(room: Room, topology: T) -> Self {
        let selected = room.coerce_phase(&room.default_phase);
        let mut tracks = BTreeMap::new();
        tracks.insert(selected.clone(), FlowSequencer::new(selected.clone()));
        let window = RoomTiming::clamp_approval_window(room.timing.approval_window);
        metrics::set_selected_phase(None, selected.as_str());
        Self {
            rules: RuleBook::new(room.rules.clone()),
            auto_run: room.auto_run,
            approval: ApprovalState::new(window),
            topology,
            tracks,
            selected,
            room,
            now: Duration::ZERO,
        }
    }

    /// Advances the orchestrator's notion of time.
    pub const fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    /// Current time.
    #[must_use]
    pub const fn now(&self) -> Duration {
        self.now
    }

    /// Room being played.
    #[must_use]
    pub const fn room(&self) -> &Room {
        &self.room
    }

    /// Anchor resolver.
    #[must_use]
    pub const fn topology(&self) -> &T {
        &self.topology
    }

    /// Mutable anchor resolver, for scenes that load over time.
    pub const fn topology_mut(&mut self) -> &mut T {
        &mut self.topology
    }

    /// Firewall rules.
    #[must_use]
    pub const fn rules(&self) -> &RuleBook {
        &self.rules
    }

    /// Selected phase.
    #[must_use]
    pub const fn selected(&self) -> &PhaseId {
        &self.selected
    }

    /// Whether completed phases start their successor.
    #[must_use]
    pub const fn auto_run(&self) -> bool {
        self.auto_run
    }

    /// Approval indicator.
    #[must_use]
    pub const fn approval(&self) -> ApprovalIndicator {
        self.approval.indicator()
    }

    /// State of one track, if it was ever selected.
    #[must_use]
    pub fn track(&self, phase: &PhaseId) -> Option<&FlowTrackState> {
        self.tracks.get(phase).map(FlowSequencer::state)
    }

    /// States of all tracks created so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<FlowTrackState> {
        self.tracks.values().map(|s| s.state().clone()).collect()
    }

    /// Reacts to one input.
    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        let effects = match input {
            Input::Command(command) => self.command(command),
            Input::Renderer(event) => self.renderer(&event),
            Input::TimerFired(id) => self.timer(&id),
        };
        self.settle(effects)
    }

    // ========================================================================
    // Routing
    // ========================================================================

    fn command(&mut self, command: Command) -> Vec<Effect> {
        debug!(?command, selected = %self.selected, "command");
        let selected = self.selected.clone();
        match command {
            Command::Start => self.on_track(&selected, |s, ctx| s.start(ctx)),
            Command::Stop => {
                let mut effects = self.on_track(&selected, |s, _| s.stop());
                effects.extend(self.approval.clear());
                effects
            }
            Command::Next => self.on_track(&selected, |s, ctx| s.next(ctx)),
            Command::Prev => self.on_track(&selected, |s, ctx| s.prev(ctx)),
            Command::Replay => self.on_track(&selected, |s, ctx| s.replay(ctx)),
            Command::Restart => self.on_track(&selected, |s, ctx| s.restart(ctx)),
            Command::SetPhase { phase } => {
                let target = self.room.coerce_phase(&phase);
                if target != phase {
                    debug!(requested = %phase, coerced = %target, "unknown phase");
                }
                self.select(target)
            }
            Command::SimulateAttack => {
                let Some(attack) = self.room.attack_phase.clone() else {
                    warn!(room = %self.room.name, "room has no attack phase");
                    return Vec::new();
                };
                let attack = self.room.coerce_phase(&attack);
                info!(phase = %attack, "simulating attack");
                let mut effects = self.select(attack.clone());
                effects.extend(self.on_track(&attack, |s, ctx| s.restart(ctx)));
                effects
            }
            Command::Acknowledge { event } => {
                let phases: Vec<PhaseId> = self.tracks.keys().cloned().collect();
                phases
                    .iter()
                    .flat_map(|p| self.on_track(p, |s, ctx| s.acknowledge(&event, ctx)))
                    .collect()
            }
            Command::SetRules { rules } => {
                self.rules.replace(rules);
                self.rules_changed()
            }
            Command::UpsertRule { rule } => {
                self.rules.upsert(rule);
                self.rules_changed()
            }
            Command::RemoveRule { id } => {
                if !self.rules.remove(&id) {
                    debug!(%id, "no such rule");
                }
                self.rules_changed()
            }
            Command::ResetRules => {
                self.rules.reset();
                self.rules_changed()
            }
            Command::SetAutoRun { enabled } => {
                self.auto_run = enabled;
                Vec::new()
            }
        }
    }

    fn renderer(&mut self, event: &RendererEvent) -> Vec<Effect> {
        let track = event.hop().track.clone();
        if !self.tracks.contains_key(&track) {
            debug!(%track, "event for unknown track");
            metrics::record_stale_event("unknown_track");
            return Vec::new();
        }
        self.on_track(&track, |s, ctx| match event {
            RendererEvent::Launch { hop } => {
                s.lifecycle(hop, None);
                Vec::new()
            }
            RendererEvent::Pause { hop } => {
                s.lifecycle(hop, Some(true));
                Vec::new()
            }
            RendererEvent::Resume { hop } => {
                s.lifecycle(hop, Some(false));
                Vec::new()
            }
            RendererEvent::HoldStart { hop } => s.hold_start(hop, ctx),
            RendererEvent::HoldComplete { hop } => s.hold_complete(hop, ctx),
            RendererEvent::Arrival { hop, generation } => s.arrival(hop, *generation, ctx),
        })
    }

    fn timer(&mut self, id: &TimerId) -> Vec<Effect> {
        match id {
            TimerId::ApprovalRevert { epoch } => self.approval.expire(*epoch),
            _ => match id.track().cloned() {
                Some(track) if self.tracks.contains_key(&track) => {
                    self.on_track(&track, |s, ctx| s.timer_fired(id, ctx))
                }
                _ => Vec::new(),
            },
        }
    }

    fn on_track<F>(&mut self, phase: &PhaseId, f: F) -> Vec<Effect>
    where
        F: FnOnce(&mut FlowSequencer, &BuildContext<'_>) -> Vec<Effect>,
    {
        let rules = self.rules.snapshot();
        let ctx = BuildContext {
            room: &self.room,
            rules: &rules,
            topology: &self.topology,
        };
        let sequencer = self
            .tracks
            .entry(phase.clone())
            .or_insert_with(|| FlowSequencer::new(phase.clone()));
        f(sequencer, &ctx)
    }

    fn rules_changed(&self) -> Vec<Effect> {
        info!(
            revision = self.rules.revision(),
            count = self.rules.snapshot().len(),
            "firewall rules updated"
        );
        Vec::new()
    }

    // ========================================================================
    // Selection and chaining
    // ========================================================================

    fn select(&mut self, target: PhaseId) -> Vec<Effect> {
        if target == self.selected {
            return Vec::new();
        }
        let previous = std::mem::replace(&mut self.selected, target.clone());
        let mut effects = self
            .tracks
            .get_mut(&previous)
            .map(FlowSequencer::freeze)
            .unwrap_or_default();
        self.tracks
            .entry(target.clone())
            .or_insert_with(|| FlowSequencer::new(target.clone()))
            .bump_generation();

        info!(phase = %target, %previous, "phase selected");
        metrics::set_selected_phase(Some(previous.as_str()), target.as_str());
        effects.push(Effect::Notify(Notification::PhaseSelected {
            phase: target,
            previous: Some(previous),
        }));
        effects
    }

    /// Applies orchestrator-level reactions to notifications in order.
    ///
    /// Reactions are spliced in right after the notification that caused
    /// them. Auto-chaining is bounded by the number of phases so a cycle of
    /// empty phases cannot spin.
    fn settle(&mut self, effects: Vec<Effect>) -> Vec<Effect> {
        let mut queue: VecDeque<Effect> = effects.into();
        let mut out = Vec::with_capacity(queue.len());
        let mut chain_budget = self.room.phases.len();

        while let Some(effect) = queue.pop_front() {
            let follow = match &effect {
                Effect::Notify(Notification::DecisionMade { decision, .. }) => {
                    metrics::record_decision(decision.action.as_str());
                    self.approval.record(decision, self.now)
                }
                Effect::Notify(Notification::TrackIdle {
                    track,
                    outcome: RunOutcome::Completed,
                }) if self.auto_run => match self.room.successor(track).cloned() {
                    Some(next) if chain_budget > 0 => {
                        chain_budget -= 1;
                        info!(from = %track, to = %next, "auto-chaining");
                        let next = self.room.coerce_phase(&next);
                        let mut fx = self.select(next.clone());
                        fx.extend(self.on_track(&next, |s, ctx| s.start(ctx)));
                        fx
                    }
                    Some(next) => {
                        warn!(from = %track, to = %next, "auto-chain limit reached");
                        Vec::new()
                    }
                    None => Vec::new(),
                },
                _ => Vec::new(),
            };
            out.push(effect);
            for f in follow.into_iter().rev() {
                queue.push_front(f);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::{FirewallRule, RuleAction, Zone};
    use crate::phase::approval::ApprovalValue;
    use crate::phase::effect::RenderCommand;
    use crate::phase::room::Segment;
    use crate::phase::state::TrackStatus;
    use crate::topology::Position;

    fn room() -> Room {
        let mut room = Room::new("lab", "dns")
            .with_phase("dns", vec![Segment::new("pc", "fw"), Segment::new("fw", "web")])
            .with_phase("https", vec![Segment::new("pc", "web")])
            .with_phase("attack", vec![Segment::new("web", "fw"), Segment::new("fw", "pc")])
            .with_anchor("pc", Position::new(0.0, 0.0, 0.0), Some(Zone::Lan))
            .with_anchor("fw", Position::new(1.0, 0.0, 0.0), None)
            .with_anchor("web", Position::new(2.0, 0.0, 0.0), Some(Zone::Wan))
            .with_inspection_node("fw");
        room.attack_phase = Some(PhaseId::new("attack"));
        room.chains.insert(PhaseId::new("dns"), PhaseId::new("https"));
        room.rules = vec![FirewallRule {
            id: "dns-out".to_string(),
            order: 0,
            src_zone: Zone::Lan,
            dst_zone: Zone::Wan,
            protocol: "UDP".to_string(),
            port: 53,
            action: RuleAction::Allow,
        }];
        room
    }

    fn orchestrator() -> PhaseOrchestrator {
        let room = room();
        let scene = room.initial_scene();
        PhaseOrchestrator::new(room, scene)
    }

    fn dispatched(effects: &[Effect]) -> Vec<crate::phase::HopDirective> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Render(RenderCommand::Dispatch(d)) => Some(d.clone()),
                _ => None,
            })
            .collect()
    }

    fn hold_timer(effects: &[Effect]) -> TimerId {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::StartTimer {
                    id: id @ TimerId::HoldFallback { .. },
                    ..
                } => Some(id.clone()),
                _ => None,
            })
            .unwrap()
    }

    fn pass_inspection(o: &mut PhaseOrchestrator, fx: &[Effect]) -> Vec<Effect> {
        let hop = dispatched(fx).last().unwrap().hop_id.clone();
        let fx = o.handle(RendererEvent::HoldStart { hop }.into());
        o.handle(Input::TimerFired(hold_timer(&fx)))
    }

    #[test]
    fn test_set_phase_coerces_unknown_to_default() {
        let mut o = orchestrator();
        o.handle(Command::SetPhase { phase: PhaseId::new("https") }.into());
        assert_eq!(o.selected().as_str(), "https");

        let fx = o.handle(Command::SetPhase { phase: PhaseId::new("gopher") }.into());
        assert_eq!(o.selected().as_str(), "dns");
        assert!(fx.iter().any(|e| matches!(e, Effect::Notify(Notification::PhaseSelected { .. }))));
    }

    #[test]
    fn test_reselecting_is_noop() {
        let mut o = orchestrator();
        let generation = o.track(&PhaseId::new("dns")).unwrap().generation;
        assert!(o.handle(Command::SetPhase { phase: PhaseId::new("dns") }.into()).is_empty());
        assert_eq!(o.track(&PhaseId::new("dns")).unwrap().generation, generation);
    }

    #[test]
    fn test_set_phase_freezes_previous_track() {
        let mut o = orchestrator();
        let fx = o.handle(Command::Start.into());
        let hop = dispatched(&fx)[0].hop_id.clone();

        let fx = o.handle(Command::SetPhase { phase: PhaseId::new("https") }.into());
        assert!(fx.iter().any(|e| matches!(e, Effect::Render(RenderCommand::Cancel { .. }))));
        let dns = o.track(&PhaseId::new("dns")).unwrap();
        assert_eq!(dns.status, TrackStatus::Idle);
        assert_eq!(dns.step_index, 0);

        // The frozen track's in-flight hop is now stale.
        let generation = hop.generation;
        assert!(o.handle(RendererEvent::Arrival { hop, generation }.into()).is_empty());
    }

    #[test]
    fn test_decision_lights_approval_and_reverts() {
        let mut o = orchestrator();
        let fx = o.handle(Command::Start.into());
        o.set_time(Duration::from_secs(2));
        let fx = pass_inspection(&mut o, &fx);

        assert_eq!(o.approval().value, ApprovalValue::Approved);
        assert_eq!(o.approval().expires_at, Some(Duration::from_secs(7)));
        let revert = fx
            .iter()
            .find_map(|e| match e {
                Effect::StartTimer {
                    id: id @ TimerId::ApprovalRevert { .. },
                    ..
                } => Some(id.clone()),
                _ => None,
            })
            .unwrap();
        o.handle(Input::TimerFired(revert));
        assert_eq!(o.approval().value, ApprovalValue::None);
    }

    #[test]
    fn test_stop_clears_approval() {
        let mut o = orchestrator();
        let fx = o.handle(Command::Start.into());
        pass_inspection(&mut o, &fx);
        assert_ne!(o.approval().value, ApprovalValue::None);

        let fx = o.handle(Command::Stop.into());
        assert_eq!(o.approval().value, ApprovalValue::None);
        assert!(fx.iter().any(|e| matches!(
            e,
            Effect::CancelTimer { id: TimerId::ApprovalRevert { .. } }
        )));
    }

    #[test]
    fn test_auto_chain_starts_successor() {
        let mut o = orchestrator();
        o.handle(Command::SetAutoRun { enabled: true }.into());
        let fx = o.handle(Command::Start.into());
        let fx = pass_inspection(&mut o, &fx);
        let hop = dispatched(&fx)[0].hop_id.clone();
        let generation = hop.generation;

        let fx = o.handle(RendererEvent::Arrival { hop, generation }.into());
        assert_eq!(o.selected().as_str(), "https");
        let next = dispatched(&fx);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].hop_id.track.as_str(), "https");
        assert_eq!(
            o.track(&PhaseId::new("https")).unwrap().status,
            TrackStatus::Active
        );
    }

    #[test]
    fn test_no_chain_without_auto_run() {
        let mut o = orchestrator();
        let fx = o.handle(Command::Start.into());
        let fx = pass_inspection(&mut o, &fx);
        let hop = dispatched(&fx)[0].hop_id.clone();
        let generation = hop.generation;
        o.handle(RendererEvent::Arrival { hop, generation }.into());
        assert_eq!(o.selected().as_str(), "dns");
    }

    #[test]
    fn test_chain_cycle_of_empty_phases_terminates() {
        let mut room = Room::new("loop", "a").with_phase("a", vec![]).with_phase("b", vec![]);
        room.chains.insert(PhaseId::new("a"), PhaseId::new("b"));
        room.chains.insert(PhaseId::new("b"), PhaseId::new("a"));
        room.auto_run = true;
        let mut o = PhaseOrchestrator::new(room, SceneTopology::new());
        let fx = o.handle(Command::Start.into());
        let idles = fx
            .iter()
            .filter(|e| matches!(e, Effect::Notify(Notification::TrackIdle { .. })))
            .count();
        assert_eq!(idles, 3);
    }

    #[test]
    fn test_simulate_attack_is_blocked_by_default_deny() {
        let mut o = orchestrator();
        let fx = o.handle(Command::SimulateAttack.into());
        assert_eq!(o.selected().as_str(), "attack");
        let fx = pass_inspection(&mut o, &fx);

        assert_eq!(
            o.track(&PhaseId::new("attack")).unwrap().status,
            TrackStatus::Blocked
        );
        assert!(dispatched(&fx).is_empty());
        assert_eq!(o.approval().value, ApprovalValue::Denied);
    }

    #[test]
    fn test_rule_edit_applies_to_next_evaluation() {
        let mut o = orchestrator();
        let fx = o.handle(Command::Start.into());
        let first = dispatched(&fx)[0].clone();
        assert!(!first.blocks_after_hold);

        o.handle(Command::ResetRules.into());
        o.handle(Command::SetRules { rules: vec![] }.into());
        // The dispatched directive keeps the decision it was built with.
        let in_flight = o.tracks[&PhaseId::new("dns")].outstanding().unwrap().clone();
        assert_eq!(in_flight, first);
        assert!(!in_flight.blocks_after_hold);

        assert!(!o.handle(Command::Replay.into()).is_empty());
        let replayed = o.tracks[&PhaseId::new("dns")].outstanding().unwrap().clone();
        assert!(replayed.blocks_after_hold);
    }

    #[test]
    fn test_acknowledge_ends_event_hold() {
        let mut room = Room::new("tunnel", "vpn")
            .with_phase("vpn", vec![Segment::new("laptop", "gw"), Segment::new("gw", "srv")])
            .with_anchor("laptop", Position::new(0.0, 0.0, 0.0), Some(Zone::Vpn))
            .with_anchor("gw", Position::new(1.0, 0.0, 0.0), None)
            .with_anchor("srv", Position::new(2.0, 0.0, 0.0), Some(Zone::Lan))
            .with_inspection_node("gw");
        room.rules = vec![FirewallRule {
            id: "vpn-in".to_string(),
            order: 0,
            src_zone: Zone::Vpn,
            dst_zone: Zone::Lan,
            protocol: "UDP".to_string(),
            port: 1194,
            action: RuleAction::Allow,
        }];
        let scene = room.initial_scene();
        let mut o = PhaseOrchestrator::new(room, scene);

        let fx = o.handle(Command::Start.into());
        let hop = dispatched(&fx)[0].hop_id.clone();
        o.handle(RendererEvent::HoldStart { hop: hop.clone() }.into());

        // Renderer finishing its hold animation does not end an event hold.
        assert!(o.handle(RendererEvent::HoldComplete { hop }.into()).is_empty());
        assert!(o.handle(Command::Acknowledge { event: "other".to_string() }.into()).is_empty());

        let fx = o.handle(Command::Acknowledge { event: "vpn-continue".to_string() }.into());
        assert!(fx.iter().any(|e| matches!(e, Effect::CancelTimer { id: TimerId::HoldFallback { .. } })));
        assert_eq!(dispatched(&fx).len(), 1);
    }
}
