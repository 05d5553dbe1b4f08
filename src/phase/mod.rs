//! Flow choreography core.
//!
//! A sans-IO state machine: [`PhaseOrchestrator::handle`] takes an
//! [`Input`] and returns the [`Effect`]s a runtime must carry out.
//!
//! # Architecture
//!
//! - [`room`]: Static room configuration (phases, paths, zones, timing)
//! - [`directive`]: Pure hop directive builder
//! - [`sequencer`]: Per-track state machine with generation guards
//! - [`approval`]: Approval indicator and its revert timer
//! - [`orchestrator`]: Selection, control surface, auto-chaining
//! - [`effect`]: Inputs, effects, renderer protocol

pub mod approval;
pub mod directive;
pub mod effect;
pub mod orchestrator;
pub mod room;
pub mod sequencer;
pub mod state;

pub use approval::{ApprovalIndicator, ApprovalValue};
pub use directive::{BuildContext, BuildOutcome, HopDirective, build};
pub use effect::{Command, Effect, Input, Notification, RenderCommand, RendererEvent, TimerId};
pub use orchestrator::PhaseOrchestrator;
pub use room::{PhaseProfile, Room, Segment};
pub use sequencer::FlowSequencer;
pub use state::{FlowTrackState, Generation, HopId, PhaseId, RunOutcome, TrackStatus};
