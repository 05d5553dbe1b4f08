//! `packetwalk` - flow choreography for network-security lessons
//!
//! This library sequences simulated packets through named topology nodes,
//! pauses them at firewall inspection points, and decides from an ordered
//! rule list whether each flow continues or is blocked. Rendering is an
//! external collaborator: the core emits render commands and consumes the
//! renderer's lifecycle events.

pub mod cli;
pub mod config;
pub mod error;
pub mod firewall;
pub mod observability;
pub mod phase;
pub mod runtime;
pub mod scenarios;
pub mod serde_ext;
pub mod topology;
