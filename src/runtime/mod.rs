//! Runtimes that carry out the core's effects.
//!
//! - [`sim`]: Virtual clock and scripted renderer, for `play` and tests
//! - [`live`]: Tokio loop speaking NDJSON over stdio, for `run`

pub mod live;
pub mod sim;

pub use live::{EofPolicy, LiveLoop, SceneUpdate, WireMessage, decode_line};
pub use sim::{Renderer, ScriptStep, ScriptedRenderer, Simulation, TraceEntry, parse_script};
