//! Room configuration
//!
//! Loads and validates room files: anchors, inspection nodes, phases and
//! their paths, auto-chains, firewall rules, and timing.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigLimits, LoadResult, LoadWarning, RoomLoader, build_room};
pub use schema::*;
pub use validation::{ValidationResult, Validator, suggest};
