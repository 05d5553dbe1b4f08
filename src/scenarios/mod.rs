//! Built-in rooms
//!
//! Curated room files embedded in the binary at compile time, so
//! `packetwalk play --builtin firewall` works without any files on disk.

use std::path::Path;
use std::sync::LazyLock;

use crate::config::{LoadResult, RoomLoader};
use crate::error::{PacketwalkError, ScenarioError};

// ============================================================================
// Types
// ============================================================================

/// A built-in room embedded in the binary.
#[derive(Debug)]
pub struct BuiltinRoom {
    /// Unique identifier (e.g., "firewall").
    pub name: &'static str,

    /// Short human-readable description.
    pub description: &'static str,

    /// Phase ids the room plays, in display order.
    pub phases: &'static [&'static str],

    /// Raw YAML content (embedded at compile time).
    pub yaml: &'static str,
}

// ============================================================================
// Registry
// ============================================================================

static BUILTIN_ROOMS: LazyLock<Vec<BuiltinRoom>> = LazyLock::new(|| {
    vec![
        BuiltinRoom {
            name: "firewall",
            description: "Outbound DNS and HTTPS pass the firewall; inbound SSH is blocked",
            phases: &["dns", "https", "attack"],
            yaml: include_str!("../../scenarios/firewall.yaml"),
        },
        BuiltinRoom {
            name: "vpn",
            description: "Remote laptop tunnels through the VPN gateway and waits for acknowledgement",
            phases: &["vpn", "attack"],
            yaml: include_str!("../../scenarios/vpn.yaml"),
        },
        BuiltinRoom {
            name: "tls",
            description: "TLS handshake auto-chained into the encrypted request",
            phases: &["tls", "https"],
            yaml: include_str!("../../scenarios/tls.yaml"),
        },
    ]
});

// ============================================================================
// Lookup
// ============================================================================

/// Finds a built-in room by exact name.
#[must_use]
pub fn find_room(name: &str) -> Option<&'static BuiltinRoom> {
    BUILTIN_ROOMS.iter().find(|r| r.name == name)
}

/// Lists all built-in rooms in registry order.
#[must_use]
pub fn list_rooms() -> Vec<&'static BuiltinRoom> {
    BUILTIN_ROOMS.iter().collect()
}

/// Suggests a similar room name for typo correction.
///
/// Returns the closest match if its Damerau-Levenshtein distance is ≤ 3.
#[must_use]
pub fn suggest_room(input: &str) -> Option<String> {
    BUILTIN_ROOMS
        .iter()
        .map(|r| (r.name, strsim::damerau_levenshtein(input, r.name)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by_key(|(_, dist)| *dist)
        .map(|(name, _)| name.to_string())
}

/// Loads a built-in room by name.
///
/// # Errors
///
/// Returns [`ScenarioError::Unknown`] (with a suggestion when one is close)
/// if no room has this name, or a config error if the embedded YAML is
/// invalid.
pub fn load_builtin(name: &str) -> Result<LoadResult, PacketwalkError> {
    let builtin = find_room(name).ok_or_else(|| ScenarioError::Unknown {
        name: name.to_string(),
        suggestion: suggest_room(name),
    })?;
    let origin = format!("builtin:{}", builtin.name);
    Ok(RoomLoader::with_defaults().load_from_str(builtin.yaml, Path::new(&origin))?)
}

// ============================================================================
// Tests
// ============================================================================
