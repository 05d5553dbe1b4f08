//! Room file validation.
//!
//! Validation runs on the deserialized [`RoomConfig`] and collects every
//! error and warning instead of stopping at the first, so a learner fixing
//! a room file sees everything at once.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::config::schema::{PhaseConfig, RoomConfig};
use crate::error::{Severity, ValidationIssue};
use crate::phase::room::{MAX_APPROVAL_WINDOW, MIN_APPROVAL_WINDOW};
use crate::serde_ext::parse_duration;

// ============================================================================
// Public API
// ============================================================================

/// Result of room validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Room validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a room and returns every issue found.
    pub fn validate(&mut self, config: &RoomConfig) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        self.validate_settings(config);
        self.validate_anchors(config);
        self.validate_phase_refs(config);
        for (id, phase) in &config.phases {
            self.validate_phase(config, id, phase);
        }
        self.validate_rules(config);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Settings
    // ========================================================================

    fn validate_settings(&mut self, config: &RoomConfig) {
        let room = &config.room;
        if room.name.trim().is_empty() {
            self.add_error("room.name", "room name is required and cannot be empty");
        }

        self.check_duration("room.inspection_hold", room.inspection_hold.as_deref());
        self.check_duration("room.anchor_poll", room.anchor_poll.as_deref());
        if let Some(window) = self.check_duration("room.approval_window", room.approval_window.as_deref())
            && !(MIN_APPROVAL_WINDOW..=MAX_APPROVAL_WINDOW).contains(&window)
        {
            self.add_warning(
                "room.approval_window",
                &format!(
                    "{} is outside {}..={} and will be clamped",
                    humantime::format_duration(window),
                    humantime::format_duration(MIN_APPROVAL_WINDOW),
                    humantime::format_duration(MAX_APPROVAL_WINDOW),
                ),
            );
        }

        if room.standoff.is_some_and(|s| !s.is_finite() || s < 0.0) {
            self.add_error("room.standoff", "standoff must be a non-negative number");
        }
        if room.lift.is_some_and(|l| !l.is_finite()) {
            self.add_error("room.lift", "lift must be a finite number");
        }
        if room.anchor_poll_limit == Some(0) {
            self.add_warning(
                "room.anchor_poll_limit",
                "a limit of 0 gives up on missing anchors without retrying",
            );
        }
    }

    // ========================================================================
    // Anchors
    // ========================================================================

    fn validate_anchors(&mut self, config: &RoomConfig) {
        for (name, anchor) in &config.anchors {
            if anchor.position.iter().any(|c| !c.is_finite()) {
                self.add_error(
                    &format!("anchors.{name}.position"),
                    "coordinates must be finite numbers",
                );
            }
            self.check_duration(
                &format!("anchors.{name}.appears_after"),
                anchor.appears_after.as_deref(),
            );
        }

        let mut seen = HashSet::new();
        for (i, node) in config.inspection_nodes.iter().enumerate() {
            let path = format!("inspection_nodes[{i}]");
            self.check_anchor(config, &path, node);
            if !seen.insert(node) {
                self.add_warning(&path, &format!("'{node}' is listed more than once"));
            }
        }
    }

    // ========================================================================
    // Phases
    // ========================================================================

    fn validate_phase_refs(&mut self, config: &RoomConfig) {
        if config.phases.is_empty() {
            self.add_error("phases", "room defines no phases");
            return;
        }
        if let Some(id) = &config.room.default_phase {
            self.check_phase(config, "room.default_phase", id);
        }
        if let Some(id) = &config.room.attack_phase {
            self.check_phase(config, "room.attack_phase", id);
        }
        for (from, to) in &config.chains {
            self.check_phase(config, &format!("chains.{from}"), from);
            self.check_phase(config, &format!("chains.{from}"), to);
            if from == to {
                self.add_warning(&format!("chains.{from}"), "phase chains to itself");
            }
        }
    }

    fn validate_phase(&mut self, config: &RoomConfig, id: &str, phase: &PhaseConfig) {
        let base = format!("phases.{id}");
        if id.trim().is_empty() {
            self.add_error("phases", "phase id cannot be empty");
        }
        if phase.protocol.as_deref().is_some_and(|p| p.trim().is_empty()) {
            self.add_error(&format!("{base}.protocol"), "protocol cannot be empty");
        }
        self.check_duration(&format!("{base}.travel"), phase.travel.as_deref());

        if phase.path.is_empty() {
            self.add_warning(
                &format!("{base}.path"),
                "path is empty; starting this phase completes immediately",
            );
        }
        for (i, segment) in phase.path.iter().enumerate() {
            let seg = format!("{base}.path[{i}]");
            self.check_anchor(config, &format!("{seg}.from"), segment.from.as_str());
            self.check_anchor(config, &format!("{seg}.to"), segment.to.as_str());
            if segment.from == segment.to {
                self.add_warning(&seg, "segment starts and ends at the same anchor");
            }
            if let Some(prev) = i.checked_sub(1).map(|p| &phase.path[p])
                && prev.to != segment.from
            {
                self.add_warning(
                    &seg,
                    &format!(
                        "segment starts at '{}' but the previous one ended at '{}'",
                        segment.from, prev.to
                    ),
                );
            }
        }
    }

    // ========================================================================
    // Rules
    // ========================================================================

    fn validate_rules(&mut self, config: &RoomConfig) {
        let mut ids = HashSet::new();
        let mut orders: HashMap<i32, &str> = HashMap::new();
        for (i, rule) in config.rules.iter().enumerate() {
            let path = format!("rules[{i}]");
            if rule.id.trim().is_empty() {
                self.add_error(&format!("{path}.id"), "rule id cannot be empty");
            } else if !ids.insert(rule.id.as_str()) {
                self.add_error(&format!("{path}.id"), &format!("duplicate rule id '{}'", rule.id));
            }
            if rule.protocol.trim().is_empty() {
                self.add_error(&format!("{path}.protocol"), "protocol cannot be empty");
            }
            if let Some(other) = orders.insert(rule.order, rule.id.as_str()) {
                self.add_warning(
                    &format!("{path}.order"),
                    &format!(
                        "order {} is shared with rule '{other}'; list position breaks the tie",
                        rule.order
                    ),
                );
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn check_duration(&mut self, path: &str, raw: Option<&str>) -> Option<Duration> {
        let raw = raw?;
        match parse_duration(raw) {
            Ok(d) => Some(d),
            Err(e) => {
                self.add_error(path, &format!("invalid duration '{raw}': {e}"));
                None
            }
        }
    }

    fn check_anchor(&mut self, config: &RoomConfig, path: &str, name: &str) {
        if config.anchors.contains_key(name) {
            return;
        }
        let hint = suggest(name, config.anchors.keys().map(String::as_str))
            .map(|s| format!(" (did you mean '{s}'?)"))
            .unwrap_or_default();
        self.add_error(path, &format!("unknown anchor '{name}'{hint}"));
    }

    fn check_phase(&mut self, config: &RoomConfig, path: &str, id: &str) {
        if config.phases.contains_key(id) {
            return;
        }
        let hint = suggest(id, config.phases.keys().map(String::as_str))
            .map(|s| format!(" (did you mean '{s}'?)"))
            .unwrap_or_default();
        self.add_error(path, &format!("unknown phase '{id}'{hint}"));
    }

    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Returns the candidate closest to `input`, if within edit distance 3.
#[must_use]
pub fn suggest<'a>(input: &str, candidates: impl Iterator<Item = &'a str>) -> Option<String> {
    candidates
        .map(|c| (c, strsim::damerau_levenshtein(input, c)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by_key(|(_, dist)| *dist)
        .map(|(name, _)| name.to_string())
}
