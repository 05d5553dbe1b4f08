//! Room file loader.
//!
//! Pipeline:
//! 1. Size check against [`ConfigLimits`]
//! 2. YAML parsing into [`RoomConfig`]
//! 3. Validation (all issues collected)
//! 4. Conversion into a [`Room`]

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;

use crate::config::schema::{PhaseConfig, RoomConfig};
use crate::config::validation::Validator;
use crate::error::ConfigError;
use crate::phase::room::{AnchorSpec, Direction, Geometry, PhasePlan, PhaseProfile, RoomTiming};
use crate::phase::{PhaseId, Room};
use crate::serde_ext::parse_duration;
use crate::topology::{Anchor, Position};

// ============================================================================
// Public API
// ============================================================================

/// Limits applied before a room file is parsed.
#[derive(Debug, Clone)]
pub struct ConfigLimits {
    /// Maximum room file size in bytes.
    pub max_config_size: usize,
}

impl Default for ConfigLimits {
    fn default() -> Self {
        Self {
            max_config_size: env_or("PACKETWALK_MAX_CONFIG_SIZE", 1024 * 1024),
        }
    }
}

/// Result of loading a room file.
#[derive(Debug)]
pub struct LoadResult {
    /// The playable room.
    pub room: Room,

    /// The parsed file, as written.
    pub config: RoomConfig,

    /// Warnings encountered during loading.
    pub warnings: Vec<LoadWarning>,
}

/// Warning during room loading.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LoadWarning {
    /// Warning message.
    pub message: String,

    /// Location where the warning occurred.
    pub location: Option<String>,
}

impl std::fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {location}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Room file loader.
#[derive(Debug, Default)]
pub struct RoomLoader {
    limits: ConfigLimits,
}

impl RoomLoader {
    /// Creates a loader with the given limits.
    #[must_use]
    pub const fn new(limits: ConfigLimits) -> Self {
        Self { limits }
    }

    /// Creates a loader with limits taken from the environment.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Loads and validates a room file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read or exceeds the size limit
    /// - YAML parsing fails
    /// - Validation reports any error
    pub fn load(&self, path: &Path) -> Result<LoadResult, ConfigError> {
        let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;
        let size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        self.check_size(size)?;

        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;
        self.load_from_str(&raw, path)
    }

    /// Loads and validates a room from YAML text.
    ///
    /// `origin` is used only in error messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the text exceeds the size limit, does not
    /// parse, or fails validation.
    pub fn load_from_str(&self, yaml: &str, origin: &Path) -> Result<LoadResult, ConfigError> {
        self.check_size(yaml.len())?;

        let yaml = yaml.strip_prefix('\u{feff}').unwrap_or(yaml);
        if yaml.trim().is_empty() {
            return Err(ConfigError::ParseError {
                path: origin.to_path_buf(),
                line: None,
                message: "room file is empty".to_string(),
            });
        }

        let config: RoomConfig =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError {
                path: origin.to_path_buf(),
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?;

        let result = Validator::new().validate(&config);
        if result.has_errors() {
            return Err(ConfigError::ValidationError {
                path: origin.display().to_string(),
                errors: result.errors,
            });
        }

        let warnings = result
            .warnings
            .into_iter()
            .map(|issue| LoadWarning {
                message: issue.message,
                location: Some(issue.path),
            })
            .collect();

        tracing::debug!(
            room = %config.room.name,
            phases = config.phases.len(),
            rules = config.rules.len(),
            "room loaded"
        );

        Ok(LoadResult {
            room: build_room(&config),
            config,
            warnings,
        })
    }

    fn check_size(&self, size: usize) -> Result<(), ConfigError> {
        if size > self.limits.max_config_size {
            return Err(ConfigError::TooLarge {
                size,
                limit: self.limits.max_config_size,
            });
        }
        Ok(())
    }
}

// ============================================================================
// Conversion
// ============================================================================

/// Converts a validated config into a room.
///
/// Durations have already been checked by the validator; anything that
/// still fails to parse falls back to the default.
#[must_use]
pub fn build_room(config: &RoomConfig) -> Room {
    let settings = &config.room;
    let defaults = RoomTiming::default();
    let duration_or = |raw: Option<&str>, default: Duration| {
        raw.and_then(|r| parse_duration(r).ok()).unwrap_or(default)
    };

    let timing = RoomTiming {
        inspection_hold: duration_or(settings.inspection_hold.as_deref(), defaults.inspection_hold),
        approval_window: RoomTiming::clamp_approval_window(duration_or(
            settings.approval_window.as_deref(),
            defaults.approval_window,
        )),
        anchor_poll: duration_or(settings.anchor_poll.as_deref(), defaults.anchor_poll),
        anchor_poll_limit: settings.anchor_poll_limit.unwrap_or(defaults.anchor_poll_limit),
    };

    let geometry = Geometry {
        standoff: settings.standoff.unwrap_or(Geometry::default().standoff),
        lift: settings.lift.unwrap_or(Geometry::default().lift),
    };

    let phases: IndexMap<PhaseId, PhasePlan> = config
        .phases
        .iter()
        .map(|(id, phase)| {
            let plan = PhasePlan {
                profile: profile_for(id, phase, duration_or),
                path: phase.path.clone(),
            };
            (PhaseId::new(id.as_str()), plan)
        })
        .collect();

    let default_phase = settings
        .default_phase
        .as_deref()
        .map(PhaseId::from)
        .or_else(|| phases.keys().next().cloned())
        .unwrap_or_else(|| PhaseId::new("dns"));

    let anchors = config
        .anchors
        .iter()
        .map(|(name, anchor)| {
            let [x, y, z] = anchor.position;
            let spec = AnchorSpec {
                position: Position::new(x, y, z),
                zone: anchor.zone,
                appears_after: duration_or(anchor.appears_after.as_deref(), Duration::ZERO),
            };
            (Anchor::new(name.as_str()), spec)
        })
        .collect();

    let chains: HashMap<PhaseId, PhaseId> = config
        .chains
        .iter()
        .map(|(from, to)| (PhaseId::from(from.as_str()), PhaseId::from(to.as_str())))
        .collect();

    let inspection_nodes: BTreeSet<Anchor> = config
        .inspection_nodes
        .iter()
        .map(|n| Anchor::new(n.as_str()))
        .collect();

    Room {
        name: settings.name.clone(),
        phases,
        default_phase,
        attack_phase: settings.attack_phase.as_deref().map(PhaseId::from),
        chains,
        auto_run: settings.auto_run,
        anchors,
        inspection_nodes,
        timing,
        geometry,
        rules: config.rules.clone(),
    }
}

fn profile_for(
    id: &str,
    phase: &PhaseConfig,
    duration_or: impl Fn(Option<&str>, Duration) -> Duration,
) -> PhaseProfile {
    let stock = PhaseProfile::builtin(id);
    PhaseProfile {
        label: phase.label.clone().unwrap_or(stock.label),
        protocol: phase.protocol.clone().unwrap_or(stock.protocol),
        port: phase.port.unwrap_or(stock.port),
        encrypted: phase.encrypted.unwrap_or(stock.encrypted),
        direction: Direction {
            src: phase.src_zone.unwrap_or(stock.direction.src),
            dst: phase.dst_zone.unwrap_or(stock.direction.dst),
        },
        travel: duration_or(phase.travel.as_deref(), stock.travel),
        easing: phase.easing.unwrap_or(stock.easing),
        acknowledge_event: phase.acknowledge_event.clone().or(stock.acknowledge_event),
    }
}

/// Parses an environment variable with a default value.
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
