//! Firewall policy model.
//!
//! Zones, rules, traffic descriptors, and the [`RuleBook`] that holds the
//! user-editable rule list. Evaluation lives in [`evaluator`].

pub mod evaluator;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use evaluator::evaluate;

// ============================================================================
// Zones and Actions
// ============================================================================

/// Network zone from the closed teaching set.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Zone {
    /// Internal network
    #[serde(alias = "lan", alias = "Lan")]
    Lan,
    /// Internet
    #[serde(alias = "wan", alias = "Wan")]
    Wan,
    /// Remote-access tunnel
    #[serde(alias = "vpn", alias = "Vpn")]
    Vpn,
    /// Demilitarized zone
    #[serde(alias = "dmz", alias = "Dmz")]
    Dmz,
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Lan => "LAN",
            Self::Wan => "WAN",
            Self::Vpn => "VPN",
            Self::Dmz => "DMZ",
        };
        f.write_str(s)
    }
}

/// What a matching rule does with the traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Let the traffic through
    #[serde(alias = "Allow", alias = "ALLOW")]
    Allow,
    /// Drop the traffic
    #[serde(alias = "Deny", alias = "DENY")]
    Deny,
}

impl RuleAction {
    /// Lowercase name, used for metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Rules and Traffic
// ============================================================================

/// One entry of the firewall rule list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    /// Stable identifier shown to the learner
    pub id: String,
    /// Evaluation order, ascending
    pub order: i32,
    /// Source zone
    pub src_zone: Zone,
    /// Destination zone
    pub dst_zone: Zone,
    /// Protocol name, compared case-insensitively
    pub protocol: String,
    /// Destination port, compared exactly
    pub port: u16,
    /// Action on match
    pub action: RuleAction,
}

impl FirewallRule {
    /// Returns whether this rule matches the traffic.
    #[must_use]
    pub fn matches(&self, traffic: &FirewallTraffic) -> bool {
        self.src_zone == traffic.src_zone
            && self.dst_zone == traffic.dst_zone
            && self.port == traffic.port
            && self.protocol.eq_ignore_ascii_case(&traffic.protocol)
    }
}

/// Traffic descriptor presented to the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallTraffic {
    /// Source zone
    pub src_zone: Zone,
    /// Destination zone
    pub dst_zone: Zone,
    /// Protocol name
    pub protocol: String,
    /// Destination port
    pub port: u16,
}

impl fmt::Display for FirewallTraffic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}→{} {}/{}",
            self.src_zone, self.dst_zone, self.protocol, self.port
        )
    }
}

/// Result of evaluating traffic against a rule list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Resulting action
    pub action: RuleAction,
    /// Index of the matched rule in the supplied list; `None` means default-deny
    pub matched_rule_index: Option<usize>,
    /// Id of the matched rule
    pub matched_rule_id: Option<String>,
}

impl Decision {
    /// The decision used when no rule matches.
    #[must_use]
    pub const fn default_deny() -> Self {
        Self {
            action: RuleAction::Deny,
            matched_rule_index: None,
            matched_rule_id: None,
        }
    }

    /// Returns whether the traffic may continue.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self.action, RuleAction::Allow)
    }

    /// Returns whether the default policy, not a rule, produced this decision.
    #[must_use]
    pub const fn is_default(&self) -> bool {
        self.matched_rule_index.is_none()
    }
}

// ============================================================================
// Rule Book
// ============================================================================

/// User-editable rule list.
///
/// Readers take a [`snapshot`](Self::snapshot); edits swap in a new list, so
/// a snapshot taken before an edit never observes it.
#[derive(Debug, Clone)]
pub struct RuleBook {
    rules: Arc<[FirewallRule]>,
    initial: Arc<[FirewallRule]>,
    revision: u64,
}

impl RuleBook {
    /// Creates a rule book whose `reset` restores `rules`.
    #[must_use]
    pub fn new(rules: Vec<FirewallRule>) -> Self {
        let rules: Arc<[FirewallRule]> = rules.into();
        Self {
            initial: Arc::clone(&rules),
            rules,
            revision: 0,
        }
    }

    /// Returns the current rule list.
    #[must_use]
    pub fn snapshot(&self) -> Arc<[FirewallRule]> {
        Arc::clone(&self.rules)
    }

    /// Number of edits applied since creation.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Replaces the whole list.
    pub fn replace(&mut self, rules: Vec<FirewallRule>) {
        self.swap(rules);
    }

    /// Inserts a rule, or replaces the rule with the same id.
    pub fn upsert(&mut self, rule: FirewallRule) {
        let mut rules = self.rules.to_vec();
        match rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
        self.swap(rules);
    }

    /// Removes a rule by id. Returns whether a rule was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        if !self.rules.iter().any(|r| r.id == id) {
            return false;
        }
        let rules = self.rules.iter().filter(|r| r.id != id).cloned().collect();
        self.swap(rules);
        true
    }

    /// Restores the rules the book was created with.
    pub fn reset(&mut self) {
        self.rules = Arc::clone(&self.initial);
        self.revision += 1;
    }

    /// Evaluates traffic against the current snapshot.
    #[must_use]
    pub fn evaluate(&self, traffic: &FirewallTraffic) -> Decision {
        evaluate(&self.snapshot(), traffic)
    }

    fn swap(&mut self, rules: Vec<FirewallRule>) {
        self.rules = rules.into();
        self.revision += 1;
    }
}

impl Default for RuleBook {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
