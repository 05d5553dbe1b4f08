//! Approval indicator with an owned auto-revert timer.
//!
//! Each lit indicator belongs to an epoch. Setting a new value or clearing
//! cancels the current epoch's timer before anything else, and a revert
//! timer from an older epoch is ignored when it fires.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::effect::{Effect, Notification, TimerId};
use crate::firewall::Decision;

/// Value shown by the indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalValue {
    /// Nothing shown
    #[default]
    None,
    /// Last decision allowed the traffic
    Approved,
    /// Last decision denied the traffic
    Denied,
}

/// UI-facing indicator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApprovalIndicator {
    /// Current value
    pub value: ApprovalValue,
    /// Simulated time at which the value reverts
    #[serde(with = "crate::serde_ext::option_duration_ms")]
    pub expires_at: Option<Duration>,
}

/// Indicator plus the identity of its revert timer.
#[derive(Debug, Clone)]
pub struct ApprovalState {
    indicator: ApprovalIndicator,
    epoch: u64,
    armed: bool,
    window: Duration,
}

impl ApprovalState {
    /// Creates a cleared indicator that stays lit for `window`.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            indicator: ApprovalIndicator::default(),
            epoch: 0,
            armed: false,
            window,
        }
    }

    /// Current indicator.
    #[must_use]
    pub const fn indicator(&self) -> ApprovalIndicator {
        self.indicator
    }

    /// Lights the indicator for `decision`, superseding any previous value.
    pub fn record(&mut self, decision: &Decision, now: Duration) -> Vec<Effect> {
        let mut effects = self.disarm();
        self.indicator = ApprovalIndicator {
            value: if decision.is_allowed() {
                ApprovalValue::Approved
            } else {
                ApprovalValue::Denied
            },
            expires_at: Some(now + self.window),
        };
        self.armed = true;
        effects.push(Effect::start_timer(
            TimerId::ApprovalRevert { epoch: self.epoch },
            self.window,
        ));
        effects.push(self.changed());
        effects
    }

    /// Clears the indicator and its timer.
    pub fn clear(&mut self) -> Vec<Effect> {
        let mut effects = self.disarm();
        if self.indicator.value != ApprovalValue::None {
            self.indicator = ApprovalIndicator::default();
            effects.push(self.changed());
        }
        effects
    }

    /// Handles a revert timer.
    pub fn expire(&mut self, epoch: u64) -> Vec<Effect> {
        if !self.armed || epoch != self.epoch {
            debug!(epoch, current = self.epoch, "ignoring stale approval revert");
            return Vec::new();
        }
        self.armed = false;
        self.indicator = ApprovalIndicator::default();
        vec![self.changed()]
    }

    fn disarm(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.armed {
            effects.push(Effect::cancel_timer(TimerId::ApprovalRevert {
                epoch: self.epoch,
            }));
            self.armed = false;
        }
        self.epoch += 1;
        effects
    }

    fn changed(&self) -> Effect {
        Effect::Notify(Notification::ApprovalChanged {
            indicator: self.indicator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::RuleAction;

    fn allow() -> Decision {
        Decision {
            action: RuleAction::Allow,
            matched_rule_index: Some(0),
            matched_rule_id: Some("web".to_string()),
        }
    }

    fn revert_epoch(effects: &[Effect]) -> Option<u64> {
        effects.iter().find_map(|e| match e {
            Effect::StartTimer {
                id: TimerId::ApprovalRevert { epoch },
                ..
            } => Some(*epoch),
            _ => None,
        })
    }

    #[test]
    fn test_record_then_expire() {
        let mut a = ApprovalState::new(Duration::from_secs(5));
        let fx = a.record(&allow(), Duration::from_secs(10));
        assert_eq!(a.indicator().value, ApprovalValue::Approved);
        assert_eq!(a.indicator().expires_at, Some(Duration::from_secs(15)));

        let epoch = revert_epoch(&fx).unwrap();
        let fx = a.expire(epoch);
        assert_eq!(fx.len(), 1);
        assert_eq!(a.indicator().value, ApprovalValue::None);
    }

    #[test]
    fn test_new_decision_cancels_previous_timer() {
        let mut a = ApprovalState::new(Duration::from_secs(5));
        let first = revert_epoch(&a.record(&allow(), Duration::ZERO)).unwrap();
        let fx = a.record(&Decision::default_deny(), Duration::from_secs(1));

        assert!(matches!(
            fx.first(),
            Some(Effect::CancelTimer { id: TimerId::ApprovalRevert { epoch } }) if *epoch == first
        ));
        assert_eq!(a.indicator().value, ApprovalValue::Denied);

        // The superseded timer firing late changes nothing.
        assert!(a.expire(first).is_empty());
        assert_eq!(a.indicator().value, ApprovalValue::Denied);
    }

    #[test]
    fn test_clear_cancels_and_resets() {
        let mut a = ApprovalState::new(Duration::from_secs(5));
        let epoch = revert_epoch(&a.record(&allow(), Duration::ZERO)).unwrap();
        let fx = a.clear();
        assert_eq!(fx.len(), 2);
        assert_eq!(a.indicator(), ApprovalIndicator::default());
        assert!(a.expire(epoch).is_empty());

        // Clearing a cleared indicator is silent.
        assert!(a.clear().is_empty());
    }
}
