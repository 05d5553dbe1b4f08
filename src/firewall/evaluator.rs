//! First-match rule evaluation with a default-deny stance.

use super::{Decision, FirewallRule, FirewallTraffic};

/// Evaluates `traffic` against `rules`.
///
/// Rules are tried in ascending `order`; rules with equal order keep their
/// list position. The first match decides, and the reported index is the
/// rule's position in `rules` as supplied. When nothing matches, including
/// when `rules` is empty, the result is [`Decision::default_deny`].
#[must_use]
pub fn evaluate(rules: &[FirewallRule], traffic: &FirewallTraffic) -> Decision {
    let mut indices: Vec<usize> = (0..rules.len()).collect();
    indices.sort_by_key(|&i| rules[i].order);

    indices
        .into_iter()
        .find(|&i| rules[i].matches(traffic))
        .map_or_else(Decision::default_deny, |i| Decision {
            action: rules[i].action,
            matched_rule_index: Some(i),
            matched_rule_id: Some(rules[i].id.clone()),
        })
}
