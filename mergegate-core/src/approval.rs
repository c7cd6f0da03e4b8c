//! Approval counter: the graduated `status/LGT<n>` label sub-state-machine.
//!
//! The current approval level is read off the label set; no count is stored
//! anywhere else. A transition removes whatever approval labels are present
//! and adds at most one replacement, so the label set never carries two.

use crate::auth::AuthorizedAction;
use crate::command::DesiredState;
use crate::effect::Effect;

pub const APPROVAL_LABEL_PREFIX: &str = "status/LGT";

/// Parse the level out of an approval label.
///
/// The suffix must be a base-10 integer of at least 1 with no leading zeros;
/// `status/LGT01`, `status/LGT0` and `status/LGTx` are not approval labels.
pub fn parse_approval_label(name: &str) -> Option<u32> {
    let suffix = name.strip_prefix(APPROVAL_LABEL_PREFIX)?;
    if suffix.is_empty() || suffix.starts_with('0') || !suffix.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    suffix.parse().ok()
}

pub fn approval_label(level: u32) -> String {
    format!("{}{}", APPROVAL_LABEL_PREFIX, level)
}

/// The approval level recorded on the change, 0 if none.
///
/// Should several approval labels be present (someone added one by hand), the
/// highest wins.
pub fn current_level(labels: &[String]) -> u32 {
    labels
        .iter()
        .filter_map(|name| parse_approval_label(name))
        .max()
        .unwrap_or(0)
}

/// Result of an approval transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalTransition {
    pub level_before: u32,
    pub level_after: u32,
    pub effects: Vec<Effect>,
}

impl ApprovalTransition {
    pub fn new(level_before: u32, level_after: u32, effects: Vec<Effect>) -> Self {
        Self {
            level_before,
            level_after,
            effects,
        }
    }

    pub fn no_change(level: u32) -> Self {
        Self::new(level, level, vec![])
    }

    pub fn is_no_change(&self) -> bool {
        self.effects.is_empty()
    }
}

/// Compute the label mutations for an authorized approval action.
///
/// Granting below the threshold steps the level up by one. Granting at or
/// above the threshold is a no-op. Revoking drops every approval label.
pub fn transition(
    labels: &[String],
    required_approvals: u32,
    action: &AuthorizedAction,
) -> ApprovalTransition {
    let level = current_level(labels);
    let present: Vec<&String> = labels
        .iter()
        .filter(|name| parse_approval_label(name).is_some())
        .collect();

    match action.desired() {
        DesiredState::Revoke => {
            if present.is_empty() {
                return ApprovalTransition::no_change(level);
            }
            let effects = present
                .into_iter()
                .map(|name| Effect::RemoveLabel { name: name.clone() })
                .collect();
            ApprovalTransition::new(level, 0, effects)
        }
        DesiredState::Grant => {
            if level >= required_approvals {
                return ApprovalTransition::no_change(level);
            }
            let next = level + 1;
            let mut effects: Vec<Effect> = present
                .into_iter()
                .map(|name| Effect::RemoveLabel { name: name.clone() })
                .collect();
            effects.push(Effect::AddLabel {
                name: approval_label(next),
            });
            ApprovalTransition::new(level, next, effects)
        }
    }
}
