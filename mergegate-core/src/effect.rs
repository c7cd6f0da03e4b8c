//! Effects (side effects as data).
//!
//! Planners return effects; the interpreter executes them against a
//! `ChangeStore`. Keeping them as data lets the policy be tested without a
//! platform behind it.

use crate::state::CommentId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    AddLabel { name: String },

    RemoveLabel { name: String },

    /// Post a comment whose failure must abort the event (rejection replies,
    /// the stale-marker notice).
    CreateComment { body: String },

    /// Post a comment on a best-effort basis (tree-hash records, review
    /// notifications).
    PostNotification { body: String },

    /// Delete a bot comment that has been superseded.
    DeleteComment { id: CommentId },

    Log { level: LogLevel, message: String },
}

impl Effect {
    /// Returns true if a failure of this effect is only logged.
    ///
    /// Label writes and required comments abort the remaining effects on
    /// failure, since later steps assume they happened.
    pub fn is_best_effort(&self) -> bool {
        matches!(
            self,
            Effect::PostNotification { .. } | Effect::DeleteComment { .. } | Effect::Log { .. }
        )
    }

    /// Returns true if this effect writes to the change.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Effect::Log { .. })
    }

    /// Short description used in logs and error messages.
    pub fn describe(&self) -> String {
        match self {
            Effect::AddLabel { name } => format!("add label {}", name),
            Effect::RemoveLabel { name } => format!("remove label {}", name),
            Effect::CreateComment { .. } => "create comment".to_string(),
            Effect::PostNotification { .. } => "post notification".to_string(),
            Effect::DeleteComment { id } => format!("delete comment {}", id),
            Effect::Log { .. } => "log".to_string(),
        }
    }
}

/// Log levels for the Log effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}
