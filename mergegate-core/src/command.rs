//! Command recognition for `/lgtm` and `/merge` style comments.
use std::fmt;

/// What the actor wants to happen to the gated state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DesiredState {
    Grant,
    Revoke,
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DesiredState::Grant => write!(f, "grant"),
            DesiredState::Revoke => write!(f, "revoke"),
        }
    }
}

/// The two verbs a policy domain answers to.
///
/// Entries are evaluated in order, so grant is listed first: a body carrying
/// both `/lgtm` and `/lgtm cancel` lines is a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTable {
    pub entries: &'static [(&'static str, DesiredState)],
}

pub const APPROVAL_COMMANDS: CommandTable = CommandTable {
    entries: &[
        ("/lgtm", DesiredState::Grant),
        ("/lgtm cancel", DesiredState::Revoke),
    ],
};

pub const MERGE_COMMANDS: CommandTable = CommandTable {
    entries: &[
        ("/merge", DesiredState::Grant),
        ("/merge cancel", DesiredState::Revoke),
    ],
};

impl CommandTable {
    /// Find the first verb (in table order) that appears as a whole line of `body`.
    ///
    /// A line matches when, after stripping trailing whitespace, it equals the
    /// verb ignoring ASCII case. Leading whitespace is not stripped, so an
    /// indented `  /lgtm` is not a command.
    pub fn parse(&self, body: &str) -> Option<DesiredState> {
        self.entries
            .iter()
            .find(|(verb, _)| body.lines().any(|line| line_is_verb(line, verb)))
            .map(|(_, state)| *state)
    }

    /// True if any line of `body` is one of this table's verbs.
    pub fn mentions_any(&self, body: &str) -> bool {
        self.parse(body).is_some()
    }

    /// The verb that grants, for use in help text.
    pub fn grant_verb(&self) -> &'static str {
        self.verb_for(DesiredState::Grant)
    }

    pub fn revoke_verb(&self) -> &'static str {
        self.verb_for(DesiredState::Revoke)
    }

    fn verb_for(&self, wanted: DesiredState) -> &'static str {
        self.entries
            .iter()
            .find(|(_, state)| *state == wanted)
            .map(|(verb, _)| *verb)
            .unwrap_or_default()
    }
}

fn line_is_verb(line: &str, verb: &str) -> bool {
    line.trim_end().eq_ignore_ascii_case(verb)
}
