//! Authorization guard for approval and merge commands.

use std::collections::HashSet;

use crate::command::DesiredState;
use crate::respond::{owners_url, Domain};
use crate::state::ReviewContext;

/// A state change that has passed the authorization guard.
///
/// This type can only be constructed via [`authorize`] (or
/// [`precheck_self_grant`] followed by [`authorize`]), so the approval and
/// merge planners cannot be reached without running the role check first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedAction {
    desired: DesiredState,
    actor: String,
}

impl AuthorizedAction {
    pub fn desired(&self) -> DesiredState {
        self.desired
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }
}

/// Why an actor was turned away. Rendered as a reply, never escalated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The change author tried to grant on their own change.
    SelfGrant { domain: Domain },
    /// Granting needs role membership.
    GrantNotInRole { domain: Domain, roster_url: String },
    /// Revoking needs role membership or authorship.
    RevokeNotInRole { domain: Domain, roster_url: String },
    /// Merge requested before approvals reached the threshold.
    InsufficientApprovals { required: u32 },
}

/// Reject an author granting on their own change.
///
/// Runs before the owners roster is loaded, so it does not need one.
pub fn precheck_self_grant(
    domain: Domain,
    context: &ReviewContext,
    desired: DesiredState,
) -> Result<(), Rejection> {
    if context.actor_is_author() && desired == DesiredState::Grant {
        return Err(Rejection::SelfGrant { domain });
    }
    Ok(())
}

/// Decide whether `context.actor` may apply `desired`.
///
/// `role_set` is the reviewer roster for approvals and the committer roster
/// for merges. The author may always revoke; nobody may grant on their own
/// change, whatever roles they hold.
pub fn authorize(
    domain: Domain,
    context: &ReviewContext,
    desired: DesiredState,
    role_set: &HashSet<String>,
    owners_link_base: &str,
) -> Result<AuthorizedAction, Rejection> {
    precheck_self_grant(domain, context, desired)?;

    let in_role = role_set.contains(&context.actor);
    match desired {
        DesiredState::Grant if !in_role => Err(Rejection::GrantNotInRole {
            domain,
            roster_url: owners_url(owners_link_base, &context.change),
        }),
        DesiredState::Revoke if !in_role && !context.actor_is_author() => {
            Err(Rejection::RevokeNotInRole {
                domain,
                roster_url: owners_url(owners_link_base, &context.change),
            })
        }
        _ => Ok(AuthorizedAction {
            desired,
            actor: context.actor.clone(),
        }),
    }
}
