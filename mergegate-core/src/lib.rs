//! Review and merge gating for pull requests.
//!
//! Reviewers approve with `/lgtm`, which steps a `status/LGT<n>` label up
//! towards the required count. Committers then add the `status/can-merge`
//! marker with `/merge`. New commits invalidate the marker unless every
//! commit since the recorded tree hash came from a trusted committer.
//!
//! The crate is platform-agnostic: handlers read and write a change through
//! the [`capability::ChangeStore`] trait and resolve roles through
//! [`capability::OwnersProvider`].

pub mod approval;
pub mod auth;
pub mod capability;
pub mod command;
pub mod effect;
pub mod error;
pub mod event;
pub mod handler;
pub mod interpreter;
pub mod memory;
pub mod merge_gate;
pub mod respond;
pub mod state;

pub use capability::{ChangeStore, OwnersProvider};
pub use error::{CapabilityError, CapabilityResult, GateError};
pub use event::ChangeEvent;
pub use handler::{
    handle_approval_event, handle_merge_event, ApprovalSettings, HandlerContext, MergeSettings,
    Outcome,
};
pub use state::{ChangeId, Comment, CommentId, Commit, CommitSha, OwnersSnapshot, ReviewContext};
