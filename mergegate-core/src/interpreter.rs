//! Effect interpreter.
//!
//! The boundary between the planners and the platform. Effects run in order;
//! the first failing required effect stops the run, while best-effort effects
//! are logged and skipped past.

use tracing::{debug, error, info, warn};

use crate::capability::ChangeStore;
use crate::effect::{Effect, LogLevel};
use crate::error::{CapabilityError, GateError};

/// Context needed by the interpreter to execute effects.
pub struct InterpreterContext<'a> {
    pub store: &'a dyn ChangeStore,
    /// Log mutations instead of performing them.
    pub dry_run: bool,
}

/// Result of executing a batch of effects.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Effects that completed (or would have, in dry-run mode).
    pub applied: usize,
    /// Best-effort effects that failed and were skipped.
    pub skipped: usize,
}

/// Execute effects sequentially.
///
/// A required effect failing returns `GateError::Mutation` and the remaining
/// effects are not attempted.
pub async fn execute_effects(
    ctx: &InterpreterContext<'_>,
    effects: Vec<Effect>,
) -> Result<ExecutionReport, GateError> {
    let mut report = ExecutionReport::default();
    let change = ctx.store.change();

    for effect in effects {
        if ctx.dry_run && effect.is_mutation() {
            info!("[dry-run] would {} on {}", effect.describe(), change);
            report.applied += 1;
            continue;
        }

        match execute_effect(ctx.store, &effect).await {
            Ok(()) => report.applied += 1,
            Err(err) if effect.is_best_effort() => {
                warn!(
                    "Best-effort effect failed on {}: {}: {}",
                    change,
                    effect.describe(),
                    err
                );
                report.skipped += 1;
            }
            Err(err) => {
                error!(
                    "Effect execution failed on {}: {}: {}",
                    change,
                    effect.describe(),
                    err
                );
                return Err(GateError::Mutation {
                    change: change.clone(),
                    action: effect.describe(),
                    message: err.to_string(),
                });
            }
        }
    }

    Ok(report)
}

/// Execute a single effect.
async fn execute_effect(store: &dyn ChangeStore, effect: &Effect) -> Result<(), CapabilityError> {
    match effect {
        Effect::AddLabel { name } => {
            info!("Adding '{}' label to {}", name, store.change());
            store.add_label(name).await
        }
        Effect::RemoveLabel { name } => {
            info!("Removing '{}' label from {}", name, store.change());
            store.remove_label(name).await
        }
        Effect::CreateComment { body } | Effect::PostNotification { body } => {
            debug!("Commenting on {}: {:?}", store.change(), body);
            store.create_comment(body).await
        }
        Effect::DeleteComment { id } => {
            debug!("Deleting comment {} on {}", id, store.change());
            store.delete_comment(*id).await
        }
        Effect::Log { level, message } => {
            match level {
                LogLevel::Debug => debug!("{}", message),
                LogLevel::Info => info!("{}", message),
                LogLevel::Warn => warn!("{}", message),
                LogLevel::Error => error!("{}", message),
            }
            Ok(())
        }
    }
}
