use llm_client::LlmError;
use storywork_core::StoryworkError;
use thiserror::Error;

pub const GENERAL: i32 = 1;
pub const LOCK_HELD: i32 = 2;
pub const PLAN_CORRUPT: i32 = 3;
pub const NOT_CONFIGURED: i32 = 4;
pub const PREFLIGHT_FAILED: i32 = 5;
pub const INTERRUPTED: i32 = 130;

/// Run endings that are not library errors but still need their own exit code.
#[derive(Debug, Error)]
pub enum BatchExit {
    #[error("interrupted; progress is saved, rerun the same command to resume")]
    Interrupted,

    #[error("LLM preflight failed")]
    Preflight(#[source] LlmError),
}

/// Exit status for an error returned by a command.
pub fn code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(exit) = cause.downcast_ref::<BatchExit>() {
            return match exit {
                BatchExit::Interrupted => INTERRUPTED,
                BatchExit::Preflight(_) => PREFLIGHT_FAILED,
            };
        }
        if let Some(e) = cause.downcast_ref::<StoryworkError>() {
            return match e {
                StoryworkError::LockHeld { .. } => LOCK_HELD,
                StoryworkError::PlanCorrupt { .. } => PLAN_CORRUPT,
                e if e.is_configuration() => NOT_CONFIGURED,
                _ => GENERAL,
            };
        }
        if let Some(e) = cause.downcast_ref::<LlmError>() {
            if matches!(e, LlmError::NotConfigured | LlmError::InvalidSetting { .. }) {
                return NOT_CONFIGURED;
            }
        }
    }
    GENERAL
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use std::path::PathBuf;

    fn wrapped(e: StoryworkError) -> anyhow::Error {
        Err::<(), _>(e).context("running batch").unwrap_err()
    }

    #[test]
    fn library_errors_map_through_context() {
        let lock = StoryworkError::LockHeld {
            path: PathBuf::from(".lock"),
            age_secs: 3,
        };
        assert_eq!(code_for(&wrapped(lock)), LOCK_HELD);
        let corrupt = StoryworkError::PlanCorrupt {
            path: PathBuf::from(".rewrite_plan.json"),
            reason: "eof".into(),
        };
        assert_eq!(code_for(&wrapped(corrupt)), PLAN_CORRUPT);
        assert_eq!(
            code_for(&wrapped(StoryworkError::MissingInput(PathBuf::from("x")))),
            NOT_CONFIGURED
        );
        assert_eq!(
            code_for(&wrapped(StoryworkError::InvalidKey("x".into()))),
            GENERAL
        );
    }

    #[test]
    fn batch_exits() {
        assert_eq!(code_for(&anyhow::Error::new(BatchExit::Interrupted)), INTERRUPTED);
        let preflight = BatchExit::Preflight(LlmError::NotConfigured);
        assert_eq!(code_for(&anyhow::Error::new(preflight)), PREFLIGHT_FAILED);
        assert_eq!(code_for(&anyhow::Error::new(LlmError::NotConfigured)), NOT_CONFIGURED);
        assert_eq!(code_for(&anyhow::anyhow!("plain")), GENERAL);
    }
}
