//! Exit status for nixlingctl

use nixling_common::PipelineError;

/// Exit code for success
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code when the package manager ran and failed (or timed out)
pub const EXIT_EXECUTION_FAILED: i32 = 1;

/// Exit code when the request needs rewording or a choice from the user
pub const EXIT_NEEDS_INPUT: i32 = 2;

/// Exit code when the request was refused as unsafe
pub const EXIT_REJECTED: i32 = 3;

/// Exit code for everything else (bad state, snapshot problems)
pub const EXIT_GENERAL_ERROR: i32 = 4;

pub fn exit_code_for(error: &PipelineError) -> i32 {
    match error {
        PipelineError::ExtractionAmbiguous { .. } | PipelineError::NotFound { .. } => {
            EXIT_NEEDS_INPUT
        }
        PipelineError::Validation(_) => EXIT_REJECTED,
        PipelineError::ExecutionFailure { .. }
        | PipelineError::TimedOut { .. }
        | PipelineError::Cancelled => EXIT_EXECUTION_FAILED,
        PipelineError::Snapshot(_) | PipelineError::InvalidState { .. } => EXIT_GENERAL_ERROR,
    }
}
