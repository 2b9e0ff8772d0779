//! Nixling core - natural-language package management for NixOS.
//!
//! Turns a request like "install firefox" into a validated package-manager
//! command, runs it (or previews it), and can roll it back.

pub mod cache;
pub mod collaborator;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod generations;
pub mod intent;
pub mod knowledge;
pub mod pipeline;
pub mod similarity;

pub use cache::{CacheClass, CacheManager, CacheStats};
pub use collaborator::{CancelToken, PackageManager, ProcessOutcome, ProcessStatus, SystemPackageManager};
pub use command::{CommandBuilder, InstallMethod, Operation, ValidatedCommand};
pub use config::NixlingConfig;
pub use error::{PipelineError, ValidationError};
pub use executor::{
    Execution, ExecutionEngine, ExecutionResult, ExecutionState, ExecutionStatus, FailureReason,
    RunOptions,
};
pub use intent::{extract, Intent, IntentKind};
pub use knowledge::{CandidateOperation, KnowledgeBase, PackageInfo};
pub use pipeline::{handle, plan, HandleOptions, Plan, PipelineContext};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
