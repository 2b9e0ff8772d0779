//! Execution engine.
//!
//! Drives one [`Execution`] through its lifecycle:
//!
//! ```text
//! Planned -> DryRun                                   (preview only)
//! Planned -> Executing -> Succeeded | Failed
//! Succeeded | Failed -> RolledBack                    (explicit rollback)
//! ```
//!
//! Mutating commands hold a process-wide lock for the whole Executing state,
//! and record a snapshot (the profile's current generation) before they run.
//! If the snapshot cannot be recorded the command does not run.

use crate::cache::{content_key, CacheClass, CacheManager};
use crate::collaborator::{CancelToken, PackageManager, ProcessOutcome, ProcessStatus};
use crate::command::{CommandBuilder, InstallMethod, Operation, ValidatedCommand};
use crate::config::ExecutionSettings;
use crate::error::PipelineError;
use crate::generations::GenerationListing;
use crate::lock_or_recover;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle state of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Planned,
    DryRun,
    Executing,
    Succeeded,
    Failed,
    RolledBack,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Planned => "planned",
            ExecutionState::DryRun => "dry_run",
            ExecutionState::Executing => "executing",
            ExecutionState::Succeeded => "succeeded",
            ExecutionState::Failed => "failed",
            ExecutionState::RolledBack => "rolled_back",
        }
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome category reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failure,
    DryRunOnly,
    TimedOut,
}

/// Why a `Failure` failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The package manager exited non-zero (or was killed by a signal)
    NonZeroExit,
    /// The pre-mutation snapshot could not be recorded
    Snapshot,
    Cancelled,
    /// The package manager could not be started
    Spawn,
}

/// What happened when an execution ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    /// The command as it was (or would have been) run
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub snapshot_id: Option<String>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Served from the installed-listing cache without running anything
    #[serde(default)]
    pub from_cache: bool,
}

impl ExecutionResult {
    fn dry_run(command: &ValidatedCommand) -> Self {
        Self {
            status: ExecutionStatus::DryRunOnly,
            command: command.dry_run_preview().to_string(),
            stdout: format!("[DRY RUN] Would execute: {}", command.dry_run_preview()),
            stderr: String::new(),
            exit_code: None,
            snapshot_id: None,
            duration_ms: 0,
            failure: None,
            timeout_ms: None,
            from_cache: false,
        }
    }

    fn from_outcome(
        command: &ValidatedCommand,
        outcome: ProcessOutcome,
        snapshot_id: Option<String>,
        timeout: Duration,
    ) -> Self {
        let exit_code = outcome.exit_code();
        let mut stderr = outcome.stderr;
        let (status, failure, timeout_ms) = match outcome.status {
            ProcessStatus::Exited { code: Some(0) } => (ExecutionStatus::Success, None, None),
            ProcessStatus::Exited { .. } => {
                (ExecutionStatus::Failure, Some(FailureReason::NonZeroExit), None)
            }
            ProcessStatus::TimedOut => (
                ExecutionStatus::TimedOut,
                None,
                Some(timeout.as_millis() as u64),
            ),
            ProcessStatus::Cancelled => {
                (ExecutionStatus::Failure, Some(FailureReason::Cancelled), None)
            }
            ProcessStatus::SpawnFailed { message } => {
                if stderr.is_empty() {
                    stderr = message;
                }
                (ExecutionStatus::Failure, Some(FailureReason::Spawn), None)
            }
        };
        Self {
            status,
            command: command.dry_run_preview().to_string(),
            stdout: outcome.stdout,
            stderr,
            exit_code,
            snapshot_id,
            duration_ms: outcome.duration.as_millis() as u64,
            failure,
            timeout_ms,
            from_cache: false,
        }
    }

    fn snapshot_failure(command: &ValidatedCommand, reason: String) -> Self {
        Self {
            status: ExecutionStatus::Failure,
            command: command.dry_run_preview().to_string(),
            stdout: String::new(),
            stderr: reason,
            exit_code: None,
            snapshot_id: None,
            duration_ms: 0,
            failure: Some(FailureReason::Snapshot),
            timeout_ms: None,
            from_cache: false,
        }
    }

    fn cancelled(command: &ValidatedCommand) -> Self {
        Self {
            status: ExecutionStatus::Failure,
            command: command.dry_run_preview().to_string(),
            stdout: String::new(),
            stderr: "cancelled before the package manager ran".to_string(),
            exit_code: None,
            snapshot_id: None,
            duration_ms: 0,
            failure: Some(FailureReason::Cancelled),
            timeout_ms: None,
            from_cache: false,
        }
    }

    fn cached_listing(command: &ValidatedCommand, stdout: String) -> Self {
        Self {
            status: ExecutionStatus::Success,
            command: command.dry_run_preview().to_string(),
            stdout,
            stderr: String::new(),
            exit_code: Some(0),
            snapshot_id: None,
            duration_ms: 0,
            failure: None,
            timeout_ms: None,
            from_cache: true,
        }
    }

    fn already_at(command: &ValidatedCommand, snapshot: String) -> Self {
        Self {
            status: ExecutionStatus::Success,
            command: command.dry_run_preview().to_string(),
            stdout: format!("already at generation {}", snapshot),
            stderr: String::new(),
            exit_code: None,
            snapshot_id: Some(snapshot),
            duration_ms: 0,
            failure: None,
            timeout_ms: None,
            from_cache: false,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::Success | ExecutionStatus::DryRunOnly
        )
    }

    /// The error matching a non-successful result
    pub fn error(&self) -> Option<PipelineError> {
        match (self.status, self.failure) {
            (ExecutionStatus::Success | ExecutionStatus::DryRunOnly, _) => None,
            (ExecutionStatus::TimedOut, _) => Some(PipelineError::TimedOut {
                timeout_ms: self.timeout_ms.unwrap_or(self.duration_ms),
                stdout: self.stdout.clone(),
                stderr: self.stderr.clone(),
            }),
            (ExecutionStatus::Failure, Some(FailureReason::Snapshot)) => {
                Some(PipelineError::Snapshot(self.stderr.clone()))
            }
            (ExecutionStatus::Failure, Some(FailureReason::Cancelled)) => {
                Some(PipelineError::Cancelled)
            }
            (ExecutionStatus::Failure, _) => Some(PipelineError::ExecutionFailure {
                exit_code: self.exit_code,
                stdout: self.stdout.clone(),
                stderr: self.stderr.clone(),
            }),
        }
    }

    /// `Ok(self)` on success, the matching error otherwise
    pub fn into_result(self) -> Result<Self, PipelineError> {
        match self.error() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

/// One planned command and everything that happened to it
#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    id: Uuid,
    state: ExecutionState,
    command: ValidatedCommand,
    snapshot_id: Option<String>,
    result: Option<ExecutionResult>,
}

impl Execution {
    pub fn planned(command: ValidatedCommand) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: ExecutionState::Planned,
            command,
            snapshot_id: None,
            result: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn command(&self) -> &ValidatedCommand {
        &self.command
    }

    pub fn snapshot_id(&self) -> Option<&str> {
        self.snapshot_id.as_deref()
    }

    pub fn result(&self) -> Option<&ExecutionResult> {
        self.result.as_ref()
    }

    fn expect_state(&self, expected: ExecutionState, action: &str) -> Result<(), PipelineError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn invalid(&self, action: &str) -> PipelineError {
        PipelineError::InvalidState {
            action: action.to_string(),
            state: self.state.to_string(),
        }
    }

    fn finish(&mut self, state: ExecutionState, result: ExecutionResult) {
        debug!(id = %self.id, from = %self.state, to = %state, "Execution transition");
        self.state = state;
        self.result = Some(result);
    }
}

/// Per-run knobs
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the configured query/mutation timeout
    pub timeout: Option<Duration>,
    pub cancel: CancelToken,
}

/// Runs validated commands through a [`PackageManager`]
pub struct ExecutionEngine {
    manager: Arc<dyn PackageManager>,
    builder: CommandBuilder,
    cache: Option<Arc<CacheManager>>,
    mutation_lock: Mutex<()>,
    query_timeout: Duration,
    mutation_timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(
        manager: Arc<dyn PackageManager>,
        settings: &ExecutionSettings,
        cache: Option<Arc<CacheManager>>,
    ) -> Self {
        Self {
            manager,
            builder: CommandBuilder::new(settings),
            cache,
            mutation_lock: Mutex::new(()),
            query_timeout: settings.effective_query_timeout(),
            mutation_timeout: settings.effective_mutation_timeout(),
        }
    }

    /// Preview without invoking the package manager. Terminal.
    pub fn dry_run(&self, execution: &mut Execution) -> Result<ExecutionResult, PipelineError> {
        execution.expect_state(ExecutionState::Planned, "preview")?;
        let result = ExecutionResult::dry_run(&execution.command);
        info!(id = %execution.id, command = %result.command, "Dry run");
        execution.finish(ExecutionState::DryRun, result.clone());
        Ok(result)
    }

    /// Run a planned execution to a terminal state.
    ///
    /// Package-manager failures come back as an `Ok` result with a failure
    /// status; `Err` means the execution was not in a runnable state.
    pub fn execute(
        &self,
        execution: &mut Execution,
        options: &RunOptions,
    ) -> Result<ExecutionResult, PipelineError> {
        execution.expect_state(ExecutionState::Planned, "execute")?;
        let command = execution.command.clone();
        assert!(
            !command.argv().is_empty(),
            "validated command with empty argv"
        );

        if command.operation() == Operation::ListInstalled {
            if let Some(stdout) = self.cached_listing(&command) {
                debug!(id = %execution.id, "Installed listing served from cache");
                let result = ExecutionResult::cached_listing(&command, stdout);
                execution.finish(ExecutionState::Succeeded, result.clone());
                return Ok(result);
            }
        }

        let mutating = command.is_mutating();
        let timeout = options.timeout.unwrap_or(if mutating {
            self.mutation_timeout
        } else {
            self.query_timeout
        });

        // Held until this function returns, whatever the outcome
        let _guard = mutating.then(|| lock_or_recover(&self.mutation_lock));
        execution.state = ExecutionState::Executing;

        if options.cancel.is_cancelled() {
            info!(id = %execution.id, "Cancelled before running");
            let result = ExecutionResult::cancelled(&command);
            execution.finish(ExecutionState::Failed, result.clone());
            return Ok(result);
        }

        if mutating {
            match self.snapshot(command.method(), &options.cancel) {
                Ok(id) => {
                    debug!(id = %execution.id, snapshot = %id, "Snapshot recorded");
                    execution.snapshot_id = Some(id);
                }
                Err(PipelineError::Cancelled) => {
                    info!(id = %execution.id, "Cancelled while recording snapshot");
                    let result = ExecutionResult::cancelled(&command);
                    execution.finish(ExecutionState::Failed, result.clone());
                    return Ok(result);
                }
                Err(e) => {
                    let reason = match e {
                        PipelineError::Snapshot(reason) => reason,
                        other => other.to_string(),
                    };
                    warn!(id = %execution.id, reason = %reason, "Snapshot failed, not mutating");
                    let result = ExecutionResult::snapshot_failure(&command, reason);
                    execution.finish(ExecutionState::Failed, result.clone());
                    return Ok(result);
                }
            }
        }

        info!(
            id = %execution.id,
            operation = command.operation().as_str(),
            method = command.method().as_str(),
            elevated = command.requires_elevation(),
            "Running package manager"
        );
        let outcome = self.manager.run(&command.full_argv(), timeout, &options.cancel);
        let spawned = !matches!(outcome.status, ProcessStatus::SpawnFailed { .. });
        let result =
            ExecutionResult::from_outcome(&command, outcome, execution.snapshot_id.clone(), timeout);

        if mutating && spawned {
            self.invalidate_system_state();
        }
        if command.operation() == Operation::ListInstalled && result.status == ExecutionStatus::Success {
            if let Some(cache) = &self.cache {
                cache.put(&listing_key(&command), CacheClass::InstalledListing, &result.stdout);
            }
        }

        let state = if result.status == ExecutionStatus::Success {
            ExecutionState::Succeeded
        } else {
            ExecutionState::Failed
        };
        info!(id = %execution.id, state = %state, duration_ms = result.duration_ms, "Execution finished");
        execution.finish(state, result.clone());
        Ok(result)
    }

    /// Return the profile to the execution's snapshot.
    ///
    /// Rolling back an execution that is already rolled back, or whose
    /// profile already sits at the snapshot, succeeds without running
    /// anything.
    pub fn rollback(
        &self,
        execution: &mut Execution,
        options: &RunOptions,
    ) -> Result<ExecutionResult, PipelineError> {
        match execution.state {
            ExecutionState::RolledBack => {
                if let Some(result) = &execution.result {
                    return Ok(result.clone());
                }
            }
            ExecutionState::Succeeded | ExecutionState::Failed => {}
            _ => return Err(execution.invalid("roll back")),
        }

        let snapshot = execution.snapshot_id.clone().ok_or_else(|| {
            PipelineError::Snapshot("execution has no snapshot to roll back to".to_string())
        })?;
        let method = execution.command.method();
        let command = self.builder.build_rollback(method, &snapshot)?;

        let _guard = lock_or_recover(&self.mutation_lock);

        let listing = self.query_generations(method, &options.cancel)?;
        if listing.current().map(|g| g.number.to_string()) == Some(snapshot.clone()) {
            info!(id = %execution.id, snapshot = %snapshot, "Already at snapshot");
            let result = ExecutionResult::already_at(&command, snapshot);
            execution.finish(ExecutionState::RolledBack, result.clone());
            return Ok(result);
        }

        info!(id = %execution.id, snapshot = %snapshot, "Rolling back");
        let timeout = options.timeout.unwrap_or(self.mutation_timeout);
        let outcome = self.manager.run(&command.full_argv(), timeout, &options.cancel);
        let result = ExecutionResult::from_outcome(&command, outcome, Some(snapshot), timeout);
        self.invalidate_system_state();

        if result.status == ExecutionStatus::Success {
            execution.finish(ExecutionState::RolledBack, result.clone());
        } else {
            warn!(id = %execution.id, "Rollback failed");
        }
        Ok(result)
    }

    /// Generation listing for a method's profile, cache first
    pub fn generations(
        &self,
        method: InstallMethod,
        cancel: &CancelToken,
    ) -> Result<GenerationListing, PipelineError> {
        let command = self.builder.build_generations_query(method)?;
        if let Some(cache) = &self.cache {
            if let Some(listing) = cache.get::<GenerationListing>(&listing_key(&command)) {
                return Ok(listing);
            }
        }
        self.query_generations(method, cancel)
    }

    /// Fresh generation listing; refreshes the cache
    fn query_generations(
        &self,
        method: InstallMethod,
        cancel: &CancelToken,
    ) -> Result<GenerationListing, PipelineError> {
        let command = self.builder.build_generations_query(method)?;
        let outcome = self.manager.run(&command.full_argv(), self.query_timeout, cancel);
        let result = ExecutionResult::from_outcome(&command, outcome, None, self.query_timeout);
        if let Some(e) = result.error() {
            return Err(e);
        }

        let listing = GenerationListing::parse(&result.stdout);
        if let Some(cache) = &self.cache {
            cache.put(&listing_key(&command), CacheClass::Generations, &listing);
        }
        Ok(listing)
    }

    /// Current generation of the method's profile. A cancelled query stays
    /// `Cancelled`; anything else becomes a `Snapshot` error.
    fn snapshot(&self, method: InstallMethod, cancel: &CancelToken) -> Result<String, PipelineError> {
        let listing = self.query_generations(method, cancel).map_err(|e| match e {
            PipelineError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::Snapshot(format!("generation query failed: {}", other)),
        })?;
        listing
            .current()
            .map(|g| g.number.to_string())
            .ok_or_else(|| PipelineError::Snapshot("no current generation found".to_string()))
    }

    fn cached_listing(&self, command: &ValidatedCommand) -> Option<String> {
        self.cache.as_ref()?.get::<String>(&listing_key(command))
    }

    fn invalidate_system_state(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_class(CacheClass::InstalledListing);
            cache.invalidate_class(CacheClass::Generations);
        }
    }
}

fn listing_key(command: &ValidatedCommand) -> String {
    let argv: Vec<&str> = command.argv().iter().map(String::as_str).collect();
    let class = match command.operation() {
        Operation::ListGenerations => CacheClass::Generations,
        _ => CacheClass::InstalledListing,
    };
    content_key(class, &argv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::extract;
    use crate::knowledge::{CandidateOperation, PackageInfo};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const LISTING: &str = "  41   2024-01-14 09:12:03\n  42   2024-01-15 14:30:45   (current)\n";

    /// Answers generation queries with LISTING and everything else with `exit`
    struct Scripted {
        exit: i32,
        runs: AtomicUsize,
    }

    impl PackageManager for Scripted {
        fn run(&self, argv: &[String], _timeout: Duration, _cancel: &CancelToken) -> ProcessOutcome {
            if argv.iter().any(|a| a == "--list-generations") {
                return ProcessOutcome::exited(0, LISTING, "");
            }
            self.runs.fetch_add(1, Ordering::SeqCst);
            ProcessOutcome::exited(self.exit, "out", if self.exit == 0 { "" } else { "boom" })
        }
    }

    fn engine(exit: i32) -> (ExecutionEngine, Arc<Scripted>) {
        let pm = Arc::new(Scripted {
            exit,
            runs: AtomicUsize::new(0),
        });
        (ExecutionEngine::new(pm.clone(), &ExecutionSettings::default(), None), pm)
    }

    fn install_firefox() -> Execution {
        let builder = CommandBuilder::new(&ExecutionSettings::default());
        let command = builder
            .build(&CandidateOperation {
                intent: extract("install firefox"),
                packages: vec![PackageInfo::new("firefox", "", &[], "firefox")],
                method: InstallMethod::Imperative,
                explanation: String::new(),
                confidence: 1.0,
            })
            .unwrap();
        Execution::planned(command)
    }

    #[test]
    fn test_dry_run_never_invokes() {
        let (engine, pm) = engine(0);
        let mut execution = install_firefox();
        let result = engine.dry_run(&mut execution).unwrap();

        assert_eq!(result.status, ExecutionStatus::DryRunOnly);
        assert!(result.stdout.contains("nix profile install nixpkgs#firefox"));
        assert_eq!(execution.state(), ExecutionState::DryRun);
        assert_eq!(pm.runs.load(Ordering::SeqCst), 0);
        assert!(engine.execute(&mut execution, &RunOptions::default()).is_err());
    }

    #[test]
    fn test_success_records_snapshot() {
        let (engine, _) = engine(0);
        let mut execution = install_firefox();
        let result = engine.execute(&mut execution, &RunOptions::default()).unwrap();

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.snapshot_id.as_deref(), Some("42"));
        assert_eq!(execution.state(), ExecutionState::Succeeded);
        assert!(result.error().is_none());
    }

    #[test]
    fn test_failure_maps_to_execution_failure() {
        let (engine, _) = engine(2);
        let mut execution = install_firefox();
        let result = engine.execute(&mut execution, &RunOptions::default()).unwrap();

        assert_eq!(execution.state(), ExecutionState::Failed);
        match result.error() {
            Some(PipelineError::ExecutionFailure { exit_code, stderr, .. }) => {
                assert_eq!(exit_code, Some(2));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_execute_twice_is_invalid() {
        let (engine, _) = engine(0);
        let mut execution = install_firefox();
        engine.execute(&mut execution, &RunOptions::default()).unwrap();
        let err = engine.execute(&mut execution, &RunOptions::default()).unwrap_err();
        assert_eq!(err.code(), "invalid_state");
    }

    #[test]
    fn test_rollback_requires_terminal_state() {
        let (engine, _) = engine(0);
        let mut execution = install_firefox();
        let err = engine.rollback(&mut execution, &RunOptions::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidState { .. }));
    }

    /// Reports every generation query as cancelled
    struct CancelledQuery;

    impl PackageManager for CancelledQuery {
        fn run(&self, _argv: &[String], _timeout: Duration, _cancel: &CancelToken) -> ProcessOutcome {
            ProcessOutcome {
                status: ProcessStatus::Cancelled,
                stdout: String::new(),
                stderr: String::new(),
                duration: Duration::ZERO,
            }
        }
    }

    #[test]
    fn test_cancel_during_snapshot_is_cancelled() {
        let engine = ExecutionEngine::new(Arc::new(CancelledQuery), &ExecutionSettings::default(), None);
        let mut execution = install_firefox();
        let result = engine.execute(&mut execution, &RunOptions::default()).unwrap();

        assert_eq!(result.failure, Some(FailureReason::Cancelled));
        assert_eq!(result.error(), Some(PipelineError::Cancelled));
        assert_eq!(result.snapshot_id, None);
        assert_eq!(execution.state(), ExecutionState::Failed);
    }

    #[test]
    fn test_into_result() {
        let (engine, _) = engine(1);
        let mut execution = install_firefox();
        let result = engine.execute(&mut execution, &RunOptions::default()).unwrap();
        assert!(result.into_result().is_err());
    }
}
