//! Execution engine tests: serialization of mutations, snapshots, rollback.

mod common;

use common::{context, test_config, FakePackageManager};
use nixling_common::cache::CacheManager;
use nixling_common::collaborator::{CancelToken, PackageManager, ProcessOutcome, SystemPackageManager};
use nixling_common::error::PipelineError;
use nixling_common::knowledge::KnowledgeBase;
use nixling_common::pipeline::PipelineContext;
use std::sync::Arc;
use nixling_common::executor::{ExecutionState, ExecutionStatus, RunOptions};
use nixling_common::pipeline::{handle, run, HandleOptions};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_concurrent_mutations_are_serialized() {
    let fake = FakePackageManager::with_delay(Duration::from_millis(40));
    let ctx = context(&fake);

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = ["firefox", "htop", "ripgrep", "vlc"]
            .into_iter()
            .map(|name| {
                let ctx = &ctx;
                scope.spawn(move || handle(ctx, &format!("install {}", name), &HandleOptions::default()))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(fake.max_in_flight(), 1);
    assert_eq!(fake.mutations(), 4);
    assert_eq!(fake.current_generation(), 46);

    let mut snapshots: Vec<String> = results
        .into_iter()
        .map(|r| {
            let result = r.unwrap();
            assert_eq!(result.status, ExecutionStatus::Success);
            result.snapshot_id.unwrap()
        })
        .collect();
    snapshots.sort();
    // each mutation saw the generation left by the one before it
    assert_eq!(snapshots, vec!["42", "43", "44", "45"]);
}

#[test]
fn test_queries_do_not_wait_for_mutations() {
    let fake = FakePackageManager::with_delay(Duration::from_millis(800));
    let ctx = context(&fake);

    let (mutation_done, query_done) = thread::scope(|scope| {
        let ctx = &ctx;
        let mutation = scope.spawn(move || {
            handle(ctx, "install firefox", &HandleOptions::default()).unwrap();
            Instant::now()
        });
        thread::sleep(Duration::from_millis(100));
        let query = scope.spawn(move || {
            handle(ctx, "search for htop", &HandleOptions::default()).unwrap();
            Instant::now()
        });
        (mutation.join().unwrap(), query.join().unwrap())
    });

    assert!(query_done < mutation_done);
}

#[test]
fn test_lock_released_after_timeout() {
    let fake = FakePackageManager::with_delay(Duration::from_secs(10));
    let ctx = context(&fake);
    let options = HandleOptions {
        timeout: Some(Duration::from_millis(50)),
        ..Default::default()
    };

    let start = Instant::now();
    let first = handle(&ctx, "install firefox", &options).unwrap();
    let second = handle(&ctx, "install htop", &options).unwrap();

    assert_eq!(first.status, ExecutionStatus::TimedOut);
    assert_eq!(second.status, ExecutionStatus::TimedOut);
    assert!(start.elapsed() < Duration::from_secs(5));
}

/// Real processes for mutations: a shell that leaves a child sleeping.
/// Generation queries go to the fake.
struct ForkingShell {
    fake: Arc<FakePackageManager>,
    system: SystemPackageManager,
}

impl PackageManager for ForkingShell {
    fn run(&self, argv: &[String], timeout: Duration, cancel: &CancelToken) -> ProcessOutcome {
        if argv.iter().any(|a| a == "--list-generations") {
            return self.fake.run(argv, timeout, cancel);
        }
        let script = ["sh", "-c", "sleep 5; true"].map(String::from);
        self.system.run(&script, timeout, cancel)
    }
}

#[test]
fn test_timeout_bounded_when_command_has_children() {
    let manager = Arc::new(ForkingShell {
        fake: FakePackageManager::new(),
        system: SystemPackageManager::new(),
    });
    let config = test_config();
    let cache = Arc::new(CacheManager::in_memory(&config.cache));
    let ctx = PipelineContext::new(config, cache, Arc::new(KnowledgeBase::builtin()), manager);
    let options = HandleOptions {
        timeout: Some(Duration::from_millis(200)),
        ..Default::default()
    };

    let start = Instant::now();
    let first = handle(&ctx, "install firefox", &options).unwrap();
    let second = handle(&ctx, "install htop", &options).unwrap();

    assert_eq!(first.status, ExecutionStatus::TimedOut);
    assert_eq!(second.status, ExecutionStatus::TimedOut);
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[test]
fn test_rollback_after_failure_is_a_no_op_at_snapshot() {
    let fake = FakePackageManager::new();
    fake.fail_next_mutation(1);
    let ctx = context(&fake);

    let (mut execution, result) = run(&ctx, "install firefox", &HandleOptions::default()).unwrap();
    assert_eq!(result.status, ExecutionStatus::Failure);
    assert_eq!(execution.state(), ExecutionState::Failed);
    assert_eq!(execution.snapshot_id(), Some("42"));

    let mutations = fake.mutations();
    let rollback = ctx.engine().rollback(&mut execution, &RunOptions::default()).unwrap();

    assert_eq!(rollback.status, ExecutionStatus::Success);
    assert_eq!(rollback.snapshot_id.as_deref(), Some("42"));
    assert_eq!(execution.state(), ExecutionState::RolledBack);
    assert_eq!(fake.mutations(), mutations);
}

#[test]
fn test_rollback_of_preview_is_invalid() {
    let fake = FakePackageManager::new();
    let ctx = context(&fake);
    let options = HandleOptions {
        dry_run: true,
        ..Default::default()
    };

    let (mut execution, _) = run(&ctx, "install firefox", &options).unwrap();
    assert_eq!(execution.state(), ExecutionState::DryRun);

    let err = ctx.engine().rollback(&mut execution, &RunOptions::default()).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidState { .. }));
    assert_eq!(fake.call_count(), 0);
}

#[test]
fn test_query_has_no_snapshot() {
    let fake = FakePackageManager::new();
    let ctx = context(&fake);

    let (mut execution, result) = run(&ctx, "search for htop", &HandleOptions::default()).unwrap();
    assert_eq!(result.snapshot_id, None);

    let err = ctx.engine().rollback(&mut execution, &RunOptions::default()).unwrap_err();
    assert_eq!(err.code(), "snapshot");
}

#[test]
fn test_execution_serializes_with_state() {
    let fake = FakePackageManager::new();
    let ctx = context(&fake);

    let (first, _) = run(&ctx, "install firefox", &HandleOptions::default()).unwrap();
    let (second, _) = run(&ctx, "install htop", &HandleOptions::default()).unwrap();
    assert_ne!(first.id(), second.id());

    let json = serde_json::to_value(&first).unwrap();
    assert_eq!(json["state"], "succeeded");
    assert_eq!(json["snapshot_id"], "42");
    assert_eq!(json["result"]["status"], "success");
}
