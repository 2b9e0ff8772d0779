//! Shared test fixtures: a scripted, stateful stand-in for nix.

#![allow(dead_code)]

use nixling_common::cache::CacheManager;
use nixling_common::collaborator::{CancelToken, PackageManager, ProcessOutcome, ProcessStatus};
use nixling_common::config::NixlingConfig;
use nixling_common::knowledge::KnowledgeBase;
use nixling_common::pipeline::PipelineContext;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const USER_PROFILE: &str = "/home/tester/.local/state/nix/profiles/profile";
pub const HOME_PROFILE: &str = "/home/tester/.local/state/nix/profiles/home-manager";

struct FakeState {
    generations: Vec<u64>,
    current: u64,
    installed: BTreeSet<String>,
}

/// Behaves like a tiny nix: every mutation creates a new generation,
/// switching generations moves `current`, listings reflect both.
pub struct FakePackageManager {
    state: Mutex<FakeState>,
    calls: Mutex<Vec<Vec<String>>>,
    mutation_delay: Duration,
    fail_next_mutation: Mutex<Option<i32>>,
    fail_generations: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    mutations: AtomicUsize,
}

impl FakePackageManager {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(mutation_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                generations: vec![40, 41, 42],
                current: 42,
                installed: ["git".to_string()].into_iter().collect(),
            }),
            calls: Mutex::new(Vec::new()),
            mutation_delay,
            fail_next_mutation: Mutex::new(None),
            fail_generations: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            mutations: AtomicUsize::new(0),
        })
    }

    pub fn fail_next_mutation(&self, exit_code: i32) {
        *self.fail_next_mutation.lock().unwrap() = Some(exit_code);
    }

    pub fn fail_generation_queries(&self) {
        self.fail_generations.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Mutations that actually reached the package manager
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn current_generation(&self) -> u64 {
        self.state.lock().unwrap().current
    }

    pub fn installed(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().installed.clone()
    }

    fn listing(&self) -> String {
        let state = self.state.lock().unwrap();
        state
            .generations
            .iter()
            .map(|n| {
                let marker = if *n == state.current { "   (current)" } else { "" };
                format!("  {}   2024-01-{:02} 10:00:00{}\n", n, n % 28 + 1, marker)
            })
            .collect()
    }

    fn mutate(&self, argv: &[String], timeout: Duration, cancel: &CancelToken) -> ProcessOutcome {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.mutations.fetch_add(1, Ordering::SeqCst);

        let outcome = self.wait(timeout, cancel).unwrap_or_else(|| self.apply(argv));

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    /// Sleep out the configured delay; `Some` when interrupted
    fn wait(&self, timeout: Duration, cancel: &CancelToken) -> Option<ProcessOutcome> {
        let start = Instant::now();
        while start.elapsed() < self.mutation_delay {
            if cancel.is_cancelled() {
                return Some(interrupted(ProcessStatus::Cancelled, start));
            }
            if start.elapsed() >= timeout {
                return Some(interrupted(ProcessStatus::TimedOut, start));
            }
            thread::sleep(Duration::from_millis(2));
        }
        None
    }

    fn apply(&self, argv: &[String]) -> ProcessOutcome {
        if let Some(code) = self.fail_next_mutation.lock().unwrap().take() {
            return ProcessOutcome::exited(code, "", "error: scripted failure");
        }

        let mut state = self.state.lock().unwrap();
        let last = argv.last().cloned().unwrap_or_default();

        if has(argv, "--switch-generation") || has(argv, "--to") {
            let Ok(target) = last.parse::<u64>() else {
                return ProcessOutcome::exited(1, "", "error: bad generation");
            };
            if !state.generations.contains(&target) {
                return ProcessOutcome::exited(1, "", format!("error: generation {} does not exist", target));
            }
            state.current = target;
            return ProcessOutcome::exited(0, format!("switching to generation {}", target), "");
        }

        let name = last
            .trim_start_matches("nixpkgs#")
            .trim_start_matches("nixos.")
            .trim_start_matches("nixpkgs.")
            .to_string();
        if has(argv, "install") || has(argv, "--install") {
            state.installed.insert(name.clone());
        } else if has(argv, "remove") || has(argv, "--uninstall") {
            state.installed.remove(&name);
        }

        let next = state.generations.iter().max().copied().unwrap_or(0) + 1;
        state.generations.push(next);
        state.current = next;
        ProcessOutcome::exited(0, format!("created generation {}", next), "")
    }
}

fn has(argv: &[String], word: &str) -> bool {
    argv.iter().any(|a| a == word)
}

fn interrupted(status: ProcessStatus, start: Instant) -> ProcessOutcome {
    ProcessOutcome {
        status,
        stdout: "partial output".to_string(),
        stderr: String::new(),
        duration: start.elapsed(),
    }
}

impl PackageManager for FakePackageManager {
    fn run(&self, argv: &[String], timeout: Duration, cancel: &CancelToken) -> ProcessOutcome {
        self.calls.lock().unwrap().push(argv.to_vec());

        if has(argv, "--list-generations") {
            if self.fail_generations.load(Ordering::SeqCst) {
                return ProcessOutcome::exited(1, "", "error: cannot read profile");
            }
            return ProcessOutcome::exited(0, self.listing(), "");
        }
        if has(argv, "--query") || (has(argv, "profile") && has(argv, "list")) {
            let installed = self.installed().into_iter().collect::<Vec<_>>().join("\n");
            return ProcessOutcome::exited(0, installed, "");
        }
        if has(argv, "search") {
            let terms = argv[3..].join(" ");
            return ProcessOutcome::exited(0, format!("* legacyPackages.x86_64-linux.{}", terms), "");
        }
        self.mutate(argv, timeout, cancel)
    }
}

/// Defaults with pre-warming and the disk tier switched off
pub fn test_config() -> NixlingConfig {
    let mut config = NixlingConfig::default();
    config.knowledge.prewarm = false;
    config.cache.disk_enabled = false;
    config.execution.user_profile = Some(PathBuf::from(USER_PROFILE));
    config.execution.home_profile = Some(PathBuf::from(HOME_PROFILE));
    config
}

pub fn context_with(fake: &Arc<FakePackageManager>, config: NixlingConfig) -> PipelineContext {
    let cache = Arc::new(CacheManager::in_memory(&config.cache));
    PipelineContext::new(config, cache, Arc::new(KnowledgeBase::builtin()), fake.clone())
}

pub fn context(fake: &Arc<FakePackageManager>) -> PipelineContext {
    context_with(fake, test_config())
}

/// Calls that were not generation queries
pub fn commands(fake: &FakePackageManager) -> Vec<Vec<String>> {
    fake.calls()
        .into_iter()
        .filter(|argv| !has(argv, "--list-generations"))
        .collect()
}
