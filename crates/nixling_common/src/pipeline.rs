//! The request pipeline: text in, [`ExecutionResult`] out.
//!
//! `extract -> resolve -> build/validate -> execute`, each stage returning a
//! typed error the caller can act on. [`PipelineContext`] owns the
//! long-lived pieces (cache, knowledge base, engine); everything else is
//! created per request.

use crate::cache::CacheManager;
use crate::collaborator::{CancelToken, PackageManager, SystemPackageManager};
use crate::command::{CommandBuilder, InstallMethod};
use crate::config::NixlingConfig;
use crate::error::{PipelineError, ValidationError};
use crate::executor::{Execution, ExecutionEngine, ExecutionResult, RunOptions};
use crate::intent::{extract, Intent, IntentKind, MOD_GENERATION, MOD_METHOD, SHELL_METACHARACTERS};
use crate::knowledge::{CandidateOperation, KnowledgeBase};
use serde::Serialize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_TIMEOUT: Duration = Duration::from_secs(3600);

/// Long-lived pipeline state, shared by every request
pub struct PipelineContext {
    config: NixlingConfig,
    cache: Arc<CacheManager>,
    knowledge: Arc<KnowledgeBase>,
    builder: CommandBuilder,
    engine: ExecutionEngine,
}

impl PipelineContext {
    pub fn new(
        config: NixlingConfig,
        cache: Arc<CacheManager>,
        knowledge: Arc<KnowledgeBase>,
        manager: Arc<dyn PackageManager>,
    ) -> Self {
        let builder = CommandBuilder::new(&config.execution);
        let engine = ExecutionEngine::new(manager, &config.execution, Some(cache.clone()));
        Self {
            config,
            cache,
            knowledge,
            builder,
            engine,
        }
    }

    /// Real package manager, disk cache and package index from config
    pub fn from_config(config: NixlingConfig) -> Self {
        let cache = Arc::new(CacheManager::new(&config.cache));
        let knowledge = Arc::new(KnowledgeBase::load(&config.knowledge));
        Self::new(config, cache, knowledge, Arc::new(SystemPackageManager::new()))
    }

    pub fn config(&self) -> &NixlingConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeBase> {
        &self.knowledge
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// Resolve the configured common queries in the background.
    ///
    /// Fire and forget: a request racing the warm-up just sees a cache miss.
    /// Returns `None` when pre-warming is disabled.
    pub fn spawn_prewarm(&self) -> Option<JoinHandle<usize>> {
        if !self.config.knowledge.prewarm {
            return None;
        }
        let cache = self.cache.clone();
        let knowledge = self.knowledge.clone();
        let queries = self.config.knowledge.prewarm_queries.clone();
        thread::Builder::new()
            .name("nixling-prewarm".to_string())
            .spawn(move || {
                let warmed = knowledge.prewarm(&cache, &queries);
                debug!(warmed, total = queries.len(), "Cache pre-warmed");
                warmed
            })
            .map_err(|e| warn!(error = %e, "Could not start cache pre-warming"))
            .ok()
    }

    /// Flush the cache's disk tier
    pub fn shutdown(&self) {
        self.cache.shutdown();
    }
}

/// Per-request options
#[derive(Debug, Clone, Default)]
pub struct HandleOptions {
    /// Preview only; nothing is executed
    pub dry_run: bool,
    /// Overrides the configured timeout (capped at one hour)
    pub timeout: Option<Duration>,
    pub cancel: CancelToken,
}

/// Everything decided before execution
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub intent: Intent,
    /// Ranked, best first; the first one is planned
    pub candidates: Vec<CandidateOperation>,
    pub execution: Execution,
}

/// Extract, resolve and validate without executing anything
pub fn plan(ctx: &PipelineContext, raw: &str) -> Result<Plan, PipelineError> {
    let mut intent = extract(raw);
    debug!(
        kind = intent.kind().as_str(),
        confidence = intent.confidence(),
        target = intent.target().unwrap_or(""),
        "Intent extracted"
    );

    if intent.is_unsafe() {
        return Err(reject_unsafe(&intent));
    }

    let min_confidence = ctx.config.intent.effective_min_confidence();
    if intent.kind() == IntentKind::Unknown || intent.confidence() < min_confidence {
        return Err(clarify(&intent));
    }
    if intent.kind().requires_target() && intent.target().is_none() {
        return Err(PipelineError::ExtractionAmbiguous {
            question: format!("Which package do you want to {}?", intent.kind()),
            choices: Vec::new(),
            confidence: intent.confidence(),
        });
    }

    if !intent.extra_targets().is_empty() {
        let choices = intent
            .target()
            .into_iter()
            .chain(intent.extra_targets())
            .map(String::from)
            .collect();
        return Err(PipelineError::ExtractionAmbiguous {
            question: "I handle one package per request. Which one should I start with?".to_string(),
            choices,
            confidence: intent.confidence(),
        });
    }

    let method = intent
        .modifier(MOD_METHOD)
        .and_then(InstallMethod::from_modifier)
        .unwrap_or(ctx.config.execution.default_method);

    if intent.kind() == IntentKind::Rollback {
        intent = pick_generation(ctx, intent, method)?;
    }

    let candidates = ctx.knowledge.resolve(&ctx.cache, &intent, method)?;
    if intent.kind().is_mutating() {
        check_tie(&intent, &candidates)?;
    }

    let Some(best) = candidates.first() else {
        return Err(PipelineError::NotFound {
            target: intent.target().unwrap_or_default().to_string(),
            suggestions: Vec::new(),
        });
    };
    let command = ctx.builder.build(best)?;
    info!(
        kind = intent.kind().as_str(),
        method = method.as_str(),
        command = %command.dry_run_preview(),
        "Planned"
    );

    Ok(Plan {
        intent,
        execution: Execution::planned(command),
        candidates,
    })
}

/// Plan and carry out a request, keeping the [`Execution`] so the caller can
/// roll it back later
pub fn run(
    ctx: &PipelineContext,
    raw: &str,
    options: &HandleOptions,
) -> Result<(Execution, ExecutionResult), PipelineError> {
    let Plan {
        intent,
        mut execution,
        ..
    } = plan(ctx, raw)?;

    let result = if options.dry_run || intent.is_dry_run() {
        ctx.engine.dry_run(&mut execution)?
    } else {
        let run_options = RunOptions {
            timeout: options
                .timeout
                .filter(|t| !t.is_zero())
                .map(|t| t.min(MAX_TIMEOUT)),
            cancel: options.cancel.clone(),
        };
        ctx.engine.execute(&mut execution, &run_options)?
    };
    Ok((execution, result))
}

/// The pipeline's single entry point for front ends
pub fn handle(
    ctx: &PipelineContext,
    raw: &str,
    options: &HandleOptions,
) -> Result<ExecutionResult, PipelineError> {
    run(ctx, raw, options).map(|(_, result)| result)
}

fn reject_unsafe(intent: &Intent) -> PipelineError {
    let raw = intent.raw_text();
    let error = match raw.chars().find(|c| SHELL_METACHARACTERS.contains(c)) {
        Some(found) => ValidationError::InvalidCharacter {
            token: raw.to_string(),
            found,
        },
        None => ValidationError::PathTraversal {
            token: raw.to_string(),
        },
    };
    warn!(
        target: "nixling::security",
        code = error.code(),
        raw = %raw,
        "Request rejected before resolution"
    );
    error.into()
}

fn clarify(intent: &Intent) -> PipelineError {
    let choices = match intent.target() {
        Some(target) => vec![
            format!("install {}", target),
            format!("search {}", target),
            format!("remove {}", target),
        ],
        None => ["install <package>", "remove <package>", "search <term>", "update", "rollback"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    };
    PipelineError::ExtractionAmbiguous {
        question: format!(
            "I'm not sure what you want me to do with \"{}\".",
            intent.raw_text().trim()
        ),
        choices,
        confidence: intent.confidence(),
    }
}

/// Several different packages share the best score, and none of them
/// matched exactly
fn check_tie(intent: &Intent, candidates: &[CandidateOperation]) -> Result<(), PipelineError> {
    let Some(top) = candidates.first().map(|c| c.confidence) else {
        return Ok(());
    };
    if top >= 1.0 {
        return Ok(());
    }
    let tied: Vec<String> = candidates
        .iter()
        .filter(|c| (c.confidence - top).abs() < f32::EPSILON)
        .flat_map(|c| c.packages.iter().map(|p| p.name.clone()))
        .collect();
    if tied.len() < 2 {
        return Ok(());
    }
    Err(PipelineError::ExtractionAmbiguous {
        question: format!(
            "Several packages match \"{}\". Which one do you mean?",
            intent.target().unwrap_or_default()
        ),
        choices: tied,
        confidence: top,
    })
}

/// Fill in or check the rollback target against the generation listing
fn pick_generation(
    ctx: &PipelineContext,
    intent: Intent,
    method: InstallMethod,
) -> Result<Intent, PipelineError> {
    let listing = ctx.engine.generations(method, &CancelToken::new())?;
    let recent = || {
        listing
            .generations()
            .iter()
            .rev()
            .take(5)
            .map(|g| g.number.to_string())
            .collect::<Vec<_>>()
    };

    match intent.modifier(MOD_GENERATION) {
        Some(requested) => {
            let known = requested
                .parse::<u64>()
                .map(|n| listing.contains(n))
                .unwrap_or(false);
            if !known {
                return Err(PipelineError::NotFound {
                    target: format!("generation {}", requested),
                    suggestions: recent(),
                });
            }
            Ok(intent)
        }
        None => match listing.previous() {
            Some(previous) => {
                debug!(generation = previous.number, "Rolling back to previous generation");
                Ok(intent.with_modifier(MOD_GENERATION, &previous.number.to_string()))
            }
            None => Err(PipelineError::NotFound {
                target: "previous generation".to_string(),
                suggestions: recent(),
            }),
        },
    }
}
