//! Output formatting - plain ASCII terminal output, or JSON with `--json`

use nixling_common::generations::GenerationListing;
use nixling_common::{CacheStats, ExecutionResult, ExecutionStatus, PipelineError, Plan};
use owo_colors::OwoColorize;
use serde::Serialize;
use serde_json::json;

/// Print any serializable value as pretty JSON on stdout
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => display_error(&format!("could not encode output: {}", e)),
    }
}

pub fn display_result(result: &ExecutionResult) {
    let tag = match result.status {
        ExecutionStatus::Success if result.from_cache => "[CACHED]".cyan().to_string(),
        ExecutionStatus::Success => "[OK]".bright_green().to_string(),
        ExecutionStatus::DryRunOnly => "[DRY RUN]".yellow().to_string(),
        ExecutionStatus::TimedOut => "[TIMEOUT]".bright_red().to_string(),
        ExecutionStatus::Failure => "[FAILED]".bright_red().to_string(),
    };
    println!("{} {}", tag, result.command.dimmed());

    if result.status != ExecutionStatus::DryRunOnly && !result.stdout.trim().is_empty() {
        println!();
        println!("{}", result.stdout.trim_end());
    }
    if !result.stderr.trim().is_empty() {
        println!();
        eprintln!("{}", result.stderr.trim_end().red());
    }
    if let Some(snapshot) = &result.snapshot_id {
        println!();
        println!(
            "  Snapshot:  generation {} {}",
            snapshot,
            "(nixlingctl ask rollback to generation N)".dimmed()
        );
    }
    if result.duration_ms > 0 {
        println!("  Duration:  {}ms", result.duration_ms);
    }

    if let Some(error) = result.error() {
        if let Some(hint) = error.hint() {
            println!();
            println!("[NOTE] {}", hint.yellow());
        }
    }
}

/// Machine-readable result: the result itself plus the error, if any
pub fn result_json(result: &ExecutionResult) -> serde_json::Value {
    match result.error() {
        Some(error) => json!({ "result": result, "error": error_json(&error) }),
        None => json!({ "result": result }),
    }
}

pub fn error_json(error: &PipelineError) -> serde_json::Value {
    let mut value = json!({
        "code": error.code(),
        "message": error.to_string(),
        "retryable": error.is_retryable(),
        "hint": error.hint(),
    });
    match error {
        PipelineError::ExtractionAmbiguous { choices, confidence, .. } => {
            value["choices"] = json!(choices);
            value["confidence"] = json!(confidence);
        }
        PipelineError::NotFound { suggestions, .. } => {
            value["suggestions"] = json!(suggestions);
        }
        PipelineError::Validation(reason) => {
            value["validation"] = json!(reason);
        }
        _ => {}
    }
    value
}

/// Display a pipeline error
pub fn display_pipeline_error(error: &PipelineError) {
    match error {
        PipelineError::ExtractionAmbiguous { question, choices, .. } => {
            eprintln!();
            eprintln!("[?] {}", question.yellow());
            if !choices.is_empty() {
                eprintln!();
                for (i, choice) in choices.iter().enumerate() {
                    eprintln!("  {}. {}", i + 1, choice);
                }
            }
            eprintln!();
        }
        PipelineError::NotFound { suggestions, .. } => {
            display_error(&error.to_string());
            if !suggestions.is_empty() {
                eprintln!("Did you mean:");
                for suggestion in suggestions {
                    eprintln!("  * {}", suggestion.cyan());
                }
                eprintln!();
            }
        }
        PipelineError::Validation(_) => {
            eprintln!();
            eprintln!("[REFUSED] {}", error.to_string().red());
            eprintln!();
        }
        _ => {
            display_error(&error.to_string());
            if let Some(hint) = error.hint() {
                eprintln!("[NOTE] {}", hint.yellow());
                eprintln!();
            }
        }
    }
}

pub fn display_plan(plan: &Plan) {
    let intent = &plan.intent;
    let command = plan.execution.command();

    println!();
    println!("  Intent:      {} ({:.2})", intent.kind(), intent.confidence());
    if let Some(target) = intent.target() {
        println!("  Target:      {}", target);
    }
    for (key, value) in intent.modifiers() {
        println!("  Modifier:    {}={}", key, value);
    }
    println!("  Method:      {}", command.method());
    println!("  Command:     {}", command.dry_run_preview().bold());
    if command.requires_elevation() {
        println!("  Elevation:   {}", "required".yellow());
    }

    if !plan.candidates.is_empty() {
        println!();
        println!("  Candidates:");
        for candidate in &plan.candidates {
            println!("    {:.2}  {}", candidate.confidence, candidate.explanation);
        }
    }
    println!();
}

pub fn display_generations(listing: &GenerationListing) {
    if listing.is_empty() {
        println!("No generations found.");
        return;
    }
    for generation in listing.generations().iter().rev() {
        let created = generation
            .created
            .map(|c| c.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        let line = format!("  {:>6}  {}", generation.number, created);
        if generation.current {
            println!("{}  {}", line.bright_green(), "(current)".bright_green());
        } else {
            println!("{}", line);
        }
    }
}

pub fn display_cache_stats(stats: &CacheStats) {
    let hit_rate = (stats.hit_rate() * 100.0) as u32;
    let hit_rate_str = if hit_rate >= 50 {
        format!("{}%", hit_rate).green().to_string()
    } else if hit_rate > 0 {
        format!("{}%", hit_rate).yellow().to_string()
    } else {
        format!("{}%", hit_rate).dimmed().to_string()
    };

    println!();
    println!("  Cache hit:    {} ({} hits, {} misses)", hit_rate_str, stats.hits, stats.misses);
    println!("  Memory:       {}/{} entries, {} hits", stats.size, stats.capacity, stats.memory_hits);
    match stats.disk_entries {
        Some(entries) => println!("  Disk:         {} entries, {} hits", entries, stats.disk_hits),
        None => println!("  Disk:         {}", "disabled".dimmed()),
    }
    println!("  Evictions:    {}", stats.evictions);
    println!("  Invalidated:  {}", stats.invalidations);
    println!();
}

/// Display an error
pub fn display_error(message: &str) {
    eprintln!();
    eprintln!("[ERROR] {}", message.red());
    eprintln!();
}

/// Display a success message
pub fn display_success(message: &str) {
    println!("[OK] {}", message.bright_green());
}
