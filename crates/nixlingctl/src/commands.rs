//! Subcommand implementations. Each returns the process exit code.

use crate::errors::{exit_code_for, EXIT_EXECUTION_FAILED, EXIT_SUCCESS};
use crate::output;
use nixling_common::{
    handle, plan as plan_request, CancelToken, HandleOptions, InstallMethod, NixlingConfig,
    PipelineContext,
};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// A token that Ctrl-C cancels. Each invocation runs one command, so the
/// handler is installed at most once.
fn interrupt_token() -> CancelToken {
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let installed = ctrlc::set_handler(move || {
        debug!("Interrupted, cancelling");
        trigger.cancel();
    });
    if let Err(e) = installed {
        warn!(error = %e, "Ctrl-C handler not installed, requests cannot be interrupted");
    }
    cancel
}

/// Handle one natural-language request
pub fn ask(
    ctx: &PipelineContext,
    text: &str,
    dry_run: bool,
    timeout_secs: Option<u64>,
    json: bool,
) -> i32 {
    // Nothing to pre-warm for a one-shot preview
    let prewarm = (!dry_run).then(|| ctx.spawn_prewarm()).flatten();

    let options = HandleOptions {
        dry_run,
        timeout: timeout_secs.map(Duration::from_secs),
        cancel: interrupt_token(),
    };
    let outcome = handle(ctx, text, &options);

    if let Some(worker) = prewarm {
        let _ = worker.join();
    }

    match outcome {
        Ok(result) => {
            if json {
                output::print_json(&output::result_json(&result));
            } else {
                output::display_result(&result);
            }
            match result.error() {
                Some(error) => exit_code_for(&error),
                None => EXIT_SUCCESS,
            }
        }
        Err(error) => {
            if json {
                output::print_json(&json!({ "error": output::error_json(&error) }));
            } else {
                output::display_pipeline_error(&error);
            }
            exit_code_for(&error)
        }
    }
}

/// Show the plan for a request without executing it
pub fn plan(ctx: &PipelineContext, text: &str, json: bool) -> i32 {
    match plan_request(ctx, text) {
        Ok(plan) => {
            if json {
                output::print_json(&plan);
            } else {
                output::display_plan(&plan);
            }
            EXIT_SUCCESS
        }
        Err(error) => {
            if json {
                output::print_json(&json!({ "error": output::error_json(&error) }));
            } else {
                output::display_pipeline_error(&error);
            }
            exit_code_for(&error)
        }
    }
}

pub fn generations(ctx: &PipelineContext, method: InstallMethod, json: bool) -> i32 {
    match ctx.engine().generations(method, &interrupt_token()) {
        Ok(listing) => {
            if json {
                output::print_json(&listing);
            } else {
                output::display_generations(&listing);
            }
            EXIT_SUCCESS
        }
        Err(error) => {
            if json {
                output::print_json(&json!({ "error": output::error_json(&error) }));
            } else {
                output::display_pipeline_error(&error);
            }
            EXIT_EXECUTION_FAILED
        }
    }
}

pub fn cache_stats(ctx: &PipelineContext, json: bool) -> i32 {
    let stats = ctx.cache().stats();
    if json {
        output::print_json(&json!({
            "stats": stats,
            "hit_rate": stats.hit_rate(),
            "disk_path": ctx.cache().disk_path(),
        }));
    } else {
        output::display_cache_stats(&stats);
    }
    EXIT_SUCCESS
}

pub fn cache_clear(ctx: &PipelineContext, json: bool) -> i32 {
    ctx.cache().clear();
    ctx.cache().flush();
    if json {
        output::print_json(&json!({ "cleared": true }));
    } else {
        output::display_success("Cache cleared");
    }
    EXIT_SUCCESS
}

pub fn config(config: &NixlingConfig, json: bool) -> i32 {
    if json {
        output::print_json(config);
    } else {
        print!("{}", config.to_toml());
    }
    EXIT_SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_sigint_cancels_token() {
        let cancel = interrupt_token();
        assert!(!cancel.is_cancelled());

        unsafe { libc::raise(libc::SIGINT) };
        for _ in 0..100 {
            if cancel.is_cancelled() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(cancel.is_cancelled());

        // a second handler is refused; the token is still usable
        assert!(!interrupt_token().is_cancelled());
    }
}
