//! Nixling Control - CLI front end for the nixling pipeline.
//!
//! Each invocation builds one pipeline context, handles one request and
//! flushes the cache on the way out.

mod cli;
mod commands;
mod errors;
mod logging;
mod output;

use anyhow::{bail, Result};
use clap::Parser;
use cli::{CacheCommands, Cli, Commands};
use nixling_common::{NixlingConfig, PipelineContext};
use std::path::Path;
use tracing::debug;

/// An explicit `--config` must exist; the default locations may not
fn load_config(path: Option<&Path>) -> Result<NixlingConfig> {
    match path {
        Some(path) if !path.exists() => bail!("config file {} does not exist", path.display()),
        Some(path) => Ok(NixlingConfig::load_from(path)),
        None => Ok(NixlingConfig::load()),
    }
}

/// Run `f` against a fresh context, flushing the cache afterwards
fn with_context(config: NixlingConfig, f: impl FnOnce(&PipelineContext) -> i32) -> i32 {
    let ctx = PipelineContext::from_config(config);
    let exit_code = f(&ctx);
    ctx.shutdown();
    exit_code
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    debug!(version = env!("CARGO_PKG_VERSION"), "nixlingctl starting");

    let json = cli.json;
    let exit_code = match cli.command {
        Commands::Ask {
            text,
            dry_run,
            timeout,
        } => with_context(config, |ctx| {
            commands::ask(ctx, &text.join(" "), dry_run, timeout, json)
        }),
        Commands::Plan { text } => with_context(config, |ctx| commands::plan(ctx, &text.join(" "), json)),
        Commands::Generations { method } => {
            with_context(config, |ctx| commands::generations(ctx, method.into(), json))
        }
        Commands::Cache { action } => with_context(config, |ctx| match action {
            CacheCommands::Stats => commands::cache_stats(ctx, json),
            CacheCommands::Clear => commands::cache_clear(ctx, json),
        }),
        Commands::Config => commands::config(&config, json),
    };

    std::process::exit(exit_code);
}
