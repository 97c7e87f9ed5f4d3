//! anvil - an autonomous code-modification orchestrator.
//!
//! A task flows through a fixed sequence of role-specialized model calls
//! (plan, review, test generation, coding, refactoring, audit) with bounded
//! retries, external verification of every generated solution, and a git
//! branch sandbox around the whole run.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

pub mod bench;
pub mod cartographer;
pub mod client;
pub mod config;
pub mod context;
pub mod errors;
pub mod experience;
pub mod persona;
pub mod router;
pub mod sandbox;
pub mod util;
pub mod validate;
pub mod verify;
pub mod workflow;

/// Install the global tracing subscriber. `RUST_LOG` controls filtering;
/// `verbose` lowers the default to debug, `json` switches to line-JSON
/// output for machine consumption.
pub fn init_tracing(verbose: bool, json: bool) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let result = if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    };
    result
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("Failed to initialize tracing subscriber")
}
