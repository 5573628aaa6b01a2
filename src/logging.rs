//! Tracing subscriber setup for the `review` binary.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "task_review=info,task_review_core=info";
const VERBOSE_LOG_FILTER: &str = "task_review=debug,task_review_core=debug";

/// Install a stderr `fmt` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `--verbose` selects debug output.
pub fn init_logging(verbose: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            VERBOSE_LOG_FILTER
        } else {
            DEFAULT_LOG_FILTER
        })
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("failed to initialize logging: {}", e))
}
