use std::env;
use std::io;

use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "STUNNEL_LOG";

/// Install the global subscriber. Logs go to stderr; stdout is reserved for
/// command output.
pub fn init(verbose: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_filter(verbose))
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}

fn build_filter(verbose: bool) -> EnvFilter {
    match env::var(LOG_ENV) {
        Ok(value) => EnvFilter::new(value),
        Err(_) => {
            if verbose {
                EnvFilter::new("debug")
            } else {
                EnvFilter::new("info")
            }
        }
    }
}
