use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_PATH: &str = "/tmp/fencecast-debug.log";
const LOG_PATH_ENV: &str = "FENCECAST_LOG_PATH";
const LOG_FILTER_ENV: &str = "FENCECAST_LOG";
const DEFAULT_LOG_FILTER: &str = "fencecast=info";

/// Install the global tracing subscriber. Calling it again is a no-op.
///
/// Logs go to `FENCECAST_LOG_PATH` when set. With an interactive stderr they
/// go to a file under /tmp instead, so replay output on the terminal stays
/// readable.
pub fn init() -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let installed = match resolve_log_path() {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open log file '{path}'"))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    };

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}

fn resolve_log_path() -> Option<String> {
    std::env::var(LOG_PATH_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            if std::io::stderr().is_terminal() {
                Some(DEFAULT_LOG_PATH.to_string())
            } else {
                None
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_log_path_uses_env_override() {
        let _env_lock = crate::test_support::ENV_LOCK.blocking_lock();
        std::env::set_var(LOG_PATH_ENV, "  /tmp/fencecast-test.log ");
        assert_eq!(resolve_log_path().as_deref(), Some("/tmp/fencecast-test.log"));
        std::env::remove_var(LOG_PATH_ENV);
    }

    #[test]
    fn test_resolve_log_path_ignores_blank_override() {
        let _env_lock = crate::test_support::ENV_LOCK.blocking_lock();
        std::env::set_var(LOG_PATH_ENV, "   ");
        let resolved = resolve_log_path();
        if std::io::stderr().is_terminal() {
            assert_eq!(resolved.as_deref(), Some(DEFAULT_LOG_PATH));
        } else {
            assert_eq!(resolved, None);
        }
        std::env::remove_var(LOG_PATH_ENV);
    }
}
