use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Console logging to stderr. `RUST_LOG` wins over the verbosity flag.
pub fn setup_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    tracing::debug!(verbose, "logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_error_instead_of_panicking() {
        let _ = setup_logging(false);
        assert!(setup_logging(true).is_err());
    }
}
