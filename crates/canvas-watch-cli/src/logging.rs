//! tracing-subscriber setup driven by the `logging` config section.

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

use canvas_watch_core::config::LoggingConfig;

/// Base level from `--verbose`, then `RUST_LOG`, then `logging.level`, with
/// `logging.filters` appended as extra directives.
pub fn build_filter(logging: &LoggingConfig, verbose: bool) -> anyhow::Result<EnvFilter> {
    let mut filter = if verbose {
        EnvFilter::new("debug")
    } else {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::new(logging.level.as_deref().unwrap_or("info")),
        }
    };

    for directive in &logging.filters {
        let parsed: Directive = directive
            .parse()
            .with_context(|| format!("invalid logging filter: {directive}"))?;
        filter = filter.add_directive(parsed);
    }

    Ok(filter)
}

pub fn init(logging: &LoggingConfig, verbose: bool) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(build_filter(logging, verbose)?);
    let to_stdout = logging.output == "stdout";

    match (logging.format.as_str(), to_stdout) {
        ("json", true) => builder.json().with_writer(std::io::stdout).init(),
        ("json", false) => builder.json().with_writer(std::io::stderr).init(),
        (_, true) => builder.with_writer(std::io::stdout).init(),
        (_, false) => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}
