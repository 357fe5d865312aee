// ABOUTME: Shared logging setup for the broker, providers, and the CLI
// ABOUTME: Two functions: init() for stderr, init_for() for provider processes

use tracing_subscriber::EnvFilter;

/// Standard logging to stderr. Default: INFO level, RUST_LOG override.
/// Used by the broker daemon and the CLI.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

/// Crate-filtered logging to stderr. Default: INFO for named crate, WARN for everything else.
/// Used by provider binaries so broker plumbing stays quiet.
pub fn init_for(crate_name: &str) {
    let filter = filter_for(crate_name);
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn filter_for(crate_name: &str) -> EnvFilter {
    let directive = format!("{}=info", crate_name.replace('-', "_"));
    EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into())
        .add_directive(
            directive
                .parse()
                .unwrap_or_else(|_| tracing::Level::INFO.into()),
        )
}
