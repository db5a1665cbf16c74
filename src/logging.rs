use tracing_subscriber::EnvFilter;

/// `RUST_LOG` if set, otherwise a filter derived from the `-v` count.
pub fn env_filter(verbosity: u8) -> EnvFilter {
    if std::env::var_os("RUST_LOG").is_some() {
        return EnvFilter::from_default_env();
    }
    EnvFilter::new(match verbosity {
        0 => "gsh=warn",
        1 => "gsh=info",
        2 => "gsh=debug",
        _ => "gsh=trace",
    })
}

/// Diagnostics go to stderr so they never mix with command output on stdout.
pub fn init(verbosity: u8) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbosity))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
