/// Installs the stderr subscriber. `RUST_LOG` selects what is shown, for
/// example `RUST_LOG=drivesync=debug` to see per-node decisions; the default
/// is `info`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
