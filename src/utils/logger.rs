//! Process-wide log output.

/// Install the fmt subscriber. `RUST_LOG` overrides the default filter.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stereo_plane=info,vulkano=warn".into()),
        )
        .with_thread_names(true)
        .init();
}
