use tracing::debug;
use tracing_subscriber::filter::EnvFilter;

/// Install the process-wide `tracing` subscriber with the given `EnvFilter` directive (e.g. `info`
/// or `em_engine=debug,warn`).  Calling this more than once is harmless; later calls are ignored.
pub fn setup(env_filter: &str) {
    let res = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(false)
        .compact()
        .try_init();

    if res.is_err() {
        debug!("logging already initialized");
    }
}
