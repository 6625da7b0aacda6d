//! Diagnostic tracing for `rff` and the eval harness.
//!
//! Tracing goes to stderr and is not part of any result. Run output lives in
//! the transcript (`rff solve --transcript`) and in eval result files, which
//! are written regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "RFF_LOG";

const DEFAULT_FILTER: &str = "warn";

/// Install the stderr subscriber.
///
/// The filter comes from `RFF_LOG`, then `RUST_LOG`, then `warn`.
///
/// ```bash
/// RFF_LOG=rff::controller=debug rff solve --task game24 --problem "4 6 1 1"
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // A second call (tests, eval workers sharing a process) is a no-op.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
