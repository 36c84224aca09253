//! Diagnostic logging for the runner.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: runner diagnostics, output to stderr.
//!   Level comes from `RUST_LOG`, else `--debug`.
//!
//! - **Console output (`looping`, `summary`)**: failure panels and the exit
//!   code summary, written to the caller's writer. Unaffected by log levels.

use tracing::Dispatch;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

/// Build the dispatcher used for one runner invocation.
///
/// Nothing is installed globally; callers scope it with
/// [`tracing::dispatcher::with_default`].
///
/// # Example
/// ```bash
/// RUST_LOG=runner=trace runner --count 3 'make test'
/// ```
pub fn dispatch(debug: bool) -> Dispatch {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact());
    Dispatch::new(subscriber)
}
