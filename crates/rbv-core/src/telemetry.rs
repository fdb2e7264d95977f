//! Tracing setup for the `rbv` binary.
//!
//! stdout carries nothing but the verification report, so two runs over the
//! same inputs print byte-identical output that can be diffed or redirected
//! into a file. Every log line, text or JSON, goes to stderr.

use std::io;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Install the global subscriber. `RUST_LOG` overrides `level`.
///
/// Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let stderr_lines = fmt::layer().with_target(false).with_writer(io::stderr);
    let output = if json {
        stderr_lines.json().boxed()
    } else {
        stderr_lines.boxed()
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .try_init();
}
