//! Tracing initialization helpers.
//!
//! The library only emits events; installing a subscriber is the host
//! application's job, and most embedders already have one. These
//! helpers cover the two cases where quarry itself wants a subscriber:
//! quick diagnostics in a small embedding binary, and the crate's own
//! integration test suite.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static INSTALLED: OnceLock<()> = OnceLock::new();

/// `RUST_LOG` wins; otherwise only quarry's own events at `level`.
fn quarry_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("quarry={level}")))
}

/// Install a compact stderr subscriber showing quarry events at info
/// level (`RUST_LOG` overrides the filter). Safe to call repeatedly;
/// only the first call installs anything, and an already-installed
/// global subscriber is left in place.
pub fn init() {
    INSTALLED.get_or_init(|| {
        if let Err(e) = tracing_subscriber::fmt()
            .with_env_filter(quarry_filter("info"))
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .compact()
            .try_init()
        {
            eprintln!("quarry: tracing subscriber not installed: {e}");
        }
    });
}

/// Subscriber for the test suite: quarry events at debug level, routed
/// through the capture-aware test writer so output stays attached to
/// the failing test. Installation races between test threads are
/// harmless; the loser keeps the winner's subscriber.
pub fn init_for_tests() {
    INSTALLED.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(quarry_filter("debug"))
            .with_test_writer()
            .compact()
            .try_init();
    });
}
