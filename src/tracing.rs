//! Tracing initialization.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

static INIT: Once = Once::new();

/// Environment variable selecting `json` output instead of the compact format.
pub const LOG_FORMAT_ENV: &str = "DISCOVERY_LOG_FORMAT";

/// Initialize tracing. Safe to call multiple times.
///
/// Verbosity follows `RUST_LOG`; test runners default to debug output captured
/// per test.
pub fn init() {
    INIT.call_once(|| {
        let is_test =
            std::env::var("NEXTEST").is_ok() || std::env::var("CARGO_TARGET_TMPDIR").is_ok();
        let filter = EnvFilter::from_default_env().add_directive(
            if is_test {
                tracing::Level::DEBUG
            } else {
                tracing::Level::INFO
            }
            .into(),
        );
        let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_target(true)
            .with_span_events(FmtSpan::NONE);

        let result = match (json, is_test) {
            (true, _) => builder.json().with_writer(std::io::stderr).try_init(),
            (false, true) => builder.compact().with_test_writer().try_init(),
            (false, false) => builder.compact().with_writer(std::io::stderr).try_init(),
        };
        if let Err(e) = result {
            eprintln!("Failed to initialize tracing: {}", e);
        }
    });
}
