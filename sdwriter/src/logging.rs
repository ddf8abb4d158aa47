//! Diagnostic logging for sdwriter.
//!
//! User-facing output (the menu, progress, speed) is printed directly; this
//! only configures the `tracing` records emitted by `sdwriter-core`, which
//! go to stderr.

use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Maps the number of `-D` flags to a log level.
fn level_for(debug: u8) -> Level {
    match debug {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Installs the global subscriber. `RUST_LOG` overrides the `-D` level.
pub fn init(debug: u8) {
    let level = level_for(debug).as_str().to_lowercase();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("sdwriter={level},sdwriter_core={level}"))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .without_time()
                .with_target(false),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flags_raise_verbosity() {
        assert_eq!(level_for(0), Level::WARN);
        assert_eq!(level_for(1), Level::DEBUG);
        assert_eq!(level_for(2), Level::TRACE);
        assert_eq!(level_for(5), Level::TRACE);
    }
}
