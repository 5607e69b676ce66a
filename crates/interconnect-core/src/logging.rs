//! Tracing subscriber setup shared by the binary and integration tests.
//!
//! Both formats write to stderr so stdout stays free for command output.

use tracing_subscriber::EnvFilter;

fn filter_for(level: &str) -> EnvFilter {
    // RUST_LOG wins over the configured level
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install a compact human-readable subscriber.
///
/// Only the first installed subscriber sticks; later calls do nothing.
pub fn init_subscriber(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_for(level))
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .try_init();
}

/// Install a subscriber emitting one JSON object per event, with span fields
/// (request ids, method names) flattened into the line.
pub fn init_json_subscriber(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_for(level))
        .with_writer(std::io::stderr)
        .json()
        .with_current_span(true)
        .flatten_event(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_subscriber("warn");
        init_subscriber("debug");
        init_json_subscriber("info");
    }

    #[test]
    fn falls_back_to_given_level() {
        let filter = filter_for("interconnect=trace");
        if std::env::var_os("RUST_LOG").is_none() {
            assert_eq!(filter.to_string(), "interconnect=trace");
        }
    }
}
