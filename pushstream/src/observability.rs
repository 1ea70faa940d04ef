//! Tracing initialization

use tracing_subscriber::EnvFilter;

/// Initialize tracing with an env-filter taken from `RUST_LOG`, falling
/// back to the given default directive.
///
/// Call once at process startup; calling again is a no-op error from the
/// subscriber, which is ignored.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_reentrant() {
        init_tracing("info");
        init_tracing("debug");
    }
}
