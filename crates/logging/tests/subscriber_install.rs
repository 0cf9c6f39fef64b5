//! The global subscriber can only be installed once per process.

use logging::{LogConfig, Verbosity, init_tracing};

#[test]
fn second_install_is_a_no_op() {
    let config = LogConfig::new(Verbosity::from_flags(1, false));
    assert!(init_tracing(&config));
    assert!(!init_tracing(&config));
    tracing::info!(target: logging::targets::REACTOR, "still usable after reinstall");
}
