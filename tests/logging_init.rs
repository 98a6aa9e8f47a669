//! Global subscriber installation; kept in its own test binary because only one
//! global subscriber can exist per process.

use beamline_daq::config::BeamlineConfig;
use beamline_daq::logging::{self, OutputFormat, TracingConfig};
use tracing::Level;

#[test]
fn test_init_is_idempotent() {
    let config = TracingConfig::new(Level::INFO).with_format(OutputFormat::Json);
    assert!(logging::init(config).is_ok());
    assert!(logging::init(TracingConfig::new(Level::DEBUG)).is_ok());

    let mut config = BeamlineConfig::default();
    config.application.log_level = "warn".to_string();
    assert!(logging::init_from_config(&config).is_ok());
}

#[test]
fn test_init_rejects_bad_level() {
    let mut config = BeamlineConfig::default();
    config.application.log_level = "loud".to_string();
    assert!(logging::init_from_config(&config).is_err());
}
