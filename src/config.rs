//! Configuration System using Figment
//!
//! Strongly-typed configuration for the beamline device layer. Configuration is
//! layered from:
//! 1. Built-in defaults (the values the beamline runs with)
//! 2. `config/beamline.toml` (or any file passed to [`BeamlineConfig::load_from`])
//! 3. Environment variables prefixed with `BEAMLINE_DAQ_`, nested keys separated
//!    by a double underscore (`BEAMLINE_DAQ_FLYER__N_PROJ=161`)
//!
//! # Example
//! ```no_run
//! use beamline_daq::config::BeamlineConfig;
//!
//! let config = BeamlineConfig::load()?;
//! config.validate()?;
//! println!("Flyer writes to {:?}", config.flyer.root_dir);
//! # Ok::<(), beamline_daq::error::DaqError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppResult, DaqError};
use crate::flyer::geometry::ScanParameters;
use crate::logging::parse_log_level;

/// Default configuration file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/beamline.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "BEAMLINE_DAQ_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeamlineConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// PandABox device naming
    #[serde(default)]
    pub panda: PandaConfig,
    /// Rotation fly-scan parameters
    #[serde(default)]
    pub flyer: FlyerConfig,
    /// USB camera settings
    #[serde(default)]
    pub camera: CameraConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "beamline-daq".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// PandABox device naming
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PandaConfig {
    /// Device name used as the `source` of described data keys
    pub name: String,
    /// PV prefix of the PandABox IOC
    pub prefix: String,
}

impl Default for PandaConfig {
    fn default() -> Self {
        Self {
            name: "pnd".to_string(),
            prefix: "XF:31ID1-ES{PANDA:1}".to_string(),
        }
    }
}

/// Rotation fly-scan configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlyerConfig {
    /// Directory the PandABox writes its HDF5 file into (required)
    pub root_dir: Option<PathBuf>,
    /// Encoder steps per full turn of the rotation stage
    #[serde(default = "default_steps_per_turn")]
    pub steps_per_turn: u32,
    /// Starting angle in degrees
    #[serde(default = "default_theta0")]
    pub theta0: f64,
    /// Number of projections per half turn
    #[serde(default = "default_n_proj")]
    pub n_proj: u32,
    /// Number of repeated series (0 = capture forever)
    #[serde(default = "default_n_series")]
    pub n_series: u32,
    /// Clock period in seconds
    #[serde(default = "default_t_period")]
    pub t_period: f64,
    /// Offset subtracted from the start angle; also the start of the projection pulse train
    #[serde(default = "default_theta0_offset")]
    pub theta0_offset: i64,
    /// Delay applied after arming, before kickoff returns
    #[serde(default = "default_settle_delay", with = "humantime_serde")]
    pub settle_delay: Duration,
    /// HDF5 flush period of the data-capture subsystem, in seconds
    #[serde(default = "default_flush_period")]
    pub flush_period: f64,
}

impl Default for FlyerConfig {
    fn default() -> Self {
        Self {
            root_dir: None,
            steps_per_turn: default_steps_per_turn(),
            theta0: default_theta0(),
            n_proj: default_n_proj(),
            n_series: default_n_series(),
            t_period: default_t_period(),
            theta0_offset: default_theta0_offset(),
            settle_delay: default_settle_delay(),
            flush_period: default_flush_period(),
        }
    }
}

impl FlyerConfig {
    /// Scan parameters fed to the geometry computation.
    pub fn scan_parameters(&self) -> ScanParameters {
        ScanParameters {
            steps_per_turn: self.steps_per_turn,
            theta0: self.theta0,
            n_proj: self.n_proj,
            n_series: self.n_series,
            theta0_offset: self.theta0_offset,
            t_period: self.t_period,
        }
    }
}

/// USB camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Device name, also the data key of the TIFF stream
    pub name: String,
    /// PV prefix of the area-detector IOC
    pub prefix: String,
    /// Root of the asset tree (required)
    pub root_dir: Option<PathBuf>,
    /// Directory the TIFF plugin writes into
    pub write_path_template: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            name: "uvc-cam1".to_string(),
            prefix: "XF:31ID1-ES{UVC-Cam:1}".to_string(),
            root_dir: None,
            write_path_template: "/nsls2/data/tst/legacy/mock-proposals/pass-000000/uvc-cam1"
                .to_string(),
        }
    }
}

fn default_steps_per_turn() -> u32 {
    18000
}

fn default_theta0() -> f64 {
    30.0
}

fn default_n_proj() -> u32 {
    181
}

fn default_n_series() -> u32 {
    3
}

fn default_t_period() -> f64 {
    0.00002
}

fn default_theta0_offset() -> i64 {
    1000
}

fn default_settle_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_flush_period() -> f64 {
    0.5
}

impl BeamlineConfig {
    /// Load configuration from `config/beamline.toml` and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(BeamlineConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Render the default configuration as TOML
    pub fn default_toml() -> AppResult<String> {
        toml::to_string_pretty(&BeamlineConfig::default())
            .map_err(|e| DaqError::Configuration(format!("Failed to render defaults: {}", e)))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        parse_log_level(&self.application.log_level).map_err(DaqError::Configuration)?;

        if self.flyer.root_dir.is_none() {
            return Err(DaqError::MissingArgument("root_dir"));
        }
        if self.camera.root_dir.is_none() {
            return Err(DaqError::MissingArgument("root_dir"));
        }

        if self.flyer.n_proj < 2 {
            return Err(DaqError::Configuration(format!(
                "n_proj must be at least 2, got {}",
                self.flyer.n_proj
            )));
        }
        if self.flyer.steps_per_turn == 0 {
            return Err(DaqError::Configuration(
                "steps_per_turn must be positive".to_string(),
            ));
        }
        if self.flyer.t_period.is_nan() || self.flyer.t_period <= 0.0 {
            return Err(DaqError::Configuration(format!(
                "t_period must be positive, got {}",
                self.flyer.t_period
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> BeamlineConfig {
        let mut config = BeamlineConfig::default();
        config.flyer.root_dir = Some(PathBuf::from("/tmp/proposal"));
        config.camera.root_dir = Some(PathBuf::from("/tmp/proposal"));
        config
    }

    #[test]
    fn test_defaults_match_beamline() {
        let config = BeamlineConfig::default();
        assert_eq!(config.flyer.steps_per_turn, 18000);
        assert_eq!(config.flyer.n_proj, 181);
        assert_eq!(config.flyer.n_series, 3);
        assert_eq!(config.flyer.theta0_offset, 1000);
        assert_eq!(config.flyer.settle_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_config_validation() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_missing_root_dir() {
        let mut config = valid_config();
        config.flyer.root_dir = None;
        assert!(matches!(
            config.validate(),
            Err(DaqError::MissingArgument("root_dir"))
        ));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = valid_config();
        config.application.log_level = "invalid".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, DaqError::Configuration(_)));
        assert!(err.to_string().contains("'invalid'"));

        // Same rules as the subscriber setup
        config.application.log_level = "WARN".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_too_few_projections() {
        let mut config = valid_config();
        config.flyer.n_proj = 1;
        assert!(matches!(
            config.validate(),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    #[serial_test::serial]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[flyer]
root_dir = "/data/proposal"
n_proj = 161
steps_per_turn = 8000
settle_delay = "250ms"

[camera]
root_dir = "/data/proposal"
"#
        )
        .unwrap();

        let config = BeamlineConfig::load_from(file.path()).unwrap();
        assert_eq!(config.flyer.n_proj, 161);
        assert_eq!(config.flyer.steps_per_turn, 8000);
        assert_eq!(config.flyer.settle_delay, Duration::from_millis(250));
        // Untouched keys keep their defaults
        assert_eq!(config.flyer.n_series, 3);
        assert_eq!(config.camera.name, "uvc-cam1");
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial_test::serial]
    fn test_env_override() {
        std::env::set_var("BEAMLINE_DAQ_FLYER__N_SERIES", "0");
        let config = BeamlineConfig::load_from("does/not/exist.toml");
        std::env::remove_var("BEAMLINE_DAQ_FLYER__N_SERIES");

        assert_eq!(config.unwrap().flyer.n_series, 0);
    }

    #[test]
    fn test_default_toml_round_trips() {
        let rendered = BeamlineConfig::default_toml().unwrap();
        assert!(rendered.contains("[flyer]"));
        assert!(rendered.contains("steps_per_turn = 18000"));
    }
}
