//! # Beamline DAQ Device Layer
//!
//! Device-level building blocks for a rotation tomography beamline: a
//! PandABox-driven fly scan and a USB area-detector camera. Both publish the
//! data they cause to be written as asset documents, so a run engine can
//! reference the files without reading them.
//!
//! ## Crate Structure
//!
//! - **`camera`**: `UvcCamera`, stage/trigger/unstage of the TIFF-writing USB camera.
//! - **`config`**: Figment-based configuration (`config/beamline.toml` + environment).
//! - **`documents`**: Resource/datum and stream resource/stream datum documents.
//! - **`error`**: The `DaqError` enum for configuration and session errors.
//! - **`flyer`**: `PandaFlyer` and its `Session`, geometry computation and field discovery.
//! - **`hardware`**: Channel abstraction (`Signal`), capability traits, device channel
//!   maps, subscription status and the simulated `MockBus` backend.
//! - **`logging`**: `tracing-subscriber` initialisation.

pub mod camera;
pub mod config;
pub mod documents;
pub mod error;
pub mod flyer;
pub mod hardware;
pub mod logging;

pub use camera::UvcCamera;
pub use config::BeamlineConfig;
pub use error::{AppResult, DaqError};
pub use flyer::{PandaFlyer, Session};
