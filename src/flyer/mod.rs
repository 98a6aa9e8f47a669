//! Rotation fly scan with a PandABox.
//!
//! - [`geometry`]: angle/projection -> encoder-step computation
//! - [`fields`]: captured datasets discovered from the box
//! - [`panda_flyer`]: the flyer and its kickoff sequence
//! - [`session`]: one acquisition and its asset documents
//! - [`completion`]: waiting for the acquisition to end

pub mod completion;
pub mod fields;
pub mod geometry;
pub mod panda_flyer;
pub mod session;

pub use completion::CompletionHandle;
pub use fields::{FieldDescriptor, FieldTable};
pub use geometry::{PulseCompareConfig, ScanGeometry, ScanParameters};
pub use panda_flyer::{CollectDescription, PandaFlyer};
pub use session::{FlyerState, Session};
