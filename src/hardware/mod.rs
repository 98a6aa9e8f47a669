//! Hardware layer
//!
//! Channel abstraction, capability traits, device channel maps and the
//! simulated backend.

pub mod area_detector;
pub mod capabilities;
pub mod mock;
pub mod panda;
pub mod signal;
pub mod status;

pub use signal::{Signal, SignalFactory, SignalRef, SignalUpdate, SignalValue};
pub use status::SubscriptionStatus;
