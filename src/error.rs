//! Custom error types for the beamline device layer.
//!
//! This module defines the primary error type, `DaqError`. Using the `thiserror`
//! crate, it provides a centralized and consistent way to describe the failures
//! the flyer and camera raise themselves.
//!
//! ## Error Hierarchy
//!
//! - **`Configuration`**, **`MissingArgument`**, **`NonIntegerStep`**: semantic
//!   configuration errors. They surface synchronously at the call that triggered
//!   them and are never retried.
//! - **`Figment`**: wraps errors from loading the TOML/env configuration.
//! - **`Io`**: wraps standard `std::io::Error`.
//! - **`InvalidState`**: a session method was called out of order.
//! - **`Cancelled`** / **`SubscriptionClosed`**: a completion wait ended without
//!   observing the done edge.
//! - **`SignalType`**: a hardware channel returned a value of the wrong kind.
//!
//! Hardware acknowledgment failures are *not* represented here: they are
//! propagated exactly as the channel implementation raised them.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration loading error: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Missing required argument '{0}'")]
    MissingArgument(&'static str),

    #[error("The step between projections is not integer: {proj_step} (n_proj={n_proj}, steps_per_turn={steps_per_turn})")]
    NonIntegerStep {
        proj_step: f64,
        n_proj: u32,
        steps_per_turn: u32,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid session state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Completion wait on '{0}' was cancelled")]
    Cancelled(String),

    #[error("Monitor subscription on '{0}' closed before completion")]
    SubscriptionClosed(String),

    #[error("Signal '{signal}' returned {found}, expected {expected}")]
    SignalType {
        signal: String,
        expected: &'static str,
        found: String,
    },
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Figment(Box::new(err))
    }
}

impl DaqError {
    /// True for errors that stem from bad scan or device configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DaqError::Figment(_)
                | DaqError::Configuration(_)
                | DaqError::MissingArgument(_)
                | DaqError::NonIntegerStep { .. }
        )
    }
}
