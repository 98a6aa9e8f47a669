//! Hardware channel abstraction.
//!
//! A [`Signal`] is one process variable on an IOC: it can be written (the
//! write resolves once the IOC acknowledges it), read, read as an enum label,
//! and monitored. Device structs ([`PandaBox`](super::panda::PandaBox),
//! [`AreaDetectorCam`](super::area_detector::AreaDetectorCam)) are plain
//! collections of `Arc<dyn Signal>` built from a [`SignalFactory`], so the same
//! device code runs against the EPICS backend or the simulated
//! [`MockBus`](super::mock::MockBus).
//!
//! # Contract
//! - `set` returns only after the write is acknowledged; an `Err` means the
//!   write was not acknowledged and callers propagate it unchanged
//! - `subscribe` only delivers updates that happen after the call
//! - every update carries the previous value so edge predicates do not depend
//!   on when the subscription was made

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::DaqError;

/// Value carried by a hardware channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    /// Integer or enum index
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value or enum label
    Str(String),
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Int(i) => write!(f, "{}", i),
            SignalValue::Float(v) => write!(f, "{}", v),
            SignalValue::Str(s) => write!(f, "{}", s),
        }
    }
}

impl SignalValue {
    /// Extract value as i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SignalValue::Int(i) => Some(*i),
            SignalValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            SignalValue::Float(_) => None,
            SignalValue::Str(s) => s.trim().parse().ok(),
        }
    }

    /// Extract value as f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SignalValue::Int(i) => Some(*i as f64),
            SignalValue::Float(v) => Some(*v),
            SignalValue::Str(s) => s.trim().parse().ok(),
        }
    }

    /// Borrow the string payload, if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SignalValue::Str(s) => Some(s),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            SignalValue::Int(_) => "int",
            SignalValue::Float(_) => "float",
            SignalValue::Str(_) => "string",
        }
    }
}

impl From<i64> for SignalValue {
    fn from(value: i64) -> Self {
        SignalValue::Int(value)
    }
}

impl From<i32> for SignalValue {
    fn from(value: i32) -> Self {
        SignalValue::Int(i64::from(value))
    }
}

impl From<u32> for SignalValue {
    fn from(value: u32) -> Self {
        SignalValue::Int(i64::from(value))
    }
}

impl From<f64> for SignalValue {
    fn from(value: f64) -> Self {
        SignalValue::Float(value)
    }
}

impl From<&str> for SignalValue {
    fn from(value: &str) -> Self {
        SignalValue::Str(value.to_string())
    }
}

impl From<String> for SignalValue {
    fn from(value: String) -> Self {
        SignalValue::Str(value)
    }
}

/// One monitor update.
#[derive(Clone, Debug, PartialEq)]
pub struct SignalUpdate {
    /// New value
    pub value: SignalValue,
    /// Value before this update (None for the first update ever seen)
    pub old_value: Option<SignalValue>,
    /// Update time, seconds since the Unix epoch
    pub timestamp: f64,
}

/// A single hardware channel (one PV).
#[async_trait]
pub trait Signal: Send + Sync {
    /// PV name
    fn name(&self) -> &str;

    /// Write a value and wait until the IOC acknowledges it.
    async fn set(&self, value: SignalValue) -> Result<()>;

    /// Read the current value.
    async fn get(&self) -> Result<SignalValue>;

    /// Read the current value as a string (enum label for enum channels).
    async fn get_string(&self) -> Result<String> {
        Ok(self.get().await?.to_string())
    }

    /// Subscribe to value updates.
    fn subscribe(&self) -> broadcast::Receiver<SignalUpdate>;
}

/// Shared handle to a hardware channel.
pub type SignalRef = Arc<dyn Signal>;

impl dyn Signal {
    /// Write any convertible value, logging the register write.
    pub async fn put(&self, value: impl Into<SignalValue> + Send) -> Result<()> {
        let value = value.into();
        debug!(pv = self.name(), %value, "write");
        self.set(value).await
    }

    /// Read the current value as an integer.
    pub async fn get_i64(&self) -> Result<i64> {
        let value = self.get().await?;
        value.as_i64().ok_or_else(|| {
            DaqError::SignalType {
                signal: self.name().to_string(),
                expected: "int",
                found: value.kind().to_string(),
            }
            .into()
        })
    }

    /// Read the current value as a float.
    pub async fn get_f64(&self) -> Result<f64> {
        let value = self.get().await?;
        value.as_f64().ok_or_else(|| {
            DaqError::SignalType {
                signal: self.name().to_string(),
                expected: "float",
                found: value.kind().to_string(),
            }
            .into()
        })
    }
}

/// Builds channels for PV names.
///
/// Implemented by the hardware backend; devices call it once per PV at
/// construction time.
pub trait SignalFactory: Send + Sync {
    /// Channel for the given PV name.
    fn signal(&self, pv: &str) -> SignalRef;
}
