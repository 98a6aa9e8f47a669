//! Hardware Capabilities
//!
//! Fine-grained capability traits the beamline devices implement. Orchestration
//! code (a run engine, the CLI) works against these traits instead of concrete
//! device types:
//!
//! - The USB camera implements `Stageable + Triggerable`
//! - The PandABox position-capture subsystem implements `PositionCapture`
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Capability: Device Staging (Bluesky-style lifecycle)
///
/// # Contract
/// - `stage()` prepares the device for an acquisition sequence and remembers
///   whatever it needs to restore
/// - `unstage()` restores the device; unstaging an unstaged device is a no-op
/// - staging a staged device is an error
///
/// # Usage Pattern
/// ```rust,ignore
/// camera.stage().await?;
/// camera.trigger().await?;
/// camera.unstage().await?;
/// ```
#[async_trait]
pub trait Stageable: Send + Sync {
    /// Prepare device for acquisition sequence
    async fn stage(&self) -> Result<()>;

    /// Clean up after acquisition sequence
    async fn unstage(&self) -> Result<()>;

    /// Query staging state
    ///
    /// # Default Implementation
    /// Returns an error indicating state query is not supported.
    async fn is_staged(&self) -> Result<bool> {
        anyhow::bail!("Staged state query not supported by this device")
    }
}

/// Capability: Software Triggering
///
/// # Contract
/// - `trigger()` resolves once the acquisition it started has finished
/// - Calling `trigger()` on an unstaged device should return Err
#[async_trait]
pub trait Triggerable: Send + Sync {
    /// Acquire once and wait for the acquisition to finish
    async fn trigger(&self) -> Result<()>;
}

/// Capture mode of one position-capture channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureMode {
    /// Not captured
    No,
    Value,
    Diff,
    Sum,
    Mean,
    Min,
    Max,
    MinMax,
    MinMaxMean,
}

impl CaptureMode {
    /// Dataset-path suffix written by the data-capture subsystem
    pub fn label(self) -> &'static str {
        match self {
            CaptureMode::No => "No",
            CaptureMode::Value => "Value",
            CaptureMode::Diff => "Diff",
            CaptureMode::Sum => "Sum",
            CaptureMode::Mean => "Mean",
            CaptureMode::Min => "Min",
            CaptureMode::Max => "Max",
            CaptureMode::MinMax => "Min Max",
            CaptureMode::MinMaxMean => "Min Max Mean",
        }
    }

    /// True for every mode that produces a dataset
    pub fn is_captured(self) -> bool {
        self != CaptureMode::No
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Numeric encoding of a captured dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumericEncoding {
    Int32,
    Float32,
    Float64,
}

impl NumericEncoding {
    /// Little-endian numpy-style type string
    pub fn dtype_str(self) -> &'static str {
        match self {
            NumericEncoding::Int32 => "<i4",
            NumericEncoding::Float32 => "<f4",
            NumericEncoding::Float64 => "<f8",
        }
    }
}

/// One row of the position-capture table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureChannel {
    /// Block name, e.g. `COUNTER1`
    pub block: String,
    /// Field within the block, e.g. `OUT`
    pub field: String,
    /// Configured capture mode
    pub capture: CaptureMode,
    /// Encoding of the captured values
    pub encoding: NumericEncoding,
}

impl CaptureChannel {
    pub fn new(block: &str, field: &str, capture: CaptureMode, encoding: NumericEncoding) -> Self {
        Self {
            block: block.to_string(),
            field: field.to_string(),
            capture,
            encoding,
        }
    }
}

/// Capability: Position Capture Table
///
/// Devices that can report which of their channels are captured into the
/// data file, and how.
#[async_trait]
pub trait PositionCapture: Send + Sync {
    /// Current capture table, in device order
    async fn capture_channels(&self) -> Result<Vec<CaptureChannel>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedTable;

    #[async_trait]
    impl PositionCapture for FixedTable {
        async fn capture_channels(&self) -> Result<Vec<CaptureChannel>> {
            Ok(vec![CaptureChannel::new(
                "INENC1",
                "VAL",
                CaptureMode::MinMax,
                NumericEncoding::Int32,
            )])
        }
    }

    #[tokio::test]
    async fn test_position_capture_trait() {
        let table = FixedTable;
        let channels = table.capture_channels().await.unwrap();
        assert_eq!(channels.len(), 1);
        assert!(channels[0].capture.is_captured());
        assert_eq!(channels[0].capture.to_string(), "Min Max");
    }

    #[test]
    fn test_encoding_dtype_strings() {
        assert_eq!(NumericEncoding::Int32.dtype_str(), "<i4");
        assert_eq!(NumericEncoding::Float32.dtype_str(), "<f4");
        assert_eq!(NumericEncoding::Float64.dtype_str(), "<f8");
        assert!(!CaptureMode::No.is_captured());
    }

    struct NoStateQuery;

    #[async_trait]
    impl Stageable for NoStateQuery {
        async fn stage(&self) -> Result<()> {
            Ok(())
        }

        async fn unstage(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stageable_default_state_query() {
        let device = NoStateQuery;
        device.stage().await.unwrap();
        assert!(device.is_staged().await.is_err());
        device.unstage().await.unwrap();
    }
}
