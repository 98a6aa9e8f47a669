//! PandABox device: the blocks the rotation fly scan drives.
//!
//! Each block is a plain struct of channels, wired from a [`SignalFactory`]
//! with the IOC's PV naming (`<prefix>:<BLOCK>:<FIELD>`). The position-capture
//! table is queried through the [`PositionCapture`] capability.

use std::fmt;
use std::sync::Arc;

use super::capabilities::PositionCapture;
use super::signal::{SignalFactory, SignalRef};

fn pv(prefix: &str, block: &str, field: &str) -> String {
    format!("{}:{}:{}", prefix, block, field)
}

/// Clock generator.
pub struct ClockBlock {
    pub period_units: SignalRef,
    pub period: SignalRef,
}

impl ClockBlock {
    fn new(factory: &dyn SignalFactory, prefix: &str, block: &str) -> Self {
        Self {
            period_units: factory.signal(&pv(prefix, block, "PERIOD:UNITS")),
            period: factory.signal(&pv(prefix, block, "PERIOD")),
        }
    }
}

/// Up/down counter.
pub struct CounterBlock {
    pub start: SignalRef,
    pub min: SignalRef,
    pub step: SignalRef,
    pub max: SignalRef,
}

impl CounterBlock {
    fn new(factory: &dyn SignalFactory, prefix: &str, block: &str) -> Self {
        Self {
            start: factory.signal(&pv(prefix, block, "START")),
            min: factory.signal(&pv(prefix, block, "MIN")),
            step: factory.signal(&pv(prefix, block, "STEP")),
            max: factory.signal(&pv(prefix, block, "MAX")),
        }
    }
}

/// Position-compare pulse generator.
pub struct PulseCompareBlock {
    pub pre_start: SignalRef,
    pub start: SignalRef,
    pub width: SignalRef,
    pub step: SignalRef,
    pub pulses: SignalRef,
}

impl PulseCompareBlock {
    fn new(factory: &dyn SignalFactory, prefix: &str, block: &str) -> Self {
        Self {
            pre_start: factory.signal(&pv(prefix, block, "PRE_START")),
            start: factory.signal(&pv(prefix, block, "START")),
            width: factory.signal(&pv(prefix, block, "WIDTH")),
            step: factory.signal(&pv(prefix, block, "STEP")),
            pulses: factory.signal(&pv(prefix, block, "PULSES")),
        }
    }
}

/// Soft bits used as enables in the PandABox layout.
pub struct BitsBlock {
    pub a: SignalRef,
    pub b: SignalRef,
}

/// HDF5 data-capture subsystem.
pub struct DataCaptureBlock {
    pub hdf_directory: SignalRef,
    pub hdf_file_name: SignalRef,
    pub flush_period: SignalRef,
    pub capture_mode: SignalRef,
    pub num_capture: SignalRef,
    pub capture: SignalRef,
}

/// Position-capture arm/active control.
pub struct PcapBlock {
    pub arm: SignalRef,
    pub active: SignalRef,
}

/// A PandABox as used by the rotation scan.
pub struct PandaBox {
    name: String,
    pub clock1: ClockBlock,
    pub counter1: CounterBlock,
    pub counter3: CounterBlock,
    pub pcomp1: PulseCompareBlock,
    pub pcomp2: PulseCompareBlock,
    pub bits: BitsBlock,
    pub data: DataCaptureBlock,
    pub pcap: PcapBlock,
    capture_table: Arc<dyn PositionCapture>,
}

impl PandaBox {
    /// Wire every block from `factory` under `prefix`.
    pub fn new(
        name: &str,
        prefix: &str,
        factory: &dyn SignalFactory,
        capture_table: Arc<dyn PositionCapture>,
    ) -> Self {
        Self {
            name: name.to_string(),
            clock1: ClockBlock::new(factory, prefix, "CLOCK1"),
            counter1: CounterBlock::new(factory, prefix, "COUNTER1"),
            counter3: CounterBlock::new(factory, prefix, "COUNTER3"),
            pcomp1: PulseCompareBlock::new(factory, prefix, "PCOMP1"),
            pcomp2: PulseCompareBlock::new(factory, prefix, "PCOMP2"),
            bits: BitsBlock {
                a: factory.signal(&pv(prefix, "BITS", "A")),
                b: factory.signal(&pv(prefix, "BITS", "B")),
            },
            data: DataCaptureBlock {
                hdf_directory: factory.signal(&pv(prefix, "DATA", "HDF_DIRECTORY")),
                hdf_file_name: factory.signal(&pv(prefix, "DATA", "HDF_FILE_NAME")),
                flush_period: factory.signal(&pv(prefix, "DATA", "FLUSH_PERIOD")),
                capture_mode: factory.signal(&pv(prefix, "DATA", "CAPTURE_MODE")),
                num_capture: factory.signal(&pv(prefix, "DATA", "NUM_CAPTURE")),
                capture: factory.signal(&pv(prefix, "DATA", "CAPTURE")),
            },
            pcap: PcapBlock {
                arm: factory.signal(&pv(prefix, "PCAP", "ARM")),
                active: factory.signal(&pv(prefix, "PCAP", "ACTIVE")),
            },
            capture_table,
        }
    }

    /// Device name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position-capture table of this box
    pub fn capture_table(&self) -> &dyn PositionCapture {
        self.capture_table.as_ref()
    }
}

impl fmt::Debug for PandaBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PandaBox")
            .field("name", &self.name)
            .field("arm", &self.pcap.arm.name())
            .finish_non_exhaustive()
    }
}
