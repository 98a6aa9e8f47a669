//! Field descriptors: which PandABox datasets a fly scan produces.

use anyhow::Result;
use tracing::debug;

use crate::hardware::capabilities::{CaptureChannel, NumericEncoding, PositionCapture};

/// One dataset written by the data-capture subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Logical field name, e.g. `counter1_out_value`
    pub name: String,
    /// Dataset path inside the HDF5 file, e.g. `COUNTER1.OUT.Value`
    pub dataset: String,
    pub encoding: NumericEncoding,
}

impl FieldDescriptor {
    /// Descriptor whose logical name is derived from the dataset path
    pub fn from_dataset(dataset: &str, encoding: NumericEncoding) -> Self {
        Self {
            name: safe_field_name(dataset),
            dataset: dataset.to_string(),
            encoding,
        }
    }
}

/// Lower-case `path` and replace separators (`.`, `:`, `-`, space) with `_`.
pub fn safe_field_name(path: &str) -> String {
    path.chars()
        .map(|c| match c {
            '.' | ':' | '-' | ' ' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Immutable, ordered set of field descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldTable {
    fields: Vec<FieldDescriptor>,
}

impl FieldTable {
    /// Datasets the data-capture subsystem always writes.
    pub fn fixed_fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor {
                name: "pcap_gate_duration".to_string(),
                dataset: "PCAP.GATE_DURATION.Value".to_string(),
                encoding: NumericEncoding::Float64,
            },
            FieldDescriptor {
                name: "pcap_ts_trig".to_string(),
                dataset: "PCAP.TS_TRIG.Value".to_string(),
                encoding: NumericEncoding::Float64,
            },
        ]
    }

    /// Build the table from the rows of a capture table.
    ///
    /// Fixed fields come first, then every captured channel in table order.
    pub fn from_channels(channels: &[CaptureChannel]) -> Self {
        let mut fields = Self::fixed_fields();
        for channel in channels.iter().filter(|c| c.capture.is_captured()) {
            let dataset = format!("{}.{}.{}", channel.block, channel.field, channel.capture);
            let descriptor = FieldDescriptor::from_dataset(&dataset, channel.encoding);
            if fields.iter().any(|f| f.name == descriptor.name) {
                debug!(field = %descriptor.name, "Duplicate capture field ignored");
                continue;
            }
            fields.push(descriptor);
        }
        Self { fields }
    }

    /// Query the device's capture table.
    pub async fn discover(capture: &dyn PositionCapture) -> Result<Self> {
        let channels = capture.capture_channels().await?;
        let table = Self::from_channels(&channels);
        debug!(fields = table.len(), "Discovered capture fields");
        Ok(table)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Descriptor for a logical field name
    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}
