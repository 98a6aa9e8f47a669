//! Mock Hardware Implementations
//!
//! Simulated channel backend for running the flyer and camera without an IOC.
//! All mock channels use async-safe operations (tokio::time::sleep, not
//! std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockBus` - In-memory `SignalFactory`; journals every acknowledged write in
//!   order, can refuse writes to chosen PVs, and can drive values the way the
//!   hardware would (`drive`)
//! - `MockSignal` - One simulated PV with a broadcast monitor
//! - `MockCaptureTable` - Simulated PandABox position-capture table
//!
//! # Example
//!
//! ```rust,ignore
//! let bus = MockBus::new();
//! let arm = bus.signal("PANDA:PCAP:ARM");
//! arm.put(1).await?;
//! assert_eq!(bus.writes_to("PANDA:PCAP:ARM"), vec![SignalValue::from(1)]);
//! ```

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::trace;

use crate::documents::now_secs;
use crate::hardware::capabilities::{
    CaptureChannel, CaptureMode, NumericEncoding, PositionCapture,
};
use crate::hardware::signal::{Signal, SignalFactory, SignalRef, SignalUpdate, SignalValue};

const MONITOR_CAPACITY: usize = 64;

/// One acknowledged write, as recorded by the bus journal.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    /// PV written
    pub pv: String,
    /// Value written
    pub value: SignalValue,
}

#[derive(Debug, Clone)]
struct ResetAfterWrite {
    idle: SignalValue,
    delay: Duration,
}

#[derive(Default)]
struct BusState {
    signals: Mutex<HashMap<String, Arc<MockSignal>>>,
    journal: Mutex<Vec<WriteRecord>>,
    /// PV -> writes still acknowledged before refusing
    failing: Mutex<HashMap<String, usize>>,
    resets: Mutex<HashMap<String, ResetAfterWrite>>,
}

impl BusState {
    fn signal(self: &Arc<Self>, pv: &str) -> Arc<MockSignal> {
        let mut signals = self.signals.lock();
        Arc::clone(
            signals
                .entry(pv.to_string())
                .or_insert_with(|| Arc::new(MockSignal::new(pv, Arc::downgrade(self)))),
        )
    }
}

// =============================================================================
// MockBus - Simulated Channel Access
// =============================================================================

/// In-memory channel backend.
///
/// Channels are created on first use with value `0`. Cloning the bus shares
/// the same channels.
#[derive(Clone, Default)]
pub struct MockBus {
    state: Arc<BusState>,
}

impl MockBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated channel for `pv`, created if needed
    pub fn mock_signal(&self, pv: &str) -> Arc<MockSignal> {
        self.state.signal(pv)
    }

    /// Set the current value without journaling or notifying monitors
    pub fn preset(&self, pv: &str, value: impl Into<SignalValue>) {
        *self.mock_signal(pv).value.write() = value.into();
    }

    /// Attach enum labels so `get_string` reports the label of the index
    pub fn set_enum_labels(&self, pv: &str, labels: &[&str]) {
        *self.mock_signal(pv).labels.write() =
            Some(labels.iter().map(|label| label.to_string()).collect());
    }

    /// Change a value from the hardware side, notifying monitors
    pub fn drive(&self, pv: &str, value: impl Into<SignalValue>) {
        self.mock_signal(pv).update(value.into());
    }

    /// Refuse every subsequent write to `pv`
    pub fn fail_writes_to(&self, pv: &str) {
        self.fail_writes_after(pv, 0);
    }

    /// Acknowledge the next `accepted` writes to `pv`, then refuse the rest
    pub fn fail_writes_after(&self, pv: &str, accepted: usize) {
        self.state.failing.lock().insert(pv.to_string(), accepted);
    }

    /// After any write of a value other than `idle`, return to `idle` after `delay`
    ///
    /// Simulates self-clearing PVs such as an area detector's `Acquire`.
    pub fn reset_after_write(&self, pv: &str, idle: impl Into<SignalValue>, delay: Duration) {
        self.state.resets.lock().insert(
            pv.to_string(),
            ResetAfterWrite {
                idle: idle.into(),
                delay,
            },
        );
    }

    /// Current value of `pv`, if the channel exists
    pub fn value(&self, pv: &str) -> Option<SignalValue> {
        self.state
            .signals
            .lock()
            .get(pv)
            .map(|signal| signal.value.read().clone())
    }

    /// All acknowledged writes, in order
    pub fn journal(&self) -> Vec<WriteRecord> {
        self.state.journal.lock().clone()
    }

    /// Values written to `pv`, in order
    pub fn writes_to(&self, pv: &str) -> Vec<SignalValue> {
        self.state
            .journal
            .lock()
            .iter()
            .filter(|record| record.pv == pv)
            .map(|record| record.value.clone())
            .collect()
    }

    /// Forget all recorded writes
    pub fn clear_journal(&self) {
        self.state.journal.lock().clear();
    }
}

impl SignalFactory for MockBus {
    fn signal(&self, pv: &str) -> SignalRef {
        self.mock_signal(pv)
    }
}

// =============================================================================
// MockSignal - Simulated PV
// =============================================================================

/// One simulated PV.
pub struct MockSignal {
    name: String,
    value: RwLock<SignalValue>,
    labels: RwLock<Option<Vec<String>>>,
    tx: broadcast::Sender<SignalUpdate>,
    bus: Weak<BusState>,
}

impl MockSignal {
    fn new(name: &str, bus: Weak<BusState>) -> Self {
        let (tx, _) = broadcast::channel(MONITOR_CAPACITY);
        Self {
            name: name.to_string(),
            value: RwLock::new(SignalValue::Int(0)),
            labels: RwLock::new(None),
            tx,
            bus,
        }
    }

    fn update(&self, value: SignalValue) {
        let old_value = std::mem::replace(&mut *self.value.write(), value.clone());
        trace!(pv = %self.name, %value, "monitor update");
        // No subscribers is fine
        let _ = self.tx.send(SignalUpdate {
            value,
            old_value: Some(old_value),
            timestamp: now_secs(),
        });
    }
}

#[async_trait]
impl Signal for MockSignal {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set(&self, value: SignalValue) -> Result<()> {
        let bus = self
            .bus
            .upgrade()
            .ok_or_else(|| anyhow!("{}: channel disconnected", self.name))?;

        if let Some(remaining) = bus.failing.lock().get_mut(&self.name) {
            if *remaining == 0 {
                anyhow::bail!("Write to {} was not acknowledged", self.name);
            }
            *remaining -= 1;
        }

        bus.journal.lock().push(WriteRecord {
            pv: self.name.clone(),
            value: value.clone(),
        });
        self.update(value.clone());

        let reset = bus.resets.lock().get(&self.name).cloned();
        if let Some(reset) = reset {
            if value != reset.idle {
                let signal = bus.signal(&self.name);
                tokio::spawn(async move {
                    tokio::time::sleep(reset.delay).await;
                    signal.update(reset.idle);
                });
            }
        }
        Ok(())
    }

    async fn get(&self) -> Result<SignalValue> {
        Ok(self.value.read().clone())
    }

    async fn get_string(&self) -> Result<String> {
        let value = self.value.read().clone();
        let labels = self.labels.read();
        let label = match (labels.as_ref(), value.as_i64()) {
            (Some(labels), Some(index)) => usize::try_from(index)
                .ok()
                .and_then(|index| labels.get(index).cloned()),
            _ => None,
        };
        Ok(label.unwrap_or_else(|| value.to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<SignalUpdate> {
        self.tx.subscribe()
    }
}

// =============================================================================
// MockCaptureTable - Simulated PandABox capture table
// =============================================================================

/// Simulated position-capture table.
pub struct MockCaptureTable {
    channels: RwLock<Vec<CaptureChannel>>,
}

impl MockCaptureTable {
    /// Table with the given rows
    pub fn new(channels: Vec<CaptureChannel>) -> Self {
        Self {
            channels: RwLock::new(channels),
        }
    }

    /// The table the rotation scan normally runs with
    ///
    /// Encoder angle and both counters captured, CALC1 present but not captured.
    pub fn rotation_scan() -> Self {
        Self::new(vec![
            CaptureChannel::new("INENC1", "VAL", CaptureMode::Value, NumericEncoding::Int32),
            CaptureChannel::new("COUNTER1", "OUT", CaptureMode::Value, NumericEncoding::Int32),
            CaptureChannel::new("COUNTER3", "OUT", CaptureMode::Value, NumericEncoding::Int32),
            CaptureChannel::new("CALC1", "OUT", CaptureMode::No, NumericEncoding::Float64),
        ])
    }

    /// Replace the table rows
    pub fn set_channels(&self, channels: Vec<CaptureChannel>) {
        *self.channels.write() = channels;
    }
}

#[async_trait]
impl PositionCapture for MockCaptureTable {
    async fn capture_channels(&self) -> Result<Vec<CaptureChannel>> {
        Ok(self.channels.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writes_are_journaled_in_order() {
        let bus = MockBus::new();
        let a = bus.signal("BITS:A");
        let b = bus.signal("BITS:B");

        a.put(1).await.unwrap();
        b.put(0).await.unwrap();
        a.put("x").await.unwrap();

        let journal = bus.journal();
        assert_eq!(journal.len(), 3);
        assert_eq!(journal[0].pv, "BITS:A");
        assert_eq!(journal[1].pv, "BITS:B");
        assert_eq!(
            bus.writes_to("BITS:A"),
            vec![SignalValue::from(1), SignalValue::from("x")]
        );
        assert_eq!(bus.value("BITS:A"), Some("x".into()));
    }

    #[tokio::test]
    async fn test_failed_write_is_not_journaled() {
        let bus = MockBus::new();
        bus.fail_writes_to("PCAP:ARM");
        let arm = bus.signal("PCAP:ARM");

        assert!(arm.put(1).await.is_err());
        assert!(bus.journal().is_empty());
        assert_eq!(bus.value("PCAP:ARM"), Some(0.into()));
    }

    #[tokio::test]
    async fn test_failure_after_accepted_writes() {
        let bus = MockBus::new();
        bus.fail_writes_after("cam1:ImageMode", 2);
        let image_mode = bus.signal("cam1:ImageMode");

        image_mode.put(0).await.unwrap();
        image_mode.put(1).await.unwrap();
        assert!(image_mode.put(2).await.is_err());
        assert_eq!(
            bus.writes_to("cam1:ImageMode"),
            vec![SignalValue::from(0), SignalValue::from(1)]
        );
    }

    #[tokio::test]
    async fn test_drive_notifies_with_old_value() {
        let bus = MockBus::new();
        let active = bus.signal("PCAP:ACTIVE");
        let mut rx = active.subscribe();

        bus.drive("PCAP:ACTIVE", 1);
        let update = rx.recv().await.unwrap();
        assert_eq!(update.value, 1.into());
        assert_eq!(update.old_value, Some(0.into()));
        assert!(bus.journal().is_empty());
    }

    #[tokio::test]
    async fn test_enum_labels() {
        let bus = MockBus::new();
        bus.set_enum_labels("cam1:DataType", &["Int8", "UInt8", "Int16", "UInt16"]);
        bus.preset("cam1:DataType", 3);
        let data_type = bus.signal("cam1:DataType");
        assert_eq!(data_type.get_string().await.unwrap(), "UInt16");
        assert_eq!(data_type.get_i64().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_reset_after_write() {
        let bus = MockBus::new();
        bus.reset_after_write("cam1:Acquire", 0, Duration::from_millis(5));
        let acquire = bus.signal("cam1:Acquire");
        let mut rx = acquire.subscribe();

        acquire.put(1).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().value, 1.into());
        let reset = rx.recv().await.unwrap();
        assert_eq!(reset.value, 0.into());
        assert_eq!(reset.old_value, Some(1.into()));
        assert_eq!(bus.writes_to("cam1:Acquire").len(), 1);
    }

    #[tokio::test]
    async fn test_capture_table() {
        let table = MockCaptureTable::rotation_scan();
        let channels = table.capture_channels().await.unwrap();
        assert_eq!(channels.len(), 4);
        assert_eq!(channels.iter().filter(|c| c.capture.is_captured()).count(), 3);
    }
}
