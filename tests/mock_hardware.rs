//! Integration tests for the simulated channel backend
//!
//! These tests verify that MockBus and MockCaptureTable behave the way the
//! flyer and camera rely on: shared channels, ordered journaling, monitors
//! and capture-table discovery.

use beamline_daq::flyer::FieldTable;
use beamline_daq::hardware::capabilities::{
    CaptureChannel, CaptureMode, NumericEncoding, PositionCapture,
};
use beamline_daq::hardware::mock::{MockBus, MockCaptureTable};
use beamline_daq::hardware::status::{is_transition, no_side_effect};
use beamline_daq::hardware::{SignalFactory, SignalValue, SubscriptionStatus};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

// =============================================================================
// MockBus Tests
// =============================================================================

#[tokio::test]
async fn test_cloned_bus_shares_channels() {
    let bus = MockBus::new();
    let other = bus.clone();

    let arm = bus.signal("PANDA:PCAP:ARM");
    arm.put(1).await.unwrap();

    assert_eq!(other.value("PANDA:PCAP:ARM"), Some(SignalValue::from(1)));
    assert_eq!(other.journal().len(), 1);

    // Same PV resolves to the same channel
    let again = other.signal("PANDA:PCAP:ARM");
    assert_eq!(again.get_i64().await.unwrap(), 1);
}

#[tokio::test]
async fn test_journal_is_ordered_across_channels() {
    let bus = MockBus::new();
    let names = ["A", "B", "C", "A", "C"];

    for (n, name) in names.iter().enumerate() {
        bus.signal(name).put(n as i64).await.unwrap();
    }

    let journal = bus.journal();
    let pvs: Vec<&str> = journal.iter().map(|record| record.pv.as_str()).collect();
    assert_eq!(pvs, names);
    assert_eq!(
        bus.writes_to("A"),
        vec![SignalValue::from(0), SignalValue::from(3)]
    );

    bus.clear_journal();
    assert!(bus.journal().is_empty());
    assert_eq!(bus.value("C"), Some(SignalValue::from(4)));
}

#[tokio::test]
async fn test_typed_reads() {
    let bus = MockBus::new();
    bus.preset("CLOCK1:PERIOD", 0.00002);
    bus.preset("DATA:HDF_FILE_NAME", "panda_rbdata.h5");
    let period = bus.signal("CLOCK1:PERIOD");
    let file_name = bus.signal("DATA:HDF_FILE_NAME");

    assert_eq!(period.get_f64().await.unwrap(), 0.00002);
    assert_eq!(file_name.get_string().await.unwrap(), "panda_rbdata.h5");
    assert!(file_name.get_i64().await.is_err());
}

#[tokio::test]
async fn test_self_clearing_channel_timing() {
    let bus = MockBus::new();
    bus.reset_after_write("cam1:Acquire", 0, Duration::from_millis(50));
    let acquire = bus.signal("cam1:Acquire");

    let status = SubscriptionStatus::spawn(
        acquire.as_ref(),
        |old, new| is_transition(old, new, 1, 0),
        no_side_effect(),
        CancellationToken::new(),
    );

    let start = Instant::now();
    acquire.put(1).await.unwrap();
    status.wait().await.unwrap();
    let elapsed = start.elapsed();

    assert!(
        elapsed >= Duration::from_millis(50),
        "Expected at least 50ms, got {:?}",
        elapsed
    );
    assert_eq!(bus.value("cam1:Acquire"), Some(SignalValue::from(0)));
}

#[tokio::test]
async fn test_writing_idle_value_does_not_schedule_reset() {
    let bus = MockBus::new();
    bus.reset_after_write("cam1:Acquire", 0, Duration::from_millis(5));
    let acquire = bus.signal("cam1:Acquire");
    let mut rx = acquire.subscribe();

    acquire.put(0).await.unwrap();
    assert_eq!(rx.recv().await.unwrap().value, SignalValue::from(0));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(rx.try_recv().is_err());
}

// =============================================================================
// MockCaptureTable Tests
// =============================================================================

#[tokio::test]
async fn test_field_discovery_follows_table() {
    let table = MockCaptureTable::rotation_scan();

    let fields = FieldTable::discover(&table).await.unwrap();
    let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "pcap_gate_duration",
            "pcap_ts_trig",
            "inenc1_val_value",
            "counter1_out_value",
            "counter3_out_value",
        ]
    );

    table.set_channels(vec![
        CaptureChannel::new("INENC1", "VAL", CaptureMode::Mean, NumericEncoding::Float64),
        CaptureChannel::new("CALC1", "OUT", CaptureMode::MinMax, NumericEncoding::Float32),
    ]);
    let fields = FieldTable::discover(&table).await.unwrap();
    assert_eq!(fields.len(), 4);

    let calc = fields.get("calc1_out_min_max").unwrap();
    assert_eq!(calc.dataset, "CALC1.OUT.Min Max");
    assert_eq!(calc.encoding, NumericEncoding::Float32);
    assert_eq!(
        fields.get("inenc1_val_mean").unwrap().dataset,
        "INENC1.VAL.Mean"
    );
}

#[tokio::test]
async fn test_empty_table_keeps_fixed_fields() {
    let table = MockCaptureTable::new(Vec::new());
    assert!(table.capture_channels().await.unwrap().is_empty());

    let fields = FieldTable::discover(&table).await.unwrap();
    assert_eq!(fields.len(), FieldTable::fixed_fields().len());
}
