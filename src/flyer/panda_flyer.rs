//! PandABox rotation fly scan.
//!
//! # Lifecycle
//!
//! ```text
//! PandaFlyer::new ──► kickoff() ──► Session (Armed)
//!                                      │ complete()
//!                                      ▼
//!                                  Completing ──(pcap.active 1 → 0, disarm)──► Idle
//!                                      │
//!                          collect() / collect_asset_docs()
//! ```
//!
//! The flyer only writes registers and composes documents; the PandABox writes
//! the HDF5 file itself.

use anyhow::Result;
use chrono::Local;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use super::fields::FieldTable;
use super::geometry::{ScanGeometry, ScanParameters};
use super::session::Session;
use crate::config::FlyerConfig;
use crate::documents::DataKey;
use crate::error::DaqError;
use crate::hardware::panda::PandaBox;

/// Stream name the flyer's event lands in.
pub const PRIMARY_STREAM: &str = "primary";

/// Stream name -> field name -> data key.
pub type CollectDescription = BTreeMap<String, BTreeMap<String, DataKey>>;

/// Coordinates one PandABox through rotation fly scans.
pub struct PandaFlyer {
    panda: PandaBox,
    fields: FieldTable,
    root_dir: PathBuf,
    scan: ScanParameters,
    settle_delay: Duration,
    flush_period: f64,
}

impl PandaFlyer {
    /// Build a flyer, discovering the captured fields from the box.
    ///
    /// # Errors
    /// `DaqError::MissingArgument` if `config.root_dir` is not set; any error
    /// raised while reading the capture table.
    pub async fn new(panda: PandaBox, config: &FlyerConfig) -> Result<Self> {
        let root_dir = config
            .root_dir
            .clone()
            .ok_or(DaqError::MissingArgument("root_dir"))?;
        let fields = FieldTable::discover(panda.capture_table()).await?;
        info!(
            panda = panda.name(),
            fields = fields.len(),
            root_dir = %root_dir.display(),
            "Flyer ready"
        );

        Ok(Self {
            panda,
            fields,
            root_dir,
            scan: config.scan_parameters(),
            settle_delay: config.settle_delay,
            flush_period: config.flush_period,
        })
    }

    /// Flyer name
    pub fn name(&self) -> &str {
        "PandaFlyer"
    }

    pub fn panda(&self) -> &PandaBox {
        &self.panda
    }

    pub fn fields(&self) -> &FieldTable {
        &self.fields
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Parameters the next kickoff runs with
    pub fn scan(&self) -> &ScanParameters {
        &self.scan
    }

    /// Change the parameters of subsequent scans
    pub fn set_scan(&mut self, scan: ScanParameters) {
        self.scan = scan;
    }

    /// Compute the geometry and program it into the box.
    ///
    /// The geometry is validated before the first register write, so a
    /// configuration error leaves the hardware untouched.
    pub async fn prepare(&self) -> Result<ScanGeometry> {
        let geometry = ScanGeometry::compute(&self.scan)?;
        geometry.apply(&self.panda, self.scan.t_period).await?;
        Ok(geometry)
    }

    /// Program, arm and start one acquisition.
    ///
    /// Returns once the box is armed and the settle delay has passed. Any
    /// failed write aborts the kickoff with that write's error; registers
    /// already written are left as they are.
    pub async fn kickoff(&mut self) -> Result<Session<'_>> {
        let flyer: &PandaFlyer = self;
        let geometry = flyer.prepare().await?;

        let mut session = Session::open(flyer, geometry, Local::now());
        flyer.start_capture(session.file_name()).await?;
        session.mark_armed();
        info!(
            file = session.file_name(),
            n_proj = flyer.scan.n_proj,
            n_series = flyer.scan.n_series,
            "Capture armed"
        );

        tokio::time::sleep(flyer.settle_delay).await;
        Ok(session)
    }

    async fn start_capture(&self, file_name: &str) -> Result<()> {
        let panda = &self.panda;
        let scan = &self.scan;

        panda.bits.a.put(1).await?;

        panda
            .data
            .hdf_directory
            .put(self.root_dir.display().to_string())
            .await?;
        panda.data.hdf_file_name.put(file_name).await?;
        panda.data.flush_period.put(self.flush_period).await?;

        if scan.n_series == 0 {
            panda.bits.b.put(1).await?;
            panda.data.capture_mode.put("FOREVER").await?;
        } else {
            panda.bits.b.put(0).await?;
            panda.counter3.start.put(0).await?;
            panda.counter3.min.put(0).await?;
            panda.counter3.step.put(1).await?;
            panda.counter3.max.put(scan.n_series).await?;
            panda.data.capture_mode.put("FIRST_N").await?;
            panda
                .data
                .num_capture
                .put(i64::from(scan.n_proj) * i64::from(scan.n_series))
                .await?;
        }

        panda.data.capture.put(1).await?;
        panda.pcap.arm.put(1).await?;
        Ok(())
    }

    /// Data keys of the flyer's event.
    ///
    /// Every field is an array of one value per captured pulse.
    pub fn describe_collect(&self) -> CollectDescription {
        let points = if self.scan.n_series == 0 {
            i64::from(self.scan.n_proj)
        } else {
            i64::from(self.scan.n_proj) * i64::from(self.scan.n_series)
        };

        let keys = self
            .fields
            .iter()
            .map(|field| {
                let key = DataKey::array(self.panda.name(), vec![points])
                    .with_dtype_str(Some(field.encoding.dtype_str()))
                    .with_external("FILESTORE:");
                (field.name.clone(), key)
            })
            .collect();

        let mut description = BTreeMap::new();
        description.insert(PRIMARY_STREAM.to_string(), keys);
        description
    }

    /// Disarm pulse capture and stop data capture.
    pub async fn stop(&self) -> Result<()> {
        info!(panda = self.panda.name(), "Stopping capture");
        self.panda.pcap.arm.put(0).await?;
        self.panda.data.capture.put(0).await?;
        Ok(())
    }
}

impl std::fmt::Debug for PandaFlyer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PandaFlyer")
            .field("panda", &self.panda)
            .field("fields", &self.fields.len())
            .field("root_dir", &self.root_dir)
            .field("scan", &self.scan)
            .finish_non_exhaustive()
    }
}
