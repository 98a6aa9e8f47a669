//! USB camera on an area-detector IOC, writing one TIFF file per trigger.
//!
//! Staging switches the driver and the TIFF plugin to single-image mode and
//! enables auto-save; unstaging restores the previous settings and returns the
//! camera to continuous acquisition for live viewing. Each trigger queues a
//! stream datum against the stream resource composed at stage time.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use serde_json::Map;
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CameraConfig;
use crate::documents::{
    compose_stream_resource, new_uid, AssetDocument, DataKey, StreamDatumFactory, StreamRange,
};
use crate::error::{AppResult, DaqError};
use crate::hardware::area_detector::{AreaDetectorCam, ImageMode, TiffFileStore};
use crate::hardware::capabilities::{Stageable, Triggerable};
use crate::hardware::signal::{SignalFactory, SignalRef, SignalValue};
use crate::hardware::status::{is_transition, no_side_effect, SubscriptionStatus};

/// MIME type of the frames in the TIFF stream.
pub const TIFF_MIMETYPE: &str = "image/tiff";

/// File template the TIFF plugin uses while staged.
pub const TIFF_FILE_TEMPLATE: &str = "%s%s_%6.6d.tiff";

/// Numpy-style type string for an area-detector `DataType` label.
pub fn pixel_dtype_str(data_type: &str) -> Option<&'static str> {
    match data_type {
        "UInt8" => Some("|u1"),
        "UInt16" => Some("<u2"),
        "Float32" => Some("<f4"),
        "Float64" => Some("<f8"),
        _ => None,
    }
}

#[derive(Default)]
struct CameraState {
    staged: bool,
    originals: Vec<(SignalRef, SignalValue)>,
    datum_factory: Option<StreamDatumFactory>,
    asset_docs: VecDeque<AssetDocument>,
}

/// Single-trigger USB camera with a TIFF file store.
pub struct UvcCamera {
    name: String,
    root_dir: PathBuf,
    write_path_template: String,
    pub cam: AreaDetectorCam,
    pub tiff: TiffFileStore,
    state: Mutex<CameraState>,
}

impl UvcCamera {
    /// Wire the camera from `factory`.
    ///
    /// # Errors
    /// `DaqError::MissingArgument` if `config.root_dir` is not set.
    pub fn new(config: &CameraConfig, factory: &dyn SignalFactory) -> AppResult<Self> {
        let root_dir = config
            .root_dir
            .clone()
            .ok_or(DaqError::MissingArgument("root_dir"))?;
        Ok(Self {
            name: config.name.clone(),
            root_dir,
            write_path_template: config.write_path_template.clone(),
            cam: AreaDetectorCam::new(factory, &config.prefix),
            tiff: TiffFileStore::new(factory, &config.prefix),
            state: Mutex::new(CameraState::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root of the asset tree the camera writes under
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Settings applied on stage and restored on unstage, in application order.
    ///
    /// Acquisition is stopped first so a live-view frame in flight cannot
    /// complete a trigger.
    fn stage_signals(&self) -> Vec<(SignalRef, SignalValue)> {
        vec![
            (self.cam.acquire.clone(), 0.into()),
            (
                self.cam.image_mode.clone(),
                ImageMode::Single.label().into(),
            ),
            (self.tiff.file_write_mode.clone(), "Single".into()),
            (self.tiff.file_template.clone(), TIFF_FILE_TEMPLATE.into()),
        ]
    }

    async fn apply_stage_signals(&self, state: &mut CameraState) -> Result<()> {
        for (signal, value) in self.stage_signals() {
            let original = signal.get().await?;
            signal.put(value).await?;
            state.originals.push((signal, original));
        }
        Ok(())
    }

    async fn restore_stage_signals(&self, state: &mut CameraState) -> Result<()> {
        while let Some((signal, original)) = state.originals.pop() {
            signal.put(original).await?;
        }
        Ok(())
    }

    /// Point the TIFF plugin at a fresh file and compose the stream resource.
    async fn stage_file_store(&self, state: &mut CameraState) -> Result<()> {
        let mut write_path = String::new();
        write!(write_path, "{}", Local::now().format(&self.write_path_template)).map_err(|_| {
            DaqError::Configuration(format!(
                "Invalid write_path_template '{}'",
                self.write_path_template
            ))
        })?;
        self.tiff.file_path.put(write_path).await?;
        self.tiff.file_name.put(new_uid()).await?;

        let full_file_name = self.tiff.full_file_name.get_string().await?;
        let uri = format!("file://localhost/{}", full_file_name.trim_matches('/'));
        let (resource, factory) = compose_stream_resource(&self.name, TIFF_MIMETYPE, &uri, Map::new());
        debug!(uri = %resource.uri, "Stream resource composed");

        state.asset_docs.push_back(AssetDocument::StreamResource(resource));
        state.datum_factory = Some(factory);
        Ok(())
    }

    /// Queue a stream datum for the frame just written.
    pub async fn generate_datum(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let CameraState {
            datum_factory,
            asset_docs,
            ..
        } = &mut *state;
        let factory = datum_factory.as_mut().ok_or(DaqError::InvalidState {
            operation: "generate_datum",
            state: "unstaged".to_string(),
        })?;
        let datum = factory.datum(StreamRange { start: 0, stop: 1 });
        asset_docs.push_back(AssetDocument::StreamDatum(datum));
        Ok(())
    }

    /// Drain queued asset documents in creation order.
    pub async fn collect_asset_docs(&self) -> Vec<AssetDocument> {
        self.state.lock().await.asset_docs.drain(..).collect()
    }

    /// Data key of the TIFF stream.
    ///
    /// Unknown pixel types are described without `dtype_str`.
    pub async fn describe(&self) -> Result<BTreeMap<String, DataKey>> {
        let depth = self.tiff.array_size_depth.get_i64().await?;
        let height = self.tiff.array_size_height.get_i64().await?;
        let color_mode = self.cam.color_mode.get_string().await?;
        let data_type = self.cam.data_type.get_string().await?;

        let dtype_str = pixel_dtype_str(&data_type);
        if dtype_str.is_none() {
            debug!(camera = %self.name, %data_type, %color_mode, "No dtype_str for pixel type");
        }

        let key = DataKey::array(&self.name, vec![depth, height, 3])
            .with_dtype_str(dtype_str)
            .with_external("STREAM:");

        let mut description = BTreeMap::new();
        description.insert(self.name.clone(), key);
        Ok(description)
    }

    /// Disable auto-save, then stop acquiring.
    ///
    /// Both writes are attempted; the first error is returned.
    pub async fn stop(&self, success: bool) -> Result<()> {
        info!(camera = %self.name, success, "Stopping camera");
        let disable = self.tiff.auto_save.put(0).await;
        let halt = self.cam.acquire.put(0).await;
        disable.and(halt)
    }
}

#[async_trait]
impl Stageable for UvcCamera {
    async fn stage(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.staged {
            return Err(DaqError::InvalidState {
                operation: "stage",
                state: "staged".to_string(),
            }
            .into());
        }

        self.tiff.auto_save.put(1).await?;

        let staged = async {
            self.apply_stage_signals(&mut state).await?;
            self.stage_file_store(&mut state).await
        }
        .await;
        if let Err(err) = staged {
            // Put back whatever was already changed, report the stage failure
            if let Err(restore_err) = self.restore_stage_signals(&mut state).await {
                warn!(
                    camera = %self.name,
                    error = %restore_err,
                    "Failed to restore settings after stage failure"
                );
            }
            state.originals.clear();
            state.datum_factory = None;
            return Err(err);
        }

        state.staged = true;
        info!(camera = %self.name, "Staged");
        Ok(())
    }

    async fn unstage(&self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if state.staged {
                self.restore_stage_signals(&mut state).await?;
                state.staged = false;
                state.datum_factory = None;
            }
        }

        // Back to continuous acquisition without saving, for live viewing
        self.tiff.auto_save.put(0).await?;
        self.cam.image_mode.put(ImageMode::Continuous as i64).await?;
        self.cam.acquire.put(1).await?;
        info!(camera = %self.name, "Unstaged");
        Ok(())
    }

    async fn is_staged(&self) -> Result<bool> {
        Ok(self.state.lock().await.staged)
    }
}

#[async_trait]
impl Triggerable for UvcCamera {
    async fn trigger(&self) -> Result<()> {
        if !self.state.lock().await.staged {
            return Err(DaqError::InvalidState {
                operation: "trigger",
                state: "unstaged".to_string(),
            }
            .into());
        }

        let status = SubscriptionStatus::spawn(
            self.cam.acquire.as_ref(),
            |old, new| is_transition(old, new, 1, 0),
            no_side_effect(),
            CancellationToken::new(),
        );
        if let Err(err) = self.cam.acquire.put(1).await {
            status.cancel();
            return Err(err);
        }
        status.wait().await?;

        self.generate_datum().await
    }
}

impl std::fmt::Debug for UvcCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UvcCamera")
            .field("name", &self.name)
            .field("root_dir", &self.root_dir)
            .field("cam", &self.cam)
            .field("tiff", &self.tiff)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockBus;
    use tracing_test::traced_test;

    #[test]
    fn test_pixel_dtype_str() {
        assert_eq!(pixel_dtype_str("UInt8"), Some("|u1"));
        assert_eq!(pixel_dtype_str("UInt16"), Some("<u2"));
        assert_eq!(pixel_dtype_str("Float32"), Some("<f4"));
        assert_eq!(pixel_dtype_str("Float64"), Some("<f8"));
        assert_eq!(pixel_dtype_str("Int32"), None);
    }

    #[test]
    fn test_missing_root_dir() {
        let bus = MockBus::new();
        let err = UvcCamera::new(&CameraConfig::default(), &bus).unwrap_err();
        assert!(matches!(err, DaqError::MissingArgument("root_dir")));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_restore_is_logged_and_forgotten() {
        let bus = MockBus::new();
        let config = CameraConfig {
            root_dir: Some(PathBuf::from("/tmp")),
            ..CameraConfig::default()
        };
        let camera = UvcCamera::new(&config, &bus).unwrap();
        bus.fail_writes_to(camera.tiff.file_path.name());
        // Accepts the stage write, refuses the restore
        bus.fail_writes_after(camera.cam.image_mode.name(), 1);

        assert!(camera.stage().await.is_err());
        assert!(logs_contain("Failed to restore settings after stage failure"));

        let state = camera.state.lock().await;
        assert!(!state.staged);
        assert!(state.originals.is_empty());
        assert!(state.datum_factory.is_none());
    }

    #[tokio::test]
    async fn test_generate_datum_requires_stage() {
        let bus = MockBus::new();
        let config = CameraConfig {
            root_dir: Some(PathBuf::from("/tmp")),
            ..CameraConfig::default()
        };
        let camera = UvcCamera::new(&config, &bus).unwrap();
        assert!(camera.generate_datum().await.is_err());
        assert!(camera.collect_asset_docs().await.is_empty());
    }
}
