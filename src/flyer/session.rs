//! Acquisition session: everything one kickoff produces.
//!
//! A [`Session`] borrows its [`PandaFlyer`] for its whole lifetime, so a flyer
//! can only have one session in flight. The session owns the asset-document
//! queue and the field -> datum mapping; dropping it discards both.

use anyhow::Result;
use chrono::{DateTime, Local};
use futures::FutureExt;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::completion::CompletionHandle;
use super::geometry::ScanGeometry;
use super::panda_flyer::{CollectDescription, PandaFlyer};
use crate::documents::{compose_resource, AssetDocument, FlyEvent};
use crate::error::DaqError;
use crate::hardware::status::{is_transition, SubscriptionStatus};

/// Handler spec of the PandABox HDF5 resource.
pub const RESOURCE_SPEC: &str = "PANDA";

/// Flyer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlyerState {
    /// No acquisition in progress
    Idle,
    /// Geometry programmed, capture not yet armed
    Prepared,
    /// Capture armed, waiting for the caller to request completion
    Armed,
    /// Completion requested, waiting for the acquisition to finish
    Completing,
}

impl fmt::Display for FlyerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlyerState::Idle => "Idle",
            FlyerState::Prepared => "Prepared",
            FlyerState::Armed => "Armed",
            FlyerState::Completing => "Completing",
        };
        f.write_str(name)
    }
}

/// Output file name for an acquisition started at `started`.
pub fn data_file_name(started: &DateTime<Local>) -> String {
    format!("panda_rbdata_{}.h5", started.format("%Y%m%d_%H%M%S"))
}

/// One fly-scan acquisition.
pub struct Session<'a> {
    flyer: &'a PandaFlyer,
    geometry: ScanGeometry,
    file_name: String,
    resource_uid: String,
    datums: Vec<(String, String)>,
    asset_docs: VecDeque<AssetDocument>,
    state: FlyerState,
    finished: Option<Arc<AtomicBool>>,
}

impl<'a> Session<'a> {
    /// Compose the resource and one datum per field; nothing is written to
    /// hardware here.
    pub(crate) fn open(flyer: &'a PandaFlyer, geometry: ScanGeometry, started: DateTime<Local>) -> Self {
        let file_name = data_file_name(&started);
        let root = flyer.root_dir().display().to_string();
        let (resource, mut datum_factory) =
            compose_resource(RESOURCE_SPEC, &root, &file_name, Map::new());
        let resource_uid = resource.uid.clone();

        let mut asset_docs = VecDeque::with_capacity(flyer.fields().len() + 1);
        asset_docs.push_back(AssetDocument::Resource(resource));

        let mut datums = Vec::with_capacity(flyer.fields().len());
        for field in flyer.fields().iter() {
            let mut kwargs = Map::new();
            kwargs.insert("field".to_string(), Value::from(field.dataset.as_str()));
            let datum = datum_factory.datum(kwargs);
            datums.push((field.name.clone(), datum.datum_id.clone()));
            asset_docs.push_back(AssetDocument::Datum(datum));
        }

        Self {
            flyer,
            geometry,
            file_name,
            resource_uid,
            datums,
            asset_docs,
            state: FlyerState::Prepared,
            finished: None,
        }
    }

    pub(crate) fn mark_armed(&mut self) {
        self.state = FlyerState::Armed;
    }

    /// Current lifecycle state
    pub fn state(&self) -> FlyerState {
        match (&self.state, &self.finished) {
            (FlyerState::Completing, Some(finished)) if finished.load(Ordering::SeqCst) => {
                FlyerState::Idle
            }
            (state, _) => *state,
        }
    }

    /// Name of the HDF5 file the box writes
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Geometry programmed for this session
    pub fn geometry(&self) -> &ScanGeometry {
        &self.geometry
    }

    /// Uid of the session's resource document
    pub fn resource_uid(&self) -> &str {
        &self.resource_uid
    }

    /// Field name -> datum id, in field-table order
    pub fn datums(&self) -> &[(String, String)] {
        &self.datums
    }

    /// Wait for the capture subsystem to go inactive, then disarm.
    ///
    /// # Errors
    /// `DaqError::InvalidState` unless the session is armed.
    pub fn complete(&mut self) -> Result<CompletionHandle> {
        self.complete_with_cancel(CancellationToken::new())
    }

    /// [`complete`](Self::complete) with a caller-owned cancellation token.
    ///
    /// Cancelling resolves the handle with `DaqError::Cancelled` and leaves the
    /// box armed.
    pub fn complete_with_cancel(&mut self, cancel: CancellationToken) -> Result<CompletionHandle> {
        if self.state != FlyerState::Armed {
            return Err(DaqError::InvalidState {
                operation: "complete",
                state: self.state().to_string(),
            }
            .into());
        }

        let panda = self.flyer.panda();
        let arm = Arc::clone(&panda.pcap.arm);
        let capture = Arc::clone(&panda.data.capture);
        let file_name = self.file_name.clone();

        let status = SubscriptionStatus::spawn(
            panda.pcap.active.as_ref(),
            |old, new| is_transition(old, new, 1, 0),
            Box::new(move || {
                async move {
                    info!(file = %file_name, "Acquisition done, disarming");
                    arm.put(0).await?;
                    capture.put(0).await?;
                    Ok::<(), anyhow::Error>(())
                }
                .boxed()
            }),
            cancel,
        );

        self.finished = Some(status.finished_flag());
        self.state = FlyerState::Completing;
        Ok(CompletionHandle::new(status, &self.file_name))
    }

    /// One event whose values are the datum ids of every field.
    ///
    /// # Errors
    /// `DaqError::InvalidState` if completion has not been requested.
    pub fn collect(&self) -> Result<impl Iterator<Item = FlyEvent>> {
        match self.state() {
            FlyerState::Completing | FlyerState::Idle => {}
            state => {
                return Err(DaqError::InvalidState {
                    operation: "collect",
                    state: state.to_string(),
                }
                .into())
            }
        }

        let event = FlyEvent::unfilled(
            self.datums
                .iter()
                .map(|(field, datum_id)| (field.as_str(), datum_id.as_str())),
        );
        Ok(std::iter::once(event))
    }

    /// Drain queued asset documents in creation order; later calls yield nothing.
    pub fn collect_asset_docs(&mut self) -> std::collections::vec_deque::IntoIter<AssetDocument> {
        std::mem::take(&mut self.asset_docs).into_iter()
    }

    /// Same as [`PandaFlyer::describe_collect`]
    pub fn describe_collect(&self) -> CollectDescription {
        self.flyer.describe_collect()
    }

    /// Disarm the box and stop data capture.
    pub async fn stop(&self) -> Result<()> {
        self.flyer.stop().await
    }
}

impl fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("file_name", &self.file_name)
            .field("state", &self.state())
            .field("queued_docs", &self.asset_docs.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_data_file_name() {
        let started = Local.with_ymd_and_hms(2024, 1, 26, 9, 5, 3).unwrap();
        assert_eq!(data_file_name(&started), "panda_rbdata_20240126_090503.h5");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(FlyerState::Completing.to_string(), "Completing");
    }
}
