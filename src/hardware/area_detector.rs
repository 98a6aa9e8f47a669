//! Area-detector channels for the USB camera: the driver (`cam1:`) and the
//! TIFF file-writing plugin (`TIFF1:`).

use std::fmt;

use super::signal::{SignalFactory, SignalRef};

/// `ImageMode` enum values of the area-detector driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMode {
    Single = 0,
    Multiple = 1,
    Continuous = 2,
}

impl ImageMode {
    /// Enum label as the IOC spells it
    pub fn label(self) -> &'static str {
        match self {
            ImageMode::Single => "Single",
            ImageMode::Multiple => "Multiple",
            ImageMode::Continuous => "Continuous",
        }
    }
}

/// Area-detector driver channels.
pub struct AreaDetectorCam {
    pub image_mode: SignalRef,
    pub acquire: SignalRef,
    pub color_mode: SignalRef,
    pub data_type: SignalRef,
}

impl AreaDetectorCam {
    pub fn new(factory: &dyn SignalFactory, prefix: &str) -> Self {
        Self {
            image_mode: factory.signal(&format!("{}cam1:ImageMode", prefix)),
            acquire: factory.signal(&format!("{}cam1:Acquire", prefix)),
            color_mode: factory.signal(&format!("{}cam1:ColorMode", prefix)),
            data_type: factory.signal(&format!("{}cam1:DataType", prefix)),
        }
    }
}

impl fmt::Debug for AreaDetectorCam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AreaDetectorCam")
            .field("acquire", &self.acquire.name())
            .finish_non_exhaustive()
    }
}

/// TIFF file-writing plugin channels.
pub struct TiffFileStore {
    pub auto_save: SignalRef,
    pub file_path: SignalRef,
    pub file_name: SignalRef,
    pub file_template: SignalRef,
    pub file_write_mode: SignalRef,
    /// Read-back of the last file written
    pub full_file_name: SignalRef,
    pub array_size_depth: SignalRef,
    pub array_size_height: SignalRef,
}

impl TiffFileStore {
    pub fn new(factory: &dyn SignalFactory, prefix: &str) -> Self {
        let pv = |suffix: &str| factory.signal(&format!("{}TIFF1:{}", prefix, suffix));
        Self {
            auto_save: pv("AutoSave"),
            file_path: pv("FilePath"),
            file_name: pv("FileName"),
            file_template: pv("FileTemplate"),
            file_write_mode: pv("FileWriteMode"),
            full_file_name: pv("FullFileName_RBV"),
            array_size_depth: pv("ArraySize2_RBV"),
            array_size_height: pv("ArraySize1_RBV"),
        }
    }
}

impl fmt::Debug for TiffFileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TiffFileStore")
            .field("full_file_name", &self.full_file_name.name())
            .finish_non_exhaustive()
    }
}
