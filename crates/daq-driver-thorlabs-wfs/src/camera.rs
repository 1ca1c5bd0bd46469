//! Camera models and their resolution tables.
//!
//! The resolution index passed to `WFS_ConfigureCam` means something
//! different on every sensor family; the family is encoded in the device ID.

use serde::{Deserialize, Serialize};
use std::fmt;
use wfs_sys::{DEVICE_OFFSET_WFS10, DEVICE_OFFSET_WFS20, DEVICE_OFFSET_WFS30, DEVICE_OFFSET_WFS40};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraModel {
    Wfs10,
    Wfs20,
    Wfs30,
    Wfs40,
    /// WFS150 and WFS300 share a table.
    Wfs150,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
    /// Binned (WFS20) or subsampled (WFS30/40) readout.
    pub reduced: bool,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)?;
        if self.reduced {
            f.write_str(" (reduced)")?;
        }
        Ok(())
    }
}

const fn full(width: u32, height: u32) -> Resolution {
    Resolution {
        width,
        height,
        reduced: false,
    }
}

const fn reduced(width: u32, height: u32) -> Resolution {
    Resolution {
        width,
        height,
        reduced: true,
    }
}

const WFS150_RESOLUTIONS: [Resolution; 5] = [
    full(1280, 1024),
    full(1024, 1024),
    full(768, 768),
    full(512, 512),
    full(320, 320),
];

const WFS10_RESOLUTIONS: [Resolution; 5] = [
    full(640, 480),
    full(480, 480),
    full(360, 360),
    full(260, 260),
    full(180, 180),
];

const WFS20_RESOLUTIONS: [Resolution; 10] = [
    full(1440, 1080),
    full(1080, 1080),
    full(768, 768),
    full(512, 512),
    full(360, 360),
    reduced(720, 540),
    reduced(540, 540),
    reduced(384, 384),
    reduced(256, 256),
    reduced(180, 180),
];

const WFS30_RESOLUTIONS: [Resolution; 12] = [
    full(1936, 1216),
    full(1216, 1216),
    full(1024, 1024),
    full(768, 768),
    full(512, 512),
    full(360, 360),
    reduced(968, 608),
    reduced(608, 608),
    reduced(512, 512),
    reduced(384, 384),
    reduced(256, 256),
    reduced(180, 180),
];

const WFS40_RESOLUTIONS: [Resolution; 12] = [
    full(2048, 2048),
    full(1536, 1536),
    full(1024, 1024),
    full(768, 768),
    full(512, 512),
    full(360, 360),
    reduced(1024, 1024),
    reduced(768, 768),
    reduced(512, 512),
    reduced(384, 384),
    reduced(256, 256),
    reduced(180, 180),
];

impl CameraModel {
    pub fn from_device_id(device_id: i32) -> Self {
        if device_id & DEVICE_OFFSET_WFS10 != 0 {
            CameraModel::Wfs10
        } else if device_id & DEVICE_OFFSET_WFS20 != 0 {
            CameraModel::Wfs20
        } else if device_id & DEVICE_OFFSET_WFS30 != 0 {
            CameraModel::Wfs30
        } else if device_id & DEVICE_OFFSET_WFS40 != 0 {
            CameraModel::Wfs40
        } else {
            CameraModel::Wfs150
        }
    }

    pub fn resolutions(self) -> &'static [Resolution] {
        match self {
            CameraModel::Wfs10 => &WFS10_RESOLUTIONS,
            CameraModel::Wfs20 => &WFS20_RESOLUTIONS,
            CameraModel::Wfs30 => &WFS30_RESOLUTIONS,
            CameraModel::Wfs40 => &WFS40_RESOLUTIONS,
            CameraModel::Wfs150 => &WFS150_RESOLUTIONS,
        }
    }

    pub fn resolution(self, index: i32) -> Option<Resolution> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.resolutions().get(i).copied())
    }

    pub fn max_resolution_index(self) -> i32 {
        self.resolutions().len() as i32 - 1
    }

    pub fn label(self) -> &'static str {
        match self {
            CameraModel::Wfs10 => "WFS10",
            CameraModel::Wfs20 => "WFS20",
            CameraModel::Wfs30 => "WFS30",
            CameraModel::Wfs40 => "WFS40",
            CameraModel::Wfs150 => "WFS150/300",
        }
    }
}

impl fmt::Display for CameraModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
