use serde::{Deserialize, Serialize};

/// Real (device) geometry of the captured monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotMeta {
    pub monitor_index: u32,
    pub scale_factor: f64,
    pub physical_width: u32,
    pub physical_height: u32,
}

/// A still image of the display as sent to the oracle.
///
/// `width`/`height` describe the encoded (possibly downscaled) image; zero
/// means the capture failed and the image is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    /// Base64 JPEG.
    pub image_base64: String,
    pub width: u32,
    pub height: u32,
    pub meta: Option<ScreenshotMeta>,
}

impl Capture {
    pub fn empty() -> Self {
        Self {
            image_base64: String::new(),
            width: 0,
            height: 0,
            meta: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.image_base64.is_empty() || self.width == 0 || self.height == 0
    }
}
