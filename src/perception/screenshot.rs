// Screen capture and encoding for the oracle.
use async_trait::async_trait;
use base64::Engine as _;
use image::imageops::FilterType;
use image::RgbaImage;

use crate::agent_engine::state::DetailLevel;
use crate::config::CaptureConfig;
use crate::errors::{OrdenadorError, OrdenadorResult};
use crate::perception::types::{Capture, ScreenshotMeta};

#[async_trait]
pub trait CaptureService: Send + Sync {
    async fn capture(&self, detail: DetailLevel) -> OrdenadorResult<Capture>;
}

/// Downscale `frame` for `detail`, JPEG-encode it and wrap it as a [`Capture`]
/// whose meta records the frame's original size.
pub fn encode_capture(
    frame: &RgbaImage,
    detail: DetailLevel,
    cfg: &CaptureConfig,
    monitor_index: u32,
    scale_factor: f64,
) -> OrdenadorResult<Capture> {
    let (phys_w, phys_h) = frame.dimensions();
    if phys_w == 0 || phys_h == 0 {
        return Ok(Capture::empty());
    }

    let (max_edge, quality) = match detail {
        DetailLevel::Low => (cfg.low_max_edge, cfg.low_jpeg_quality),
        DetailLevel::High => (cfg.high_max_edge, cfg.high_jpeg_quality),
    };
    let (w, h) = fit_within(phys_w, phys_h, max_edge);

    let rgb = if (w, h) == (phys_w, phys_h) {
        image::DynamicImage::ImageRgba8(frame.clone()).to_rgb8()
    } else {
        image::DynamicImage::ImageRgba8(image::imageops::resize(frame, w, h, FilterType::Triangle))
            .to_rgb8()
    };

    let mut jpeg = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(|e| OrdenadorError::Perception(format!("JPEG encode: {e}")))?;

    tracing::debug!(
        phys = %format!("{phys_w}×{phys_h}"),
        sent = %format!("{w}×{h}"),
        detail = detail.as_str(),
        bytes = jpeg.len(),
        "capture encoded"
    );

    Ok(Capture {
        image_base64: base64::engine::general_purpose::STANDARD.encode(&jpeg),
        width: w,
        height: h,
        meta: Some(ScreenshotMeta {
            monitor_index,
            scale_factor,
            physical_width: phys_w,
            physical_height: phys_h,
        }),
    })
}

/// Aspect-preserving size whose long edge is at most `max_edge`. Never upscales.
pub fn fit_within(w: u32, h: u32, max_edge: u32) -> (u32, u32) {
    let long = w.max(h);
    if max_edge == 0 || long <= max_edge {
        return (w, h);
    }
    let ratio = max_edge as f64 / long as f64;
    (
        ((w as f64 * ratio).round() as u32).max(1),
        ((h as f64 * ratio).round() as u32).max(1),
    )
}

/// Primary monitor capture via xcap.
#[cfg(feature = "desktop")]
pub struct XcapCapture {
    cfg: CaptureConfig,
}

#[cfg(feature = "desktop")]
impl XcapCapture {
    pub fn new(cfg: CaptureConfig) -> Self {
        Self { cfg }
    }
}

#[cfg(feature = "desktop")]
#[async_trait]
impl CaptureService for XcapCapture {
    async fn capture(&self, detail: DetailLevel) -> OrdenadorResult<Capture> {
        let cfg = self.cfg.clone();
        tokio::task::spawn_blocking(move || {
            let monitors = xcap::Monitor::all()
                .map_err(|e| OrdenadorError::Perception(format!("list monitors: {e}")))?;
            let (index, monitor) = monitors
                .iter()
                .enumerate()
                .find(|(_, m)| m.is_primary())
                .or_else(|| monitors.iter().enumerate().next())
                .ok_or_else(|| OrdenadorError::Perception("no monitor found".into()))?;
            let frame = monitor
                .capture_image()
                .map_err(|e| OrdenadorError::Perception(format!("capture: {e}")))?;
            encode_capture(&frame, detail, &cfg, index as u32, monitor.scale_factor() as f64)
        })
        .await
        .map_err(|e| OrdenadorError::Perception(format!("capture task: {e}")))?
    }
}
