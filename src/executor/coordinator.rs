// Capture-space → device-space coordinate mapping.
use crate::perception::types::Capture;

/// Maps a point reported against a (possibly downscaled) capture onto the
/// real device. Each axis is scaled independently and rounded to the nearest
/// device pixel.
///
/// Returns the input unchanged when any dimension is missing or zero. Results
/// are not clamped to the device bounds.
pub fn transform(
    x: i32,
    y: i32,
    capture_width: Option<u32>,
    capture_height: Option<u32>,
    device_width: Option<u32>,
    device_height: Option<u32>,
) -> (i32, i32) {
    let (Some(cw), Some(ch), Some(dw), Some(dh)) =
        (capture_width, capture_height, device_width, device_height)
    else {
        return (x, y);
    };
    if cw == 0 || ch == 0 || dw == 0 || dh == 0 {
        return (x, y);
    }

    let scale_x = dw as f64 / cw as f64;
    let scale_y = dh as f64 / ch as f64;
    (
        (x as f64 * scale_x).round() as i32,
        (y as f64 * scale_y).round() as i32,
    )
}

/// [`transform`] using the dimensions a capture carries.
pub fn capture_to_device(x: i32, y: i32, capture: &Capture) -> (i32, i32) {
    let device = capture.meta.as_ref();
    transform(
        x,
        y,
        Some(capture.width),
        Some(capture.height),
        device.map(|m| m.physical_width),
        device.map(|m| m.physical_height),
    )
}
