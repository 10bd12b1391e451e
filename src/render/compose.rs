//! PPM frame composition.
//!
//! Frames are scaled with nearest-neighbour sampling so pixel art stays sharp, and a
//! darkened band is drawn along the bottom edge where the status overlay belongs. The
//! overlay text itself travels in the PPM header comment.

use super::{EncodedImage, PublishError};
use crate::emulator::RasterFrame;

pub const MIN_SCALE: u32 = 1;
pub const MAX_SCALE: u32 = 8;

/// Height of the overlay band in unscaled pixels
const OVERLAY_BAND: u32 = 10;

pub fn compose_ppm(
    frame: &RasterFrame,
    scale: u32,
    overlay: &str,
) -> Result<EncodedImage, PublishError> {
    if !(MIN_SCALE..=MAX_SCALE).contains(&scale) {
        return Err(PublishError::Compose(format!(
            "Scale {} outside {}..={}",
            scale, MIN_SCALE, MAX_SCALE
        )));
    }
    if frame.width == 0 || frame.height == 0 {
        return Err(PublishError::Compose("Empty frame".to_string()));
    }
    if frame.pixels.len() != (frame.width * frame.height * 3) as usize {
        return Err(PublishError::Compose(format!(
            "Expected {} bytes for {}x{} frame, got {}",
            frame.width * frame.height * 3,
            frame.width,
            frame.height,
            frame.pixels.len()
        )));
    }

    let width = frame.width * scale;
    let height = frame.height * scale;
    let band_start = if overlay.is_empty() {
        height
    } else {
        height.saturating_sub(OVERLAY_BAND.min(frame.height) * scale)
    };

    let comment = overlay.replace(['\n', '\r'], " ");
    let mut bytes = format!("P6\n# {}\n{} {}\n255\n", comment, width, height).into_bytes();
    bytes.reserve((width * height * 3) as usize);

    for y in 0..height {
        for x in 0..width {
            let [r, g, b] = frame.pixel(x / scale, y / scale);
            if y >= band_start {
                bytes.extend_from_slice(&[r / 4, g / 4, b / 4]);
            } else {
                bytes.extend_from_slice(&[r, g, b]);
            }
        }
    }

    Ok(EncodedImage {
        bytes,
        media_type: "image/x-portable-pixmap",
        file_name: "frame.ppm".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> RasterFrame {
        RasterFrame::new(2, 2, vec![
            255, 0, 0, 0, 255, 0, //
            0, 0, 255, 255, 255, 255,
        ])
    }

    fn header_len(bytes: &[u8]) -> usize {
        // Four header lines: magic, comment, size, max value
        bytes
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == b'\n')
            .nth(3)
            .map(|(i, _)| i + 1)
            .unwrap()
    }

    #[test]
    fn test_header_and_scaling() {
        let image = compose_ppm(&checker(), 2, "").unwrap();
        let header = std::str::from_utf8(&image.bytes[..header_len(&image.bytes)]).unwrap();
        assert_eq!(header, "P6\n# \n4 4\n255\n");

        let body = &image.bytes[header_len(&image.bytes)..];
        assert_eq!(body.len(), 4 * 4 * 3);
        // Top-left 2x2 block is red
        assert_eq!(&body[0..3], &[255, 0, 0]);
        assert_eq!(&body[3..6], &[255, 0, 0]);
        assert_eq!(&body[12..15], &[255, 0, 0]);
        // Third column comes from the green source pixel
        assert_eq!(&body[6..9], &[0, 255, 0]);
    }

    #[test]
    fn test_overlay_darkens_band() {
        let image = compose_ppm(&checker(), 1, "Tetris | Speed: 2x").unwrap();
        let start = header_len(&image.bytes);
        assert!(std::str::from_utf8(&image.bytes[..start])
            .unwrap()
            .contains("Tetris | Speed: 2x"));
        // The band covers the whole 2px frame
        assert_eq!(&image.bytes[start..start + 3], &[63, 0, 0]);
    }

    #[test]
    fn test_invalid_scale() {
        assert!(matches!(
            compose_ppm(&checker(), 0, ""),
            Err(PublishError::Compose(_))
        ));
        assert!(compose_ppm(&checker(), MAX_SCALE + 1, "").is_err());
    }

    #[test]
    fn test_mismatched_buffer() {
        let frame = RasterFrame {
            width: 4,
            height: 4,
            pixels: vec![0; 3],
        };
        assert!(compose_ppm(&frame, 1, "").is_err());
    }
}
