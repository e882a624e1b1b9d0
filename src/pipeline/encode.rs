//! Image encoding: page raster → base64 PNG wrapped in `ImageData`.
//!
//! Drawing rasters at 300 DPI are far larger than any vision API accepts, so
//! the page is downscaled to fit `max_edge` first. The applied scale travels
//! with the payload; [`super::postprocess`] divides it back out so bounding
//! boxes always refer to the stored full-size raster.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Longest edge sent to the vision model.
pub const DEFAULT_MAX_EDGE: u32 = 2048;

/// A page ready for the VLM request body.
#[derive(Debug, Clone)]
pub struct EncodedPage {
    pub data: ImageData,
    /// `sent_pixels / raster_pixels`; 1.0 when no downscale was needed.
    pub scale: f32,
    pub sent_width: u32,
    pub sent_height: u32,
}

/// Encode a rasterised page as a base64 PNG, downscaled to `max_edge`.
///
/// PNG rather than JPEG: balloon numerals are a few pixels tall after
/// downscaling and JPEG ringing turns a 3 into an 8.
pub fn encode_page(img: &DynamicImage, max_edge: u32) -> Result<EncodedPage, image::ImageError> {
    let (w, h) = (img.width(), img.height());
    let longest = w.max(h).max(1);
    let (sent, scale) = if longest > max_edge {
        let scale = max_edge as f32 / longest as f32;
        let nw = ((w as f32 * scale).round() as u32).max(1);
        let nh = ((h as f32 * scale).round() as u32).max(1);
        (img.resize_exact(nw, nh, FilterType::Triangle), scale)
    } else {
        (img.clone(), 1.0)
    };

    let mut buf = Vec::new();
    sent.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded page {}x{} → {}x{} ({} bytes base64)",
        w,
        h,
        sent.width(),
        sent.height(),
        b64.len()
    );

    Ok(EncodedPage {
        data: ImageData::new(b64, "image/png").with_detail("high"),
        scale,
        sent_width: sent.width(),
        sent_height: sent.height(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn small_image_is_not_scaled() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let page = encode_page(&img, 2048).expect("encode should succeed");
        assert_eq!(page.scale, 1.0);
        assert_eq!(page.data.mime_type, "image/png");
        let decoded = STANDARD.decode(&page.data.data).expect("valid base64");
        assert!(!decoded.is_empty());
    }

    #[test]
    fn large_image_is_downscaled_preserving_aspect() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(400, 200, Rgba([0, 0, 0, 255])));
        let page = encode_page(&img, 100).unwrap();
        assert_eq!(page.sent_width, 100);
        assert_eq!(page.sent_height, 50);
        assert!((page.scale - 0.25).abs() < f32::EPSILON);
    }
}
