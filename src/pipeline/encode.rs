//! Figure encoding: raw rendition bytes → JPEG thumbnail wrapped in `ImageData`.
//!
//! Figure renditions can be full-page PNGs of several megabytes. The vision
//! model only needs enough detail for a one-paragraph description, so every
//! figure is fitted inside a square bounding box (never upscaled) and
//! re-encoded as JPEG at a fixed quality. `detail: "low"` keeps OpenAI-class
//! models on a single tile.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::debug;

/// Decode `bytes`, fit them inside `max_px × max_px`, and JPEG-encode.
pub fn encode_thumbnail(bytes: &[u8], max_px: u32, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    write_jpeg(fit_within(img, max_px), quality)
}

/// Re-encode any supported image as a full-size JPEG.
pub fn encode_jpeg(bytes: &[u8], quality: u8) -> Result<Vec<u8>, image::ImageError> {
    write_jpeg(image::load_from_memory(bytes)?, quality)
}

fn write_jpeg(img: DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;

    debug!(
        "JPEG {}x{} → {} bytes (q{})",
        rgb.width(),
        rgb.height(),
        buf.len(),
        quality
    );
    Ok(buf)
}

/// Encode a figure as a base64 JPEG thumbnail ready for the vision model.
pub fn encode_figure(bytes: &[u8], max_px: u32, quality: u8) -> Result<ImageData, image::ImageError> {
    let jpeg = encode_thumbnail(bytes, max_px, quality)?;
    Ok(ImageData::new(STANDARD.encode(&jpeg), "image/jpeg").with_detail("low"))
}

/// Shrink to fit inside the box, preserving aspect ratio. Smaller images
/// are returned unchanged.
fn fit_within(img: DynamicImage, max_px: u32) -> DynamicImage {
    if img.width() <= max_px && img.height() <= max_px {
        return img;
    }
    img.resize(max_px, max_px, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([0, 128, 255, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .expect("png encode");
        buf
    }

    #[test]
    fn large_image_fits_in_box_preserving_aspect() {
        let jpeg = encode_thumbnail(&png(1200, 600), 300, 80).expect("encode");
        let out = image::load_from_memory(&jpeg).expect("decodes as image");
        assert_eq!(out.width(), 300);
        assert_eq!(out.height(), 150);
        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn small_image_is_not_upscaled() {
        let jpeg = encode_thumbnail(&png(40, 20), 300, 80).expect("encode");
        let out = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((out.width(), out.height()), (40, 20));
    }

    #[test]
    fn full_size_jpeg_keeps_dimensions() {
        let jpeg = encode_jpeg(&png(800, 500), 90).expect("encode");
        let out = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((out.width(), out.height()), (800, 500));
    }

    #[test]
    fn corrupt_bytes_are_an_error() {
        assert!(encode_thumbnail(b"definitely not an image", 300, 80).is_err());
    }

    #[test]
    fn encode_figure_is_base64_jpeg() {
        let data = encode_figure(&png(10, 10), 300, 80).expect("encode");
        assert_eq!(data.mime_type, "image/jpeg");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(image::guess_format(&decoded).unwrap(), ImageFormat::Jpeg);
    }
}
