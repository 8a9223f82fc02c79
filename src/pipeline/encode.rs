//! PNG and base64 helpers shared by extraction, the VLM engine and the
//! serializer.
//!
//! PNG is lossless: text crispness matters more than size for both OCR and
//! archival output.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode an image as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// `data:image/png;base64,…` for inlining into Markdown and JSON.
pub fn png_data_uri(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

/// Wrap PNG bytes for a vision model request.
///
/// `detail: "high"` keeps the full tile budget on GPT-4-class models; fine
/// print and small tables are lost at `low`.
pub fn vision_image(png: &[u8]) -> ImageData {
    let b64 = STANDARD.encode(png);
    debug!("Encoded image → {} bytes base64", b64.len());
    ImageData::new(b64, "image/png").with_detail("high")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn red_square() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])))
    }

    #[test]
    fn png_bytes_have_signature() {
        let png = encode_png(&red_square()).expect("encode should succeed");
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn data_uri_is_decodable() {
        let png = encode_png(&red_square()).unwrap();
        let uri = png_data_uri(&png);
        let b64 = uri.strip_prefix("data:image/png;base64,").unwrap();
        assert_eq!(STANDARD.decode(b64).unwrap(), png);
    }

    #[test]
    fn vision_image_is_png() {
        let png = encode_png(&red_square()).unwrap();
        let data = vision_image(&png);
        assert_eq!(data.mime_type, "image/png");
        assert!(!data.data.is_empty());
    }
}
