//! Page image → base64 PNG wrapped in `ImageData`.
//!
//! PNG keeps small print (GSTINs, HSN codes, amounts) crisp; JPEG artefacts
//! around digits are a common source of misread totals.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered page for the vision API, requesting high detail.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&png);
    debug!(
        "Encoded {}x{} page as {} bytes of base64",
        img.width(),
        img.height(),
        b64.len()
    );

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Encode raw PNG bytes that are already on hand (e.g. a test fixture).
pub fn encode_png_bytes(png: &[u8]) -> ImageData {
    ImageData::new(STANDARD.encode(png), "image/png").with_detail("high")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encoded_page_decodes_to_png() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 4, Rgba([0, 0, 0, 255])));
        let data = encode_page(&img).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let png = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(&png[1..4], b"PNG");
    }

    #[test]
    fn raw_bytes_are_wrapped_verbatim() {
        let data = encode_png_bytes(b"\x89PNG");
        assert_eq!(STANDARD.decode(&data.data).unwrap(), b"\x89PNG");
    }
}
