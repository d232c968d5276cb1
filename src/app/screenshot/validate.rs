use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::ImageFormat;

pub const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

pub fn validate_png_bytes(bytes: &[u8]) -> Result<(), String> {
    if bytes.is_empty() {
        return Err("Screenshot data is empty".to_string());
    }
    if !bytes.starts_with(PNG_SIGNATURE) {
        return Err("Screenshot data is not a PNG".to_string());
    }
    Ok(())
}

/// Decodes base64 text as printed by the device (wrapped lines, CRLF from a pty) and
/// checks the result is PNG data.
pub fn decode_base64_png(text: &str) -> Result<Vec<u8>, String> {
    let compact: String = text.chars().filter(|ch| !ch.is_whitespace()).collect();
    if compact.is_empty() {
        return Err("Screenshot data is empty".to_string());
    }
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|err| format!("Screenshot data is not valid base64: {err}"))?;
    validate_png_bytes(&bytes)?;
    Ok(bytes)
}

/// Fully decodes the PNG at `path`.
pub fn confirm_png_file(path: &Path) -> Result<(), String> {
    let bytes = fs::read(path).map_err(|err| format!("Failed to read screenshot: {err}"))?;
    validate_png_bytes(&bytes)?;
    image::load_from_memory_with_format(&bytes, ImageFormat::Png)
        .map(|_| ())
        .map_err(|err| format!("Screenshot is not a decodable PNG: {err}"))
}

#[cfg(test)]
pub(crate) fn sample_png() -> Vec<u8> {
    use image::{DynamicImage, RgbImage};
    use std::io::Cursor;

    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 3, image::Rgb([10, 200, 30])));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}
