//! Image decoding with EXIF orientation applied.

use facematch_core::CaptureError;
use image::{DynamicImage, ImageDecoder, ImageReader, RgbImage};
use std::io::Cursor;

/// Decode encoded image bytes (JPEG, PNG, BMP, ...) into upright RGB.
pub fn decode_upright(bytes: &[u8]) -> Result<RgbImage, CaptureError> {
    let invalid = |e: &dyn std::fmt::Display| CaptureError::InvalidImage(e.to_string());

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| invalid(&e))?;
    let mut decoder = reader.into_decoder().map_err(|e| invalid(&e))?;
    let orientation = decoder.orientation().map_err(|e| invalid(&e))?;

    let mut img = DynamicImage::from_decoder(decoder).map_err(|e| invalid(&e))?;
    img.apply_orientation(orientation);
    Ok(img.to_rgb8())
}
