use crate::error::PrepError;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;

use super::types::ensure_non_empty;

/// Decode raw upload bytes, sniffing the format from the content.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, PrepError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| PrepError::Decode(e.to_string()))?;

    if reader.format().is_none() {
        return Err(PrepError::Decode("unrecognized image format".to_string()));
    }

    let image = reader
        .decode()
        .map_err(|e| PrepError::Decode(e.to_string()))?;
    ensure_non_empty(&image)?;
    Ok(image)
}

/// Encode as PNG for callers that need bytes back.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, PrepError> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| PrepError::Encode(e.to_string()))?;
    Ok(buffer.into_inner())
}
