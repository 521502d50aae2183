//! Image decoding service
//!
//! Keeps file and byte decoding out of the processor. Anything that cannot be
//! turned into a usable bitmap is reported as `InvalidImage`.

use crate::{
    error::{LesionSegError, Result},
    utils::TensorValidator,
};
use image::DynamicImage;
use std::path::Path;

/// Service for loading source images
pub struct ImageIOService;

impl ImageIOService {
    /// Decode an image from encoded bytes (format detected from content)
    ///
    /// # Errors
    /// - `InvalidImage` if the bytes are not a decodable image or the image is degenerate
    pub fn decode_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(LesionSegError::invalid_image("Image data is empty"));
        }
        let image = image::load_from_memory(bytes)
            .map_err(|e| LesionSegError::invalid_image(format!("Failed to decode image: {e}")))?;
        TensorValidator::validate_image_dimensions(image.width(), image.height())?;
        Ok(image)
    }

    /// Load an image from a file path
    ///
    /// Extension-based detection is tried first, then content sniffing.
    ///
    /// # Errors
    /// - `Io` if the file cannot be read
    /// - `InvalidImage` if the contents cannot be decoded
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path_ref = path.as_ref();

        let data = std::fs::read(path_ref)
            .map_err(|e| LesionSegError::file_io_error("read image file", path_ref, &e))?;

        let format_hint = image::ImageFormat::from_path(path_ref).ok();
        let image = match format_hint.map(|format| image::load_from_memory_with_format(&data, format)) {
            Some(Ok(image)) => image,
            Some(Err(e)) => {
                log::debug!(
                    "Extension-based loading failed for {}: {}. Attempting content-based detection.",
                    path_ref.display(),
                    e
                );
                image::load_from_memory(&data).map_err(|content_err| {
                    LesionSegError::invalid_image(format!(
                        "Failed to decode {}: {content_err}",
                        path_ref.display()
                    ))
                })?
            },
            None => image::load_from_memory(&data).map_err(|e| {
                LesionSegError::invalid_image(format!("Failed to decode {}: {e}", path_ref.display()))
            })?,
        };

        TensorValidator::validate_image_dimensions(image.width(), image.height())?;
        Ok(image)
    }
}
