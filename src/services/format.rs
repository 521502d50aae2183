//! PNG encoding for rendered masks and overlays

use crate::error::{LesionSegError, Result};
use image::{ImageFormat, RgbaImage};
use std::io::Cursor;
use std::path::Path;

/// File name of the exported binary mask
pub const DEFAULT_EXPORT_FILE_NAME: &str = "mask_256.png";

/// File name of the translucent overlay written by the CLI
pub const OVERLAY_FILE_NAME: &str = "overlay.png";

/// File name of the overlay-on-photo preview written by the CLI
pub const COMPOSITE_FILE_NAME: &str = "composite.png";

/// Service for encoding rendered images
pub struct PngEncoder;

impl PngEncoder {
    /// Encode an RGBA image as PNG bytes
    ///
    /// # Examples
    /// ```rust
    /// use image::RgbaImage;
    /// use lesionseg::services::PngEncoder;
    ///
    /// let bytes = PngEncoder::encode(&RgbaImage::new(4, 4)).unwrap();
    /// assert_eq!(&bytes[1..4], b"PNG");
    /// ```
    ///
    /// # Errors
    /// - Encoder failure
    pub fn encode(image: &RgbaImage) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(|e| LesionSegError::internal(format!("Failed to encode PNG: {e}")))?;
        Ok(buffer.into_inner())
    }

    /// Encode and write a PNG file, creating parent directories as needed
    ///
    /// # Errors
    /// - Encoder failure
    /// - Directory creation or write failure
    pub fn write<P: AsRef<Path>>(image: &RgbaImage, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| LesionSegError::file_io_error("create output directory", parent, &e))?;
        }
        let bytes = Self::encode(image)?;
        std::fs::write(path, bytes)
            .map_err(|e| LesionSegError::file_io_error("write PNG", path, &e))
    }
}
