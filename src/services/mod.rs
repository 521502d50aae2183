//! Services for image decoding, mask rendering and encoding

pub mod format;
pub mod io;
pub mod render;

pub use format::{PngEncoder, COMPOSITE_FILE_NAME, DEFAULT_EXPORT_FILE_NAME, OVERLAY_FILE_NAME};
pub use io::ImageIOService;
pub use render::MaskRenderer;
