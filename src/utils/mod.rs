//! Utility modules for common operations

pub mod preprocessing;
pub mod validation;

// Re-export commonly used items for convenience
pub use preprocessing::ImagePreprocessor;
pub use validation::TensorValidator;
