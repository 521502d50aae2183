//! Mask rendering service
//!
//! Turns a retained probability map and a threshold into pixels. Every
//! rendering here is a pure function of its inputs, so re-rendering with the
//! same map and threshold is byte-identical.

use crate::{
    config::OverlayStyle,
    types::{is_lesion, MaskStats, ProbabilityMap},
};
use image::{imageops::FilterType, DynamicImage, Rgba, RgbaImage};

/// Rasterizes probability maps into overlay, export and composite images
pub struct MaskRenderer;

impl MaskRenderer {
    /// Translucent highlight for layering over the photo
    ///
    /// Lesion pixels get the style color at the style's alpha; every other
    /// pixel is fully transparent. Alpha is binary, never graded by probability.
    #[must_use]
    pub fn render_overlay(map: &ProbabilityMap, threshold: f32, style: &OverlayStyle) -> RgbaImage {
        let [r, g, b] = style.color;
        let alpha = style.alpha();
        Self::render_with(map, threshold, |lesion| {
            Rgba([r, g, b, if lesion { alpha } else { 0 }])
        })
    }

    /// Standalone binary mask: lesion opaque white, background opaque black
    #[must_use]
    pub fn render_export(map: &ProbabilityMap, threshold: f32) -> RgbaImage {
        Self::render_with(map, threshold, |lesion| {
            let v = if lesion { 255 } else { 0 };
            Rgba([v, v, v, 255])
        })
    }

    /// Overlay alpha-blended onto the source image resampled to the map size
    #[must_use]
    pub fn render_composite(
        base: &DynamicImage,
        map: &ProbabilityMap,
        threshold: f32,
        style: &OverlayStyle,
    ) -> RgbaImage {
        let (width, height) = map.dimensions();
        let mut canvas = base.to_rgba8();
        if canvas.dimensions() != (width, height) {
            canvas = image::imageops::resize(&canvas, width, height, FilterType::Triangle);
        }
        let overlay = Self::render_overlay(map, threshold, style);
        image::imageops::overlay(&mut canvas, &overlay, 0, 0);
        canvas
    }

    /// Count lesion pixels at the given threshold
    #[must_use]
    pub fn stats(map: &ProbabilityMap, threshold: f32) -> MaskStats {
        MaskStats {
            threshold,
            lesion_pixels: map
                .values()
                .iter()
                .filter(|p| is_lesion(**p, threshold))
                .count(),
            total_pixels: map.len(),
        }
    }

    fn render_with<F>(map: &ProbabilityMap, threshold: f32, shade: F) -> RgbaImage
    where
        F: Fn(bool) -> Rgba<u8>,
    {
        let (width, height) = map.dimensions();
        let mut image = RgbaImage::new(width, height);
        for (pixel, probability) in image.pixels_mut().zip(map.values()) {
            *pixel = shade(is_lesion(*probability, threshold));
        }
        image
    }
}
