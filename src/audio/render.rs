//! Grayscale PNG rendering of acoustic feature matrices.

use crate::error::{Result, TtsError};
use image::{GrayImage, Luma};
use std::path::Path;

/// How feature values are mapped to pixel intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderScale {
    /// `value * 255`, clipped to the byte range. Used for synthesized output.
    Clip,
    /// Stretch `[min, max]` of the matrix onto `[0, 255]`. Used for corpus previews.
    MinMax,
}

/// Render `[frames][order]` as an image `frames` wide and `order` tall.
///
/// Row 0 of the image is the highest feature band.
pub fn render_features(frames: &[Vec<f32>], scale: RenderScale) -> Result<GrayImage> {
    let width = frames.len();
    let height = frames.first().map(Vec::len).unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(TtsError::DataIntegrity(
            "cannot render an empty feature matrix".into(),
        ));
    }
    if frames.iter().any(|frame| frame.len() != height) {
        return Err(TtsError::DataIntegrity("ragged feature matrix".into()));
    }

    let (min, max) = frames
        .iter()
        .flatten()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    let range = max - min;

    let image = GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let band = height - 1 - y as usize;
        let value = frames[x as usize][band];
        let intensity = match scale {
            RenderScale::Clip => value * 255.0,
            RenderScale::MinMax if range > 0.0 => (value - min) / range * 255.0,
            RenderScale::MinMax => 0.0,
        };
        Luma([intensity.round().clamp(0.0, 255.0) as u8])
    });
    Ok(image)
}

/// Render and save a PNG.
pub fn save_png(path: impl AsRef<Path>, frames: &[Vec<f32>], scale: RenderScale) -> Result<()> {
    render_features(frames, scale)?.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_is_flipped_vertically() {
        let frames = vec![vec![0.0, 1.0], vec![0.5, 0.0]];
        let image = render_features(&frames, RenderScale::Clip).expect("render");
        assert_eq!(image.dimensions(), (2, 2));
        assert_eq!(image.get_pixel(0, 0)[0], 255);
        assert_eq!(image.get_pixel(0, 1)[0], 0);
        assert_eq!(image.get_pixel(1, 1)[0], 128);
    }

    #[test]
    fn min_max_stretches_range() {
        let frames = vec![vec![0.2, 0.4]];
        let image = render_features(&frames, RenderScale::MinMax).expect("render");
        assert_eq!(image.get_pixel(0, 0)[0], 255);
        assert_eq!(image.get_pixel(0, 1)[0], 0);
    }

    #[test]
    fn empty_matrix_is_rejected() {
        assert!(render_features(&[], RenderScale::Clip).is_err());
    }
}
