use image::{imageops, RgbaImage};

use crate::error::{AppError, AppResult};
use crate::job::SourceDimensions;

/// Decodes a PNG source and validates it matches the declared dimensions.
pub fn decode(source_bytes: &[u8], declared: SourceDimensions) -> AppResult<RgbaImage> {
    let img = image::load_from_memory(source_bytes)
        .map_err(|e| {
            log::warn!("png decode failed: {e}");
            AppError::InvalidSource
        })?
        .to_rgba8();
    if img.width() != declared.width || img.height() != declared.height {
        return Err(AppError::bad_input(format!(
            "sourceWidth/sourceHeight ({}x{}) do not match the uploaded PNG's actual dimensions ({}x{})",
            declared.width,
            declared.height,
            img.width(),
            img.height()
        )));
    }
    Ok(img)
}

/// Downsamples `img` to a square of side `min(w, h)` using cover-fit with
/// center positioning, per the PNG-source preprocessing step. Never upscales:
/// the resulting side is always `<= min(source_w, source_h)`.
pub fn cover_fit_square(img: &RgbaImage) -> RgbaImage {
    let (w, h) = img.dimensions();
    let side = w.min(h);
    let x_off = (w - side) / 2;
    let y_off = (h - side) / 2;
    imageops::crop_imm(img, x_off, y_off, side, side).to_image()
}

/// Renders a pre-squared raster source scaled to `max_dim x max_dim`,
/// matching the SVG render stage's "render to a bounding dimension" shape so
/// both source kinds flow through the same pad/crop logic afterward. Since
/// the source is already square this never needs aspect-preserving resize.
pub fn render_to_max_dim(square_source: &RgbaImage, max_dim: u32) -> AppResult<RgbaImage> {
    if max_dim == 0 {
        return Err(AppError::RenderFailed {
            reason: "requested render dimension is zero".to_string(),
        });
    }
    Ok(imageops::resize(
        square_source,
        max_dim,
        max_dim,
        imageops::FilterType::Lanczos3,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cover_fit_square_crops_to_min_dimension() {
        let img = RgbaImage::from_pixel(100, 60, image::Rgba([255, 0, 0, 255]));
        let squared = cover_fit_square(&img);
        assert_eq!(squared.dimensions(), (60, 60));
    }

    #[test]
    fn render_to_max_dim_never_exceeds_source_when_clamped() {
        let square = RgbaImage::from_pixel(64, 64, image::Rgba([0, 255, 0, 255]));
        let rendered = render_to_max_dim(&square, 32).unwrap();
        assert_eq!(rendered.dimensions(), (32, 32));
    }
}
