use image::{imageops, Rgba, RgbaImage};

use crate::error::AppResult;

/// Renders a source to an exact `s x s` canvas, branching on `scale_percent`
/// per the pipeline's scale step. `render_fn` renders the preprocessed
/// source (SVG tree or squared raster) to a bounding dimension; `raster_bound`
/// is `Some(side)` for raster sources to enforce the no-upscale clamp on the
/// `>100%` branch.
pub fn render_at_scale(
    render_fn: impl Fn(u32) -> AppResult<RgbaImage>,
    s: u32,
    scale_percent: f64,
    raster_bound: Option<u32>,
) -> AppResult<RgbaImage> {
    if scale_percent <= 100.0 {
        let icon_size = ((s as f64 * scale_percent / 100.0).round() as u32).max(1);
        let rendered = render_fn(icon_size)?;
        Ok(pad_to_canvas(&rendered, s))
    } else {
        let mut render_size = ((s as f64 * scale_percent / 100.0).round() as u32).max(1);
        if let Some(bound) = raster_bound {
            render_size = render_size.min(bound);
        }
        let rendered = render_fn(render_size)?;
        let square_side = rendered.width().max(rendered.height());
        let squared = pad_to_canvas(&rendered, square_side);
        Ok(center_extract_and_resize(&squared, s))
    }
}

/// Centers `img` inside a transparent `canvas x canvas` square, distributing
/// the odd extra padding pixel to the leading (left/top) side.
fn pad_to_canvas(img: &RgbaImage, canvas: u32) -> RgbaImage {
    let (rw, rh) = img.dimensions();
    if rw >= canvas && rh >= canvas {
        return img.clone();
    }
    let pad_lead = |canvas: u32, dim: u32| -> u32 {
        let extra = canvas.saturating_sub(dim);
        (extra as f64 / 2.0).round() as u32
    };
    let left = pad_lead(canvas, rw);
    let top = pad_lead(canvas, rh);

    let mut out = RgbaImage::from_pixel(canvas, canvas, Rgba([0, 0, 0, 0]));
    imageops::overlay(&mut out, img, left as i64, top as i64);
    out
}

/// Extracts a centered `s x s` region from a square canvas, clamping the
/// offset to `>= 0` and the extracted size to fit, then force-resizes to
/// exactly `s x s`.
fn center_extract_and_resize(squared: &RgbaImage, s: u32) -> RgbaImage {
    let canvas = squared.width();
    let offset = ((canvas as i64 - s as i64) / 2).max(0) as u32;
    let extract = s.min(canvas.saturating_sub(offset)).max(1);
    let cropped = imageops::crop_imm(squared, offset, offset, extract, extract).to_image();
    if cropped.width() == s && cropped.height() == s {
        cropped
    } else {
        imageops::resize(&cropped, s, s, imageops::FilterType::Lanczos3)
    }
}

/// Composites a rounded-rectangle alpha mask onto `img` with destination-in
/// semantics, then force-resizes to exactly `s x s`.
pub fn apply_corner_radius(img: &RgbaImage, s: u32, corner_radius_percent: f64) -> RgbaImage {
    if corner_radius_percent <= 0.0 {
        return img.clone();
    }
    let radius = (corner_radius_percent / 100.0) * s as f64;
    let mut out = img.clone();
    for y in 0..out.height() {
        for x in 0..out.width() {
            let mask_alpha = rounded_rect_alpha(x as f64 + 0.5, y as f64 + 0.5, s as f64, radius);
            let pixel = out.get_pixel_mut(x, y);
            let combined = (pixel.0[3] as u16 * mask_alpha as u16 / 255) as u8;
            pixel.0[3] = combined;
        }
    }
    if out.width() == s && out.height() == s {
        out
    } else {
        imageops::resize(&out, s, s, imageops::FilterType::Lanczos3)
    }
}

fn rounded_rect_alpha(x: f64, y: f64, side: f64, radius: f64) -> u8 {
    if radius <= 0.0 {
        return 255;
    }
    let radius = radius.min(side / 2.0);
    let in_left = x < radius;
    let in_right = x > side - radius;
    let in_top = y < radius;
    let in_bottom = y > side - radius;

    if (in_left || in_right) && (in_top || in_bottom) {
        let cx = if in_left { radius } else { side - radius };
        let cy = if in_top { radius } else { side - radius };
        let dist = ((x - cx).powi(2) + (y - cy).powi(2)).sqrt();
        if dist <= radius {
            255
        } else {
            0
        }
    } else {
        255
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, 255]))
    }

    #[test]
    fn scale_50_centers_half_size_render_in_canvas() {
        let out = render_at_scale(|dim| Ok(solid(dim, dim)), 64, 50.0, None).unwrap();
        assert_eq!(out.dimensions(), (64, 64));
        assert_eq!(out.get_pixel(0, 0).0[3], 0);
        assert_eq!(out.get_pixel(32, 32).0[3], 255);
    }

    #[test]
    fn scale_200_crops_to_exact_canvas() {
        let out = render_at_scale(|dim| Ok(solid(dim, dim)), 64, 200.0, None).unwrap();
        assert_eq!(out.dimensions(), (64, 64));
        assert_eq!(out.get_pixel(0, 0).0[3], 255);
    }

    #[test]
    fn corner_radius_50_on_square_zeroes_corner_alpha() {
        let img = solid(64, 64);
        let rounded = apply_corner_radius(&img, 64, 50.0);
        assert_eq!(rounded.get_pixel(0, 0).0[3], 0);
        assert_eq!(rounded.get_pixel(32, 32).0[3], 255);
    }

    #[test]
    fn corner_radius_zero_is_noop() {
        let img = solid(32, 32);
        let rounded = apply_corner_radius(&img, 32, 0.0);
        assert_eq!(rounded.get_pixel(0, 0).0[3], 255);
    }
}
