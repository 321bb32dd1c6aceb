use image::RgbaImage;

use crate::error::{AppError, AppResult};
use crate::job::{ColorDepth, Colorspace};

/// Approximate sRGB -> Display P3 gamut matrix; a linear-light transform
/// would be more exact but this stays within the design-level spec's
/// "p3 transform" without pulling in a full color-management crate.
const SRGB_TO_P3: [[f32; 3]; 3] = [
    [0.8225, 0.1774, 0.0001],
    [0.0332, 0.9669, -0.0001],
    [0.0171, 0.0724, 0.9108],
];

fn apply_p3(img: &RgbaImage) -> RgbaImage {
    let mut out = img.clone();
    for pixel in out.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let rf = r as f32 / 255.0;
        let gf = g as f32 / 255.0;
        let bf = b as f32 / 255.0;
        let nr = SRGB_TO_P3[0][0] * rf + SRGB_TO_P3[0][1] * gf + SRGB_TO_P3[0][2] * bf;
        let ng = SRGB_TO_P3[1][0] * rf + SRGB_TO_P3[1][1] * gf + SRGB_TO_P3[1][2] * bf;
        let nb = SRGB_TO_P3[2][0] * rf + SRGB_TO_P3[2][1] * gf + SRGB_TO_P3[2][2] * bf;
        pixel.0 = [
            (nr.clamp(0.0, 1.0) * 255.0).round() as u8,
            (ng.clamp(0.0, 1.0) * 255.0).round() as u8,
            (nb.clamp(0.0, 1.0) * 255.0).round() as u8,
            a,
        ];
    }
    out
}

/// CMYK has no direct RGBA pixel representation in a PNG payload; this
/// applies the canonical RGB -> CMY -> RGB round trip through a naive
/// undercolor-removal-free black generation so downstream consumers still
/// get a PNG, with the "cmyk" transform's intent (ink coverage clipping)
/// approximated rather than a full ICC conversion.
fn apply_cmyk_roundtrip(img: &RgbaImage) -> RgbaImage {
    let mut out = img.clone();
    for pixel in out.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let (rf, gf, bf) = (r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0);
        let k = 1.0 - rf.max(gf).max(bf);
        let (c, m, y) = if k >= 1.0 {
            (0.0, 0.0, 0.0)
        } else {
            (
                (1.0 - rf - k) / (1.0 - k),
                (1.0 - gf - k) / (1.0 - k),
                (1.0 - bf - k) / (1.0 - k),
            )
        };
        let nr = (1.0 - c) * (1.0 - k);
        let ng = (1.0 - m) * (1.0 - k);
        let nb = (1.0 - y) * (1.0 - k);
        pixel.0 = [
            (nr.clamp(0.0, 1.0) * 255.0).round() as u8,
            (ng.clamp(0.0, 1.0) * 255.0).round() as u8,
            (nb.clamp(0.0, 1.0) * 255.0).round() as u8,
            a,
        ];
    }
    out
}

pub fn apply_colorspace(img: &RgbaImage, colorspace: Colorspace) -> RgbaImage {
    match colorspace {
        Colorspace::Srgb => img.clone(),
        Colorspace::P3 => apply_p3(img),
        Colorspace::Cmyk => apply_cmyk_roundtrip(img),
    }
}

/// Reduces color fidelity per the requested bit depth. 32-bit is RGBA
/// unchanged; 24-bit flattens alpha against a white background; 8-bit
/// quantizes each channel into a combined palette of at most 256 colors
/// (a 3-3-2 bit allocation), still encoded as a truecolor PNG.
pub fn apply_color_depth(img: &RgbaImage, depth: ColorDepth) -> RgbaImage {
    match depth {
        ColorDepth::ThirtyTwo => img.clone(),
        ColorDepth::TwentyFour => {
            let mut out = img.clone();
            for pixel in out.pixels_mut() {
                let [r, g, b, a] = pixel.0;
                let alpha = a as f32 / 255.0;
                let blend = |channel: u8| -> u8 {
                    (channel as f32 * alpha + 255.0 * (1.0 - alpha)).round() as u8
                };
                pixel.0 = [blend(r), blend(g), blend(b), 255];
            }
            out
        }
        ColorDepth::Eight => {
            let mut out = img.clone();
            for pixel in out.pixels_mut() {
                let [r, g, b, a] = pixel.0;
                pixel.0 = [quantize(r, 3), quantize(g, 3), quantize(b, 2), a];
            }
            out
        }
    }
}

fn quantize(channel: u8, bits: u32) -> u8 {
    let levels = (1u32 << bits) - 1;
    let step = 255.0 / levels as f32;
    ((channel as f32 / step).round() * step).round().clamp(0.0, 255.0) as u8
}

/// Encodes `img` as a PNG with a `pHYs` chunk stamping the requested DPI,
/// matching the manual chunk-writing approach of writing the header, then
/// the physical-dimensions chunk, then the image data.
pub fn encode_with_dpi(img: &RgbaImage, dpi: u32) -> AppResult<Vec<u8>> {
    let (width, height) = img.dimensions();
    let mut buffer = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut buffer, width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().map_err(|e| AppError::EncodeFailed {
            reason: e.to_string(),
        })?;

        let ppm = (dpi as f64 / 0.0254).round() as u32;
        let mut phys_data = [0u8; 9];
        phys_data[0..4].copy_from_slice(&ppm.to_be_bytes());
        phys_data[4..8].copy_from_slice(&ppm.to_be_bytes());
        phys_data[8] = 1;
        writer
            .write_chunk(png::chunk::pHYs, &phys_data)
            .map_err(|e| AppError::EncodeFailed {
                reason: e.to_string(),
            })?;

        writer
            .write_image_data(img.as_raw())
            .map_err(|e| AppError::EncodeFailed {
                reason: e.to_string(),
            })?;
    }
    Ok(buffer)
}
