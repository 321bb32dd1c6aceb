use std::collections::HashMap;

use image::RgbaImage;

use crate::error::{AppError, AppResult};
use crate::image::containers::{icns, ico, png, zip_bundle};
use crate::image::{raster, render, svg};
use crate::job::{Artifact, JobInputs, OutputFormat, SourceType};

enum PreparedSource {
    Svg(usvg::Tree),
    Raster(RgbaImage),
}

impl PreparedSource {
    fn render_to_max_dim(&self, dim: u32) -> AppResult<RgbaImage> {
        match self {
            PreparedSource::Svg(tree) => svg::render_to_max_dim(tree, dim),
            PreparedSource::Raster(img) => raster::render_to_max_dim(img, dim),
        }
    }

    fn raster_bound(&self) -> Option<u32> {
        match self {
            PreparedSource::Svg(_) => None,
            PreparedSource::Raster(img) => Some(img.width()),
        }
    }
}

/// The image pipeline's entry point: renders `inputs.source_bytes` into the
/// requested container(s) and returns the finished artifact(s).
pub fn convert(inputs: &JobInputs) -> AppResult<Vec<Artifact>> {
    let source = prepare_source(inputs)?;
    let base_name = base_filename(&inputs.original_filename);

    match inputs.format {
        OutputFormat::Ico => {
            let pngs = render_sized_pngs(&source, inputs, &ico::ICO_SIZES, false)?;
            let bytes = ico::pack(&pngs);
            Ok(vec![Artifact {
                bytes,
                filename: format!("{base_name}.ico"),
                mime_type: OutputFormat::Ico.mime_type(),
            }])
        }
        OutputFormat::Favicon => {
            let pngs = render_sized_pngs(&source, inputs, &ico::FAVICON_SIZES, false)?;
            let bytes = ico::pack(&pngs);
            Ok(vec![Artifact {
                bytes,
                filename: format!("{base_name}-favicon.ico"),
                mime_type: OutputFormat::Favicon.mime_type(),
            }])
        }
        OutputFormat::Icns => {
            let sizes = icns::unique_sizes();
            let pngs = render_sized_pngs(&source, inputs, &sizes, true)?;
            let bytes = icns::pack(&pngs.into_iter().collect::<HashMap<_, _>>());
            Ok(vec![Artifact {
                bytes,
                filename: format!("{base_name}.icns"),
                mime_type: OutputFormat::Icns.mime_type(),
            }])
        }
        OutputFormat::Png => {
            let bytes = render_output_png(&source, inputs, inputs.png_options.size)?;
            Ok(vec![Artifact {
                bytes,
                filename: format!("{base_name}.png"),
                mime_type: OutputFormat::Png.mime_type(),
            }])
        }
        OutputFormat::All => render_all(&source, inputs, &base_name),
    }
}

fn prepare_source(inputs: &JobInputs) -> AppResult<PreparedSource> {
    match inputs.source_type {
        SourceType::Svg => {
            let text = std::str::from_utf8(&inputs.source_bytes)
                .map_err(|_| AppError::InvalidSource)?;
            let view_box = svg::parse_view_box(text);
            let preprocessed = svg::apply_bg_removal(text, &inputs.bg_removal, view_box)?;
            let tree = svg::load_tree(&preprocessed)?;
            Ok(PreparedSource::Svg(tree))
        }
        SourceType::Png => {
            let dims = inputs.source_dimensions.ok_or(AppError::InvalidSource)?;
            let decoded = raster::decode(&inputs.source_bytes, dims)?;
            let squared = raster::cover_fit_square(&decoded);
            Ok(PreparedSource::Raster(squared))
        }
    }
}

/// Renders one embedded PNG per size (not subject to `png_options`'s
/// colorspace/depth/DPI, which only apply to the standalone PNG output).
fn render_sized_pngs(
    source: &PreparedSource,
    inputs: &JobInputs,
    sizes: &[u32],
    apply_icns_inset: bool,
) -> AppResult<Vec<(u32, Vec<u8>)>> {
    let filtered = filter_sizes(sizes, source.raster_bound());
    if filtered.is_empty() {
        return Err(too_small_error(sizes, source.raster_bound()));
    }

    let mut out = Vec::new();
    for size in filtered {
        let scale = if apply_icns_inset {
            inputs.scale_percent * icns::MACOS_INSET_FACTOR
        } else {
            inputs.scale_percent
        };
        let rendered = render::render_at_scale(
            |dim| source.render_to_max_dim(dim),
            size,
            scale,
            source.raster_bound(),
        )?;
        let final_image = render::apply_corner_radius(&rendered, size, inputs.corner_radius_percent);
        validate_exact_size(&final_image, size)?;
        let bytes = png::encode_with_dpi(&final_image, 72)?;
        out.push((size, bytes));
    }
    Ok(out)
}

fn render_output_png(source: &PreparedSource, inputs: &JobInputs, size: u32) -> AppResult<Vec<u8>> {
    let filtered = filter_sizes(&[size], source.raster_bound());
    if filtered.is_empty() {
        return Err(too_small_error(&[size], source.raster_bound()));
    }
    let rendered = render::render_at_scale(
        |dim| source.render_to_max_dim(dim),
        size,
        inputs.scale_percent,
        source.raster_bound(),
    )?;
    let with_radius = render::apply_corner_radius(&rendered, size, inputs.corner_radius_percent);
    validate_exact_size(&with_radius, size)?;
    let recolored = png::apply_colorspace(&with_radius, inputs.png_options.colorspace);
    let depth_adjusted = png::apply_color_depth(&recolored, inputs.png_options.color_depth);
    png::encode_with_dpi(&depth_adjusted, inputs.png_options.dpi)
}

fn render_all(source: &PreparedSource, inputs: &JobInputs, base_name: &str) -> AppResult<Vec<Artifact>> {
    let mut artifacts = Vec::new();

    if let Ok(pngs) = render_sized_pngs(source, inputs, &ico::ICO_SIZES, false) {
        artifacts.push(Artifact {
            bytes: ico::pack(&pngs),
            filename: format!("{base_name}.ico"),
            mime_type: OutputFormat::Ico.mime_type(),
        });
    }
    if let Ok(pngs) = render_sized_pngs(source, inputs, &ico::FAVICON_SIZES, false) {
        artifacts.push(Artifact {
            bytes: ico::pack(&pngs),
            filename: format!("{base_name}-favicon.ico"),
            mime_type: OutputFormat::Favicon.mime_type(),
        });
    }
    if let Ok(pngs) = render_sized_pngs(source, inputs, &icns::unique_sizes(), true) {
        artifacts.push(Artifact {
            bytes: icns::pack(&pngs.into_iter().collect::<HashMap<_, _>>()),
            filename: format!("{base_name}.icns"),
            mime_type: OutputFormat::Icns.mime_type(),
        });
    }

    let max_png_size = match source.raster_bound() {
        Some(bound) => 1024u32.min(bound),
        None => 1024,
    };
    if let Ok(bytes) = render_output_png(source, inputs, max_png_size) {
        artifacts.push(Artifact {
            bytes,
            filename: format!("{base_name}.png"),
            mime_type: "image/png",
        });
    }

    artifacts.push(Artifact {
        bytes: inputs.source_bytes.clone(),
        filename: format!(
            "{base_name}-original.{}",
            match inputs.source_type {
                SourceType::Svg => "svg",
                SourceType::Png => "png",
            }
        ),
        mime_type: match inputs.source_type {
            SourceType::Svg => "image/svg+xml",
            SourceType::Png => "image/png",
        },
    });

    if artifacts.len() <= 1 {
        return Err(AppError::SourceTooSmall {
            detail: "source is too small to produce any requested container".to_string(),
        });
    }

    let zip_bytes = zip_bundle::bundle(&artifacts)?;
    Ok(vec![Artifact {
        bytes: zip_bytes,
        filename: format!("{base_name}.zip"),
        mime_type: OutputFormat::All.mime_type(),
    }])
}

fn filter_sizes(sizes: &[u32], raster_bound: Option<u32>) -> Vec<u32> {
    match raster_bound {
        Some(bound) => sizes.iter().copied().filter(|s| *s <= bound).collect(),
        None => sizes.to_vec(),
    }
}

fn too_small_error(requested: &[u32], raster_bound: Option<u32>) -> AppError {
    let min_required = requested.iter().min().copied().unwrap_or(0);
    AppError::SourceTooSmall {
        detail: match raster_bound {
            Some(bound) => format!(
                "source is {bound}px; this format requires at least {min_required}px"
            ),
            None => format!("source cannot satisfy the minimum size of {min_required}px"),
        },
    }
}

fn validate_exact_size(img: &RgbaImage, size: u32) -> AppResult<()> {
    if img.width() != size || img.height() != size {
        return Err(AppError::RenderFailed {
            reason: format!(
                "rendered {}x{} but expected exactly {size}x{size}",
                img.width(),
                img.height()
            ),
        });
    }
    Ok(())
}

fn base_filename(original_filename: &str) -> String {
    std::path::Path::new(original_filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("icon")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{BgRemoval, ColorDepth, Colorspace, PngOptions};

    fn svg_inputs(svg: &str, format: OutputFormat, size: u32) -> JobInputs {
        JobInputs {
            source_type: SourceType::Svg,
            source_bytes: svg.as_bytes().to_vec(),
            original_filename: "logo.svg".to_string(),
            format,
            scale_percent: 100.0,
            corner_radius_percent: 0.0,
            bg_removal: BgRemoval::None,
            png_options: PngOptions {
                size,
                dpi: 72,
                colorspace: Colorspace::Srgb,
                color_depth: ColorDepth::ThirtyTwo,
            },
            source_dimensions: None,
        }
    }

    #[test]
    fn ico_happy_path_produces_six_sizes() {
        let svg = r#"<svg viewBox="0 0 100 100"><rect width="100" height="100" fill="red"/></svg>"#;
        let inputs = svg_inputs(svg, OutputFormat::Ico, 256);
        let artifacts = convert(&inputs).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].filename, "logo.ico");
        // directory entry count lives at bytes [4..6) little-endian
        let count = u16::from_le_bytes([artifacts[0].bytes[4], artifacts[0].bytes[5]]);
        assert_eq!(count, 6);
    }

    #[test]
    fn smart_bg_removal_yields_transparent_corners() {
        let svg = r#"<svg viewBox="0 0 100 100"><rect width="100" height="100" fill="#ffffff"/><circle cx="50" cy="50" r="20" fill="blue"/></svg>"#;
        let mut inputs = svg_inputs(svg, OutputFormat::Png, 256);
        inputs.bg_removal = BgRemoval::Smart;
        let artifacts = convert(&inputs).unwrap();
        let decoded = image::load_from_memory(&artifacts[0].bytes).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (256, 256));
        assert_eq!(decoded.get_pixel(0, 0).0[3], 0);
    }

    #[test]
    fn png_source_no_upscale_limits_icns_sizes() {
        let raster = RgbaImage::from_pixel(64, 64, image::Rgba([0, 255, 0, 255]));
        let mut png_bytes = Vec::new();
        {
            use std::io::Cursor;
            image::DynamicImage::ImageRgba8(raster)
                .write_to(&mut Cursor::new(&mut png_bytes), image::ImageFormat::Png)
                .unwrap();
        }
        let inputs = JobInputs {
            source_type: SourceType::Png,
            source_bytes: png_bytes,
            original_filename: "logo.png".to_string(),
            format: OutputFormat::Icns,
            scale_percent: 100.0,
            corner_radius_percent: 0.0,
            bg_removal: BgRemoval::None,
            png_options: PngOptions {
                size: 512,
                dpi: 72,
                colorspace: Colorspace::Srgb,
                color_depth: ColorDepth::ThirtyTwo,
            },
            source_dimensions: Some(crate::job::SourceDimensions {
                width: 64,
                height: 64,
            }),
        };
        let artifacts = convert(&inputs).unwrap();
        assert_eq!(artifacts.len(), 1);

        let present = parse_icns_os_types(&artifacts[0].bytes);
        for os_type in ["ic07", "ic08", "ic09", "ic10", "ic13", "ic14"] {
            assert!(
                !present.contains(os_type),
                "unexpected oversized osType {os_type} present"
            );
        }
        for os_type in ["icp4", "icp5", "icp6", "ic11", "ic12"] {
            assert!(present.contains(os_type), "expected osType {os_type}");
        }
    }

    fn parse_icns_os_types(bytes: &[u8]) -> std::collections::HashSet<String> {
        let mut out = std::collections::HashSet::new();
        let mut cursor = 8;
        while cursor + 8 <= bytes.len() {
            let os_type = String::from_utf8_lossy(&bytes[cursor..cursor + 4]).to_string();
            let len = u32::from_be_bytes(bytes[cursor + 4..cursor + 8].try_into().unwrap()) as usize;
            out.insert(os_type);
            if len < 8 {
                break;
            }
            cursor += len;
        }
        out
    }

    #[test]
    fn png_source_too_small_fails_with_source_too_small() {
        let raster = RgbaImage::from_pixel(12, 12, image::Rgba([0, 0, 255, 255]));
        let mut png_bytes = Vec::new();
        {
            use std::io::Cursor;
            image::DynamicImage::ImageRgba8(raster)
                .write_to(&mut Cursor::new(&mut png_bytes), image::ImageFormat::Png)
                .unwrap();
        }
        let inputs = JobInputs {
            source_type: SourceType::Png,
            source_bytes: png_bytes,
            original_filename: "tiny.png".to_string(),
            format: OutputFormat::Icns,
            scale_percent: 100.0,
            corner_radius_percent: 0.0,
            bg_removal: BgRemoval::None,
            png_options: PngOptions {
                size: 512,
                dpi: 72,
                colorspace: Colorspace::Srgb,
                color_depth: ColorDepth::ThirtyTwo,
            },
            source_dimensions: Some(crate::job::SourceDimensions {
                width: 12,
                height: 12,
            }),
        };
        let err = convert(&inputs).unwrap_err();
        assert!(matches!(err, AppError::SourceTooSmall { .. }));
    }
}
