use once_cell::sync::Lazy;
use regex::Regex;
use tiny_skia::Transform;

use crate::error::{AppError, AppResult};
use crate::job::BgRemoval;

/// The logical `(x, y, width, height)` coordinate box an SVG renders into.
#[derive(Debug, Clone, Copy)]
pub struct ViewBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ViewBox {
    pub fn max_dim(&self) -> f64 {
        self.width.max(self.height)
    }
}

static VIEWBOX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<svg\b[^>]*\bviewBox\s*=\s*"([^"]+)""#).unwrap()
});
static WIDTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<svg\b[^>]*\bwidth\s*=\s*"([0-9.]+)[a-z%]*""#).unwrap());
static HEIGHT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<svg\b[^>]*\bheight\s*=\s*"([0-9.]+)[a-z%]*""#).unwrap());

/// Parses `viewBox`, falling back to `width`/`height`, falling back to a
/// 100x100 default box, per the preprocessing step of the pipeline.
pub fn parse_view_box(svg_text: &str) -> ViewBox {
    if let Some(caps) = VIEWBOX_RE.captures(svg_text) {
        let parts: Vec<f64> = caps[1]
            .split_whitespace()
            .filter_map(|p| p.parse::<f64>().ok())
            .collect();
        if parts.len() == 4 && parts[2] > 0.0 && parts[3] > 0.0 {
            return ViewBox {
                x: parts[0],
                y: parts[1],
                width: parts[2],
                height: parts[3],
            };
        }
    }
    let width = WIDTH_RE
        .captures(svg_text)
        .and_then(|c| c[1].parse::<f64>().ok());
    let height = HEIGHT_RE
        .captures(svg_text)
        .and_then(|c| c[1].parse::<f64>().ok());
    match (width, height) {
        (Some(w), Some(h)) if w > 0.0 && h > 0.0 => ViewBox {
            x: 0.0,
            y: 0.0,
            width: w,
            height: h,
        },
        _ => ViewBox {
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 100.0,
        },
    }
}

static TOP_LEVEL_SHAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<(rect|circle|ellipse)\b([^>]*?)/?>"#).unwrap());
static FILL_ATTR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?is)fill\s*=\s*"([^"]*)""#).unwrap());
static FILL_STYLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)fill\s*:\s*([^;"']+)"#).unwrap());
static STYLE_ATTR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?is)style\s*=\s*"([^"]*)""#).unwrap());

fn attr_f64(attrs: &str, name: &str) -> Option<f64> {
    Regex::new(&format!(r#"(?is)\b{name}\s*=\s*"([0-9.+-]+)""#))
        .ok()?
        .captures(attrs)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

fn shape_fill(attrs_and_tag: &str) -> Option<String> {
    if let Some(c) = FILL_ATTR_RE.captures(attrs_and_tag) {
        return Some(c[1].to_ascii_lowercase());
    }
    if let Some(style) = STYLE_ATTR_RE.captures(attrs_and_tag) {
        if let Some(c) = FILL_STYLE_RE.captures(&style[1]) {
            return Some(c[1].trim().to_ascii_lowercase());
        }
    }
    None
}

/// Detects whether a shape tag covers the view box within a 1% tolerance,
/// per the smart background-removal heuristic.
fn covers_view_box(tag: &str, attrs: &str, vb: ViewBox) -> bool {
    let tol = 0.99;
    match tag {
        "rect" => {
            let x = attr_f64(attrs, "x").unwrap_or(0.0);
            let y = attr_f64(attrs, "y").unwrap_or(0.0);
            let w = attr_f64(attrs, "width").unwrap_or(0.0);
            let h = attr_f64(attrs, "height").unwrap_or(0.0);
            x <= vb.x + vb.width * (1.0 - tol)
                && y <= vb.y + vb.height * (1.0 - tol)
                && w >= vb.width * tol
                && h >= vb.height * tol
        }
        "circle" => {
            let cx = attr_f64(attrs, "cx").unwrap_or(0.0);
            let cy = attr_f64(attrs, "cy").unwrap_or(0.0);
            let r = attr_f64(attrs, "r").unwrap_or(0.0);
            let min_dim = vb.width.min(vb.height);
            let center_x = vb.x + vb.width / 2.0;
            let center_y = vb.y + vb.height / 2.0;
            (cx - center_x).abs() <= vb.width * 0.05
                && (cy - center_y).abs() <= vb.height * 0.05
                && r >= 0.95 * min_dim / 2.0
        }
        "ellipse" => {
            let cx = attr_f64(attrs, "cx").unwrap_or(0.0);
            let cy = attr_f64(attrs, "cy").unwrap_or(0.0);
            let rx = attr_f64(attrs, "rx").unwrap_or(0.0);
            let ry = attr_f64(attrs, "ry").unwrap_or(0.0);
            let center_x = vb.x + vb.width / 2.0;
            let center_y = vb.y + vb.height / 2.0;
            (cx - center_x).abs() <= vb.width * 0.05
                && (cy - center_y).abs() <= vb.height * 0.05
                && rx >= 0.95 * vb.width / 2.0
                && ry >= 0.95 * vb.height / 2.0
        }
        _ => false,
    }
}

fn neutralize_fill(tag_text: &str) -> String {
    if FILL_ATTR_RE.is_match(tag_text) {
        return FILL_ATTR_RE
            .replace(tag_text, r#"fill="none""#)
            .into_owned();
    }
    if STYLE_ATTR_RE.is_match(tag_text) {
        return STYLE_ATTR_RE
            .replace(tag_text, |caps: &regex::Captures| {
                let replaced = FILL_STYLE_RE.replace(&caps[1], "fill:none");
                format!(r#"style="{replaced}""#)
            })
            .into_owned();
    }
    format!("{} fill=\"none\"", &tag_text[..tag_text.len() - 1])
        + if tag_text.ends_with("/>") { "/>" } else { ">" }
}

/// Applies the requested background-removal mode to the sanitized SVG text,
/// returning the possibly-modified source.
pub fn apply_bg_removal(svg_text: &str, mode: &BgRemoval, view_box: ViewBox) -> AppResult<String> {
    match mode {
        BgRemoval::None => Ok(svg_text.to_string()),
        BgRemoval::Smart => {
            for caps in TOP_LEVEL_SHAPE_RE.captures_iter(svg_text).take(3) {
                let tag = &caps[1];
                let attrs = &caps[2];
                let full = caps.get(0).unwrap().as_str();
                if let Some(fill) = shape_fill(full) {
                    if fill == "none" || fill == "transparent" {
                        continue;
                    }
                } else {
                    continue;
                }
                if covers_view_box(tag, attrs, view_box) {
                    let replaced = neutralize_fill(full);
                    return Ok(svg_text.replacen(full, &replaced, 1));
                }
            }
            Ok(svg_text.to_string())
        }
        BgRemoval::Color(hex) => {
            let mut result = svg_text.to_string();
            result = Regex::new(&format!(r#"(?i)fill\s*=\s*"{hex}""#))
                .unwrap()
                .replace_all(&result, r#"fill="none""#)
                .into_owned();
            result = Regex::new(&format!(r#"(?i)fill\s*:\s*{hex}"#))
                .unwrap()
                .replace_all(&result, "fill:none")
                .into_owned();
            Ok(result)
        }
    }
}

/// Parses sanitized SVG text into a render tree.
pub fn load_tree(svg_text: &str) -> AppResult<usvg::Tree> {
    let opt = usvg::Options::default();
    usvg::Tree::from_str(svg_text, &opt)
        .map_err(|e| AppError::RenderFailed {
            reason: e.to_string(),
        })
}

/// Renders `tree` scaled uniformly so its larger dimension equals `max_dim`,
/// returning the rendered buffer at its actual (possibly non-square) size.
pub fn render_to_max_dim(tree: &usvg::Tree, max_dim: u32) -> AppResult<image::RgbaImage> {
    let size = tree.size();
    let (iw, ih) = (size.width() as f64, size.height() as f64);
    if iw <= 0.0 || ih <= 0.0 {
        return Err(AppError::RenderFailed {
            reason: "source has zero intrinsic size".to_string(),
        });
    }
    let scale = max_dim as f64 / iw.max(ih);
    let render_w = ((iw * scale).round() as u32).max(1);
    let render_h = ((ih * scale).round() as u32).max(1);

    if render_w.saturating_mul(render_h) > 64_000_000 {
        return Err(AppError::TooComplex {
            reason: format!("requested render of {render_w}x{render_h} exceeds limits"),
        });
    }

    let mut pixmap = tiny_skia::Pixmap::new(render_w, render_h).ok_or_else(|| {
        AppError::RenderFailed {
            reason: "failed to allocate render buffer".to_string(),
        }
    })?;
    let transform = Transform::from_scale(scale as f32, scale as f32);
    resvg::render(tree, transform, &mut pixmap.as_mut());

    image::RgbaImage::from_raw(render_w, render_h, pixmap.data().to_vec()).ok_or_else(|| {
        AppError::RenderFailed {
            reason: "rendered buffer had unexpected size".to_string(),
        }
    })
}
