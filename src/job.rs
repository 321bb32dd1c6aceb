use std::time::Instant;

use crate::error::{AppError, AppResult};

/// Source media type detected from the uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Svg,
    Png,
}

/// Requested output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Ico,
    Icns,
    Favicon,
    Png,
    All,
}

impl OutputFormat {
    pub fn parse(raw: &str) -> AppResult<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "ico" => Ok(OutputFormat::Ico),
            "icns" => Ok(OutputFormat::Icns),
            "favicon" => Ok(OutputFormat::Favicon),
            "png" => Ok(OutputFormat::Png),
            // "both" is the source service's legacy synonym for "all"; we
            // normalize both tokens to a single variant.
            "all" | "both" => Ok(OutputFormat::All),
            other => Err(AppError::bad_input(format!(
                "format must be one of ico, icns, favicon, png, all; got '{other}'"
            ))),
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Ico | OutputFormat::Favicon => "image/x-icon",
            OutputFormat::Icns => "image/icns",
            OutputFormat::Png => "image/png",
            OutputFormat::All => "application/zip",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Ico | OutputFormat::Favicon => "ico",
            OutputFormat::Icns => "icns",
            OutputFormat::Png => "png",
            OutputFormat::All => "zip",
        }
    }
}

/// Background removal mode.
#[derive(Debug, Clone, PartialEq)]
pub enum BgRemoval {
    None,
    Color(String),
    Smart,
}

impl BgRemoval {
    pub fn parse(mode: &str, color: Option<&str>) -> AppResult<Self> {
        match mode.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(BgRemoval::None),
            "smart" => Ok(BgRemoval::Smart),
            "color" => {
                let hex = color.ok_or_else(|| {
                    AppError::bad_input("backgroundRemovalColor is required when mode is color")
                })?;
                Ok(BgRemoval::Color(normalize_hex_color(hex)?))
            }
            other => Err(AppError::bad_input(format!(
                "backgroundRemovalMode must be one of none, color, smart; got '{other}'"
            ))),
        }
    }
}

/// Normalizes a `#rgb` / `#rrggbb` color to a lowercase `#rrggbb` string.
/// `normalize("#FFF") == normalize("#ffffff")`.
pub fn normalize_hex_color(raw: &str) -> AppResult<String> {
    let trimmed = raw.trim().trim_start_matches('#').to_ascii_lowercase();
    let expanded = match trimmed.len() {
        3 => trimmed.chars().flat_map(|c| [c, c]).collect::<String>(),
        6 => trimmed,
        _ => {
            return Err(AppError::bad_input(format!(
                "backgroundRemovalColor must be a #rgb or #rrggbb hex color, got '{raw}'"
            )))
        }
    };
    if !expanded.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AppError::bad_input(format!(
            "backgroundRemovalColor must be a hex color, got '{raw}'"
        )));
    }
    Ok(format!("#{expanded}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colorspace {
    Srgb,
    P3,
    Cmyk,
}

impl Colorspace {
    pub fn parse(raw: &str) -> AppResult<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "srgb" => Ok(Colorspace::Srgb),
            "p3" => Ok(Colorspace::P3),
            "cmyk" => Ok(Colorspace::Cmyk),
            other => Err(AppError::bad_input(format!(
                "pngColorspace must be one of srgb, p3, cmyk; got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorDepth {
    Eight,
    TwentyFour,
    ThirtyTwo,
}

impl ColorDepth {
    pub fn parse(raw: u16) -> AppResult<Self> {
        match raw {
            8 => Ok(ColorDepth::Eight),
            24 => Ok(ColorDepth::TwentyFour),
            32 => Ok(ColorDepth::ThirtyTwo),
            other => Err(AppError::bad_input(format!(
                "pngColorDepth must be one of 8, 24, 32; got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PngOptions {
    pub size: u32,
    pub dpi: u32,
    pub colorspace: Colorspace,
    pub color_depth: ColorDepth,
}

#[derive(Debug, Clone, Copy)]
pub struct SourceDimensions {
    pub width: u32,
    pub height: u32,
}

/// The allowed corner-radius percentages, per the data model.
pub const CORNER_RADIUS_STEPS: [f64; 5] = [0.0, 12.5, 25.0, 37.5, 50.0];

/// Immutable inputs a worker consumes to perform one conversion. Cheap to
/// clone (only the source bytes are potentially large, and they're shared
/// via `Vec<u8>` moved once into the job).
#[derive(Debug, Clone)]
pub struct JobInputs {
    pub source_type: SourceType,
    pub source_bytes: Vec<u8>,
    pub original_filename: String,
    pub format: OutputFormat,
    pub scale_percent: f64,
    pub corner_radius_percent: f64,
    pub bg_removal: BgRemoval,
    pub png_options: PngOptions,
    pub source_dimensions: Option<SourceDimensions>,
}

impl JobInputs {
    pub fn validate(&self) -> AppResult<()> {
        if !(50.0..=200.0).contains(&self.scale_percent) {
            return Err(AppError::bad_input(format!(
                "scale must be between 50 and 200, got {}",
                self.scale_percent
            )));
        }
        if !CORNER_RADIUS_STEPS
            .iter()
            .any(|s| (s - self.corner_radius_percent).abs() < 1e-9)
        {
            return Err(AppError::bad_input(format!(
                "cornerRadius must be one of 0, 12.5, 25, 37.5, 50; got {}",
                self.corner_radius_percent
            )));
        }
        if !(16..=2048).contains(&self.png_options.size) {
            return Err(AppError::bad_input(format!(
                "outputSize must be between 16 and 2048, got {}",
                self.png_options.size
            )));
        }
        if !(1..=600).contains(&self.png_options.dpi) {
            return Err(AppError::bad_input(format!(
                "pngDpi must be between 1 and 600, got {}",
                self.png_options.dpi
            )));
        }
        match self.source_type {
            SourceType::Png if self.source_dimensions.is_none() => {
                return Err(AppError::bad_input(
                    "sourceWidth and sourceHeight are required for PNG sources",
                ));
            }
            SourceType::Png => {
                let dim = self.source_dimensions.unwrap();
                if dim.width == 0 || dim.height == 0 {
                    return Err(AppError::bad_input(
                        "sourceWidth and sourceHeight must be positive",
                    ));
                }
            }
            SourceType::Svg => {}
        }
        Ok(())
    }
}

/// A completed result artifact: raw bytes, the suggested file name, and its
/// MIME type.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime_type: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    TimedOut,
}

/// A unit of conversion work tracked by the queue. Only the dispatcher
/// mutates `status`/timestamps; workers only ever see a `JobInputs` snapshot.
pub struct Job {
    pub id: String,
    pub inputs: JobInputs,
    pub status: JobStatus,
    pub created_at: Instant,
    pub started_at: Option<Instant>,
    pub completed_at: Option<Instant>,
    pub deadline: Instant,
}

impl Job {
    pub fn new(id: String, inputs: JobInputs, timeout: std::time::Duration) -> Self {
        let created_at = Instant::now();
        Self {
            id,
            inputs,
            status: JobStatus::Pending,
            created_at,
            started_at: None,
            completed_at: None,
            deadline: created_at + timeout,
        }
    }
}
