use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{AppError, AppResult};
use crate::job::SourceType;

const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Result of running the sanitizer over an uploaded source.
pub struct SanitizeResult {
    pub safe_bytes: Vec<u8>,
    pub modified: bool,
    pub notes: Vec<String>,
}

/// Fast byte-pattern reject, run before any parsing. Only covers constructs
/// the structural pass below can't clean up (URI schemes embedded anywhere
/// in the source); DOCTYPE/ENTITY/`<script>` are stripped, not rejected, so
/// they must not appear here. A `false` here means REJECT without further
/// inspection, a `true` means "proceed to the full scan", not "is safe".
static QUICK_SAFE_PATTERNS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec!["javascript:", "vbscript:", "data:text/html"]
});

pub fn quick_safe(source_bytes: &[u8]) -> bool {
    let text = String::from_utf8_lossy(source_bytes).to_ascii_lowercase();
    !QUICK_SAFE_PATTERNS.iter().any(|p| text.contains(p))
}

static DOCTYPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<!DOCTYPE[^>]*(\[[^\]]*\])?>").unwrap());
static ENTITY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<!ENTITY[^>]*>").unwrap());
static SCRIPT_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b.*?(</script>|/>)").unwrap());
static DANGEROUS_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(foreignObject|iframe|object|embed)\b.*?(</\1>|/>)").unwrap()
});
static ON_ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)\son[a-z]+\s*=\s*("[^"]*"|'[^']*')"#).unwrap());
static DANGEROUS_URI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)(javascript|vbscript):|data:text/html"#).unwrap()
});
static XINCLUDE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)xi:include|xmlns:xi").unwrap());

/// Strips or rejects the dangerous SVG constructs named in the sanitizer
/// contract. Runs `quick_safe` first, then structural passes. Idempotent:
/// running it twice on its own output is a no-op.
pub fn sanitize(source_bytes: &[u8], source_type: SourceType) -> AppResult<SanitizeResult> {
    match source_type {
        SourceType::Png => sanitize_png(source_bytes),
        SourceType::Svg => sanitize_svg(source_bytes),
    }
}

fn sanitize_png(source_bytes: &[u8]) -> AppResult<SanitizeResult> {
    if source_bytes.len() < 8 || source_bytes[..8] != PNG_SIGNATURE {
        return Err(AppError::InvalidSource);
    }
    Ok(SanitizeResult {
        safe_bytes: source_bytes.to_vec(),
        modified: false,
        notes: vec![],
    })
}

fn sanitize_svg(source_bytes: &[u8]) -> AppResult<SanitizeResult> {
    if !quick_safe(source_bytes) {
        return Err(AppError::SecurityRejected);
    }

    let text = std::str::from_utf8(source_bytes).map_err(|_| AppError::InvalidSource)?;
    if !text.trim_start().starts_with("<?xml") && !text.contains("<svg") {
        return Err(AppError::InvalidSource);
    }
    if XINCLUDE_RE.is_match(text) {
        return Err(AppError::SecurityRejected);
    }

    let mut notes = Vec::new();
    let mut modified = false;
    let mut result = text.to_string();

    for (re, note) in [
        (&*DOCTYPE_RE, "stripped DOCTYPE"),
        (&*ENTITY_RE, "stripped ENTITY declaration"),
        (&*SCRIPT_TAG_RE, "stripped <script>"),
        (&*DANGEROUS_TAG_RE, "stripped foreignObject/iframe/object/embed"),
    ] {
        if re.is_match(&result) {
            result = re.replace_all(&result, "").into_owned();
            modified = true;
            notes.push(note.to_string());
        }
    }

    if ON_ATTR_RE.is_match(&result) {
        result = ON_ATTR_RE.replace_all(&result, "").into_owned();
        modified = true;
        notes.push("stripped on* event attributes".to_string());
    }

    if DANGEROUS_URI_RE.is_match(&result) {
        return Err(AppError::SecurityRejected);
    }

    Ok(SanitizeResult {
        safe_bytes: result.into_bytes(),
        modified,
        notes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_tags() {
        let svg = br#"<svg viewBox="0 0 10 10"><script>alert(1)</script><rect/></svg>"#;
        let result = sanitize(svg, SourceType::Svg).unwrap();
        assert!(result.modified);
        let text = String::from_utf8(result.safe_bytes).unwrap();
        assert!(!text.to_ascii_lowercase().contains("<script"));
    }

    #[test]
    fn strips_on_attributes() {
        let svg = br#"<svg viewBox="0 0 10 10"><rect onload="evil()" width="10" height="10"/></svg>"#;
        let result = sanitize(svg, SourceType::Svg).unwrap();
        let text = String::from_utf8(result.safe_bytes).unwrap();
        assert!(!text.contains("onload"));
    }

    #[test]
    fn rejects_javascript_uri() {
        let svg = br#"<svg viewBox="0 0 10 10"><a href="javascript:alert(1)"><rect/></a></svg>"#;
        assert!(sanitize(svg, SourceType::Svg).is_err());
    }

    #[test]
    fn rejects_xinclude() {
        let svg = br#"<svg xmlns:xi="http://www.w3.org/2001/XInclude"><xi:include href="evil.svg"/></svg>"#;
        assert!(sanitize(svg, SourceType::Svg).is_err());
    }

    #[test]
    fn sanitize_is_idempotent() {
        let svg = br#"<svg viewBox="0 0 10 10"><script>bad()</script><rect onclick="x()" width="10" height="10" fill="red"/></svg>"#;
        let once = sanitize(svg, SourceType::Svg).unwrap();
        let twice = sanitize(&once.safe_bytes, SourceType::Svg).unwrap();
        assert_eq!(once.safe_bytes, twice.safe_bytes);
        assert!(!twice.modified);
    }

    #[test]
    fn accepts_clean_svg_unmodified() {
        let svg = br#"<svg viewBox="0 0 10 10"><rect width="10" height="10" fill="red"/></svg>"#;
        let result = sanitize(svg, SourceType::Svg).unwrap();
        assert!(!result.modified);
        assert!(result.notes.is_empty());
    }

    #[test]
    fn png_requires_valid_signature() {
        assert!(sanitize(&PNG_SIGNATURE, SourceType::Png).is_ok());
        assert!(sanitize(b"not a png", SourceType::Png).is_err());
    }
}
