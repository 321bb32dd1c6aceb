use actix_web::{HttpResponse, Result};

use crate::image::containers::{icns, ico};

/// Static, no-auth listing of supported output formats and their size
/// tables, mirroring the teacher's self-describing `GET /errors` endpoint.
pub async fn list_formats() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "formats": [
            {
                "name": "ico",
                "mimeType": "image/x-icon",
                "sizes": ico::ICO_SIZES,
            },
            {
                "name": "favicon",
                "mimeType": "image/x-icon",
                "sizes": ico::FAVICON_SIZES,
            },
            {
                "name": "icns",
                "mimeType": "image/icns",
                "sizes": icns::unique_sizes(),
            },
            {
                "name": "png",
                "mimeType": "image/png",
                "sizes": "outputSize (16-2048)",
            },
            {
                "name": "all",
                "mimeType": "application/zip",
                "sizes": "bundles ico, favicon, icns, png and the original source",
            },
        ],
        "backgroundRemovalModes": ["none", "color", "smart"],
        "cornerRadiusSteps": crate::job::CORNER_RADIUS_STEPS,
        "pngColorspaces": ["srgb", "p3", "cmyk"],
        "pngColorDepths": [8, 24, 32],
    })))
}
