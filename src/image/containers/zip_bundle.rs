use std::io::Write;

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::{AppError, AppResult};
use crate::job::Artifact;

/// Packages multiple artifacts into a single ZIP, for `format=all`.
pub fn bundle(artifacts: &[Artifact]) -> AppResult<Vec<u8>> {
    let mut buffer = Vec::new();
    {
        let cursor = std::io::Cursor::new(&mut buffer);
        let mut writer = ZipWriter::new(cursor);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for artifact in artifacts {
            writer
                .start_file(&artifact.filename, options)
                .map_err(zip_err)?;
            writer.write_all(&artifact.bytes).map_err(zip_err_io)?;
        }
        writer.finish().map_err(zip_err)?;
    }
    Ok(buffer)
}

fn zip_err(err: zip::result::ZipError) -> AppError {
    AppError::EncodeFailed {
        reason: err.to_string(),
    }
}

fn zip_err_io(err: std::io::Error) -> AppError {
    AppError::EncodeFailed {
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_produces_a_readable_zip() {
        let artifacts = vec![
            Artifact {
                bytes: vec![1, 2, 3],
                filename: "icon.ico".to_string(),
                mime_type: "image/x-icon",
            },
            Artifact {
                bytes: vec![4, 5, 6, 7],
                filename: "icon.icns".to_string(),
                mime_type: "image/icns",
            },
        ];
        let zip_bytes = bundle(&artifacts).unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(zip_bytes)).unwrap();
        assert_eq!(archive.len(), 2);
        let file = archive.by_name("icon.ico").unwrap();
        assert_eq!(file.size(), 3);
    }
}
