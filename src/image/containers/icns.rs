use std::collections::HashMap;

/// The 11 Apple icon `(osType, pixel size)` entries. icp5/ic11, icp6/ic12,
/// ic08/ic13, and ic09/ic14 are @2x/standard pairs sharing a pixel size;
/// both chunks are emitted with identical PNG payloads for that size.
pub const OS_TYPE_TABLE: [(&str, u32); 11] = [
    ("icp4", 16),
    ("icp5", 32),
    ("icp6", 64),
    ("ic07", 128),
    ("ic08", 256),
    ("ic09", 512),
    ("ic10", 1024),
    ("ic11", 32),
    ("ic12", 64),
    ("ic13", 256),
    ("ic14", 512),
];

/// The macOS visual-inset factor applied to `scale_percent` before rendering
/// ICNS sizes, so produced icons match system visual weight.
pub const MACOS_INSET_FACTOR: f64 = 832.0 / 1024.0;

pub fn unique_sizes() -> Vec<u32> {
    let mut sizes: Vec<u32> = OS_TYPE_TABLE.iter().map(|(_, s)| *s).collect();
    sizes.sort_unstable();
    sizes.dedup();
    sizes
}

/// Packs one PNG payload per rendered pixel size into an ICNS container.
/// `pngs_by_size` need not cover every table entry; sizes that were filtered
/// out (e.g. by the no-upscale rule) are simply omitted from the table walk.
pub fn pack(pngs_by_size: &HashMap<u32, Vec<u8>>) -> Vec<u8> {
    let mut chunks = Vec::new();
    for (os_type, size) in OS_TYPE_TABLE {
        if let Some(png_bytes) = pngs_by_size.get(&size) {
            let mut chunk = Vec::new();
            chunk.extend_from_slice(os_type.as_bytes());
            let chunk_len = 8 + png_bytes.len() as u32;
            chunk.extend_from_slice(&chunk_len.to_be_bytes());
            chunk.extend_from_slice(png_bytes);
            chunks.push(chunk);
        }
    }

    let total_length = 8 + chunks.iter().map(|c| c.len()).sum::<usize>();
    let mut out = Vec::with_capacity(total_length);
    out.extend_from_slice(b"icns");
    out.extend_from_slice(&(total_length as u32).to_be_bytes());
    for chunk in chunks {
        out.extend_from_slice(&chunk);
    }
    out
}
