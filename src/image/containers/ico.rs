/// Standard ICO target sizes, per the container table.
pub const ICO_SIZES: [u32; 6] = [16, 32, 48, 64, 128, 256];
/// Favicon target sizes: a subset of the ICO sizes.
pub const FAVICON_SIZES: [u32; 3] = [16, 32, 48];

/// Packs one PNG payload per size into an ICO container, ordered ascending.
/// The classic "256" size is encoded as byte `0x00` in the directory entry.
pub fn pack(entries: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let mut sorted = entries.to_vec();
    sorted.sort_by_key(|(size, _)| *size);

    let count = sorted.len() as u16;
    let mut out = Vec::new();

    // ICONDIR header: reserved(2)=0, type(2)=1 (icon), count(2).
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());

    let header_len = 6 + 16 * sorted.len();
    let mut offset = header_len as u32;
    let mut directory = Vec::new();
    for (size, bytes) in &sorted {
        let size_byte = if *size >= 256 { 0u8 } else { *size as u8 };
        directory.push(size_byte); // width
        directory.push(size_byte); // height
        directory.push(0); // color count
        directory.push(0); // reserved
        directory.extend_from_slice(&1u16.to_le_bytes()); // color planes
        directory.extend_from_slice(&32u16.to_le_bytes()); // bits per pixel
        directory.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        directory.extend_from_slice(&offset.to_le_bytes());
        offset += bytes.len() as u32;
    }
    out.extend_from_slice(&directory);
    for (_, bytes) in &sorted {
        out.extend_from_slice(bytes);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_orders_entries_ascending_and_encodes_256_as_zero() {
        let entries = vec![(256u32, vec![1, 2, 3]), (16u32, vec![4, 5])];
        let ico = pack(&entries);
        assert_eq!(&ico[0..2], &0u16.to_le_bytes());
        assert_eq!(&ico[2..4], &1u16.to_le_bytes());
        assert_eq!(&ico[4..6], &2u16.to_le_bytes());
        // First directory entry (after sorting) is size 16.
        assert_eq!(ico[6], 16);
        // Second directory entry is size 256, encoded as 0.
        let second_entry_offset = 6 + 16;
        assert_eq!(ico[second_entry_offset], 0);
    }
}
