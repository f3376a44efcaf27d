//! Byte-exact helpers for the embedded engine's file formats.
//!
//! Database header layout (first 100 bytes of page 1):
//! ```text
//! Offset  Size  Description
//!  16       2   Page size, big-endian; the value 1 means 65536
//! ```
//!
//! WAL header layout (32 bytes):
//! ```text
//! Offset  Size  Description
//!   0       4   Magic; the LSB selects the checksum word order
//!   4       4   Format version
//!   8       4   Page size in bytes
//!  12       4   Checkpoint sequence number
//!  16       4   Salt-1
//!  20       4   Salt-2
//!  24       4   Checksum-1 (of bytes 0..24)
//!  28       4   Checksum-2 (of bytes 0..24)
//! ```
//!
//! WAL frame header layout (24 bytes):
//! ```text
//! Offset  Size  Description
//!   0       4   Page number
//!   4       4   For commit frames: db size in pages. Otherwise 0.
//!   8       4   Salt-1 (copied from the WAL header)
//!  12       4   Salt-2 (copied from the WAL header)
//!  16       4   Cumulative checksum-1
//!  20       4   Cumulative checksum-2
//! ```

use walrus_error::{Result, WalrusError};

/// Size of the database file header.
pub const DB_HEADER_SIZE: usize = 100;

/// Size of the WAL file header.
pub const WAL_HEADER_SIZE: usize = 32;

/// Size of a WAL frame header.
pub const WAL_FRAME_HEADER_SIZE: usize = 24;

/// Minimum legal page size.
pub const PAGE_SIZE_MIN: u32 = 512;

/// Maximum legal page size.
pub const PAGE_SIZE_MAX: u32 = 65_536;

/// WAL magic number. Stored big-endian in the first 4 bytes of a WAL file,
/// either as-is or with the least significant bit set. A set LSB means frame
/// checksums treat the data as big-endian 32-bit words; a clear LSB means
/// little-endian words.
pub const WAL_MAGIC: u32 = 0x377f_0682;

/// Byte offset of the checksum field inside a WAL header.
pub const WAL_HEADER_CHECKSUM_OFFSET: usize = 24;

/// Byte offset of the checksum field inside a WAL frame header.
pub const WAL_FRAME_CHECKSUM_OFFSET: usize = 16;

/// Rolling checksum accumulator pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalChecksum {
    pub s1: u32,
    pub s2: u32,
}

/// Salt pair copied from a WAL header into each frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalSalts {
    pub salt1: u32,
    pub salt2: u32,
}

fn read_be_u32_at(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes(
        buf[offset..offset + 4]
            .try_into()
            .expect("slice is exactly 4 bytes"),
    )
}

fn write_be_u32_at(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

fn ensure_min_len(buf: &[u8], len: usize, what: &str) -> Result<()> {
    if buf.len() < len {
        return Err(WalrusError::bad_header(format!(
            "{what} too small: expected >= {len}, got {}",
            buf.len()
        )));
    }
    Ok(())
}

/// Decode a raw page-size field.
///
/// The value 1 denotes 65536; every other legal value is a power of two in
/// [512, 32768]. Returns `None` for anything else.
#[must_use]
pub fn decode_page_size(raw: u32) -> Option<u32> {
    if raw == 1 {
        return Some(PAGE_SIZE_MAX);
    }
    if raw < PAGE_SIZE_MIN || raw > PAGE_SIZE_MAX / 2 || !raw.is_power_of_two() {
        return None;
    }
    Some(raw)
}

/// Extract the page size from a database header.
///
/// The page size lives in bytes [16, 18), big-endian. Only that field is
/// required to be present, so a short header probe decodes too.
pub fn database_header_page_size(header: &[u8]) -> Result<u32> {
    ensure_min_len(header, 18, "database header")?;
    let raw = u32::from(u16::from_be_bytes([header[16], header[17]]));
    decode_page_size(raw)
        .ok_or_else(|| WalrusError::bad_header(format!("invalid database page size field {raw}")))
}

/// Extract the page size from a WAL header.
///
/// The page size lives in bytes [8, 12), big-endian.
pub fn wal_header_page_size(header: &[u8]) -> Result<u32> {
    ensure_min_len(header, WAL_HEADER_SIZE, "WAL header")?;
    let raw = read_be_u32_at(header, 8);
    decode_page_size(raw)
        .ok_or_else(|| WalrusError::bad_header(format!("invalid WAL page size field {raw}")))
}

/// Read the salt pair from a WAL header.
pub fn wal_header_salts(header: &[u8]) -> Result<WalSalts> {
    ensure_min_len(header, WAL_HEADER_SIZE, "WAL header")?;
    Ok(WalSalts {
        salt1: read_be_u32_at(header, 16),
        salt2: read_be_u32_at(header, 20),
    })
}

/// Whether frame checksums over this WAL use host-native word order.
///
/// A set LSB in the magic selects big-endian words, a clear LSB selects
/// little-endian words; "native" is whichever of the two matches the host.
pub fn wal_native_checksum(header: &[u8]) -> Result<bool> {
    ensure_min_len(header, WAL_HEADER_SIZE, "WAL header")?;
    let magic = read_be_u32_at(header, 0);
    if magic & !1 != WAL_MAGIC {
        return Err(WalrusError::bad_header(format!(
            "invalid WAL magic {magic:#010x}"
        )));
    }
    let big_endian_words = magic & 1 == 1;
    Ok(big_endian_words == cfg!(target_endian = "big"))
}

/// Extract the page number from a WAL frame header (bytes [0, 4)).
pub fn wal_frame_page_number(frame_header: &[u8]) -> Result<u32> {
    ensure_min_len(frame_header, WAL_FRAME_HEADER_SIZE, "WAL frame header")?;
    Ok(read_be_u32_at(frame_header, 0))
}

/// Extract the commit marker from a WAL frame header (bytes [4, 8)).
///
/// Non-zero only on commit frames, where it records the database size in
/// pages after the commit.
pub fn wal_frame_db_size(frame_header: &[u8]) -> Result<u32> {
    ensure_min_len(frame_header, WAL_FRAME_HEADER_SIZE, "WAL frame header")?;
    Ok(read_be_u32_at(frame_header, 4))
}

/// Size of one full WAL frame (header plus page data).
#[must_use]
pub const fn wal_frame_size(page_size: u32) -> u64 {
    WAL_FRAME_HEADER_SIZE as u64 + page_size as u64
}

/// Total size of a WAL file holding `n_frames` frames.
#[must_use]
pub const fn wal_size(page_size: u32, n_frames: u64) -> u64 {
    WAL_HEADER_SIZE as u64 + n_frames * wal_frame_size(page_size)
}

/// The 1-based frame number of the frame starting at `offset`, for a WAL
/// with the given page size.
#[must_use]
pub const fn wal_frame_number_for_offset(page_size: u32, offset: u64) -> u32 {
    (((offset - WAL_HEADER_SIZE as u64) / wal_frame_size(page_size)) + 1) as u32
}

/// Extend the rolling checksum over `data`.
///
/// `data` is consumed as consecutive 32-bit words; its length must be a
/// positive multiple of 8. With `native` the words are read in host byte
/// order, otherwise byte-swapped.
pub fn wal_checksum(data: &[u8], seed: WalChecksum, native: bool) -> Result<WalChecksum> {
    if data.is_empty() || data.len() % 8 != 0 {
        return Err(WalrusError::internal(format!(
            "checksum input must be a positive multiple of 8 bytes, got {}",
            data.len()
        )));
    }

    let mut s1 = seed.s1;
    let mut s2 = seed.s2;

    for chunk in data.chunks_exact(8) {
        let mut first = u32::from_ne_bytes(chunk[..4].try_into().expect("4-byte chunk"));
        let mut second = u32::from_ne_bytes(chunk[4..].try_into().expect("4-byte chunk"));
        if !native {
            first = first.swap_bytes();
            second = second.swap_bytes();
        }
        s1 = s1.wrapping_add(first).wrapping_add(s2);
        s2 = s2.wrapping_add(second).wrapping_add(s1);
    }

    Ok(WalChecksum { s1, s2 })
}

/// Restart a WAL header after a full checkpoint.
///
/// Increments the checkpoint sequence and salt-1, replaces salt-2 with
/// fresh randomness, and rewrites the checksum over the first 24 bytes.
pub fn restart_wal_header(header: &mut [u8]) -> Result<()> {
    restart_wal_header_with_salt(header, rand::random())
}

/// [`restart_wal_header`] with a caller-chosen salt-2, for deterministic
/// replay and tests.
pub fn restart_wal_header_with_salt(header: &mut [u8], salt2: u32) -> Result<()> {
    ensure_min_len(header, WAL_HEADER_SIZE, "WAL header")?;

    let checkpoint_seq = read_be_u32_at(header, 12).wrapping_add(1);
    write_be_u32_at(header, 12, checkpoint_seq);

    let salt1 = read_be_u32_at(header, 16).wrapping_add(1);
    write_be_u32_at(header, 16, salt1);

    write_be_u32_at(header, 20, salt2);

    let checksum = wal_checksum(
        &header[..WAL_HEADER_CHECKSUM_OFFSET],
        WalChecksum::default(),
        true,
    )?;
    write_be_u32_at(header, WAL_HEADER_CHECKSUM_OFFSET, checksum.s1);
    write_be_u32_at(header, WAL_HEADER_CHECKSUM_OFFSET + 4, checksum.s2);

    Ok(())
}

/// Encode a 24-byte frame header, continuing the rolling checksum chain
/// over the frame's page data.
///
/// `checksum` carries the running value from the previous frame (or the WAL
/// header for the first frame) in and the value after this frame out.
pub fn encode_frame_header(
    native: bool,
    page_number: u32,
    db_size: u32,
    salts: WalSalts,
    checksum: &mut WalChecksum,
    header: &mut [u8],
    page: &[u8],
) -> Result<()> {
    if header.len() < WAL_FRAME_HEADER_SIZE {
        return Err(WalrusError::internal(format!(
            "frame header buffer too small: {}",
            header.len()
        )));
    }

    write_be_u32_at(header, 0, page_number);
    write_be_u32_at(header, 4, db_size);
    write_be_u32_at(header, 8, salts.salt1);
    write_be_u32_at(header, 12, salts.salt2);

    *checksum = wal_checksum(&header[..8], *checksum, native)?;
    *checksum = wal_checksum(page, *checksum, native)?;

    write_be_u32_at(header, WAL_FRAME_CHECKSUM_OFFSET, checksum.s1);
    write_be_u32_at(header, WAL_FRAME_CHECKSUM_OFFSET + 4, checksum.s2);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_header_with_raw_size(raw: u16) -> [u8; DB_HEADER_SIZE] {
        let mut header = [0u8; DB_HEADER_SIZE];
        header[16..18].copy_from_slice(&raw.to_be_bytes());
        header
    }

    fn wal_header_with_size(page_size: u32) -> [u8; WAL_HEADER_SIZE] {
        let mut header = [0u8; WAL_HEADER_SIZE];
        header[0..4].copy_from_slice(&WAL_MAGIC.to_be_bytes());
        header[8..12].copy_from_slice(&page_size.to_be_bytes());
        header
    }

    #[test]
    fn decode_page_size_bounds() {
        assert_eq!(decode_page_size(1), Some(65_536));
        assert_eq!(decode_page_size(512), Some(512));
        assert_eq!(decode_page_size(4096), Some(4096));
        assert_eq!(decode_page_size(32_768), Some(32_768));
        assert_eq!(decode_page_size(0), None);
        assert_eq!(decode_page_size(256), None);
        assert_eq!(decode_page_size(65_536), None);
        assert_eq!(decode_page_size(1000), None);
    }

    #[test]
    fn database_header_decodes_page_size() {
        assert_eq!(
            database_header_page_size(&db_header_with_raw_size(512)).unwrap(),
            512
        );
        assert_eq!(
            database_header_page_size(&db_header_with_raw_size(1)).unwrap(),
            65_536
        );
        assert!(database_header_page_size(&db_header_with_raw_size(100)).is_err());
        assert!(database_header_page_size(&[0u8; 10]).is_err());
    }

    #[test]
    fn wal_header_decodes_page_size() {
        assert_eq!(
            wal_header_page_size(&wal_header_with_size(4096)).unwrap(),
            4096
        );
        assert!(wal_header_page_size(&wal_header_with_size(4095)).is_err());
    }

    #[test]
    fn native_checksum_detection() {
        let le_words = wal_header_with_size(4096);
        let mut be_words = le_words;
        be_words[3] |= 1;

        let le_native = wal_native_checksum(&le_words).unwrap();
        let be_native = wal_native_checksum(&be_words).unwrap();
        // Exactly one of the two magics matches the host order.
        assert_ne!(le_native, be_native);
        assert_eq!(le_native, cfg!(target_endian = "little"));

        let mut bad = le_words;
        bad[0] = 0;
        assert!(wal_native_checksum(&bad).is_err());
    }

    #[test]
    fn frame_header_fields() {
        let mut frame = [0u8; WAL_FRAME_HEADER_SIZE];
        frame[0..4].copy_from_slice(&7u32.to_be_bytes());
        frame[4..8].copy_from_slice(&3u32.to_be_bytes());
        assert_eq!(wal_frame_page_number(&frame).unwrap(), 7);
        assert_eq!(wal_frame_db_size(&frame).unwrap(), 3);
    }

    #[test]
    fn frame_geometry() {
        assert_eq!(wal_frame_size(4096), 4120);
        assert_eq!(wal_size(4096, 0), 32);
        assert_eq!(wal_size(4096, 1), 4152);
        assert_eq!(wal_frame_number_for_offset(4096, 32), 1);
        assert_eq!(wal_frame_number_for_offset(4096, 32 + 4120), 2);
    }

    #[test]
    fn checksum_known_values() {
        let data: [u8; 8] = [1, 0, 0, 0, 2, 0, 0, 0];
        let native_le = cfg!(target_endian = "little");
        let sum = wal_checksum(&data, WalChecksum::default(), native_le).unwrap();
        // s1 = 0 + 1 + 0 = 1; s2 = 0 + 2 + 1 = 3 (words read little-endian).
        assert_eq!(sum, WalChecksum { s1: 1, s2: 3 });
    }

    #[test]
    fn checksum_word_order() {
        let data: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
        let native = wal_checksum(&data, WalChecksum::default(), true).unwrap();
        let swapped = wal_checksum(&data, WalChecksum::default(), false).unwrap();
        assert_ne!(native, swapped);
        assert_eq!(
            swapped.s1,
            u32::from_ne_bytes([1, 2, 3, 4]).swap_bytes()
        );
    }

    #[test]
    fn checksum_rejects_unaligned_input() {
        assert!(wal_checksum(&[0u8; 7], WalChecksum::default(), true).is_err());
        assert!(wal_checksum(&[], WalChecksum::default(), true).is_err());
    }

    #[test]
    fn checksum_seeding_chains() {
        let data = [0xABu8; 16];
        let all = wal_checksum(&data, WalChecksum::default(), true).unwrap();
        let first = wal_checksum(&data[..8], WalChecksum::default(), true).unwrap();
        let chained = wal_checksum(&data[8..], first, true).unwrap();
        assert_eq!(all, chained);
    }

    #[test]
    fn restart_header_increments_and_reseals() {
        let mut header = wal_header_with_size(4096);
        header[12..16].copy_from_slice(&5u32.to_be_bytes());
        header[16..20].copy_from_slice(&9u32.to_be_bytes());

        restart_wal_header_with_salt(&mut header, 0xDEAD_BEEF).unwrap();

        assert_eq!(u32::from_be_bytes(header[12..16].try_into().unwrap()), 6);
        assert_eq!(u32::from_be_bytes(header[16..20].try_into().unwrap()), 10);
        assert_eq!(
            u32::from_be_bytes(header[20..24].try_into().unwrap()),
            0xDEAD_BEEF
        );

        let expected = wal_checksum(&header[..24], WalChecksum::default(), true).unwrap();
        assert_eq!(
            u32::from_be_bytes(header[24..28].try_into().unwrap()),
            expected.s1
        );
        assert_eq!(
            u32::from_be_bytes(header[28..32].try_into().unwrap()),
            expected.s2
        );
    }

    #[test]
    fn encode_frame_header_chains_checksums() {
        let page = vec![0x11u8; 512];
        let salts = WalSalts {
            salt1: 0xAAAA_0001,
            salt2: 0xBBBB_0002,
        };

        let mut running = WalChecksum { s1: 3, s2: 4 };
        let mut header = [0u8; WAL_FRAME_HEADER_SIZE];
        encode_frame_header(true, 1, 1, salts, &mut running, &mut header, &page).unwrap();

        assert_eq!(wal_frame_page_number(&header).unwrap(), 1);
        assert_eq!(wal_frame_db_size(&header).unwrap(), 1);

        // The stored checksum equals the running value after this frame.
        assert_eq!(
            u32::from_be_bytes(header[16..20].try_into().unwrap()),
            running.s1
        );

        // A second frame continues the chain from the first.
        let mut header2 = [0u8; WAL_FRAME_HEADER_SIZE];
        let before = running;
        encode_frame_header(true, 2, 0, salts, &mut running, &mut header2, &page).unwrap();
        assert_ne!(before, running);
    }
}
