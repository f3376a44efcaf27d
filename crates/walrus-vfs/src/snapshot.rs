//! Bulk file transfer for the replication layer.
//!
//! Snapshots ship whole files between peers as contiguous byte sequences
//! in the exact layout the engine itself would write to disk: a database
//! is its pages back to back, a WAL is the 32-byte header followed by
//! 24-byte-header + page frames. Export and import both go through the
//! ordinary handle read/write paths, so the layout rules live in exactly
//! one place.

use walrus_error::{Result, WalrusError};
use walrus_format::{
    database_header_page_size, wal_header_page_size, WAL_FRAME_HEADER_SIZE, WAL_HEADER_SIZE,
};
use walrus_types::database_name_of_wal;
use walrus_types::flags::OpenFlags;

use crate::traits::{Vfs, VfsFile};
use crate::volatile::VolatileVfs;

/// Whether a name denotes a WAL file or a main database.
fn wal_name(name: &str) -> bool {
    database_name_of_wal(name).is_some()
}

fn open_flags_for(name: &str, create: bool) -> OpenFlags {
    let kind = if wal_name(name) {
        OpenFlags::WAL
    } else {
        OpenFlags::MAIN_DB
    };
    let mut flags = OpenFlags::READWRITE | kind;
    if create {
        flags |= OpenFlags::CREATE;
    }
    flags
}

fn read_exact_at(file: &mut impl VfsFile, buf: &mut [u8], offset: u64) -> Result<()> {
    let n = file.read(buf, offset)?;
    if n != buf.len() {
        return Err(WalrusError::IoRead);
    }
    Ok(())
}

impl VolatileVfs {
    /// Serialize the named file into the engine's on-disk layout.
    ///
    /// An empty file exports as an empty buffer. The file must exist.
    pub fn export(&self, name: &str) -> Result<Vec<u8>> {
        let is_wal = wal_name(name);
        let (mut file, _) = self.open(Some(name), open_flags_for(name, false))?;

        let result = export_inner(&mut file, is_wal);
        file.close()?;
        result
    }

    /// Replace the named file's content with a previously exported byte
    /// sequence, creating the file if needed.
    ///
    /// Importing a WAL requires its paired database to exist with a
    /// matching page size, exactly as when the engine writes the WAL
    /// itself.
    pub fn import(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let is_wal = wal_name(name);
        let (mut file, _) = self.open(Some(name), open_flags_for(name, true))?;

        let result = import_inner(&mut file, is_wal, bytes);
        file.close()?;
        result
    }
}

fn export_inner(file: &mut impl VfsFile, is_wal: bool) -> Result<Vec<u8>> {
    let len = usize::try_from(file.file_size()?).map_err(|_| WalrusError::IoRead)?;
    if len == 0 {
        return Ok(Vec::new());
    }

    let mut buf = vec![0u8; len];

    // Probe the header first; 32 bytes is enough to learn the page size of
    // either file kind.
    read_exact_at(file, &mut buf[..WAL_HEADER_SIZE], 0)?;
    let page_size = if is_wal {
        wal_header_page_size(&buf[..WAL_HEADER_SIZE])?
    } else {
        database_header_page_size(&buf[..WAL_HEADER_SIZE])?
    } as usize;

    let mut offset = if is_wal { WAL_HEADER_SIZE } else { 0 };

    while offset < len {
        if is_wal {
            let (frame_header, rest) = buf[offset..].split_at_mut(WAL_FRAME_HEADER_SIZE);
            read_exact_at(file, frame_header, offset as u64)?;
            offset += WAL_FRAME_HEADER_SIZE;
            read_exact_at(file, &mut rest[..page_size], offset as u64)?;
        } else {
            let end = offset + page_size;
            let page = buf
                .get_mut(offset..end)
                .ok_or(WalrusError::IoRead)?;
            read_exact_at(file, page, offset as u64)?;
        }
        offset += page_size;
    }

    Ok(buf)
}

fn import_inner(file: &mut impl VfsFile, is_wal: bool, bytes: &[u8]) -> Result<()> {
    file.truncate(0)?;

    if bytes.is_empty() {
        return Ok(());
    }

    let page_size = if is_wal {
        wal_header_page_size(bytes)?
    } else {
        database_header_page_size(bytes)?
    } as usize;

    let mut offset = 0usize;

    if is_wal {
        let header = bytes.get(..WAL_HEADER_SIZE).ok_or_else(|| {
            WalrusError::bad_header("WAL snapshot shorter than its header".to_owned())
        })?;
        file.write(header, 0)?;
        offset += WAL_HEADER_SIZE;
    }

    while offset < bytes.len() {
        if is_wal {
            let frame_header = bytes
                .get(offset..offset + WAL_FRAME_HEADER_SIZE)
                .ok_or(WalrusError::IoWrite)?;
            file.write(frame_header, offset as u64)?;
            offset += WAL_FRAME_HEADER_SIZE;
        }
        let page = bytes
            .get(offset..offset + page_size)
            .ok_or(WalrusError::IoWrite)?;
        file.write(page, offset as u64)?;
        offset += page_size;
    }

    Ok(())
}
