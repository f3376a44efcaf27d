//! The volatile backend: a registry of in-memory files behind the
//! [`Vfs`]/[`VfsFile`] traits.
//!
//! One [`VolatileVfs`] instance is the single source of truth for every
//! file the engine opens through it. The DB↔WAL pairing is never stored:
//! it is recomputed from the name (by stripping the `-wal` suffix) whenever
//! a WAL operation needs its database, so the registry map stays the only
//! authority on what exists.
//!
//! Callers are expected to be serialized by the engine's own mutex; the
//! internal lock exists so handles can share the registry, not to make
//! concurrent mutation meaningful.

use std::collections::HashMap;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};
use walrus_error::{errno, Result, WalrusError};
use walrus_format::{
    database_header_page_size, wal_frame_number_for_offset, wal_frame_size, wal_header_page_size,
    wal_size, DB_HEADER_SIZE, WAL_FRAME_HEADER_SIZE, WAL_HEADER_SIZE,
};
use walrus_types::flags::{AccessFlags, OpenFlags, ShmLockFlags, SyncFlags};
use walrus_types::{database_name_of_wal, LockLevel, PageNumber};

use crate::page::PageStore;
use crate::shm::{SharedMemory, ShmRegion};
use crate::traits::{ControlOutcome, FileControl, Vfs, VfsFile};

/// Byte offset of the checksum field within a WAL header.
const WAL_HEADER_CHECKSUM_RANGE: std::ops::Range<usize> = 24..32;

fn lock_err() -> WalrusError {
    WalrusError::internal("volatile registry lock poisoned")
}

fn stale_handle(name: &str) -> WalrusError {
    WalrusError::internal(format!("handle refers to destroyed file '{name}'"))
}

/// State of a main database file: its pages plus the emulated WAL-index
/// shared memory.
#[derive(Debug)]
struct DatabaseState {
    store: PageStore,
    shm: SharedMemory,
}

impl DatabaseState {
    fn new() -> Self {
        Self {
            store: PageStore::new(false),
            shm: SharedMemory::new(),
        }
    }
}

/// State of a WAL file: frames (pages with frame headers) plus the 32-byte
/// file header.
#[derive(Debug)]
struct WalState {
    store: PageStore,
    header: [u8; WAL_HEADER_SIZE],
    header_written: bool,
}

impl WalState {
    fn new() -> Self {
        Self {
            store: PageStore::new(true),
            header: [0; WAL_HEADER_SIZE],
            header_written: false,
        }
    }

    fn is_empty(&self) -> bool {
        !self.header_written && self.store.is_empty()
    }
}

#[derive(Debug)]
enum FileKind {
    Database(DatabaseState),
    /// Journals exist by name only: the engine opens them even with WAL
    /// mode enforced, but their reads and writes carry no content.
    Journal,
    Wal(WalState),
}

#[derive(Debug)]
struct FileState {
    refcount: u32,
    kind: FileKind,
}

impl FileState {
    fn is_empty(&self) -> bool {
        match &self.kind {
            FileKind::Database(db) => db.store.is_empty(),
            FileKind::Journal => true,
            FileKind::Wal(wal) => wal.is_empty(),
        }
    }
}

#[derive(Debug, Default)]
struct VfsInner {
    files: HashMap<String, FileState>,
    last_error: i32,
}

impl VfsInner {
    fn state(&self, name: &str) -> Result<&FileState> {
        self.files.get(name).ok_or_else(|| stale_handle(name))
    }

    fn state_mut(&mut self, name: &str) -> Result<&mut FileState> {
        self.files.get_mut(name).ok_or_else(|| stale_handle(name))
    }
}

/// The volatile file-system backend.
///
/// Cloning shares the registry, so the engine-facing instance and the
/// replication-facing instance observe the same files.
#[derive(Debug, Clone)]
pub struct VolatileVfs {
    name: String,
    inner: Arc<Mutex<VfsInner>>,
}

impl VolatileVfs {
    /// Create an empty backend with the given registration name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(Mutex::new(VfsInner::default())),
        }
    }

    /// The page size associated with a named file.
    ///
    /// For a WAL name this is the paired database's page size. Fails when
    /// the file does not exist or nothing has negotiated a size yet.
    pub fn page_size_of(&self, name: &str) -> Result<u32> {
        let inner = self.inner.lock().map_err(|_| lock_err())?;
        if database_name_of_wal(name).is_some() {
            return paired_database_page_size(&inner, name);
        }
        let Some(state) = inner.files.get(name) else {
            return Err(WalrusError::FileNotFound { name: name.into() });
        };
        match &state.kind {
            FileKind::Database(db) if db.store.page_size != 0 => Ok(db.store.page_size),
            _ => Err(WalrusError::PageSizeUnset { name: name.into() }),
        }
    }
}

/// A handle to one open file.
///
/// Handles opened with a name address the shared registry; handles opened
/// without one (temporary files) delegate their I/O to an anonymous host
/// file that disappears on close.
#[derive(Debug)]
pub struct VolatileFile {
    inner: Arc<Mutex<VfsInner>>,
    name: String,
    flags: OpenFlags,
    temp: Option<File>,
}

// ---------------------------------------------------------------------------
// Registry operations
// ---------------------------------------------------------------------------

fn open_locked(inner: &mut VfsInner, name: &str, flags: OpenFlags) -> Result<()> {
    let exists = inner.files.contains_key(name);

    if exists {
        // Exclusive-create demands that the file does not exist yet; it is
        // not about exclusive access.
        if flags.contains(OpenFlags::EXCLUSIVE) && flags.contains(OpenFlags::CREATE) {
            return Err(WalrusError::FileExists { name: name.into() });
        }
    } else {
        if !flags.contains(OpenFlags::CREATE) {
            return Err(WalrusError::FileNotFound { name: name.into() });
        }

        let kind = if flags.contains(OpenFlags::MAIN_DB) {
            FileKind::Database(DatabaseState::new())
        } else if flags.contains(OpenFlags::MAIN_JOURNAL) {
            FileKind::Journal
        } else if flags.contains(OpenFlags::WAL) {
            // A WAL is only meaningful next to its database.
            let database = database_name_of_wal(name).and_then(|db| inner.files.get(db));
            if !matches!(
                database,
                Some(FileState {
                    kind: FileKind::Database(_),
                    ..
                })
            ) {
                return Err(WalrusError::WalWithoutDatabase { name: name.into() });
            }
            FileKind::Wal(WalState::new())
        } else {
            return Err(WalrusError::UnknownFileKind);
        };

        inner.files.insert(name.to_owned(), FileState { refcount: 0, kind });
        debug!(name, ?flags, "volatile file created");
    }

    let state = inner.state_mut(name)?;
    state.refcount += 1;
    Ok(())
}

fn delete_locked(inner: &mut VfsInner, name: &str) -> Result<()> {
    let Some(state) = inner.files.get(name) else {
        inner.last_error = errno::ENOENT;
        return Err(WalrusError::DeleteMissing { name: name.into() });
    };
    if state.refcount > 0 {
        inner.last_error = errno::EBUSY;
        return Err(WalrusError::FileBusy { name: name.into() });
    }
    inner.files.remove(name);
    debug!(name, "volatile file deleted");
    Ok(())
}

/// The page size of the database paired with the given WAL name.
fn paired_database_page_size(inner: &VfsInner, wal_name: &str) -> Result<u32> {
    let state = database_name_of_wal(wal_name).and_then(|db| inner.files.get(db));
    let Some(FileState {
        kind: FileKind::Database(db),
        ..
    }) = state
    else {
        return Err(WalrusError::WalWithoutDatabase {
            name: wal_name.into(),
        });
    };
    if db.store.page_size == 0 {
        return Err(WalrusError::PageSizeUnset {
            name: wal_name.into(),
        });
    }
    Ok(db.store.page_size)
}

/// The page size a WAL operation should use, inheriting it from the paired
/// database on first access.
fn wal_page_size(inner: &mut VfsInner, wal_name: &str) -> Result<u32> {
    let current = match &inner.state(wal_name)?.kind {
        FileKind::Wal(wal) => wal.store.page_size,
        _ => return Err(stale_handle(wal_name)),
    };
    if current != 0 {
        return Ok(current);
    }

    let inherited = paired_database_page_size(inner, wal_name)?;
    if let FileKind::Wal(wal) = &mut inner.state_mut(wal_name)?.kind {
        wal.store.page_size = inherited;
    }
    Ok(inherited)
}

// ---------------------------------------------------------------------------
// Handle I/O
// ---------------------------------------------------------------------------

fn short_read(buf: &mut [u8]) -> usize {
    // The engine requires short reads to zero-fill the unread remainder;
    // failing to do so eventually corrupts the database.
    buf.fill(0);
    0
}

fn read_database(db: &DatabaseState, buf: &mut [u8], offset: u64) -> Result<usize> {
    let page_size = db.store.page_size;
    let ps = u64::from(page_size);
    let amount = buf.len();

    let pgno = if offset < ps {
        // Reading from page 1, possibly partially: the engine reads the
        // 100-byte header at startup.
        if offset + amount as u64 > ps {
            return Err(WalrusError::IoRead);
        }
        PageNumber::ONE
    } else {
        if amount as u64 != ps || offset % ps != 0 {
            return Err(WalrusError::IoRead);
        }
        PageNumber::new(u32::try_from(offset / ps + 1).map_err(|_| WalrusError::IoRead)?)
            .ok_or(WalrusError::IoRead)?
    };

    let Some(page) = db.store.lookup(pgno) else {
        return Ok(short_read(buf));
    };

    if pgno == PageNumber::ONE {
        let start = offset as usize;
        buf.copy_from_slice(&page.data()[start..start + amount]);
    } else {
        buf.copy_from_slice(&page.data()[..amount]);
    }
    Ok(amount)
}

fn read_wal(wal: &WalState, buf: &mut [u8], offset: u64) -> Result<usize> {
    let page_size = wal.store.page_size;
    let frame_size = wal_frame_size(page_size);
    let header_size = WAL_HEADER_SIZE as u64;
    let amount = buf.len();

    if offset == 0 {
        if amount != WAL_HEADER_SIZE {
            return Err(WalrusError::IoRead);
        }
        buf.copy_from_slice(&wal.header);
        return Ok(amount);
    }

    // Anything past the file header is a frame-header read, a checksum
    // read, a page read, or a full-frame read.
    enum Target {
        FrameHeader,
        Checksum,
        PageBody,
        FullFrame,
    }

    let (target, pgno) = if amount == WAL_FRAME_HEADER_SIZE {
        if offset < header_size || (offset - header_size) % frame_size != 0 {
            return Err(WalrusError::IoRead);
        }
        (
            Target::FrameHeader,
            wal_frame_number_for_offset(page_size, offset),
        )
    } else if amount == 8 {
        if offset == WAL_FRAME_HEADER_SIZE as u64 {
            // The checksum field of the file header itself.
            buf.copy_from_slice(&wal.header[WAL_HEADER_CHECKSUM_RANGE]);
            return Ok(amount);
        }
        let base = 16 + header_size;
        if offset < base || (offset - base) % frame_size != 0 {
            return Err(WalrusError::IoRead);
        }
        let pgno = u32::try_from((offset - base) / frame_size + 1).map_err(|_| WalrusError::IoRead)?;
        (Target::Checksum, pgno)
    } else if amount as u64 == u64::from(page_size) {
        let base = header_size + WAL_FRAME_HEADER_SIZE as u64;
        if offset < base || (offset - base) % frame_size != 0 {
            return Err(WalrusError::IoRead);
        }
        (
            Target::PageBody,
            wal_frame_number_for_offset(page_size, offset),
        )
    } else if amount as u64 == frame_size {
        if offset < header_size || (offset - header_size) % frame_size != 0 {
            return Err(WalrusError::IoRead);
        }
        (
            Target::FullFrame,
            wal_frame_number_for_offset(page_size, offset),
        )
    } else {
        return Err(WalrusError::IoRead);
    };

    let Some(page) = PageNumber::new(pgno).and_then(|pgno| wal.store.lookup(pgno)) else {
        // A frame that was never written.
        return Ok(short_read(buf));
    };
    let frame_header = page.frame_header().ok_or_else(|| {
        WalrusError::internal("WAL page without frame header")
    })?;

    match target {
        Target::FrameHeader => buf.copy_from_slice(frame_header),
        Target::Checksum => buf.copy_from_slice(&frame_header[16..24]),
        Target::PageBody => buf.copy_from_slice(page.data()),
        Target::FullFrame => {
            buf[..WAL_FRAME_HEADER_SIZE].copy_from_slice(frame_header);
            buf[WAL_FRAME_HEADER_SIZE..].copy_from_slice(page.data());
        }
    }
    Ok(amount)
}

fn write_database(db: &mut DatabaseState, name: &str, buf: &[u8], offset: u64) -> Result<()> {
    let amount = buf.len();

    let pgno = if offset == 0 {
        // The first database page: the buffer must contain at least the
        // header, which carries the page size at bytes [16, 18).
        if amount < DB_HEADER_SIZE {
            return Err(WalrusError::IoWrite);
        }
        let page_size = database_header_page_size(buf)?;

        if db.store.page_size == 0 {
            db.store.page_size = page_size;
            debug!(name, page_size, "database page size negotiated");
        } else if db.store.page_size != page_size {
            // 'PRAGMA page_size=N' refuses changes, so the header can
            // never legitimately disagree with the recorded size.
            return Err(WalrusError::IoWrite);
        }
        PageNumber::ONE
    } else {
        if db.store.page_size == 0 {
            return Err(WalrusError::PageSizeUnset { name: name.into() });
        }
        let ps = u64::from(db.store.page_size);
        if offset % ps != 0 || amount as u64 != ps {
            return Err(WalrusError::IoWrite);
        }
        PageNumber::new(u32::try_from(offset / ps + 1).map_err(|_| WalrusError::IoWrite)?)
            .ok_or(WalrusError::IoWrite)?
    };

    if amount > db.store.page_size as usize {
        return Err(WalrusError::IoWrite);
    }

    let page = db.store.ensure(pgno)?;
    page.data_mut()[..amount].copy_from_slice(buf);
    trace!(name, pgno = pgno.get(), amount, "database page write");
    Ok(())
}

fn write_wal(wal: &mut WalState, name: &str, buf: &[u8], offset: u64) -> Result<()> {
    let page_size = wal.store.page_size;
    let frame_size = wal_frame_size(page_size);
    let header_size = WAL_HEADER_SIZE as u64;
    let amount = buf.len();

    if offset == 0 {
        if amount != WAL_HEADER_SIZE {
            return Err(WalrusError::IoWrite);
        }
        // The page size encoded in the WAL header must match the paired
        // database exactly; anything else means the engine and the backend
        // disagree about the file and the WAL is unusable.
        let wal_ps = wal_header_page_size(buf)?;
        if wal_ps != page_size {
            return Err(WalrusError::WalHeaderMismatch {
                wal: wal_ps,
                database: page_size,
            });
        }
        wal.header.copy_from_slice(buf);
        wal.header_written = true;
        debug!(name, page_size, "WAL header stored");
        return Ok(());
    }

    if amount == WAL_FRAME_HEADER_SIZE {
        if offset < header_size || (offset - header_size) % frame_size != 0 {
            return Err(WalrusError::IoWrite);
        }
        let pgno = PageNumber::new(wal_frame_number_for_offset(page_size, offset))
            .ok_or(WalrusError::IoWrite)?;
        let page = wal.store.ensure(pgno)?;
        let frame_header = page
            .frame_header_mut()
            .ok_or_else(|| WalrusError::internal("WAL page without frame header"))?;
        frame_header.copy_from_slice(buf);
        trace!(name, frame = pgno.get(), "WAL frame header write");
        Ok(())
    } else if amount as u64 == u64::from(page_size) {
        let base = header_size + WAL_FRAME_HEADER_SIZE as u64;
        if offset < base || (offset - base) % frame_size != 0 {
            return Err(WalrusError::IoWrite);
        }
        let pgno = PageNumber::new(wal_frame_number_for_offset(page_size, offset))
            .ok_or(WalrusError::IoWrite)?;
        // The engine writes the frame header before the frame body, so the
        // page must already exist.
        let Some(page) = wal.store.lookup_mut(pgno) else {
            return Err(WalrusError::IoWrite);
        };
        page.data_mut().copy_from_slice(buf);
        trace!(name, frame = pgno.get(), "WAL frame body write");
        Ok(())
    } else {
        Err(WalrusError::IoWrite)
    }
}

// ---------------------------------------------------------------------------
// Trait implementations
// ---------------------------------------------------------------------------

impl Vfs for VolatileVfs {
    type File = VolatileFile;

    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, name: Option<&str>, flags: OpenFlags) -> Result<(Self::File, OpenFlags)> {
        let Some(name) = name else {
            // A nameless open is a temporary file; delegate to the host
            // file system. The engine always pairs this with
            // delete-on-close, which an anonymous file gives us for free.
            let temp = tempfile::tempfile()?;
            let file = VolatileFile {
                inner: Arc::clone(&self.inner),
                name: String::new(),
                flags,
                temp: Some(temp),
            };
            return Ok((file, flags));
        };

        let mut inner = self.inner.lock().map_err(|_| lock_err())?;
        if let Err(err) = open_locked(&mut inner, name, flags) {
            if let Some(code) = err.errno() {
                inner.last_error = code;
            }
            return Err(err);
        }
        drop(inner);

        let mut out_flags = flags;
        if flags.contains(OpenFlags::CREATE) {
            out_flags |= OpenFlags::READWRITE;
        }

        let file = VolatileFile {
            inner: Arc::clone(&self.inner),
            name: name.to_owned(),
            flags,
            temp: None,
        };
        Ok((file, out_flags))
    }

    fn delete(&self, name: &str, _sync_dir: bool) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| lock_err())?;
        delete_locked(&mut inner, name)
    }

    fn access(&self, name: &str, _flags: AccessFlags) -> Result<bool> {
        let inner = self.inner.lock().map_err(|_| lock_err())?;
        Ok(inner.files.contains_key(name))
    }

    fn full_pathname(&self, name: &str) -> Result<String> {
        // Names are opaque registry tokens, not paths.
        Ok(name.to_owned())
    }

    fn last_error(&self) -> i32 {
        self.inner.lock().map(|inner| inner.last_error).unwrap_or(0)
    }
}

impl VfsFile for VolatileFile {
    fn close(&mut self) -> Result<()> {
        if let Some(temp) = self.temp.take() {
            // Anonymous host files vanish when the descriptor drops.
            drop(temp);
            return Ok(());
        }

        let mut inner = self.inner.lock().map_err(|_| lock_err())?;
        let state = inner.state_mut(&self.name)?;
        if state.refcount == 0 {
            return Err(WalrusError::internal("close with zero refcount"));
        }
        state.refcount -= 1;

        if state.refcount == 0 {
            if let FileKind::Database(db) = &mut state.kind {
                db.shm.release();
                debug_assert!(db.shm.is_quiescent());
                debug!(name = %self.name, "last handle closed, shared memory released");
            }
        }

        if self.flags.contains(OpenFlags::DELETEONCLOSE) {
            delete_locked(&mut inner, &self.name)?;
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if let Some(temp) = &mut self.temp {
            // Positioned reads may return short even before end of file;
            // keep going until the buffer is full or the file runs out.
            let mut filled = 0;
            while filled < buf.len() {
                let n = temp.read_at(&mut buf[filled..], offset + filled as u64)?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled < buf.len() {
                buf[filled..].fill(0);
            }
            return Ok(filled);
        }

        let mut inner = self.inner.lock().map_err(|_| lock_err())?;

        if inner.state(&self.name)?.is_empty() {
            return Ok(short_read(buf));
        }

        // WAL files learn their page size from the paired database the
        // first time they are touched.
        if matches!(inner.state(&self.name)?.kind, FileKind::Wal(_)) {
            wal_page_size(&mut inner, &self.name)?;
        }

        match &inner.state(&self.name)?.kind {
            FileKind::Database(db) => read_database(db, buf, offset),
            FileKind::Journal => Err(WalrusError::IoRead),
            FileKind::Wal(wal) => read_wal(wal, buf, offset),
        }
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<()> {
        if let Some(temp) = &mut self.temp {
            temp.write_all_at(buf, offset)?;
            return Ok(());
        }

        let mut inner = self.inner.lock().map_err(|_| lock_err())?;

        if matches!(inner.state(&self.name)?.kind, FileKind::Wal(_)) {
            wal_page_size(&mut inner, &self.name)?;
        }

        match &mut inner.state_mut(&self.name)?.kind {
            FileKind::Database(db) => write_database(db, &self.name, buf, offset),
            // Journal writes are swallowed: rollback journals carry no
            // information in a WAL-only deployment.
            FileKind::Journal => Ok(()),
            FileKind::Wal(wal) => write_wal(wal, &self.name, buf, offset),
        }
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        if let Some(temp) = &mut self.temp {
            temp.set_len(size)?;
            return Ok(());
        }

        let mut inner = self.inner.lock().map_err(|_| lock_err())?;
        let state = inner.state_mut(&self.name)?;

        if state.is_empty() {
            if size > 0 {
                return Err(WalrusError::IoTruncate);
            }
            return Ok(());
        }

        match &mut state.kind {
            FileKind::Database(db) => {
                let ps = u64::from(db.store.page_size);
                if size % ps != 0 {
                    return Err(WalrusError::IoTruncate);
                }
                let n_pages =
                    u32::try_from(size / ps).map_err(|_| WalrusError::IoTruncate)?;
                db.store.truncate(n_pages)?;
                debug!(name = %self.name, n_pages, "database truncated");
                Ok(())
            }
            FileKind::Journal => Err(WalrusError::IoTruncate),
            FileKind::Wal(wal) => {
                // The engine only ever truncates a WAL to zero, after a
                // full checkpoint.
                if size != 0 {
                    return Err(WalrusError::WalTruncateNonZero);
                }
                wal.store.truncate(0)?;
                wal.header = [0; WAL_HEADER_SIZE];
                wal.header_written = false;
                debug!(name = %self.name, "WAL reset");
                Ok(())
            }
        }
    }

    fn sync(&mut self, _flags: SyncFlags) -> Result<()> {
        // Durability is not claimed; the engine is expected to run with
        // syncing disabled against this backend.
        Err(WalrusError::IoSync)
    }

    fn file_size(&self) -> Result<u64> {
        if let Some(temp) = &self.temp {
            return Ok(temp.metadata()?.len());
        }

        let inner = self.inner.lock().map_err(|_| lock_err())?;
        let state = inner.state(&self.name)?;

        if state.is_empty() {
            return Ok(0);
        }

        Ok(match &state.kind {
            FileKind::Database(db) => {
                u64::from(db.store.count()) * u64::from(db.store.page_size)
            }
            FileKind::Journal => 0,
            FileKind::Wal(wal) => {
                wal_size(wal.store.page_size, u64::from(wal.store.count()))
            }
        })
    }

    fn lock(&mut self, _level: LockLevel) -> Result<()> {
        // No other process can see these files.
        Ok(())
    }

    fn unlock(&mut self, _level: LockLevel) -> Result<()> {
        Ok(())
    }

    fn check_reserved_lock(&self) -> Result<bool> {
        // Only meaningful in rollback-journal mode, which this backend
        // does not serve; report held.
        Ok(true)
    }

    fn file_control(&mut self, request: FileControl<'_>) -> Result<ControlOutcome> {
        let FileControl::Pragma { name, value } = request else {
            return Ok(ControlOutcome::Handled);
        };

        if self.temp.is_none() {
            match (name, value) {
                ("page_size", Some(value)) => {
                    self.pragma_page_size(value)?;
                }
                ("journal_mode", Some(value)) => {
                    if !value.eq_ignore_ascii_case("wal") {
                        return Err(WalrusError::PragmaRefused {
                            message: "only WAL mode is supported",
                        });
                    }
                }
                _ => {}
            }
        }

        // Signal "not found" so the engine applies its own pragma handling
        // on top of ours; answering here would swallow the pragma.
        Ok(ControlOutcome::Passthrough)
    }

    fn shm_map(&mut self, region: u32, size: u32, extend: bool) -> Result<Option<ShmRegion>> {
        let mut inner = self.inner.lock().map_err(|_| lock_err())?;
        match &mut inner.state_mut(&self.name)?.kind {
            FileKind::Database(db) => {
                let mapped = db.shm.map(region as usize, size as usize, extend)?;
                if extend {
                    trace!(name = %self.name, region, size, "shm region mapped");
                }
                Ok(mapped)
            }
            _ => Err(WalrusError::internal(
                "shared memory requested on a non-database file",
            )),
        }
    }

    fn shm_lock(&mut self, offset: u32, n: u32, flags: ShmLockFlags) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| lock_err())?;
        match &mut inner.state_mut(&self.name)?.kind {
            FileKind::Database(db) => db.shm.lock(offset as usize, n as usize, flags),
            _ => Err(WalrusError::internal(
                "shared memory requested on a non-database file",
            )),
        }
    }

    fn shm_barrier(&self) {
        // In-process memory: the registry mutex already orders accesses.
    }

    fn shm_unmap(&mut self, _delete: bool) -> Result<()> {
        // Regions stay alive until the last handle on the database closes.
        Ok(())
    }
}

impl VolatileFile {
    /// 'PRAGMA page_size=N': record a valid size before the first write;
    /// refuse changes; silently ignore invalid values (the engine does the
    /// same).
    fn pragma_page_size(&self, value: &str) -> Result<()> {
        let Ok(requested) = value.parse::<u32>() else {
            return Ok(());
        };
        if !(512..=65_536).contains(&requested) || !requested.is_power_of_two() {
            return Ok(());
        }

        let mut inner = self.inner.lock().map_err(|_| lock_err())?;
        let store = match &mut inner.state_mut(&self.name)?.kind {
            FileKind::Database(db) => &mut db.store,
            FileKind::Wal(wal) => &mut wal.store,
            FileKind::Journal => return Ok(()),
        };
        if store.page_size != 0 && store.page_size != requested {
            return Err(WalrusError::PragmaRefused {
                message: "changing page size is not supported",
            });
        }
        store.page_size = requested;
        Ok(())
    }

    /// The flags this handle was opened with.
    #[must_use]
    pub fn open_flags(&self) -> OpenFlags {
        self.flags
    }
}
