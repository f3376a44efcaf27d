use walrus_error::{Result, WalrusError};
use walrus_types::flags::{AccessFlags, OpenFlags, ShmLockFlags, SyncFlags};
use walrus_types::LockLevel;

use crate::shm::ShmRegion;

/// A pragma or control request forwarded from the engine to a file handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileControl<'a> {
    /// `PRAGMA name` or `PRAGMA name = value`.
    Pragma {
        name: &'a str,
        value: Option<&'a str>,
    },
    /// Any other control opcode; accepted without effect.
    Other(u32),
}

/// How a file handled a control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    /// The request was fully handled here.
    Handled,
    /// The request was observed but the engine must apply its own handling
    /// as well (the "not-found" signal for pragmas).
    Passthrough,
}

/// A virtual filesystem implementation.
///
/// This trait abstracts all file-system operations the embedded engine
/// performs, allowing different backends behind one interception hook.
pub trait Vfs: Send + Sync {
    /// The file handle type produced by this VFS.
    type File: VfsFile;

    /// The registration name of this VFS.
    fn name(&self) -> &str;

    /// Open a file.
    ///
    /// `name` is `None` for temporary files, which must be backed by the
    /// host file system and removed on close. `flags` selects the file kind
    /// (main DB, journal, WAL) and the open mode (create, exclusive, ...).
    ///
    /// Returns the opened file and the flags that were actually used.
    fn open(&self, name: Option<&str>, flags: OpenFlags) -> Result<(Self::File, OpenFlags)>;

    /// Delete a file. `sync_dir` is meaningless for a volatile backend and
    /// is ignored.
    fn delete(&self, name: &str, sync_dir: bool) -> Result<()>;

    /// Check file access. A file that exists grants every access mode.
    fn access(&self, name: &str, flags: AccessFlags) -> Result<bool>;

    /// Resolve a name into a full path. Names are opaque registry tokens
    /// here, so this is the identity.
    fn full_pathname(&self, name: &str) -> Result<String>;

    /// Fill `buf` with bytes suitable for temporary names and salts.
    ///
    /// The default implementation is deterministic (xorshift) for
    /// reproducible tests; backends may override it with OS randomness.
    fn randomness(&self, buf: &mut [u8]) {
        let mut state: u64 = 0x5DEE_CE66_D1A4_F681;
        for chunk in buf.chunks_mut(8) {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            for (dst, &src) in chunk.iter_mut().zip(state.to_le_bytes().iter()) {
                *dst = src;
            }
        }
    }

    /// Sleep for at least `microseconds`. A volatile backend has nothing to
    /// wait for, so the default returns immediately with the requested
    /// duration.
    fn sleep(&self, microseconds: u32) -> u32 {
        microseconds
    }

    /// The current time in milliseconds since the UNIX epoch.
    fn current_time_millis(&self) -> i64 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
    }

    /// The current time as a float whose bit pattern coincides with
    /// [`current_time_millis`]. The engine reads whichever representation
    /// its build selected; both must come from the same clock sample.
    ///
    /// [`current_time_millis`]: Vfs::current_time_millis
    #[allow(clippy::cast_sign_loss)]
    fn current_time(&self) -> f64 {
        f64::from_bits(self.current_time_millis() as u64)
    }

    /// Dynamic-loader entry point. Loadable extensions are unsupported.
    fn open_extension(&self, _path: &str) -> Result<()> {
        Err(WalrusError::ExtensionsUnsupported)
    }

    /// The errno-flavoured code of the most recent failing registry
    /// operation, or 0 when none has failed.
    fn last_error(&self) -> i32 {
        0
    }
}

/// A file handle opened by a [`Vfs`].
pub trait VfsFile: Send + Sync {
    /// Close the file. After this call the handle must not be used.
    fn close(&mut self) -> Result<()>;

    /// Read `buf.len()` bytes starting at byte `offset`.
    ///
    /// Returns the number of bytes actually read. On a short read the
    /// remainder of `buf` is zero-filled; the caller detects the short read
    /// by comparing the returned count against `buf.len()`.
    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Write `buf` starting at byte `offset`.
    fn write(&mut self, buf: &[u8], offset: u64) -> Result<()>;

    /// Truncate the file to `size` bytes.
    fn truncate(&mut self, size: u64) -> Result<()>;

    /// Sync the file contents to stable storage.
    fn sync(&mut self, flags: SyncFlags) -> Result<()>;

    /// The current file size in bytes.
    fn file_size(&self) -> Result<u64>;

    /// Acquire a file lock at the given level.
    fn lock(&mut self, level: LockLevel) -> Result<()>;

    /// Release the file lock down to the given level.
    fn unlock(&mut self, level: LockLevel) -> Result<()>;

    /// Whether a reserved (or higher) lock is held on this file.
    fn check_reserved_lock(&self) -> Result<bool>;

    /// Handle a control request.
    fn file_control(&mut self, request: FileControl<'_>) -> Result<ControlOutcome>;

    /// The minimum write granularity of the underlying storage. Zero for a
    /// volatile backend: the engine falls back to its own default and no
    /// sector-alignment promises are made.
    fn sector_size(&self) -> u32 {
        0
    }

    /// Device capability flags. Zero: no special characteristics.
    fn device_characteristics(&self) -> u32 {
        0
    }

    // --- Shared-memory methods (required for WAL mode) ---

    /// Map a shared-memory region. `region` is a 0-based index; regions are
    /// appended strictly one at a time. Returns `None` when the region does
    /// not exist and `extend` is false.
    fn shm_map(&mut self, region: u32, size: u32, extend: bool) -> Result<Option<ShmRegion>>;

    /// Acquire or release advisory locks over `n` slots starting at
    /// `offset`. Contention fails immediately with a busy error; there is
    /// no blocking.
    fn shm_lock(&mut self, offset: u32, n: u32, flags: ShmLockFlags) -> Result<()>;

    /// Memory barrier between shared-memory writes and reads. A no-op
    /// in-process.
    fn shm_barrier(&self);

    /// Unmap the shared-memory regions. Regions persist until the last
    /// handle on the database closes, so this is a no-op.
    fn shm_unmap(&mut self, delete: bool) -> Result<()>;
}
