use thiserror::Error;

/// Primary error type for walrus storage operations.
///
/// Modeled after the embedded engine's status codes with Rust-idiomatic
/// structure: one variant per distinct failure the volatile backend can
/// report, mapped back to the engine's numeric codes via [`error_code`].
///
/// [`error_code`]: WalrusError::error_code
#[derive(Error, Debug)]
pub enum WalrusError {
    // === Registry errors ===
    /// Open without the create capability on a file that does not exist.
    #[error("unable to open file: '{name}'")]
    FileNotFound { name: String },

    /// Exclusive-create open on a file that already exists.
    #[error("file already exists: '{name}'")]
    FileExists { name: String },

    /// The open flags carried none of the known file-kind bits.
    #[error("open flags select no known file kind")]
    UnknownFileKind,

    /// A WAL was opened before its paired database.
    #[error("no database found for WAL file '{name}'")]
    WalWithoutDatabase { name: String },

    /// Delete of a file that is still referenced by open handles.
    #[error("file is busy: '{name}'")]
    FileBusy { name: String },

    /// Delete of a file that does not exist.
    #[error("cannot delete missing file: '{name}'")]
    DeleteMissing { name: String },

    // === Shared-memory lock errors ===
    /// A shared-memory lock could not be acquired without waiting.
    #[error("shared-memory lock is held")]
    ShmBusy,

    // === Format errors ===
    /// A WAL header carries a page size that disagrees with the database.
    #[error("WAL header page size {wal} does not match database page size {database}")]
    WalHeaderMismatch { wal: u32, database: u32 },

    /// A header field could not be decoded.
    #[error("malformed header: {detail}")]
    BadHeader { detail: String },

    // === I/O errors ===
    /// Read with an offset/amount combination the backend does not serve.
    #[error("disk I/O error during read")]
    IoRead,

    /// Write with an illegal offset/amount, or against a missing frame.
    #[error("disk I/O error during write")]
    IoWrite,

    /// Truncate to a size the file kind does not support.
    #[error("disk I/O error during truncate")]
    IoTruncate,

    /// Sync is always reported as failed; durability is not claimed.
    #[error("disk I/O error during fsync")]
    IoSync,

    /// Delete failed at the host layer.
    #[error("disk I/O error during delete")]
    IoDelete,

    /// Host file I/O error (temp-file passthrough only).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Write attempted before the page size was negotiated.
    #[error("page size not yet negotiated for '{name}'")]
    PageSizeUnset { name: String },

    // === Protocol errors ===
    /// A WAL may only ever be truncated to zero.
    #[error("WAL truncation to a non-zero size")]
    WalTruncateNonZero,

    /// A pragma was recognized but refused.
    #[error("{message}")]
    PragmaRefused { message: &'static str },

    // === Environment errors ===
    /// Loadable extensions are not supported.
    #[error("loadable extensions are not supported")]
    ExtensionsUnsupported,

    /// Out of memory.
    #[error("out of memory")]
    OutOfMemory,

    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Engine status codes for interface parity.
///
/// These match the numeric values the embedded engine expects back from its
/// file-system provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Successful result.
    Ok = 0,
    /// Generic error.
    Error = 1,
    /// Internal logic error.
    Internal = 2,
    /// Out of memory.
    NoMem = 7,
    /// A lock could not be obtained without waiting.
    Busy = 5,
    /// Disk I/O error.
    IoErr = 10,
    /// Stored image is malformed.
    Corrupt = 11,
    /// Not found (also the pragma-passthrough signal).
    NotFound = 12,
    /// Unable to open the file.
    CantOpen = 14,
    /// Locking protocol error.
    Protocol = 15,
}

/// POSIX errno values carried by registry-level failures.
///
/// The backend caches the errno of the last failing registry operation so
/// the engine's last-error query can surface it.
pub mod errno {
    pub const ENOENT: i32 = 2;
    pub const ENOMEM: i32 = 12;
    pub const EBUSY: i32 = 16;
    pub const EEXIST: i32 = 17;
}

impl WalrusError {
    /// Map this error to the engine status code reported at the operation
    /// boundary.
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::FileNotFound { .. } | Self::FileExists { .. } | Self::UnknownFileKind => {
                ErrorCode::CantOpen
            }
            Self::WalWithoutDatabase { .. }
            | Self::WalHeaderMismatch { .. }
            | Self::BadHeader { .. } => ErrorCode::Corrupt,
            Self::FileBusy { .. } | Self::ShmBusy => ErrorCode::Busy,
            Self::DeleteMissing { .. }
            | Self::IoRead
            | Self::IoWrite
            | Self::IoTruncate
            | Self::IoSync
            | Self::IoDelete
            | Self::Io(_)
            | Self::PageSizeUnset { .. }
            | Self::PragmaRefused { .. } => ErrorCode::IoErr,
            Self::WalTruncateNonZero => ErrorCode::Protocol,
            Self::ExtensionsUnsupported => ErrorCode::Error,
            Self::OutOfMemory => ErrorCode::NoMem,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// The POSIX errno flavour of this error, if it has one.
    ///
    /// Only registry-level failures carry an errno; handle-level I/O
    /// failures are reported through the status code alone.
    pub const fn errno(&self) -> Option<i32> {
        match self {
            Self::FileNotFound { .. }
            | Self::DeleteMissing { .. }
            | Self::UnknownFileKind
            | Self::WalWithoutDatabase { .. } => Some(errno::ENOENT),
            Self::FileExists { .. } => Some(errno::EEXIST),
            Self::FileBusy { .. } => Some(errno::EBUSY),
            Self::OutOfMemory => Some(errno::ENOMEM),
            _ => None,
        }
    }

    /// Whether retrying the operation later may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::FileBusy { .. } | Self::ShmBusy)
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a malformed-header error.
    pub fn bad_header(detail: impl Into<String>) -> Self {
        Self::BadHeader {
            detail: detail.into(),
        }
    }
}

/// Result type alias using `WalrusError`.
pub type Result<T> = std::result::Result<T, WalrusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = WalrusError::FileNotFound {
            name: "test.db".to_owned(),
        };
        assert_eq!(err.to_string(), "unable to open file: 'test.db'");
    }

    #[test]
    fn error_display_wal_mismatch() {
        let err = WalrusError::WalHeaderMismatch {
            wal: 1024,
            database: 4096,
        };
        assert_eq!(
            err.to_string(),
            "WAL header page size 1024 does not match database page size 4096"
        );
    }

    #[test]
    fn error_code_mapping() {
        assert_eq!(
            WalrusError::FileNotFound {
                name: String::new()
            }
            .error_code(),
            ErrorCode::CantOpen
        );
        assert_eq!(
            WalrusError::FileBusy {
                name: String::new()
            }
            .error_code(),
            ErrorCode::Busy
        );
        assert_eq!(WalrusError::ShmBusy.error_code(), ErrorCode::Busy);
        assert_eq!(
            WalrusError::WalHeaderMismatch {
                wal: 512,
                database: 4096
            }
            .error_code(),
            ErrorCode::Corrupt
        );
        assert_eq!(
            WalrusError::WalTruncateNonZero.error_code(),
            ErrorCode::Protocol
        );
        assert_eq!(WalrusError::IoSync.error_code(), ErrorCode::IoErr);
        assert_eq!(WalrusError::OutOfMemory.error_code(), ErrorCode::NoMem);
    }

    #[test]
    fn errno_carry() {
        assert_eq!(
            WalrusError::FileNotFound {
                name: String::new()
            }
            .errno(),
            Some(errno::ENOENT)
        );
        assert_eq!(
            WalrusError::FileExists {
                name: String::new()
            }
            .errno(),
            Some(errno::EEXIST)
        );
        assert_eq!(
            WalrusError::FileBusy {
                name: String::new()
            }
            .errno(),
            Some(errno::EBUSY)
        );
        assert_eq!(WalrusError::IoWrite.errno(), None);
        assert_eq!(WalrusError::ShmBusy.errno(), None);
    }

    #[test]
    fn is_transient() {
        assert!(WalrusError::ShmBusy.is_transient());
        assert!(WalrusError::FileBusy {
            name: String::new()
        }
        .is_transient());
        assert!(!WalrusError::IoWrite.is_transient());
    }

    #[test]
    fn error_code_values() {
        assert_eq!(ErrorCode::Ok as i32, 0);
        assert_eq!(ErrorCode::Busy as i32, 5);
        assert_eq!(ErrorCode::IoErr as i32, 10);
        assert_eq!(ErrorCode::Corrupt as i32, 11);
        assert_eq!(ErrorCode::NotFound as i32, 12);
        assert_eq!(ErrorCode::CantOpen as i32, 14);
        assert_eq!(ErrorCode::Protocol as i32, 15);
    }

    #[test]
    fn io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: WalrusError = io_err.into();
        assert!(matches!(err, WalrusError::Io(_)));
        assert_eq!(err.error_code(), ErrorCode::IoErr);
    }
}
