//! Flag sets exchanged with the embedded engine.
//!
//! Bit values match the engine's own open-flag constants so that a flags
//! word can cross the interception boundary unchanged.

bitflags::bitflags! {
    /// Flags passed to `Vfs::open`.
    ///
    /// Exactly one of the file-kind bits (`MAIN_DB`, `MAIN_JOURNAL`, `WAL`)
    /// selects the variant of the file being opened.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const READONLY       = 0x0000_0001;
        const READWRITE      = 0x0000_0002;
        const CREATE         = 0x0000_0004;
        const DELETEONCLOSE  = 0x0000_0008;
        const EXCLUSIVE      = 0x0000_0010;
        const MAIN_DB        = 0x0000_0100;
        const TEMP_DB        = 0x0000_0200;
        const MAIN_JOURNAL   = 0x0000_0800;
        const TEMP_JOURNAL   = 0x0000_1000;
        const WAL            = 0x0008_0000;
    }
}

bitflags::bitflags! {
    /// Flags passed to `Vfs::access`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        const EXISTS    = 0x0000_0001;
        const READWRITE = 0x0000_0002;
    }
}

bitflags::bitflags! {
    /// Flags passed to `VfsFile::sync`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SyncFlags: u32 {
        const NORMAL   = 0x0000_0002;
        const FULL     = 0x0000_0003;
        const DATAONLY = 0x0000_0010;
    }
}

bitflags::bitflags! {
    /// Flags passed to `VfsFile::shm_lock`.
    ///
    /// A legal flags word combines exactly one of `LOCK`/`UNLOCK` with
    /// exactly one of `SHARED`/`EXCLUSIVE`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShmLockFlags: u32 {
        const UNLOCK    = 0x0000_0001;
        const LOCK      = 0x0000_0002;
        const SHARED    = 0x0000_0004;
        const EXCLUSIVE = 0x0000_0008;
    }
}

impl OpenFlags {
    /// Whether exactly one file-kind bit is set.
    #[must_use]
    pub fn has_single_kind(self) -> bool {
        let kinds = self & (Self::MAIN_DB | Self::MAIN_JOURNAL | Self::WAL);
        kinds.bits().count_ones() == 1
    }
}
