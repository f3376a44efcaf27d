//! In-process emulation of the WAL-index shared memory.
//!
//! Real engines coordinate across processes by mmapping a `-shm` file and
//! taking advisory byte-range locks on it. Here everything lives in one
//! process: regions are heap buffers handed out as [`ShmRegion`] handles,
//! and the lock table is a pair of counters per slot. Lock acquisition
//! never blocks; contention reports busy immediately.

use std::sync::{Arc, Mutex, MutexGuard};

use walrus_error::{Result, WalrusError};
use walrus_types::flags::ShmLockFlags;
use walrus_types::SHM_LOCK_SLOTS;

/// A handle to one mapped WAL-index region.
///
/// Every handle mapping the same index shares one backing buffer, so a
/// counter published through one handle is immediately visible through all
/// others. Access is copy-in/copy-out: WAL-index traffic is small counter
/// and hash-slot updates, not bulk I/O, so nothing here hands out borrows
/// of the buffer.
#[derive(Debug, Clone)]
pub struct ShmRegion {
    data: Arc<Mutex<Box<[u8]>>>,
}

impl ShmRegion {
    fn new(size: usize) -> Self {
        Self {
            data: Arc::new(Mutex::new(vec![0; size].into_boxed_slice())),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, Box<[u8]>> {
        self.data.lock().expect("shm region mutex poisoned")
    }

    /// The region size in bytes, fixed at mapping time.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer().len()
    }

    /// Whether this region is zero-length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer().is_empty()
    }

    /// Copy `buf.len()` bytes out of the region, starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics when the requested span reaches past the end of the region.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) {
        buf.copy_from_slice(&self.buffer()[offset..offset + buf.len()]);
    }

    /// Copy `bytes` into the region, starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics when the written span reaches past the end of the region.
    pub fn write_at(&self, offset: usize, bytes: &[u8]) {
        self.buffer()[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Read one of the WAL-index counters, which the engine stores in
    /// native byte order.
    #[must_use]
    pub fn read_u32(&self, offset: usize) -> u32 {
        let mut word = [0u8; 4];
        self.read_at(offset, &mut word);
        u32::from_ne_bytes(word)
    }

    /// Publish a WAL-index counter in native byte order.
    pub fn write_u32(&self, offset: usize, value: u32) {
        self.write_at(offset, &value.to_ne_bytes());
    }
}

/// The shared-memory state of one database file: its region table and the
/// advisory lock slots.
///
/// Invariant: for every slot, `shared > 0` and `exclusive > 0` are never
/// simultaneously true.
#[derive(Debug, Default)]
pub(crate) struct SharedMemory {
    regions: Vec<ShmRegion>,
    shared: [u32; SHM_LOCK_SLOTS],
    exclusive: [u32; SHM_LOCK_SLOTS],
}

impl SharedMemory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Map the region at `index`.
    ///
    /// Regions grow strictly one at a time: with `extend`, `index` must be
    /// exactly the current region count and a fresh zero-filled region of
    /// `size` bytes is appended. Without `extend`, a missing region is not
    /// an error; the engine probes before the WAL-index exists.
    pub(crate) fn map(
        &mut self,
        index: usize,
        size: usize,
        extend: bool,
    ) -> Result<Option<ShmRegion>> {
        if let Some(region) = self.regions.get(index) {
            return Ok(Some(region.clone()));
        }
        if !extend {
            return Ok(None);
        }
        if index != self.regions.len() {
            return Err(WalrusError::internal(format!(
                "shm region {index} requested with {} regions mapped",
                self.regions.len()
            )));
        }
        let region = ShmRegion::new(size);
        self.regions.push(region.clone());
        Ok(Some(region))
    }

    /// Apply a lock or unlock over `n` slots starting at `offset`.
    pub(crate) fn lock(&mut self, offset: usize, n: usize, flags: ShmLockFlags) -> Result<()> {
        if n == 0 || offset + n > SHM_LOCK_SLOTS {
            return Err(WalrusError::internal(format!(
                "shm lock range [{offset}, {}) out of bounds",
                offset + n
            )));
        }
        let shared_mode = flags.contains(ShmLockFlags::SHARED);
        if flags.contains(ShmLockFlags::LOCK) == flags.contains(ShmLockFlags::UNLOCK)
            || shared_mode == flags.contains(ShmLockFlags::EXCLUSIVE)
        {
            return Err(WalrusError::internal(format!(
                "malformed shm lock flags {flags:?}"
            )));
        }
        if shared_mode && n != 1 {
            return Err(WalrusError::internal(
                "shared shm locks span exactly one slot",
            ));
        }

        let range = offset..offset + n;

        if flags.contains(ShmLockFlags::UNLOCK) {
            if shared_mode {
                for i in range {
                    debug_assert_eq!(self.exclusive[i], 0);
                    // Releasing a never-acquired lock is legal and
                    // idempotent.
                    self.shared[i] = self.shared[i].saturating_sub(1);
                }
            } else {
                for i in range {
                    debug_assert_eq!(self.shared[i], 0);
                    self.exclusive[i] = 0;
                }
            }
            return Ok(());
        }

        if shared_mode {
            if range.clone().any(|i| self.exclusive[i] > 0) {
                return Err(WalrusError::ShmBusy);
            }
            for i in range {
                self.shared[i] += 1;
            }
        } else {
            if range
                .clone()
                .any(|i| self.shared[i] > 0 || self.exclusive[i] > 0)
            {
                return Err(WalrusError::ShmBusy);
            }
            for i in range {
                self.exclusive[i] = 1;
            }
        }

        Ok(())
    }

    /// Drop every region and reset all lock counters. Called when the last
    /// handle on the owning database closes.
    pub(crate) fn release(&mut self) {
        self.regions.clear();
        self.shared = [0; SHM_LOCK_SLOTS];
        self.exclusive = [0; SHM_LOCK_SLOTS];
    }

    /// Whether every region is gone and every lock counter is zero.
    pub(crate) fn is_quiescent(&self) -> bool {
        self.regions.is_empty()
            && self.shared.iter().all(|&c| c == 0)
            && self.exclusive.iter().all(|&c| c == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const LOCK_SHARED: ShmLockFlags = ShmLockFlags::LOCK.union(ShmLockFlags::SHARED);
    const LOCK_EXCLUSIVE: ShmLockFlags = ShmLockFlags::LOCK.union(ShmLockFlags::EXCLUSIVE);
    const UNLOCK_SHARED: ShmLockFlags = ShmLockFlags::UNLOCK.union(ShmLockFlags::SHARED);
    const UNLOCK_EXCLUSIVE: ShmLockFlags = ShmLockFlags::UNLOCK.union(ShmLockFlags::EXCLUSIVE);

    #[test]
    fn regions_grow_one_at_a_time() {
        let mut shm = SharedMemory::new();

        assert!(shm.map(0, 4096, false).unwrap().is_none());

        let first = shm.map(0, 4096, true).unwrap().unwrap();
        assert_eq!(first.len(), 4096);
        assert!(!first.is_empty());
        let mut probe = [0xFFu8; 64];
        first.read_at(0, &mut probe);
        assert_eq!(probe, [0u8; 64]);

        // Re-mapping returns the same backing buffer.
        first.write_u32(0, 99);
        first.write_at(40, b"reader mark");
        let again = shm.map(0, 4096, false).unwrap().unwrap();
        assert_eq!(again.read_u32(0), 99);
        let mut mark = [0u8; 11];
        again.read_at(40, &mut mark);
        assert_eq!(&mark, b"reader mark");

        // Jumping past the end is a caller bug.
        assert!(shm.map(2, 4096, true).is_err());

        shm.map(1, 4096, true).unwrap().unwrap();
        assert_eq!(shm.regions.len(), 2);
    }

    #[test]
    fn exclusive_excludes_everything() {
        let mut shm = SharedMemory::new();

        shm.lock(0, 1, LOCK_EXCLUSIVE).unwrap();
        assert!(matches!(
            shm.lock(0, 1, LOCK_SHARED).unwrap_err(),
            WalrusError::ShmBusy
        ));
        assert!(matches!(
            shm.lock(0, 1, LOCK_EXCLUSIVE).unwrap_err(),
            WalrusError::ShmBusy
        ));

        shm.lock(0, 1, UNLOCK_EXCLUSIVE).unwrap();
        shm.lock(0, 1, LOCK_SHARED).unwrap();
        assert!(matches!(
            shm.lock(0, 1, LOCK_EXCLUSIVE).unwrap_err(),
            WalrusError::ShmBusy
        ));
    }

    #[test]
    fn shared_locks_count() {
        let mut shm = SharedMemory::new();

        shm.lock(3, 1, LOCK_SHARED).unwrap();
        shm.lock(3, 1, LOCK_SHARED).unwrap();
        assert_eq!(shm.shared[3], 2);

        shm.lock(3, 1, UNLOCK_SHARED).unwrap();
        assert_eq!(shm.shared[3], 1);
        shm.lock(3, 1, UNLOCK_SHARED).unwrap();
        assert_eq!(shm.shared[3], 0);

        // Releasing below zero is idempotent.
        shm.lock(3, 1, UNLOCK_SHARED).unwrap();
        assert_eq!(shm.shared[3], 0);
    }

    #[test]
    fn exclusive_ranges_span_slots() {
        let mut shm = SharedMemory::new();

        shm.lock(4, 3, LOCK_EXCLUSIVE).unwrap();
        assert_eq!(&shm.exclusive[4..7], &[1, 1, 1]);

        // Overlap anywhere in the range is busy.
        assert!(shm.lock(6, 2, LOCK_EXCLUSIVE).is_err());

        shm.lock(4, 3, UNLOCK_EXCLUSIVE).unwrap();
        shm.lock(6, 2, LOCK_EXCLUSIVE).unwrap();
    }

    #[test]
    fn range_validation() {
        let mut shm = SharedMemory::new();
        assert!(shm.lock(0, 0, LOCK_EXCLUSIVE).is_err());
        assert!(shm.lock(15, 2, LOCK_EXCLUSIVE).is_err());
        assert!(shm.lock(0, 2, LOCK_SHARED).is_err());
        shm.lock(15, 1, LOCK_EXCLUSIVE).unwrap();
    }

    #[test]
    fn release_resets_everything() {
        let mut shm = SharedMemory::new();
        shm.map(0, 32_768, true).unwrap().unwrap();
        shm.lock(0, 1, LOCK_SHARED).unwrap();
        shm.lock(2, 1, LOCK_EXCLUSIVE).unwrap();
        assert!(!shm.is_quiescent());

        shm.release();
        assert!(shm.is_quiescent());
    }

    proptest! {
        /// Under any sequence of lock operations, no slot ever holds shared
        /// and exclusive counts at the same time, and counts never go
        /// negative (they are unsigned and saturating by construction).
        #[test]
        fn lock_table_invariant_holds(ops in proptest::collection::vec(
            (0usize..SHM_LOCK_SLOTS, 1usize..4, 0u8..4),
            0..64,
        )) {
            let mut shm = SharedMemory::new();
            for (offset, n, kind) in ops {
                let (n, flags) = match kind {
                    0 => (1, LOCK_SHARED),
                    1 => (1, UNLOCK_SHARED),
                    2 => (n, LOCK_EXCLUSIVE),
                    _ => (n, UNLOCK_EXCLUSIVE),
                };
                if offset + n > SHM_LOCK_SLOTS {
                    continue;
                }
                // Unlocking a mode while the other mode is held is a caller
                // protocol violation; skip those sequences.
                let range = offset..offset + n;
                if flags == UNLOCK_SHARED && range.clone().any(|i| shm.exclusive[i] > 0) {
                    continue;
                }
                if flags == UNLOCK_EXCLUSIVE && range.clone().any(|i| shm.shared[i] > 0) {
                    continue;
                }
                let _ = shm.lock(offset, n, flags);
                for i in 0..SHM_LOCK_SLOTS {
                    prop_assert!(shm.shared[i] == 0 || shm.exclusive[i] == 0);
                    prop_assert!(shm.exclusive[i] <= 1);
                }
            }
        }
    }
}
