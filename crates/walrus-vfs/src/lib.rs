//! Volatile page-addressed storage backend.
//!
//! This crate implements a virtual file system that the embedded SQL engine
//! mounts in place of the OS. All files live in memory as dense vectors of
//! pages; the WAL additionally carries a 24-byte header per frame, which is
//! what lets the replication layer lift committed frames straight out of the
//! page inventory and replay them into peers.
//!
//! Three file kinds exist:
//!
//! - **database** — pages plus a shared-memory region table and a 16-slot
//!   advisory lock table (the WAL-index coordination state, emulated
//!   in-process),
//! - **WAL** — pages with frame headers, plus the 32-byte WAL file header,
//! - **journal** — a name-only placeholder; the engine opens journals even
//!   with WAL mode enforced, so reads fail and writes are swallowed.
//!
//! Durability is explicitly not claimed: sync requests fail, and dropping
//! the backend drops every file.

pub mod shm;
pub mod traits;
pub mod volatile;

mod page;
mod snapshot;

pub use shm::ShmRegion;
pub use traits::{ControlOutcome, FileControl, Vfs, VfsFile};
pub use volatile::{VolatileFile, VolatileVfs};
