//! Background snapshot writer (spec §4.11, §6): a consistent point-in-time
//! dump of every database, produced while command handlers keep running.
//!
//! [`format`] is the on-disk layout; [`writer::SnapshotCoordinator`] is the
//! run loop a per-worker fiber drives (trigger check -> prepare -> per-block
//! serialize -> drain pending deletes -> finalize), grounded on the original
//! implementation's `worker_fiber_storage_db_snapshot_rdb.c`.

pub mod format;
pub mod writer;

pub use crate::error::SnapshotError;
pub use writer::SnapshotCoordinator;
