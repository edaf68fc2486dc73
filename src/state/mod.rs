//! Persistent stack state.
//!
//! The state records the ledger of the last run, so a later destroy knows
//! which provider handles to delete, plus a short run history. Backends are
//! a local file or an S3 bucket, both guarded by an expiring lock.

mod local;
mod lock;
mod s3;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use s3::S3StateStore;
pub use store::StateStore;
pub use types::{MAX_HISTORY, RunHistoryEntry, STATE_VERSION, StackState};
