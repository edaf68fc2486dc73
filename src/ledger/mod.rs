//! Run ledger.
//!
//! The ledger records, for one run, which resources were attempted, which
//! succeeded and which failed, together with their provider handles. It
//! drives reporting and the computation of the rollback set, and is
//! persisted as part of the stack state.

mod entry;
mod run;

pub use entry::{EntryStatus, LedgerEntry};
pub use run::{LedgerEvent, RunLedger, RunOperation};
