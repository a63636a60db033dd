//! C7: per-agent sovereign local storage (spec.md §4.7). Exclusively owned
//! by one agent process; every file write is atomic (write-to-temp, then
//! rename), so the state machine never observes a half-written record.

pub mod atomic;
mod error;
pub mod ledger;
mod store;

pub use error::StoreError;
pub use ledger::{spend_on_day, LedgerEntry, NonceIndex};
pub use store::AgentStore;
