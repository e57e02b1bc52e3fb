//! Work units and their statistics.
//!
//! - [`TransferUnit`] / [`TransferGroup`]: what to move, as scheduled
//! - [`TransferListener`]: counters and exceptions for one unit's execution
//! - [`RunSummary`]: end-to-end outcome of a run

mod job;
mod listener;

pub use job::{TransferGroup, TransferUnit};
pub use listener::{CursorCounters, ListenerMode, ListenerReport, RunSummary, TransferListener};
