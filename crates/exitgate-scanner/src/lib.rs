//! Barcode scanner ingestion.
//!
//! USB barcode scanners present themselves as keyboards. This crate turns
//! their keystrokes into discrete [`ScanEvent`]s, separating scanner bursts
//! from human typing by inter-keystroke timing.
//!
//! - [`ScanBuffer`] is the pure timing state machine.
//! - [`ScanIngestor`] runs it on a task with a monitor tick, enable/disable
//!   control and a bounded event channel.

pub mod buffer;
pub mod ingestor;

pub use buffer::{ScanBuffer, ScanEvent, ScanRules};
pub use ingestor::{IngestError, ScanIngestor, ScanInput};
