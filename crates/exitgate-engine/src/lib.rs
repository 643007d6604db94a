//! Exit engine of a parking exit lane.
//!
//! This crate turns an identifier (barcode ticket, member card, plate) into
//! a closed transaction and a raised barrier. A lane worker owns the gate
//! driver and the gate state machine; everything else reaches it through a
//! [`LaneHandle`].
//!
//! An exit runs in three steps:
//!
//! 1. resolve the identifier to an OPEN record ([`Resolver`])
//! 2. close it with a compare-and-swap write, retrying conflicts
//! 3. raise the gate and arm the auto-close timer
//!
//! The gate never moves for a record that is not CLOSED. Outcomes are
//! reported as an [`ExitResult`] with a [`ResultCode`] and published as
//! [`LaneEvent`]s for the buzzer and audit collaborators.

pub mod attachments;
pub mod bridge;
pub mod clock;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod lane;
pub mod metrics;
pub mod resolver;
pub mod result;
pub mod state_machine;

pub use attachments::AttachmentQueue;
pub use bridge::spawn_scan_bridge;
pub use clock::{Clock, FixedClock, SystemClock};
pub use diagnostics::{Diagnostics, GateStatus};
pub use error::{EngineError, EngineResult};
pub use events::{LaneEvent, Tone};
pub use lane::{ExitEngine, ExitEngineBuilder, ExitRequest, LaneHandle, LaneSettings};
pub use self::metrics::{LaneMetrics, LatencyStats, MetricsSnapshot};
pub use resolver::{ResolveError, Resolved, Resolver};
pub use result::{ExitResult, ResultCode, SearchMethod};
pub use state_machine::{GateState, GateStateMachine, GateTransition};
