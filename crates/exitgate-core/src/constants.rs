//! Default values and fixed conventions for an exit lane.
//!
//! Every configurable value in [`LaneConfig`](crate::LaneConfig) falls back to
//! one of the defaults defined here. The remaining constants are conventions
//! shared with the entry system that writes the records this lane closes.
//!
//! # Usage
//!
//! ```
//! use exitgate_core::constants::*;
//!
//! assert_eq!(DEFAULT_GATE_PIN, 24);
//! assert_eq!(DEFAULT_CACHE_TTL_SECS, 300);
//! assert_eq!(format!("{TRANSACTION_ID_PREFIX}IMGTEST001"), "transaction_IMGTEST001");
//! ```

// ============================================================================
// Record Conventions
// ============================================================================

/// Prefix of the document id of a barcode ticket (`transaction_{identifier}`).
pub const TRANSACTION_ID_PREFIX: &str = "transaction_";

/// Leading character that marks an identifier as a member card.
pub const MEMBER_CARD_PREFIX: char = 'M';

/// Attachment name of the snapshot taken at the entry gate.
pub const ENTRY_SNAPSHOT_NAME: &str = "entry.jpg";

/// Attachment name of the snapshot taken at the exit gate.
pub const EXIT_SNAPSHOT_NAME: &str = "exit.jpg";

/// Content type of both snapshot attachments.
pub const SNAPSHOT_CONTENT_TYPE: &str = "image/jpeg";

/// Longest identifier the engine accepts from an operator.
///
/// Scanner input is bounded more tightly by `scanner.max_length`; this limit
/// only guards the operator command surface.
pub const MAX_IDENTIFIER_LENGTH: usize = 64;

// ============================================================================
// Gate Defaults
// ============================================================================

/// Default serial device of the gate controller.
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";

/// Default serial baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default deadline for a serial acknowledgement in milliseconds.
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 500;

/// Consecutive actuator failures that latch the driver into ERROR.
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Serial command that raises the barrier.
pub const SERIAL_OPEN_COMMAND: &[u8] = b"OPEN\r\n";

/// Serial command that lowers the barrier.
pub const SERIAL_CLOSE_COMMAND: &[u8] = b"CLOSE\r\n";

/// Default digital output line driving the gate relay.
pub const DEFAULT_GATE_PIN: u32 = 24;

/// Default pulse width for the digital output in milliseconds.
pub const DEFAULT_PULSE_DURATION_MS: u64 = 500;

// ============================================================================
// Scanner Defaults
// ============================================================================

/// Shortest code accepted as a valid scan.
pub const DEFAULT_SCAN_MIN_LENGTH: usize = 6;

/// Longest code accepted as a valid scan; the buffer auto-flushes here.
pub const DEFAULT_SCAN_MAX_LENGTH: usize = 20;

/// Inter-keystroke gap in milliseconds that separates scanner bursts.
pub const DEFAULT_SCAN_TIMEOUT_MS: u64 = 100;

/// Interval of the ingestor monitor tick in milliseconds.
pub const SCAN_MONITOR_INTERVAL_MS: u64 = 100;

// ============================================================================
// Cache Defaults
// ============================================================================

/// Default member cache capacity.
pub const DEFAULT_CACHE_MAX_SIZE: usize = 1000;

/// Default member cache time-to-live in seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

// ============================================================================
// Engine Defaults
// ============================================================================

/// Seconds the gate stays open before closing on its own.
pub const DEFAULT_AUTO_CLOSE_SECS: u64 = 10;

/// Seconds of continuous store unavailability before the lane degrades.
pub const DEFAULT_DEGRADED_AFTER_SECS: u64 = 10;

/// Default operator recorded on exits triggered by the scanner.
pub const DEFAULT_OPERATOR: &str = "SYSTEM";

/// Default gate identifier recorded on exits.
pub const DEFAULT_GATE_ID: &str = "EXIT_GATE_01";

/// Retries of a compare-and-swap closure after the first attempt.
pub const CLOSE_RETRY_LIMIT: u32 = 3;

/// Lower bound of the jittered backoff between closure retries (ms).
pub const CLOSE_RETRY_BACKOFF_MIN_MS: u64 = 10;

/// Upper bound of the jittered backoff between closure retries (ms).
pub const CLOSE_RETRY_BACKOFF_MAX_MS: u64 = 50;

/// Attempts made to store an exit snapshot before it is dropped.
pub const DEFAULT_ATTACHMENT_RETRY_ATTEMPTS: u32 = 5;

/// Soft budget of a cache-resolved exit in milliseconds.
pub const CACHED_EXIT_BUDGET_MS: u64 = 500;

/// Soft budget of an exit resolved through a view in milliseconds.
pub const VIEW_EXIT_BUDGET_MS: u64 = 2_000;

/// Hard budget of an exit resolved through the fallback search in milliseconds.
pub const FALLBACK_EXIT_BUDGET_MS: u64 = 10_000;

/// Bounded wait for pending snapshot retries during shutdown in seconds.
pub const SHUTDOWN_FLUSH_SECS: u64 = 5;

// ============================================================================
// Store Defaults
// ============================================================================

/// Default path of the document store database.
pub const DEFAULT_DATABASE_PATH: &str = "exitgate.db";

/// Default deadline of a single store request in milliseconds.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 2_000;

/// Default size of the store connection pool.
pub const DEFAULT_STORE_MAX_CONNECTIONS: u32 = 5;
