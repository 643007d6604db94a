//! Shared domain types for the exitgate parking exit system.
//!
//! This crate holds the values every other crate agrees on: identifiers and
//! their kinds, the transaction and member records kept in the document store,
//! the tariff used to price an exit, and the lane configuration.

pub mod config;
pub mod constants;
pub mod error;
pub mod record;
pub mod tariff;
pub mod types;

pub use config::{
    CacheConfig, CameraConfig, CameraVendor, ControlMode, GateConfig, GpioConfig, LaneConfig,
    ScannerConfig, StoreConfig, SystemConfig,
};
pub use error::{Error, Result};
pub use record::{MemberRecord, TransactionRecord};
pub use tariff::{Tariff, TariffSchedule};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
