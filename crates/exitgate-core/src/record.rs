//! Records kept in the document store.
//!
//! A [`TransactionRecord`] is created OPEN by the entry system and closed
//! exactly once by an exit lane. A [`MemberRecord`] is the denormalized
//! projection of an open member entry held in the member cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::TRANSACTION_ID_PREFIX;
use crate::error::Error;
use crate::types::{Category, RecordKind, RecordStatus, VehicleClass};
use crate::Result;

/// One parking stay, from entry to exit.
///
/// # Invariants
///
/// - `status == Open` implies `exit_time == None` and `exit_fee == 0`
/// - `status == Closed` implies `exit_time >= entry_time`
/// - status only ever moves OPEN -> CLOSED
///
/// [`validate`](TransactionRecord::validate) checks the first two,
/// [`validate_change`](TransactionRecord::validate_change) the third.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Document id (`transaction_{identifier}` for barcodes).
    pub id: String,

    /// Document type.
    pub kind: RecordKind,

    /// Billing category.
    pub category: Category,

    /// Barcode or member card number presented at the gates.
    pub identifier: String,

    /// License plate captured at entry.
    #[serde(default)]
    pub plate: Option<String>,

    /// Member account, for member entries.
    #[serde(default)]
    pub member_id: Option<String>,

    #[serde(default)]
    pub vehicle_class: VehicleClass,

    pub entry_time: DateTime<Utc>,

    #[serde(default)]
    pub exit_time: Option<DateTime<Utc>>,

    pub status: RecordStatus,

    #[serde(default)]
    pub entry_fee: i64,

    #[serde(default)]
    pub exit_fee: i64,

    pub entry_gate: String,

    #[serde(default)]
    pub exit_gate: Option<String>,

    pub entry_operator: String,

    #[serde(default)]
    pub exit_operator: Option<String>,
}

impl TransactionRecord {
    /// Create an OPEN casual ticket stored under `transaction_{barcode}`.
    pub fn parking(
        barcode: impl Into<String>,
        entry_time: DateTime<Utc>,
        entry_gate: impl Into<String>,
        entry_operator: impl Into<String>,
    ) -> Self {
        let identifier = barcode.into();
        Self {
            id: format!("{TRANSACTION_ID_PREFIX}{identifier}"),
            kind: RecordKind::ParkingTransaction,
            category: Category::Casual,
            identifier,
            plate: None,
            member_id: None,
            vehicle_class: VehicleClass::default(),
            entry_time,
            exit_time: None,
            status: RecordStatus::Open,
            entry_fee: 0,
            exit_fee: 0,
            entry_gate: entry_gate.into(),
            exit_gate: None,
            entry_operator: entry_operator.into(),
            exit_operator: None,
        }
    }

    /// Create an OPEN member entry for `card_number`.
    ///
    /// The id embeds the entry timestamp so successive stays of the same card
    /// never collide.
    pub fn member(
        card_number: impl Into<String>,
        member_id: impl Into<String>,
        entry_time: DateTime<Utc>,
        entry_gate: impl Into<String>,
        entry_operator: impl Into<String>,
    ) -> Self {
        let identifier = card_number.into();
        Self {
            id: format!("member_entry_{identifier}_{}", entry_time.timestamp_millis()),
            kind: RecordKind::MemberEntry,
            category: Category::Member,
            identifier,
            plate: None,
            member_id: Some(member_id.into()),
            vehicle_class: VehicleClass::default(),
            entry_time,
            exit_time: None,
            status: RecordStatus::Open,
            entry_fee: 0,
            exit_fee: 0,
            entry_gate: entry_gate.into(),
            exit_gate: None,
            entry_operator: entry_operator.into(),
            exit_operator: None,
        }
    }

    /// Set the license plate.
    pub fn with_plate(mut self, plate: impl Into<String>) -> Self {
        self.plate = Some(plate.into());
        self
    }

    /// Set the vehicle class.
    pub fn with_vehicle_class(mut self, class: VehicleClass) -> Self {
        self.vehicle_class = class;
        self
    }

    /// Replace the generated document id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Returns `true` while the record waits for its exit.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Barcode emitted by the `by_barcode` view, if any.
    #[must_use]
    pub fn barcode(&self) -> Option<&str> {
        match self.kind {
            RecordKind::ParkingTransaction if !self.identifier.is_empty() => {
                Some(&self.identifier)
            }
            _ => None,
        }
    }

    /// Card number emitted by the `by_card_number` view, if any.
    #[must_use]
    pub fn card_number(&self) -> Option<&str> {
        match self.kind {
            RecordKind::MemberEntry => Some(&self.identifier),
            RecordKind::ParkingTransaction => None,
        }
    }

    /// Lower-cased plate used by the plate index and universal search.
    #[must_use]
    pub fn plate_lower(&self) -> Option<String> {
        self.plate
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(str::to_lowercase)
    }

    /// Close the record as of `exit_time`.
    ///
    /// An `exit_time` earlier than `entry_time` (clock skew between entry and
    /// exit hosts) is clamped to `entry_time`.
    ///
    /// # Errors
    /// Returns `Error::InvalidStatusTransition` if the record is not OPEN.
    pub fn close(
        &mut self,
        exit_time: DateTime<Utc>,
        fee: i64,
        gate_id: &str,
        operator: &str,
    ) -> Result<()> {
        if !self.is_open() {
            return Err(Error::InvalidStatusTransition {
                from: self.status.to_string(),
                to: RecordStatus::Closed.to_string(),
            });
        }

        self.status = RecordStatus::Closed;
        self.exit_time = Some(exit_time.max(self.entry_time));
        self.exit_fee = fee;
        self.exit_gate = Some(gate_id.to_string());
        self.exit_operator = Some(operator.to_string());
        Ok(())
    }

    /// Check the status/exit-time invariants.
    ///
    /// # Errors
    /// Returns `Error::InvalidRecord` describing the first violated invariant.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::InvalidRecord("record id is empty".to_string()));
        }

        match self.status {
            RecordStatus::Open => {
                if self.exit_time.is_some() {
                    return Err(Error::InvalidRecord(format!(
                        "open record {} has an exit time",
                        self.id
                    )));
                }
                if self.exit_fee != 0 {
                    return Err(Error::InvalidRecord(format!(
                        "open record {} has an exit fee",
                        self.id
                    )));
                }
            }
            RecordStatus::Closed => match self.exit_time {
                Some(exit) if exit >= self.entry_time => {}
                Some(_) => {
                    return Err(Error::InvalidRecord(format!(
                        "record {} exits before it entered",
                        self.id
                    )));
                }
                None => {
                    return Err(Error::InvalidRecord(format!(
                        "closed record {} has no exit time",
                        self.id
                    )));
                }
            },
            RecordStatus::Cancelled => {}
        }

        if self.exit_fee < 0 {
            return Err(Error::InvalidRecord(format!(
                "record {} has a negative fee",
                self.id
            )));
        }

        Ok(())
    }

    /// Check that `next` is a legal successor of `self`.
    ///
    /// # Errors
    /// Returns `Error::InvalidStatusTransition` for anything but OPEN -> CLOSED
    /// (or an unchanged status), and `Error::InvalidRecord` if the identity
    /// fields changed or `next` breaks an invariant.
    pub fn validate_change(&self, next: &TransactionRecord) -> Result<()> {
        if !self.status.can_transition_to(next.status) {
            return Err(Error::InvalidStatusTransition {
                from: self.status.to_string(),
                to: next.status.to_string(),
            });
        }

        if next.id != self.id || next.kind != self.kind || next.identifier != self.identifier {
            return Err(Error::InvalidRecord(format!(
                "identity of record {} cannot change",
                self.id
            )));
        }

        next.validate()
    }

    /// Member-cache projection of an OPEN member entry.
    #[must_use]
    pub fn to_member_record(&self) -> Option<MemberRecord> {
        if self.kind != RecordKind::MemberEntry || !self.is_open() {
            return None;
        }

        Some(MemberRecord {
            card_number: self.identifier.clone(),
            member_id: self.member_id.clone().unwrap_or_default(),
            plate: self.plate.clone(),
            entry_time: self.entry_time,
            record_id: self.id.clone(),
            status: self.status,
        })
    }
}

/// Cached projection of an OPEN member entry, keyed by card number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub card_number: String,
    pub member_id: String,
    pub plate: Option<String>,
    pub entry_time: DateTime<Utc>,
    /// Document id of the member entry in the store.
    pub record_id: String,
    pub status: RecordStatus,
}
