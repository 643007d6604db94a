use crate::{
    Result,
    constants::{MAX_IDENTIFIER_LENGTH, MEMBER_CARD_PREFIX, TRANSACTION_ID_PREFIX},
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ticket presented at the exit: a casual barcode or a member card number.
///
/// The identifier is normalized (trimmed and converted to uppercase) on
/// construction, and its [`IdentifierKind`] is derived once so later stages
/// branch on the tag instead of re-inspecting the string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier {
    value: String,
    kind: IdentifierKind,
}

impl Identifier {
    /// Create a new identifier with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidIdentifier` if the normalized value is empty,
    /// longer than [`MAX_IDENTIFIER_LENGTH`], or contains whitespace or
    /// non-printable ASCII characters.
    pub fn new(raw: &str) -> Result<Self> {
        let value = raw.trim().to_uppercase();

        if value.is_empty() {
            return Err(Error::InvalidIdentifier("identifier is empty".to_string()));
        }

        if value.len() > MAX_IDENTIFIER_LENGTH {
            return Err(Error::InvalidIdentifier(format!(
                "identifier must be at most {MAX_IDENTIFIER_LENGTH} chars, got {}",
                value.len()
            )));
        }

        if !value.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(Error::InvalidIdentifier(format!(
                "identifier must be printable ASCII without spaces: {value:?}"
            )));
        }

        let kind = IdentifierKind::classify(&value);
        Ok(Self { value, kind })
    }

    /// Get the normalized identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Kind derived from the member-card prefix convention.
    #[must_use]
    pub fn kind(&self) -> IdentifierKind {
        self.kind
    }

    /// Returns `true` if the identifier follows the member-card convention.
    #[must_use]
    pub fn is_member(&self) -> bool {
        self.kind == IdentifierKind::Member
    }

    /// Document id under which the entry system stores a barcode ticket.
    ///
    /// Identifiers that already carry the `transaction_` prefix are returned
    /// as-is (lower-cased prefix, original suffix).
    #[must_use]
    pub fn direct_record_id(&self) -> String {
        let prefix_len = TRANSACTION_ID_PREFIX.len();
        if self.value.len() > prefix_len
            && self.value[..prefix_len].eq_ignore_ascii_case(TRANSACTION_ID_PREFIX)
        {
            return format!("{TRANSACTION_ID_PREFIX}{}", &self.value[prefix_len..]);
        }
        format!("{TRANSACTION_ID_PREFIX}{}", self.value)
    }

    /// Lower-cased value used as a universal search key.
    #[must_use]
    pub fn search_key(&self) -> String {
        self.value.to_lowercase()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl std::str::FromStr for Identifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Identifier::new(s)
    }
}

impl TryFrom<String> for Identifier {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Identifier::new(&value)
    }
}

impl From<Identifier> for String {
    fn from(identifier: Identifier) -> Self {
        identifier.value
    }
}

/// How an identifier should be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    /// Member card number (leading `M`); checked against the member cache first.
    Member,
    /// Casual ticket barcode.
    Barcode,
}

impl IdentifierKind {
    /// Classify a normalized identifier.
    #[inline]
    #[must_use]
    pub fn classify(value: &str) -> Self {
        if value.starts_with(MEMBER_CARD_PREFIX) {
            IdentifierKind::Member
        } else {
            IdentifierKind::Barcode
        }
    }
}

/// Lifecycle status of a transaction record.
///
/// Persisted as the integer codes used by the entry system
/// (`0` open, `1` closed, `2` cancelled).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum RecordStatus {
    Open = 0,
    Closed = 1,
    Cancelled = 2,
}

impl RecordStatus {
    /// Create a status from its integer code.
    ///
    /// # Errors
    /// Returns `Error::UnknownCode` if the value is not 0, 1, or 2.
    #[inline]
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(RecordStatus::Open),
            1 => Ok(RecordStatus::Closed),
            2 => Ok(RecordStatus::Cancelled),
            _ => Err(Error::UnknownCode {
                kind: "status",
                code: i64::from(value),
            }),
        }
    }

    /// Convert the status to its integer code.
    #[inline]
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Returns `true` if the record is still waiting for its exit.
    #[inline]
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, RecordStatus::Open)
    }

    /// Only OPEN -> CLOSED is a legal change; every other change is rejected.
    #[must_use]
    pub fn can_transition_to(self, target: RecordStatus) -> bool {
        self == target || matches!((self, target), (RecordStatus::Open, RecordStatus::Closed))
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordStatus::Open => write!(f, "OPEN"),
            RecordStatus::Closed => write!(f, "CLOSED"),
            RecordStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl TryFrom<u8> for RecordStatus {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        RecordStatus::from_u8(value)
    }
}

impl From<RecordStatus> for u8 {
    fn from(status: RecordStatus) -> Self {
        status.to_u8()
    }
}

/// Document type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Casual ticket issued at the entry gate.
    ParkingTransaction,
    /// Member card entry.
    MemberEntry,
}

impl RecordKind {
    /// Storage name of the kind, identical to its serialized form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::ParkingTransaction => "parking_transaction",
            RecordKind::MemberEntry => "member_entry",
        }
    }

    /// Parse a storage name back into a kind.
    ///
    /// # Errors
    /// Returns `Error::InvalidRecord` for unknown names.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "parking_transaction" => Ok(RecordKind::ParkingTransaction),
            "member_entry" => Ok(RecordKind::MemberEntry),
            other => Err(Error::InvalidRecord(format!("unknown record kind: {other}"))),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billing category of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Member,
    Casual,
}

/// Vehicle class used to pick a tariff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Motorcycle,
    #[default]
    Car,
    Truck,
}

impl VehicleClass {
    /// All classes, in tariff-table order.
    pub const ALL: [VehicleClass; 3] = [
        VehicleClass::Motorcycle,
        VehicleClass::Car,
        VehicleClass::Truck,
    ];
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VehicleClass::Motorcycle => write!(f, "motorcycle"),
            VehicleClass::Car => write!(f, "car"),
            VehicleClass::Truck => write!(f, "truck"),
        }
    }
}

/// Opaque revision token of a stored document.
///
/// Tokens have the form `{generation}-{suffix}`; writers must present the
/// token they read and the store rejects stale ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// Wrap an existing token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Token following `previous` (or the first token when `None`).
    #[must_use]
    pub fn next(previous: Option<&Revision>, suffix: &str) -> Self {
        let generation = previous.map_or(0, Revision::generation) + 1;
        Self(format!("{generation}-{suffix}"))
    }

    /// Generation number encoded in the token (0 if malformed).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.0
            .split_once('-')
            .and_then(|(n, _)| n.parse().ok())
            .unwrap_or(0)
    }

    /// Get the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}
