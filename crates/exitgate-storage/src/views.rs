//! Secondary views over the document store.
//!
//! Each [`View`] corresponds to a map function over records:
//!
//! | View | Emits |
//! |---|---|
//! | `by_barcode` | `(no_barcode, doc)` for parking transactions |
//! | `by_card_number` | `(card_number, doc)` for member entries |
//! | `active_by_type` | `([kind, key], doc)` for OPEN records |
//! | `universal_search` | `([kind, attr, value], doc)` over barcode, card, plate, id, member id |
//!
//! The store backs each view with SQL indexes that
//! [`ensure_design_doc`](crate::TransactionStore::ensure_design_doc) creates.

use std::fmt;

use exitgate_core::{RecordKind, TransactionRecord};
use serde::{Deserialize, Serialize};

/// A registered view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    ByBarcode,
    ByCardNumber,
    ActiveByType,
    UniversalSearch,
}

impl View {
    pub const ALL: [View; 4] = [
        View::ByBarcode,
        View::ByCardNumber,
        View::ActiveByType,
        View::UniversalSearch,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ByBarcode => "by_barcode",
            Self::ByCardNumber => "by_card_number",
            Self::ActiveByType => "active_by_type",
            Self::UniversalSearch => "universal_search",
        }
    }

    /// Index statements backing the view.
    pub(crate) fn index_ddl(self) -> &'static [&'static str] {
        match self {
            Self::ByBarcode => &[
                "CREATE INDEX IF NOT EXISTS idx_view_by_barcode \
                 ON documents (no_barcode) WHERE kind = 'parking_transaction'",
            ],
            Self::ByCardNumber => &[
                "CREATE INDEX IF NOT EXISTS idx_view_kind_card_status \
                 ON documents (kind, card_number, status)",
            ],
            Self::ActiveByType => &[
                "CREATE INDEX IF NOT EXISTS idx_view_active_by_type \
                 ON documents (kind, identifier) WHERE status = 0",
                "CREATE INDEX IF NOT EXISTS idx_view_kind_plate_status \
                 ON documents (kind, plate_lower, status)",
            ],
            Self::UniversalSearch => &[
                "CREATE INDEX IF NOT EXISTS idx_view_universal \
                 ON search_keys (kind, attr, value)",
            ],
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named set of views, registered once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignDoc {
    pub name: String,
    pub views: Vec<View>,
}

impl DesignDoc {
    pub fn new(name: impl Into<String>, views: impl IntoIterator<Item = View>) -> Self {
        let mut views: Vec<View> = views.into_iter().collect();
        views.sort_by_key(|v| v.name());
        views.dedup();
        Self {
            name: name.into(),
            views,
        }
    }

    /// The views an exit lane depends on.
    pub fn exit_lane() -> Self {
        Self::new("transactions", View::ALL)
    }
}

/// Record family tag emitted by `universal_search`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    Parking,
    Member,
}

impl SearchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parking => "parking",
            Self::Member => "member",
        }
    }
}

impl From<RecordKind> for SearchKind {
    fn from(kind: RecordKind) -> Self {
        match kind {
            RecordKind::ParkingTransaction => Self::Parking,
            RecordKind::MemberEntry => Self::Member,
        }
    }
}

/// Attribute emitted by `universal_search`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchAttr {
    Barcode,
    Card,
    Plate,
    Id,
    MemberId,
}

impl SearchAttr {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Barcode => "barcode",
            Self::Card => "card",
            Self::Plate => "plate",
            Self::Id => "id",
            Self::MemberId => "member_id",
        }
    }
}

/// Rows emitted by `universal_search` for one record; values are lower-cased.
pub(crate) fn search_keys(record: &TransactionRecord) -> Vec<(SearchKind, SearchAttr, String)> {
    let kind = SearchKind::from(record.kind);
    let mut keys = Vec::with_capacity(4);

    match record.kind {
        RecordKind::ParkingTransaction => {
            if let Some(barcode) = record.barcode() {
                keys.push((kind, SearchAttr::Barcode, barcode.to_lowercase()));
            }
        }
        RecordKind::MemberEntry => {
            keys.push((kind, SearchAttr::Card, record.identifier.to_lowercase()));
            if let Some(member_id) = record.member_id.as_deref().filter(|m| !m.is_empty()) {
                keys.push((kind, SearchAttr::MemberId, member_id.to_lowercase()));
            }
        }
    }
    if let Some(plate) = record.plate_lower() {
        keys.push((kind, SearchAttr::Plate, plate));
    }
    keys.push((kind, SearchAttr::Id, record.id.to_lowercase()));
    keys
}

/// A query against one view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewQuery {
    /// Parking transactions with this barcode.
    ByBarcode(String),
    /// Member entries with this card number.
    ByCardNumber(String),
    /// OPEN records of a kind, optionally restricted to one identifier.
    ActiveByType {
        kind: RecordKind,
        key: Option<String>,
    },
    /// Records emitting `value` under any (or the given) kind and attribute.
    UniversalSearch {
        kind: Option<SearchKind>,
        attr: Option<SearchAttr>,
        value: String,
    },
}

impl ViewQuery {
    /// `universal_search` over every kind and attribute (`["*", "*", value]`).
    pub fn universal(value: &str) -> Self {
        Self::UniversalSearch {
            kind: None,
            attr: None,
            value: value.to_lowercase(),
        }
    }

    /// `universal_search` restricted to plates.
    pub fn plate(plate: &str) -> Self {
        Self::UniversalSearch {
            kind: None,
            attr: Some(SearchAttr::Plate),
            value: plate.to_lowercase(),
        }
    }

    pub fn view(&self) -> View {
        match self {
            Self::ByBarcode(_) => View::ByBarcode,
            Self::ByCardNumber(_) => View::ByCardNumber,
            Self::ActiveByType { .. } => View::ActiveByType,
            Self::UniversalSearch { .. } => View::UniversalSearch,
        }
    }
}
