//! Outcome of an exit.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where the resolver found the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    Cache,
    DirectId,
    ViewBarcode,
    ViewCard,
    Universal,
}

impl SearchMethod {
    pub const ALL: [SearchMethod; 5] = [
        SearchMethod::Cache,
        SearchMethod::DirectId,
        SearchMethod::ViewBarcode,
        SearchMethod::ViewCard,
        SearchMethod::Universal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::DirectId => "direct_id",
            Self::ViewBarcode => "view_barcode",
            Self::ViewCard => "view_card",
            Self::Universal => "universal",
        }
    }
}

impl fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result code of an exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Success,
    NotFound,
    AlreadyClosed,
    /// Compare-and-swap retries exhausted.
    Concurrent,
    Unavailable,
    InvalidIdentifier,
    /// Record closed but the gate could not be raised.
    HardwareError,
    Timeout,
    /// Another exit is in progress on the lane.
    Busy,
}

impl ResultCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyClosed => "ALREADY_CLOSED",
            Self::Concurrent => "CONCURRENT",
            Self::Unavailable => "UNAVAILABLE",
            Self::InvalidIdentifier => "INVALID_IDENTIFIER",
            Self::HardwareError => "HARDWARE_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Busy => "BUSY",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`LaneHandle::process_exit`](crate::LaneHandle::process_exit).
///
/// `fee`, `duration_hours` and `record_id` are set whenever the record was
/// closed, including when the gate failed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitResult {
    pub success: bool,
    pub code: ResultCode,
    pub message: String,
    pub fee: Option<i64>,
    pub duration_hours: Option<f64>,
    pub record_id: Option<String>,
    pub search_method: Option<SearchMethod>,
    pub elapsed_ms: u64,
}

impl ExitResult {
    /// A failed exit that did not close anything.
    pub fn failure(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            code,
            message: message.into(),
            fee: None,
            duration_hours: None,
            record_id: None,
            search_method: None,
            elapsed_ms: 0,
        }
    }

    /// An exit whose record was closed.
    pub fn closed(
        record_id: impl Into<String>,
        fee: i64,
        duration_hours: f64,
        search_method: SearchMethod,
    ) -> Self {
        Self {
            success: true,
            code: ResultCode::Success,
            message: "exit completed".to_string(),
            fee: Some(fee),
            duration_hours: Some(duration_hours),
            record_id: Some(record_id.into()),
            search_method: Some(search_method),
            elapsed_ms: 0,
        }
    }

    pub fn busy() -> Self {
        Self::failure(ResultCode::Busy, "another exit is in progress")
    }

    pub(crate) fn with_code(mut self, code: ResultCode, message: impl Into<String>) -> Self {
        self.success = code == ResultCode::Success;
        self.code = code;
        self.message = message.into();
        self
    }

    pub(crate) fn with_record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    pub(crate) fn with_method(mut self, method: SearchMethod) -> Self {
        self.search_method = Some(method);
        self
    }

    pub(crate) fn with_elapsed(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_result() {
        let result = ExitResult::closed("transaction_IMGTEST001", 4000, 2.5, SearchMethod::ViewBarcode);
        assert!(result.success);
        assert_eq!(result.code, ResultCode::Success);
        assert_eq!(result.fee, Some(4000));

        let failed = result.with_code(ResultCode::HardwareError, "gate faulted");
        assert!(!failed.success);
        assert_eq!(failed.fee, Some(4000));
    }

    #[test]
    fn test_result_json() {
        let result = ExitResult::failure(ResultCode::NotFound, "no open record").with_elapsed(3);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["code"], "NOT_FOUND");
        assert_eq!(json["elapsed_ms"], 3);
        assert_eq!(json["search_method"], serde_json::Value::Null);
        assert_eq!(
            serde_json::to_value(SearchMethod::ViewBarcode).unwrap(),
            "view_barcode"
        );
    }
}
