//! Response message of the external accrual service.
//!
//! Treated as an immutable message between pipeline stages once decoded.

use crate::models::OrderId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccrualStatus {
    /// Registered but valuation has not started yet.
    Registered,
    Processing,
    Invalid,
    Processed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccrualResponse {
    #[serde(rename = "order")]
    pub order_id: OrderId,
    pub status: AccrualStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_with_accrual() {
        let response: AccrualResponse =
            serde_json::from_str(r#"{"order": 1234566, "status": "PROCESSED", "accrual": 1.23}"#)
                .unwrap();

        assert_eq!(response.order_id, 1234566);
        assert_eq!(response.status, AccrualStatus::Processed);
        assert_eq!(response.accrual, Some(1.23));
    }

    #[test]
    fn decodes_without_accrual() {
        let response: AccrualResponse =
            serde_json::from_str(r#"{"order": 42, "status": "REGISTERED"}"#).unwrap();

        assert_eq!(response.status, AccrualStatus::Registered);
        assert_eq!(response.accrual, None);
    }

    #[test]
    fn rejects_unknown_status() {
        let result: Result<AccrualResponse, _> =
            serde_json::from_str(r#"{"order": 42, "status": "UNKNOWN"}"#);
        assert!(result.is_err());
    }
}
