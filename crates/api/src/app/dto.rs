use std::str::FromStr;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use wareflow_approvals::ApprovalTier;
use wareflow_core::{ItemId, WarehouseId};
use wareflow_documents::{Action, DocumentType, InspectionResult, NewLine, TransitionInput};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

/// Body of `POST /documents/:type/:id/transitions`.
#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    /// The version the client last read.
    pub version: u64,
    pub action: String,
    #[serde(default)]
    pub inspection_result: Option<InspectionResult>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl TransitionRequest {
    pub fn to_input(&self) -> Result<TransitionInput, axum::response::Response> {
        let action = Action::parse(&self.action.to_ascii_lowercase()).map_err(|_| {
            errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_action",
                format!("unknown action '{}'", self.action),
            )
        })?;
        let mut input = TransitionInput::new(action);
        input.inspection_result = self.inspection_result;
        input.reason = self.reason.clone();
        Ok(input)
    }
}

#[derive(Debug, Deserialize)]
pub struct AddLineRequest {
    pub version: u64,
    #[serde(flatten)]
    pub line: NewLine,
}

#[derive(Debug, Deserialize)]
pub struct StockQuery {
    pub item_id: ItemId,
    pub warehouse_id: WarehouseId,
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub amount: u64,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceTiersRequest {
    pub tiers: Vec<ApprovalTier>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct ActionsResponse {
    pub document_id: String,
    pub status: String,
    pub version: u64,
    /// Every action the workflow allows from the current status.
    pub allowed: Vec<Action>,
    /// The subset the caller may attempt.
    pub available: Vec<Action>,
}

// -------------------------
// Path parsing
// -------------------------

pub fn parse_document_type(raw: &str) -> Result<DocumentType, axum::response::Response> {
    DocumentType::from_path(raw).map_err(|e| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_document_type", e.to_string())
    })
}

pub fn parse_id<T: FromStr>(raw: &str, what: &'static str) -> Result<T, axum::response::Response> {
    raw.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_request_parses_action_names() {
        let req: TransitionRequest = serde_json::from_value(serde_json::json!({
            "version": 3,
            "action": "QC_APPROVE",
        }))
        .unwrap();
        let input = req.to_input().unwrap();
        assert_eq!(input.action, Action::QcApprove);
        assert_eq!(input.inspection_result, None);
    }

    #[test]
    fn unknown_action_is_a_bad_request() {
        let req = TransitionRequest {
            version: 1,
            action: "teleport".into(),
            inspection_result: None,
            reason: None,
        };
        let res = req.to_input().unwrap_err();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn add_line_body_is_flat() {
        let item = ItemId::new();
        let req: AddLineRequest = serde_json::from_value(serde_json::json!({
            "version": 1,
            "item_id": item,
            "quantity": 4,
            "unit_cost": 250,
        }))
        .unwrap();
        assert_eq!(req.line.item_id, item);
        assert_eq!(req.line.quantity, 4);
    }

    #[test]
    fn document_types_accept_prefix_or_name() {
        assert_eq!(parse_document_type("grn").unwrap(), DocumentType::GoodsReceipt);
        assert_eq!(
            parse_document_type("material-issue").unwrap(),
            DocumentType::MaterialIssue
        );
        assert!(parse_document_type("invoice").is_err());
    }
}
