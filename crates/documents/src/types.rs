use serde::{Deserialize, Serialize};

use wareflow_core::{DomainError, DomainResult};

/// Snake-case string mapping shared by the closed vocabularies below.
macro_rules! string_enum {
    ($t:ident, $what:literal { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $t {
            pub const ALL: &'static [$t] = &[$($t::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($t::$variant => $s),+
                }
            }

            pub fn parse(s: &str) -> DomainResult<Self> {
                match s {
                    $($s => Ok($t::$variant),)+
                    other => Err(DomainError::validation(format!(
                        concat!("unknown ", $what, " '{}'"),
                        other
                    ))),
                }
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    GoodsReceipt,
    MaterialIssue,
    MaterialReturn,
    QualityInspection,
    DiscrepancyReport,
    InternalTransfer,
}

string_enum!(DocumentType, "document type" {
    GoodsReceipt => "goods_receipt",
    MaterialIssue => "material_issue",
    MaterialReturn => "material_return",
    QualityInspection => "quality_inspection",
    DiscrepancyReport => "discrepancy_report",
    InternalTransfer => "internal_transfer",
});

impl DocumentType {
    /// Default document-number prefix.
    pub fn prefix(&self) -> &'static str {
        match self {
            DocumentType::GoodsReceipt => "GRN",
            DocumentType::MaterialIssue => "MIS",
            DocumentType::MaterialReturn => "MRN",
            DocumentType::QualityInspection => "QCI",
            DocumentType::DiscrepancyReport => "DR",
            DocumentType::InternalTransfer => "IT",
        }
    }

    /// Resource name handed to the permission service.
    pub fn resource(&self) -> &'static str {
        self.as_str()
    }

    /// Accepts the snake-case name or the number prefix (case-insensitive).
    pub fn from_path(s: &str) -> DomainResult<Self> {
        let lowered = s.to_ascii_lowercase().replace('-', "_");
        if let Ok(t) = Self::parse(&lowered) {
            return Ok(t);
        }
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.prefix().eq_ignore_ascii_case(s))
            .ok_or_else(|| DomainError::validation(format!("unknown document type '{s}'")))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Submitted,
    QcApproved,
    Received,
    Stored,
    Approved,
    Issued,
    InProgress,
    InTransit,
    UnderReview,
    Resolved,
    Completed,
    Cancelled,
    Rejected,
}

string_enum!(DocumentStatus, "document status" {
    Draft => "draft",
    Submitted => "submitted",
    QcApproved => "qc_approved",
    Received => "received",
    Stored => "stored",
    Approved => "approved",
    Issued => "issued",
    InProgress => "in_progress",
    InTransit => "in_transit",
    UnderReview => "under_review",
    Resolved => "resolved",
    Completed => "completed",
    Cancelled => "cancelled",
    Rejected => "rejected",
});

impl DocumentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Completed | DocumentStatus::Cancelled | DocumentStatus::Rejected
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Submit,
    QcApprove,
    Approve,
    Start,
    Review,
    Receive,
    Store,
    Issue,
    Dispatch,
    Resolve,
    Complete,
    Close,
    Reject,
    Cancel,
}

string_enum!(Action, "action" {
    Submit => "submit",
    QcApprove => "qc_approve",
    Approve => "approve",
    Start => "start",
    Review => "review",
    Receive => "receive",
    Store => "store",
    Issue => "issue",
    Dispatch => "dispatch",
    Resolve => "resolve",
    Complete => "complete",
    Close => "close",
    Reject => "reject",
    Cancel => "cancel",
});

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionResult {
    Pass,
    Fail,
    Conditional,
}

string_enum!(InspectionResult, "inspection result" {
    Pass => "pass",
    Fail => "fail",
    Conditional => "conditional",
});

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStatus {
    Open,
    Reserved,
    Fulfilled,
    Cancelled,
}

string_enum!(LineStatus, "line status" {
    Open => "open",
    Reserved => "reserved",
    Fulfilled => "fulfilled",
    Cancelled => "cancelled",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_forms_match_serde() {
        for t in DocumentType::ALL {
            let json = serde_json::to_string(t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
            assert_eq!(DocumentType::parse(t.as_str()).unwrap(), *t);
        }
        for s in DocumentStatus::ALL {
            let json = serde_json::to_string(s).unwrap();
            assert_eq!(json, format!("\"{}\"", s.as_str()));
        }
        for a in Action::ALL {
            assert_eq!(Action::parse(a.as_str()).unwrap(), *a);
        }
    }

    #[test]
    fn document_type_from_path_accepts_prefix_and_kebab() {
        assert_eq!(DocumentType::from_path("GRN").unwrap(), DocumentType::GoodsReceipt);
        assert_eq!(DocumentType::from_path("it").unwrap(), DocumentType::InternalTransfer);
        assert_eq!(
            DocumentType::from_path("material-issue").unwrap(),
            DocumentType::MaterialIssue
        );
        assert!(DocumentType::from_path("invoice").is_err());
    }

    #[test]
    fn terminal_statuses() {
        let terminal: Vec<_> = DocumentStatus::ALL.iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(
            terminal,
            vec![
                &DocumentStatus::Completed,
                &DocumentStatus::Cancelled,
                &DocumentStatus::Rejected
            ]
        );
    }
}
