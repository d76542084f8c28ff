//! Per-document-type transition tables.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use wareflow_auth::{Actor, Role};
use wareflow_core::{DomainError, DomainResult};

use crate::{Action, Document, DocumentStatus, DocumentType, TransitionInput};

/// Which actor scope assignments a document type enforces.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeRule {
    None,
    Warehouse,
    Project,
    WarehouseAndProject,
}

impl ScopeRule {
    pub fn check(&self, actor: &Actor, doc: &Document) -> DomainResult<()> {
        let warehouse_ok = || match actor.scope_warehouse_id {
            _ if actor.role.is_admin() || actor.is_system() => true,
            Some(scope) => doc.touches_warehouse(scope),
            None => true,
        };
        let project_ok = || actor.can_access_project(doc.project_id);

        let ok = match self {
            ScopeRule::None => true,
            ScopeRule::Warehouse => warehouse_ok(),
            ScopeRule::Project => project_ok(),
            ScopeRule::WarehouseAndProject => warehouse_ok() && project_ok(),
        };
        if ok {
            Ok(())
        } else {
            Err(DomainError::forbidden(format!(
                "actor {} is not assigned to the scope of {}",
                actor.id, doc.document_number
            )))
        }
    }
}

/// Content checks that must pass before a transition is applied.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Validator {
    RequireLines,
    RequireWarehouse,
    RequireDestination,
    RequireInspectionResult,
}

impl Validator {
    pub fn check(&self, doc: &Document, input: &TransitionInput) -> DomainResult<()> {
        match self {
            Validator::RequireLines => {
                if doc.lines.is_empty() {
                    return Err(DomainError::validation(format!(
                        "{} has no lines",
                        doc.document_number
                    )));
                }
            }
            Validator::RequireWarehouse => {
                if doc.warehouse_id.is_none() {
                    return Err(DomainError::validation(format!(
                        "{} has no warehouse",
                        doc.document_number
                    )));
                }
            }
            Validator::RequireDestination => match doc.destination_warehouse_id {
                None => {
                    return Err(DomainError::validation(format!(
                        "{} has no destination warehouse",
                        doc.document_number
                    )));
                }
                Some(dest) if Some(dest) == doc.warehouse_id => {
                    return Err(DomainError::validation(
                        "destination warehouse must differ from source",
                    ));
                }
                Some(_) => {}
            },
            Validator::RequireInspectionResult => {
                if input.inspection_result.is_none() {
                    return Err(DomainError::validation("an inspection result is required"));
                }
            }
        }
        Ok(())
    }
}

/// Stock or record mutation run inside the transition's transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    None,
    /// Reserve every line at the document's warehouse.
    AllocateStock,
    ConsumeReservations,
    ReleaseReservations,
    /// One new lot per line at the document's warehouse.
    ReceiveLots,
    /// One new lot per consumed source allocation, at the destination warehouse.
    ReceiveTransferredLots,
    RecordInspectionResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionSpec {
    pub to: DocumentStatus,
    pub allowed_roles: Vec<Role>,
    /// Actor must also satisfy the approval tier for the document's total.
    pub approval_gated: bool,
    pub validators: Vec<Validator>,
    pub effect: SideEffect,
}

impl TransitionSpec {
    pub fn to(to: DocumentStatus, roles: &[Role]) -> Self {
        Self {
            to,
            allowed_roles: roles.to_vec(),
            approval_gated: false,
            validators: Vec::new(),
            effect: SideEffect::None,
        }
    }

    pub fn gated(mut self) -> Self {
        self.approval_gated = true;
        self
    }

    pub fn validate(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn effect(mut self, effect: SideEffect) -> Self {
        self.effect = effect;
        self
    }

    pub fn permits(&self, role: &Role) -> bool {
        role.is_admin() || self.allowed_roles.contains(role)
    }
}

/// The fixed-shape transition table of one document type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Workflow {
    pub document_type: DocumentType,
    pub editable: Vec<DocumentStatus>,
    pub create_roles: Vec<Role>,
    pub scope: ScopeRule,
    #[serde(skip)]
    transitions: BTreeMap<(DocumentStatus, Action), TransitionSpec>,
}

impl Workflow {
    pub fn new(document_type: DocumentType, create_roles: &[Role], scope: ScopeRule) -> Self {
        Self {
            document_type,
            editable: vec![DocumentStatus::Draft],
            create_roles: create_roles.to_vec(),
            scope,
            transitions: BTreeMap::new(),
        }
    }

    /// Register `action` from each of `from`.
    pub fn on(mut self, from: &[DocumentStatus], action: Action, spec: TransitionSpec) -> Self {
        for status in from {
            self.transitions.insert((*status, action), spec.clone());
        }
        self
    }

    pub fn transition(&self, from: DocumentStatus, action: Action) -> DomainResult<&TransitionSpec> {
        self.transitions
            .get(&(from, action))
            .ok_or_else(|| DomainError::InvalidTransition {
                from: from.to_string(),
                action: action.to_string(),
                allowed: self
                    .allowed_actions(from)
                    .iter()
                    .map(|a| a.to_string())
                    .collect(),
            })
    }

    pub fn allowed_actions(&self, from: DocumentStatus) -> Vec<Action> {
        self.transitions
            .range((from, Action::Submit)..=(from, Action::Cancel))
            .map(|((_, action), _)| *action)
            .collect()
    }

    /// `(from, action, spec)` rows in table order.
    pub fn rows(&self) -> impl Iterator<Item = (DocumentStatus, Action, &TransitionSpec)> {
        self.transitions.iter().map(|((s, a), spec)| (*s, *a, spec))
    }

    pub fn states(&self) -> Vec<DocumentStatus> {
        let mut states = vec![DocumentStatus::Draft];
        for (from, _, spec) in self.rows() {
            for s in [from, spec.to] {
                if !states.contains(&s) {
                    states.push(s);
                }
            }
        }
        states.sort();
        states
    }

    pub fn is_editable(&self, status: DocumentStatus) -> bool {
        self.editable.contains(&status)
    }

    pub fn can_create(&self, role: &Role) -> bool {
        role.is_admin() || self.create_roles.contains(role)
    }
}

/// All workflows, resolved once at startup and immutable afterwards.
#[derive(Debug, Clone)]
pub struct WorkflowRegistry {
    workflows: HashMap<DocumentType, Workflow>,
}

impl WorkflowRegistry {
    pub fn new(workflows: impl IntoIterator<Item = Workflow>) -> Self {
        Self {
            workflows: workflows
                .into_iter()
                .map(|w| (w.document_type, w))
                .collect(),
        }
    }

    pub fn workflow(&self, document_type: DocumentType) -> DomainResult<&Workflow> {
        self.workflows
            .get(&document_type)
            .ok_or_else(|| DomainError::not_found(format!("workflow for {document_type}")))
    }

    /// The standard warehouse workflows.
    pub fn standard() -> Self {
        Self::new([
            goods_receipt(),
            material_issue(),
            material_return(),
            quality_inspection(),
            discrepancy_report(),
            internal_transfer(),
        ])
    }
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

use DocumentStatus::*;

const STOCK_HANDLERS: &[Role] = &[
    Role::WAREHOUSE_STAFF,
    Role::WAREHOUSE_SUPERVISOR,
    Role::WAREHOUSE_MANAGER,
];
const SUPERVISORS: &[Role] = &[Role::WAREHOUSE_SUPERVISOR, Role::WAREHOUSE_MANAGER];

fn goods_receipt() -> Workflow {
    Workflow::new(DocumentType::GoodsReceipt, STOCK_HANDLERS, ScopeRule::Warehouse)
        .on(
            &[Draft],
            Action::Submit,
            TransitionSpec::to(Submitted, STOCK_HANDLERS)
                .validate(Validator::RequireLines)
                .validate(Validator::RequireWarehouse),
        )
        .on(
            &[Submitted],
            Action::QcApprove,
            TransitionSpec::to(QcApproved, &[Role::QC_INSPECTOR, Role::WAREHOUSE_MANAGER]),
        )
        .on(
            &[Submitted],
            Action::Reject,
            TransitionSpec::to(
                Rejected,
                &[Role::QC_INSPECTOR, Role::WAREHOUSE_SUPERVISOR, Role::WAREHOUSE_MANAGER],
            ),
        )
        .on(&[QcApproved], Action::Receive, TransitionSpec::to(Received, STOCK_HANDLERS))
        .on(
            &[Received],
            Action::Store,
            TransitionSpec::to(Stored, STOCK_HANDLERS).effect(SideEffect::ReceiveLots),
        )
        .on(&[Stored], Action::Close, TransitionSpec::to(Completed, SUPERVISORS))
        .on(&[Draft, Submitted], Action::Cancel, TransitionSpec::to(Cancelled, STOCK_HANDLERS))
}

fn material_issue() -> Workflow {
    const REQUESTERS: &[Role] = &[
        Role::SITE_ENGINEER,
        Role::PROJECT_MANAGER,
        Role::WAREHOUSE_STAFF,
        Role::WAREHOUSE_SUPERVISOR,
    ];
    const APPROVERS: &[Role] = &[
        Role::WAREHOUSE_SUPERVISOR,
        Role::WAREHOUSE_MANAGER,
        Role::PROJECT_MANAGER,
        Role::FINANCE_MANAGER,
        Role::DIRECTOR,
    ];

    Workflow::new(DocumentType::MaterialIssue, REQUESTERS, ScopeRule::WarehouseAndProject)
        .on(
            &[Draft],
            Action::Submit,
            TransitionSpec::to(Submitted, REQUESTERS)
                .validate(Validator::RequireLines)
                .validate(Validator::RequireWarehouse),
        )
        .on(
            &[Submitted],
            Action::Approve,
            TransitionSpec::to(Approved, APPROVERS)
                .gated()
                .effect(SideEffect::AllocateStock),
        )
        .on(&[Submitted], Action::Reject, TransitionSpec::to(Rejected, APPROVERS))
        .on(
            &[Approved],
            Action::Issue,
            TransitionSpec::to(Issued, STOCK_HANDLERS).effect(SideEffect::ConsumeReservations),
        )
        .on(
            &[Issued],
            Action::Complete,
            TransitionSpec::to(
                Completed,
                &[
                    Role::WAREHOUSE_STAFF,
                    Role::WAREHOUSE_SUPERVISOR,
                    Role::WAREHOUSE_MANAGER,
                    Role::SITE_ENGINEER,
                    Role::PROJECT_MANAGER,
                ],
            ),
        )
        .on(&[Draft, Submitted], Action::Cancel, TransitionSpec::to(Cancelled, REQUESTERS))
        .on(
            &[Approved],
            Action::Cancel,
            TransitionSpec::to(
                Cancelled,
                &[Role::WAREHOUSE_SUPERVISOR, Role::WAREHOUSE_MANAGER, Role::PROJECT_MANAGER],
            )
            .effect(SideEffect::ReleaseReservations),
        )
}

fn material_return() -> Workflow {
    const RETURNERS: &[Role] = &[
        Role::SITE_ENGINEER,
        Role::PROJECT_MANAGER,
        Role::WAREHOUSE_STAFF,
        Role::WAREHOUSE_SUPERVISOR,
    ];
    const REVIEWERS: &[Role] = &[
        Role::QC_INSPECTOR,
        Role::WAREHOUSE_SUPERVISOR,
        Role::WAREHOUSE_MANAGER,
    ];

    Workflow::new(DocumentType::MaterialReturn, RETURNERS, ScopeRule::WarehouseAndProject)
        .on(
            &[Draft],
            Action::Submit,
            TransitionSpec::to(Submitted, RETURNERS)
                .validate(Validator::RequireLines)
                .validate(Validator::RequireWarehouse),
        )
        .on(&[Submitted], Action::Approve, TransitionSpec::to(Approved, REVIEWERS))
        .on(&[Submitted], Action::Reject, TransitionSpec::to(Rejected, REVIEWERS))
        .on(
            &[Approved],
            Action::Receive,
            TransitionSpec::to(Received, STOCK_HANDLERS).effect(SideEffect::ReceiveLots),
        )
        .on(&[Received], Action::Complete, TransitionSpec::to(Completed, STOCK_HANDLERS))
        .on(
            &[Draft, Submitted, Approved],
            Action::Cancel,
            TransitionSpec::to(
                Cancelled,
                &[
                    Role::SITE_ENGINEER,
                    Role::PROJECT_MANAGER,
                    Role::WAREHOUSE_SUPERVISOR,
                    Role::WAREHOUSE_MANAGER,
                ],
            ),
        )
}

fn quality_inspection() -> Workflow {
    const INSPECTORS: &[Role] = &[Role::QC_INSPECTOR];

    Workflow::new(
        DocumentType::QualityInspection,
        &[Role::QC_INSPECTOR, Role::WAREHOUSE_SUPERVISOR, Role::WAREHOUSE_MANAGER],
        ScopeRule::Warehouse,
    )
    .on(&[Draft], Action::Start, TransitionSpec::to(InProgress, INSPECTORS))
    .on(
        &[InProgress],
        Action::Complete,
        TransitionSpec::to(Completed, INSPECTORS)
            .validate(Validator::RequireInspectionResult)
            .effect(SideEffect::RecordInspectionResult),
    )
    .on(
        &[Draft, InProgress],
        Action::Cancel,
        TransitionSpec::to(
            Cancelled,
            &[Role::QC_INSPECTOR, Role::WAREHOUSE_SUPERVISOR, Role::WAREHOUSE_MANAGER],
        ),
    )
}

fn discrepancy_report() -> Workflow {
    const REPORTERS: &[Role] = &[
        Role::WAREHOUSE_STAFF,
        Role::WAREHOUSE_SUPERVISOR,
        Role::WAREHOUSE_MANAGER,
        Role::QC_INSPECTOR,
        Role::PROJECT_MANAGER,
        Role::SYSTEM,
    ];

    Workflow::new(DocumentType::DiscrepancyReport, REPORTERS, ScopeRule::Warehouse)
        .on(&[Draft], Action::Submit, TransitionSpec::to(Submitted, REPORTERS))
        .on(&[Submitted], Action::Review, TransitionSpec::to(UnderReview, SUPERVISORS))
        .on(
            &[UnderReview],
            Action::Resolve,
            TransitionSpec::to(
                Resolved,
                &[Role::WAREHOUSE_MANAGER, Role::FINANCE_MANAGER, Role::DIRECTOR],
            ),
        )
        .on(
            &[Resolved],
            Action::Close,
            TransitionSpec::to(Completed, &[Role::WAREHOUSE_MANAGER, Role::DIRECTOR]),
        )
        .on(&[Submitted, UnderReview], Action::Reject, TransitionSpec::to(Rejected, SUPERVISORS))
        .on(&[Draft], Action::Cancel, TransitionSpec::to(Cancelled, REPORTERS))
}

fn internal_transfer() -> Workflow {
    const REQUESTERS: &[Role] = &[
        Role::WAREHOUSE_STAFF,
        Role::WAREHOUSE_SUPERVISOR,
        Role::WAREHOUSE_MANAGER,
        Role::PROJECT_MANAGER,
    ];
    const APPROVERS: &[Role] = &[
        Role::WAREHOUSE_SUPERVISOR,
        Role::WAREHOUSE_MANAGER,
        Role::FINANCE_MANAGER,
        Role::DIRECTOR,
    ];

    Workflow::new(DocumentType::InternalTransfer, REQUESTERS, ScopeRule::Warehouse)
        .on(
            &[Draft],
            Action::Submit,
            TransitionSpec::to(Submitted, REQUESTERS)
                .validate(Validator::RequireLines)
                .validate(Validator::RequireWarehouse)
                .validate(Validator::RequireDestination),
        )
        .on(
            &[Submitted],
            Action::Approve,
            TransitionSpec::to(Approved, APPROVERS)
                .gated()
                .effect(SideEffect::AllocateStock),
        )
        .on(&[Submitted], Action::Reject, TransitionSpec::to(Rejected, APPROVERS))
        .on(
            &[Approved],
            Action::Dispatch,
            TransitionSpec::to(InTransit, STOCK_HANDLERS).effect(SideEffect::ConsumeReservations),
        )
        .on(
            &[InTransit],
            Action::Receive,
            TransitionSpec::to(Received, STOCK_HANDLERS).effect(SideEffect::ReceiveTransferredLots),
        )
        .on(&[Received], Action::Complete, TransitionSpec::to(Completed, SUPERVISORS))
        .on(&[Draft, Submitted], Action::Cancel, TransitionSpec::to(Cancelled, REQUESTERS))
        .on(
            &[Approved],
            Action::Cancel,
            TransitionSpec::to(Cancelled, SUPERVISORS).effect(SideEffect::ReleaseReservations),
        )
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use wareflow_core::{ItemId, ProjectId, UserId, WarehouseId};

    use super::*;
    use crate::{NewDocument, NewLine};

    fn test_document(document_type: DocumentType) -> Document {
        Document::draft(
            document_type,
            "TEST-0001".to_string(),
            NewDocument {
                warehouse_id: Some(WarehouseId::new()),
                project_id: Some(ProjectId::new()),
                lines: vec![NewLine { item_id: ItemId::new(), quantity: 1, unit_cost: 1 }],
                ..NewDocument::default()
            },
            UserId::new(),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn every_type_has_a_workflow() {
        let registry = WorkflowRegistry::standard();
        for t in DocumentType::ALL {
            let wf = registry.workflow(*t).unwrap();
            assert!(wf.is_editable(Draft));
            assert!(!wf.allowed_actions(Draft).is_empty());
        }
    }

    #[test]
    fn terminal_states_have_no_outgoing_transitions() {
        let registry = WorkflowRegistry::standard();
        for t in DocumentType::ALL {
            let wf = registry.workflow(*t).unwrap();
            for status in wf.states() {
                if status.is_terminal() {
                    assert!(wf.allowed_actions(status).is_empty(), "{t} {status}");
                }
            }
        }
    }

    #[test]
    fn goods_receipt_happy_path() {
        let wf = WorkflowRegistry::standard();
        let wf = wf.workflow(DocumentType::GoodsReceipt).unwrap();
        let path = [
            (Draft, Action::Submit, Submitted),
            (Submitted, Action::QcApprove, QcApproved),
            (QcApproved, Action::Receive, Received),
            (Received, Action::Store, Stored),
            (Stored, Action::Close, Completed),
        ];
        for (from, action, to) in path {
            assert_eq!(wf.transition(from, action).unwrap().to, to);
        }
        assert_eq!(
            wf.transition(Received, Action::Store).unwrap().effect,
            SideEffect::ReceiveLots
        );
    }

    #[test]
    fn unmapped_pair_lists_allowed_actions() {
        let registry = WorkflowRegistry::standard();
        let wf = registry.workflow(DocumentType::MaterialIssue).unwrap();
        let err = wf.transition(Draft, Action::Approve).unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidTransition {
                from: "draft".into(),
                action: "approve".into(),
                allowed: vec!["submit".into(), "cancel".into()],
            }
        );
    }

    #[test]
    fn approved_issue_cancel_releases_stock() {
        let registry = WorkflowRegistry::standard();
        let wf = registry.workflow(DocumentType::MaterialIssue).unwrap();
        assert_eq!(
            wf.transition(Approved, Action::Cancel).unwrap().effect,
            SideEffect::ReleaseReservations
        );
        assert_eq!(wf.transition(Draft, Action::Cancel).unwrap().effect, SideEffect::None);
        assert!(wf.transition(Submitted, Action::Approve).unwrap().approval_gated);
    }

    #[test]
    fn admin_is_permitted_everywhere() {
        let registry = WorkflowRegistry::standard();
        for t in DocumentType::ALL {
            let wf = registry.workflow(*t).unwrap();
            for (_, _, spec) in wf.rows() {
                assert!(spec.permits(&Role::ADMIN));
            }
        }
    }

    #[test]
    fn scope_rule_checks_assigned_warehouse_and_project() {
        let doc = test_document(DocumentType::MaterialIssue);
        let in_scope = Actor::new(UserId::new(), Role::SITE_ENGINEER)
            .with_warehouse(doc.warehouse_id.unwrap())
            .with_project(doc.project_id.unwrap());
        assert!(ScopeRule::WarehouseAndProject.check(&in_scope, &doc).is_ok());

        let wrong_project = in_scope.clone().with_project(ProjectId::new());
        assert!(matches!(
            ScopeRule::WarehouseAndProject.check(&wrong_project, &doc),
            Err(DomainError::Forbidden(_))
        ));
        assert!(ScopeRule::Warehouse.check(&wrong_project, &doc).is_ok());
    }

    #[test]
    fn transfer_destination_staff_are_in_scope() {
        let mut doc = test_document(DocumentType::InternalTransfer);
        let dest = WarehouseId::new();
        doc.destination_warehouse_id = Some(dest);
        let receiver = Actor::new(UserId::new(), Role::WAREHOUSE_STAFF).with_warehouse(dest);
        assert!(ScopeRule::Warehouse.check(&receiver, &doc).is_ok());
    }

    #[test]
    fn validators() {
        let mut doc = test_document(DocumentType::InternalTransfer);
        let input = TransitionInput::new(Action::Submit);
        assert!(Validator::RequireLines.check(&doc, &input).is_ok());
        assert!(Validator::RequireDestination.check(&doc, &input).is_err());
        doc.destination_warehouse_id = doc.warehouse_id;
        assert!(Validator::RequireDestination.check(&doc, &input).is_err());

        doc.lines.clear();
        assert!(Validator::RequireLines.check(&doc, &input).is_err());
        assert!(Validator::RequireInspectionResult.check(&doc, &input).is_err());
    }
}
