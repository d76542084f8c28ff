//! Engine configuration.
//!
//! Defaults describe a working deployment; `WAREFLOW_CONFIG` may point at a
//! JSON document overriding any subset of fields, and
//! `WAREFLOW_NUMBER_TEMPLATE` replaces the number template of every type.

use std::collections::BTreeMap;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wareflow_approvals::{ApprovalChain, ApprovalTier};
use wareflow_auth::{Actor, Role, RoleHierarchy};
use wareflow_core::{DomainError, DomainResult, UserId};
use wareflow_documents::{DocumentType, NumberTemplate};

pub const CONFIG_PATH_ENV: &str = "WAREFLOW_CONFIG";
pub const NUMBER_TEMPLATE_ENV: &str = "WAREFLOW_NUMBER_TEMPLATE";

/// How numbers of one document type are rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberFormat {
    pub prefix: String,
    #[serde(default)]
    pub template: NumberTemplate,
}

impl NumberFormat {
    pub fn new(prefix: impl Into<String>, template: NumberTemplate) -> Self {
        Self {
            prefix: prefix.into(),
            template,
        }
    }

    pub fn render(&self, year: i32, sequence: u64) -> String {
        self.template.format(&self.prefix, year, sequence)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub numbering: BTreeMap<DocumentType, NumberFormat>,
    pub approval_tiers: Vec<ApprovalTier>,
    pub role_ranks: BTreeMap<Role, u32>,
    /// Identity recorded on documents created by orchestration handlers.
    pub system_actor_id: UserId,
    /// Max outbox entries re-published per `publish_pending` call.
    pub outbox_batch: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let numbering = DocumentType::ALL
            .iter()
            .map(|t| (*t, NumberFormat::new(t.prefix(), NumberTemplate::default())))
            .collect();
        let role_ranks = [
            (Role::WAREHOUSE_STAFF, 10),
            (Role::QC_INSPECTOR, 10),
            (Role::SITE_ENGINEER, 10),
            (Role::WAREHOUSE_SUPERVISOR, 20),
            (Role::WAREHOUSE_MANAGER, 30),
            (Role::PROJECT_MANAGER, 30),
            (Role::FINANCE_MANAGER, 40),
            (Role::DIRECTOR, 50),
            (Role::ADMIN, 100),
        ]
        .into_iter()
        .collect();

        Self {
            numbering,
            approval_tiers: ApprovalChain::standard().all_tiers().cloned().collect(),
            role_ranks,
            system_actor_id: UserId::from_uuid(Uuid::nil()),
            outbox_batch: 100,
        }
    }
}

impl EngineConfig {
    /// Load from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok();
        let template = std::env::var(NUMBER_TEMPLATE_ENV).ok();
        Self::from_sources(path.as_deref(), template.as_deref())
    }

    pub fn from_sources(config_path: Option<&str>, number_template: Option<&str>) -> anyhow::Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(raw) = number_template {
            let template = NumberTemplate::parse(raw)
                .with_context(|| format!("invalid {NUMBER_TEMPLATE_ENV}"))?;
            for format in config.numbering.values_mut() {
                format.template = template.clone();
            }
        }

        config.validate().context("invalid engine configuration")?;
        tracing::info!(
            numbering = config.numbering.len(),
            approval_tiers = config.approval_tiers.len(),
            "engine configuration loaded"
        );
        Ok(config)
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path}"))?;
        Self::from_json(&raw).with_context(|| format!("failed to parse config file {path}"))
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn validate(&self) -> DomainResult<()> {
        for document_type in DocumentType::ALL {
            if !self.numbering.contains_key(document_type) {
                return Err(DomainError::validation(format!(
                    "no number format configured for {document_type}"
                )));
            }
        }
        if self.numbering.values().any(|f| f.prefix.trim().is_empty()) {
            return Err(DomainError::validation("number prefixes cannot be blank"));
        }
        ApprovalChain::new(self.approval_tiers.iter().cloned())?;
        Ok(())
    }

    pub fn role_hierarchy(&self) -> RoleHierarchy {
        RoleHierarchy::new(self.role_ranks.iter().map(|(r, n)| (r.clone(), *n)))
    }

    pub fn system_actor(&self) -> Actor {
        Actor::new(self.system_actor_id, Role::SYSTEM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_document_type() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(
            config.numbering[&DocumentType::InternalTransfer].render(2026, 7),
            "IT-2026-0007"
        );
        assert!(config.system_actor().is_system());
    }

    #[test]
    fn template_override_applies_to_every_type() {
        let config = EngineConfig::from_sources(None, Some("{PREFIX}/{YY}/{NNNNNN}")).unwrap();
        assert_eq!(
            config.numbering[&DocumentType::GoodsReceipt].render(2026, 42),
            "GRN/26/000042"
        );
        assert_eq!(
            config.numbering[&DocumentType::MaterialIssue].render(2026, 1),
            "MIS/26/000001"
        );
    }

    #[test]
    fn bad_template_is_rejected() {
        assert!(EngineConfig::from_sources(None, Some("{PREFIX}-{YYYY}")).is_err());
    }

    #[test]
    fn json_overrides_merge_with_defaults() {
        let config = EngineConfig::from_json(
            r#"{
                "numbering": {
                    "goods_receipt": { "prefix": "RCV" },
                    "material_issue": { "prefix": "MIS" },
                    "material_return": { "prefix": "MRN" },
                    "quality_inspection": { "prefix": "QCI" },
                    "discrepancy_report": { "prefix": "DR" },
                    "internal_transfer": { "prefix": "IT", "template": "{PREFIX}{NNN}" }
                },
                "outbox_batch": 5
            }"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.outbox_batch, 5);
        assert_eq!(config.numbering[&DocumentType::GoodsReceipt].render(2026, 3), "RCV-2026-0003");
        assert_eq!(config.numbering[&DocumentType::InternalTransfer].render(2026, 3), "IT003");
        assert!(!config.approval_tiers.is_empty());
    }

    #[test]
    fn overlapping_tiers_fail_validation() {
        let mut config = EngineConfig::default();
        config.approval_tiers.push(ApprovalTier::new(
            DocumentType::MaterialIssue,
            50,
            Some(60),
            Role::DIRECTOR,
        ));
        assert!(config.validate().is_err());
    }

    #[test]
    fn hierarchy_reflects_configured_ranks() {
        let mut config = EngineConfig::default();
        config.role_ranks.insert(Role::new("auditor"), 45);
        let h = config.role_hierarchy();
        assert!(h.satisfies(&Role::new("auditor"), &Role::FINANCE_MANAGER));
        assert!(!h.satisfies(&Role::new("auditor"), &Role::DIRECTOR));
    }
}
