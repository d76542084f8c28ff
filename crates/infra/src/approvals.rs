//! Approval-tier lookups against the store.

use std::sync::{Arc, RwLock};

use wareflow_approvals::{ApprovalChain, ApprovalRequirement, ApprovalTier};
use wareflow_auth::{Actor, RoleHierarchy};
use wareflow_core::{DomainError, DomainResult};
use wareflow_documents::DocumentType;

use crate::error::EngineResult;
use crate::store::{DocumentStore, StoreTx};

/// Resolves who may approve a document of a given value.
///
/// Enforcement reads the tiers inside the caller's transaction, so a tier
/// change cannot race an approval. Previews go through a cached chain that is
/// dropped whenever tiers are replaced through this resolver.
pub struct ApprovalResolver {
    store: Arc<dyn DocumentStore>,
    hierarchy: RoleHierarchy,
    cache: RwLock<Option<Arc<ApprovalChain>>>,
}

impl ApprovalResolver {
    pub fn new(store: Arc<dyn DocumentStore>, hierarchy: RoleHierarchy) -> Self {
        Self {
            store,
            hierarchy,
            cache: RwLock::new(None),
        }
    }

    pub fn hierarchy(&self) -> &RoleHierarchy {
        &self.hierarchy
    }

    /// Requirement for approving `amount`, read inside `tx`.
    ///
    /// Fails closed with `NotFound` when the type has no tiers.
    pub async fn requirement_in(
        &self,
        tx: &mut dyn StoreTx,
        document_type: DocumentType,
        amount: u64,
    ) -> EngineResult<ApprovalRequirement> {
        let tiers = tx.approval_tiers(document_type).await?;
        let chain = ApprovalChain::new(tiers)?;
        Ok(chain.resolve(document_type, amount)?)
    }

    /// Chain level recorded at submit time, if the type has tiers at all.
    pub async fn level_in(
        &self,
        tx: &mut dyn StoreTx,
        document_type: DocumentType,
        amount: u64,
    ) -> EngineResult<Option<u32>> {
        let tiers = tx.approval_tiers(document_type).await?;
        if tiers.is_empty() {
            return Ok(None);
        }
        let chain = ApprovalChain::new(tiers)?;
        Ok(Some(chain.resolve(document_type, amount)?.chain_level))
    }

    pub fn authorize(&self, requirement: &ApprovalRequirement, actor: &Actor) -> DomainResult<()> {
        if requirement.is_satisfied_by(&self.hierarchy, &actor.role) {
            return Ok(());
        }
        Err(DomainError::forbidden(format!(
            "approval of this {} requires {} (tier {}); actor has {}",
            requirement.document_type, requirement.required_role, requirement.chain_level, actor.role
        )))
    }

    /// Read-only lookup for clients, served from the cache.
    pub async fn preview(&self, document_type: DocumentType, amount: u64) -> EngineResult<ApprovalRequirement> {
        let chain = self.chain().await?;
        Ok(chain.resolve(document_type, amount)?)
    }

    pub async fn tiers(&self, document_type: DocumentType) -> EngineResult<Vec<ApprovalTier>> {
        let chain = self.chain().await?;
        Ok(chain.tiers(document_type).to_vec())
    }

    /// Validate and store a new set of tiers for one document type.
    pub async fn replace_tiers(
        &self,
        document_type: DocumentType,
        tiers: Vec<ApprovalTier>,
    ) -> EngineResult<()> {
        if let Some(stray) = tiers.iter().find(|t| t.document_type != document_type) {
            return Err(DomainError::validation(format!(
                "tier for {} submitted under {document_type}",
                stray.document_type
            ))
            .into());
        }
        ApprovalChain::new(tiers.iter().cloned())?;
        self.store.replace_approval_tiers(document_type, tiers).await?;
        self.invalidate();
        tracing::info!(%document_type, "approval tiers replaced");
        Ok(())
    }

    pub fn invalidate(&self) {
        let mut cache = self.cache.write().unwrap_or_else(|p| p.into_inner());
        *cache = None;
    }

    async fn chain(&self) -> EngineResult<Arc<ApprovalChain>> {
        if let Some(chain) = self.cache.read().unwrap_or_else(|p| p.into_inner()).clone() {
            return Ok(chain);
        }
        let chain = Arc::new(ApprovalChain::new(self.store.all_approval_tiers().await?)?);
        let mut cache = self.cache.write().unwrap_or_else(|p| p.into_inner());
        *cache = Some(chain.clone());
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use wareflow_auth::Role;
    use wareflow_core::UserId;

    use super::*;
    use crate::store::InMemoryStore;

    fn resolver() -> ApprovalResolver {
        let store = InMemoryStore::with_tiers(ApprovalChain::standard().all_tiers().cloned());
        ApprovalResolver::new(Arc::new(store), RoleHierarchy::default())
    }

    #[tokio::test]
    async fn preview_resolves_standard_tiers() {
        let r = resolver();
        let req = r.preview(DocumentType::MaterialIssue, 250_000).await.unwrap();
        assert_eq!(req.required_role, Role::WAREHOUSE_MANAGER);
        assert_eq!(req.chain_level, 2);

        let req = r.preview(DocumentType::InternalTransfer, u64::MAX).await.unwrap();
        assert_eq!(req.required_role, Role::DIRECTOR);
    }

    #[tokio::test]
    async fn types_without_tiers_fail_closed() {
        let r = resolver();
        let err = r.preview(DocumentType::GoodsReceipt, 10).await.unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::NotFound(_))));
    }

    #[tokio::test]
    async fn replacing_tiers_invalidates_the_cache() {
        let r = resolver();
        assert_eq!(
            r.preview(DocumentType::MaterialIssue, 10).await.unwrap().required_role,
            Role::WAREHOUSE_SUPERVISOR
        );

        r.replace_tiers(
            DocumentType::MaterialIssue,
            vec![ApprovalTier::new(DocumentType::MaterialIssue, 0, None, Role::DIRECTOR)],
        )
        .await
        .unwrap();

        assert_eq!(
            r.preview(DocumentType::MaterialIssue, 10).await.unwrap().required_role,
            Role::DIRECTOR
        );
        // Other types keep their tiers.
        assert_eq!(r.tiers(DocumentType::InternalTransfer).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn invalid_replacements_are_rejected() {
        let r = resolver();
        let gap = vec![
            ApprovalTier::new(DocumentType::MaterialIssue, 0, Some(10), Role::WAREHOUSE_SUPERVISOR),
            ApprovalTier::new(DocumentType::MaterialIssue, 20, None, Role::DIRECTOR),
        ];
        assert!(r.replace_tiers(DocumentType::MaterialIssue, gap).await.is_err());

        let stray = vec![ApprovalTier::new(DocumentType::InternalTransfer, 0, None, Role::DIRECTOR)];
        assert!(r.replace_tiers(DocumentType::MaterialIssue, stray).await.is_err());
    }

    #[test]
    fn authorize_uses_rank() {
        let r = resolver();
        let requirement = ApprovalRequirement {
            document_type: DocumentType::MaterialIssue,
            required_role: Role::WAREHOUSE_MANAGER,
            chain_level: 2,
        };
        let director = Actor::new(UserId::new(), Role::DIRECTOR);
        let supervisor = Actor::new(UserId::new(), Role::WAREHOUSE_SUPERVISOR);
        assert!(r.authorize(&requirement, &director).is_ok());
        assert!(matches!(
            r.authorize(&requirement, &supervisor),
            Err(DomainError::Forbidden(_))
        ));
    }
}
