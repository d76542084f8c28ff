use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use wareflow_auth::{Role, RoleHierarchy};
use wareflow_core::{DomainError, DomainResult};
use wareflow_documents::DocumentType;

/// One band of a document type's approval chain: `[min_amount, max_amount)`.
///
/// `max_amount == None` marks the open-ended top tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalTier {
    pub document_type: DocumentType,
    pub min_amount: u64,
    #[serde(default)]
    pub max_amount: Option<u64>,
    pub required_role: Role,
}

impl ApprovalTier {
    pub fn new(document_type: DocumentType, min_amount: u64, max_amount: Option<u64>, required_role: Role) -> Self {
        Self {
            document_type,
            min_amount,
            max_amount,
            required_role,
        }
    }

    pub fn contains(&self, amount: u64) -> bool {
        amount >= self.min_amount && self.max_amount.is_none_or(|max| amount < max)
    }
}

/// What an approver must hold for a given amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequirement {
    pub document_type: DocumentType,
    pub required_role: Role,
    /// 1-based position of the matched tier; higher is stricter.
    pub chain_level: u32,
}

impl ApprovalRequirement {
    pub fn is_satisfied_by(&self, hierarchy: &RoleHierarchy, role: &Role) -> bool {
        hierarchy.satisfies(role, &self.required_role)
    }
}

/// Validated approval tiers, grouped per document type.
///
/// Tiers of one type must start at 0, be contiguous and non-overlapping, and
/// only the last may be open-ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApprovalChain {
    tiers: BTreeMap<DocumentType, Vec<ApprovalTier>>,
}

impl ApprovalChain {
    pub fn new(tiers: impl IntoIterator<Item = ApprovalTier>) -> DomainResult<Self> {
        let mut grouped: BTreeMap<DocumentType, Vec<ApprovalTier>> = BTreeMap::new();
        for tier in tiers {
            grouped.entry(tier.document_type).or_default().push(tier);
        }
        for (document_type, tiers) in grouped.iter_mut() {
            tiers.sort_by_key(|t| t.min_amount);
            validate_tiers(*document_type, tiers)?;
        }
        Ok(Self { tiers: grouped })
    }

    /// Default chain for the gated document types.
    ///
    /// Amounts are minor currency units.
    pub fn standard() -> Self {
        let mut tiers = Vec::new();
        for document_type in [DocumentType::MaterialIssue, DocumentType::InternalTransfer] {
            tiers.extend([
                ApprovalTier::new(document_type, 0, Some(100_000), Role::WAREHOUSE_SUPERVISOR),
                ApprovalTier::new(document_type, 100_000, Some(1_000_000), Role::WAREHOUSE_MANAGER),
                ApprovalTier::new(document_type, 1_000_000, Some(5_000_000), Role::FINANCE_MANAGER),
                ApprovalTier::new(document_type, 5_000_000, None, Role::DIRECTOR),
            ]);
        }
        let mut grouped: BTreeMap<DocumentType, Vec<ApprovalTier>> = BTreeMap::new();
        for tier in tiers {
            grouped.entry(tier.document_type).or_default().push(tier);
        }
        Self { tiers: grouped }
    }

    pub fn tiers(&self, document_type: DocumentType) -> &[ApprovalTier] {
        self.tiers
            .get(&document_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn all_tiers(&self) -> impl Iterator<Item = &ApprovalTier> {
        self.tiers.values().flatten()
    }

    /// Resolve the tier containing `amount`.
    ///
    /// Amounts beyond the last closed tier resolve to the strictest tier. A
    /// document type without tiers fails closed with `NotFound`.
    pub fn resolve(&self, document_type: DocumentType, amount: u64) -> DomainResult<ApprovalRequirement> {
        let tiers = self.tiers(document_type);
        let last = tiers.len();
        if last == 0 {
            return Err(DomainError::not_found(format!(
                "approval tiers for {document_type}"
            )));
        }
        let (index, tier) = tiers
            .iter()
            .enumerate()
            .find(|(_, t)| t.contains(amount))
            .unwrap_or((last - 1, &tiers[last - 1]));
        Ok(ApprovalRequirement {
            document_type,
            required_role: tier.required_role.clone(),
            chain_level: (index + 1) as u32,
        })
    }
}

fn validate_tiers(document_type: DocumentType, tiers: &[ApprovalTier]) -> DomainResult<()> {
    let Some(first) = tiers.first() else {
        return Ok(());
    };
    if first.min_amount != 0 {
        return Err(DomainError::validation(format!(
            "approval tiers for {document_type} must start at 0"
        )));
    }
    for (i, tier) in tiers.iter().enumerate() {
        let is_last = i + 1 == tiers.len();
        match tier.max_amount {
            None if !is_last => {
                return Err(DomainError::validation(format!(
                    "only the top approval tier for {document_type} may be open-ended"
                )));
            }
            Some(max) if max <= tier.min_amount => {
                return Err(DomainError::validation(format!(
                    "approval tier [{}, {}) for {document_type} is empty",
                    tier.min_amount, max
                )));
            }
            _ => {}
        }
        if let Some(next) = tiers.get(i + 1) {
            if tier.max_amount != Some(next.min_amount) {
                return Err(DomainError::validation(format!(
                    "approval tiers for {document_type} must be contiguous at {}",
                    next.min_amount
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIS: DocumentType = DocumentType::MaterialIssue;

    #[test]
    fn resolves_tier_containing_amount() {
        let chain = ApprovalChain::standard();
        assert_eq!(chain.resolve(MIS, 0).unwrap().required_role, Role::WAREHOUSE_SUPERVISOR);
        assert_eq!(chain.resolve(MIS, 99_999).unwrap().chain_level, 1);
        assert_eq!(chain.resolve(MIS, 100_000).unwrap().required_role, Role::WAREHOUSE_MANAGER);
        assert_eq!(chain.resolve(MIS, u64::MAX).unwrap().required_role, Role::DIRECTOR);
    }

    #[test]
    fn amounts_above_closed_chain_use_strictest_tier() {
        let chain = ApprovalChain::new([
            ApprovalTier::new(MIS, 0, Some(10), Role::WAREHOUSE_SUPERVISOR),
            ApprovalTier::new(MIS, 10, Some(20), Role::WAREHOUSE_MANAGER),
        ])
        .unwrap();
        let req = chain.resolve(MIS, 500).unwrap();
        assert_eq!(req.required_role, Role::WAREHOUSE_MANAGER);
        assert_eq!(req.chain_level, 2);
    }

    #[test]
    fn missing_tiers_fail_closed() {
        let chain = ApprovalChain::standard();
        assert!(matches!(
            chain.resolve(DocumentType::GoodsReceipt, 1),
            Err(DomainError::NotFound(_))
        ));
    }

    #[test]
    fn rejects_gaps_overlaps_and_bad_start() {
        assert!(ApprovalChain::new([ApprovalTier::new(MIS, 5, None, Role::DIRECTOR)]).is_err());
        assert!(
            ApprovalChain::new([
                ApprovalTier::new(MIS, 0, Some(10), Role::WAREHOUSE_SUPERVISOR),
                ApprovalTier::new(MIS, 12, None, Role::DIRECTOR),
            ])
            .is_err()
        );
        assert!(
            ApprovalChain::new([
                ApprovalTier::new(MIS, 0, None, Role::WAREHOUSE_SUPERVISOR),
                ApprovalTier::new(MIS, 10, None, Role::DIRECTOR),
            ])
            .is_err()
        );
        assert!(ApprovalChain::new([ApprovalTier::new(MIS, 0, Some(0), Role::DIRECTOR)]).is_err());
    }

    #[test]
    fn unordered_input_is_sorted() {
        let chain = ApprovalChain::new([
            ApprovalTier::new(MIS, 10, None, Role::DIRECTOR),
            ApprovalTier::new(MIS, 0, Some(10), Role::WAREHOUSE_SUPERVISOR),
        ])
        .unwrap();
        assert_eq!(chain.tiers(MIS)[0].min_amount, 0);
    }

    #[test]
    fn requirement_checks_role_rank() {
        let chain = ApprovalChain::standard();
        let hierarchy = RoleHierarchy::default();
        let req = chain.resolve(MIS, 2_000_000).unwrap();
        assert!(req.is_satisfied_by(&hierarchy, &Role::DIRECTOR));
        assert!(req.is_satisfied_by(&hierarchy, &Role::FINANCE_MANAGER));
        assert!(!req.is_satisfied_by(&hierarchy, &Role::WAREHOUSE_MANAGER));
    }

    #[test]
    fn standard_chain_is_valid() {
        let chain = ApprovalChain::standard();
        let rebuilt = ApprovalChain::new(chain.all_tiers().cloned()).unwrap();
        assert_eq!(rebuilt, chain);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 512,
                ..ProptestConfig::default()
            })]

            /// Property: resolve is monotonic in amount, for any valid chain.
            #[test]
            fn resolve_is_monotonic(
                widths in prop::collection::vec(1u64..1_000_000, 1..6),
                open_top in any::<bool>(),
                a in any::<u64>(),
                b in any::<u64>(),
            ) {
                let mut tiers = Vec::new();
                let mut min = 0u64;
                for (i, w) in widths.iter().enumerate() {
                    let last = i + 1 == widths.len();
                    let max = if last && open_top { None } else { Some(min + w) };
                    tiers.push(ApprovalTier::new(MIS, min, max, Role::new(format!("level_{i}"))));
                    min += w;
                }
                let chain = ApprovalChain::new(tiers).unwrap();

                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                let lo_level = chain.resolve(MIS, lo).unwrap().chain_level;
                let hi_level = chain.resolve(MIS, hi).unwrap().chain_level;
                prop_assert!(lo_level <= hi_level);
            }

            /// Property: the standard chain never demands a lower rank for a larger amount.
            #[test]
            fn standard_rank_is_monotonic(a in 0u64..10_000_000, b in 0u64..10_000_000) {
                let chain = ApprovalChain::standard();
                let hierarchy = RoleHierarchy::default();
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                let lo_rank = hierarchy.rank(&chain.resolve(MIS, lo).unwrap().required_role);
                let hi_rank = hierarchy.rank(&chain.resolve(MIS, hi).unwrap().required_role);
                prop_assert!(lo_rank <= hi_rank);
            }
        }
    }
}
