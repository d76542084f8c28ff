//! Document number sequence.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use tracing::instrument;

use wareflow_core::DomainError;
use wareflow_documents::DocumentType;

use crate::config::NumberFormat;
use crate::error::EngineResult;
use crate::store::DocumentStore;

/// Issues human-readable document numbers.
///
/// The integer comes from one atomic increment-or-insert on the
/// `(document_type, year)` counter; formatting happens afterwards and is pure.
/// A number is consumed even if the document it was drawn for is never
/// persisted, so sequences can have gaps but never repeat.
pub struct DocumentCounter {
    store: Arc<dyn DocumentStore>,
    formats: BTreeMap<DocumentType, NumberFormat>,
}

impl DocumentCounter {
    pub fn new(store: Arc<dyn DocumentStore>, formats: BTreeMap<DocumentType, NumberFormat>) -> Self {
        Self { store, formats }
    }

    pub async fn next(&self, document_type: DocumentType) -> EngineResult<String> {
        self.next_at(document_type, Utc::now()).await
    }

    #[instrument(skip(self, now), fields(document_type = %document_type), err)]
    pub async fn next_at(&self, document_type: DocumentType, now: DateTime<Utc>) -> EngineResult<String> {
        let format = self.formats.get(&document_type).ok_or_else(|| {
            DomainError::not_found(format!("number format for {document_type}"))
        })?;
        let year = now.year();
        let sequence = self.store.next_sequence(document_type, year).await?;
        Ok(format.render(year, sequence))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::TimeZone;

    use super::*;
    use crate::config::EngineConfig;
    use crate::store::InMemoryStore;

    fn counter() -> Arc<DocumentCounter> {
        Arc::new(DocumentCounter::new(
            Arc::new(InMemoryStore::new()),
            EngineConfig::default().numbering,
        ))
    }

    #[tokio::test]
    async fn numbers_restart_each_year() {
        let counter = counter();
        let dec = Utc.with_ymd_and_hms(2025, 12, 31, 23, 0, 0).unwrap();
        let jan = Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap();

        assert_eq!(counter.next_at(DocumentType::GoodsReceipt, dec).await.unwrap(), "GRN-2025-0001");
        assert_eq!(counter.next_at(DocumentType::GoodsReceipt, dec).await.unwrap(), "GRN-2025-0002");
        assert_eq!(counter.next_at(DocumentType::GoodsReceipt, jan).await.unwrap(), "GRN-2026-0001");
        assert_eq!(counter.next_at(DocumentType::MaterialIssue, jan).await.unwrap(), "MIS-2026-0001");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_numbers_are_unique_and_increasing() {
        let counter = counter();
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();

        let mut handles = Vec::new();
        for _ in 0..100 {
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                counter.next_at(DocumentType::MaterialIssue, now).await.unwrap()
            }));
        }

        let mut numbers = Vec::new();
        for h in handles {
            numbers.push(h.await.unwrap());
        }
        let unique: HashSet<&String> = numbers.iter().collect();
        assert_eq!(unique.len(), 100);

        let mut sequences: Vec<u64> = numbers
            .iter()
            .map(|n| n.rsplit('-').next().unwrap().parse().unwrap())
            .collect();
        sequences.sort_unstable();
        assert_eq!(sequences, (1..=100).collect::<Vec<u64>>());

        // The next draw is strictly after everything already issued.
        let next = counter.next_at(DocumentType::MaterialIssue, now).await.unwrap();
        assert_eq!(next, "MIS-2026-0101");
    }

    #[tokio::test]
    async fn missing_format_is_not_found() {
        let counter = DocumentCounter::new(Arc::new(InMemoryStore::new()), BTreeMap::new());
        let err = counter.next(DocumentType::GoodsReceipt).await.unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::NotFound(_))));
    }
}
