//! In-memory storage gateway for tests and dry runs

use crate::models::{ListingRow, PeriodDetailRecord, PeriodKey};
use crate::storage::StorageGateway;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Map-backed gateway with the same conflict-key semantics as the real
/// backend.
#[derive(Default)]
pub struct MemoryStorage {
    listings: RwLock<HashMap<String, Vec<ListingRow>>>,
    details: RwLock<HashMap<(String, PeriodKey), PeriodDetailRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored detail rows for a company (test helper).
    pub async fn detail_count(&self, company_id: &str) -> usize {
        self.details
            .read()
            .await
            .keys()
            .filter(|(id, _)| id == company_id)
            .count()
    }

    /// Stored record for one period, if any (test helper).
    pub async fn get_detail(
        &self,
        company_id: &str,
        key: PeriodKey,
    ) -> Option<PeriodDetailRecord> {
        self.details
            .read()
            .await
            .get(&(company_id.to_string(), key))
            .cloned()
    }
}

#[async_trait]
impl StorageGateway for MemoryStorage {
    async fn has_listing(&self, company_id: &str) -> Result<bool> {
        Ok(self.listings.read().await.contains_key(company_id))
    }

    async fn has_any_detail(&self, company_id: &str) -> Result<bool> {
        Ok(self
            .details
            .read()
            .await
            .keys()
            .any(|(id, _)| id == company_id))
    }

    async fn has_detail(&self, company_id: &str, key: PeriodKey) -> Result<bool> {
        Ok(self
            .details
            .read()
            .await
            .contains_key(&(company_id.to_string(), key)))
    }

    async fn get_listing(&self, company_id: &str) -> Result<Option<Vec<ListingRow>>> {
        Ok(self.listings.read().await.get(company_id).cloned())
    }

    async fn upsert_listing(&self, company_id: &str, rows: Vec<ListingRow>) -> Result<()> {
        self.listings
            .write()
            .await
            .insert(company_id.to_string(), rows);
        Ok(())
    }

    async fn upsert_detail(&self, record: &PeriodDetailRecord) -> Result<()> {
        self.details
            .write()
            .await
            .insert((record.company_id.clone(), record.period()), record.clone());
        Ok(())
    }
}
