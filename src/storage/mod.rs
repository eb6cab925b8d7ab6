//! Storage gateway
//!
//! The reconciliation engine never talks to a concrete backend. It sees this
//! trait; the REST implementation targets the hosted relational backend, the
//! in-memory one backs tests and dry runs. Both resolve write conflicts at
//! the key level, so concurrent upserts for different periods are safe
//! without client-side locking.

pub mod memory;
pub mod rest;

use crate::models::{ListingRow, PeriodDetailRecord, PeriodKey};
use anyhow::Result;
use async_trait::async_trait;

pub use memory::MemoryStorage;
pub use rest::RestStorage;

#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Is there a listing snapshot for this company?
    async fn has_listing(&self, company_id: &str) -> Result<bool>;

    /// Does this company have at least one detail row?
    async fn has_any_detail(&self, company_id: &str) -> Result<bool>;

    /// Does a detail row exist for this exact period?
    async fn has_detail(&self, company_id: &str, key: PeriodKey) -> Result<bool>;

    /// Stored listing rows, in their captured table order.
    async fn get_listing(&self, company_id: &str) -> Result<Option<Vec<ListingRow>>>;

    /// Replace the company's listing snapshot. Conflict key: company_id.
    async fn upsert_listing(&self, company_id: &str, rows: Vec<ListingRow>) -> Result<()>;

    /// Insert or replace one period's record.
    /// Conflict key: (company_id, year, month).
    async fn upsert_detail(&self, record: &PeriodDetailRecord) -> Result<()>;
}
