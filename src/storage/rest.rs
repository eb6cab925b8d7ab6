//! REST storage gateway
//!
//! Talks PostgREST conventions to the hosted relational backend: filter
//! query params for point lookups, `on_conflict` + `Prefer:
//! resolution=merge-duplicates` for upserts. Two tables:
//!
//! - `period_listings`: one snapshot row per company (conflict: company_id)
//! - `period_details`: one row per period (conflict: company_id,year,month)

use crate::config::Config;
use crate::error::{AppError, StorageError};
use crate::models::{ListingRow, PeriodDetailRecord, PeriodKey, PeriodListing};
use crate::storage::StorageGateway;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;

const LISTINGS_TABLE: &str = "period_listings";
const DETAILS_TABLE: &str = "period_details";

pub struct RestStorage {
    client: reqwest::Client,
    base_url: String,
}

impl RestStorage {
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !config.storage_api_key.is_empty() {
            headers.insert(
                "apikey",
                HeaderValue::from_str(&config.storage_api_key)
                    .map_err(|e| AppError::Other(e.to_string()))?,
            );
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", config.storage_api_key))
                    .map_err(|e| AppError::Other(e.to_string()))?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| AppError::storage_request_failed(&config.storage_api_base_url, e))?;

        Ok(Self {
            client,
            base_url: config.storage_api_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Point-lookup existence check: select a single key column with the
    /// given filters and test for a non-empty result set.
    async fn exists(&self, table: &str, filters: &[(String, String)]) -> Result<bool> {
        let endpoint = format!("{}/{}", self.base_url, table);
        let mut query: Vec<(String, String)> = vec![
            ("select".to_string(), "company_id".to_string()),
            ("limit".to_string(), "1".to_string()),
        ];
        query.extend_from_slice(filters);

        let response = self
            .client
            .get(&endpoint)
            .query(&query)
            .send()
            .await
            .map_err(|e| AppError::storage_request_failed(&endpoint, e))?;

        let rows: Vec<Value> = Self::decode(&endpoint, response).await?;
        Ok(!rows.is_empty())
    }

    async fn upsert(&self, table: &str, conflict: &str, body: Value) -> Result<()> {
        let endpoint = format!("{}/{}", self.base_url, table);
        let response = self
            .client
            .post(&endpoint)
            .query(&[("on_conflict", conflict)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::storage_request_failed(&endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Storage(StorageError::BadResponse {
                endpoint,
                status: status.as_u16(),
                body,
            })
            .into());
        }
        Ok(())
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Storage(StorageError::BadResponse {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            })
            .into());
        }
        response.json::<T>().await.map_err(|e| {
            AppError::Storage(StorageError::DecodeFailed {
                endpoint: endpoint.to_string(),
                source: Box::new(e),
            })
            .into()
        })
    }

    fn eq(column: &str, value: impl std::fmt::Display) -> (String, String) {
        (column.to_string(), format!("eq.{}", value))
    }
}

#[async_trait]
impl StorageGateway for RestStorage {
    async fn has_listing(&self, company_id: &str) -> Result<bool> {
        self.exists(LISTINGS_TABLE, &[Self::eq("company_id", company_id)])
            .await
    }

    async fn has_any_detail(&self, company_id: &str) -> Result<bool> {
        self.exists(DETAILS_TABLE, &[Self::eq("company_id", company_id)])
            .await
    }

    async fn has_detail(&self, company_id: &str, key: PeriodKey) -> Result<bool> {
        self.exists(
            DETAILS_TABLE,
            &[
                Self::eq("company_id", company_id),
                Self::eq("year", key.year),
                Self::eq("month", key.month),
            ],
        )
        .await
    }

    async fn get_listing(&self, company_id: &str) -> Result<Option<Vec<ListingRow>>> {
        let endpoint = format!("{}/{}", self.base_url, LISTINGS_TABLE);
        let company_filter = format!("eq.{}", company_id);
        let response = self
            .client
            .get(&endpoint)
            .query(&[
                ("select", "rows"),
                ("company_id", company_filter.as_str()),
                ("limit", "1"),
            ])
            .send()
            .await
            .map_err(|e| AppError::storage_request_failed(&endpoint, e))?;

        let mut records: Vec<Value> = Self::decode(&endpoint, response).await?;
        let Some(record) = records.pop() else {
            return Ok(None);
        };
        let rows: Vec<ListingRow> = serde_json::from_value(record["rows"].clone()).map_err(|e| {
            AppError::Storage(StorageError::DecodeFailed {
                endpoint,
                source: Box::new(e),
            })
        })?;
        Ok(Some(rows))
    }

    async fn upsert_listing(&self, company_id: &str, rows: Vec<ListingRow>) -> Result<()> {
        let snapshot = PeriodListing::new(company_id, rows);
        let body = serde_json::to_value(&snapshot)?;
        self.upsert(LISTINGS_TABLE, "company_id", body).await
    }

    async fn upsert_detail(&self, record: &PeriodDetailRecord) -> Result<()> {
        let body = serde_json::to_value(record)?;
        self.upsert(DETAILS_TABLE, "company_id,year,month", body).await
    }
}
