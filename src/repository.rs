//! Storage contract and implementations (§6.1). A small explicit trait
//! (Design Notes §9) rather than a generic DAO; `PgRepository` is the
//! production backend, `InMemoryRepository` a hand-written test double.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::{DailyReport, PriceObservation, PriceStats, Property};
use crate::error::RepositoryError;

#[async_trait]
pub trait Repository: Send + Sync {
    /// Fails with [`RepositoryError::AlreadyExists`] when `property_id` is
    /// already present; callers that only want idempotent upsert semantics
    /// should call [`Repository::upsert`] instead.
    async fn create(&self, property: Property) -> Result<String, RepositoryError>;
    async fn upsert(&self, property: Property) -> anyhow::Result<String>;
    async fn get_by_id(&self, property_id: &str) -> anyhow::Result<Option<Property>>;
    async fn search_by_zipcode(
        &self,
        zipcode: &str,
        limit: usize,
        include_inactive: bool,
    ) -> anyhow::Result<Vec<Property>>;
    async fn recent_updates(&self, hours: i64, limit: usize) -> anyhow::Result<Vec<Property>>;
    async fn append_price(&self, property_id: &str, observation: PriceObservation) -> anyhow::Result<bool>;
    async fn price_stats(&self, zipcode: Option<&str>) -> anyhow::Result<PriceStats>;
    async fn upsert_daily_report(&self, report: &DailyReport) -> anyhow::Result<()>;
}

/// sqlx/Postgres-backed store. Properties are kept as one JSONB document
/// per `property_id` (the aggregate has no natural relational shape
/// worth normalizing at this scale); `zipcode` and `updated_at` are
/// projected into real columns so the common read paths can use an index.
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert_inner(&self, property: &Property) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO properties (property_id, zipcode, updated_at, document)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (property_id) DO UPDATE SET
                zipcode = EXCLUDED.zipcode,
                updated_at = EXCLUDED.updated_at,
                document = EXCLUDED.document
            "#,
        )
        .bind(&property.property_id)
        .bind(&property.address.zipcode)
        .bind(property.last_updated)
        .bind(Json(property))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn create(&self, property: Property) -> Result<String, RepositoryError> {
        if self.get_by_id(&property.property_id).await.map_err(RepositoryError::Backend)?.is_some() {
            return Err(RepositoryError::AlreadyExists(property.property_id));
        }
        self.upsert_inner(&property).await.map_err(RepositoryError::Backend)?;
        Ok(property.property_id)
    }

    async fn upsert(&self, property: Property) -> anyhow::Result<String> {
        self.upsert_inner(&property).await?;
        Ok(property.property_id)
    }

    async fn get_by_id(&self, property_id: &str) -> anyhow::Result<Option<Property>> {
        let row: Option<(Json<Property>,)> =
            sqlx::query_as("SELECT document FROM properties WHERE property_id = $1")
                .bind(property_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(Json(property),)| property))
    }

    async fn search_by_zipcode(
        &self,
        zipcode: &str,
        limit: usize,
        include_inactive: bool,
    ) -> anyhow::Result<Vec<Property>> {
        let rows: Vec<(Json<Property>,)> = sqlx::query_as(
            r#"
            SELECT document FROM properties
            WHERE zipcode = $1
              AND ($2 OR (document->>'is_active')::boolean)
            ORDER BY updated_at DESC
            LIMIT $3
            "#,
        )
        .bind(zipcode)
        .bind(include_inactive)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(Json(property),)| property).collect())
    }

    async fn recent_updates(&self, hours: i64, limit: usize) -> anyhow::Result<Vec<Property>> {
        let since = Utc::now() - chrono::Duration::hours(hours);
        let rows: Vec<(Json<Property>,)> = sqlx::query_as(
            "SELECT document FROM properties WHERE updated_at >= $1 ORDER BY updated_at DESC LIMIT $2",
        )
        .bind(since)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(Json(property),)| property).collect())
    }

    async fn append_price(&self, property_id: &str, observation: PriceObservation) -> anyhow::Result<bool> {
        let Some(mut property) = self.get_by_id(property_id).await? else {
            return Ok(false);
        };
        property.record_price(observation);
        self.upsert_inner(&property).await?;
        Ok(true)
    }

    async fn price_stats(&self, zipcode: Option<&str>) -> anyhow::Result<PriceStats> {
        let rows: Vec<(Option<f64>,)> = if let Some(zip) = zipcode {
            sqlx::query_as("SELECT (document->>'current_price')::float8 FROM properties WHERE zipcode = $1")
                .bind(zip)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query_as("SELECT (document->>'current_price')::float8 FROM properties")
                .fetch_all(&self.pool)
                .await?
        };
        let amounts: Vec<f64> = rows.into_iter().filter_map(|(v,)| v).collect();
        Ok(PriceStats::from_amounts(&amounts))
    }

    async fn upsert_daily_report(&self, report: &DailyReport) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_reports (report_date, document)
            VALUES ($1, $2)
            ON CONFLICT (report_date) DO UPDATE SET document = EXCLUDED.document
            "#,
        )
        .bind(report.date)
        .bind(Json(report))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Hand-written mock used by pipeline/orchestrator tests, holding
/// properties keyed by `property_id` behind a `Mutex` (Design Notes §9:
/// explicit handles, no process-wide singleton).
#[derive(Default)]
pub struct InMemoryRepository {
    properties: Mutex<HashMap<String, Property>>,
    reports: Mutex<HashMap<NaiveDate, DailyReport>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.properties.lock().expect("lock not poisoned").len()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn create(&self, property: Property) -> Result<String, RepositoryError> {
        let mut guard = self.properties.lock().expect("lock not poisoned");
        if guard.contains_key(&property.property_id) {
            return Err(RepositoryError::AlreadyExists(property.property_id));
        }
        let id = property.property_id.clone();
        guard.insert(id.clone(), property);
        Ok(id)
    }

    async fn upsert(&self, property: Property) -> anyhow::Result<String> {
        let id = property.property_id.clone();
        self.properties
            .lock()
            .expect("lock not poisoned")
            .insert(id.clone(), property);
        Ok(id)
    }

    async fn get_by_id(&self, property_id: &str) -> anyhow::Result<Option<Property>> {
        Ok(self.properties.lock().expect("lock not poisoned").get(property_id).cloned())
    }

    async fn search_by_zipcode(
        &self,
        zipcode: &str,
        limit: usize,
        include_inactive: bool,
    ) -> anyhow::Result<Vec<Property>> {
        let mut found: Vec<Property> = self
            .properties
            .lock()
            .expect("lock not poisoned")
            .values()
            .filter(|p| p.address.zipcode == zipcode && (include_inactive || p.is_active))
            .cloned()
            .collect();
        found.sort_by_key(|p| std::cmp::Reverse(p.last_updated));
        found.truncate(limit);
        Ok(found)
    }

    async fn recent_updates(&self, hours: i64, limit: usize) -> anyhow::Result<Vec<Property>> {
        let since = Utc::now() - chrono::Duration::hours(hours);
        let mut found: Vec<Property> = self
            .properties
            .lock()
            .expect("lock not poisoned")
            .values()
            .filter(|p| p.last_updated >= since)
            .cloned()
            .collect();
        found.sort_by_key(|p| std::cmp::Reverse(p.last_updated));
        found.truncate(limit);
        Ok(found)
    }

    async fn append_price(&self, property_id: &str, observation: PriceObservation) -> anyhow::Result<bool> {
        let mut guard = self.properties.lock().expect("lock not poisoned");
        let Some(property) = guard.get_mut(property_id) else {
            return Ok(false);
        };
        property.record_price(observation);
        Ok(true)
    }

    async fn price_stats(&self, zipcode: Option<&str>) -> anyhow::Result<PriceStats> {
        let guard = self.properties.lock().expect("lock not poisoned");
        let amounts: Vec<f64> = guard
            .values()
            .filter(|p| zipcode.map_or(true, |z| p.address.zipcode == z))
            .filter_map(|p| p.current_price)
            .collect();
        Ok(PriceStats::from_amounts(&amounts))
    }

    async fn upsert_daily_report(&self, report: &DailyReport) -> anyhow::Result<()> {
        self.reports
            .lock()
            .expect("lock not poisoned")
            .insert(report.date, report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::address::PropertyAddress;
    use crate::domain::price::PriceType;
    use crate::domain::property::PropertyType;
    use crate::domain::raw_record::Source;

    fn property(street: &str, zip: &str) -> Property {
        Property::new(PropertyAddress::new(street, zip), PropertyType::SingleFamily)
    }

    #[tokio::test]
    async fn upsert_then_get_by_id_round_trips() {
        let repo = InMemoryRepository::new();
        let property = property("123 Main St", "85031");
        let id = property.property_id.clone();
        repo.upsert(property).await.unwrap();
        let fetched = repo.get_by_id(&id).await.unwrap().expect("present");
        assert_eq!(fetched.address.zipcode, "85031");
    }

    #[tokio::test]
    async fn create_rejects_a_duplicate_property_id() {
        let repo = InMemoryRepository::new();
        let property = property("123 Main St", "85031");
        repo.create(property.clone()).await.unwrap();
        let err = repo.create(property).await.unwrap_err();
        assert!(matches!(err, RepositoryError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn search_by_zipcode_filters_correctly() {
        let repo = InMemoryRepository::new();
        repo.upsert(property("123 Main St", "85031")).await.unwrap();
        repo.upsert(property("456 Oak Ave", "85032")).await.unwrap();
        let found = repo.search_by_zipcode("85031", 10, false).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].address.zipcode, "85031");
    }

    #[tokio::test]
    async fn search_by_zipcode_excludes_inactive_unless_requested() {
        let repo = InMemoryRepository::new();
        let mut inactive = property("123 Main St", "85031");
        inactive.is_active = false;
        repo.upsert(inactive).await.unwrap();
        assert!(repo.search_by_zipcode("85031", 10, false).await.unwrap().is_empty());
        assert_eq!(repo.search_by_zipcode("85031", 10, true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn append_price_updates_current_price() {
        let repo = InMemoryRepository::new();
        let property = property("123 Main St", "85031");
        let id = property.property_id.clone();
        repo.upsert(property).await.unwrap();
        let ok = repo
            .append_price(
                &id,
                PriceObservation {
                    amount: 310_000.0,
                    date: Utc::now(),
                    price_type: PriceType::Listing,
                    source: Source::MlsScrape,
                    confidence: 0.8,
                },
            )
            .await
            .unwrap();
        assert!(ok);
        let fetched = repo.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(fetched.current_price, Some(310_000.0));
    }

    #[tokio::test]
    async fn price_stats_ignores_properties_without_a_current_price() {
        let repo = InMemoryRepository::new();
        repo.upsert(property("123 Main St", "85031")).await.unwrap();
        let stats = repo.price_stats(None).await.unwrap();
        assert_eq!(stats.count, 0);
    }
}
