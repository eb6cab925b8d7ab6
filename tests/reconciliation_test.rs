//! Reconciliation scenarios against the in-memory storage gateway.
//!
//! These exercise the planning and persistence halves of the engine, which
//! are deliberately browser-free. No portal or Chrome instance is needed.

use itax_extractor::models::{
    Company, ListingRow, PeriodDetailRecord, PeriodKey, SectionOutcome, RETURN_PERIOD_HEADER,
};
use itax_extractor::storage::{MemoryStorage, StorageGateway};
use itax_extractor::workflow::{DetailOutcome, PlanReason, ReconciliationEngine, TargetPeriods};
use itax_extractor::Config;
use std::collections::BTreeMap;
use std::sync::Arc;

fn company() -> Company {
    Company {
        id: "c-001".to_string(),
        name: "Acme Traders Ltd".to_string(),
        tax_pin: "P051234567X".to_string(),
        credential: "secret".to_string(),
        is_vat_registered: true,
        is_withholding_agent: false,
    }
}

fn listing_row(label: &str) -> ListingRow {
    let mut values = BTreeMap::new();
    values.insert(RETURN_PERIOD_HEADER.to_string(), label.to_string());
    values.insert("Obligation".to_string(), "Value Added Tax".to_string());
    ListingRow { values }
}

fn engine(storage: &Arc<MemoryStorage>, config: &Config) -> ReconciliationEngine {
    ReconciliationEngine::new(storage.clone(), config)
}

async fn store_nil_detail(storage: &MemoryStorage, company: &Company, key: PeriodKey) {
    let record = PeriodDetailRecord::nil_return(
        &company.id,
        &company.tax_pin,
        key,
        format!("01/{:02}/{}", key.month, key.year),
    );
    storage.upsert_detail(&record).await.unwrap();
}

#[tokio::test]
async fn empty_store_plans_full_fetch() {
    let storage = Arc::new(MemoryStorage::new());
    let plan = engine(&storage, &Config::default())
        .plan_extraction(&company())
        .await
        .unwrap();

    assert!(!plan.skip);
    assert_eq!(plan.reason, PlanReason::NoListing);
    assert_eq!(plan.periods, TargetPeriods::All);
}

#[tokio::test]
async fn listing_without_details_plans_full_fetch() {
    let storage = Arc::new(MemoryStorage::new());
    let company = company();
    storage
        .upsert_listing(&company.id, vec![listing_row("01/01/2024")])
        .await
        .unwrap();

    let plan = engine(&storage, &Config::default())
        .plan_extraction(&company)
        .await
        .unwrap();

    assert!(!plan.skip);
    assert_eq!(plan.reason, PlanReason::NoDetails);
    assert_eq!(plan.periods, TargetPeriods::All);
}

#[tokio::test]
async fn fully_stored_company_is_skipped_without_login() {
    let storage = Arc::new(MemoryStorage::new());
    let company = company();
    storage
        .upsert_listing(
            &company.id,
            vec![listing_row("01/01/2024"), listing_row("01/02/2024")],
        )
        .await
        .unwrap();
    store_nil_detail(&storage, &company, PeriodKey::new(1, 2024)).await;
    store_nil_detail(&storage, &company, PeriodKey::new(2, 2024)).await;

    let plan = engine(&storage, &Config::default())
        .plan_extraction(&company)
        .await
        .unwrap();

    assert!(plan.skip);
    assert_eq!(plan.reason, PlanReason::AllPeriodsComplete);
}

#[tokio::test]
async fn partially_stored_company_targets_only_missing_periods() {
    let storage = Arc::new(MemoryStorage::new());
    let company = company();
    storage
        .upsert_listing(
            &company.id,
            vec![listing_row("01/01/2024"), listing_row("01/02/2024")],
        )
        .await
        .unwrap();
    store_nil_detail(&storage, &company, PeriodKey::new(1, 2024)).await;

    let plan = engine(&storage, &Config::default())
        .plan_extraction(&company)
        .await
        .unwrap();

    assert!(!plan.skip);
    assert_eq!(plan.reason, PlanReason::Partial);
    match &plan.periods {
        TargetPeriods::Subset(set) => {
            assert_eq!(set.len(), 1);
            assert!(set.contains(&PeriodKey::new(2, 2024)));
        }
        TargetPeriods::All => panic!("expected a subset plan"),
    }
    assert!(plan.targets(PeriodKey::new(2, 2024)));
    assert!(!plan.targets(PeriodKey::new(1, 2024)));
}

#[tokio::test]
async fn force_update_plans_full_fetch_regardless_of_store() {
    let storage = Arc::new(MemoryStorage::new());
    let company = company();
    storage
        .upsert_listing(&company.id, vec![listing_row("01/01/2024")])
        .await
        .unwrap();
    store_nil_detail(&storage, &company, PeriodKey::new(1, 2024)).await;

    let config = Config {
        force_update: true,
        ..Config::default()
    };
    let plan = engine(&storage, &config)
        .plan_extraction(&company)
        .await
        .unwrap();

    assert!(!plan.skip);
    assert_eq!(plan.reason, PlanReason::ForceUpdate);
    assert_eq!(plan.periods, TargetPeriods::All);
}

#[tokio::test]
async fn unparsable_listing_dates_do_not_force_refetch() {
    let storage = Arc::new(MemoryStorage::new());
    let company = company();
    storage
        .upsert_listing(
            &company.id,
            vec![listing_row("01/01/2024"), listing_row("not a date")],
        )
        .await
        .unwrap();
    store_nil_detail(&storage, &company, PeriodKey::new(1, 2024)).await;

    let plan = engine(&storage, &Config::default())
        .plan_extraction(&company)
        .await
        .unwrap();

    // The malformed row is treated as satisfied, otherwise the company
    // would log in on every run forever.
    assert!(plan.skip);
    assert_eq!(plan.reason, PlanReason::AllPeriodsComplete);
}

#[tokio::test]
async fn planning_is_idempotent() {
    let storage = Arc::new(MemoryStorage::new());
    let company = company();
    storage
        .upsert_listing(
            &company.id,
            vec![listing_row("01/03/2024"), listing_row("01/04/2024")],
        )
        .await
        .unwrap();
    store_nil_detail(&storage, &company, PeriodKey::new(3, 2024)).await;

    let engine = engine(&storage, &Config::default());
    let first = engine.plan_extraction(&company).await.unwrap();
    let second = engine.plan_extraction(&company).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn error_page_outcome_writes_nothing() {
    let storage = Arc::new(MemoryStorage::new());
    let company = company();
    let key = PeriodKey::new(5, 2024);
    let mut pending = Vec::new();

    let processed = engine(&storage, &Config::default())
        .persist_outcome(&company, key, "01/05/2024", DetailOutcome::ErrorPage, &mut pending)
        .await
        .unwrap();

    assert!(!processed);
    assert!(pending.is_empty());
    assert!(!storage.has_detail(&company.id, key).await.unwrap());
    // The period stays missing, so the next plan still wants it
    storage
        .upsert_listing(&company.id, vec![listing_row("01/05/2024")])
        .await
        .unwrap();
    store_nil_detail(&storage, &company, PeriodKey::new(6, 2024)).await;
    let plan = ReconciliationEngine::new(storage.clone(), &Config::default())
        .plan_extraction(&company)
        .await
        .unwrap();
    assert!(plan.targets(key));
}

#[tokio::test]
async fn nil_return_outcome_persists_marker_record() {
    let storage = Arc::new(MemoryStorage::new());
    let company = company();
    let key = PeriodKey::new(7, 2024);
    let mut pending = Vec::new();

    let processed = engine(&storage, &Config::default())
        .persist_outcome(&company, key, "01/07/2024", DetailOutcome::NilReturn, &mut pending)
        .await
        .unwrap();

    assert!(processed);
    let record = storage.get_detail(&company.id, key).await.unwrap();
    assert!(record.is_nil_return);
    assert_eq!(record.source_date, "01/07/2024");
    assert_eq!(record.sections.len(), 9);
    assert!(record.sections.values().all(|v| v.is_none()));
}

#[tokio::test]
async fn normal_outcome_persists_sections_with_error_isolation() {
    let storage = Arc::new(MemoryStorage::new());
    let company = company();
    let key = PeriodKey::new(8, 2024);

    let mut row = BTreeMap::new();
    row.insert(
        "Taxable Value (Ksh)".to_string(),
        serde_json::json!(120_500.75),
    );
    let mut sections = BTreeMap::new();
    sections.insert("sales".to_string(), SectionOutcome::success(vec![row]));
    sections.insert(
        "purchases".to_string(),
        SectionOutcome::error("table vanished mid-scrape"),
    );

    let mut pending = Vec::new();
    let processed = engine(&storage, &Config::default())
        .persist_outcome(
            &company,
            key,
            "01/08/2024",
            DetailOutcome::Normal(sections),
            &mut pending,
        )
        .await
        .unwrap();

    // One failed section never blocks persistence of the rest
    assert!(processed);
    let record = storage.get_detail(&company.id, key).await.unwrap();
    assert!(!record.is_nil_return);
    let sales = record.sections["sales"].as_ref().unwrap();
    assert_eq!(sales.data.len(), 1);
    let purchases = record.sections["purchases"].as_ref().unwrap();
    assert!(purchases.error.is_some());
}

#[tokio::test]
async fn repeated_persistence_never_duplicates_rows() {
    let storage = Arc::new(MemoryStorage::new());
    let company = company();
    let key = PeriodKey::new(9, 2024);
    let engine = engine(&storage, &Config::default());

    let mut pending = Vec::new();
    for _ in 0..3 {
        engine
            .persist_outcome(&company, key, "01/09/2024", DetailOutcome::NilReturn, &mut pending)
            .await
            .unwrap();
    }

    assert_eq!(storage.detail_count(&company.id).await, 1);
}

#[tokio::test]
async fn deferred_save_buffers_instead_of_writing() {
    let storage = Arc::new(MemoryStorage::new());
    let company = company();
    let key = PeriodKey::new(10, 2024);
    let config = Config {
        immediate_save: false,
        ..Config::default()
    };

    let mut pending = Vec::new();
    let processed = engine(&storage, &config)
        .persist_outcome(&company, key, "01/10/2024", DetailOutcome::NilReturn, &mut pending)
        .await
        .unwrap();

    assert!(processed);
    assert_eq!(pending.len(), 1);
    assert_eq!(storage.detail_count(&company.id).await, 0);
}
