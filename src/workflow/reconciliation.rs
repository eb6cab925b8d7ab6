//! Reconciliation engine - workflow layer
//!
//! The heart of the system. Decides, per company, which reporting periods
//! actually need a trip to the portal, drives the navigator over exactly
//! those, and persists results with upsert-on-conflict semantics.
//!
//! Two rules carry the whole incremental model:
//!
//! 1. A stored detail row for (company, month, year) is the only signal
//!    that a period is done. Nothing else is consulted.
//! 2. A portal error page never produces a stored row, so the period stays
//!    "missing" and the next run picks it up again.

use crate::config::Config;
use crate::infrastructure::PageDriver;
use crate::models::{
    Company, DetailClassification, PeriodDetailRecord, PeriodKey, SectionOutcome,
};
use crate::services::navigator::PortalNavigator;
use crate::services::report_writer::ReportWriter;
use crate::storage::StorageGateway;
use anyhow::Result;
use chromiumoxide::Browser;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Why a plan decided what it decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanReason {
    /// Force-update flag set; everything is re-scraped
    ForceUpdate,
    /// No listing snapshot stored yet; must log in to discover periods
    NoListing,
    /// Listing exists but not a single detail row does
    NoDetails,
    /// Some periods are stored, some are missing
    Partial,
    /// Every parsable listed period already has a detail row
    AllPeriodsComplete,
}

impl fmt::Display for PlanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanReason::ForceUpdate => "force_update",
            PlanReason::NoListing => "no_listing",
            PlanReason::NoDetails => "no_details",
            PlanReason::Partial => "partial",
            PlanReason::AllPeriodsComplete => "all_periods_complete",
        };
        f.write_str(s)
    }
}

/// Which periods a plan targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetPeriods {
    /// Sentinel: every row in the fresh listing
    All,
    Subset(HashSet<PeriodKey>),
}

/// Output of `plan_extraction`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plan {
    pub skip: bool,
    pub reason: PlanReason,
    pub periods: TargetPeriods,
}

impl Plan {
    fn fetch_all(reason: PlanReason) -> Self {
        Self {
            skip: false,
            reason,
            periods: TargetPeriods::All,
        }
    }

    fn partial(missing: HashSet<PeriodKey>) -> Self {
        Self {
            skip: false,
            reason: PlanReason::Partial,
            periods: TargetPeriods::Subset(missing),
        }
    }

    fn complete() -> Self {
        Self {
            skip: true,
            reason: PlanReason::AllPeriodsComplete,
            periods: TargetPeriods::Subset(HashSet::new()),
        }
    }

    /// Does this plan want the given period fetched?
    pub fn targets(&self, key: PeriodKey) -> bool {
        match &self.periods {
            TargetPeriods::All => true,
            TargetPeriods::Subset(set) => set.contains(&key),
        }
    }
}

/// Per-company counters from `execute_plan`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Periods opened, classified and persisted (or nil-marked)
    pub periods_processed: usize,
    /// Rows passed over: out of window, not targeted, already stored, or
    /// unparsable date
    pub periods_skipped: usize,
    /// Targeted rows that never completed: row-level error, missing view
    /// action, or a portal error page
    pub periods_unprocessed: usize,
}

/// Classified result of one opened detail view.
#[derive(Clone, Debug)]
pub enum DetailOutcome {
    /// The portal's own error page; must not be persisted
    ErrorPage,
    /// Filed as nil; persisted as a marker row
    NilReturn,
    /// Regular return with per-section outcomes
    Normal(BTreeMap<String, SectionOutcome>),
}

pub struct ReconciliationEngine {
    storage: Arc<dyn StorageGateway>,
    config: Config,
    report: Option<Arc<ReportWriter>>,
}

impl ReconciliationEngine {
    pub fn new(storage: Arc<dyn StorageGateway>, config: &Config) -> Self {
        Self {
            storage,
            config: config.clone(),
            report: None,
        }
    }

    pub fn with_report(mut self, report: Arc<ReportWriter>) -> Self {
        self.report = Some(report);
        self
    }

    /// Decide the minimal set of periods to fetch for one company without
    /// touching the browser.
    ///
    /// Listing rows whose date label does not parse are left out of the
    /// missing set, i.e. treated as satisfied. Deliberate policy: a single
    /// malformed row must not force a login on every run.
    pub async fn plan_extraction(&self, company: &Company) -> Result<Plan> {
        if self.config.force_update {
            return Ok(Plan::fetch_all(PlanReason::ForceUpdate));
        }
        if !self.storage.has_listing(&company.id).await? {
            return Ok(Plan::fetch_all(PlanReason::NoListing));
        }
        if !self.storage.has_any_detail(&company.id).await? {
            return Ok(Plan::fetch_all(PlanReason::NoDetails));
        }

        let rows = self
            .storage
            .get_listing(&company.id)
            .await?
            .unwrap_or_default();
        let keys: BTreeSet<PeriodKey> = rows.iter().filter_map(|row| row.period()).collect();

        // Independent point lookups; fire them all at once
        let checks = keys.into_iter().map(|key| {
            let storage = Arc::clone(&self.storage);
            let company_id = company.id.clone();
            async move {
                let exists = storage.has_detail(&company_id, key).await?;
                Ok::<_, anyhow::Error>((key, exists))
            }
        });
        let results = futures::future::try_join_all(checks).await?;

        let missing: HashSet<PeriodKey> = results
            .into_iter()
            .filter(|(_, exists)| !exists)
            .map(|(key, _)| key)
            .collect();

        if missing.is_empty() {
            Ok(Plan::complete())
        } else {
            Ok(Plan::partial(missing))
        }
    }

    /// Drive the authenticated page through the plan.
    ///
    /// The fresh listing is always re-scraped so the snapshot stays current;
    /// each targeted period then runs the detail state machine. A failure in
    /// one period is logged and the loop moves on; a single bad row never
    /// costs the company.
    pub async fn execute_plan(
        &self,
        browser: &Browser,
        driver: &PageDriver,
        plan: &Plan,
        company: &Company,
        company_index: usize,
    ) -> Result<ExecutionResult> {
        let navigator = PortalNavigator::new(driver);
        let rows = navigator.open_returns_listing().await?;
        info!(
            "[company {}] listing re-extracted: {} rows",
            company_index,
            rows.len()
        );

        self.refresh_listing(company, rows.clone(), company_index)
            .await?;

        let mut result = ExecutionResult::default();
        let mut pending: Vec<PeriodDetailRecord> = Vec::new();

        for (row_index, row) in rows.iter().enumerate() {
            let label = row.period_label().unwrap_or_default().to_string();
            let Some(key) = row.period() else {
                warn!(
                    "[company {}] row {} period label {:?} did not parse, skipping",
                    company_index, row_index, label
                );
                result.periods_skipped += 1;
                continue;
            };

            if !self.config.year_in_window(key.year) {
                debug!("[company {}] {} outside window", company_index, key);
                result.periods_skipped += 1;
                continue;
            }
            if !plan.targets(key) {
                debug!("[company {}] {} not targeted", company_index, key);
                result.periods_skipped += 1;
                continue;
            }
            if !self.config.force_update
                && self.config.skip_existing_details
                && self.storage.has_detail(&company.id, key).await?
            {
                debug!("[company {}] {} already stored", company_index, key);
                result.periods_skipped += 1;
                continue;
            }
            if !navigator.has_view_action(row_index).await? {
                warn!(
                    "[company {}] {} has no view action, cannot open",
                    company_index, key
                );
                result.periods_unprocessed += 1;
                continue;
            }

            match self
                .process_period(
                    browser,
                    &navigator,
                    row_index,
                    key,
                    &label,
                    company,
                    company_index,
                    &mut pending,
                )
                .await
            {
                Ok(true) => result.periods_processed += 1,
                Ok(false) => result.periods_unprocessed += 1,
                Err(e) => {
                    error!(
                        "[company {}] period {} failed: {}",
                        company_index, key, e
                    );
                    result.periods_unprocessed += 1;
                }
            }
        }

        if !self.config.immediate_save {
            for record in pending.drain(..) {
                self.storage.upsert_detail(&record).await?;
            }
        }

        if result.periods_unprocessed > 0 {
            warn!(
                "[company {}] ⚠️ {} targeted periods left unprocessed this run",
                company_index, result.periods_unprocessed
            );
        }

        Ok(result)
    }

    /// Replace the stored listing snapshot, honoring the skip-if-exists
    /// policy unless force-update is on.
    async fn refresh_listing(
        &self,
        company: &Company,
        rows: Vec<crate::models::ListingRow>,
        company_index: usize,
    ) -> Result<()> {
        let keep_existing = !self.config.force_update
            && self.config.skip_existing_listings
            && self.storage.has_listing(&company.id).await?;
        if keep_existing {
            debug!(
                "[company {}] existing listing snapshot kept",
                company_index
            );
            return Ok(());
        }
        self.storage.upsert_listing(&company.id, rows).await?;
        info!("[company {}] ✓ listing snapshot saved", company_index);
        Ok(())
    }

    /// One period's detail state machine:
    /// OPEN → classify → (error: drop | nil: marker | normal: sections) → CLOSE.
    /// CLOSE is reached on every path, including errors mid-extraction.
    #[allow(clippy::too_many_arguments)]
    async fn process_period(
        &self,
        browser: &Browser,
        navigator: &PortalNavigator<'_>,
        row_index: usize,
        key: PeriodKey,
        source_date: &str,
        company: &Company,
        company_index: usize,
        pending: &mut Vec<PeriodDetailRecord>,
    ) -> Result<bool> {
        info!("[company {}] opening detail for {}", company_index, key);
        let detail = navigator.open_period_detail(browser, row_index).await?;

        let outcome = self
            .run_detail(navigator, &detail, key, company_index)
            .await;
        navigator.close_detail(detail).await;
        let outcome = outcome?;

        self.persist_outcome(company, key, source_date, outcome, pending)
            .await
    }

    async fn run_detail(
        &self,
        navigator: &PortalNavigator<'_>,
        detail: &PageDriver,
        key: PeriodKey,
        company_index: usize,
    ) -> Result<DetailOutcome> {
        match navigator.classify_detail(detail).await? {
            DetailClassification::ErrorPage => {
                warn!(
                    "[company {}] portal error page for {}, period stays missing for the next run",
                    company_index, key
                );
                Ok(DetailOutcome::ErrorPage)
            }
            DetailClassification::NilReturn => {
                info!("[company {}] {} filed as nil return", company_index, key);
                Ok(DetailOutcome::NilReturn)
            }
            DetailClassification::Normal => {
                navigator.set_max_page_size(detail).await?;
                let sections = navigator.extract_sections(detail).await;
                Ok(DetailOutcome::Normal(sections))
            }
        }
    }

    /// Turn a classified outcome into storage writes.
    ///
    /// Returns whether the period now counts as processed. An error page
    /// writes nothing at all so the period stays missing for the next run.
    pub async fn persist_outcome(
        &self,
        company: &Company,
        key: PeriodKey,
        source_date: &str,
        outcome: DetailOutcome,
        pending: &mut Vec<PeriodDetailRecord>,
    ) -> Result<bool> {
        let record = match outcome {
            DetailOutcome::ErrorPage => return Ok(false),
            DetailOutcome::NilReturn => {
                PeriodDetailRecord::nil_return(&company.id, &company.tax_pin, key, source_date)
            }
            DetailOutcome::Normal(sections) => PeriodDetailRecord::normal(
                &company.id,
                &company.tax_pin,
                key,
                source_date,
                sections,
            ),
        };

        if self.config.export_csv {
            if let Some(report) = &self.report {
                if let Err(e) = report.export_period_csv(&record) {
                    warn!("CSV export for {} failed: {}", key, e);
                }
            }
        }

        if self.config.immediate_save {
            self.storage.upsert_detail(&record).await?;
            debug!("period {} persisted", key);
        } else {
            pending.push(record);
        }
        Ok(true)
    }
}
