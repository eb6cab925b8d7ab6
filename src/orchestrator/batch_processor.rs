//! Batch processor - orchestration layer
//!
//! Entry point of the application. Owns the browser connection and the
//! storage gateway, loads the roster, and drives companies through the
//! reconciliation pipeline either sequentially or in fixed-size concurrent
//! batches with a pause in between. Per-company failures are retried with a
//! typed-error-aware delay and accumulated; the batch itself keeps going
//! unless configured to stop on the first terminal failure.

use crate::browser;
use crate::config::Config;
use crate::error::AppError;
use crate::models::{load_roster, Company};
use crate::orchestrator::company_processor::{self, CompanyOutcome};
use crate::services::report_writer::ReportWriter;
use crate::storage::{RestStorage, StorageGateway};
use crate::utils::logging;
use crate::workflow::CompanyCtx;
use anyhow::Result;
use chromiumoxide::Browser;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// One terminal company failure in the run summary.
#[derive(Clone, Debug, Serialize)]
pub struct CompanyFailure {
    pub company: String,
    pub tax_pin: String,
    pub error: String,
    pub attempts: u32,
}

/// Aggregate counters for the whole run; also the shape of `summary.json`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunSummary {
    pub started_at: String,
    pub finished_at: String,
    pub total: usize,
    pub successful: usize,
    pub skipped: usize,
    pub failed: usize,
    pub periods_processed: usize,
    pub periods_skipped: usize,
    pub periods_unprocessed: usize,
    pub errors: Vec<CompanyFailure>,
}

/// Application root
pub struct App {
    config: Config,
    browser: Arc<Browser>,
    storage: Arc<dyn StorageGateway>,
    report: Arc<ReportWriter>,
}

impl App {
    pub async fn initialize(config: Config) -> Result<Self> {
        logging::init_log_file(&config.output_log_file)?;
        log_startup(&config);

        let browser = Arc::new(browser::connect_to_browser(config.browser_debug_port).await?);
        let storage: Arc<dyn StorageGateway> = Arc::new(RestStorage::new(&config)?);
        let report = Arc::new(ReportWriter::new(&config)?);

        Ok(Self {
            config,
            browser,
            storage,
            report,
        })
    }

    /// Run the whole roster and emit the final summary.
    ///
    /// The process exits 0 even with partial company failures; the summary
    /// is the machine-readable verdict.
    pub async fn run(&self) -> Result<()> {
        let companies = load_roster(&self.config.roster_file).await?;
        if companies.is_empty() {
            warn!("⚠️ roster is empty, nothing to do");
            return Ok(());
        }

        log_roster_loaded(companies.len(), self.config.max_concurrent_companies);

        let started_at = chrono::Local::now();
        let mut summary = if self.config.max_concurrent_companies <= 1 {
            self.run_sequential(&companies).await
        } else {
            self.run_concurrent(&companies, self.config.max_concurrent_companies)
                .await
        };
        summary.started_at = started_at.format("%Y-%m-%d %H:%M:%S").to_string();
        summary.finished_at = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

        self.report.write_summary(&summary)?;
        log_final_stats(&summary);

        // Final machine-readable summary on stdout
        println!("{}", serde_json::to_string_pretty(&summary)?);
        Ok(())
    }

    /// Strict roster order, one company at a time.
    pub async fn run_sequential(&self, companies: &[Company]) -> RunSummary {
        let mut summary = RunSummary {
            total: companies.len(),
            ..Default::default()
        };

        for (idx, company) in companies.iter().enumerate() {
            let ctx = CompanyCtx::new(idx + 1, &company.id, &company.name, &company.tax_pin);
            let (outcome, attempts) = process_with_retry(
                &self.browser,
                Arc::clone(&self.storage),
                &self.config,
                Arc::clone(&self.report),
                company,
                &ctx,
            )
            .await;

            let ok = record_outcome(&mut summary, company, outcome, attempts);
            if !ok && self.config.stop_on_first_failure {
                warn!("stopping on first failure as configured");
                break;
            }
        }

        summary
    }

    /// Fixed-size batches; companies inside a batch run concurrently on
    /// fully independent sessions, with a pause between batches to go easy
    /// on the portal.
    pub async fn run_concurrent(&self, companies: &[Company], max_concurrent: usize) -> RunSummary {
        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let total = companies.len();
        let mut summary = RunSummary {
            total,
            ..Default::default()
        };

        let total_batches = total.div_ceil(max_concurrent);
        'batches: for batch_start in (0..total).step_by(max_concurrent) {
            let batch_end = (batch_start + max_concurrent).min(total);
            let batch_num = (batch_start / max_concurrent) + 1;
            log_batch_start(batch_num, total_batches, batch_start + 1, batch_end, total);

            let mut handles = Vec::new();
            for (idx, company) in companies[batch_start..batch_end].iter().enumerate() {
                let company_index = batch_start + idx + 1;
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };

                let browser = Arc::clone(&self.browser);
                let storage = Arc::clone(&self.storage);
                let report = Arc::clone(&self.report);
                let config = self.config.clone();
                let company = company.clone();
                let ctx =
                    CompanyCtx::new(company_index, &company.id, &company.name, &company.tax_pin);

                let spawned_company = company.clone();
                let handle = tokio::spawn(async move {
                    let _permit = permit;
                    let (outcome, attempts) = process_with_retry(
                        &browser,
                        storage,
                        &config,
                        report,
                        &spawned_company,
                        &ctx,
                    )
                    .await;
                    (outcome, attempts)
                });
                handles.push((company_index, company, handle));
            }

            let mut stop = false;
            for (company_index, company, handle) in handles {
                match handle.await {
                    Ok((outcome, attempts)) => {
                        let ok = record_outcome(&mut summary, &company, outcome, attempts);
                        if !ok && self.config.stop_on_first_failure {
                            stop = true;
                        }
                    }
                    Err(e) => {
                        error!("[company {}] task join failed: {}", company_index, e);
                        record_join_failure(&mut summary, &company, &e.to_string());
                        if self.config.stop_on_first_failure {
                            stop = true;
                        }
                    }
                }
            }
            log_batch_complete(batch_num, &summary);

            if stop {
                warn!("stopping on first failure as configured");
                break 'batches;
            }
            if batch_end < total && self.config.batch_pause_secs > 0 {
                sleep(Duration::from_secs(self.config.batch_pause_secs)).await;
            }
        }

        summary
    }
}

/// Retry loop around one company. Any page held by a failed attempt is
/// already released inside `process_company`; this loop only decides how
/// long to wait and when to give up. Network-like failures (classified on
/// the typed error, not on message text) get the longer delay.
async fn process_with_retry(
    browser: &Browser,
    storage: Arc<dyn StorageGateway>,
    config: &Config,
    report: Arc<ReportWriter>,
    company: &Company,
    ctx: &CompanyCtx,
) -> (Result<CompanyOutcome>, u32) {
    let mut attempts = 0;
    loop {
        attempts += 1;
        let result = company_processor::process_company(
            browser,
            Arc::clone(&storage),
            config,
            Some(Arc::clone(&report)),
            company,
            ctx,
        )
        .await;

        match result {
            Ok(outcome) => return (Ok(outcome), attempts),
            Err(e) => {
                if attempts >= config.max_retries {
                    error!(
                        "[company {}] ❌ giving up after {} attempts: {}",
                        ctx.index, attempts, e
                    );
                    return (Err(e), attempts);
                }

                let network_like = e
                    .downcast_ref::<AppError>()
                    .map_or(false, AppError::is_network_like);
                let delay = if network_like {
                    config.network_retry_delay_secs
                } else {
                    config.retry_delay_secs
                };
                warn!(
                    "[company {}] attempt {}/{} failed ({}{}), retrying in {}s",
                    ctx.index,
                    attempts,
                    config.max_retries,
                    e,
                    if network_like { ", network-like" } else { "" },
                    delay
                );
                sleep(Duration::from_secs(delay)).await;
            }
        }
    }
}

/// Fold one company's outcome into the summary. Returns false when the
/// company failed terminally.
fn record_outcome(
    summary: &mut RunSummary,
    company: &Company,
    outcome: Result<CompanyOutcome>,
    attempts: u32,
) -> bool {
    match outcome {
        Ok(CompanyOutcome::Skipped) => {
            summary.skipped += 1;
            true
        }
        Ok(CompanyOutcome::Completed(result)) => {
            summary.successful += 1;
            summary.periods_processed += result.periods_processed;
            summary.periods_skipped += result.periods_skipped;
            summary.periods_unprocessed += result.periods_unprocessed;
            true
        }
        Err(e) => {
            summary.failed += 1;
            summary.errors.push(CompanyFailure {
                company: company.name.clone(),
                tax_pin: company.tax_pin.clone(),
                error: e.to_string(),
                attempts,
            });
            false
        }
    }
}

/// Fold a task that never finished (panic or cancellation) into the
/// summary. Counts as failed with an error entry like any other terminal
/// failure, so `errors` always matches `failed`.
fn record_join_failure(summary: &mut RunSummary, company: &Company, error: &str) {
    summary.failed += 1;
    summary.errors.push(CompanyFailure {
        company: company.name.clone(),
        tax_pin: company.tax_pin.clone(),
        error: format!("task join failed: {}", error),
        attempts: 0,
    });
}

// ========== Log helpers ==========

fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 filing extraction run starting");
    info!(
        "📊 max concurrent companies: {}",
        config.max_concurrent_companies
    );
    if config.force_update {
        info!("⚡ force update: ON (skip checks bypassed)");
    }
    info!(
        "🗓️ extraction window: {}..={}",
        config.start_year, config.end_year
    );
    info!("{}", "=".repeat(60));
}

fn log_roster_loaded(total: usize, max_concurrent: usize) {
    info!("✓ {} companies on the roster", total);
    info!("📋 processing in batches of {}\n", max_concurrent);
}

fn log_batch_start(batch_num: usize, total_batches: usize, start: usize, end: usize, total: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 batch {}/{}", batch_num, total_batches);
    info!("🏢 companies {}-{} of {}", start, end, total);
    info!("{}", "=".repeat(60));
}

fn log_batch_complete(batch_num: usize, summary: &RunSummary) {
    info!("\n{}", "─".repeat(60));
    info!(
        "✓ batch {} done: {} ok, {} skipped, {} failed so far",
        batch_num, summary.successful, summary.skipped, summary.failed
    );
    info!("{}", "─".repeat(60));
}

fn log_final_stats(summary: &RunSummary) {
    info!("\n{}", "=".repeat(60));
    info!("📊 run complete");
    info!("{}", "=".repeat(60));
    info!("✅ successful: {}/{}", summary.successful, summary.total);
    info!("⏭️ skipped (already complete): {}", summary.skipped);
    info!("❌ failed: {}", summary.failed);
    info!(
        "📄 periods: {} processed, {} skipped, {} unprocessed",
        summary.periods_processed, summary.periods_skipped, summary.periods_unprocessed
    );
    for failure in &summary.errors {
        info!(
            "   ↳ {} ({}): {} after {} attempt(s)",
            failure.company, failure.tax_pin, failure.error, failure.attempts
        );
    }
    info!("{}", "=".repeat(60));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::ExecutionResult;

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

    #[test]
    fn every_failure_carries_an_error_entry() {
        let mut summary = RunSummary::default();

        record_outcome(
            &mut summary,
            &company(),
            Err(anyhow::anyhow!("login rejected")),
            3,
        );
        record_join_failure(&mut summary, &company(), "task panicked");

        assert_eq!(summary.failed, 2);
        assert_eq!(summary.errors.len(), summary.failed);
        assert_eq!(summary.errors[0].attempts, 3);
        assert!(summary.errors[1].error.contains("task join failed"));
        assert_eq!(summary.errors[1].tax_pin, "P051234567X");
    }

    #[test]
    fn successful_and_skipped_outcomes_fold_into_counters() {
        let mut summary = RunSummary::default();

        let result = ExecutionResult {
            periods_processed: 4,
            periods_skipped: 2,
            periods_unprocessed: 1,
        };
        assert!(record_outcome(
            &mut summary,
            &company(),
            Ok(CompanyOutcome::Completed(result)),
            1,
        ));
        assert!(record_outcome(
            &mut summary,
            &company(),
            Ok(CompanyOutcome::Skipped),
            1,
        ));

        assert_eq!(summary.successful, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.periods_processed, 4);
        assert_eq!(summary.periods_unprocessed, 1);
        assert!(summary.errors.is_empty());
    }
}
