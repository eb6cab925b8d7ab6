//! Single company processor - orchestration layer
//!
//! Runs one company end to end: plan against the store, and only when the
//! plan says so, open a session, log in, execute, log out. The page opened
//! for the company is released on every exit path.

use crate::browser;
use crate::config::Config;
use crate::infrastructure::PageDriver;
use crate::models::Company;
use crate::services::captcha::{CaptchaSolver, TesseractOcr};
use crate::services::navigator;
use crate::services::report_writer::ReportWriter;
use crate::services::session::SessionDriver;
use crate::storage::StorageGateway;
use crate::workflow::{CompanyCtx, ExecutionResult, PlanReason, ReconciliationEngine, TargetPeriods};
use anyhow::Result;
use chromiumoxide::Browser;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of one company's run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompanyOutcome {
    /// The plan decided nothing is missing; no login happened
    Skipped,
    Completed(ExecutionResult),
}

pub async fn process_company(
    browser: &Browser,
    storage: Arc<dyn StorageGateway>,
    config: &Config,
    report: Option<Arc<ReportWriter>>,
    company: &Company,
    ctx: &CompanyCtx,
) -> Result<CompanyOutcome> {
    log_company_start(ctx, company);

    let mut engine = ReconciliationEngine::new(storage, config);
    if let Some(report) = report {
        engine = engine.with_report(report);
    }

    let plan = engine.plan_extraction(company).await?;
    log_plan(ctx, &plan.reason, &plan.periods);

    if plan.skip {
        info!(
            "[company {}] ✓ nothing to fetch ({}), skipping login",
            ctx.index, plan.reason
        );
        return Ok(CompanyOutcome::Skipped);
    }

    if config.check_withholding_status {
        match navigator::check_withholding_status(browser, &config.portal_url, &company.tax_pin)
            .await
        {
            Ok(registered) => info!(
                "[company {}] withholding agent: {}",
                ctx.index,
                if registered { "registered" } else { "not registered" }
            ),
            Err(e) => warn!(
                "[company {}] withholding status lookup failed: {}",
                ctx.index, e
            ),
        }
    }

    let page = browser::open_company_page(browser, &config.portal_url).await?;
    let driver = PageDriver::new(page);
    let session = SessionDriver::new(config);
    let solver = CaptchaSolver::new(
        Box::new(TesseractOcr),
        Path::new(&config.output_dir).join("captcha_tmp"),
    );

    // Everything after login runs inside a captured result so logout and
    // page close still happen when extraction throws
    let execution = match session.login(&driver, company, &solver).await {
        Ok(()) => {
            let result = engine
                .execute_plan(browser, &driver, &plan, company, ctx.index)
                .await;
            if let Err(e) = session.logout(&driver).await {
                warn!("[company {}] logout failed: {}", ctx.index, e);
            }
            result
        }
        Err(e) => Err(e),
    };
    driver.close().await;
    let result = execution?;

    log_company_complete(ctx, &result);
    Ok(CompanyOutcome::Completed(result))
}

// ========== Log helpers ==========

fn log_company_start(ctx: &CompanyCtx, company: &Company) {
    info!("\n[company {}] {}", ctx.index, "─".repeat(40));
    info!(
        "[company {}] {} ({})",
        ctx.index, company.name, company.tax_pin
    );
}

fn log_plan(ctx: &CompanyCtx, reason: &PlanReason, periods: &TargetPeriods) {
    match periods {
        TargetPeriods::All => {
            info!("[company {}] plan: {} → fetch all periods", ctx.index, reason)
        }
        TargetPeriods::Subset(set) => info!(
            "[company {}] plan: {} → {} period(s) targeted",
            ctx.index,
            reason,
            set.len()
        ),
    }
}

fn log_company_complete(ctx: &CompanyCtx, result: &ExecutionResult) {
    info!(
        "[company {}] ✅ done: {} processed, {} skipped, {} unprocessed",
        ctx.index,
        result.periods_processed,
        result.periods_skipped,
        result.periods_unprocessed
    );
}
