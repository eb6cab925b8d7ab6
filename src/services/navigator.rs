//! Portal navigator - services layer
//!
//! Drives an authenticated session through the portal's business screens and
//! turns rendered tables into structured rows. It owns all selectors and
//! in-page scripts for the filed-returns workflow; it does not decide what
//! to fetch or what to persist.

use crate::error::AppError;
use crate::infrastructure::PageDriver;
use crate::models::{
    DetailClassification, ListingRow, SectionDescriptor, SectionOutcome, SECTION_CATALOG,
};
use anyhow::Result;
use chromiumoxide::Browser;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const RETURNS_MENU: &str = "#menu_returns";
const VIEW_FILED_LINK: &str = "a[href*='viewFiledReturn']";
const OBLIGATION_SELECT: &str = "#cmbTaxObligation";
const CONSULT_BUTTON: &str = "#btnConsult";
const RETURNS_TABLE: &str = "#tbl_filed_returns";
const VAT_OBLIGATION_VALUE: &str = "4"; // option value for "Value Added Tax (VAT)"

const POPUP_WAIT_SECS: u64 = 25;

pub struct PortalNavigator<'a> {
    driver: &'a PageDriver,
}

impl<'a> PortalNavigator<'a> {
    pub fn new(driver: &'a PageDriver) -> Self {
        Self { driver }
    }

    /// Navigate to the filed-returns screen and scrape the full listing
    /// table, in the portal's row order.
    pub async fn open_returns_listing(&self) -> Result<Vec<ListingRow>> {
        self.driver.wait_for(RETURNS_MENU).await?;
        self.driver.click(RETURNS_MENU).await?;
        self.driver.wait_for(VIEW_FILED_LINK).await?;
        self.driver.click(VIEW_FILED_LINK).await?;

        self.driver.wait_for(OBLIGATION_SELECT).await?;
        let select_vat = format!(
            "(() => {{ const s = document.querySelector({sel}); s.value = {val}; s.dispatchEvent(new Event('change')); return true; }})()",
            sel = serde_json::to_string(OBLIGATION_SELECT)?,
            val = serde_json::to_string(VAT_OBLIGATION_VALUE)?,
        );
        self.driver.eval(select_vat).await?;
        self.driver.click(CONSULT_BUTTON).await?;

        self.driver.wait_for(RETURNS_TABLE).await?;
        let rows = self
            .scrape_table(self.driver, RETURNS_TABLE)
            .await?
            .unwrap_or_default();
        debug!("returns listing has {} rows", rows.len());

        Ok(rows
            .into_iter()
            .map(|pairs| ListingRow {
                values: pairs.into_iter().collect(),
            })
            .collect())
    }

    /// Whether the listing row at `row_index` (0-based over data rows)
    /// carries a view action at all. Old periods occasionally render
    /// without one.
    pub async fn has_view_action(&self, row_index: usize) -> Result<bool> {
        let script = format!(
            r#"(() => {{
                const table = document.querySelector({sel});
                if (!table) return false;
                const rows = Array.from(table.querySelectorAll('tr')).filter(r => r.querySelector('td'));
                const row = rows[{idx}];
                return !!(row && row.querySelector('a'));
            }})()"#,
            sel = serde_json::to_string(RETURNS_TABLE)?,
            idx = row_index,
        );
        Ok(matches!(self.driver.eval(script).await?, JsonValue::Bool(true)))
    }

    /// Click the row's view action and hand back the popup page it opens.
    pub async fn open_period_detail(
        &self,
        browser: &Browser,
        row_index: usize,
    ) -> Result<PageDriver> {
        let before: Vec<_> = browser
            .pages()
            .await?
            .iter()
            .map(|p| p.target_id().clone())
            .collect();

        let click = format!(
            r#"(() => {{
                const table = document.querySelector({sel});
                if (!table) return false;
                const rows = Array.from(table.querySelectorAll('tr')).filter(r => r.querySelector('td'));
                const row = rows[{idx}];
                const link = row ? row.querySelector('a') : null;
                if (!link) return false;
                link.click();
                return true;
            }})()"#,
            sel = serde_json::to_string(RETURNS_TABLE)?,
            idx = row_index,
        );
        if !matches!(self.driver.eval(click).await?, JsonValue::Bool(true)) {
            return Err(AppError::Data(crate::error::DataError::RowShape {
                context: format!("listing row {} has no view action", row_index),
            })
            .into());
        }

        // The view action opens a new tab; poll for the page that was not
        // there before the click
        let deadline = tokio::time::Instant::now() + Duration::from_secs(POPUP_WAIT_SECS);
        loop {
            for page in browser.pages().await? {
                if !before.iter().any(|id| id == page.target_id()) {
                    let detail = PageDriver::new(page);
                    detail.wait_for("body").await?;
                    return Ok(detail);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::timeout("period detail popup", POPUP_WAIT_SECS).into());
            }
            sleep(Duration::from_millis(300)).await;
        }
    }

    /// Classify a freshly opened detail view.
    pub async fn classify_detail(&self, detail: &PageDriver) -> Result<DetailClassification> {
        let script = r#"(() => {
            const text = document.body ? document.body.innerText : '';
            if (document.querySelector('#errorForm') || /an error (has )?occurred/i.test(text)) return 'error_page';
            if (/nil\s+return/i.test(text)) return 'nil_return';
            return 'normal';
        })()"#;
        let tag: String = detail.eval_as(script).await?;
        Ok(match tag.as_str() {
            "error_page" => DetailClassification::ErrorPage,
            "nil_return" => DetailClassification::NilReturn,
            _ => DetailClassification::Normal,
        })
    }

    /// Crank every paginated section table up to its largest page size so a
    /// single scrape sees all rows.
    pub async fn set_max_page_size(&self, detail: &PageDriver) -> Result<()> {
        let script = r#"(() => {
            document.querySelectorAll("select.pagesize, select[name$='length']").forEach(sel => {
                const sizes = Array.from(sel.options).map(o => parseInt(o.value, 10)).filter(n => !isNaN(n));
                if (sizes.length) {
                    sel.value = String(Math.max(...sizes));
                    sel.dispatchEvent(new Event('change'));
                }
            });
            return true;
        })()"#;
        detail.eval(script).await?;
        sleep(Duration::from_millis(500)).await;
        Ok(())
    }

    /// Extract all nine catalog sections concurrently.
    ///
    /// Each section runs isolated; a throw inside one becomes that section's
    /// `error` outcome and never touches its siblings.
    pub async fn extract_sections(
        &self,
        detail: &PageDriver,
    ) -> BTreeMap<String, SectionOutcome> {
        let tasks = SECTION_CATALOG.iter().map(|descriptor| async move {
            let outcome = match self.extract_section(detail, descriptor).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("section {} extraction failed: {}", descriptor.key, e);
                    SectionOutcome::error(e.to_string())
                }
            };
            (descriptor.key.to_string(), outcome)
        });
        futures::future::join_all(tasks).await.into_iter().collect()
    }

    async fn extract_section(
        &self,
        detail: &PageDriver,
        descriptor: &SectionDescriptor,
    ) -> Result<SectionOutcome> {
        let rows = self.scrape_table(detail, descriptor.selector).await?;
        if rows.is_none() {
            debug!("section {} not rendered", descriptor.key);
        }
        Ok(section_outcome(rows))
    }

    /// Generic table scrape: `None` when the selector matches nothing,
    /// otherwise data rows as ordered header/value pairs (header-only tables
    /// come back empty).
    async fn scrape_table(
        &self,
        driver: &PageDriver,
        selector: &str,
    ) -> Result<Option<Vec<Vec<(String, String)>>>> {
        let script = format!(
            r#"(() => {{
                const table = document.querySelector({sel});
                if (!table) return null;
                const allRows = Array.from(table.querySelectorAll('tr'));
                const headerRow = allRows.find(r => r.querySelector('th')) || allRows[0];
                if (!headerRow) return [];
                const headers = Array.from(headerRow.querySelectorAll('th,td')).map(c => c.innerText.trim());
                return allRows
                    .filter(r => r !== headerRow && r.querySelector('td'))
                    .map(tr => Array.from(tr.querySelectorAll('td')).map((c, i) => [headers[i] || ('col_' + i), c.innerText.trim()]));
            }})()"#,
            sel = serde_json::to_string(selector)?,
        );
        match driver.eval(script).await? {
            JsonValue::Null => Ok(None),
            value => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    /// Close a detail popup. Best effort; runs on every exit path.
    pub async fn close_detail(&self, detail: PageDriver) {
        detail.close().await;
    }
}

// ========== Withholding-agent checker ==========

const WHT_CHECKER_PATH: &str = "agentChecker.htm";
const WHT_PIN_INPUT: &str = "#agentPin";
const WHT_CHECK_BUTTON: &str = "#btnCheckAgent";
const WHT_RESULT: &str = "#agentResult";

/// Look up withholding-agent registration for one PIN on the public checker
/// page. Unauthenticated; opens and closes its own scratch page.
pub async fn check_withholding_status(
    browser: &Browser,
    portal_url: &str,
    tax_pin: &str,
) -> Result<bool> {
    let url = format!("{}/{}", portal_url.trim_end_matches('/'), WHT_CHECKER_PATH);
    let page = browser.new_page(url.as_str()).await?;
    let driver = PageDriver::new(page);

    let result = async {
        driver.wait_for(WHT_PIN_INPUT).await?;
        driver.type_into(WHT_PIN_INPUT, tax_pin).await?;
        driver.click(WHT_CHECK_BUTTON).await?;
        driver.wait_for(WHT_RESULT).await?;
        let text = driver.inner_text(WHT_RESULT).await?.unwrap_or_default();
        Ok::<bool, anyhow::Error>(text.to_lowercase().contains("registered"))
    }
    .await;

    driver.close().await;
    result
}

// ========== Section outcome mapping ==========

/// Map a scraped table to its section outcome: a missing table is
/// `not_found`, a header-only table `no_records`, anything else `success`
/// with amount columns coerced.
fn section_outcome(rows: Option<Vec<Vec<(String, String)>>>) -> SectionOutcome {
    match rows {
        None => SectionOutcome::not_found(),
        Some(rows) if rows.is_empty() => SectionOutcome::no_records(),
        Some(rows) => SectionOutcome::success(rows.into_iter().map(coerce_row).collect()),
    }
}

// ========== Amount coercion ==========

const AMOUNT_KEYWORDS: [&str; 5] = ["amount", "vat", "taxable", "value", "total"];

fn is_amount_header(header: &str) -> bool {
    let lower = header.to_lowercase();
    AMOUNT_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Turn one scraped row into a JSON map, coercing values under
/// currency-flavored headers into numbers. Thousands separators are
/// stripped; `(x)` means negative; anything non-numeric keeps its raw text.
fn coerce_row(pairs: Vec<(String, String)>) -> BTreeMap<String, JsonValue> {
    pairs
        .into_iter()
        .map(|(header, value)| {
            let coerced = if is_amount_header(&header) {
                parse_amount(&value)
            } else {
                JsonValue::String(value)
            };
            (header, coerced)
        })
        .collect()
}

fn parse_amount(raw: &str) -> JsonValue {
    let trimmed = raw.trim();
    let (body, negative) = if trimmed.starts_with('(') && trimmed.ends_with(')') {
        (&trimmed[1..trimmed.len() - 1], true)
    } else {
        (trimmed, false)
    };
    let cleaned = body.replace(',', "");
    match cleaned.trim().parse::<f64>() {
        Ok(n) => {
            let n = if negative { -n } else { n };
            serde_json::Number::from_f64(n)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(raw.to_string()))
        }
        Err(_) => JsonValue::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SectionStatus;

    fn pairs(p: &[(&str, &str)]) -> Vec<(String, String)> {
        p.iter()
            .map(|(h, v)| (h.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn amounts_are_coerced_under_currency_headers() {
        let row = coerce_row(pairs(&[
            ("Taxable Value", "1,234,567.89"),
            ("VAT Amount", "197,530.86"),
            ("Invoice No", "INV-001"),
        ]));
        assert_eq!(row["Taxable Value"], JsonValue::from(1_234_567.89));
        assert_eq!(row["VAT Amount"], JsonValue::from(197_530.86));
        assert_eq!(row["Invoice No"], JsonValue::String("INV-001".into()));
    }

    #[test]
    fn parenthesized_amounts_are_negative() {
        assert_eq!(parse_amount("(1,500.00)"), JsonValue::from(-1500.0));
    }

    #[test]
    fn non_numeric_amount_falls_back_to_raw_string() {
        let row = coerce_row(pairs(&[("Total Amount", "N/A")]));
        assert_eq!(row["Total Amount"], JsonValue::String("N/A".into()));
    }

    #[test]
    fn header_without_keyword_stays_string() {
        let row = coerce_row(pairs(&[("PIN of Supplier", "12345")]));
        assert_eq!(row["PIN of Supplier"], JsonValue::String("12345".into()));
    }

    #[test]
    fn missing_table_maps_to_not_found() {
        let outcome = section_outcome(None);
        assert_eq!(outcome.status, SectionStatus::NotFound);
        assert!(outcome.data.is_empty());
    }

    #[test]
    fn header_only_table_maps_to_no_records() {
        let outcome = section_outcome(Some(vec![]));
        assert_eq!(outcome.status, SectionStatus::NoRecords);
        assert!(outcome.data.is_empty());
    }

    #[test]
    fn populated_table_maps_to_success_with_coerced_amounts() {
        let outcome = section_outcome(Some(vec![pairs(&[
            ("VAT Amount", "1,000.50"),
            ("Invoice No", "INV-9"),
        ])]));
        assert_eq!(outcome.status, SectionStatus::Success);
        assert_eq!(outcome.data.len(), 1);
        assert_eq!(outcome.data[0]["VAT Amount"], JsonValue::from(1000.5));
        assert_eq!(outcome.data[0]["Invoice No"], JsonValue::String("INV-9".into()));
    }
}
