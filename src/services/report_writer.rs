//! Report writer - services layer
//!
//! Renders run artifacts into a dated output directory: the JSON run
//! summary and, when enabled, one CSV file per extracted section. Purely a
//! sink for reconciliation output.

use crate::config::Config;
use crate::models::{PeriodDetailRecord, SectionStatus};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub struct ReportWriter {
    run_dir: PathBuf,
}

impl ReportWriter {
    /// Create the dated run directory under the configured output root.
    pub fn new(config: &Config) -> Result<Self> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let run_dir = Path::new(&config.output_dir).join(format!("run_{}", stamp));
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("cannot create run directory: {}", run_dir.display()))?;
        Ok(Self { run_dir })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Write the final run summary as pretty JSON.
    pub fn write_summary<T: Serialize>(&self, summary: &T) -> Result<()> {
        let path = self.run_dir.join("summary.json");
        let json = serde_json::to_string_pretty(summary)?;
        fs::write(&path, json)
            .with_context(|| format!("cannot write summary: {}", path.display()))?;
        info!("summary written to {}", path.display());
        Ok(())
    }

    /// Export one period's populated sections as CSV files
    /// (`{pin}_{year}_{month}_{section}.csv`), headers unioned across rows.
    pub fn export_period_csv(&self, record: &PeriodDetailRecord) -> Result<()> {
        for (key, outcome) in &record.sections {
            let Some(outcome) = outcome else { continue };
            if outcome.status != SectionStatus::Success || outcome.data.is_empty() {
                continue;
            }

            let headers: BTreeSet<&String> =
                outcome.data.iter().flat_map(|row| row.keys()).collect();
            let headers: Vec<&String> = headers.into_iter().collect();

            let file_name = format!(
                "{}_{}_{:02}_{}.csv",
                record.tax_pin, record.year, record.month, key
            );
            let path = self.run_dir.join(file_name);
            let mut writer = csv::Writer::from_path(&path)
                .with_context(|| format!("cannot create CSV: {}", path.display()))?;

            writer.write_record(headers.iter().map(|h| h.as_str()))?;
            for row in &outcome.data {
                let cells: Vec<String> = headers
                    .iter()
                    .map(|h| match row.get(*h) {
                        Some(serde_json::Value::String(s)) => s.clone(),
                        Some(v) => v.to_string(),
                        None => String::new(),
                    })
                    .collect();
                writer.write_record(&cells)?;
            }
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PeriodKey, SectionOutcome};
    use std::collections::BTreeMap;

    #[test]
    fn exports_only_populated_sections() {
        let dir = std::env::temp_dir().join(format!(
            "itax_report_test_{}",
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let writer = ReportWriter {
            run_dir: dir.clone(),
        };
        fs::create_dir_all(&dir).unwrap();

        let mut sections = BTreeMap::new();
        let mut row = BTreeMap::new();
        row.insert("Invoice No".to_string(), serde_json::json!("INV-1"));
        row.insert("VAT Amount".to_string(), serde_json::json!(160.0));
        sections.insert("sales".to_string(), SectionOutcome::success(vec![row]));
        sections.insert("purchases".to_string(), SectionOutcome::no_records());

        let record = PeriodDetailRecord::normal(
            "c-1",
            "P051234567X",
            PeriodKey::new(2, 2024),
            "01/02/2024",
            sections,
        );
        writer.export_period_csv(&record).unwrap();

        assert!(dir.join("P051234567X_2024_02_sales.csv").exists());
        assert!(!dir.join("P051234567X_2024_02_purchases.csv").exists());

        let _ = fs::remove_dir_all(&dir);
    }
}
