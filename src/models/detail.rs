use crate::models::period::PeriodKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One entry of the section catalog.
///
/// The whole detail screen is described by this table; one generic
/// extraction routine iterates it instead of nine copy-pasted scrapers.
#[derive(Clone, Copy, Debug)]
pub struct SectionDescriptor {
    /// Stable key used in persisted records
    pub key: &'static str,
    /// Heading as rendered by the portal (for logs)
    pub display_name: &'static str,
    /// Table selector on the detail screen
    pub selector: &'static str,
}

/// The nine fixed sections of a VAT return detail screen.
pub const SECTION_CATALOG: [SectionDescriptor; 9] = [
    SectionDescriptor {
        key: "sales",
        display_name: "Sales (General Rated)",
        selector: "#tbl_sales_dtls",
    },
    SectionDescriptor {
        key: "sales_summary",
        display_name: "Sales Summary",
        selector: "#tbl_sales_summary",
    },
    SectionDescriptor {
        key: "exempt_sales",
        display_name: "Exempt Sales",
        selector: "#tbl_exempt_sales",
    },
    SectionDescriptor {
        key: "sales_totals",
        display_name: "Sales Totals",
        selector: "#tbl_sales_totals",
    },
    SectionDescriptor {
        key: "purchases",
        display_name: "Purchases (General Rated)",
        selector: "#tbl_purchases_dtls",
    },
    SectionDescriptor {
        key: "purchases_summary",
        display_name: "Purchases Summary",
        selector: "#tbl_purchases_summary",
    },
    SectionDescriptor {
        key: "purchases_totals",
        display_name: "Purchases Totals",
        selector: "#tbl_purchases_totals",
    },
    SectionDescriptor {
        key: "withholding_vouchers",
        display_name: "Withholding VAT Vouchers",
        selector: "#tbl_wht_vouchers",
    },
    SectionDescriptor {
        key: "tax_calculation",
        display_name: "Tax Calculation",
        selector: "#tbl_tax_calc",
    },
];

/// How a period's detail view classified once opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetailClassification {
    /// The portal itself rendered an error page for this period
    ErrorPage,
    /// Filed as a nil return; no section data applies
    NilReturn,
    /// Regular return with section tables
    Normal,
}

/// Outcome status for one section of one period.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    /// Table found and rows parsed
    Success,
    /// Table found but only a header row
    NoRecords,
    /// The UI region never rendered
    NotFound,
    /// Extraction of this one section threw
    Error,
}

/// Extracted payload of one section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SectionOutcome {
    pub status: SectionStatus,
    /// Header → value rows; amounts already coerced to numbers
    pub data: Vec<BTreeMap<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SectionOutcome {
    pub fn success(data: Vec<BTreeMap<String, serde_json::Value>>) -> Self {
        Self {
            status: SectionStatus::Success,
            data,
            error: None,
        }
    }

    pub fn no_records() -> Self {
        Self {
            status: SectionStatus::NoRecords,
            data: Vec::new(),
            error: None,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: SectionStatus::NotFound,
            data: Vec::new(),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: SectionStatus::Error,
            data: Vec::new(),
            error: Some(message.into()),
        }
    }
}

/// Processing status recorded on a persisted detail row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Complete,
    NilReturn,
}

/// The durable record for one (company, month, year) period.
///
/// Existence of this record in the store is the sole signal that the period
/// needs no re-extraction. A portal error page must therefore never produce
/// one of these.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeriodDetailRecord {
    pub company_id: String,
    pub tax_pin: String,
    pub month: u32,
    pub year: i32,
    /// Raw date label as shown in the listing
    pub source_date: String,
    pub is_nil_return: bool,
    pub status: ProcessingStatus,
    /// All nine catalog keys are present; every value is null for a nil
    /// return
    pub sections: BTreeMap<String, Option<SectionOutcome>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub extracted_at: DateTime<Utc>,
}

impl PeriodDetailRecord {
    /// Record for a period filed as a nil return.
    pub fn nil_return(
        company_id: impl Into<String>,
        tax_pin: impl Into<String>,
        key: PeriodKey,
        source_date: impl Into<String>,
    ) -> Self {
        let sections = SECTION_CATALOG
            .iter()
            .map(|s| (s.key.to_string(), None))
            .collect();
        Self {
            company_id: company_id.into(),
            tax_pin: tax_pin.into(),
            month: key.month,
            year: key.year,
            source_date: source_date.into(),
            is_nil_return: true,
            status: ProcessingStatus::NilReturn,
            sections,
            error_message: None,
            extracted_at: Utc::now(),
        }
    }

    /// Record for a regular return with extracted sections.
    ///
    /// Catalog keys missing from `sections` are stored as `not_found` so the
    /// record always carries all nine slots.
    pub fn normal(
        company_id: impl Into<String>,
        tax_pin: impl Into<String>,
        key: PeriodKey,
        source_date: impl Into<String>,
        mut sections: BTreeMap<String, SectionOutcome>,
    ) -> Self {
        let sections = SECTION_CATALOG
            .iter()
            .map(|s| {
                let outcome = sections
                    .remove(s.key)
                    .unwrap_or_else(SectionOutcome::not_found);
                (s.key.to_string(), Some(outcome))
            })
            .collect();
        Self {
            company_id: company_id.into(),
            tax_pin: tax_pin.into(),
            month: key.month,
            year: key.year,
            source_date: source_date.into(),
            is_nil_return: false,
            status: ProcessingStatus::Complete,
            sections,
            error_message: None,
            extracted_at: Utc::now(),
        }
    }

    pub fn period(&self) -> PeriodKey {
        PeriodKey::new(self.month, self.year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_nine_unique_keys() {
        let mut keys: Vec<_> = SECTION_CATALOG.iter().map(|s| s.key).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), 9);
    }

    #[test]
    fn nil_return_record_has_all_sections_null() {
        let record =
            PeriodDetailRecord::nil_return("c-1", "P051234567X", PeriodKey::new(4, 2024), "01/04/2024");
        assert!(record.is_nil_return);
        assert_eq!(record.status, ProcessingStatus::NilReturn);
        assert_eq!(record.sections.len(), 9);
        assert!(record.sections.values().all(|v| v.is_none()));
    }

    #[test]
    fn normal_record_fills_missing_sections_as_not_found() {
        let mut sections = BTreeMap::new();
        sections.insert("sales".to_string(), SectionOutcome::success(vec![]));
        let record = PeriodDetailRecord::normal(
            "c-1",
            "P051234567X",
            PeriodKey::new(4, 2024),
            "01/04/2024",
            sections,
        );
        assert!(!record.is_nil_return);
        assert_eq!(record.sections.len(), 9);
        let vouchers = record.sections["withholding_vouchers"].as_ref().unwrap();
        assert_eq!(vouchers.status, SectionStatus::NotFound);
    }

    #[test]
    fn section_status_serializes_snake_case() {
        let json = serde_json::to_string(&SectionStatus::NoRecords).unwrap();
        assert_eq!(json, "\"no_records\"");
    }
}
