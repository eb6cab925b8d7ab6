use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Header of the listing column that carries the period start date.
pub const RETURN_PERIOD_HEADER: &str = "Return Period from";

/// One reporting period, keyed by month and year.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeriodKey {
    pub month: u32,
    pub year: i32,
}

impl PeriodKey {
    pub fn new(month: u32, year: i32) -> Self {
        Self { month, year }
    }

    /// Parse the portal's `DD/MM/YYYY` period label.
    ///
    /// Returns `None` on anything that is not a real calendar date. Callers
    /// treat unparsable rows as satisfied rather than crash-looping on a
    /// malformed listing.
    pub fn parse_label(label: &str) -> Option<Self> {
        let date = NaiveDate::parse_from_str(label.trim(), "%d/%m/%Y").ok()?;
        Some(Self {
            month: date.month(),
            year: date.year(),
        })
    }
}

impl std::fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}/{}", self.month, self.year)
    }
}

/// One scraped row of the filed-returns table, header → cell text.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ListingRow {
    #[serde(flatten)]
    pub values: BTreeMap<String, String>,
}

impl ListingRow {
    pub fn get(&self, header: &str) -> Option<&str> {
        self.values.get(header).map(String::as_str)
    }

    /// Raw period label as shown by the portal.
    pub fn period_label(&self) -> Option<&str> {
        self.get(RETURN_PERIOD_HEADER)
    }

    /// Parsed period key, if the label is a valid date.
    pub fn period(&self) -> Option<PeriodKey> {
        self.period_label().and_then(PeriodKey::parse_label)
    }
}

/// Snapshot of the filed-returns table for one company.
///
/// Replaced wholesale on every refresh; rows keep the portal's table order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeriodListing {
    pub company_id: String,
    pub rows: Vec<ListingRow>,
    pub captured_at: DateTime<Utc>,
}

impl PeriodListing {
    pub fn new(company_id: impl Into<String>, rows: Vec<ListingRow>) -> Self {
        Self {
            company_id: company_id.into(),
            rows,
            captured_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(label: &str) -> ListingRow {
        let mut values = BTreeMap::new();
        values.insert(RETURN_PERIOD_HEADER.to_string(), label.to_string());
        values.insert("Status".to_string(), "Filed".to_string());
        ListingRow { values }
    }

    #[test]
    fn parses_portal_date_label() {
        let key = PeriodKey::parse_label("01/02/2024").unwrap();
        assert_eq!(key, PeriodKey::new(2, 2024));
    }

    #[test]
    fn trims_whitespace_around_label() {
        let key = PeriodKey::parse_label("  01/11/2023 ").unwrap();
        assert_eq!(key, PeriodKey::new(11, 2023));
    }

    #[test]
    fn rejects_garbage_labels() {
        assert!(PeriodKey::parse_label("").is_none());
        assert!(PeriodKey::parse_label("N/A").is_none());
        assert!(PeriodKey::parse_label("2024-02-01").is_none());
        assert!(PeriodKey::parse_label("32/01/2024").is_none());
        assert!(PeriodKey::parse_label("01/13/2024").is_none());
    }

    #[test]
    fn listing_row_exposes_period() {
        assert_eq!(row("01/01/2024").period(), Some(PeriodKey::new(1, 2024)));
        assert_eq!(row("bogus").period(), None);
    }

    #[test]
    fn listing_row_roundtrips_as_flat_json() {
        let r = row("01/03/2024");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json[RETURN_PERIOD_HEADER], "01/03/2024");
        let back: ListingRow = serde_json::from_value(json).unwrap();
        assert_eq!(back.period(), Some(PeriodKey::new(3, 2024)));
    }
}
