//! Domain data model
//!
//! Companies come from the roster file, periods from the portal's listing
//! table, and detail records are what reconciliation persists.

pub mod company;
pub mod detail;
pub mod period;

pub use company::{load_roster, Company};
pub use detail::{
    DetailClassification, PeriodDetailRecord, ProcessingStatus, SectionDescriptor, SectionOutcome,
    SectionStatus, SECTION_CATALOG,
};
pub use period::{ListingRow, PeriodKey, PeriodListing, RETURN_PERIOD_HEADER};
