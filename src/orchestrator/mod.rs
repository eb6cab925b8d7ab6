//! Orchestration layer
//!
//! `batch_processor` owns the roster loop, the browser connection and the
//! company-level retry policy; `company_processor` runs one company end to
//! end (plan → login → execute → logout).

pub mod batch_processor;
pub mod company_processor;

pub use batch_processor::{App, CompanyFailure, RunSummary};
pub use company_processor::{process_company, CompanyOutcome};
