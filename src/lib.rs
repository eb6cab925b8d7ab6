//! # iTax Extractor
//!
//! Automated extraction of VAT filed-return data from the iTax portal into
//! a relational store, with incremental reconciliation so already-captured
//! periods are never re-fetched.
//!
//! ## Architecture
//!
//! The system is layered strictly, each layer only calling downward:
//!
//! ### ① Infrastructure
//! - `browser/` - attaches to a running Chrome over CDP, opens pages
//! - `infrastructure::PageDriver` - sole owner of a `Page`, exposes
//!   eval / wait / click / type / screenshot capabilities
//!
//! ### ② Services
//! - `services::CaptchaSolver` - screenshot → OCR → arithmetic answer
//! - `services::SessionDriver` - login and logout with bounded captcha
//!   retries
//! - `services::PortalNavigator` - listing, detail popups, section scraping
//! - `services::ReportWriter` - run directory, summary.json, CSV export
//!
//! ### ③ Workflow
//! - `workflow::ReconciliationEngine` - plans the set of missing periods
//!   against the store and executes the plan over the listing
//!
//! ### ④ Orchestration
//! - `orchestrator::App` - roster loop, batching, retry policy, summary
//! - `orchestrator::process_company` - one company end to end
//!
//! Storage sits beside the layers behind the `StorageGateway` trait, with a
//! REST implementation for production and an in-memory one for tests.

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod storage;
pub mod utils;
pub mod workflow;

// Re-export the types callers touch most
pub use browser::{connect_to_browser, open_company_page};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::PageDriver;
pub use models::{Company, PeriodDetailRecord, PeriodKey, PeriodListing};
pub use orchestrator::{process_company, App, CompanyOutcome, RunSummary};
pub use storage::{MemoryStorage, RestStorage, StorageGateway};
pub use workflow::{CompanyCtx, ExecutionResult, Plan, ReconciliationEngine};
