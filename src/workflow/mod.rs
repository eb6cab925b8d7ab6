pub mod company_ctx;
pub mod reconciliation;

pub use company_ctx::CompanyCtx;
pub use reconciliation::{
    DetailOutcome, ExecutionResult, Plan, PlanReason, ReconciliationEngine, TargetPeriods,
};
