// Enrollment Reconciliation Engine - Core Library
// Normalization, facility/plan mapping, subscriber aggregation and
// discrepancy reconciliation over raw health-plan enrollment rows.

pub mod records;
pub mod tier;
pub mod mapping;
pub mod filter;
pub mod aggregate;
pub mod reconcile;
pub mod pipeline;

// Re-export commonly used types
pub use records::{load_records_csv, EnrichedRecord, EnrollmentRecord};
pub use tier::{Tier, TierNormalizer};
pub use mapping::{
    default_plan_rules, FacilityEntry, FacilityLookup, FacilityMap, FacilityPlanMapper,
    PlanCategory, PlanLookup, PlanMap, PlanRule,
};
pub use filter::{FilterOutcome, FilterPolicy, MembershipFilter};
pub use aggregate::{
    AggregationMode, AggregationSpec, EnrollmentAggregator, ManualOverride, SummaryCell,
    SummaryTable,
};
pub use reconcile::{
    DiscrepancyReconciler, DiscrepancyReport, ExclusionBreakdown, ExpectedCell, ExpectedTotals,
    TierDelta, UnknownCodeCensus,
};
pub use pipeline::{
    BatchOutcome, BatchRunSummary, EnrollmentPipeline, PipelineConfig, PipelineRun,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
