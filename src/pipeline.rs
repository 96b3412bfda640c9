// 🔁 Enrollment Pipeline - End-to-end run and batch orchestration
// Pure composition of the engine stages:
//   raw rows → MembershipFilter → enrichment → EnrollmentAggregator
//   → (optional) DiscrepancyReconciler
// The only fatal condition is a structurally absent mapping table,
// rejected before any record is processed. Everything row-level recovers
// locally and surfaces through flags, tallies and the census.

use crate::aggregate::{AggregationSpec, EnrollmentAggregator, ManualOverride, SummaryTable};
use crate::filter::{FilterPolicy, MembershipFilter};
use crate::mapping::{FacilityMap, FacilityPlanMapper, PlanMap};
use crate::reconcile::{
    DiscrepancyReconciler, DiscrepancyReport, ExclusionBreakdown, ExpectedTotals,
    UnknownCodeCensus,
};
use crate::records::{EnrichedRecord, EnrollmentRecord};
use crate::tier::TierNormalizer;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

// ============================================================================
// PIPELINE CONFIG
// ============================================================================

fn default_include_plan_category() -> bool {
    true
}

/// Explicit configuration surface - no hidden defaults beyond serde
/// fallbacks for optional sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Statuses counted as billable
    pub status_allowlist: BTreeSet<String>,

    /// Relations counted as the subscriber role
    pub relation_allowlist: BTreeSet<String>,

    /// Present → measure-sum aggregation; absent → contract counting
    #[serde(default)]
    pub measure_field: Option<String>,

    /// Present → also produce a summary restricted to these facilities
    #[serde(default)]
    pub facility_filter: Option<BTreeSet<String>>,

    /// Facility keys dropped before filtering (tallied, never silent)
    #[serde(default)]
    pub excluded_facilities: BTreeSet<String>,

    #[serde(default = "default_include_plan_category")]
    pub include_plan_category: bool,

    /// Declarative post-aggregation adjustments
    #[serde(default)]
    pub overrides: Vec<ManualOverride>,
}

impl PipelineConfig {
    /// Contract counting with the standard subscriber policy.
    pub fn default_config() -> Self {
        let policy = FilterPolicy::default_subscriber_policy();
        PipelineConfig {
            status_allowlist: policy.status_allowlist,
            relation_allowlist: policy.relation_allowlist,
            measure_field: None,
            facility_filter: None,
            excluded_facilities: BTreeSet::new(),
            include_plan_category: true,
            overrides: Vec::new(),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read pipeline config: {:?}", path.as_ref()))?;

        serde_json::from_str(&content).context("Failed to parse pipeline config JSON")
    }

    pub fn filter_policy(&self) -> FilterPolicy {
        FilterPolicy::new(&self.status_allowlist, &self.relation_allowlist)
    }

    pub fn aggregation_spec(&self) -> AggregationSpec {
        AggregationSpec {
            include_plan_category: self.include_plan_category,
            measure_field: self.measure_field.clone(),
        }
    }
}

// ============================================================================
// PIPELINE RUN RESULT
// ============================================================================

/// Everything one pipeline run produced, including the diagnostics needed
/// to explain every row that did not reach the summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Enriched subscriber rows (1:1 with the filtered record set)
    pub enriched: Vec<EnrichedRecord>,

    /// Full summary (with any configured overrides applied)
    pub summary: SummaryTable,

    /// Facility-subset view, when a facility_filter is configured
    pub filtered_summary: Option<SummaryTable>,

    /// Filter exclusion breakdown over the pre-filter record set
    pub exclusions: ExclusionBreakdown,

    /// Census of codes that failed to normalize or map
    pub census: UnknownCodeCensus,

    /// Reconciliation snapshot, when expected totals were supplied
    pub report: Option<DiscrepancyReport>,

    /// Rows dropped by the excluded-facility policy
    pub excluded_facility_rows: usize,

    /// Repeat (facility, contract, plan) rows dropped by the filter
    pub duplicates_dropped: usize,

    pub subscriber_count: usize,
}

// ============================================================================
// BATCH ORCHESTRATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub batch: String,
    pub records_in: usize,
    pub subscribers: usize,
    pub summary_cells: usize,
    pub grand_total: f64,
}

/// Per-batch outcomes plus the consolidated table, merged margin-safely
/// from the per-batch partials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRunSummary {
    pub outcomes: Vec<BatchOutcome>,
    pub consolidated: SummaryTable,
}

// ============================================================================
// ENROLLMENT PIPELINE
// ============================================================================

pub struct EnrollmentPipeline {
    facility_map: FacilityMap,
    plan_map: PlanMap,
    normalizer: TierNormalizer,
    mapper: FacilityPlanMapper,
    config: PipelineConfig,
}

impl EnrollmentPipeline {
    /// Build a pipeline over the injected, read-only mapping tables.
    /// An empty table is the structural precondition failure: every
    /// downstream guarantee depends on the tables existing, so it is
    /// rejected here, before any record is processed.
    pub fn new(facility_map: FacilityMap, plan_map: PlanMap, config: PipelineConfig) -> Result<Self> {
        if facility_map.is_empty() {
            bail!("Facility map is empty - cannot resolve any facility key");
        }
        if plan_map.is_empty() {
            bail!("Plan map is empty - cannot resolve any plan code");
        }

        Ok(EnrollmentPipeline {
            facility_map,
            plan_map,
            normalizer: TierNormalizer::new(),
            mapper: FacilityPlanMapper::new(),
            config,
        })
    }

    /// Same precondition checks, with caller-supplied normalizer and
    /// plan-rule policy.
    pub fn with_components(
        facility_map: FacilityMap,
        plan_map: PlanMap,
        config: PipelineConfig,
        normalizer: TierNormalizer,
        mapper: FacilityPlanMapper,
    ) -> Result<Self> {
        let mut pipeline = Self::new(facility_map, plan_map, config)?;
        pipeline.normalizer = normalizer;
        pipeline.mapper = mapper;
        Ok(pipeline)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// One full run: exclude → filter → enrich → aggregate (+ overrides,
    /// + optional facility-subset view) with diagnostics.
    pub fn run(&self, records: &[EnrollmentRecord]) -> PipelineRun {
        self.execute(records, None)
    }

    /// A full run followed by reconciliation against expected totals.
    pub fn run_reconciled(
        &self,
        records: &[EnrollmentRecord],
        expected: &ExpectedTotals,
    ) -> PipelineRun {
        self.execute(records, Some(expected))
    }

    fn execute(
        &self,
        records: &[EnrollmentRecord],
        expected: Option<&ExpectedTotals>,
    ) -> PipelineRun {
        // Excluded-facility policy runs before anything else
        let (kept, excluded): (Vec<_>, Vec<_>) = records
            .iter()
            .cloned()
            .partition(|r| !self.config.excluded_facilities.contains(&r.facility_key));
        let excluded_facility_rows = excluded.len();

        let policy = self.config.filter_policy();
        let filter = MembershipFilter::new(policy.clone());
        let outcome = filter.select_subscribers(&kept);

        let enriched = self.mapper.enrich_all(
            &outcome.selected,
            &self.facility_map,
            &self.plan_map,
            &self.normalizer,
        );

        let aggregator = EnrollmentAggregator::new(self.config.aggregation_spec());
        let mut summary = aggregator.aggregate(&enriched);
        if !self.config.overrides.is_empty() {
            summary = summary.apply_overrides(&self.config.overrides);
        }

        let filtered_summary = self
            .config
            .facility_filter
            .as_ref()
            .map(|facilities| summary.restricted_to(facilities));

        let reconciler = DiscrepancyReconciler::new();
        let exclusions = reconciler.explain_exclusions(&kept, &policy);
        let census = reconciler.unknown_code_census(&enriched);
        let report = expected.map(|e| reconciler.reconcile(&summary, e));

        PipelineRun {
            subscriber_count: outcome.selected.len(),
            duplicates_dropped: outcome.excluded_duplicate,
            enriched,
            summary,
            filtered_summary,
            exclusions,
            census,
            report,
            excluded_facility_rows,
        }
    }

    /// Process named record batches independently and consolidate. One
    /// batch never aborts the others; outcomes record what each batch
    /// contributed, and the consolidated table is the margin-safe merge of
    /// the per-batch summaries.
    pub fn run_batches(&self, batches: &[(String, Vec<EnrollmentRecord>)]) -> Result<BatchRunSummary> {
        let mut outcomes = Vec::with_capacity(batches.len());
        let mut consolidated: Option<SummaryTable> = None;

        for (name, records) in batches {
            let run = self.run(records);

            outcomes.push(BatchOutcome {
                batch: name.clone(),
                records_in: records.len(),
                subscribers: run.subscriber_count,
                summary_cells: run.summary.cells.len(),
                grand_total: run.summary.grand_total,
            });

            consolidated = Some(match consolidated {
                Some(table) => table.merge(&run.summary)?,
                None => run.summary,
            });
        }

        let consolidated = consolidated.unwrap_or_else(|| {
            EnrollmentAggregator::new(self.config.aggregation_spec()).aggregate(&[])
        });

        Ok(BatchRunSummary {
            outcomes,
            consolidated,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::PlanCategory;
    use crate::tier::Tier;

    fn create_test_facility_map() -> FacilityMap {
        let mut map = FacilityMap::new();
        map.insert("H3170", "San Dimas Community Hospital", "H3170");
        map.insert("H3270", "Centinela Hospital Medical Center", "H3270");
        map.insert("H3310", "Alvarado Hospital", "H3310");
        map
    }

    fn create_test_plan_map() -> PlanMap {
        let mut map = PlanMap::new();
        map.insert("PRIMEMMSD", PlanCategory::Epo);
        map.insert("PRIMEMMLMRI", PlanCategory::Value);
        map
    }

    fn create_test_record(
        facility: &str,
        plan: &str,
        ben_code: Option<&str>,
        relation: &str,
        status: &str,
        contract: &str,
    ) -> EnrollmentRecord {
        EnrollmentRecord {
            facility_key: facility.to_string(),
            plan_code: plan.to_string(),
            benefit_code: ben_code.map(|c| c.to_string()),
            relation: relation.to_string(),
            status: status.to_string(),
            contract_id: contract.to_string(),
            measure: None,
        }
    }

    fn create_test_pipeline() -> EnrollmentPipeline {
        EnrollmentPipeline::new(
            create_test_facility_map(),
            create_test_plan_map(),
            PipelineConfig::default_config(),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_mapping_table_is_fatal() {
        let result = EnrollmentPipeline::new(
            FacilityMap::new(),
            create_test_plan_map(),
            PipelineConfig::default_config(),
        );
        assert!(result.is_err());

        let result = EnrollmentPipeline::new(
            create_test_facility_map(),
            PlanMap::new(),
            PipelineConfig::default_config(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_san_dimas_scenario() {
        // H3170 rows: EMP, ESP, ESP, FAM subscribers + one dependent.
        // Expected buckets: {EE:1, EE+Spouse:2, EE+Family:1}, total 4.
        let pipeline = create_test_pipeline();

        let records = vec![
            create_test_record("H3170", "PRIMEMMSD", Some("EMP"), "SELF", "A", "E1"),
            create_test_record("H3170", "PRIMEMMSD", Some("ESP"), "SELF", "A", "E2"),
            create_test_record("H3170", "PRIMEMMSD", Some("ESP"), "SELF", "A", "E3"),
            create_test_record("H3170", "PRIMEMMSD", Some("FAM"), "SELF", "A", "E4"),
            create_test_record("H3170", "PRIMEMMSD", None, "SPOUSE", "A", "E1"),
        ];

        let run = pipeline.run(&records);

        let epo = Some(PlanCategory::Epo);
        assert_eq!(run.summary.cell_value("H3170", Tier::EeOnly, epo), 1.0);
        assert_eq!(run.summary.cell_value("H3170", Tier::EeSpouse, epo), 2.0);
        assert_eq!(run.summary.cell_value("H3170", Tier::EeFamily, epo), 1.0);
        assert_eq!(run.summary.facility_total("H3170"), 4.0);

        // The dependent row never lands in any tier bucket
        assert_eq!(run.summary.grand_total, 4.0);
        assert_eq!(run.exclusions.excluded_relation_values.get("SPOUSE"), Some(&1));
    }

    #[test]
    fn test_unmapped_facility_still_counts_under_sentinel() {
        let pipeline = create_test_pipeline();

        let records = vec![create_test_record(
            "ZZZZ", "PRIMEMMSD", Some("EMP"), "SELF", "A", "E1",
        )];

        let run = pipeline.run(&records);
        assert_eq!(run.enriched.len(), 1);
        assert!(run.enriched[0].missing_facility_flag);
        assert_eq!(run.enriched[0].facility_name, "ZZZZ");
        assert_eq!(run.summary.facility_total("ZZZZ"), 1.0);
        assert_eq!(run.census.unmapped_facility_keys.get("ZZZZ"), Some(&1));
    }

    #[test]
    fn test_excluded_facility_policy() {
        let mut config = PipelineConfig::default_config();
        config.excluded_facilities.insert("H3310".to_string());

        let pipeline = EnrollmentPipeline::new(
            create_test_facility_map(),
            create_test_plan_map(),
            config,
        )
        .unwrap();

        let records = vec![
            create_test_record("H3170", "PRIMEMMSD", Some("EMP"), "SELF", "A", "E1"),
            create_test_record("H3310", "PRIMEMMSD", Some("EMP"), "SELF", "A", "E2"),
        ];

        let run = pipeline.run(&records);
        assert_eq!(run.excluded_facility_rows, 1);
        assert_eq!(run.summary.grand_total, 1.0);
        assert_eq!(run.summary.facility_total("H3310"), 0.0);
    }

    #[test]
    fn test_facility_filter_produces_subset_view() {
        let mut config = PipelineConfig::default_config();
        config.facility_filter = Some(["H3270".to_string()].into());

        let pipeline = EnrollmentPipeline::new(
            create_test_facility_map(),
            create_test_plan_map(),
            config,
        )
        .unwrap();

        let records = vec![
            create_test_record("H3170", "PRIMEMMSD", Some("EMP"), "SELF", "A", "E1"),
            create_test_record("H3270", "PRIMEMMLMRI", Some("EMP"), "SELF", "A", "E2"),
        ];

        let run = pipeline.run(&records);
        let filtered = run.filtered_summary.expect("filter configured");

        assert_eq!(filtered.grand_total, 1.0);
        assert_eq!(
            filtered.cell_value("H3270", Tier::EeOnly, Some(PlanCategory::Value)),
            run.summary.cell_value("H3270", Tier::EeOnly, Some(PlanCategory::Value))
        );
    }

    #[test]
    fn test_run_reconciled_attaches_report() {
        let pipeline = create_test_pipeline();

        let records = vec![
            create_test_record("H3170", "PRIMEMMSD", Some("EMP"), "SELF", "A", "E1"),
            create_test_record("H3170", "PRIMEMMSD", Some("EMP"), "SELF", "A", "E2"),
        ];

        let mut expected = ExpectedTotals::new();
        expected.insert(Tier::EeOnly, Some(PlanCategory::Epo), 2.0);

        let run = pipeline.run_reconciled(&records, &expected);
        let report = run.report.expect("expected totals supplied");
        assert!(report.is_balanced());
    }

    #[test]
    fn test_unknown_tier_rows_are_counted_not_redistributed() {
        let pipeline = create_test_pipeline();

        let records = vec![
            create_test_record("H3170", "PRIMEMMSD", Some("EMP"), "SELF", "A", "E1"),
            create_test_record("H3170", "PRIMEMMSD", Some("BOGUS"), "SELF", "A", "E2"),
        ];

        let run = pipeline.run(&records);
        assert_eq!(run.summary.tier_total(Tier::Unknown), 1.0);
        assert_eq!(run.summary.tier_total(Tier::EeFamily), 0.0);
        assert_eq!(run.summary.grand_total, 2.0);
        assert_eq!(run.census.unknown_tier_codes.get("BOGUS"), Some(&1));
    }

    #[test]
    fn test_run_batches_consolidates() {
        let pipeline = create_test_pipeline();

        let batches = vec![
            (
                "Legacy".to_string(),
                vec![
                    create_test_record("H3170", "PRIMEMMSD", Some("EMP"), "SELF", "A", "E1"),
                    create_test_record("H3170", "PRIMEMMSD", Some("FAM"), "SELF", "A", "E2"),
                ],
            ),
            (
                "Centinela".to_string(),
                vec![create_test_record(
                    "H3270", "PRIMEMMLMRI", Some("EMP"), "SELF", "A", "E3",
                )],
            ),
        ];

        let result = pipeline.run_batches(&batches).unwrap();
        assert_eq!(result.outcomes.len(), 2);
        assert_eq!(result.outcomes[0].subscribers, 2);
        assert_eq!(result.outcomes[1].subscribers, 1);
        assert_eq!(result.consolidated.grand_total, 3.0);
        assert_eq!(result.consolidated.facility_total("H3170"), 2.0);
        assert_eq!(result.consolidated.facility_total("H3270"), 1.0);
    }

    #[test]
    fn test_run_batches_empty_input() {
        let pipeline = create_test_pipeline();
        let result = pipeline.run_batches(&[]).unwrap();

        assert!(result.outcomes.is_empty());
        assert_eq!(result.consolidated.grand_total, 0.0);
    }

    #[test]
    fn test_config_overrides_apply_after_aggregation() {
        let mut config = PipelineConfig::default_config();
        config.overrides.push(ManualOverride {
            facility_id: "H3170".to_string(),
            tier: Tier::EeOnly,
            plan_category: Some(PlanCategory::Epo),
            delta: 2.0,
            note: "carrier-confirmed late adds".to_string(),
        });

        let pipeline = EnrollmentPipeline::new(
            create_test_facility_map(),
            create_test_plan_map(),
            config,
        )
        .unwrap();

        let records = vec![create_test_record(
            "H3170", "PRIMEMMSD", Some("EMP"), "SELF", "A", "E1",
        )];

        let run = pipeline.run(&records);
        assert_eq!(
            run.summary.cell_value("H3170", Tier::EeOnly, Some(PlanCategory::Epo)),
            3.0
        );
        assert_eq!(run.summary.grand_total, 3.0);
    }
}
