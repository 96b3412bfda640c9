// ⚖️ Discrepancy Reconciler - Aggregates vs expected totals
// Compares an aggregated summary against independently known expected
// totals and reports signed per-cell deltas plus root-cause candidates
// (excluded status/relation values, unknown-code census). Reconciliation
// always completes: a cell present on only one side is a zero-padded
// finding, never an error.

use crate::aggregate::SummaryTable;
use crate::filter::FilterPolicy;
use crate::mapping::PlanCategory;
use crate::records::{EnrichedRecord, EnrollmentRecord};
use crate::tier::Tier;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

// ============================================================================
// EXPECTED TOTALS
// ============================================================================

/// One expected (tier, category) cell of the reference matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedCell {
    pub tier: Tier,
    pub plan_category: Option<PlanCategory>,
    pub expected: f64,
}

/// Reference totals the aggregate must reconcile against (control totals
/// supplied by the carrier or a prior known-good run).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpectedTotals {
    pub cells: Vec<ExpectedCell>,
}

impl ExpectedTotals {
    pub fn new() -> Self {
        ExpectedTotals { cells: Vec::new() }
    }

    pub fn from_cells(cells: Vec<ExpectedCell>) -> Self {
        ExpectedTotals { cells }
    }

    /// Load from a JSON array of {tier, plan_category, expected} objects.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read expected totals: {:?}", path.as_ref()))?;

        let cells: Vec<ExpectedCell> =
            serde_json::from_str(&content).context("Failed to parse expected totals JSON")?;

        Ok(ExpectedTotals { cells })
    }

    pub fn insert(&mut self, tier: Tier, plan_category: Option<PlanCategory>, expected: f64) {
        self.cells.push(ExpectedCell {
            tier,
            plan_category,
            expected,
        });
    }

    pub fn get(&self, tier: Tier, plan_category: Option<PlanCategory>) -> f64 {
        self.cells
            .iter()
            .filter(|c| c.tier == tier && c.plan_category == plan_category)
            .map(|c| c.expected)
            .sum()
    }

    /// Tier-level control totals, collapsed over category.
    pub fn control_totals(&self) -> BTreeMap<Tier, f64> {
        let mut totals = BTreeMap::new();
        for cell in &self.cells {
            *totals.entry(cell.tier).or_insert(0.0) += cell.expected;
        }
        totals
    }

    pub fn grand_total(&self) -> f64 {
        self.cells.iter().map(|c| c.expected).sum()
    }
}

// ============================================================================
// DISCREPANCY REPORT
// ============================================================================

/// Signed delta for one (tier, category) cell: actual − expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierDelta {
    pub tier: Tier,
    pub plan_category: Option<PlanCategory>,
    pub actual: f64,
    pub expected: f64,
    pub delta: f64,
}

/// Immutable snapshot of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscrepancyReport {
    /// Per-cell deltas over the union of actual and expected cells,
    /// in deterministic (tier, category) order
    pub deltas: Vec<TierDelta>,

    pub actual_total: f64,
    pub expected_total: f64,
    pub grand_delta: f64,

    pub reconciled_at: chrono::DateTime<chrono::Utc>,
}

impl DiscrepancyReport {
    pub fn is_balanced(&self) -> bool {
        self.deltas.iter().all(|d| d.delta == 0.0)
    }

    /// Cells where actual and expected disagree.
    pub fn discrepant_cells(&self) -> Vec<&TierDelta> {
        self.deltas.iter().filter(|d| d.delta != 0.0).collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "Reconciliation: {} cells compared, {} discrepant, actual {:.0}, expected {:.0}, grand delta {:+.0}",
            self.deltas.len(),
            self.discrepant_cells().len(),
            self.actual_total,
            self.expected_total,
            self.grand_delta
        )
    }
}

// ============================================================================
// EXCLUSION BREAKDOWN (diagnostic)
// ============================================================================

/// Read-only explanation of what the filter excluded and why. Never alters
/// filter decisions - it exists to root-cause a shortfall ("N active rows
/// have a relation value not classified as subscriber").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExclusionBreakdown {
    /// Out-of-allowlist status values → row counts
    pub excluded_status_values: BTreeMap<String, usize>,

    /// Allowed-status rows with out-of-allowlist relation values → counts
    pub excluded_relation_values: BTreeMap<String, usize>,

    /// Rows missing status or relation entirely
    pub malformed: usize,
}

impl ExclusionBreakdown {
    pub fn total_excluded(&self) -> usize {
        self.excluded_status_values.values().sum::<usize>()
            + self.excluded_relation_values.values().sum::<usize>()
            + self.malformed
    }
}

// ============================================================================
// UNKNOWN-CODE CENSUS (diagnostic)
// ============================================================================

/// Per-raw-code occurrence counts of everything that failed to normalize
/// or map, derived from enriched rows after the fact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnknownCodeCensus {
    pub unknown_tier_codes: BTreeMap<String, usize>,
    pub unmapped_facility_keys: BTreeMap<String, usize>,
    pub unmapped_plan_codes: BTreeMap<String, usize>,
}

impl UnknownCodeCensus {
    pub fn is_clean(&self) -> bool {
        self.unknown_tier_codes.is_empty()
            && self.unmapped_facility_keys.is_empty()
            && self.unmapped_plan_codes.is_empty()
    }
}

// ============================================================================
// DISCREPANCY RECONCILER
// ============================================================================

pub struct DiscrepancyReconciler;

impl DiscrepancyReconciler {
    pub fn new() -> Self {
        DiscrepancyReconciler
    }

    /// Compare an aggregated table against expected totals. Every (tier,
    /// category) cell present in either side appears in the report; an
    /// absent cell reads as 0, so structural gaps between the two matrices
    /// surface as findings instead of errors.
    pub fn reconcile(&self, actual: &SummaryTable, expected: &ExpectedTotals) -> DiscrepancyReport {
        let actual_cells = actual.tier_category_totals();

        let mut keys: BTreeSet<(Tier, Option<PlanCategory>)> =
            actual_cells.keys().copied().collect();
        for cell in &expected.cells {
            keys.insert((cell.tier, cell.plan_category));
        }

        let mut deltas = Vec::with_capacity(keys.len());
        let mut actual_total = 0.0;
        let mut expected_total = 0.0;

        for (tier, plan_category) in keys {
            let actual_value = actual_cells.get(&(tier, plan_category)).copied().unwrap_or(0.0);
            let expected_value = expected.get(tier, plan_category);

            actual_total += actual_value;
            expected_total += expected_value;

            deltas.push(TierDelta {
                tier,
                plan_category,
                actual: actual_value,
                expected: expected_value,
                delta: actual_value - expected_value,
            });
        }

        DiscrepancyReport {
            deltas,
            actual_total,
            expected_total,
            grand_delta: actual_total - expected_total,
            reconciled_at: chrono::Utc::now(),
        }
    }

    /// Break down the pre-filter record set by exclusion cause, counting
    /// each out-of-allowlist status/relation value. Same decision order as
    /// MembershipFilter, but it only observes - duplicates are a filter
    /// concern and not re-derived here.
    pub fn explain_exclusions(
        &self,
        records: &[EnrollmentRecord],
        policy: &FilterPolicy,
    ) -> ExclusionBreakdown {
        let mut breakdown = ExclusionBreakdown {
            excluded_status_values: BTreeMap::new(),
            excluded_relation_values: BTreeMap::new(),
            malformed: 0,
        };

        for record in records {
            if record.is_malformed() {
                breakdown.malformed += 1;
                continue;
            }

            if !policy.allows_status(&record.status) {
                let value = record.status.trim().to_uppercase();
                *breakdown.excluded_status_values.entry(value).or_insert(0) += 1;
                continue;
            }

            if !policy.allows_relation(&record.relation) {
                let value = record.relation.trim().to_uppercase();
                *breakdown.excluded_relation_values.entry(value).or_insert(0) += 1;
            }
        }

        breakdown
    }

    /// Census of raw codes that failed to normalize or map, keyed by the
    /// offending raw value.
    pub fn unknown_code_census(&self, enriched: &[EnrichedRecord]) -> UnknownCodeCensus {
        let mut census = UnknownCodeCensus::default();

        for row in enriched {
            if row.tier == Tier::Unknown {
                let code = row
                    .record
                    .benefit_code
                    .as_deref()
                    .map(|c| c.trim().to_uppercase())
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| "<MISSING>".to_string());
                *census.unknown_tier_codes.entry(code).or_insert(0) += 1;
            }

            if row.missing_facility_flag {
                *census
                    .unmapped_facility_keys
                    .entry(row.record.facility_key.clone())
                    .or_insert(0) += 1;
            }

            if row.missing_plan_flag {
                *census
                    .unmapped_plan_codes
                    .entry(row.record.plan_code.clone())
                    .or_insert(0) += 1;
            }
        }

        census
    }
}

impl Default for DiscrepancyReconciler {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
