// 📊 Enrollment Aggregator - Enriched rows → facility × tier summary
// Groups enriched records by facility × tier (optionally × plan category),
// counting contracts or summing a measure, then derives margins from the
// already-aggregated cells. The table is rebuilt in full on every call;
// partial tables over the same dimensions merge associatively, so chunked
// or per-facility partitions reduce safely.

use crate::mapping::PlanCategory;
use crate::records::EnrichedRecord;
use crate::tier::Tier;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// AGGREGATION SPEC
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationMode {
    /// One per selected subscriber row
    CountContracts,

    /// Sum of the record measure (rows without one sum as 0, tallied)
    SumMeasure,
}

/// Dimension and measure selection for one aggregation call.
/// Count vs measure is one mode per call, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationSpec {
    /// Include plan category as a grouping dimension
    pub include_plan_category: bool,

    /// Present → measure-sum mode, with the field name kept for labeling
    pub measure_field: Option<String>,
}

impl AggregationSpec {
    pub fn contract_counts() -> Self {
        AggregationSpec {
            include_plan_category: true,
            measure_field: None,
        }
    }

    pub fn measure_sum(field: &str) -> Self {
        AggregationSpec {
            include_plan_category: true,
            measure_field: Some(field.to_string()),
        }
    }

    pub fn mode(&self) -> AggregationMode {
        if self.measure_field.is_some() {
            AggregationMode::SumMeasure
        } else {
            AggregationMode::CountContracts
        }
    }
}

// ============================================================================
// SUMMARY TABLE
// ============================================================================

/// One non-margin cell: (facility, tier, plan category) → value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryCell {
    pub facility_id: String,
    pub facility_name: String,
    pub tier: Tier,

    /// None when plan category was not a requested dimension
    pub plan_category: Option<PlanCategory>,

    pub value: f64,
}

/// Complete summary: every observed (facility, tier, category) combination
/// plus derived margins. Margins are computed from the cells, never by
/// re-scanning raw rows, so the grand total always equals the cell sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryTable {
    pub mode: AggregationMode,
    pub measure_field: Option<String>,

    /// Non-margin cells in deterministic (sorted) order
    pub cells: Vec<SummaryCell>,

    /// Margin: per-facility totals, keyed by canonical facility id
    pub facility_totals: BTreeMap<String, f64>,

    /// Margin: per-tier totals
    pub tier_totals: BTreeMap<Tier, f64>,

    /// Margin: per-category totals (empty when category not a dimension)
    pub category_totals: BTreeMap<PlanCategory, f64>,

    /// Margin: grand total over all non-margin cells
    pub grand_total: f64,

    /// Measure mode only: selected rows that carried no measure
    pub rows_without_measure: usize,
}

type CellKey = (String, String, Tier, Option<PlanCategory>);

impl SummaryTable {
    fn from_cell_map(
        mode: AggregationMode,
        measure_field: Option<String>,
        cell_map: BTreeMap<CellKey, f64>,
        rows_without_measure: usize,
    ) -> Self {
        let mut cells = Vec::with_capacity(cell_map.len());
        let mut facility_totals = BTreeMap::new();
        let mut tier_totals = BTreeMap::new();
        let mut category_totals = BTreeMap::new();
        let mut grand_total = 0.0;

        for ((facility_id, facility_name, tier, plan_category), value) in cell_map {
            *facility_totals.entry(facility_id.clone()).or_insert(0.0) += value;
            *tier_totals.entry(tier).or_insert(0.0) += value;
            if let Some(category) = plan_category {
                *category_totals.entry(category).or_insert(0.0) += value;
            }
            grand_total += value;

            cells.push(SummaryCell {
                facility_id,
                facility_name,
                tier,
                plan_category,
                value,
            });
        }

        SummaryTable {
            mode,
            measure_field,
            cells,
            facility_totals,
            tier_totals,
            category_totals,
            grand_total,
            rows_without_measure,
        }
    }

    fn to_cell_map(&self) -> BTreeMap<CellKey, f64> {
        self.cells
            .iter()
            .map(|c| {
                (
                    (
                        c.facility_id.clone(),
                        c.facility_name.clone(),
                        c.tier,
                        c.plan_category,
                    ),
                    c.value,
                )
            })
            .collect()
    }

    /// Value of one non-margin cell; absent combinations read as 0.
    pub fn cell_value(
        &self,
        facility_id: &str,
        tier: Tier,
        plan_category: Option<PlanCategory>,
    ) -> f64 {
        self.cells
            .iter()
            .find(|c| c.facility_id == facility_id && c.tier == tier && c.plan_category == plan_category)
            .map(|c| c.value)
            .unwrap_or(0.0)
    }

    pub fn facility_total(&self, facility_id: &str) -> f64 {
        self.facility_totals.get(facility_id).copied().unwrap_or(0.0)
    }

    pub fn tier_total(&self, tier: Tier) -> f64 {
        self.tier_totals.get(&tier).copied().unwrap_or(0.0)
    }

    pub fn category_total(&self, category: PlanCategory) -> f64 {
        self.category_totals.get(&category).copied().unwrap_or(0.0)
    }

    /// Per-tier totals collapsed over facility and category, for
    /// reconciliation against expected totals matrices.
    pub fn tier_category_totals(&self) -> BTreeMap<(Tier, Option<PlanCategory>), f64> {
        let mut totals = BTreeMap::new();
        for cell in &self.cells {
            *totals.entry((cell.tier, cell.plan_category)).or_insert(0.0) += cell.value;
        }
        totals
    }

    /// Merge two partial tables over the same dimensions. Associative and
    /// commutative: cell values add, margins are recomputed from the merged
    /// cells (never double-counted).
    pub fn merge(&self, other: &SummaryTable) -> Result<SummaryTable> {
        if self.mode != other.mode || self.measure_field != other.measure_field {
            bail!(
                "Cannot merge summary tables with different aggregation modes ({:?} vs {:?})",
                self.mode,
                other.mode
            );
        }

        let mut cell_map = self.to_cell_map();
        for (key, value) in other.to_cell_map() {
            *cell_map.entry(key).or_insert(0.0) += value;
        }

        Ok(SummaryTable::from_cell_map(
            self.mode,
            self.measure_field.clone(),
            cell_map,
            self.rows_without_measure + other.rows_without_measure,
        ))
    }

    /// Narrow view over a facility subset: canonical id matches by
    /// case-insensitive equality, facility name by case-insensitive
    /// substring. Cells are carried over unchanged (pointwise subset of
    /// the full table) and margins recomputed over the kept cells.
    pub fn restricted_to(&self, facilities: &BTreeSet<String>) -> SummaryTable {
        let needles: Vec<String> = facilities.iter().map(|f| f.to_lowercase()).collect();

        let keep = |cell: &SummaryCell| {
            let id = cell.facility_id.to_lowercase();
            let name = cell.facility_name.to_lowercase();
            needles.iter().any(|n| id == *n || name.contains(n))
        };

        let cell_map = self
            .cells
            .iter()
            .filter(|c| keep(c))
            .map(|c| {
                (
                    (
                        c.facility_id.clone(),
                        c.facility_name.clone(),
                        c.tier,
                        c.plan_category,
                    ),
                    c.value,
                )
            })
            .collect();

        SummaryTable::from_cell_map(self.mode, self.measure_field.clone(), cell_map, 0)
    }

    /// Apply declarative post-aggregation adjustments. The raw-to-aggregate
    /// pipeline stays override-free; this layer is the only place one-off
    /// business corrections are allowed to touch cell values. Margins are
    /// recomputed after every adjustment.
    pub fn apply_overrides(&self, overrides: &[ManualOverride]) -> SummaryTable {
        let mut cell_map = self.to_cell_map();

        for adj in overrides {
            // Reuse the facility name from an existing cell when possible
            let name = self
                .cells
                .iter()
                .find(|c| c.facility_id == adj.facility_id)
                .map(|c| c.facility_name.clone())
                .unwrap_or_else(|| adj.facility_id.clone());

            let key = (adj.facility_id.clone(), name, adj.tier, adj.plan_category);
            *cell_map.entry(key).or_insert(0.0) += adj.delta;
        }

        SummaryTable::from_cell_map(
            self.mode,
            self.measure_field.clone(),
            cell_map,
            self.rows_without_measure,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

// ============================================================================
// MANUAL OVERRIDE
// ============================================================================

/// One declarative post-aggregation adjustment with its audit note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualOverride {
    pub facility_id: String,
    pub tier: Tier,
    pub plan_category: Option<PlanCategory>,
    pub delta: f64,

    /// Why this adjustment exists (required for auditability)
    pub note: String,
}

// ============================================================================
// ENROLLMENT AGGREGATOR
// ============================================================================

pub struct EnrollmentAggregator {
    spec: AggregationSpec,
}

impl EnrollmentAggregator {
    pub fn new(spec: AggregationSpec) -> Self {
        EnrollmentAggregator { spec }
    }

    pub fn spec(&self) -> &AggregationSpec {
        &self.spec
    }

    /// Aggregate enriched records into a complete summary table.
    /// Deterministic: insertion order of groups never affects any total.
    pub fn aggregate(&self, records: &[EnrichedRecord]) -> SummaryTable {
        let mut cell_map: BTreeMap<CellKey, f64> = BTreeMap::new();
        let mut rows_without_measure = 0;

        for enriched in records {
            let category = if self.spec.include_plan_category {
                Some(enriched.plan_category)
            } else {
                None
            };

            let key = (
                enriched.facility_id.clone(),
                enriched.facility_name.clone(),
                enriched.tier,
                category,
            );

            let value = match self.spec.mode() {
                AggregationMode::CountContracts => 1.0,
                AggregationMode::SumMeasure => match enriched.record.measure {
                    Some(m) => m,
                    None => {
                        rows_without_measure += 1;
                        0.0
                    }
                },
            };

            *cell_map.entry(key).or_insert(0.0) += value;
        }

        SummaryTable::from_cell_map(
            self.spec.mode(),
            self.spec.measure_field.clone(),
            cell_map,
            rows_without_measure,
        )
    }

    /// Filtered summary: same enriched record set, restricted to a facility
    /// subset. A view over the full table - enrichment is not re-derived
    /// and shared cells never diverge from the full summary.
    pub fn aggregate_filtered(
        &self,
        records: &[EnrichedRecord],
        facilities: &BTreeSet<String>,
    ) -> SummaryTable {
        self.aggregate(records).restricted_to(facilities)
    }
}

// ============================================================================
// TESTS
// ============================================================================
