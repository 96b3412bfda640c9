// 📋 Enrollment Records - Raw input rows and enriched rows
// One EnrollmentRecord per covered person (subscribers AND dependents);
// EnrichedRecord is the 1:1 derived row with canonical facility/plan/tier.

use crate::mapping::PlanCategory;
use crate::tier::Tier;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// ENROLLMENT RECORD (raw input)
// ============================================================================

/// One raw enrollment row as supplied by the external loader.
///
/// Immutable once ingested: enrichment never mutates the source row,
/// it allocates a new EnrichedRecord alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    /// Raw facility key (e.g. "H3170") - resolved via FacilityMap
    pub facility_key: String,

    /// Raw plan code (e.g. "PRIMEMMSD") - resolved via PlanMap
    pub plan_code: String,

    /// Raw benefit/tier code (e.g. "EMP", "FAM") - may be absent
    pub benefit_code: Option<String>,

    /// Relation to subscriber (SELF, SPOUSE, CHILD, ...) - case-insensitive
    pub relation: String,

    /// Enrollment status (A, C, TERM, ...) - case-insensitive
    pub status: String,

    /// Contract / member identifier
    pub contract_id: String,

    /// Optional numeric measure for sum-mode aggregation
    pub measure: Option<f64>,
}

impl EnrollmentRecord {
    /// A record is malformed when it lacks the fields the filter decides on.
    /// Malformed rows are excluded from the subscriber set and tallied,
    /// never silently dropped.
    pub fn is_malformed(&self) -> bool {
        self.status.trim().is_empty() || self.relation.trim().is_empty()
    }
}

// ============================================================================
// ENRICHED RECORD
// ============================================================================

/// EnrollmentRecord plus canonical facility, plan category and normalized
/// tier. Derived 1:1 from a retained raw record; enrichment is pure.
///
/// Invariant: the missing_* flags are true iff the corresponding mapping
/// lookup had no entry for the raw key - never inferred from aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    /// Original row, preserved alongside the derived fields
    pub record: EnrollmentRecord,

    /// Canonical facility name (raw key when the lookup missed)
    pub facility_name: String,

    /// Canonical facility identifier (raw key when the lookup missed)
    pub facility_id: String,

    /// Plan category after exact-match + heuristic resolution
    pub plan_category: PlanCategory,

    /// Normalized coverage tier (Unknown is a first-class bucket)
    pub tier: Tier,

    /// True iff the raw facility key had no FacilityMap entry
    pub missing_facility_flag: bool,

    /// True iff the raw plan code had no PlanMap entry
    pub missing_plan_flag: bool,
}

// ============================================================================
// CSV LOADING (collaborator shim)
// ============================================================================

/// Row shape of the source-system CSV export. Internal: the engine API
/// takes in-memory EnrollmentRecord slices, this is only the convenience
/// for the CLI and scripts.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "CLIENT ID")]
    client_id: String,

    #[serde(rename = "PLAN")]
    plan: String,

    #[serde(rename = "BEN CODE")]
    ben_code: Option<String>,

    #[serde(rename = "RELATION")]
    relation: String,

    #[serde(rename = "STATUS")]
    status: String,

    #[serde(rename = "EMPLOYEE #")]
    employee_number: String,

    #[serde(rename = "MEASURE", default)]
    measure: Option<f64>,
}

impl From<CsvRow> for EnrollmentRecord {
    fn from(row: CsvRow) -> Self {
        EnrollmentRecord {
            facility_key: row.client_id.trim().to_string(),
            plan_code: row.plan.trim().to_string(),
            benefit_code: row
                .ben_code
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            relation: row.relation.trim().to_string(),
            status: row.status.trim().to_string(),
            contract_id: row.employee_number.trim().to_string(),
            measure: row.measure,
        }
    }
}

/// Load enrollment records from a CSV export of the source workbook.
pub fn load_records_csv(csv_path: &Path) -> Result<Vec<EnrollmentRecord>> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open enrollment CSV: {:?}", csv_path))?;

    let mut records = Vec::new();

    for result in rdr.deserialize() {
        let row: CsvRow = result.context("Failed to deserialize enrollment row")?;
        records.push(EnrollmentRecord::from(row));
    }

    Ok(records)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_record() -> EnrollmentRecord {
        EnrollmentRecord {
            facility_key: "H3170".to_string(),
            plan_code: "PRIMEMMSD".to_string(),
            benefit_code: Some("EMP".to_string()),
            relation: "SELF".to_string(),
            status: "A".to_string(),
            contract_id: "E10001".to_string(),
            measure: None,
        }
    }

    #[test]
    fn test_well_formed_record() {
        let rec = create_test_record();
        assert!(!rec.is_malformed());
    }

    #[test]
    fn test_missing_status_is_malformed() {
        let mut rec = create_test_record();
        rec.status = String::new();
        assert!(rec.is_malformed());
    }

    #[test]
    fn test_missing_relation_is_malformed() {
        let mut rec = create_test_record();
        rec.relation = "   ".to_string();
        assert!(rec.is_malformed());
    }

    #[test]
    fn test_missing_benefit_code_is_not_malformed() {
        // A null BEN CODE normalizes to Tier::Unknown downstream,
        // it does not disqualify the row from the subscriber set.
        let mut rec = create_test_record();
        rec.benefit_code = None;
        assert!(!rec.is_malformed());
    }

    #[test]
    fn test_csv_row_conversion_trims_keys() {
        let row = CsvRow {
            client_id: " H3170 ".to_string(),
            plan: " PRIMEMMSD ".to_string(),
            ben_code: Some("  ".to_string()),
            relation: " SELF".to_string(),
            status: "A ".to_string(),
            employee_number: "E10001".to_string(),
            measure: None,
        };

        let rec = EnrollmentRecord::from(row);
        assert_eq!(rec.facility_key, "H3170");
        assert_eq!(rec.plan_code, "PRIMEMMSD");
        assert_eq!(rec.benefit_code, None); // blank collapses to absent
        assert_eq!(rec.relation, "SELF");
        assert_eq!(rec.status, "A");
    }
}
