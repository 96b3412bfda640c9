// 🗺️ Facility & Plan Mapping - Raw keys → canonical values
// Pure lookups against caller-supplied, read-only tables. A lookup miss is
// a first-class, recorded outcome (missing flag + sentinel), never an error:
// one bad row must not abort a multi-thousand-row batch.

use crate::records::{EnrichedRecord, EnrollmentRecord};
use crate::tier::TierNormalizer;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

// ============================================================================
// PLAN CATEGORY
// ============================================================================

/// Coarse plan grouping used for summary reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PlanCategory {
    Epo,
    Ppo,
    Value,

    /// Definitive table miss with no heuristic hit - sentinel, still counted
    Other,

    /// Raw plan code absent/empty
    Unknown,
}

impl PlanCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanCategory::Epo => "EPO",
            PlanCategory::Ppo => "PPO",
            PlanCategory::Value => "VALUE",
            PlanCategory::Other => "OTHER",
            PlanCategory::Unknown => "UNKNOWN",
        }
    }

    /// Parse a canonical label from a mapping table ("EPO", "PPO", "VALUE").
    /// Anything else is Other: the table said something, it just isn't one
    /// of the tracked categories.
    pub fn from_label(label: &str) -> PlanCategory {
        match label.trim().to_uppercase().as_str() {
            "EPO" => PlanCategory::Epo,
            "PPO" => PlanCategory::Ppo,
            "VALUE" => PlanCategory::Value,
            _ => PlanCategory::Other,
        }
    }
}

// ============================================================================
// FACILITY MAP
// ============================================================================

/// Canonical facility values for one raw key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilityEntry {
    pub name: String,
    pub id: String,
}

/// Read-only facility key → canonical name/id table.
/// Keys are compared case-sensitively, exactly as supplied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FacilityMap {
    entries: BTreeMap<String, FacilityEntry>,
}

impl FacilityMap {
    pub fn new() -> Self {
        FacilityMap {
            entries: BTreeMap::new(),
        }
    }

    /// Load from a JSON object: {"H3170": {"name": "...", "id": "..."}}
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read facility map: {:?}", path.as_ref()))?;

        let entries: BTreeMap<String, FacilityEntry> =
            serde_json::from_str(&content).context("Failed to parse facility map JSON")?;

        Ok(FacilityMap { entries })
    }

    pub fn insert(&mut self, raw_key: &str, name: &str, id: &str) {
        self.entries.insert(
            raw_key.to_string(),
            FacilityEntry {
                name: name.to_string(),
                id: id.to_string(),
            },
        );
    }

    pub fn get(&self, raw_key: &str) -> Option<&FacilityEntry> {
        self.entries.get(raw_key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// PLAN MAP
// ============================================================================

/// Read-only plan code → category table. Same exact-key contract as
/// FacilityMap.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanMap {
    entries: BTreeMap<String, PlanCategory>,
}

impl PlanMap {
    pub fn new() -> Self {
        PlanMap {
            entries: BTreeMap::new(),
        }
    }

    /// Load from a JSON object: {"PRIMEMMSD": "EPO", "PRIMEMMLMRI": "VALUE"}
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read plan map: {:?}", path.as_ref()))?;

        let raw: BTreeMap<String, String> =
            serde_json::from_str(&content).context("Failed to parse plan map JSON")?;

        let mut map = PlanMap::new();
        for (code, label) in raw {
            map.entries.insert(code, PlanCategory::from_label(&label));
        }
        Ok(map)
    }

    pub fn insert(&mut self, raw_code: &str, category: PlanCategory) {
        self.entries.insert(raw_code.to_string(), category);
    }

    pub fn get(&self, raw_code: &str) -> Option<PlanCategory> {
        self.entries.get(raw_code).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// PLAN CATEGORY RULES
// ============================================================================

/// One substring fallback rule. Applied only after a definitive table miss;
/// ambiguous codes resolve to the FIRST matching rule in list order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRule {
    /// Substring to look for in the uppercased raw code
    pub needle: String,

    /// Category assigned when the needle is found
    pub category: PlanCategory,
}

/// Default fallback order: EPO before VALUE before PPO. Order is policy,
/// not an accident - callers with different source schemas supply their own
/// list.
pub fn default_plan_rules() -> Vec<PlanRule> {
    vec![
        PlanRule {
            needle: "EPO".to_string(),
            category: PlanCategory::Epo,
        },
        PlanRule {
            needle: "VALUE".to_string(),
            category: PlanCategory::Value,
        },
        PlanRule {
            needle: "VAL".to_string(),
            category: PlanCategory::Value,
        },
        PlanRule {
            needle: "PPO".to_string(),
            category: PlanCategory::Ppo,
        },
    ]
}

// ============================================================================
// LOOKUP RESULTS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct FacilityLookup {
    pub name: String,
    pub id: String,
    pub missing: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanLookup {
    pub category: PlanCategory,
    pub missing: bool,
}

// ============================================================================
// FACILITY / PLAN MAPPER
// ============================================================================

/// Resolves raw facility keys and plan codes against the injected tables.
/// Holds no table state itself: tables are read-only arguments for the
/// duration of a run, which keeps partitioned aggregation safe.
pub struct FacilityPlanMapper {
    plan_rules: Vec<PlanRule>,
}

impl FacilityPlanMapper {
    pub fn new() -> Self {
        FacilityPlanMapper {
            plan_rules: default_plan_rules(),
        }
    }

    pub fn with_plan_rules(plan_rules: Vec<PlanRule>) -> Self {
        FacilityPlanMapper { plan_rules }
    }

    /// Exact lookup of a raw facility key. On a miss the raw key itself is
    /// the sentinel name/id, so the bucket stays visible and attributable
    /// in aggregated output instead of the row being dropped.
    pub fn map_facility(&self, raw_key: &str, facility_map: &FacilityMap) -> FacilityLookup {
        match facility_map.get(raw_key) {
            Some(entry) => FacilityLookup {
                name: entry.name.clone(),
                id: entry.id.clone(),
                missing: false,
            },
            None => FacilityLookup {
                name: raw_key.to_string(),
                id: raw_key.to_string(),
                missing: true,
            },
        }
    }

    /// Resolve a plan code. Precedence is a fixed, ordered rule list:
    ///   1. exact table match
    ///   2. substring heuristic (first rule wins)
    ///   3. Other
    /// The missing flag reflects the table lookup alone - a heuristic hit
    /// is still a recorded miss.
    pub fn map_plan(&self, raw_code: &str, plan_map: &PlanMap) -> PlanLookup {
        let code = raw_code.trim();

        if code.is_empty() {
            return PlanLookup {
                category: PlanCategory::Unknown,
                missing: true,
            };
        }

        if let Some(category) = plan_map.get(code) {
            return PlanLookup {
                category,
                missing: false,
            };
        }

        let upper = code.to_uppercase();
        for rule in &self.plan_rules {
            if upper.contains(&rule.needle) {
                return PlanLookup {
                    category: rule.category,
                    missing: true,
                };
            }
        }

        PlanLookup {
            category: PlanCategory::Other,
            missing: true,
        }
    }

    /// Enrich one record: facility + plan lookups and tier normalization.
    /// Pure and per-row independent; the original row is retained.
    pub fn enrich(
        &self,
        record: &EnrollmentRecord,
        facility_map: &FacilityMap,
        plan_map: &PlanMap,
        normalizer: &TierNormalizer,
    ) -> EnrichedRecord {
        let facility = self.map_facility(&record.facility_key, facility_map);
        let plan = self.map_plan(&record.plan_code, plan_map);
        let tier = normalizer.normalize(record.benefit_code.as_deref());

        EnrichedRecord {
            record: record.clone(),
            facility_name: facility.name,
            facility_id: facility.id,
            plan_category: plan.category,
            tier,
            missing_facility_flag: facility.missing,
            missing_plan_flag: plan.missing,
        }
    }

    /// Enrich a batch, preserving input order.
    pub fn enrich_all(
        &self,
        records: &[EnrollmentRecord],
        facility_map: &FacilityMap,
        plan_map: &PlanMap,
        normalizer: &TierNormalizer,
    ) -> Vec<EnrichedRecord> {
        records
            .iter()
            .map(|r| self.enrich(r, facility_map, plan_map, normalizer))
            .collect()
    }
}

impl Default for FacilityPlanMapper {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::Tier;

    fn create_test_facility_map() -> FacilityMap {
        let mut map = FacilityMap::new();
        map.insert("H3170", "San Dimas Community Hospital", "H3170");
        map.insert("H3270", "Centinela Hospital Medical Center", "H3270");
        map
    }

    fn create_test_plan_map() -> PlanMap {
        let mut map = PlanMap::new();
        map.insert("PRIMEMMSD", PlanCategory::Epo);
        map.insert("PRIMEMMLMRI", PlanCategory::Value);
        map.insert("PRIMEMMELPOS", PlanCategory::Ppo);
        map
    }

    #[test]
    fn test_facility_exact_match() {
        let mapper = FacilityPlanMapper::new();
        let map = create_test_facility_map();

        let lookup = mapper.map_facility("H3170", &map);
        assert_eq!(lookup.name, "San Dimas Community Hospital");
        assert_eq!(lookup.id, "H3170");
        assert!(!lookup.missing);
    }

    #[test]
    fn test_facility_miss_is_flagged_not_dropped() {
        let mapper = FacilityPlanMapper::new();
        let map = create_test_facility_map();

        let lookup = mapper.map_facility("ZZZZ", &map);
        assert!(lookup.missing);
        // Sentinel keeps the raw key so the bucket stays attributable
        assert_eq!(lookup.name, "ZZZZ");
        assert_eq!(lookup.id, "ZZZZ");
    }

    #[test]
    fn test_facility_keys_are_case_sensitive() {
        let mapper = FacilityPlanMapper::new();
        let map = create_test_facility_map();

        assert!(mapper.map_facility("h3170", &map).missing);
    }

    #[test]
    fn test_plan_exact_match_beats_heuristic() {
        let mapper = FacilityPlanMapper::new();
        let mut map = create_test_plan_map();
        // Table says VALUE even though the code contains "EPO"
        map.insert("EPOLEGACY", PlanCategory::Value);

        let lookup = mapper.map_plan("EPOLEGACY", &map);
        assert_eq!(lookup.category, PlanCategory::Value);
        assert!(!lookup.missing);
    }

    #[test]
    fn test_plan_substring_fallback_on_table_miss() {
        let mapper = FacilityPlanMapper::new();
        let map = create_test_plan_map();

        let epo = mapper.map_plan("PRIMEMMEPOLE2", &map);
        assert_eq!(epo.category, PlanCategory::Epo);
        assert!(epo.missing); // heuristic hit is still a recorded miss

        let value = mapper.map_plan("NEWVALPLAN", &map);
        assert_eq!(value.category, PlanCategory::Value);
        assert!(value.missing);
    }

    #[test]
    fn test_ambiguous_code_resolves_to_first_rule() {
        // Contains both EPO and VAL; default order puts EPO first.
        let mapper = FacilityPlanMapper::new();
        let map = PlanMap::new();

        let lookup = mapper.map_plan("EPOVALX", &map);
        assert_eq!(lookup.category, PlanCategory::Epo);
    }

    #[test]
    fn test_plan_miss_without_heuristic_is_other() {
        let mapper = FacilityPlanMapper::new();
        let map = create_test_plan_map();

        let lookup = mapper.map_plan("MYSTERYPLAN", &map);
        assert_eq!(lookup.category, PlanCategory::Other);
        assert!(lookup.missing);
    }

    #[test]
    fn test_empty_plan_code_is_unknown() {
        let mapper = FacilityPlanMapper::new();
        let map = create_test_plan_map();

        let lookup = mapper.map_plan("  ", &map);
        assert_eq!(lookup.category, PlanCategory::Unknown);
        assert!(lookup.missing);
    }

    #[test]
    fn test_custom_rule_order_is_respected() {
        let mapper = FacilityPlanMapper::with_plan_rules(vec![
            PlanRule {
                needle: "VAL".to_string(),
                category: PlanCategory::Value,
            },
            PlanRule {
                needle: "EPO".to_string(),
                category: PlanCategory::Epo,
            },
        ]);
        let map = PlanMap::new();

        // Same ambiguous code, VALUE-first policy
        let lookup = mapper.map_plan("EPOVALX", &map);
        assert_eq!(lookup.category, PlanCategory::Value);
    }

    #[test]
    fn test_enrich_sets_flags_iff_lookup_missed() {
        let mapper = FacilityPlanMapper::new();
        let facility_map = create_test_facility_map();
        let plan_map = create_test_plan_map();
        let normalizer = TierNormalizer::new();

        let mapped = EnrollmentRecord {
            facility_key: "H3170".to_string(),
            plan_code: "PRIMEMMSD".to_string(),
            benefit_code: Some("EMP".to_string()),
            relation: "SELF".to_string(),
            status: "A".to_string(),
            contract_id: "E1".to_string(),
            measure: None,
        };

        let enriched = mapper.enrich(&mapped, &facility_map, &plan_map, &normalizer);
        assert!(!enriched.missing_facility_flag);
        assert!(!enriched.missing_plan_flag);
        assert_eq!(enriched.tier, Tier::EeOnly);
        assert_eq!(enriched.plan_category, PlanCategory::Epo);
        assert_eq!(enriched.record, mapped); // original row preserved

        let unmapped = EnrollmentRecord {
            facility_key: "ZZZZ".to_string(),
            plan_code: "MYSTERYPLAN".to_string(),
            benefit_code: None,
            relation: "SELF".to_string(),
            status: "A".to_string(),
            contract_id: "E2".to_string(),
            measure: None,
        };

        let enriched = mapper.enrich(&unmapped, &facility_map, &plan_map, &normalizer);
        assert!(enriched.missing_facility_flag);
        assert!(enriched.missing_plan_flag);
        assert_eq!(enriched.tier, Tier::Unknown);
    }
}
