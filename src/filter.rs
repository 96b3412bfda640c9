// 👥 Membership Filter - Raw rows → billable subscriber rows
// Reduces the per-member row set to one row per contract: status and
// relation must both be in configured allow-sets (dependents and
// terminated enrollments are excluded, and tallied rather than lost).

use crate::records::EnrollmentRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

// ============================================================================
// FILTER POLICY
// ============================================================================

/// Declarative status/relation allow-sets. Configuration, not constants:
/// the same filter serves different source schemas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPolicy {
    /// Statuses counted as billable (stored uppercase)
    pub status_allowlist: BTreeSet<String>,

    /// Relations counted as the subscriber role (stored uppercase)
    pub relation_allowlist: BTreeSet<String>,
}

impl FilterPolicy {
    pub fn new<S, R>(statuses: S, relations: R) -> Self
    where
        S: IntoIterator,
        S::Item: AsRef<str>,
        R: IntoIterator,
        R::Item: AsRef<str>,
    {
        FilterPolicy {
            status_allowlist: statuses
                .into_iter()
                .map(|s| s.as_ref().trim().to_uppercase())
                .collect(),
            relation_allowlist: relations
                .into_iter()
                .map(|r| r.as_ref().trim().to_uppercase())
                .collect(),
        }
    }

    /// The policy used for carrier extracts: active + COBRA statuses,
    /// subscriber-role relations only (never spouse/child/dependent).
    pub fn default_subscriber_policy() -> Self {
        FilterPolicy::new(
            ["A", "ACTIVE", "ACT", "C", "COBRA", "COB"],
            ["SELF", "EE", "EMPLOYEE", "SUBSCRIBER", "SUB", "EMP", "S"],
        )
    }

    pub fn allows_status(&self, raw: &str) -> bool {
        self.status_allowlist.contains(&raw.trim().to_uppercase())
    }

    pub fn allows_relation(&self, raw: &str) -> bool {
        self.relation_allowlist.contains(&raw.trim().to_uppercase())
    }
}

// ============================================================================
// FILTER OUTCOME
// ============================================================================

/// Selected subscriber rows plus tallies for every exclusion path.
/// Nothing leaves the filter without a trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterOutcome {
    /// Billable subscriber rows, in input order
    pub selected: Vec<EnrollmentRecord>,

    /// Rows missing status or relation entirely
    pub malformed: usize,

    /// Rows whose status was outside the allowlist
    pub excluded_status: usize,

    /// Active rows whose relation was outside the allowlist (dependents)
    pub excluded_relation: usize,

    /// Repeat (facility, contract, plan) rows dropped after the first
    pub excluded_duplicate: usize,
}

impl FilterOutcome {
    pub fn total_excluded(&self) -> usize {
        self.malformed + self.excluded_status + self.excluded_relation + self.excluded_duplicate
    }
}

// ============================================================================
// MEMBERSHIP FILTER
// ============================================================================

pub struct MembershipFilter {
    policy: FilterPolicy,
}

impl MembershipFilter {
    pub fn new(policy: FilterPolicy) -> Self {
        MembershipFilter { policy }
    }

    pub fn policy(&self) -> &FilterPolicy {
        &self.policy
    }

    /// Select billable subscriber rows. Decision order per row:
    ///   1. malformed (missing status/relation) → excluded, tallied
    ///   2. status outside allowlist → excluded, tallied
    ///   3. relation outside allowlist → excluded, tallied
    ///   4. repeated (facility, contract, plan) → excluded, tallied
    /// Input order is preserved; rows are never mutated.
    pub fn select_subscribers(&self, records: &[EnrollmentRecord]) -> FilterOutcome {
        let mut outcome = FilterOutcome {
            selected: Vec::new(),
            malformed: 0,
            excluded_status: 0,
            excluded_relation: 0,
            excluded_duplicate: 0,
        };

        let mut seen_contracts: HashSet<(String, String, String)> = HashSet::new();

        for record in records {
            if record.is_malformed() {
                outcome.malformed += 1;
                continue;
            }

            if !self.policy.allows_status(&record.status) {
                outcome.excluded_status += 1;
                continue;
            }

            if !self.policy.allows_relation(&record.relation) {
                outcome.excluded_relation += 1;
                continue;
            }

            // One row per contract per plan: keep first occurrence
            let key = (
                record.facility_key.clone(),
                record.contract_id.clone(),
                record.plan_code.clone(),
            );
            if !record.contract_id.trim().is_empty() && !seen_contracts.insert(key) {
                outcome.excluded_duplicate += 1;
                continue;
            }

            outcome.selected.push(record.clone());
        }

        outcome
    }
}

// ============================================================================
// TESTS
// ============================================================================
