// 🎚️ Tier Normalizer - Raw benefit codes → coverage tiers
// The single most safety-critical rule in the engine: a code absent from
// the dictionary (including null) resolves to Tier::Unknown, NEVER to a
// populated tier. Defaulting unknowns into a real tier silently corrupts
// downstream counts ("tier collapse").

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// TIER
// ============================================================================

/// Coverage tier: who is covered under a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Employee only
    EeOnly,

    /// Employee + spouse
    EeSpouse,

    /// Employee + one child / one dependent
    EeChild,

    /// Employee + children
    EeChildren,

    /// Employee + family
    EeFamily,

    /// Code not in the dictionary - first-class, always-visible bucket
    Unknown,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::EeOnly => "EE Only",
            Tier::EeSpouse => "EE+Spouse",
            Tier::EeChild => "EE+Child",
            Tier::EeChildren => "EE+Child(ren)",
            Tier::EeFamily => "EE+Family",
            Tier::Unknown => "UNKNOWN",
        }
    }

    /// The populated tiers, in reporting order. Unknown is deliberately
    /// not part of this list: it is reported, never guessed into.
    pub const POPULATED: [Tier; 5] = [
        Tier::EeOnly,
        Tier::EeSpouse,
        Tier::EeChild,
        Tier::EeChildren,
        Tier::EeFamily,
    ];
}

// ============================================================================
// TIER NORMALIZER
// ============================================================================

/// Maps raw benefit codes to tiers via an explicit, exhaustive dictionary.
///
/// Matching is exact (after trim + uppercase). No fuzzy matching, no
/// substring rules: every accepted spelling is an explicit entry.
pub struct TierNormalizer {
    dictionary: BTreeMap<String, Tier>,
}

impl TierNormalizer {
    /// Create a normalizer seeded with the benefit codes and spelled-out
    /// variants observed in source data.
    pub fn new() -> Self {
        let mut normalizer = TierNormalizer {
            dictionary: BTreeMap::new(),
        };

        normalizer.register_default_codes();
        normalizer
    }

    /// Create a normalizer from a caller-supplied dictionary.
    pub fn from_dictionary<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Tier)>,
        S: AsRef<str>,
    {
        let mut normalizer = TierNormalizer {
            dictionary: BTreeMap::new(),
        };
        for (code, tier) in entries {
            normalizer.register(code.as_ref(), tier);
        }
        normalizer
    }

    /// Carrier BEN CODE values plus the long-form spellings that appear in
    /// older extracts. Each is an exact entry, uppercase.
    fn register_default_codes(&mut self) {
        // Primary carrier codes
        self.register("EMP", Tier::EeOnly);
        self.register("ESP", Tier::EeSpouse);
        self.register("E1D", Tier::EeChild);
        self.register("ECH", Tier::EeChildren);
        self.register("FAM", Tier::EeFamily);

        // Employee-only spellings
        self.register("EE", Tier::EeOnly);
        self.register("EE ONLY", Tier::EeOnly);
        self.register("EMPLOYEE", Tier::EeOnly);
        self.register("EMPLOYEE ONLY", Tier::EeOnly);
        self.register("EMP ONLY", Tier::EeOnly);

        // Employee + spouse spellings
        self.register("EE+SPOUSE", Tier::EeSpouse);
        self.register("EE SPOUSE", Tier::EeSpouse);
        self.register("EMPLOYEE SPOUSE", Tier::EeSpouse);
        self.register("EMP SPOUSE", Tier::EeSpouse);

        // Employee + one dependent spellings
        self.register("EE+1 DEP", Tier::EeChild);
        self.register("EE+CHILD", Tier::EeChild);
        self.register("EE CHILD", Tier::EeChild);

        // Employee + children spellings
        self.register("EE+CHILD(REN)", Tier::EeChildren);
        self.register("EE+CHILDREN", Tier::EeChildren);
        self.register("EE CHILDREN", Tier::EeChildren);
        self.register("EMPLOYEE CHILDREN", Tier::EeChildren);

        // Family spellings
        self.register("EE+FAMILY", Tier::EeFamily);
        self.register("EE FAMILY", Tier::EeFamily);
        self.register("EMPLOYEE FAMILY", Tier::EeFamily);
        self.register("FAMILY", Tier::EeFamily);
    }

    /// Add a dictionary entry (stored uppercase, exact-match).
    pub fn register(&mut self, raw_code: &str, tier: Tier) {
        self.dictionary
            .insert(raw_code.trim().to_uppercase(), tier);
    }

    /// Normalize a raw benefit code to a tier. Total: always returns a
    /// value. Absent/empty/unrecognized codes resolve to Tier::Unknown.
    pub fn normalize(&self, raw_code: Option<&str>) -> Tier {
        let code = match raw_code {
            Some(c) => c.trim().to_uppercase(),
            None => return Tier::Unknown,
        };

        if code.is_empty() {
            return Tier::Unknown;
        }

        self.dictionary.get(&code).copied().unwrap_or(Tier::Unknown)
    }

    pub fn dictionary_size(&self) -> usize {
        self.dictionary.len()
    }
}

impl Default for TierNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
