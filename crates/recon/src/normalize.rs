//! Provider Normalizer.
//!
//! Maps a raw carrier string onto a canonical carrier identity using the
//! alias table. Matching is substring-based on the lower-cased, whitespace
//! collapsed input: `"Comcast Cable - Store 12"` contains `"comcast"` and so
//! normalizes. When several variants match, the longest wins; equal lengths
//! fall back to alias-table declaration order.
//!
//! Without an alias hit the first whitespace token of the cleaned string is
//! returned, so unknown carriers still compare consistently on both sides.

use std::fmt;

use serde::Serialize;

use crate::config::ProviderAlias;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CanonicalName(String);

impl CanonicalName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
struct AliasEntry {
    canonical: String,
    variant: String,
    variant_len: usize,
}

#[derive(Debug, Clone)]
pub struct ProviderNormalizer {
    entries: Vec<AliasEntry>,
}

/// Lower-case, trim and collapse internal whitespace.
pub fn clean(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl ProviderNormalizer {
    pub fn new(aliases: &[ProviderAlias]) -> Self {
        let mut entries = Vec::new();
        for alias in aliases {
            // The canonical spelling is itself a variant.
            let own = clean(&alias.canonical);
            let variants = std::iter::once(own).chain(alias.variants.iter().map(|v| clean(v)));
            for variant in variants {
                if variant.is_empty() {
                    continue;
                }
                entries.push(AliasEntry {
                    canonical: alias.canonical.clone(),
                    variant_len: variant.chars().count(),
                    variant,
                });
            }
        }
        Self { entries }
    }

    /// Canonical identity from the alias table only, without the token fallback.
    pub fn alias_match(&self, raw: &str) -> Option<&str> {
        let cleaned = clean(raw);
        if cleaned.is_empty() {
            return None;
        }
        self.best_alias(&cleaned)
    }

    pub fn normalize(&self, raw: &str) -> Option<CanonicalName> {
        let cleaned = clean(raw);
        if cleaned.is_empty() {
            return None;
        }
        if let Some(canonical) = self.best_alias(&cleaned) {
            return Some(CanonicalName(canonical.to_string()));
        }
        cleaned
            .split_whitespace()
            .next()
            .map(|token| CanonicalName(token.to_string()))
    }

    fn best_alias(&self, cleaned: &str) -> Option<&str> {
        let mut best: Option<&AliasEntry> = None;
        for entry in &self.entries {
            if !cleaned.contains(entry.variant.as_str()) {
                continue;
            }
            // Strictly longer only: ties keep the earlier declaration.
            if best.map_or(true, |b| entry.variant_len > b.variant_len) {
                best = Some(entry);
            }
        }
        best.map(|e| e.canonical.as_str())
    }
}
