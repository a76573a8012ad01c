//! Token to canonical-name synonym index.

use crate::types::{normalize_token, NameSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maps vocabulary tokens to the canonical names they may refer to.
///
/// The index only ever grows: `known` is append-only and a name that is
/// already known is never reported by [`SynonymIndex::diff`] again. Every
/// name stored under a token is also a member of `known`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynonymIndex {
    #[serde(default)]
    entries: BTreeMap<String, NameSet>,
    #[serde(default)]
    known: NameSet,
}

impl SynonymIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical names reachable from `token`; empty when the token is unknown.
    pub fn lookup(&self, token: &str) -> NameSet {
        normalize_token(token)
            .and_then(|key| self.entries.get(&key).cloned())
            .unwrap_or_default()
    }

    /// Names from `candidates` that have not been indexed yet, deduplicated
    /// and in lexicographic order.
    pub fn diff<I, S>(&self, candidates: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fresh: NameSet = candidates
            .into_iter()
            .map(|name| name.as_ref().to_string())
            .filter(|name| !name.is_empty() && !self.known.contains(name))
            .collect();
        fresh.to_sorted_vec()
    }

    /// Indexes `name` under its own normalized form and every synonym.
    pub fn merge<I, S>(&mut self, name: &str, synonyms: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.known.add(name);
        let tokens = std::iter::once(name.to_string())
            .chain(synonyms.into_iter().map(|s| s.as_ref().to_string()))
            .filter_map(|raw| normalize_token(&raw));
        for token in tokens {
            self.entries.entry(token).or_default().add(name);
        }
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.known.contains(name)
    }

    pub fn known(&self) -> &NameSet {
        &self.known
    }

    /// Number of indexed canonical names.
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Number of distinct lookup tokens.
    pub fn token_count(&self) -> usize {
        self.entries.len()
    }
}
