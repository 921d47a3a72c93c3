use crate::models::{SearchFilters, SearchScope, SenderOption};

/// Composite key that decides whether sender facets must be refetched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FacetKey {
    pub account: String,
    pub scope: SearchScope,
    pub query: String,
    pub filters: SearchFilters,
}

/// Last fetched sender facets and the key they were fetched for.
#[derive(Debug, Clone, Default)]
pub struct FacetCache {
    entry: Option<(FacetKey, Vec<SenderOption>)>,
}

impl FacetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached senders when `key` matches the last fetch.
    pub fn get(&self, key: &FacetKey) -> Option<&[SenderOption]> {
        self.entry
            .as_ref()
            .filter(|(cached, _)| cached == key)
            .map(|(_, senders)| senders.as_slice())
    }

    pub fn store(&mut self, key: FacetKey, senders: Vec<SenderOption>) {
        self.entry = Some((key, senders));
    }

    pub fn clear(&mut self) {
        self.entry = None;
    }
}
