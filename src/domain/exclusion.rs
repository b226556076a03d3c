//! Symbols temporarily held out of the random walk.

use std::collections::BTreeSet;

use super::price::Symbol;

/// Set of symbols the batch executor must skip.
///
/// Only explicit exclude/include calls mutate it. Ticks work on a
/// cloned snapshot taken when the tick begins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    symbols: BTreeSet<Symbol>,
}

impl ExclusionSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclude `symbol`. Returns `true` if it was not excluded before.
    pub fn exclude(&mut self, symbol: &str) -> bool {
        self.symbols.insert(symbol.to_string())
    }

    /// Re-include `symbol`. Returns `true` if it had been excluded.
    pub fn include(&mut self, symbol: &str) -> bool {
        self.symbols.remove(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.contains(symbol)
    }

    /// Excluded symbols in sorted order.
    pub fn list(&self) -> Vec<Symbol> {
        self.symbols.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
