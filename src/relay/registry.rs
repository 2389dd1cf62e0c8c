use std::collections::HashMap;
use log::{info, warn};

use crate::relay::symbol::Symbol;

/// Reference counts of viewers per symbol. A symbol has an entry exactly
/// while at least one viewer is bound to it; the caller forwards the
/// returned transitions to the upstream feed.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    counts: HashMap<Symbol, usize>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when this is the first viewer for `symbol`.
    pub fn acquire(&mut self, symbol: &Symbol) -> bool {
        let count = self.counts.entry(symbol.clone()).or_insert(0);
        *count += 1;

        if *count == 1 {
            info!("First viewer for symbol {}, subscribing upstream", symbol);
            true
        } else {
            false
        }
    }

    /// Returns `true` when the last viewer for `symbol` went away.
    pub fn release(&mut self, symbol: &Symbol) -> bool {
        let Some(count) = self.counts.get_mut(symbol) else {
            warn!("Release of symbol {} without a matching acquire", symbol);
            return false;
        };

        *count -= 1;
        if *count == 0 {
            self.counts.remove(symbol);
            info!("No viewers left for symbol {}, unsubscribing upstream", symbol);
            true
        } else {
            false
        }
    }

    /// Symbols that must be subscribed upstream, in stable order.
    pub fn resubscribe_all(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.counts.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn count(&self, symbol: &Symbol) -> usize {
        self.counts.get(symbol).copied().unwrap_or(0)
    }

    pub fn is_subscribed(&self, symbol: &Symbol) -> bool {
        self.counts.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, usize)> {
        self.counts.iter().map(|(symbol, count)| (symbol, *count))
    }
}
