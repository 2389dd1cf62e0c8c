use std::collections::HashMap;
use log::{debug, warn};

use crate::relay::protocol::{Tick, ViewerReply};
use crate::relay::session::ViewerSession;
use crate::relay::symbol::Symbol;

/// Ticks of one upstream message grouped by symbol, arrival order kept.
#[derive(Debug, Default)]
pub struct TickBatches {
    by_symbol: HashMap<Symbol, Vec<Tick>>,
}

impl TickBatches {
    pub fn group(ticks: Vec<Tick>) -> Self {
        let mut by_symbol: HashMap<Symbol, Vec<Tick>> = HashMap::new();
        for tick in ticks {
            match Symbol::parse(&tick.symbol) {
                Some(symbol) => by_symbol.entry(symbol).or_default().push(tick),
                None => debug!("Skipping tick with blank symbol"),
            }
        }
        Self { by_symbol }
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&[Tick]> {
        self.by_symbol
            .get(symbol)
            .map(Vec::as_slice)
            .filter(|ticks| !ticks.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }

    pub fn symbol_count(&self) -> usize {
        self.by_symbol.len()
    }
}

/// Routes upstream traffic to viewer sessions without ever awaiting a send.
#[derive(Debug, Default)]
pub struct FanoutDispatcher;

impl FanoutDispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Sends each bound session the ticks for its symbol. Returns the number
    /// of sessions that accepted a batch.
    pub fn dispatch<'a, I>(&self, sessions: I, batches: &TickBatches) -> usize
    where
        I: IntoIterator<Item = &'a ViewerSession>,
    {
        if batches.is_empty() {
            return 0;
        }

        // Encode once per symbol, not once per viewer.
        let mut encoded: HashMap<&Symbol, Option<String>> = HashMap::new();
        let mut delivered = 0;

        for session in sessions {
            if !session.is_open() {
                continue;
            }
            let Some(symbol) = session.bound_symbol() else {
                continue;
            };
            let Some(ticks) = batches.get(symbol) else {
                continue;
            };

            let payload = encoded.entry(symbol).or_insert_with(|| {
                let reply = ViewerReply::Trade { data: ticks.to_vec() };
                serde_json::to_string(&reply)
                    .map_err(|e| warn!("Failed to encode trade batch for {}: {}", symbol, e))
                    .ok()
            });

            if let Some(payload) = payload {
                if session.send(payload.clone()) {
                    delivered += 1;
                }
            }
        }

        delivered
    }

    /// Forwards a raw message to every open session.
    pub fn broadcast<'a, I>(&self, sessions: I, raw: &str) -> usize
    where
        I: IntoIterator<Item = &'a ViewerSession>,
    {
        sessions
            .into_iter()
            .filter(|session| session.is_open())
            .filter(|session| session.send(raw.to_string()))
            .count()
    }
}
