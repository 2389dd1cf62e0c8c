//! Market-data fan-out relay: one upstream trade feed, many viewers, each
//! bound to a single symbol, with reference-counted upstream subscriptions.

pub mod api;
pub mod config;
pub mod error;
pub mod relay;
pub mod websocket;
