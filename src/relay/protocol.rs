use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CommandError;
use crate::relay::symbol::Symbol;

/// A single trade print as delivered by the feed. Only `s` is required;
/// every other field (`p`, `t`, `v`, trade conditions) is kept as sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Decoded upstream payload.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamFrame {
    Trades(Vec<Tick>),
    /// Any other well-formed message, kept as the raw text.
    Passthrough(String),
}

impl UpstreamFrame {
    /// Returns `None` when the payload is not JSON at all.
    pub fn decode(raw: String) -> Option<Self> {
        let mut value: Value = serde_json::from_str(&raw).ok()?;

        if value.get("type").and_then(Value::as_str) == Some("trade") {
            if let Some(Value::Array(items)) = value.get_mut("data").map(Value::take) {
                let ticks = items
                    .into_iter()
                    .filter_map(|item| serde_json::from_value::<Tick>(item).ok())
                    .collect();
                return Some(UpstreamFrame::Trades(ticks));
            }
        }

        Some(UpstreamFrame::Passthrough(raw))
    }
}

/// Commands sent to the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UpstreamCommand {
    Subscribe { symbol: Symbol },
    Unsubscribe { symbol: Symbol },
}

/// Commands a viewer may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerCommand {
    SetSymbol(Symbol),
}

impl ViewerCommand {
    pub fn decode(raw: &str) -> Result<Self, CommandError> {
        let value: Value = serde_json::from_str(raw).map_err(|_| CommandError::InvalidMessage)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(CommandError::InvalidMessage)?;

        match kind {
            "setSymbol" => {
                let requested = match value.get("symbol") {
                    Some(Value::String(symbol)) => symbol.clone(),
                    Some(Value::Number(number)) => number.to_string(),
                    _ => String::new(),
                };
                Symbol::parse(&requested)
                    .map(ViewerCommand::SetSymbol)
                    .ok_or(CommandError::SymbolRequired)
            }
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }
}

/// Messages the relay sends to a viewer (passthrough frames excepted, those
/// are forwarded as raw text).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ViewerReply {
    Status { ok: bool, symbol: Symbol },
    Error { msg: String },
    Trade { data: Vec<Tick> },
}

impl ViewerReply {
    pub fn bound(symbol: Symbol) -> Self {
        ViewerReply::Status { ok: true, symbol }
    }

    pub fn rejected(err: &CommandError) -> Self {
        ViewerReply::Error { msg: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_trade_batch() {
        let raw = r#"{"type":"trade","data":[
            {"s":"NVDA","p":120.5,"t":1700000000000,"v":10},
            {"s":"AAPL","p":190.1,"t":1700000000001,"v":5,"c":["1","12"]}
        ]}"#;

        match UpstreamFrame::decode(raw.to_string()) {
            Some(UpstreamFrame::Trades(ticks)) => {
                assert_eq!(ticks.len(), 2);
                assert_eq!(ticks[0].symbol, "NVDA");
                assert_eq!(ticks[0].fields.get("p"), Some(&json!(120.5)));
                assert_eq!(ticks[0].fields.get("v"), Some(&json!(10)));
                assert_eq!(ticks[1].fields.get("c"), Some(&json!(["1", "12"])));
            }
            other => panic!("expected trades, got {:?}", other),
        }
    }

    #[test]
    fn test_ticks_without_symbol_are_skipped() {
        let raw = r#"{"type":"trade","data":[{"p":1.0,"t":1},null,{"s":7,"p":2.0},{"s":"MSFT","p":400.0,"t":2}]}"#;

        let Some(UpstreamFrame::Trades(ticks)) = UpstreamFrame::decode(raw.to_string()) else {
            panic!("expected trades");
        };
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].symbol, "MSFT");
        assert_eq!(ticks[0].fields.get("v"), None);
    }

    #[test]
    fn test_tick_fields_are_forwarded_as_sent() {
        let raw = r#"{"type":"trade","data":[
            {"s":"X","p":100,"t":1700000000000,"v":10},
            {"s":"X","t":2},
            {"s":"X","p":"2","t":3}
        ]}"#;

        let Some(UpstreamFrame::Trades(ticks)) = UpstreamFrame::decode(raw.to_string()) else {
            panic!("expected trades");
        };
        assert_eq!(ticks.len(), 3);

        let reply = serde_json::to_string(&ViewerReply::Trade { data: ticks }).unwrap();
        assert!(!reply.contains("100.0"));

        let value: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(
            value,
            json!({"type": "trade", "data": [
                {"s": "X", "p": 100, "t": 1700000000000u64, "v": 10},
                {"s": "X", "t": 2},
                {"s": "X", "p": "2", "t": 3}
            ]})
        );
    }

    #[test]
    fn test_non_trade_messages_pass_through_verbatim() {
        let ping = r#"{"type":"ping"}"#.to_string();
        assert_eq!(UpstreamFrame::decode(ping.clone()), Some(UpstreamFrame::Passthrough(ping)));

        let not_array = r#"{"type":"trade","data":"oops"}"#.to_string();
        assert_eq!(
            UpstreamFrame::decode(not_array.clone()),
            Some(UpstreamFrame::Passthrough(not_array))
        );
    }

    #[test]
    fn test_malformed_upstream_payload_is_dropped() {
        assert_eq!(UpstreamFrame::decode("{not json".to_string()), None);
        assert_eq!(UpstreamFrame::decode(String::new()), None);
    }

    #[test]
    fn test_upstream_command_wire_format() {
        let subscribe = UpstreamCommand::Subscribe { symbol: Symbol::parse("nvda").unwrap() };
        assert_eq!(
            serde_json::to_value(&subscribe).unwrap(),
            json!({"type": "subscribe", "symbol": "NVDA"})
        );

        let unsubscribe = UpstreamCommand::Unsubscribe { symbol: Symbol::parse("NVDA").unwrap() };
        assert_eq!(
            serde_json::to_value(&unsubscribe).unwrap(),
            json!({"type": "unsubscribe", "symbol": "NVDA"})
        );
    }

    #[test]
    fn test_decode_set_symbol() {
        let command = ViewerCommand::decode(r#"{"type":"setSymbol","symbol":" nvda "}"#).unwrap();
        assert_eq!(command, ViewerCommand::SetSymbol(Symbol::parse("NVDA").unwrap()));
    }

    #[test]
    fn test_numeric_symbol_is_stringified() {
        let command = ViewerCommand::decode(r#"{"type":"setSymbol","symbol":123}"#).unwrap();
        assert_eq!(command, ViewerCommand::SetSymbol(Symbol::parse("123").unwrap()));
    }

    #[test]
    fn test_viewer_command_errors() {
        assert_eq!(
            ViewerCommand::decode(r#"{"type":"setSymbol","symbol":""}"#),
            Err(CommandError::SymbolRequired)
        );
        assert_eq!(
            ViewerCommand::decode(r#"{"type":"setSymbol"}"#),
            Err(CommandError::SymbolRequired)
        );
        assert_eq!(
            ViewerCommand::decode(r#"{"type":"setSymbol","symbol":null}"#),
            Err(CommandError::SymbolRequired)
        );
        assert_eq!(ViewerCommand::decode("hello"), Err(CommandError::InvalidMessage));
        assert_eq!(ViewerCommand::decode(r#"{"symbol":"NVDA"}"#), Err(CommandError::InvalidMessage));
        assert_eq!(
            ViewerCommand::decode(r#"{"type":"subscribe","symbol":"NVDA"}"#),
            Err(CommandError::UnknownCommand("subscribe".to_string()))
        );
    }

    #[test]
    fn test_viewer_reply_wire_format() {
        let status = ViewerReply::bound(Symbol::parse("nvda").unwrap());
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({"type": "status", "ok": true, "symbol": "NVDA"})
        );

        let error = ViewerReply::rejected(&CommandError::SymbolRequired);
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({"type": "error", "msg": "symbol required"})
        );
    }
}
