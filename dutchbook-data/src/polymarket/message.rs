//! Polymarket CLOB WebSocket message models.
//!
//! The market channel publishes full books per outcome token. Prices and
//! sizes arrive as decimal strings and are parsed exactly; levels that fail
//! to parse are dropped rather than defaulted.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A book event for one outcome token.
///
/// ### Raw payload
/// ```json
/// {
///   "event_type": "book",
///   "asset_id": "65818619657568813474341868652308942079804919287380422192892211131408793125422",
///   "market": "0xbd31dc8a20211944f6b70f31557f1001557b59905b7738480ca09bd4532f84af",
///   "timestamp": "1706313600000",
///   "bids": [{ "price": "0.45", "size": "100.5" }],
///   "asks": [{ "price": "0.46", "size": "150" }]
/// }
/// ```
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct PolymarketBookEvent {
    #[serde(default)]
    pub event_type: Option<String>,
    pub asset_id: String,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default, deserialize_with = "de_opt_u64_from_string")]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub bids: Vec<PolymarketLevel>,
    #[serde(default)]
    pub asks: Vec<PolymarketLevel>,
}

/// A single price level with string-decimal fields.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct PolymarketLevel {
    pub price: String,
    pub size: String,
}

impl PolymarketLevel {
    pub fn price_decimal(&self) -> Option<Decimal> {
        self.price.parse().ok()
    }

    pub fn size_decimal(&self) -> Option<Decimal> {
        self.size.parse().ok()
    }
}

/// The market channel wraps book events in arrays; single objects also occur.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize)]
#[serde(untagged)]
pub enum PolymarketMessage {
    Batch(Vec<PolymarketBookEvent>),
    Single(PolymarketBookEvent),
}

impl PolymarketMessage {
    /// Flatten into the contained book events.
    pub fn into_events(self) -> Vec<PolymarketBookEvent> {
        match self {
            PolymarketMessage::Batch(events) => events,
            PolymarketMessage::Single(event) => vec![event],
        }
    }
}

/// Timestamps arrive as strings or numbers depending on the event type.
fn de_opt_u64_from_string<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Num(n)) => Some(n),
        Some(Raw::Text(s)) => s.parse().ok(),
        None => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_book_event_deserialization() {
        let input = r#"
        {
            "event_type": "book",
            "asset_id": "0xabc",
            "market": "0xcond",
            "timestamp": "1706313600000",
            "bids": [{ "price": "0.45", "size": "100.5" }],
            "asks": [{ "price": "0.46", "size": "150" }]
        }
        "#;

        let event: PolymarketBookEvent = serde_json::from_str(input).unwrap();
        assert_eq!(event.asset_id, "0xabc");
        assert_eq!(event.timestamp, Some(1706313600000));
        assert_eq!(event.bids[0].price_decimal(), Some(dec!(0.45)));
        assert_eq!(event.asks[0].size_decimal(), Some(dec!(150)));
    }

    #[test]
    fn test_batch_message() {
        let input = r#"
        [
            { "event_type": "book", "asset_id": "0xa", "bids": [], "asks": [] },
            { "event_type": "book", "asset_id": "0xb", "bids": [], "asks": [] }
        ]
        "#;

        let msg: PolymarketMessage = serde_json::from_str(input).unwrap();
        let events = msg.into_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].asset_id, "0xb");
    }

    #[test]
    fn test_unparseable_level_yields_none() {
        let level = PolymarketLevel {
            price: "not-a-price".to_string(),
            size: "100".to_string(),
        };
        assert!(level.price_decimal().is_none());
        assert_eq!(level.size_decimal(), Some(dec!(100)));
    }
}
