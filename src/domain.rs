// ===============================
// src/domain.rs
// ===============================
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Order event as published by the order service on `order_events`.
/// Payload is untrusted: everything except `id` is optional and extra
/// fields (product_id, status, ...) are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderEvent {
    pub id: i64,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: u64,
    pub order_id: i64,
    pub amount: f64,
    pub status: PaymentStatus,
    pub method: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("body is not valid UTF-8")]
    NotUtf8,
    #[error("malformed JSON: {0}")]
    Malformed(String),
    #[error("invalid order event: {0}")]
    Invalid(String),
}

impl OrderEvent {
    /// Parse a raw broker body. Shape errors and out-of-range values are
    /// both `ParseError`: such a message can never be processed.
    pub fn parse(body: &[u8]) -> Result<Self, ParseError> {
        let txt = std::str::from_utf8(body).map_err(|_| ParseError::NotUtf8)?;
        let ev: OrderEvent = serde_json::from_str(txt).map_err(|e| {
            if e.is_data() {
                ParseError::Invalid(e.to_string())
            } else {
                ParseError::Malformed(e.to_string())
            }
        })?;
        ev.validate()?;
        Ok(ev)
    }

    fn validate(&self) -> Result<(), ParseError> {
        if let Some(q) = self.quantity {
            if q < 0 {
                return Err(ParseError::Invalid(format!("negative quantity {q}")));
            }
        }
        if let Some(a) = self.amount {
            if !a.is_finite() || a < 0.0 {
                return Err(ParseError::Invalid(format!("bad amount {a}")));
            }
        }
        Ok(())
    }
}

/// Placeholder pricing used when an event carries no amount.
/// `unit_fallback_price` is NOT a real price lookup, it only keeps the
/// ledger populated until the product service exposes prices.
#[derive(Debug, Clone)]
pub struct AmountPolicy {
    pub unit_fallback_price: f64,
    pub default_method: String,
}

impl AmountPolicy {
    /// amount = explicit amount, else quantity (default 1) * fallback price.
    /// Zero counts as absent, same for an empty method.
    pub fn amount_for(&self, ev: &OrderEvent) -> f64 {
        match ev.amount {
            Some(a) if a > 0.0 => a,
            _ => {
                let qty = match ev.quantity {
                    Some(q) if q > 0 => q,
                    _ => 1,
                };
                qty as f64 * self.unit_fallback_price
            }
        }
    }

    pub fn method_for(&self, ev: &OrderEvent) -> String {
        match ev.payment_method.as_deref().map(str::trim) {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => self.default_method.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> AmountPolicy {
        AmountPolicy { unit_fallback_price: 50_000.0, default_method: "credit_card".into() }
    }

    #[test]
    fn parses_event_with_unknown_fields() {
        let ev = OrderEvent::parse(br#"{"id":7,"quantity":2,"payment_method":"upi","product_id":3,"status":"pending"}"#)
            .unwrap();
        assert_eq!(ev.id, 7);
        assert_eq!(ev.quantity, Some(2));
        assert_eq!(ev.amount, None);
    }

    #[test]
    fn rejects_garbage_and_wrong_shapes() {
        assert!(matches!(OrderEvent::parse(b"not json"), Err(ParseError::Malformed(_))));
        assert!(matches!(OrderEvent::parse(br#"{"quantity":1}"#), Err(ParseError::Invalid(_))));
        assert!(matches!(OrderEvent::parse(br#"{"id":"seven"}"#), Err(ParseError::Invalid(_))));
        assert!(matches!(OrderEvent::parse(br#"{"id":1,"quantity":-2}"#), Err(ParseError::Invalid(_))));
        assert!(matches!(OrderEvent::parse(&[0xff, 0xfe]), Err(ParseError::NotUtf8)));
    }

    #[test]
    fn fallback_amount_uses_quantity() {
        let ev = OrderEvent::parse(br#"{"id":7,"quantity":2,"payment_method":"upi"}"#).unwrap();
        assert_eq!(policy().amount_for(&ev), 100_000.0);
        assert_eq!(policy().method_for(&ev), "upi");
    }

    #[test]
    fn explicit_amount_wins_and_defaults_apply() {
        let ev = OrderEvent::parse(br#"{"id":1,"amount":1234.5,"quantity":9}"#).unwrap();
        assert_eq!(policy().amount_for(&ev), 1234.5);
        assert_eq!(policy().method_for(&ev), "credit_card");

        let ev = OrderEvent::parse(br#"{"id":2,"amount":0,"payment_method":""}"#).unwrap();
        assert_eq!(policy().amount_for(&ev), 50_000.0);
        assert_eq!(policy().method_for(&ev), "credit_card");
    }

    #[test]
    fn status_round_trips_lowercase() {
        assert_eq!(serde_json::to_string(&PaymentStatus::Completed).unwrap(), "\"completed\"");
        assert_eq!(PaymentStatus::parse(" Pending "), Some(PaymentStatus::Pending));
        assert_eq!(PaymentStatus::parse("refunded"), None);
    }
}
