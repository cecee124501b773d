//! Payment provider webhook events.
//!
//! Raw payloads of the form `{"id": "...", "type": "...", "data": {"object": {...}}}`
//! are decoded into the closed [`PaymentEvent`] enum. Event kinds the
//! reconciler does not act on decode to [`PaymentEvent::Unknown`] instead of
//! failing, so new provider event types never turn into retries.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::fmt;

use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `t=<unix>,v1=<hex hmac>[,v1=...]`
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    CheckoutSessionCompleted {
        session_id: String,
    },
    CheckoutSessionPaymentSucceeded {
        session_id: String,
    },
    CheckoutSessionAsyncPaymentFailed {
        session_id: String,
    },
    CustomerCreated {
        customer_id: String,
        email: Option<String>,
    },
    InvoicePaid {
        customer_id: String,
    },
    PaymentIntentPaymentFailed {
        session_id: String,
    },
    Unknown(String),
}

impl PaymentEvent {
    pub fn kind(&self) -> &str {
        match self {
            PaymentEvent::CheckoutSessionCompleted { .. } => "checkout.session.completed",
            PaymentEvent::CheckoutSessionPaymentSucceeded { .. } => {
                "checkout.session.payment_succeeded"
            }
            PaymentEvent::CheckoutSessionAsyncPaymentFailed { .. } => {
                "checkout.session.async_payment_failed"
            }
            PaymentEvent::CustomerCreated { .. } => "customer.created",
            PaymentEvent::InvoicePaid { .. } => "invoice.paid",
            PaymentEvent::PaymentIntentPaymentFailed { .. } => "payment_intent.payment_failed",
            PaymentEvent::Unknown(kind) => kind,
        }
    }
}

impl fmt::Display for PaymentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// A decoded webhook delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEnvelope {
    /// Provider event id, when present
    pub event_id: Option<String>,
    pub event: PaymentEvent,
}

fn jget<'a>(val: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cur = val;
    for key in path {
        cur = cur.get(*key)?;
    }
    Some(cur)
}

fn extract_str<'a>(val: &'a Value, path: &[&str]) -> Option<&'a str> {
    jget(val, path)?.as_str().filter(|s| !s.is_empty())
}

fn malformed(reason: impl Into<String>) -> ServiceError {
    ServiceError::BadRequest(format!("malformed webhook payload: {}", reason.into()))
}

/// Our checkout session correlator: explicit metadata first, then the
/// client reference, then the provider object id.
fn session_key(object: &Value) -> Option<String> {
    extract_str(object, &["metadata", "session_id"])
        .or_else(|| extract_str(object, &["client_reference_id"]))
        .or_else(|| extract_str(object, &["id"]))
        .map(str::to_string)
}

/// A customer reference may be a bare id or an expanded object.
fn customer_ref(object: &Value) -> Option<String> {
    match object.get("customer")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Object(_) => extract_str(object, &["customer", "id"]).map(str::to_string),
        _ => None,
    }
}

/// Decodes a webhook body. Only structural problems are errors: invalid
/// JSON, a missing `type`, a missing `data.object`, or a known event kind
/// missing the key it is reconciled by.
pub fn parse(payload: &[u8]) -> Result<WebhookEnvelope, ServiceError> {
    let json: Value =
        serde_json::from_slice(payload).map_err(|e| malformed(format!("invalid json: {}", e)))?;

    let kind = extract_str(&json, &["type"]).ok_or_else(|| malformed("missing type"))?;
    let object = jget(&json, &["data", "object"])
        .filter(|o| o.is_object())
        .ok_or_else(|| malformed("missing data.object"))?;

    let session = || session_key(object).ok_or_else(|| malformed(format!("{} without session", kind)));

    let event = match kind {
        "checkout.session.completed" => PaymentEvent::CheckoutSessionCompleted {
            session_id: session()?,
        },
        "checkout.session.payment_succeeded" | "checkout.session.async_payment_succeeded" => {
            PaymentEvent::CheckoutSessionPaymentSucceeded {
                session_id: session()?,
            }
        }
        "checkout.session.async_payment_failed" => {
            PaymentEvent::CheckoutSessionAsyncPaymentFailed {
                session_id: session()?,
            }
        }
        "customer.created" => PaymentEvent::CustomerCreated {
            customer_id: extract_str(object, &["id"])
                .ok_or_else(|| malformed("customer.created without id"))?
                .to_string(),
            email: extract_str(object, &["email"]).map(|e| e.trim().to_string()),
        },
        "invoice.paid" => PaymentEvent::InvoicePaid {
            customer_id: customer_ref(object)
                .ok_or_else(|| malformed("invoice.paid without customer"))?,
        },
        "payment_intent.payment_failed" => PaymentEvent::PaymentIntentPaymentFailed {
            session_id: session()?,
        },
        other => PaymentEvent::Unknown(other.to_string()),
    };

    Ok(WebhookEnvelope {
        event_id: extract_str(&json, &["id"]).map(str::to_string),
        event,
    })
}

fn mac_for(secret: &str) -> Result<HmacSha256, ServiceError> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("webhook secret unusable: {}", e)))
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, ServiceError> {
    let mut mac = mac_for(secret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks a `Stripe-Signature` header against the raw body. Any `v1` entry
/// may match; the timestamp must be within `tolerance_secs` of `now`.
pub fn verify_signature(
    header: Option<&str>,
    payload: &[u8],
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), ServiceError> {
    let header = header.ok_or(ServiceError::InvalidSignature)?;

    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(ServiceError::InvalidSignature)?;
    if candidates.is_empty() || (now - timestamp).abs() > tolerance_secs {
        return Err(ServiceError::InvalidSignature);
    }

    let expected = sign_payload(secret, timestamp, payload)?;
    if candidates
        .iter()
        .any(|candidate| constant_time_eq(&expected, candidate))
    {
        Ok(())
    } else {
        Err(ServiceError::InvalidSignature)
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn body(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn async_failure_prefers_metadata_session() {
        let env = parse(&body(json!({
            "id": "evt_1",
            "type": "checkout.session.async_payment_failed",
            "data": {"object": {
                "id": "cs_provider",
                "client_reference_id": "sess_ref",
                "metadata": {"session_id": "sess_meta"}
            }}
        })))
        .unwrap();

        assert_eq!(env.event_id.as_deref(), Some("evt_1"));
        assert_eq!(
            env.event,
            PaymentEvent::CheckoutSessionAsyncPaymentFailed {
                session_id: "sess_meta".into()
            }
        );
    }

    #[test]
    fn session_falls_back_to_client_reference_then_object_id() {
        let env = parse(&body(json!({
            "type": "payment_intent.payment_failed",
            "data": {"object": {"id": "pi_1", "client_reference_id": "sess_ref", "metadata": {}}}
        })))
        .unwrap();
        assert_eq!(
            env.event,
            PaymentEvent::PaymentIntentPaymentFailed {
                session_id: "sess_ref".into()
            }
        );

        let env = parse(&body(json!({
            "type": "checkout.session.completed",
            "data": {"object": {"id": "cs_only"}}
        })))
        .unwrap();
        assert_eq!(
            env.event,
            PaymentEvent::CheckoutSessionCompleted {
                session_id: "cs_only".into()
            }
        );
    }

    #[test]
    fn invoice_paid_accepts_expanded_customer() {
        let env = parse(&body(json!({
            "type": "invoice.paid",
            "data": {"object": {"id": "in_1", "customer": {"id": "cus_7", "email": "x@y.z"}}}
        })))
        .unwrap();
        assert_eq!(
            env.event,
            PaymentEvent::InvoicePaid {
                customer_id: "cus_7".into()
            }
        );
    }

    #[test]
    fn customer_created_tolerates_missing_email() {
        let env = parse(&body(json!({
            "type": "customer.created",
            "data": {"object": {"id": "cus_1", "email": null}}
        })))
        .unwrap();
        assert_eq!(
            env.event,
            PaymentEvent::CustomerCreated {
                customer_id: "cus_1".into(),
                email: None
            }
        );
    }

    #[test]
    fn unknown_kinds_are_preserved() {
        let env = parse(&body(json!({
            "type": "charge.refunded",
            "data": {"object": {"id": "ch_1"}}
        })))
        .unwrap();
        assert_eq!(env.event, PaymentEvent::Unknown("charge.refunded".into()));
        assert_eq!(env.event.kind(), "charge.refunded");
    }

    #[test]
    fn structural_problems_are_rejected() {
        assert_matches!(parse(b"not json"), Err(ServiceError::BadRequest(_)));
        assert_matches!(
            parse(&body(json!({"data": {"object": {}}}))),
            Err(ServiceError::BadRequest(_))
        );
        assert_matches!(
            parse(&body(json!({"type": "invoice.paid", "data": {}}))),
            Err(ServiceError::BadRequest(_))
        );
        assert_matches!(
            parse(&body(json!({"type": "invoice.paid", "data": {"object": {"id": "in_1"}}}))),
            Err(ServiceError::BadRequest(_))
        );
    }

    #[test]
    fn signature_round_trip_and_tolerance() {
        let payload = br#"{"type":"invoice.paid"}"#;
        let sig = sign_payload("whsec_test", 1_700_000_000, payload).unwrap();
        let header = format!("t=1700000000,v1=deadbeef,v1={}", sig);

        assert!(verify_signature(Some(&header), payload, "whsec_test", 300, 1_700_000_100).is_ok());
        assert_matches!(
            verify_signature(Some(&header), payload, "whsec_test", 300, 1_700_000_301),
            Err(ServiceError::InvalidSignature)
        );
        assert_matches!(
            verify_signature(Some(&header), payload, "other_secret", 300, 1_700_000_000),
            Err(ServiceError::InvalidSignature)
        );
        assert_matches!(
            verify_signature(None, payload, "whsec_test", 300, 1_700_000_000),
            Err(ServiceError::InvalidSignature)
        );
        assert_matches!(
            verify_signature(Some("v1=abc"), payload, "whsec_test", 300, 1_700_000_000),
            Err(ServiceError::InvalidSignature)
        );
    }
}
