pub mod payment_events;

pub use payment_events::{parse, verify_signature, PaymentEvent, WebhookEnvelope, SIGNATURE_HEADER};
