pub mod provider;
pub mod stripe;

pub use provider::{
    ActiveSubscription, CheckoutLine, CheckoutSessionRequest, CustomerKey,
    PaymentProvider, ProviderSession,
};
pub use stripe::StripeProvider;
