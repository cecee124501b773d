/// Commerce services module - cart store and checkout broker
pub mod cart_service;
pub mod checkout_service;

// Re-export services for convenience
pub use cart_service::{AddToCartInput, CartLine, CartService, CartView, PricedCart, PricedLine};
pub use checkout_service::{CheckoutResponse, CheckoutService};
