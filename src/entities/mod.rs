pub mod commerce;
pub mod order;
pub mod order_item;
pub mod user;
pub mod webhook_event;

pub use order::OrderStatus;
