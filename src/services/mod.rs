// Catalog lookup
pub mod catalog;

// Cart store and checkout broker
pub mod commerce;

// Order ledger read side and housekeeping
pub mod orders;

// Payment provider client
pub mod payments;

// Webhook event application
pub mod reconciliation;
