pub mod entitlement;
pub mod line_item;
pub mod order;

pub use line_item::{BillingPeriod, ItemKind, LineItem};
pub use order::OrderStatus;
