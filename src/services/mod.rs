//! Business services behind the HTTP handlers.

pub mod consultations;
pub mod entitlements;
pub mod order_ledger;
pub mod payments;
pub mod reconciler;

pub use consultations::ConsultationService;
pub use entitlements::EntitlementWriter;
pub use order_ledger::OrderLedger;
pub use payments::CheckoutService;
pub use reconciler::ConfirmationReconciler;
