pub mod common;
pub mod consultations;
pub mod entitlements;
pub mod payment_webhooks;
pub mod payments;

use std::sync::Arc;

use crate::db::DbPool;
use crate::gateway::PaymentGateway;
use crate::notifications::NotificationDispatcher;
use crate::services::{
    CheckoutService, ConfirmationReconciler, ConsultationService, EntitlementWriter, OrderLedger,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub ledger: OrderLedger,
    pub entitlements: EntitlementWriter,
    pub checkout: Arc<CheckoutService>,
    pub reconciler: Arc<ConfirmationReconciler>,
    pub consultations: Arc<ConsultationService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        notifications: NotificationDispatcher,
        default_currency: String,
    ) -> Self {
        let ledger = OrderLedger::new(db_pool.clone());
        let entitlements = EntitlementWriter::new(db_pool);

        let checkout = Arc::new(CheckoutService::new(
            ledger.clone(),
            gateway.clone(),
            default_currency.clone(),
        ));
        let reconciler = Arc::new(ConfirmationReconciler::new(
            ledger.clone(),
            entitlements.clone(),
            gateway,
            notifications.clone(),
        ));
        let consultations = Arc::new(ConsultationService::new(
            ledger.clone(),
            notifications,
            default_currency,
        ));

        Self {
            ledger,
            entitlements,
            checkout,
            reconciler,
            consultations,
        }
    }
}
