use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Consultancy Payments API",
        version = "1.0.0",
        description = r#"
# Consultancy Payments API

Checkout, payment confirmation and entitlement fulfillment for the consultancy marketplace.

## Payment flow

1. `POST /payments/orders` records a pending order and opens a gateway order.
2. The client pays through the gateway UI.
3. The client posts the signed result to `POST /payments/verify`; the gateway posts
   `payment.captured` / `payment.failed` to `POST /payments/webhook`. Either may arrive
   first, or more than once; the order completes once and entitlements are granted once.

## Consultations

Free consultations are recorded with amount 0. Staff price them with
`PUT /consultations/{order_id}/activate`, after which the order is paid through the
normal flow.

## Authentication

Staff endpoints take a bearer JWT with a `staff` or `admin` role:

```
Authorization: Bearer <your-jwt-token>
```

## Error Handling

```json
{
  "error": "Bad Request",
  "message": "Payment could not be verified",
  "request_id": "req-abc123xyz",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Payments", description = "Checkout and payment confirmation"),
        (name = "Consultations", description = "Free consultations and staff pricing"),
        (name = "Entitlements", description = "Access granted by completed orders"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::payments::create_checkout,
        crate::handlers::payments::checkout_existing_order,
        crate::handlers::payments::get_order,
        crate::handlers::payments::verify_payment,
        crate::handlers::payment_webhooks::payment_webhook,
        crate::handlers::consultations::request_consultation,
        crate::handlers::consultations::list_consultations,
        crate::handlers::consultations::activate_consultation,
        crate::handlers::entitlements::list_buyer_entitlements,
        crate::health_check,
    ),
    components(
        schemas(
            crate::ResponseMeta,
            crate::models::order::OrderStatus,
            crate::models::order::OrderSummary,
            crate::models::line_item::LineItem,
            crate::models::line_item::ItemKind,
            crate::models::line_item::BillingPeriod,
            crate::models::entitlement::EntitlementStatus,
            crate::models::entitlement::EntitlementSummary,
            crate::services::payments::CheckoutRequest,
            crate::services::payments::CheckoutSession,
            crate::services::reconciler::ClientConfirmation,
            crate::services::consultations::ConsultationRequest,
            crate::services::consultations::ActivateConsultationRequest,
            crate::handlers::payments::VerifyPaymentResponse,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDocV1::openapi())
}
