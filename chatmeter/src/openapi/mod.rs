//! OpenAPI documentation for the `/api/v1` surface.
//!
//! Served as JSON at `/api/openapi.json` and rendered with Scalar at `/api/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api;

/// Bearer tokens are JWTs issued by the identity provider.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "Identity token issued by the sign-in provider:\n\n\
                            ```\nAuthorization: Bearer YOUR_ID_TOKEN\n```",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "chatmeter",
        description = "Subscription-gated chat billed per message against an energy balance."
    ),
    servers((url = "/api/v1")),
    paths(
        api::handlers::chat::send_message,
        api::handlers::chat::get_history,
        api::handlers::account::get_account,
        api::handlers::billing::create_checkout,
        api::handlers::billing::create_portal,
        api::handlers::webhooks::payment_webhook,
        api::handlers::access_codes::verify_access_code,
    ),
    components(schemas(
        api::models::chat::ChatRequest,
        api::models::chat::ChatTurnResponse,
        api::models::chat::ChatHistoryResponse,
        api::models::chat::ChatReply,
        api::models::chat::ChatUsage,
        api::models::account::AccountResponse,
        api::models::account::SubscriptionResponse,
        api::models::billing::Plan,
        api::models::billing::CheckoutCreate,
        api::models::billing::RedirectResponse,
        api::models::billing::WebhookAck,
        api::models::access_codes::AccessCodeVerify,
        api::models::access_codes::AccessCodeVerifyResponse,
        crate::types::Tier,
        crate::types::TurnRole,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "chat", description = "Metered conversation"),
        (name = "account", description = "Balance and subscription state"),
        (name = "billing", description = "Checkout, billing portal and processor webhooks"),
        (name = "access", description = "Invitation codes"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/chat",
            "/chat/history",
            "/account",
            "/billing/checkout",
            "/billing/portal",
            "/webhooks/payments",
            "/access-codes/verify",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        assert!(doc.components.unwrap().security_schemes.contains_key("BearerAuth"));
    }
}
