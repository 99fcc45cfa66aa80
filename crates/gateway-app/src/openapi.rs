//! OpenAPI document for the HTTP surface (§10.6), mirroring the donor's
//! `api::openapi` module: a `utoipa`-derived `ApiDoc` plus a Swagger UI
//! mount so the administrative surface is self-describing.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error_class: String,
    pub error: String,
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).bearer_format("opaque").build()),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(crate::http::health, crate::http::live, crate::http::meta_user),
    components(schemas(ErrorResponse)),
    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Liveness and readiness"),
        (name = "meta", description = "Schema contract self-validation"),
        (name = "query", description = "Authenticated plan validation and execution"),
        (name = "activation", description = "One-time activation link exchange"),
    ),
    info(
        title = "Event-Sourced Analytics Gateway",
        version = "0.1.0",
        description = "HTTP/WebSocket edge fronting the warehouse-backed analytics gateway.",
    ),
)]
pub struct ApiDoc;

pub fn configure(cfg: &mut actix_web::web::ServiceConfig) {
    cfg.service(SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()));
}
