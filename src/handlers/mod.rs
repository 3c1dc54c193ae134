use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{Permission, Role};
use crate::middleware::{admission_middleware, enforce, Guard};
use crate::state::AppState;

pub mod admin;
pub mod documents;
pub mod health;
pub mod service_accounts;
pub mod users;
pub mod whoami;

/// Assemble the full application router.
///
/// Everything under `/api/v1` runs behind the admission middleware; `/` and
/// `/health` sit outside the API prefix and bypass it. Authorization guards
/// are route layers so each endpoint states its own requirement.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/auth/whoami", get(whoami::whoami_get))
        .route(
            "/documents",
            get(documents::document_list).layer(from_fn_with_state(
                Guard::permission(&state, Permission::ViewDocument),
                enforce,
            )),
        )
        .route(
            "/documents/upload",
            post(documents::document_upload).layer(from_fn_with_state(
                Guard::permission(&state, Permission::UploadDocument),
                enforce,
            )),
        )
        .route(
            "/documents/:id",
            delete(documents::document_delete).layer(from_fn_with_state(
                Guard::permission(&state, Permission::DeleteDocument),
                enforce,
            )),
        )
        .route(
            "/users",
            get(users::user_list).layer(from_fn_with_state(
                Guard::permission(&state, Permission::ListUsers),
                enforce,
            )),
        )
        .route(
            "/admin/service-accounts",
            get(service_accounts::token_list)
                .post(service_accounts::token_create)
                .layer(from_fn_with_state(Guard::role(&state, Role::Admin), enforce)),
        )
        .route(
            "/admin/service-accounts/:id/revoke",
            post(service_accounts::token_revoke)
                .layer(from_fn_with_state(Guard::role(&state, Role::Admin), enforce)),
        )
        .route(
            "/admin/cache/invalidate",
            post(admin::cache_invalidate).layer(from_fn_with_state(
                Guard::permission(&state, Permission::SystemAdmin),
                enforce,
            )),
        );

    Router::new()
        .route("/", get(health::root_get))
        .route("/health", get(health::health_get))
        .nest("/api/v1", api)
        .layer(from_fn_with_state(state.clone(), admission_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
