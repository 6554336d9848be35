use axum::{
    middleware,
    routing::{get, post},
    Router,
};

mod client_meta;
mod flags;
mod health;
mod sdk;
mod sdk_auth;

pub use health::health;

use crate::state::AppState;

pub fn routes(state: AppState) -> Router {
    let project_router = Router::new()
        .route(
            "/{project_id}/environments/{environment}/flags/evaluate",
            get(flags::routes::evaluate_all),
        )
        .route(
            "/{project_id}/environments/{environment}/flags/{flag_key}/evaluate",
            post(flags::routes::evaluate),
        );

    let sdk_router = Router::new()
        .route("/flags", get(sdk::routes::evaluate_all))
        .route("/flags/{flag_key}/evaluate", post(sdk::routes::evaluate))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            sdk_auth::require_sdk_key,
        ));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/api/projects", project_router)
        .nest("/sdk", sdk_router)
        .with_state(state)
}

async fn root() -> &'static str {
    "Flag evaluation service"
}
