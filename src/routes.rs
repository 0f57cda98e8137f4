use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use tower_cookies::CookieManagerLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::{
    handlers,
    middleware_layer::rate_limit::{self, RateLimiter},
    state::AppState,
    store::Store,
};

/// Builds the API router.
///
/// Redis-backed per-IP limits are applied to session creation and attendance
/// submission when `limiter` is given. The owner's attendance listing is
/// polled by the live view and is not counted against the submission budget.
pub fn router<S: Store>(state: AppState<S>, limiter: Option<RateLimiter>) -> Router {
    let mut create_routes = Router::new()
        .route("/api/sessions", post(handlers::sessions::create_session::<S>));

    let mut submit_routes = Router::new().route(
        "/api/sessions/{session_id}/attendance",
        post(handlers::attendance::submit_attendance::<S>),
    );

    if let Some(limiter) = limiter {
        create_routes = create_routes.route_layer(from_fn_with_state(
            limiter.clone(),
            rate_limit::rate_limit_session_creation,
        ));
        submit_routes = submit_routes.route_layer(from_fn_with_state(
            limiter,
            rate_limit::rate_limit_submissions,
        ));
    }

    let open_routes = Router::new()
        .route("/api/sessions/open", post(handlers::sessions::open_session::<S>))
        .route(
            "/api/sessions/{session_id}",
            get(handlers::sessions::session_status::<S>),
        )
        .route(
            "/api/sessions/{session_id}/expire",
            post(handlers::sessions::expire_session::<S>),
        )
        .route(
            "/api/sessions/{session_id}/attendance",
            get(handlers::attendance::list_attendance::<S>),
        )
        .route("/api/subjects", get(handlers::subjects::list_subjects::<S>));

    Router::new()
        .merge(create_routes)
        .merge(submit_routes)
        .merge(open_routes)
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default())
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(CookieManagerLayer::new())
}
