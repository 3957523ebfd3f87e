use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub mod admin;
pub mod health;
pub mod invoices;
pub mod meters;
pub mod payments;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(invoices::router())
        .merge(payments::router())
        .merge(meters::router())
        .merge(admin::router())
}
