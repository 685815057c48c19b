//! Route definitions

use crate::handlers::{
    assert, error_assert, error_assert_abort, metadata, report, request, BridgeState,
};
use axum::routing::{get, post};
use axum::Router;

/// Build the bridge's route table.
pub fn router(state: BridgeState) -> Router {
    Router::new()
        .route("/request", get(request))
        .route("/assert", post(assert))
        .route("/errorassert", post(error_assert))
        .route("/errorassert/abort", post(error_assert_abort))
        .route("/metadata", get(metadata))
        .route("/report", post(report))
        .with_state(state)
}
