use axum::{Json, extract::State};
use common::{BatchRequest, BatchResponse};
use tracing::instrument;

use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::Principal;
use crate::extractors::json::AppJson;
use crate::state::AppState;
use crate::sync;

#[utoipa::path(
    post,
    path = "/batch",
    tag = "Sync",
    operation_id = "submitBatch",
    summary = "Apply a batch of write changes",
    description = "Applies an ordered list of changes for the authenticated principal. \
        The batch runs in one transaction; each change is isolated in a savepoint, so a \
        failing change is reported in `errors` without aborting its siblings. Replaying \
        an already-applied change id is a no-op reported as applied. Updates resolve \
        conflicts by last-write-wins on `updated_at`; a stale update returns the stored \
        row as success.",
    request_body = BatchRequest,
    responses(
        (status = 200, description = "Per-change results", body = BatchResponse),
        (status = 400, description = "Malformed request (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, principal, payload), fields(principal = %principal.user_id))]
pub async fn submit_batch(
    principal: Principal,
    State(state): State<AppState>,
    AppJson(payload): AppJson<BatchRequest>,
) -> Result<Json<BatchResponse>, AppError> {
    let response = sync::apply_batch(
        &state.db,
        &state.appliers,
        &principal.user_id,
        payload.changes,
        state.config.sync.max_batch_size,
    )
    .await?;

    Ok(Json(response))
}
