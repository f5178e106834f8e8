use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Path, State},
};
use common::DeviceBlobStatus;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use tracing::instrument;

use crate::entity::device_blob;
use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::Principal;
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/devices/{device_id}/blobs",
    tag = "Sync",
    operation_id = "deviceBlobs",
    summary = "Coordination read for one device",
    description = "Returns, for every content hash the registry knows for the authenticated \
        principal, whether the bytes are present on the given device and whether any other \
        device holds them. Content present elsewhere but not on this device is orphaned for \
        it: known to exist, not locally fetchable until a transfer happens.",
    params(("device_id" = String, Path, description = "Querying device ID")),
    responses(
        (status = 200, description = "Presence per content hash", body = Vec<DeviceBlobStatus>),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, principal), fields(principal = %principal.user_id, device_id))]
pub async fn device_blobs(
    principal: Principal,
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<Vec<DeviceBlobStatus>>, AppError> {
    let rows = device_blob::Entity::find()
        .filter(device_blob::Column::UserId.eq(&principal.user_id))
        .all(&state.db)
        .await?;

    // hash -> (present here, present on some other device)
    let mut by_hash: BTreeMap<String, (bool, bool)> = BTreeMap::new();
    for row in rows {
        let entry = by_hash.entry(row.content_hash).or_default();
        if row.device_id == device_id {
            entry.0 |= row.present;
        } else {
            entry.1 |= row.present;
        }
    }

    let statuses = by_hash
        .into_iter()
        .map(|(content_hash, (here, elsewhere))| DeviceBlobStatus {
            content_hash,
            present_on_this_device: here,
            present_elsewhere: elsewhere,
        })
        .collect();

    Ok(Json(statuses))
}
