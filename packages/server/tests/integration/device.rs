// Leading `::` disambiguates the `common` crate from this binary's
// `common` test-helper module.
use ::common::ContentHash;
use sea_orm::EntityTrait;
use serde_json::json;

use server::entity::{blob_meta, device_blob};

use crate::common::{TestApp, change, routes};

fn register(device_id: &str, hash: &str, filename: &str) -> Vec<serde_json::Value> {
    vec![
        change(
            &format!("{device_id}-meta-{}", &hash[..8]),
            "blobs_meta",
            "insert",
            json!({
                "content_hash": hash,
                "size": 42,
                "mime": "application/pdf",
                "filename": filename,
                "created_at": 100,
                "updated_at": 100,
            }),
        ),
        change(
            &format!("{device_id}-presence-{}", &hash[..8]),
            "device_blobs",
            "insert",
            json!({
                "device_id": device_id,
                "content_hash": hash,
                "present": true,
                "last_seen_at": 100,
            }),
        ),
    ]
}

#[tokio::test]
async fn two_devices_same_content_share_one_blob_record() {
    let app = TestApp::spawn().await;
    let token = app.token_for("user-1");
    let hash = ContentHash::of(b"the same pdf on two laptops").to_hex();

    app.submit_batch(&token, register("device-a", &hash, "thesis.pdf"))
        .await;
    // Second device, same bytes, different filename: existing wins.
    app.submit_batch(&token, register("device-b", &hash, "renamed.pdf"))
        .await;

    let metas = blob_meta::Entity::find().all(&app.db).await.unwrap();
    assert_eq!(metas.len(), 1);
    assert_eq!(metas[0].filename.as_deref(), Some("thesis.pdf"));

    let presences = device_blob::Entity::find().all(&app.db).await.unwrap();
    assert_eq!(presences.len(), 2);
    assert!(presences.iter().all(|p| p.present));
}

#[tokio::test]
async fn coordination_read_reports_presence_and_orphans() {
    let app = TestApp::spawn().await;
    let token = app.token_for("user-1");
    let hash = ContentHash::of(b"only on device a").to_hex();

    app.submit_batch(&token, register("device-a", &hash, "a.pdf"))
        .await;

    // The holding device sees its own copy, nothing elsewhere.
    let res = app
        .get_with_token(&routes::device_blobs("device-a"), &token)
        .await;
    assert_eq!(res.status, 200);
    let rows = res.body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["content_hash"], hash);
    assert_eq!(rows[0]["present_on_this_device"], true);
    assert_eq!(rows[0]["present_elsewhere"], false);

    // A fresh device sees the blob as orphaned: known, not fetchable.
    let res = app
        .get_with_token(&routes::device_blobs("device-new"), &token)
        .await;
    let rows = res.body.as_array().unwrap();
    assert_eq!(rows[0]["present_on_this_device"], false);
    assert_eq!(rows[0]["present_elsewhere"], true);
}

#[tokio::test]
async fn absent_copies_do_not_count_as_elsewhere() {
    let app = TestApp::spawn().await;
    let token = app.token_for("user-1");
    let hash = ContentHash::of(b"deleted from its only holder").to_hex();

    app.submit_batch(&token, register("device-a", &hash, "gone.pdf"))
        .await;

    // Device A drops its copy.
    app.submit_batch(
        &token,
        vec![change(
            "drop-a",
            "device_blobs",
            "update",
            json!({
                "device_id": "device-a",
                "content_hash": hash,
                "present": false,
                "last_seen_at": 200,
            }),
        )],
    )
    .await;

    let res = app
        .get_with_token(&routes::device_blobs("device-b"), &token)
        .await;
    let rows = res.body.as_array().unwrap();
    assert_eq!(rows[0]["present_on_this_device"], false);
    assert_eq!(rows[0]["present_elsewhere"], false);
}

#[tokio::test]
async fn presence_update_for_unknown_row_registers_it() {
    let app = TestApp::spawn().await;
    let token = app.token_for("user-1");
    let hash = ContentHash::of(b"update before insert").to_hex();

    let res = app
        .submit_batch(
            &token,
            vec![change(
                "late-register",
                "device_blobs",
                "update",
                json!({
                    "device_id": "device-c",
                    "content_hash": hash,
                    "present": true,
                    "last_seen_at": 300,
                }),
            )],
        )
        .await;
    assert_eq!(res.applied_ids(), ["late-register"]);

    let presences = device_blob::Entity::find().all(&app.db).await.unwrap();
    assert_eq!(presences.len(), 1);
    assert!(presences[0].present);
}

#[tokio::test]
async fn coordination_read_is_scoped_to_the_principal() {
    let app = TestApp::spawn().await;
    let owner = app.token_for("owner");
    let stranger = app.token_for("stranger");
    let hash = ContentHash::of(b"private library").to_hex();

    app.submit_batch(&owner, register("device-a", &hash, "secret.pdf"))
        .await;

    let res = app
        .get_with_token(&routes::device_blobs("device-a"), &stranger)
        .await;
    assert_eq!(res.status, 200);
    assert!(res.body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_content_hash_is_rejected_per_change() {
    let app = TestApp::spawn().await;
    let token = app.token_for("user-1");

    let res = app
        .submit_batch(
            &token,
            vec![change(
                "bad-hash",
                "blobs_meta",
                "insert",
                json!({ "content_hash": "not-hex", "size": 1, "updated_at": 100 }),
            )],
        )
        .await;
    assert_eq!(res.error_ids(), ["bad-hash"]);
    assert!(blob_meta::Entity::find().all(&app.db).await.unwrap().is_empty());
}
