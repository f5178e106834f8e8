use sea_orm::EntityTrait;
use serde_json::json;

use server::entity::{annotation, asset, note};

use crate::common::{TestApp, change, change_at, routes};

#[tokio::test]
async fn unauthenticated_batch_is_rejected_whole() {
    let app = TestApp::spawn().await;

    let body = json!({ "changes": [] });
    let res = app.post_without_token(routes::BATCH, &body).await;
    assert_eq!(res.status, 401);
    assert_eq!(res.body["code"], "TOKEN_MISSING");

    let res = app
        .post_with_token(routes::BATCH, &body, "not-a-real-token")
        .await;
    assert_eq!(res.status, 401);
    assert_eq!(res.body["code"], "TOKEN_INVALID");
}

#[tokio::test]
async fn malformed_body_short_circuits() {
    let app = TestApp::spawn().await;
    let token = app.token_for("user-1");

    // Unknown table: the whole request is rejected, nothing applies.
    let res = app
        .post_with_token(
            routes::BATCH,
            &json!({ "changes": [change("c1", "exploits", "insert", json!({}))] }),
            &token,
        )
        .await;
    assert_eq!(res.status, 400);
    assert_eq!(res.body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn stale_update_loses_but_reports_success() {
    let app = TestApp::spawn().await;
    let token = app.token_for("user-1");

    let res = app
        .submit_batch(
            &token,
            vec![change(
                "c1",
                "notes",
                "insert",
                json!({ "id": "n1", "title": "x", "updated_at": 100 }),
            )],
        )
        .await;
    assert_eq!(res.applied_ids(), ["c1"]);
    assert_eq!(res.body["responses"][0]["title"], "x");

    // Older than the stored row: the server wins, but the change is
    // reported applied, not errored.
    let res = app
        .submit_batch(
            &token,
            vec![change(
                "c2",
                "notes",
                "update",
                json!({ "id": "n1", "title": "y", "updated_at": 50 }),
            )],
        )
        .await;
    assert_eq!(res.applied_ids(), ["c2"]);
    assert!(res.error_ids().is_empty());
    assert_eq!(res.body["responses"][0]["title"], "x");

    let row = note::Entity::find_by_id("n1".to_string())
        .one(&app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.title, "x");
    assert_eq!(row.updated_at, 100);
}

#[tokio::test]
async fn newer_update_replaces_the_row() {
    let app = TestApp::spawn().await;
    let token = app.token_for("user-1");

    app.submit_batch(
        &token,
        vec![change(
            "c1",
            "notes",
            "insert",
            json!({ "id": "n2", "title": "first", "updated_at": 100 }),
        )],
    )
    .await;

    let res = app
        .submit_batch(
            &token,
            vec![change(
                "c2",
                "notes",
                "update",
                json!({ "id": "n2", "title": "second", "body": "longer", "updated_at": 200 }),
            )],
        )
        .await;
    assert_eq!(res.applied_ids(), ["c2"]);

    let row = note::Entity::find_by_id("n2".to_string())
        .one(&app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.title, "second");
    assert_eq!(row.body.as_deref(), Some("longer"));
    assert_eq!(row.updated_at, 200);
}

#[tokio::test]
async fn update_of_missing_row_degrades_to_insert() {
    let app = TestApp::spawn().await;
    let token = app.token_for("user-1");

    let res = app
        .submit_batch(
            &token,
            vec![change(
                "c1",
                "notes",
                "update",
                json!({ "id": "n3", "title": "from-update", "updated_at": 100 }),
            )],
        )
        .await;
    assert_eq!(res.applied_ids(), ["c1"]);

    let row = note::Entity::find_by_id("n3".to_string())
        .one(&app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.title, "from-update");
}

#[tokio::test]
async fn replaying_a_batch_is_a_no_op() {
    let app = TestApp::spawn().await;
    let token = app.token_for("user-1");

    let batch = vec![
        change(
            "c1",
            "notes",
            "insert",
            json!({ "id": "n4", "title": "v1", "updated_at": 100 }),
        ),
        change(
            "c2",
            "notes",
            "update",
            json!({ "id": "n4", "title": "v2", "updated_at": 200 }),
        ),
    ];

    let first = app.submit_batch(&token, batch.clone()).await;
    assert_eq!(first.applied_ids(), ["c1", "c2"]);

    // Same change ids again: reported applied, nothing re-executes.
    let second = app.submit_batch(&token, batch).await;
    assert_eq!(second.applied_ids(), ["c1", "c2"]);
    assert!(second.error_ids().is_empty());

    let rows = note::Entity::find().all(&app.db).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].title, "v2");
    assert_eq!(rows[0].updated_at, 200);
}

#[tokio::test]
async fn one_bad_change_never_aborts_its_siblings() {
    let app = TestApp::spawn().await;
    let token = app.token_for("user-1");

    let mut batch = Vec::new();
    for i in 1..=5 {
        // Change #3 is missing its required title.
        let payload = if i == 3 {
            json!({ "id": format!("n5-{i}"), "updated_at": 100 })
        } else {
            json!({ "id": format!("n5-{i}"), "title": format!("t{i}"), "updated_at": 100 })
        };
        batch.push(change(&format!("c{i}"), "notes", "insert", payload));
    }

    let res = app.submit_batch(&token, batch).await;
    assert_eq!(res.body["success"], false);
    assert_eq!(res.applied_ids(), ["c1", "c2", "c4", "c5"]);
    assert_eq!(res.error_ids(), ["c3"]);

    let rows = note::Entity::find().all(&app.db).await.unwrap();
    assert_eq!(rows.len(), 4);
    assert!(
        note::Entity::find_by_id("n5-4".to_string())
            .one(&app.db)
            .await
            .unwrap()
            .is_some()
    );
    assert!(
        note::Entity::find_by_id("n5-5".to_string())
            .one(&app.db)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn delete_acknowledges_and_tombstone_blocks_older_writes() {
    let app = TestApp::spawn().await;
    let token = app.token_for("user-1");

    app.submit_batch(
        &token,
        vec![change(
            "c1",
            "notes",
            "insert",
            json!({ "id": "n6", "title": "alive", "updated_at": 100 }),
        )],
    )
    .await;

    // Delete at t=1000. Deleting again (or a missing row) is still success.
    let res = app
        .submit_batch(
            &token,
            vec![
                change_at("c2", "notes", "delete", json!({ "id": "n6" }), 1_000),
                change_at("c3", "notes", "delete", json!({ "id": "never-existed" }), 1_000),
            ],
        )
        .await;
    assert_eq!(res.applied_ids(), ["c2", "c3"]);
    assert!(res.body["responses"][0]["deleted"].as_bool().unwrap());

    // An insert older than the tombstone is a successful no-op.
    let res = app
        .submit_batch(
            &token,
            vec![change(
                "c4",
                "notes",
                "insert",
                json!({ "id": "n6", "title": "zombie", "updated_at": 500 }),
            )],
        )
        .await;
    assert_eq!(res.applied_ids(), ["c4"]);
    assert!(
        note::Entity::find_by_id("n6".to_string())
            .one(&app.db)
            .await
            .unwrap()
            .is_none()
    );

    // A strictly newer insert clears the tombstone and resurrects the row.
    let res = app
        .submit_batch(
            &token,
            vec![change(
                "c5",
                "notes",
                "insert",
                json!({ "id": "n6", "title": "reborn", "updated_at": 1_500 }),
            )],
        )
        .await;
    assert_eq!(res.applied_ids(), ["c5"]);
    let row = note::Entity::find_by_id("n6".to_string())
        .one(&app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.title, "reborn");
}

#[tokio::test]
async fn dependents_apply_after_their_parents_regardless_of_arrival_order() {
    let app = TestApp::spawn().await;
    let token = app.token_for("user-1");

    // Annotation arrives before the asset it references; table priority
    // reorders so the asset lands first.
    let res = app
        .submit_batch(
            &token,
            vec![
                change(
                    "c1",
                    "annotations",
                    "insert",
                    json!({
                        "id": "ann1",
                        "asset_id": "a1",
                        "kind": "rectangle",
                        "geometry": { "rects": [[1, 2, 3, 4]] },
                        "updated_at": 100,
                    }),
                ),
                change(
                    "c2",
                    "assets",
                    "insert",
                    json!({ "id": "a1", "filename": "paper.pdf", "updated_at": 100 }),
                ),
            ],
        )
        .await;

    let mut applied = res.applied_ids();
    applied.sort();
    assert_eq!(applied, ["c1", "c2"]);
    assert!(res.error_ids().is_empty());

    assert!(
        asset::Entity::find_by_id("a1".to_string())
            .one(&app.db)
            .await
            .unwrap()
            .is_some()
    );
    let ann = annotation::Entity::find_by_id("ann1".to_string())
        .one(&app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ann.asset_id.as_deref(), Some("a1"));
}

#[tokio::test]
async fn principals_cannot_touch_each_others_rows() {
    let app = TestApp::spawn().await;
    let alice = app.token_for("alice");
    let mallory = app.token_for("mallory");

    app.submit_batch(
        &alice,
        vec![change(
            "c1",
            "notes",
            "insert",
            json!({ "id": "shared-id", "title": "alice's", "updated_at": 100 }),
        )],
    )
    .await;

    // A newer write from another principal is a conflict, not a takeover.
    let res = app
        .submit_batch(
            &mallory,
            vec![change(
                "c2",
                "notes",
                "update",
                json!({ "id": "shared-id", "title": "mallory's", "updated_at": 9_999 }),
            )],
        )
        .await;
    assert_eq!(res.error_ids(), ["c2"]);

    let row = note::Entity::find_by_id("shared-id".to_string())
        .one(&app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.title, "alice's");
    assert_eq!(row.user_id, "alice");
}

#[tokio::test]
async fn empty_change_id_is_rejected_per_change() {
    let app = TestApp::spawn().await;
    let token = app.token_for("user-1");

    let res = app
        .submit_batch(
            &token,
            vec![
                change(
                    "",
                    "notes",
                    "insert",
                    json!({ "id": "nx", "title": "anon", "updated_at": 100 }),
                ),
                change(
                    "c2",
                    "notes",
                    "insert",
                    json!({ "id": "ny", "title": "named", "updated_at": 100 }),
                ),
            ],
        )
        .await;
    assert_eq!(res.applied_ids(), ["c2"]);
    assert_eq!(res.error_ids(), [""]);
}
