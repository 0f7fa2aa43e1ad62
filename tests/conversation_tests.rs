mod common;

use axum::http::StatusCode;

use common::*;

#[tokio::test]
async fn open_conversation_is_idempotent() {
    let pool = test_pool().await;
    let app = create_test_app(pool.clone());

    let alice = create_user(&pool, "alice").await;
    let bob = create_user(&pool, "bob").await;
    let token = token_for(alice);

    let first = open_conversation(app.clone(), &token, bob).await;
    let second = open_conversation(app.clone(), &token, bob).await;

    assert_eq!(first["id"], second["id"], "repeated open should return the same conversation");
}

#[tokio::test]
async fn open_conversation_rejects_self() {
    let pool = test_pool().await;
    let app = create_test_app(pool.clone());

    let alice = create_user(&pool, "alice").await;
    let token = token_for(alice);

    let (status, body) = post_json_authed(
        app,
        "/conversations",
        &token,
        serde_json::json!({ "user_id": alice }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
}

#[tokio::test]
async fn open_conversation_is_symmetric() {
    let pool = test_pool().await;
    let app = create_test_app(pool.clone());

    let alice = create_user(&pool, "alice").await;
    let bob = create_user(&pool, "bob").await;

    let from_alice = open_conversation(app.clone(), &token_for(alice), bob).await;
    let from_bob = open_conversation(app.clone(), &token_for(bob), alice).await;

    assert_eq!(from_alice["id"], from_bob["id"]);
}

#[tokio::test]
async fn get_conversation_is_forbidden_for_non_participants() {
    let pool = test_pool().await;
    let app = create_test_app(pool.clone());

    let alice = create_user(&pool, "alice").await;
    let bob = create_user(&pool, "bob").await;
    let eve = create_user(&pool, "eve").await;

    let conversation = open_conversation(app.clone(), &token_for(alice), bob).await;
    let conversation_id = conversation["id"].as_i64().unwrap();

    let (status, body) = get_authed(
        app,
        &format!("/conversations/{conversation_id}"),
        &token_for(eve),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN, "body: {body}");
}

#[tokio::test]
async fn get_conversation_reports_the_other_participant() {
    let pool = test_pool().await;
    let app = create_test_app(pool.clone());

    let alice = create_user(&pool, "alice").await;
    let bob = create_user(&pool, "bob").await;

    let conversation = open_conversation(app.clone(), &token_for(alice), bob).await;
    let conversation_id = conversation["id"].as_i64().unwrap();

    let (status, body) = get_authed(
        app,
        &format!("/conversations/{conversation_id}"),
        &token_for(alice),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["other_participant"]["id"], bob);
    assert_eq!(body["unread_count"], 0);
}

#[tokio::test]
async fn list_conversations_only_returns_the_caller_s_conversations() {
    let pool = test_pool().await;
    let app = create_test_app(pool.clone());

    let alice = create_user(&pool, "alice").await;
    let bob = create_user(&pool, "bob").await;
    let carol = create_user(&pool, "carol").await;

    open_conversation(app.clone(), &token_for(alice), bob).await;
    open_conversation(app.clone(), &token_for(bob), carol).await;

    let (status, body) = get_authed(app, "/conversations", &token_for(alice)).await;
    assert_eq!(status, StatusCode::OK, "body: {body}");

    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["other_participant"]["id"], bob);
}
