mod common;

use axum::http::StatusCode;

use chatcore::models::{MessageType, ReadStatus, SendMessageDto};
use chatcore::persistence::PersistenceGateway;
use chatcore::services::{ConversationService, MessageService};

use common::*;

fn text(content: &str) -> SendMessageDto {
    SendMessageDto {
        message_type: MessageType::Text,
        content: Some(content.to_string()),
        media_url: None,
        media_mime_type: None,
        media_duration: None,
        waveform: None,
        reply_to_id: None,
    }
}

async fn open_conversation_direct(
    conversations: &ConversationService,
    a: i64,
    b: i64,
) -> i64 {
    conversations.create_or_get_1to1(a, b).await.unwrap().id
}

#[tokio::test]
async fn sending_requires_conversation_membership() {
    let pool = test_pool().await;
    let gateway = PersistenceGateway::new(pool.clone());
    let messages = MessageService::new(gateway.clone());
    let conversations = ConversationService::new(gateway);

    let alice = create_user(&pool, "alice").await;
    let bob = create_user(&pool, "bob").await;
    let eve = create_user(&pool, "eve").await;

    let conversation_id = open_conversation_direct(&conversations, alice, bob).await;

    let result = messages.send(conversation_id, eve, text("hi")).await;
    assert!(result.is_err(), "a non-participant should not be able to send");
}

#[tokio::test]
async fn sending_creates_sent_reads_for_every_other_participant() {
    let pool = test_pool().await;
    let gateway = PersistenceGateway::new(pool.clone());
    let messages = MessageService::new(gateway.clone());
    let conversations = ConversationService::new(gateway.clone());

    let alice = create_user(&pool, "alice").await;
    let bob = create_user(&pool, "bob").await;
    let conversation_id = open_conversation_direct(&conversations, alice, bob).await;

    let message = messages.send(conversation_id, alice, text("hello bob")).await.unwrap();

    let counts = gateway.unread_counts(conversation_id, &[bob]).await.unwrap();
    assert_eq!(counts[&bob], 1, "bob should have one unread message");

    let counts = gateway.unread_counts(conversation_id, &[alice]).await.unwrap();
    assert_eq!(counts[&alice], 0, "sender never owes themselves an unread count");

    assert_eq!(message.sender_id, alice);
}

#[tokio::test]
async fn read_state_transitions_are_monotonic() {
    let pool = test_pool().await;
    let gateway = PersistenceGateway::new(pool.clone());
    let messages = MessageService::new(gateway.clone());
    let conversations = ConversationService::new(gateway.clone());

    let alice = create_user(&pool, "alice").await;
    let bob = create_user(&pool, "bob").await;
    let conversation_id = open_conversation_direct(&conversations, alice, bob).await;
    let message = messages.send(conversation_id, alice, text("hi")).await.unwrap();

    let transitioned = messages.mark_read(&[message.id], bob).await.unwrap();
    assert_eq!(transitioned.len(), 1);
    assert_eq!(transitioned[0].status, ReadStatus::Read);

    // Attempting to move a `read` row back to `delivered` is a no-op.
    let regressed = messages.mark_delivered(&[message.id], bob).await.unwrap();
    assert!(regressed.is_empty(), "read rows must never regress to delivered");
}

#[tokio::test]
async fn deleting_hides_content_but_preserves_the_row() {
    let pool = test_pool().await;
    let gateway = PersistenceGateway::new(pool.clone());
    let messages = MessageService::new(gateway.clone());
    let conversations = ConversationService::new(gateway.clone());

    let alice = create_user(&pool, "alice").await;
    let bob = create_user(&pool, "bob").await;
    let conversation_id = open_conversation_direct(&conversations, alice, bob).await;
    let message = messages.send(conversation_id, alice, text("oops")).await.unwrap();

    let deleted = messages.delete(message.id, alice).await.unwrap();
    assert!(deleted.is_deleted);

    // Only the sender may delete.
    let other = messages.send(conversation_id, alice, text("another")).await.unwrap();
    let result = messages.delete(other.id, bob).await;
    assert!(result.is_err(), "bob is not the sender and must not be able to delete");
}

#[tokio::test]
async fn deleted_messages_drop_out_of_unread_counts() {
    let pool = test_pool().await;
    let gateway = PersistenceGateway::new(pool.clone());
    let messages = MessageService::new(gateway.clone());
    let conversations = ConversationService::new(gateway.clone());

    let alice = create_user(&pool, "alice").await;
    let bob = create_user(&pool, "bob").await;
    let conversation_id = open_conversation_direct(&conversations, alice, bob).await;
    let message = messages.send(conversation_id, alice, text("temp")).await.unwrap();

    messages.delete(message.id, alice).await.unwrap();

    let counts = gateway.unread_counts(conversation_id, &[bob]).await.unwrap();
    assert_eq!(counts[&bob], 0);
}

#[tokio::test]
async fn pagination_walks_newest_first_and_reports_has_more() {
    let pool = test_pool().await;
    let gateway = PersistenceGateway::new(pool.clone());
    let messages = MessageService::new(gateway.clone());
    let conversations = ConversationService::new(gateway);

    let alice = create_user(&pool, "alice").await;
    let bob = create_user(&pool, "bob").await;
    let conversation_id = open_conversation_direct(&conversations, alice, bob).await;

    for i in 0..5 {
        messages.send(conversation_id, alice, text(&format!("msg {i}"))).await.unwrap();
    }

    let (page, has_more) = messages.paginate(conversation_id, alice, None, 3).await.unwrap();
    assert_eq!(page.len(), 3);
    assert!(has_more);
    assert!(page[0].id > page[1].id, "messages must be newest-first");

    let cursor = chatcore::cursor::encode_message_cursor(page.last().unwrap().id);
    let (next_page, has_more) = messages
        .paginate(conversation_id, alice, Some(&cursor), 3)
        .await
        .unwrap();
    assert_eq!(next_page.len(), 2);
    assert!(!has_more);
}

#[tokio::test]
async fn search_is_case_insensitive_and_skips_deleted_messages() {
    let pool = test_pool().await;
    let gateway = PersistenceGateway::new(pool.clone());
    let messages = MessageService::new(gateway.clone());
    let conversations = ConversationService::new(gateway);

    let alice = create_user(&pool, "alice").await;
    let bob = create_user(&pool, "bob").await;
    let conversation_id = open_conversation_direct(&conversations, alice, bob).await;

    messages.send(conversation_id, alice, text("let's grab Coffee tomorrow")).await.unwrap();
    let gone = messages.send(conversation_id, alice, text("coffee is cancelled")).await.unwrap();
    messages.delete(gone.id, alice).await.unwrap();

    let results = messages.search(conversation_id, alice, "coffee", 10).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content.as_deref(), Some("let's grab Coffee tomorrow"));
}

#[tokio::test]
async fn unread_message_ids_drop_out_once_read_and_exclude_deleted() {
    let pool = test_pool().await;
    let gateway = PersistenceGateway::new(pool.clone());
    let messages = MessageService::new(gateway.clone());
    let conversations = ConversationService::new(gateway.clone());

    let alice = create_user(&pool, "alice").await;
    let bob = create_user(&pool, "bob").await;
    let conversation_id = open_conversation_direct(&conversations, alice, bob).await;

    let m1 = messages.send(conversation_id, alice, text("one")).await.unwrap();
    let m2 = messages.send(conversation_id, alice, text("two")).await.unwrap();
    let m3 = messages.send(conversation_id, alice, text("three")).await.unwrap();
    messages.delete(m3.id, alice).await.unwrap();

    let unread = gateway.unread_message_ids(conversation_id, bob).await.unwrap();
    assert_eq!(unread.len(), 2, "the deleted message must not count as unread");
    assert!(unread.contains(&m1.id));
    assert!(unread.contains(&m2.id));

    messages.mark_read(&unread, bob).await.unwrap();
    let unread_after = gateway.unread_message_ids(conversation_id, bob).await.unwrap();
    assert!(unread_after.is_empty(), "reading every unread message should empty the set");
}

#[tokio::test]
async fn hydrated_message_dto_carries_shallow_reply_and_read_rows() {
    let pool = test_pool().await;
    let gateway = PersistenceGateway::new(pool.clone());
    let messages = MessageService::new(gateway.clone());
    let conversations = ConversationService::new(gateway.clone());

    let alice = create_user(&pool, "alice").await;
    let bob = create_user(&pool, "bob").await;
    let conversation_id = open_conversation_direct(&conversations, alice, bob).await;

    let original = messages.send(conversation_id, alice, text("what time works?")).await.unwrap();

    let mut reply_payload = text("3pm works for me");
    reply_payload.reply_to_id = Some(original.id);
    let reply = messages.send(conversation_id, bob, reply_payload).await.unwrap();

    let dto = gateway.hydrate_message_dto(reply).await.unwrap();

    let reply_to = dto.reply_to.expect("reply target should be hydrated");
    assert_eq!(reply_to.id, original.id);
    assert_eq!(reply_to.content.as_deref(), Some("what time works?"));
    assert!(reply_to.reply_to.is_none(), "reply hydration is shallow: one hop only");
    assert!(reply_to.reads.is_empty(), "shallow reply target does not carry its own read rows");

    assert_eq!(dto.reads.len(), 1, "one read row per other participant");
    assert_eq!(dto.reads[0].user_id, alice);
}

#[tokio::test]
async fn http_pagination_surface_requires_membership() {
    let pool = test_pool().await;
    let app = create_test_app(pool.clone());

    let alice = create_user(&pool, "alice").await;
    let bob = create_user(&pool, "bob").await;
    let eve = create_user(&pool, "eve").await;

    let conversation = open_conversation(app.clone(), &token_for(alice), bob).await;
    let conversation_id = conversation["id"].as_i64().unwrap();

    let (status, body) = get_authed(
        app,
        &format!("/conversations/{conversation_id}/messages"),
        &token_for(eve),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN, "body: {body}");
}
