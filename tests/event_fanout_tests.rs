mod common;

use chatcore::events;
use chatcore::models::{MessageType, ReadStatus, SendMessageDto};
use chatcore::persistence::PersistenceGateway;
use chatcore::presence::PresenceRegistry;
use chatcore::services::{ConversationService, MessageService};
use uuid::Uuid;

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

#[tokio::test]
async fn unified_message_carries_post_commit_unread_counts() {
    let pool = test_pool().await;
    let gateway = PersistenceGateway::new(pool.clone());
    let messages = MessageService::new(gateway.clone());
    let conversations = ConversationService::new(gateway.clone());

    let alice = create_user(&pool, "alice").await;
    let bob = create_user(&pool, "bob").await;
    let conversation = conversations.create_or_get_1to1(alice, bob).await.unwrap();

    let message = messages.send(conversation.id, alice, text("hi bob")).await.unwrap();

    let unified = events::build_unified_message(
        &gateway,
        conversation.id,
        message.into(),
        &[alice, bob],
    )
    .await
    .unwrap();

    let bob_update = unified
        .conversation_updates
        .iter()
        .find(|u| u.user_id == bob)
        .unwrap();
    assert_eq!(bob_update.unread_count, 1);

    let alice_update = unified
        .conversation_updates
        .iter()
        .find(|u| u.user_id == alice)
        .unwrap();
    assert_eq!(alice_update.unread_count, 0);
}

#[tokio::test]
async fn unified_status_reflects_count_drop_after_a_read_transition() {
    let pool = test_pool().await;
    let gateway = PersistenceGateway::new(pool.clone());
    let messages = MessageService::new(gateway.clone());
    let conversations = ConversationService::new(gateway.clone());

    let alice = create_user(&pool, "alice").await;
    let bob = create_user(&pool, "bob").await;
    let conversation = conversations.create_or_get_1to1(alice, bob).await.unwrap();
    let message = messages.send(conversation.id, alice, text("hi bob")).await.unwrap();

    let transitioned = messages.mark_read(&[message.id], bob).await.unwrap();
    let updates = vec![events::StatusUpdate {
        message_id: message.id,
        user_id: bob,
        status: ReadStatus::Read,
        read_at: transitioned[0].read_at,
    }];

    let unified = events::build_unified_status(&gateway, conversation.id, updates, &[alice, bob])
        .await
        .unwrap();

    let bob_update = unified
        .conversation_updates
        .iter()
        .find(|u| u.user_id == bob)
        .unwrap();
    assert_eq!(bob_update.unread_count, 0, "reading the only message should zero the count");
}

#[tokio::test]
async fn unified_deletion_lists_the_deleted_id() {
    let pool = test_pool().await;
    let gateway = PersistenceGateway::new(pool.clone());
    let messages = MessageService::new(gateway.clone());
    let conversations = ConversationService::new(gateway.clone());

    let alice = create_user(&pool, "alice").await;
    let bob = create_user(&pool, "bob").await;
    let conversation = conversations.create_or_get_1to1(alice, bob).await.unwrap();
    let message = messages.send(conversation.id, alice, text("oops")).await.unwrap();
    messages.delete(message.id, alice).await.unwrap();

    let unified = events::build_unified_deletion(&gateway, conversation.id, vec![message.id], &[alice, bob])
        .await
        .unwrap();

    assert_eq!(unified.deleted_message_ids, vec![message.id]);
}

#[tokio::test]
async fn presence_resolves_conversation_participants_to_live_sessions() {
    let presence = PresenceRegistry::new();

    let alice = 1_i64;
    let bob = 2_i64;
    let alice_session = Uuid::new_v4();
    let bob_session_a = Uuid::new_v4();
    let bob_session_b = Uuid::new_v4();

    presence.attach(alice, alice_session).await;
    presence.attach(bob, bob_session_a).await;
    presence.attach(bob, bob_session_b).await;

    let sessions = presence.sessions_for_users(&[alice, bob]).await;
    assert_eq!(sessions.len(), 3, "every live session of both participants should resolve");
    assert!(sessions.contains(&alice_session));
    assert!(sessions.contains(&bob_session_a));
    assert!(sessions.contains(&bob_session_b));
}
