mod support;

use data_encoding::BASE64;
use futures_util::SinkExt;
use serde_json::json;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as TungsteniteMessage};

use support::{assert_silent, media_frame, next_event, spawn_server, text_frame};

#[tokio::test]
async fn two_members_chat_and_reply() {
    let server = spawn_server().await;
    let alice = server.register("alice").await;
    let bob = server.register("bob").await;
    let room_id = server.create_room(&alice, "test", &[]).await;

    let mut alice_ws = server.join(&room_id, &alice).await;
    assert_eq!(next_event(&mut alice_ws).await, json!({"type": "chat.active", "content": 1}));

    server.add_members(&alice, &room_id, &[bob.id]).await;
    assert_eq!(
        next_event(&mut alice_ws).await,
        json!({"type": "chat.notification", "content": "bob joined the chat."})
    );

    let mut bob_ws = server.join(&room_id, &bob).await;
    for ws in [&mut alice_ws, &mut bob_ws] {
        assert_eq!(next_event(ws).await, json!({"type": "chat.active", "content": 2}));
    }

    bob_ws
        .send(text_frame(json!({"message_type": "message", "message": "hi"})))
        .await
        .expect("send message");
    let mut message_id = String::new();
    for ws in [&mut alice_ws, &mut bob_ws] {
        let event = next_event(ws).await;
        assert_eq!(event["type"], "chat.message");
        assert_eq!(event["text_content"], "hi");
        assert_eq!(event["username"], "bob");
        message_id = event["id"].as_str().expect("message id").to_string();
    }

    alice_ws
        .send(text_frame(json!({
            "message_type": "reply",
            "message": "hello bob",
            "previous_message_id": message_id,
        })))
        .await
        .expect("send reply");
    for ws in [&mut alice_ws, &mut bob_ws] {
        let event = next_event(ws).await;
        assert_eq!(event["type"], "chat.reply");
        assert_eq!(event["reply_format"], "text");
        assert_eq!(event["text_content"], "hello bob");
        assert_eq!(event["previous_message_content"], "hi");
        assert_eq!(event["previous_sender_username"], "bob");
        assert_eq!(event["previous_message_id"], message_id.as_str());
    }

    bob_ws
        .send(text_frame(json!({"message_type": "typing", "message": "typing"})))
        .await
        .expect("send typing");
    for ws in [&mut alice_ws, &mut bob_ws] {
        assert_eq!(
            next_event(ws).await,
            json!({"type": "chat.typing", "username": "bob", "content": "bob is typing..."})
        );
    }

    // 空消息与格式错误的帧都被丢弃，连接保持可用
    bob_ws
        .send(text_frame(json!({"message_type": "message", "message": ""})))
        .await
        .expect("send empty");
    bob_ws
        .send(TungsteniteMessage::Text("not json".into()))
        .await
        .expect("send garbage");
    assert_silent(&mut alice_ws).await;

    server.remove_members(&alice, &room_id, &[bob.id]).await;
    for ws in [&mut alice_ws, &mut bob_ws] {
        assert_eq!(
            next_event(ws).await,
            json!({"type": "chat.notification", "content": "bob left the chat."})
        );
    }

    bob_ws.close(None).await.expect("close bob");
    assert_eq!(next_event(&mut alice_ws).await, json!({"type": "chat.active", "content": 1}));

    let bob_record = application::UserRepository::find_by_id(
        server.storage.as_ref(),
        domain::UserId::from(bob.id),
    )
    .await
    .expect("lookup")
    .expect("bob exists");
    assert!(!bob_record.is_online);
}

#[tokio::test]
async fn media_is_broadcast_after_it_is_stored() {
    let server = spawn_server().await;
    let alice = server.register("alice").await;
    let room_id = server.create_room(&alice, "media", &[]).await;

    let mut ws = server.join(&room_id, &alice).await;
    next_event(&mut ws).await;

    let png = [0x89, b'P', b'N', b'G', 0x0d, 0x0a];
    ws.send(media_frame(
        json!({"message_type": "media", "media_format": "image"}),
        &png,
    ))
    .await
    .expect("send media");

    let event = next_event(&mut ws).await;
    assert_eq!(event["type"], "chat.media");
    assert_eq!(event["media_format"], "image");
    assert_eq!(event["content"], BASE64.encode(&png));
    let filename = event["filename"].as_str().expect("filename");
    assert!(filename.starts_with("media_") && filename.ends_with(".png"));

    let image_id = event["id"].as_str().expect("id").to_string();
    ws.send(media_frame(
        json!({
            "message_type": "reply",
            "media_format": "audio",
            "previous_message_id": image_id,
        }),
        b"RIFF",
    ))
    .await
    .expect("send media reply");

    let reply = next_event(&mut ws).await;
    assert_eq!(reply["type"], "chat.reply");
    assert_eq!(reply["reply_format"], "media");
    assert_eq!(reply["previous_message_content"], "IMAGE");
    assert_eq!(reply["previous_message_id"], image_id.as_str());
    assert_eq!(reply["media_format"], "audio");

    // 空媒体段：整个房间收到错误，不产生消息
    ws.send(media_frame(json!({"message_type": "media", "media_format": "video"}), b""))
        .await
        .expect("send empty media");
    assert_eq!(
        next_event(&mut ws).await,
        json!({"type": "chat.error", "content": "No file detected or invalid file data."})
    );

    let history = server.history(&alice, &room_id, None).await;
    let results = history["results"].as_array().expect("results");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["message_format"], "AUD");
    assert_eq!(results[0]["is_reply"], true);
    assert_eq!(results[0]["previous_message_content"], "IMAGE");
    assert!(results[0]["media"].as_str().expect("path").starts_with("audios/"));
    assert_eq!(results[1]["message_format"], "IMG");
    assert_eq!(
        results[1]["media"].as_str().expect("path"),
        format!("images/{filename}")
    );
}

#[tokio::test]
async fn non_member_is_closed_with_4001() {
    let server = spawn_server().await;
    let alice = server.register("alice").await;
    let mallory = server.register("mallory").await;
    let room_id = server.create_room(&alice, "private", &[]).await;

    let mut ws = server.join(&room_id, &mallory).await;
    let frame = loop {
        match futures_util::StreamExt::next(&mut ws).await {
            Some(Ok(TungsteniteMessage::Close(frame))) => break frame,
            Some(Ok(_)) => continue,
            other => panic!("expected close frame, got {other:?}"),
        }
    };
    let frame = frame.expect("close frame");
    assert_eq!(u16::from(frame.code), 4001);
}

#[tokio::test]
async fn rejects_before_upgrade() {
    let server = spawn_server().await;
    let alice = server.register("alice").await;
    let room_id = server.create_room(&alice, "general", &[]).await;

    match server.connect(&room_id, None).await {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 401),
        other => panic!("expected 401, got {other:?}"),
    }
    match server
        .connect(&room_id, Some("Bearer not-a-token".to_string()))
        .await
    {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 401),
        other => panic!("expected 401, got {other:?}"),
    }
    match server
        .connect("missing-room", Some(format!("Bearer {}", alice.token)))
        .await
    {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 404),
        other => panic!("expected 404, got {other:?}"),
    }

    // scheme 不区分大小写
    let mut ws = server
        .connect(&room_id, Some(format!("bearer {}", alice.token)))
        .await
        .expect("lowercase scheme accepted");
    assert_eq!(next_event(&mut ws).await, json!({"type": "chat.active", "content": 1}));
}
