use futures_util::StreamExt;
use serde_json::json;
use valezap_sync::{ChatTransport, ClientConfig, HttpTransport, SyncError, HISTORY_PATH, SEND_PATH, STREAM_PATH};
use valezap_types::{ConversationKey, Origin};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn conv() -> ConversationKey {
    ConversationKey::new("s1", "p1")
}

fn transport(server: &MockServer, api_key: &str) -> HttpTransport {
    let config = ClientConfig {
        server_base_url: format!("{}/", server.uri()),
        api_key: api_key.to_string(),
        ..ClientConfig::default()
    };
    HttpTransport::new(&config).unwrap()
}

fn sse(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_raw(body.as_bytes().to_vec(), "text/event-stream")
}

#[tokio::test]
async fn history_is_normalized_and_bad_entries_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .and(query_param("sessao", "s1"))
        .and(query_param("player", "p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [
                {"id": "1", "session_id": "s1", "message": "oi", "is_from_user": true,
                 "created_at": "2024-05-01T12:30:00"},
                {"id": "2", "message": "bad flag", "is_from_user": "yes"},
                {"id": "3", "message": "   "},
                {"id": 4, "text": "ola!", "origin": "assistant"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let messages = transport(&server, "").fetch_history(&conv()).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].id.as_deref(), Some("1"));
    assert_eq!(messages[0].origin, Origin::User);
    assert!(messages[0].timestamp.is_some());
    assert_eq!(messages[1].id.as_deref(), Some("4"));
    assert_eq!(messages[1].origin, Origin::Assistant);
    assert_eq!(messages[1].conversation, conv());
}

#[tokio::test]
async fn history_error_status_is_a_transport_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_string("Missing sessao parameter"))
        .mount(&server)
        .await;

    let err = transport(&server, "").fetch_history(&conv()).await.unwrap_err();
    assert!(matches!(err, SyncError::Status { status: 400, .. }));
    assert_eq!(err.code(), "TRANSPORT_FAILURE");
}

#[tokio::test]
async fn send_posts_conversation_and_parses_record_and_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .and(header("x-api-key", "secret"))
        .and(body_json(json!({"session": "s1", "player": "p1", "text": "oi", "mensagem": "oi"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "record": {"id": "m1", "session_id": "s1", "message": "oi", "is_from_user": true},
                "reply": {"id": "m2", "session_id": "s1", "message": "ola!", "is_from_user": false}
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = transport(&server, "secret").send(&conv(), "oi").await.unwrap();
    let record = outcome.record.unwrap();
    let reply = outcome.reply.unwrap();
    assert_eq!(record.id.as_deref(), Some("m1"));
    assert_eq!(record.origin, Origin::User);
    assert_eq!(reply.id.as_deref(), Some("m2"));
    assert_eq!(reply.text, "ola!");
}

#[tokio::test]
async fn send_server_error_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("Erro interno"))
        .mount(&server)
        .await;

    let err = transport(&server, "").send(&conv(), "oi").await.unwrap_err();
    match err {
        SyncError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "Erro interno");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn send_with_unreadable_body_still_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
        .mount(&server)
        .await;

    let outcome = transport(&server, "").send(&conv(), "oi").await.unwrap();
    assert!(outcome.record.is_none());
    assert!(outcome.reply.is_none());
}

#[tokio::test]
async fn stream_yields_messages_then_reports_close() {
    let server = MockServer::start().await;
    let body = concat!(
        ": keep-alive\n\n",
        "data: {\"id\":\"m1\",\"session_id\":\"s1\",\"message\":\"oi\",\"is_from_user\":true}\n\n",
        "data: not json\n\n",
        "data: {\"id\":\"m2\",\"text\":\"ola!\",\"origin\":\"assistant\"}\n\n",
    );
    Mock::given(method("GET"))
        .and(path(STREAM_PATH))
        .and(query_param("sessao", "s1"))
        .and(query_param("player", "p1"))
        .respond_with(sse(body))
        .mount(&server)
        .await;

    let mut stream = transport(&server, "").open_stream(&conv()).await.unwrap();
    let first = stream.next().await.unwrap().unwrap();
    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(first.id.as_deref(), Some("m1"));
    assert_eq!(first.origin, Origin::User);
    assert_eq!(second.id.as_deref(), Some("m2"));

    let end = stream.next().await.unwrap().unwrap_err();
    assert_eq!(end.code(), "STREAM_FAILURE");
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn stream_open_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let result = transport(&server, "").open_stream(&conv()).await;
    assert!(matches!(result, Err(SyncError::Status { status: 503, .. })));
}
