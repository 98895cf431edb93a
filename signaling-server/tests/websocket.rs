use std::time::Duration;

use serde_json::{json, Value};
use warp::test::WsClient;

use webrtc_http_signaling_server::{signaling_filter, RelayState};

async fn connect(state: &RelayState) -> WsClient {
    warp::test::ws()
        .handshake(signaling_filter(state.clone()))
        .await
        .expect("handshake")
}

async fn recv_json(client: &mut WsClient) -> Value {
    let message = tokio::time::timeout(Duration::from_secs(2), client.recv())
        .await
        .expect("timed out waiting for relay")
        .expect("websocket closed");
    serde_json::from_str(message.to_str().expect("text frame")).expect("json")
}

async fn search(client: &mut WsClient, name: &str) -> Value {
    client
        .send_text(json!({"type": "search", "serverName": name}).to_string())
        .await;
    recv_json(client).await
}

#[tokio::test]
async fn ready_reaches_registered_server_only() {
    let state = RelayState::default();
    let mut a = connect(&state).await;
    let mut b = connect(&state).await;

    a.send_text(json!({"type": "register", "serverName": "X"}).to_string())
        .await;
    // the search round trip guarantees the register was processed
    assert_eq!(search(&mut b, "X").await, json!({"type": "found", "name": "X"}));

    b.send_text(json!({"type": "ready", "serverName": "X", "clientId": "c1"}).to_string())
        .await;
    assert_eq!(
        recv_json(&mut a).await,
        json!({"type": "ready", "from": "c1", "serverName": "X"})
    );
    assert!(tokio::time::timeout(Duration::from_millis(100), b.recv())
        .await
        .is_err());
}

#[tokio::test]
async fn search_for_unknown_name_is_not_found() {
    let state = RelayState::default();
    let mut client = connect(&state).await;
    assert_eq!(
        search(&mut client, "never-registered").await,
        json!({"type": "not-found", "name": "never-registered"})
    );
}

#[tokio::test]
async fn malformed_message_keeps_connection_open() {
    let state = RelayState::default();
    let mut client = connect(&state).await;
    client.send_text("{this is not json").await;
    client
        .send_text(json!({"type": "teleport", "serverName": "X"}).to_string())
        .await;
    assert_eq!(
        search(&mut client, "X").await,
        json!({"type": "not-found", "name": "X"})
    );
}

#[tokio::test]
async fn closed_connection_leaves_no_registry_entries() {
    let state = RelayState::default();
    let mut both = connect(&state).await;
    let mut observer = connect(&state).await;

    both.send_text(json!({"type": "register", "serverName": "S"}).to_string())
        .await;
    both.send_text(json!({"type": "ready", "serverName": "S", "clientId": "C"}).to_string())
        .await;
    // a connection in both roles hears its own ready through the server entry
    assert_eq!(
        recv_json(&mut both).await,
        json!({"type": "ready", "from": "C", "serverName": "S"})
    );
    drop(both);

    let mut cleaned = false;
    for _ in 0..50 {
        if search(&mut observer, "S").await == json!({"type": "not-found", "name": "S"}) {
            cleaned = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(cleaned, "server entry survived the close");
    assert_eq!(state.relay.read().await.client(&"C".into()), None);
}
