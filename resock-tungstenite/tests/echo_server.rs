//! Integration tests against an in-process tokio-tungstenite echo server.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use resock_core::{Client, ClientConfig, ClientError, ConnectionStatus, Payload};
use resock_tungstenite::TungsteniteConnector;

async fn spawn_echo_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    match message {
                        Message::Text(_) | Message::Binary(_) => {
                            if ws.send(message).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => {
                            let _ = ws.close(None).await;
                            break;
                        }
                        // Ping replies are handled by tungstenite.
                        _ => {}
                    }
                }
            });
        }
    });
    addr
}

async fn wait_for_status(
    rx: &mut mpsc::UnboundedReceiver<ConnectionStatus>,
    wanted: ConnectionStatus,
) {
    loop {
        let status = timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for status")
            .expect("state channel closed");
        if status == wanted {
            return;
        }
    }
}

#[tokio::test]
async fn echo_round_trip_and_graceful_disconnect() {
    let addr = spawn_echo_server().await;

    let client = Client::new(
        ClientConfig::default(),
        Arc::new(TungsteniteConnector::new()),
    );
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
    client.on_message(move |payload| {
        let _ = msg_tx.send(payload.clone());
    });
    let (state_tx, mut state_rx) = mpsc::unbounded_channel();
    client.on_state_change(move |change| {
        let _ = state_tx.send(change.current);
    });

    client.connect(&format!("ws://{addr}/stream"), &[]).unwrap();
    wait_for_status(&mut state_rx, ConnectionStatus::Connected).await;

    client.send("hello over the wire").unwrap();
    let echoed = timeout(Duration::from_secs(5), msg_rx.recv())
        .await
        .expect("no echo")
        .unwrap();
    assert_eq!(echoed, Payload::Text("hello over the wire".into()));

    client.send(vec![0x01u8, 0x02, 0x03]).unwrap();
    let echoed = timeout(Duration::from_secs(5), msg_rx.recv())
        .await
        .expect("no binary echo")
        .unwrap();
    assert_eq!(echoed, Payload::Binary(vec![0x01, 0x02, 0x03]));

    timeout(Duration::from_secs(5), client.disconnect(1000, "done"))
        .await
        .expect("disconnect hung")
        .unwrap();
    assert_eq!(client.status(), ConnectionStatus::Disconnected);

    let metrics = client.metrics();
    assert_eq!(metrics.messages_sent, 2);
    assert_eq!(metrics.messages_received, 2);
}

#[tokio::test]
async fn refused_connection_exhausts_retries() {
    // Bind and drop to get a port with nothing listening.
    let dead_addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let config = ClientConfig::default()
        .with_max_reconnect_attempts(2)
        .with_reconnect_interval(Duration::from_millis(50))
        .with_connection_timeout(Duration::from_secs(2));
    let client = Client::new(config, Arc::new(TungsteniteConnector::new()));

    let (state_tx, mut state_rx) = mpsc::unbounded_channel();
    client.on_state_change(move |change| {
        let _ = state_tx.send((change.current, change.cause.clone()));
    });

    client.connect(&format!("ws://{dead_addr}/"), &[]).unwrap();

    let cause = loop {
        let (status, cause) = timeout(Duration::from_secs(10), state_rx.recv())
            .await
            .expect("timed out waiting for terminal state")
            .unwrap();
        if status == ConnectionStatus::Disconnected {
            break cause;
        }
    };
    assert!(matches!(
        cause.as_deref(),
        Some(ClientError::RetriesExhausted { attempts: 2 })
    ));
    assert_eq!(client.metrics().reconnects, 1);
}

#[tokio::test]
async fn dropped_connection_triggers_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        // First connection: accept the handshake, then drop the socket.
        if let Ok((stream, _)) = listener.accept().await {
            let ws = tokio_tungstenite::accept_async(stream).await;
            drop(ws);
        }
        // Second connection: stay alive.
        if let Ok((stream, _)) = listener.accept().await {
            if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                while let Some(Ok(_)) = ws.next().await {}
            }
        }
    });

    let config = ClientConfig::default().with_reconnect_interval(Duration::from_millis(50));
    let client = Client::new(config, Arc::new(TungsteniteConnector::new()));
    let (state_tx, mut state_rx) = mpsc::unbounded_channel();
    client.on_state_change(move |change| {
        let _ = state_tx.send(change.current);
    });

    client.connect(&format!("ws://{addr}/"), &[]).unwrap();
    wait_for_status(&mut state_rx, ConnectionStatus::Connected).await;
    // The server drops us; the client must come back on its own.
    wait_for_status(&mut state_rx, ConnectionStatus::Reconnecting).await;
    wait_for_status(&mut state_rx, ConnectionStatus::Connected).await;
    assert_eq!(client.metrics().reconnects, 1);
}

#[tokio::test]
async fn subprotocols_are_offered_in_the_handshake() {
    use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (proto_tx, proto_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = move |req: &Request, resp: Response| {
            let offered = req
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let _ = proto_tx.send(offered);
            Ok(resp)
        };
        if let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await {
            while let Some(Ok(_)) = ws.next().await {}
        }
    });

    let client = Client::new(
        ClientConfig::default(),
        Arc::new(TungsteniteConnector::new()),
    );
    client
        .connect(&format!("ws://{addr}/"), &["graphql-ws", "v2.chat"])
        .unwrap();

    let offered = timeout(Duration::from_secs(10), proto_rx)
        .await
        .expect("handshake never reached the server")
        .unwrap();
    assert_eq!(offered.as_deref(), Some("graphql-ws, v2.chat"));
}
