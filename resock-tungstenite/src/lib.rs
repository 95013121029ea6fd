//! # resock-tungstenite
//!
//! `tokio-tungstenite`-backed transport adapter for `resock-core`.
//!
//! [`TungsteniteConnector`] implements the core's
//! [`TransportConnector`] contract: each `open` performs the WebSocket
//! handshake (delegated entirely to `tokio-tungstenite`), splits the stream,
//! and spawns a read loop that forwards frames and connection failures
//! through the core's epoch-tagged [`EventSink`]. The returned
//! [`TransportLink`] owns the write half; dropping it tears the read loop
//! and the socket down.
//!
//! TLS for `wss://` URLs is opt-in via the `native-tls` or `rustls-tls`
//! cargo features.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use resock_core::{Client, ClientConfig};
//! use resock_tungstenite::TungsteniteConnector;
//!
//! let client = Client::new(ClientConfig::default(), Arc::new(TungsteniteConnector::new()));
//! client.connect("ws://127.0.0.1:9001/stream", &[])?;
//! ```

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use resock_core::{
    EventSink, Payload, TransportConnector, TransportError, TransportErrorKind, TransportFuture,
    TransportLink,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ════════════════════════════════════════════════════════════════════
// Connector
// ════════════════════════════════════════════════════════════════════

/// [`TransportConnector`] over `tokio-tungstenite`.
#[derive(Debug, Default)]
pub struct TungsteniteConnector {
    _private: (),
}

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransportConnector for TungsteniteConnector {
    fn open(
        &self,
        url: &Url,
        protocols: &[String],
        sink: EventSink,
    ) -> TransportFuture<'_, Box<dyn TransportLink>> {
        let url = url.clone();
        let protocols = protocols.to_vec();
        Box::pin(async move {
            let mut request = url
                .as_str()
                .into_client_request()
                .map_err(map_ws_error)?;
            if !protocols.is_empty() {
                let value = HeaderValue::from_str(&protocols.join(", ")).map_err(|e| {
                    TransportError::new(TransportErrorKind::Protocol, e.to_string())
                })?;
                request
                    .headers_mut()
                    .insert("Sec-WebSocket-Protocol", value);
            }

            let (stream, _response) = connect_async(request).await.map_err(map_ws_error)?;

            #[cfg(feature = "tracing")]
            tracing::debug!(%url, "websocket opened");

            let (write, read) = stream.split();
            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            tokio::spawn(run_read_loop(read, sink, shutdown_rx));

            Ok(Box::new(TungsteniteLink {
                write,
                shutdown: Some(shutdown_tx),
            }) as Box<dyn TransportLink>)
        })
    }
}

// ════════════════════════════════════════════════════════════════════
// Link
// ════════════════════════════════════════════════════════════════════

/// Write half of one open connection.
struct TungsteniteLink {
    write: SplitSink<WsStream, Message>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TransportLink for TungsteniteLink {
    fn send(&mut self, payload: Payload) -> TransportFuture<'_, ()> {
        let message = match payload {
            Payload::Text(text) => Message::Text(text.into()),
            Payload::Binary(bytes) => Message::Binary(bytes.into()),
        };
        Box::pin(async move { self.write.send(message).await.map_err(map_ws_error) })
    }

    fn ping(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.write
                .send(Message::Ping(Vec::new().into()))
                .await
                .map_err(map_ws_error)
        })
    }

    fn close(&mut self, code: u16, reason: &str) -> TransportFuture<'_, ()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        Box::pin(async move {
            self.write
                .send(Message::Close(Some(frame)))
                .await
                .map_err(map_ws_error)
        })
    }
}

impl Drop for TungsteniteLink {
    fn drop(&mut self) {
        // Stops the read loop, which releases the other half of the socket.
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

// ════════════════════════════════════════════════════════════════════
// Read loop
// ════════════════════════════════════════════════════════════════════

/// Forward inbound frames through the sink until the connection ends, the
/// link is dropped, or an error surfaces.
async fn run_read_loop(
    mut read: SplitStream<WsStream>,
    sink: EventSink,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut close_reported = false;
    loop {
        let item = tokio::select! {
            _ = &mut shutdown => break,
            item = read.next() => item,
        };
        match item {
            Some(Ok(Message::Text(text))) => sink.message(Payload::Text(text.as_str().to_owned())),
            Some(Ok(Message::Binary(bytes))) => sink.message(Payload::Binary(bytes.to_vec())),
            Some(Ok(Message::Pong(_))) => sink.pong(),
            // Ping replies are queued by tungstenite itself.
            Some(Ok(Message::Ping(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = match frame {
                    Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_owned()),
                    // 1005: no status code present.
                    None => (1005, String::new()),
                };
                sink.closed(code, &reason, true);
                close_reported = true;
                break;
            }
            Some(Ok(_)) => {} // raw frames are not surfaced
            Some(Err(error)) => {
                let mapped = map_ws_error(error);
                if mapped.kind != TransportErrorKind::Closed {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%mapped, "websocket read failed");
                    sink.failed(mapped);
                    close_reported = true;
                }
                break;
            }
            None => break,
        }
    }
    if !close_reported {
        // Stream ended without a close handshake: abnormal closure.
        sink.closed(1006, "connection lost", false);
    }
}

// ════════════════════════════════════════════════════════════════════
// Error mapping
// ════════════════════════════════════════════════════════════════════

fn map_ws_error(error: WsError) -> TransportError {
    let kind = match &error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportErrorKind::Closed,
        WsError::Io(io) => match io.kind() {
            std::io::ErrorKind::ConnectionRefused => TransportErrorKind::ConnectionRefused,
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => TransportErrorKind::ConnectionReset,
            std::io::ErrorKind::TimedOut => TransportErrorKind::Timeout,
            _ => TransportErrorKind::Io,
        },
        WsError::Protocol(_) | WsError::Capacity(_) => TransportErrorKind::Protocol,
        _ => TransportErrorKind::Other,
    };
    TransportError::new(kind, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_specific_kinds() {
        let refused = WsError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert_eq!(map_ws_error(refused).kind, TransportErrorKind::ConnectionRefused);

        let reset = WsError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert_eq!(map_ws_error(reset).kind, TransportErrorKind::ConnectionReset);

        let timed_out =
            WsError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow"));
        assert_eq!(map_ws_error(timed_out).kind, TransportErrorKind::Timeout);
    }

    #[test]
    fn closed_variants_map_to_closed() {
        assert_eq!(
            map_ws_error(WsError::ConnectionClosed).kind,
            TransportErrorKind::Closed
        );
        assert_eq!(
            map_ws_error(WsError::AlreadyClosed).kind,
            TransportErrorKind::Closed
        );
    }

    #[test]
    fn protocol_violations_map_to_protocol() {
        use tokio_tungstenite::tungstenite::error::ProtocolError;
        let error = WsError::Protocol(ProtocolError::InvalidOpcode(42));
        assert_eq!(map_ws_error(error).kind, TransportErrorKind::Protocol);
    }
}
