use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use voicelink_types::{InboundMessage, OutboundMessage};

use crate::config::Config;
use crate::consts;
use crate::error::{Error, Result};

/// What the channel reports back to its owner once open.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Inbound(InboundMessage),
    Closed { code: u16 },
    TransportError { message: String },
}

enum Outgoing {
    Record(OutboundMessage),
    Close(u16),
}

/// A persistent, ordered, bidirectional record channel to the agent
/// endpoint. Ordering holds in both directions: outbound records drain
/// through one queue onto one socket, inbound records are forwarded from
/// one read loop.
pub struct MessageChannel {
    out_tx: tokio::sync::mpsc::Sender<Outgoing>,
    open: Arc<AtomicBool>,
    send_handle: tokio::task::JoinHandle<()>,
    recv_handle: tokio::task::JoinHandle<()>,
}

fn build_request(config: &Config) -> Result<Request> {
    let mut request = config
        .endpoint()
        .into_client_request()
        .map_err(|e| Error::Config(format!("bad endpoint: {e}")))?;
    let token = config.auth_token().expose_secret();
    if !token.is_empty() {
        let value = format!("Bearer {token}")
            .parse()
            .map_err(|_| Error::Config("auth token is not a valid header value".to_string()))?;
        request
            .headers_mut()
            .insert(consts::AUTHORIZATION_HEADER, value);
    }
    Ok(request)
}

/// Open the channel. Resolving successfully is the open event; if the
/// handshake does not finish within the configured timeout the attempt is
/// abandoned and `Error::ConnectTimeout` is returned.
pub async fn connect(
    config: &Config,
    events: tokio::sync::mpsc::Sender<ChannelEvent>,
    capacity: usize,
) -> Result<MessageChannel> {
    let request = build_request(config)?;
    let handshake = tokio_tungstenite::connect_async(request);
    let (ws_stream, _) = tokio::time::timeout(config.connect_timeout(), handshake)
        .await
        .map_err(|_| Error::ConnectTimeout(config.connect_timeout()))?
        .map_err(|e| Error::Channel(e.to_string()))?;
    tracing::info!("channel open: {}", config.endpoint());

    let (mut write, mut read) = ws_stream.split();
    let (out_tx, mut out_rx) = tokio::sync::mpsc::channel::<Outgoing>(capacity);
    let open = Arc::new(AtomicBool::new(true));

    let send_open = open.clone();
    let send_handle = tokio::spawn(async move {
        while let Some(outgoing) = out_rx.recv().await {
            match outgoing {
                Outgoing::Record(record) => match serde_json::to_string(&record) {
                    Ok(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            tracing::error!("failed to send record: {}", e);
                        }
                    }
                    Err(e) => {
                        tracing::error!("failed to serialize record: {}", e);
                    }
                },
                Outgoing::Close(code) => {
                    send_open.store(false, Ordering::SeqCst);
                    let frame = CloseFrame {
                        code: code.into(),
                        reason: "".into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        tracing::debug!("close frame not delivered: {}", e);
                    }
                    break;
                }
            }
        }
    });

    let recv_open = open.clone();
    let recv_handle = tokio::spawn(async move {
        let mut saw_close = false;
        while let Some(message) = read.next().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!("failed to read from channel: {}", e);
                    recv_open.store(false, Ordering::SeqCst);
                    let _ = events
                        .send(ChannelEvent::TransportError {
                            message: e.to_string(),
                        })
                        .await;
                    return;
                }
            };
            match message {
                Message::Text(text) => match serde_json::from_str::<InboundMessage>(&text) {
                    Ok(record) => {
                        if events.send(ChannelEvent::Inbound(record)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        // Unknown tags and junk are dropped, never fatal.
                        tracing::warn!("dropping malformed record: {}, text=> {:?}", e, text);
                    }
                },
                Message::Binary(bin) => {
                    tracing::warn!("unexpected binary message: {} bytes", bin.len());
                }
                Message::Close(frame) => {
                    let code = frame.map(|f| u16::from(f.code)).unwrap_or(1005);
                    tracing::info!("channel closed by peer: code={}", code);
                    recv_open.store(false, Ordering::SeqCst);
                    saw_close = true;
                    let _ = events.send(ChannelEvent::Closed { code }).await;
                    break;
                }
                _ => {}
            }
        }
        if !saw_close {
            // Stream ended without a close frame.
            recv_open.store(false, Ordering::SeqCst);
            let _ = events.send(ChannelEvent::Closed { code: 1006 }).await;
        }
    });

    Ok(MessageChannel {
        out_tx,
        open,
        send_handle,
        recv_handle,
    })
}

impl MessageChannel {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Queue a record for delivery. Called while the channel is not open,
    /// the record is silently dropped; capture runs on its own cadence and
    /// must never stall on channel state.
    pub fn send(&self, record: OutboundMessage) {
        if !self.is_open() {
            tracing::debug!("channel not open, dropping outbound record");
            return;
        }
        if let Err(e) = self.out_tx.try_send(Outgoing::Record(record)) {
            tracing::warn!("outbound queue rejected record: {}", e);
        }
    }

    /// Send a close frame with the given code and shut both pump tasks
    /// down. Safe to call on an already-dead channel.
    pub async fn close(self, code: u16) {
        self.open.store(false, Ordering::SeqCst);
        if self.out_tx.send(Outgoing::Close(code)).await.is_ok() {
            let _ = self.send_handle.await;
        } else {
            self.send_handle.abort();
        }
        self.recv_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio_tungstenite::tungstenite::handshake::server;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    type AgentSocket = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

    async fn spawn_agent<F, Fut>(script: F) -> (String, tokio::task::JoinHandle<()>)
    where
        F: FnOnce(AgentSocket) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            script(ws).await;
        });
        (format!("ws://{addr}"), handle)
    }

    fn test_config(endpoint: &str, timeout_ms: u64) -> Config {
        Config::builder()
            .with_endpoint(endpoint)
            .with_auth_token("secret")
            .with_connect_timeout(Duration::from_millis(timeout_ms))
            .build()
    }

    async fn next_event(events: &mut tokio::sync::mpsc::Receiver<ChannelEvent>) -> ChannelEvent {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for a channel event")
            .expect("event stream closed")
    }

    #[tokio::test]
    async fn connect_times_out_when_the_handshake_stalls() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (events_tx, _events_rx) = tokio::sync::mpsc::channel(8);

        let result = connect(&test_config(&url, 100), events_tx, 8).await;
        assert!(matches!(result, Err(Error::ConnectTimeout(_))));
        drop(listener);
    }

    #[tokio::test]
    async fn bearer_token_rides_on_the_handshake() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let callback = |request: &server::Request, response: server::Response| {
                let auth = request
                    .headers()
                    .get(consts::AUTHORIZATION_HEADER)
                    .expect("missing auth header");
                assert_eq!(auth, "Bearer secret");
                Ok(response)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .unwrap();
            while ws.next().await.is_some() {}
        });
        let (events_tx, _events_rx) = tokio::sync::mpsc::channel(8);

        let channel = connect(&test_config(&url, 1_000), events_tx, 8)
            .await
            .unwrap();
        assert!(channel.is_open());
        channel.close(consts::CLOSE_NORMAL).await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn inbound_records_are_forwarded_and_junk_is_dropped() {
        let (url, server) = spawn_agent(|mut ws| async move {
            ws.send(Message::Text("not json".to_string())).await.unwrap();
            ws.send(Message::Text(r#"{"type":"telemetry","n":1}"#.to_string()))
                .await
                .unwrap();
            ws.send(Message::Text(r#"{"type":"ping"}"#.to_string()))
                .await
                .unwrap();
            ws.close(Some(CloseFrame {
                code: CloseCode::from(1000),
                reason: "".into(),
            }))
            .await
            .unwrap();
            while ws.next().await.is_some() {}
        })
        .await;
        let (events_tx, mut events_rx) = tokio::sync::mpsc::channel(8);

        let channel = connect(&test_config(&url, 1_000), events_tx, 8)
            .await
            .unwrap();

        let event = next_event(&mut events_rx).await;
        assert!(matches!(
            event,
            ChannelEvent::Inbound(InboundMessage::Ping)
        ));
        let event = next_event(&mut events_rx).await;
        assert!(matches!(event, ChannelEvent::Closed { code: 1000 }));

        assert!(!channel.is_open());
        // Dropped, not an error: the session may still be winding down.
        channel.send(OutboundMessage::Pong);
        channel.close(consts::CLOSE_NORMAL).await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn abrupt_disconnect_surfaces_a_transport_error() {
        let (url, server) = spawn_agent(|ws| async move {
            drop(ws);
        })
        .await;
        let (events_tx, mut events_rx) = tokio::sync::mpsc::channel(8);

        let channel = connect(&test_config(&url, 1_000), events_tx, 8)
            .await
            .unwrap();

        let event = next_event(&mut events_rx).await;
        assert!(matches!(event, ChannelEvent::TransportError { .. }));
        assert!(!channel.is_open());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn outbound_records_reach_the_peer_in_order() {
        let (url, server) = spawn_agent(|mut ws| async move {
            let mut received = Vec::new();
            while let Some(Ok(message)) = ws.next().await {
                match message {
                    Message::Text(text) => received.push(text),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            assert_eq!(
                received,
                vec![
                    r#"{"type":"audio_input","data":"AAAA"}"#.to_string(),
                    r#"{"type":"pong"}"#.to_string(),
                ],
            );
        })
        .await;
        let (events_tx, _events_rx) = tokio::sync::mpsc::channel(8);

        let channel = connect(&test_config(&url, 1_000), events_tx, 8)
            .await
            .unwrap();
        channel.send(OutboundMessage::audio_input("AAAA".to_string()));
        channel.send(OutboundMessage::Pong);
        channel.close(consts::CLOSE_NORMAL).await;
        server.await.unwrap();
    }
}
