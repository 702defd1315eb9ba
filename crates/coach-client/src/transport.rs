//! Socket transport behind the session manager.
//!
//! A [`Connector`] opens one connection and hands back a [`Transport`]: a pair
//! of channels the session uses to write [`Frame`]s and read
//! [`TransportEvent`]s. [`WsConnector`] is the real implementation on top of
//! `tokio-tungstenite`; tests plug in their own connectors.

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, protocol::CloseFrame, protocol::frame::coding::CloseCode};
use tracing::{debug, warn};

/// Normal closure; the only close code that does not trigger a reconnect.
pub const CLOSE_NORMAL: u16 = 1000;
/// Closed without a close frame (network drop, failed open).
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Close frame arrived without a status code.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Outbound frame written by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Inbound event delivered to the session, in socket order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    /// The socket hit an error. A `Closed` event always follows.
    Error(String),
    Closed { code: u16, reason: String },
}

/// An open connection. Dropping `outbound` closes it.
pub struct Transport {
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens transports to a chat relay.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, url: String) -> BoxFuture<'static, Result<Transport>>;
}

/// WebSocket connector over `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&self, url: String) -> BoxFuture<'static, Result<Transport>> {
        Box::pin(async move {
            let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .with_context(|| format!("WebSocket connect to {url} failed"))?;

            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            tokio::spawn(pump(ws_stream, out_rx, in_tx));

            Ok(Transport {
                outbound: out_tx,
                inbound: in_rx,
            })
        })
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Shuttle frames between the socket and the session's channels until either
/// side finishes.
async fn pump(
    ws_stream: WsStream,
    mut out_rx: mpsc::UnboundedReceiver<Frame>,
    in_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            frame = out_rx.recv() => match frame {
                Some(Frame::Text(text)) => {
                    if let Err(e) = sink.send(tungstenite::Message::Text(text.into())).await {
                        let _ = in_tx.send(TransportEvent::Error(e.to_string()));
                        let _ = in_tx.send(TransportEvent::Closed {
                            code: CLOSE_ABNORMAL,
                            reason: String::new(),
                        });
                        break;
                    }
                }
                Some(Frame::Close { code, reason }) => {
                    let close = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    if let Err(e) = sink.send(tungstenite::Message::Close(Some(close))).await {
                        debug!("close frame not sent: {}", e);
                    }
                    break;
                }
                None => {
                    // Session let go of the transport
                    let _ = sink.close().await;
                    break;
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    let _ = in_tx.send(TransportEvent::Text(text.as_str().to_owned()));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    match String::from_utf8(data.to_vec()) {
                        Ok(text) => {
                            let _ = in_tx.send(TransportEvent::Text(text));
                        }
                        Err(_) => warn!("dropping non-UTF-8 binary frame ({} bytes)", data.len()),
                    }
                }
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|cf| (u16::from(cf.code), cf.reason.as_str().to_owned()))
                        .unwrap_or((CLOSE_NO_STATUS, String::new()));
                    let _ = in_tx.send(TransportEvent::Closed { code, reason });
                    break;
                }
                // Ping/pong are answered by tungstenite; raw frames never surface
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = in_tx.send(TransportEvent::Error(e.to_string()));
                    let _ = in_tx.send(TransportEvent::Closed {
                        code: CLOSE_ABNORMAL,
                        reason: String::new(),
                    });
                    break;
                }
                None => {
                    let _ = in_tx.send(TransportEvent::Closed {
                        code: CLOSE_ABNORMAL,
                        reason: String::new(),
                    });
                    break;
                }
            },
        }
    }
}

/// Append the `userId` handshake parameter to a relay endpoint.
pub fn handshake_url(endpoint: &str, user_id: i64) -> String {
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!("{endpoint}{separator}userId={user_id}")
}
