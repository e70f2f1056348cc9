// WebSocket transport for the session channel
//
// Each `open` spawns one connection task. The task reports open, frames and
// close back to the runtime tagged with its generation, and writes whatever
// arrives on its outgoing channel. Dropping the outgoing sender closes the
// socket without reporting a close, since only unexpected closes count as
// failures.

use super::{RuntimeEvent, TransportEvent};
use crate::connection::{CloseInfo, Transport, TransportError};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// `{server_url}/{session_id}/ws`
pub fn session_url(server_url: &str, session_id: &str) -> String {
    format!("{}/{}/ws", server_url.trim_end_matches('/'), session_id)
}

pub struct WebSocketTransport {
    server_url: String,
    events: UnboundedSender<RuntimeEvent>,
    outgoing: Option<UnboundedSender<Message>>,
}

impl WebSocketTransport {
    pub fn new(server_url: impl Into<String>, events: UnboundedSender<RuntimeEvent>) -> Self {
        Self {
            server_url: server_url.into(),
            events,
            outgoing: None,
        }
    }
}

impl Transport for WebSocketTransport {
    fn open(&mut self, session_id: &str, generation: u64) {
        self.close();

        let url = session_url(&self.server_url, session_id);
        let (tx, rx) = mpsc::unbounded_channel();
        self.outgoing = Some(tx);
        tokio::spawn(run_connection(url, generation, rx, self.events.clone()));
    }

    fn send(&mut self, frame: String) -> Result<(), TransportError> {
        let outgoing = self.outgoing.as_ref().ok_or(TransportError::NotOpen)?;
        outgoing
            .send(Message::Text(frame))
            .map_err(|_| TransportError::SendFailed("connection task stopped".to_string()))
    }

    fn close(&mut self) {
        self.outgoing = None;
    }
}

async fn run_connection(
    url: String,
    generation: u64,
    mut outgoing: UnboundedReceiver<Message>,
    events: UnboundedSender<RuntimeEvent>,
) {
    let report = |event: TransportEvent| {
        let _ = events.send(RuntimeEvent::Transport(event));
    };

    debug!("Connecting to {}", url);
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            warn!("Failed to connect to {}: {}", url, e);
            report(TransportEvent::Closed {
                generation,
                info: CloseInfo::error(e.to_string()),
            });
            return;
        }
    };
    report(TransportEvent::Opened { generation });

    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            message = outgoing.recv() => match message {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        report(TransportEvent::Closed {
                            generation,
                            info: CloseInfo::error(e.to_string()),
                        });
                        break;
                    }
                }
                None => {
                    // Closed on purpose
                    let _ = sink.close().await;
                    break;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    report(TransportEvent::Frame { generation, text });
                }
                Some(Ok(Message::Close(frame))) => {
                    let info = match frame {
                        Some(frame) => CloseInfo {
                            code: Some(u16::from(frame.code)),
                            reason: frame.reason.to_string(),
                        },
                        None => CloseInfo::default(),
                    };
                    report(TransportEvent::Closed { generation, info });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    report(TransportEvent::Closed {
                        generation,
                        info: CloseInfo::error(e.to_string()),
                    });
                    break;
                }
                None => {
                    report(TransportEvent::Closed {
                        generation,
                        info: CloseInfo::error("stream ended"),
                    });
                    break;
                }
            },
        }
    }
    debug!("Connection task for generation {} finished", generation);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_url() {
        assert_eq!(
            session_url("ws://localhost:8787/api/sessions", "abc"),
            "ws://localhost:8787/api/sessions/abc/ws"
        );
        assert_eq!(session_url("wss://host/", "x"), "wss://host/x/ws");
    }

    #[tokio::test]
    async fn test_send_before_open_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut transport = WebSocketTransport::new("ws://127.0.0.1:1", tx);
        assert_eq!(
            transport.send("{}".into()),
            Err(TransportError::NotOpen)
        );
    }

    #[tokio::test]
    async fn test_refused_connection_reports_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = WebSocketTransport::new("ws://127.0.0.1:1", tx);
        transport.open("session", 7);
        match rx.recv().await {
            Some(RuntimeEvent::Transport(TransportEvent::Closed { generation, .. })) => {
                assert_eq!(generation, 7)
            }
            other => panic!("expected close, got {:?}", other),
        }
    }
}
