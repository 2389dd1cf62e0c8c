use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{error, info, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use crate::config::VIEWER_PATH;
use crate::relay::{RelayHandle, SessionId};

type ViewerSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type ViewerStream = SplitStream<WebSocketStream<TcpStream>>;

/// Bridges one viewer socket to the relay: inbound text becomes relay
/// commands, the session's outbound queue is written back to the socket.
pub struct ViewerHandler {
    relay: RelayHandle,
    peer_addr: String,
}

impl ViewerHandler {
    pub fn new(relay: RelayHandle, peer_addr: String) -> Self {
        Self { relay, peer_addr }
    }

    pub async fn handle_connection(self, stream: TcpStream) {
        let ws_stream = match accept_hdr_async(stream, |req: &Request, response: Response| {
            self.route_request(req, response)
        })
        .await
        {
            Ok(ws) => ws,
            Err(e) => {
                error!("WebSocket handshake failed for {}: {:?}", self.peer_addr, e);
                return;
            }
        };

        self.handle_websocket_connection(ws_stream).await;
    }

    fn route_request(&self, req: &Request, response: Response) -> Result<Response, ErrorResponse> {
        let path = req.uri().path();
        if path == VIEWER_PATH {
            info!("WebSocket connection request for path: {} from {}", path, self.peer_addr);
            Ok(response)
        } else {
            warn!("Unknown WebSocket path '{}' from {}", path, self.peer_addr);
            Err(self.create_error_response(StatusCode::NOT_FOUND, "Invalid WebSocket path"))
        }
    }

    fn create_error_response(&self, status: StatusCode, message: &str) -> ErrorResponse {
        let mut response = ErrorResponse::new(Some(message.to_string()));
        *response.status_mut() = status;
        response
    }

    async fn handle_websocket_connection(&self, ws_stream: WebSocketStream<TcpStream>) {
        let (session, outbound) = match self.relay.accept(self.peer_addr.clone()).await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Relay rejected viewer {}: {}", self.peer_addr, e);
                return;
            }
        };

        let (write, read) = ws_stream.split();
        let (close_tx, close_rx) = mpsc::channel::<()>(1);

        let mut write_task = self.spawn_write_task(write, outbound, close_rx, session);
        let mut read_task = self.spawn_read_task(read, close_tx, session);

        let reader_finished = tokio::select! {
            _ = &mut read_task => true,
            _ = &mut write_task => false,
        };

        if reader_finished {
            // The reader has told the writer to send a close frame.
            let _ = write_task.await;
        } else {
            read_task.abort();
        }

        if let Err(e) = self.relay.close(session).await {
            warn!("Failed to release viewer {}: {}", session, e);
        }
        info!("WebSocket connection closed - Viewer: {} from {}", session, self.peer_addr);
    }

    fn spawn_write_task(
        &self,
        mut write: ViewerSink,
        mut outbound: mpsc::Receiver<String>,
        mut close_rx: mpsc::Receiver<()>,
        session: SessionId,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = outbound.recv() => {
                        match message {
                            Some(text) => {
                                if let Err(e) = write.send(Message::Text(text)).await {
                                    warn!("Failed to send to viewer {}: {}", session, e);
                                    break;
                                }
                            }
                            None => {
                                info!("Relay dropped viewer {}", session);
                                break;
                            }
                        }
                    }
                    _ = close_rx.recv() => {
                        break;
                    }
                }
            }

            let _ = write.close().await;
        })
    }

    fn spawn_read_task(
        &self,
        mut read: ViewerStream,
        close_tx: mpsc::Sender<()>,
        session: SessionId,
    ) -> JoinHandle<()> {
        let relay = self.relay.clone();

        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(data)) => String::from_utf8_lossy(&data).into_owned(),
                    Ok(Message::Close(_)) => {
                        info!("Viewer {} sent close frame", session);
                        break;
                    }
                    // Pings are answered by tungstenite itself.
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("WebSocket error for viewer {}: {}", session, e);
                        break;
                    }
                };

                if relay.command(session, text).await.is_err() {
                    warn!("Relay stopped, closing viewer {}", session);
                    break;
                }
            }

            let _ = close_tx.send(()).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio_tungstenite::{connect_async, MaybeTlsStream};

    use crate::relay::testing::RecordingConnector;
    use crate::relay::{RelayService, RelaySettings};

    async fn serve_viewers() -> (RelayHandle, String) {
        let settings = RelaySettings {
            reconnect_delay: Duration::from_secs(2),
            viewer_queue_size: 16,
        };
        let (relay, _task) = RelayService::start(settings, Arc::new(RecordingConnector::default()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_relay = relay.clone();
        tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                let handler = ViewerHandler::new(server_relay.clone(), peer.to_string());
                tokio::spawn(handler.handle_connection(stream));
            }
        });

        (relay, addr.to_string())
    }

    async fn next_json(ws: &mut WebSocketStream<MaybeTlsStream<TcpStream>>) -> Value {
        let message = ws.next().await.unwrap().unwrap();
        serde_json::from_str(message.to_text().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_viewer_round_trip() {
        let (relay, addr) = serve_viewers().await;
        let (mut ws, _) = connect_async(format!("ws://{}/stream", addr)).await.unwrap();

        ws.send(Message::Text(r#"{"type":"setSymbol","symbol":"amd"}"#.to_string()))
            .await
            .unwrap();
        assert_eq!(
            next_json(&mut ws).await,
            json!({"type": "status", "ok": true, "symbol": "AMD"})
        );

        ws.send(Message::Text("definitely not json".to_string())).await.unwrap();
        assert_eq!(
            next_json(&mut ws).await,
            json!({"type": "error", "msg": "Invalid client message"})
        );
        assert_eq!(relay.snapshot().viewers, 1);

        ws.close(None).await.unwrap();
        for _ in 0..100 {
            if relay.snapshot().viewers == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let snapshot = relay.snapshot();
        assert_eq!(snapshot.viewers, 0);
        assert!(snapshot.subscribed.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_path_is_refused() {
        let (relay, addr) = serve_viewers().await;
        assert!(connect_async(format!("ws://{}/admin", addr)).await.is_err());
        assert_eq!(relay.snapshot().viewers, 0);
    }
}
