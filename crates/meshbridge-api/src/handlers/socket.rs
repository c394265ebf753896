//! WebSocket bridging: /topics/{id}/join, /topics/{id}/connect, /topic/{id}.
//!
//! The upgraded socket is split into a `FrameReader` and a `FrameWriter`
//! and handed to the bridge. Text and binary messages are both frames;
//! pings are answered by axum and never reach the pump. Messages larger
//! than a peer link can carry are refused at the socket.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use meshbridge_core::wire::MAX_PAYLOAD_LEN;
use meshbridge_services::{Connection, ConnectionIoError, FrameReader, FrameWriter};

use super::{join_failed, parse_topic_id, unknown_topic, ApiState};

// ── Adapter ───────────────────────────────────────────────────────────────────

struct WsReader(SplitStream<WebSocket>);
struct WsWriter(SplitSink<WebSocket, Message>);

#[async_trait]
impl FrameReader for WsReader {
    async fn read_frame(&mut self) -> Result<Bytes, ConnectionIoError> {
        loop {
            match self.0.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Bytes::copy_from_slice(text.as_str().as_bytes()))
                }
                Some(Ok(Message::Binary(data))) => return Ok(data),
                Some(Ok(Message::Close(_))) | None => return Err(ConnectionIoError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ConnectionIoError::Read(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), ConnectionIoError> {
        let text = std::str::from_utf8(&frame).ok().map(str::to_owned);
        let msg = match text {
            Some(text) => Message::Text(text.into()),
            None => Message::Binary(frame),
        };
        self.0
            .send(msg)
            .await
            .map_err(|e| ConnectionIoError::Write(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.0.send(Message::Close(None)).await;
        let _ = self.0.close().await;
    }
}

pub fn ws_connection(socket: WebSocket) -> Connection {
    let (sink, stream) = socket.split();
    Connection::new(WsReader(stream), WsWriter(sink))
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// Get or create the topic, then bridge the upgraded socket to it.
pub async fn handle_join(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Path(topic_id): Path<String>,
) -> Result<Response, (StatusCode, String)> {
    let id = parse_topic_id(&topic_id)?;
    let pending = state.bridge.join(&id).await.map_err(join_failed)?;

    Ok(ws.max_message_size(MAX_PAYLOAD_LEN).on_upgrade(move |socket| async move {
        pending.attach(ws_connection(socket)).await;
    }))
}

/// Bridge to an existing topic only.
pub async fn handle_connect(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Path(topic_id): Path<String>,
) -> Result<Response, (StatusCode, String)> {
    let id = parse_topic_id(&topic_id)?;
    let topic = state
        .bridge
        .registry()
        .get(&id)
        .ok_or_else(|| unknown_topic(&id))?;

    let bridge = state.bridge.clone();
    Ok(ws.max_message_size(MAX_PAYLOAD_LEN).on_upgrade(move |socket| async move {
        bridge.attach(topic, ws_connection(socket)).await;
    }))
}
