//! Connection pump: bytes in both directions between one socket and one topic.
//!
//! Inbound frames are published to the group; group messages are written to
//! the socket. Either direction ending stops the other, and once the
//! connection is closed neither direction touches the group again. On exit
//! the pump cancels its subscription, closes the socket, and clears itself
//! from the topic unless a newer connection has already taken its place.

use std::sync::Arc;

use bytes::Bytes;

use crate::connection::Connection;
use crate::error::ConnectionIoError;
use crate::topic::Topic;

pub(crate) fn welcome_frame(topic: &Topic) -> Bytes {
    Bytes::from(format!("Welcome to the topic {:?}!", topic.id().as_str()))
}

pub(crate) async fn run(conn: Connection, topic: Arc<Topic>, welcome: bool) {
    let Connection {
        id,
        mut reader,
        mut writer,
        token,
    } = conn;
    let topic_id = topic.id().clone();

    tracing::debug!(conn = %id, topic = %topic_id, "pump started");

    if welcome {
        if let Err(e) = writer.write_frame(welcome_frame(&topic)).await {
            tracing::warn!(conn = %id, topic = %topic_id, error = %e, "welcome frame failed");
            writer.close().await;
            topic.release(id).await;
            return;
        }
    }

    let mut sub = match topic.group().subscribe() {
        Ok(sub) => sub,
        Err(e) => {
            tracing::warn!(conn = %id, topic = %topic_id, error = %e, "subscribe failed");
            writer.close().await;
            topic.release(id).await;
            return;
        }
    };

    let group = topic.group().clone();
    let stop = token.child_token();

    let inbound = async {
        loop {
            let frame = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                r = reader.read_frame() => r,
            };
            match frame {
                Ok(data) => {
                    // Superseded while reading: the frame belongs to no one.
                    if stop.is_cancelled() {
                        break;
                    }
                    if let Err(e) = group.publish(data).await {
                        tracing::warn!(conn = %id, topic = %topic_id, error = %e, "publish failed");
                        break;
                    }
                }
                Err(ConnectionIoError::Closed) => {
                    tracing::debug!(conn = %id, topic = %topic_id, "socket closed by client");
                    break;
                }
                Err(e) => {
                    tracing::warn!(conn = %id, topic = %topic_id, error = %e, "socket read failed");
                    break;
                }
            }
        }
        stop.cancel();
    };

    let outbound = async {
        loop {
            let msg = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                m = sub.next() => m,
            };
            match msg {
                Ok(msg) => {
                    if stop.is_cancelled() {
                        break;
                    }
                    if let Err(e) = writer.write_frame(msg.data).await {
                        tracing::warn!(conn = %id, topic = %topic_id, error = %e, "socket write failed");
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(conn = %id, topic = %topic_id, error = %e, "subscription ended");
                    break;
                }
            }
        }
        stop.cancel();
    };

    tokio::join!(inbound, outbound);

    sub.cancel();
    writer.close().await;
    token.cancel();
    let cleared = topic.release(id).await;

    tracing::info!(conn = %id, topic = %topic_id, cleared, "pump stopped");
}
