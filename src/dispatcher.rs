// ABOUTME: Promotes a freshly-accepted anonymous session into a producer or viewer role
// ABOUTME: and then drives that role's request loop for the lifetime of the connection

use crate::codec::Message;
use crate::error::ProtocolError;
use crate::registry::{AlreadyRunning, Registry};
use crate::session::{Role, Session};
use crate::stream::{LiveStream, StreamState};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reads one message, but yields `None` immediately if `shutdown` fires
/// first. Every suspension point in a role's request loop races against
/// shutdown this way so `stop()` never has to wait out a stalled peer.
async fn next_message(
    session: &mut Session,
    shutdown: &CancellationToken,
) -> Option<Result<Option<Message>, ProtocolError>> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => None,
        result = session.read_message() => Some(result),
    }
}

/// Entry point for a newly accepted `Anonymous` session: reads exactly one
/// request and promotes the session, or rejects it, per §4.4.
pub async fn dispatch(mut session: Session, registry: Arc<Registry>, shutdown: CancellationToken) {
    let message = match next_message(&mut session, &shutdown).await {
        None => {
            session.close();
            return;
        }
        Some(Ok(Some(message))) => message,
        Some(Ok(None)) => {
            debug!(session = session.id(), "peer closed before first request");
            return;
        }
        Some(Err(e)) => {
            reject(&session, &e).await;
            return;
        }
    };

    match message {
        Message::StartStreaming { stream_id } => {
            handle_start_streaming(session, registry, stream_id, shutdown).await
        }
        Message::StartLiveStreamViewing { stream_id } => {
            handle_start_viewing(session, registry, stream_id, shutdown).await
        }
        Message::StartFileStreamViewing => {
            reject(&session, &ProtocolError::NotImplemented).await;
        }
        other => {
            warn!(
                session = session.id(),
                command = ?other.command_id(),
                "unexpected command on anonymous session"
            );
            reject(
                &session,
                &ProtocolError::UnsupportedCommand(other.command_id() as u32),
            )
            .await;
        }
    }
}

async fn reject(session: &Session, err: &ProtocolError) {
    warn!(session = session.id(), error = %err, "rejecting session");
    let _ = session
        .reply(&Message::ErrorStreamingResponse {
            message: err.wire_message(),
        })
        .await;
    session.close();
}

async fn handle_start_streaming(
    mut session: Session,
    registry: Arc<Registry>,
    stream_id: String,
    shutdown: CancellationToken,
) {
    session.set_role(Role::Producer);
    match registry.attach_producer(&stream_id, session.handle()) {
        Ok(live) => {
            if session.reply(&Message::OkStreamingResponse).await.is_err() {
                live.begin_stopping();
                registry.remove(&stream_id);
                session.close();
                return;
            }
            info!(session = session.id(), stream_id = %stream_id, "producer attached");
            producer_loop(session, registry, live, stream_id, shutdown).await;
        }
        Err(AlreadyRunning) => {
            warn!(session = session.id(), stream_id = %stream_id, "producer refused: already running");
            reject(&session, &ProtocolError::AlreadyRunning).await;
        }
    }
}

async fn producer_loop(
    mut session: Session,
    registry: Arc<Registry>,
    live: Arc<LiveStream>,
    stream_id: String,
    shutdown: CancellationToken,
) {
    loop {
        match next_message(&mut session, &shutdown).await {
            None => {
                debug!(session = session.id(), stream_id = %stream_id, "producer loop interrupted by shutdown");
                live.begin_stopping();
                registry.remove(&stream_id);
                break;
            }
            Some(Ok(Some(Message::StreamingData { chunk_index, data }))) => {
                if live.has_viewers() {
                    let chunk = Message::StreamingData { chunk_index, data };
                    live.fan_out(&chunk).await;
                }
                if session.reply(&Message::OkStreamingResponse).await.is_err() {
                    live.begin_stopping();
                    registry.remove(&stream_id);
                    break;
                }
            }
            Some(Ok(Some(Message::EndStreaming { .. }))) => {
                info!(session = session.id(), stream_id = %stream_id, "producer ended stream");
                live.begin_stopping();
                registry.remove(&stream_id);
                break;
            }
            Some(Ok(Some(Message::RestoreStreaming))) => {
                if session
                    .reply(&Message::ErrorStreamingResponse {
                        message: ProtocolError::NotImplemented.wire_message(),
                    })
                    .await
                    .is_err()
                {
                    live.begin_stopping();
                    registry.remove(&stream_id);
                    break;
                }
            }
            Some(Ok(Some(other))) => {
                warn!(session = session.id(), command = ?other.command_id(), "unsupported command from producer");
                let _ = session
                    .reply(&Message::ErrorStreamingResponse {
                        message: ProtocolError::UnsupportedCommand(other.command_id() as u32)
                            .wire_message(),
                    })
                    .await;
                live.begin_stopping();
                registry.remove(&stream_id);
                break;
            }
            Some(Ok(None)) => {
                debug!(session = session.id(), stream_id = %stream_id, "producer disconnected");
                live.begin_stopping();
                registry.remove(&stream_id);
                break;
            }
            Some(Err(e)) => {
                warn!(session = session.id(), error = %e, "producer protocol error");
                let _ = session
                    .reply(&Message::ErrorStreamingResponse {
                        message: e.wire_message(),
                    })
                    .await;
                live.begin_stopping();
                registry.remove(&stream_id);
                break;
            }
        }
    }
    session.close();
}

async fn handle_start_viewing(
    mut session: Session,
    registry: Arc<Registry>,
    stream_id: String,
    shutdown: CancellationToken,
) {
    session.set_role(Role::Viewer);
    let (live, _created) = registry.find_or_create(&stream_id);
    live.add_viewer(session.handle());

    let reply = if live.state() == StreamState::Live {
        Message::OkStreamingResponse
    } else {
        Message::IsNotStartedResponse
    };
    if session.reply(&reply).await.is_err() {
        live.remove_viewer(session.id());
        registry.remove_if_idle(&stream_id);
        session.close();
        return;
    }
    debug!(session = session.id(), stream_id = %stream_id, "viewer attached");
    viewer_loop(session, registry, live, stream_id, shutdown).await;
}

/// A viewer is a receiver: no payload is currently defined for a viewer
/// request after attachment, so any further frame is simply ignored rather
/// than treated as an error (the command space is reserved, not invalid).
async fn viewer_loop(
    mut session: Session,
    registry: Arc<Registry>,
    live: Arc<LiveStream>,
    stream_id: String,
    shutdown: CancellationToken,
) {
    loop {
        match next_message(&mut session, &shutdown).await {
            None => break,
            Some(Ok(Some(_unexpected))) => continue,
            Some(Ok(None)) => {
                debug!(session = session.id(), "viewer disconnected");
                break;
            }
            Some(Err(e)) => {
                warn!(session = session.id(), error = %e, "viewer transport error");
                break;
            }
        }
    }
    live.remove_viewer(session.id());
    registry.remove_if_idle(&stream_id);
    session.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Message;
    use crate::frame::{FrameReader, FrameWriter, DEFAULT_MAX_FRAME_SIZE};
    use tokio::net::{TcpListener, TcpStream};

    struct ClientHalf {
        reader: FrameReader,
        writer: FrameWriter,
    }

    impl ClientHalf {
        async fn send(&mut self, message: &Message) {
            self.writer.write_frame(&message.encode()).await.unwrap();
        }

        async fn recv(&mut self) -> Option<Message> {
            let body = self.reader.read_frame().await.unwrap()?;
            Some(Message::decode(&body).unwrap())
        }
    }

    async fn connected_pair(id: u64) -> (Session, ClientHalf) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let accept = listener.accept();
        let (client, (server, _)) = tokio::join!(connect, accept);
        let client = client.unwrap();
        let (client_read, client_write) = client.into_split();
        (
            Session::new(id, server, DEFAULT_MAX_FRAME_SIZE),
            ClientHalf {
                reader: FrameReader::new(client_read, DEFAULT_MAX_FRAME_SIZE),
                writer: FrameWriter::new(client_write),
            },
        )
    }

    #[tokio::test]
    async fn viewer_before_producer_gets_is_not_started() {
        let registry = Arc::new(Registry::new());
        let (session, mut client) = connected_pair(1).await;
        client
            .send(&Message::StartLiveStreamViewing {
                stream_id: "s1".to_string(),
            })
            .await;

        dispatch(session, registry.clone(), CancellationToken::new()).await;

        assert_eq!(client.recv().await, Some(Message::IsNotStartedResponse));
        assert!(registry.contains("s1"));
    }

    #[tokio::test]
    async fn producer_then_chunk_fans_out_to_viewer() {
        let registry = Arc::new(Registry::new());

        let (viewer_session, mut viewer) = connected_pair(1).await;
        viewer
            .send(&Message::StartLiveStreamViewing {
                stream_id: "s1".to_string(),
            })
            .await;
        let viewer_task = tokio::spawn(dispatch(
            viewer_session,
            registry.clone(),
            CancellationToken::new(),
        ));
        assert_eq!(viewer.recv().await, Some(Message::IsNotStartedResponse));

        let (producer_session, mut producer) = connected_pair(2).await;
        producer
            .send(&Message::StartStreaming {
                stream_id: "s1".to_string(),
            })
            .await;
        let producer_task = tokio::spawn(dispatch(
            producer_session,
            registry.clone(),
            CancellationToken::new(),
        ));
        assert_eq!(producer.recv().await, Some(Message::OkStreamingResponse));

        let chunk = Message::StreamingData {
            chunk_index: 0,
            data: bytes::Bytes::from_static(b"hello"),
        };
        producer.send(&chunk).await;
        assert_eq!(producer.recv().await, Some(Message::OkStreamingResponse));
        assert_eq!(viewer.recv().await, Some(chunk));

        producer
            .send(&Message::EndStreaming {
                stream_id: "s1".to_string(),
            })
            .await;
        producer_task.await.unwrap();
        assert!(!registry.contains("s1"));

        drop(viewer);
        viewer_task.await.unwrap();
    }

    #[tokio::test]
    async fn second_producer_is_refused_with_error_response() {
        let registry = Arc::new(Registry::new());

        let (session_a, mut client_a) = connected_pair(1).await;
        client_a
            .send(&Message::StartStreaming {
                stream_id: "s1".to_string(),
            })
            .await;
        let task_a = tokio::spawn(dispatch(
            session_a,
            registry.clone(),
            CancellationToken::new(),
        ));
        assert_eq!(client_a.recv().await, Some(Message::OkStreamingResponse));

        let (session_b, mut client_b) = connected_pair(2).await;
        client_b
            .send(&Message::StartStreaming {
                stream_id: "s1".to_string(),
            })
            .await;
        dispatch(session_b, registry.clone(), CancellationToken::new()).await;
        assert_eq!(
            client_b.recv().await,
            Some(Message::ErrorStreamingResponse {
                message: "session already running".to_string()
            })
        );

        client_a
            .send(&Message::EndStreaming {
                stream_id: "s1".to_string(),
            })
            .await;
        task_a.await.unwrap();
    }
}
