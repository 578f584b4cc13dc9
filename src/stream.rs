// ABOUTME: LiveStream: the per-stream-id state machine a producer attaches to
// ABOUTME: and viewers fan out from; one instance lives for the lifetime of a stream id

use crate::codec::Message;
use crate::session::SessionHandle;
use std::sync::Mutex;

/// Lifecycle state of a single stream id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Viewers may be attached; no producer has arrived yet.
    Pending,
    /// A producer is attached and sending chunks.
    Live,
    /// End-of-stream has been signalled; no further fan-out occurs.
    Stopping,
}

#[derive(Debug, PartialEq, Eq)]
pub struct AlreadyRunning;

struct Inner {
    state: StreamState,
    producer: Option<SessionHandle>,
    viewers: Vec<SessionHandle>,
}

/// Shared state for one stream id: producer slot, viewer set, and the
/// Pending/Live/Stopping state machine. Reached through an `Arc` so viewers
/// and the registry can hold it without the producer's task owning them.
pub struct LiveStream {
    inner: Mutex<Inner>,
}

impl LiveStream {
    pub fn new() -> Self {
        LiveStream {
            inner: Mutex::new(Inner {
                state: StreamState::Pending,
                producer: None,
                viewers: Vec::new(),
            }),
        }
    }

    pub fn state(&self) -> StreamState {
        self.inner.lock().unwrap().state
    }

    /// Attaches a producer, moving the stream to `Live`. Refuses a second
    /// producer rather than evicting the incumbent.
    pub fn attach_producer(&self, handle: SessionHandle) -> Result<(), AlreadyRunning> {
        let mut inner = self.inner.lock().unwrap();
        if inner.producer.is_some() {
            return Err(AlreadyRunning);
        }
        inner.producer = Some(handle);
        inner.state = StreamState::Live;
        Ok(())
    }

    /// Adds a viewer to the fan-out set. Does not change the stream's state;
    /// a viewer may attach to a Pending stream and simply wait.
    pub fn add_viewer(&self, handle: SessionHandle) {
        self.inner.lock().unwrap().viewers.push(handle);
    }

    /// Removes a viewer by session id. Idempotent.
    pub fn remove_viewer(&self, session_id: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.viewers.retain(|v| v.id() != session_id);
    }

    /// Transitions to `Stopping`. Subsequent `fan_out` calls are no-ops.
    pub fn begin_stopping(&self) {
        self.inner.lock().unwrap().state = StreamState::Stopping;
    }

    pub fn has_viewers(&self) -> bool {
        !self.inner.lock().unwrap().viewers.is_empty()
    }

    pub fn viewer_count(&self) -> usize {
        self.inner.lock().unwrap().viewers.len()
    }

    /// True once the stream is still an idle `Pending` placeholder: no
    /// producer has ever attached and no viewers remain. Used by the
    /// registry to decide whether the last viewer leaving should erase the
    /// entry (SPEC_FULL.md §4.5, "Pending -> removed").
    pub fn is_idle(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.state == StreamState::Pending && inner.viewers.is_empty()
    }

    /// Takes a snapshot of the current viewer set (cloned handles, cheap:
    /// each is an id, a channel sender, and an `Arc<AtomicBool>`) and fans
    /// the chunk out to each one in registration order.
    ///
    /// Each send awaits the viewer's strand (`enqueue_message`): a viewer
    /// whose queue is full is simply caught up on before the next viewer's
    /// send is issued, so no frame is ever dropped for a viewer that is
    /// merely slow — the backlog lives in that viewer's bounded channel, the
    /// tokio stand-in for the OS send buffer the source relies on. Only a
    /// viewer whose strand has actually closed (its writer task exited) is
    /// removed from the set.
    ///
    /// No-op once the stream has entered `Stopping`.
    pub async fn fan_out(&self, chunk: &Message) {
        let snapshot = {
            let inner = self.inner.lock().unwrap();
            if inner.state == StreamState::Stopping {
                return;
            }
            inner.viewers.clone()
        };

        let mut dead = Vec::new();
        for viewer in &snapshot {
            if viewer.enqueue_message(chunk).await.is_err() {
                dead.push(viewer.id());
            }
        }

        if !dead.is_empty() {
            for id in &dead {
                log_dropped_viewer(*id);
            }
            let mut inner = self.inner.lock().unwrap();
            inner.viewers.retain(|v| !dead.contains(&v.id()));
        }
    }

    pub fn producer_id(&self) -> Option<u64> {
        self.inner.lock().unwrap().producer.as_ref().map(|p| p.id())
    }
}

impl Default for LiveStream {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn log_dropped_viewer(session_id: u64) {
    warn!(session = session_id, "viewer dropped: write channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn paired_session_handle() -> (crate::session::Session, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let accept = listener.accept();
        let (client, (server, _)) = tokio::join!(connect, accept);
        (
            crate::session::Session::new(1, server, crate::frame::DEFAULT_MAX_FRAME_SIZE),
            client.unwrap(),
        )
    }

    #[tokio::test]
    async fn starts_pending_with_no_viewers() {
        let stream = LiveStream::new();
        assert_eq!(stream.state(), StreamState::Pending);
        assert!(!stream.has_viewers());
    }

    #[tokio::test]
    async fn attaching_producer_moves_to_live() {
        let stream = LiveStream::new();
        let (session, _client) = paired_session_handle().await;
        stream.attach_producer(session.handle()).unwrap();
        assert_eq!(stream.state(), StreamState::Live);
    }

    #[tokio::test]
    async fn second_producer_is_refused_incumbent_untouched() {
        let stream = LiveStream::new();
        let (session_a, _client_a) = paired_session_handle().await;
        let (session_b, _client_b) = paired_session_handle().await;

        stream.attach_producer(session_a.handle()).unwrap();
        let err = stream.attach_producer(session_b.handle());
        assert_eq!(err, Err(AlreadyRunning));
        assert_eq!(stream.producer_id(), Some(session_a.id()));
    }

    #[tokio::test]
    async fn remove_viewer_is_idempotent() {
        let stream = LiveStream::new();
        let (session, _client) = paired_session_handle().await;
        stream.add_viewer(session.handle());
        assert_eq!(stream.viewer_count(), 1);
        stream.remove_viewer(session.id());
        stream.remove_viewer(session.id());
        assert_eq!(stream.viewer_count(), 0);
    }

    #[tokio::test]
    async fn fan_out_is_a_no_op_once_stopping() {
        let stream = LiveStream::new();
        let (session, _client) = paired_session_handle().await;
        stream.add_viewer(session.handle());
        stream.begin_stopping();

        let chunk = Message::StreamingData {
            chunk_index: 0,
            data: bytes::Bytes::from_static(b"x"),
        };
        stream.fan_out(&chunk).await;
        // No assertion on delivery possible without a reader; this proves
        // the call does not panic and the viewer set is left untouched.
        assert_eq!(stream.viewer_count(), 1);
    }
}
