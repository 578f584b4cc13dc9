// ABOUTME: Per-connection session: framer, role state machine, and the write "strand"
// ABOUTME: The strand is a bounded mpsc channel plus a dedicated writer task, giving
// ABOUTME: at-most-one-write-in-flight, FIFO ordering without manual bookkeeping

use crate::codec::Message;
use crate::error::ProtocolError;
use crate::frame::{FrameReader, FrameWriter};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Bound on a session's outstanding-write queue. Fan-out awaits this queue's
/// capacity per viewer (see `LiveStream::fan_out`), so a slow viewer's
/// backlog queues behind its own prior writes rather than being dropped;
/// this bound is the channel-based stand-in for the source's reliance on the
/// OS socket send buffer as the backlog.
const WRITER_QUEUE_CAPACITY: usize = 256;

/// The role a session plays, set once on promotion out of `Anonymous`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Anonymous,
    Producer,
    Viewer,
}

/// A cheaply-clonable handle to a session's write strand.
///
/// Cloning this and handing it to a `LiveStream`'s viewer set is how the
/// fan-out path reaches a viewer's socket without the `LiveStream` owning
/// the viewer's read-loop task.
#[derive(Clone)]
pub struct SessionHandle {
    id: u64,
    sender: mpsc::Sender<Bytes>,
    closed: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Enqueue a pre-encoded packet body onto this session's strand. The
    /// writer task frames it (length prefix) and sends it in submission
    /// order. Returns `Err` if the session's writer task has already exited.
    pub async fn enqueue_write(&self, body: Bytes) -> Result<(), SessionClosed> {
        self.sender.send(body).await.map_err(|_| SessionClosed)
    }

    pub async fn enqueue_message(&self, message: &Message) -> Result<(), SessionClosed> {
        self.enqueue_write(message.encode()).await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for SessionHandle {}
impl std::hash::Hash for SessionHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

#[derive(Debug)]
pub struct SessionClosed;

/// One per accepted connection: read half, write strand, and role state.
pub struct Session {
    id: u64,
    reader: FrameReader,
    role: Role,
    handle: SessionHandle,
}

impl Session {
    pub fn new(id: u64, socket: TcpStream, max_frame_size: u32) -> Self {
        socket.set_nodelay(true).ok();
        let (read_half, write_half) = socket.into_split();
        let reader = FrameReader::new(read_half, max_frame_size);
        let writer = FrameWriter::new(write_half);
        let closed = Arc::new(AtomicBool::new(false));

        let (tx, rx) = mpsc::channel(WRITER_QUEUE_CAPACITY);
        tokio::spawn(run_writer(id, writer, rx, closed.clone()));

        Session {
            id,
            reader,
            role: Role::Anonymous,
            handle: SessionHandle {
                id,
                sender: tx,
                closed,
            },
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Reads one complete frame and decodes it into a `Message`.
    ///
    /// Returns `Ok(None)` on a clean peer close. A framing or codec error is
    /// reported as a `ProtocolError`; the caller is responsible for replying
    /// and closing per §7 of the error handling design.
    pub async fn read_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        match self.reader.read_frame().await {
            Ok(None) => Ok(None),
            Ok(Some(body)) => Ok(Some(Message::decode(&body)?)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn reply(&self, message: &Message) -> Result<(), SessionClosed> {
        self.handle.enqueue_write(message.encode()).await
    }

    /// Idempotent. Safe to call from any task; closing is really "stop
    /// accepting new writes and let the writer task drain/close the socket".
    pub fn close(&self) {
        self.handle.closed.store(true, Ordering::Release);
        // Dropping our sender clone would be needed to fully close the
        // channel, but Session retains its writer `handle` for the
        // lifetime of the read loop; the writer task itself exits when the
        // socket errors or every SessionHandle clone (held by LiveStream
        // viewer sets) has been dropped.
    }
}

async fn run_writer(
    id: u64,
    mut writer: FrameWriter,
    mut rx: mpsc::Receiver<Bytes>,
    closed: Arc<AtomicBool>,
) {
    while let Some(body) = rx.recv().await {
        if let Err(e) = writer.write_frame(&body).await {
            warn!(session = id, error = %e, "session write failed");
            break;
        }
    }
    closed.store(true, Ordering::Release);
    debug!(session = id, "writer task ended");
}
