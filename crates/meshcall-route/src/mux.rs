//! Many logical connectors over one connector.
//!
//! The gateway link carries a control stream, route requests and relayed
//! sessions side by side. Each logical stream is a [`Connector`] handed to
//! its owner; underneath, every message becomes a [`MuxFrame`]:
//!
//! ```text
//! { stream: 5, body: Open }          peer creates stream 5
//! { stream: 5, body: Data([...]) }   one message on stream 5
//! { stream: 5, body: Close }         stream 5 released
//! ```
//!
//! The client side numbers its streams 1, 3, 5, ... and the server side
//! 2, 4, 6, ..., so both may open streams without coordination.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use meshcall_protocol::{Codec, FrameBody, MuxFrame};
use meshcall_transport::{Connector, ConnectorReader, ConnectorWriter};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace, warn};

use crate::RouteError;

const FRAME_CAPACITY: usize = 256;
const ACCEPT_CAPACITY: usize = 32;

/// Which end of the multiplexed link this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxRole {
    /// Opens odd-numbered streams.
    Client,
    /// Opens even-numbered streams.
    Server,
}

impl MuxRole {
    fn first_stream(self) -> u32 {
        match self {
            Self::Client => 1,
            Self::Server => 2,
        }
    }
}

struct StreamEntry {
    /// Unbounded so the frame reader never waits on one stream's user.
    inbound: mpsc::UnboundedSender<Vec<u8>>,
    cancel: CancellationToken,
}

struct Shared {
    frames: mpsc::Sender<MuxFrame>,
    streams: Mutex<HashMap<u32, StreamEntry>>,
    next_stream: AtomicU32,
    cancel: CancellationToken,
}

impl Shared {
    fn streams(&self) -> MutexGuard<'_, HashMap<u32, StreamEntry>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers stream `id` and returns the user's end of it.
    fn attach(self: &Arc<Self>, id: u32) -> Connector {
        let (user, pump) = Connector::pair();
        let (to_user, from_user) = pump.split();
        let (inbound, queued) = mpsc::unbounded_channel();
        let cancel = self.cancel.child_token();
        self.streams().insert(
            id,
            StreamEntry {
                inbound,
                cancel: cancel.clone(),
            },
        );
        tokio::spawn(pump_inbound(id, queued, to_user));
        tokio::spawn(pump_outbound(Arc::clone(self), id, from_user, cancel));
        user
    }
}

/// A multiplexed connector. Cheap to clone; the link is torn down when
/// the last clone is dropped, [`Mux::close`] is called, or the underlying
/// connector fails.
#[derive(Clone)]
pub struct Mux {
    shared: Arc<Shared>,
    _guard: Arc<DropGuard>,
}

impl Mux {
    /// Starts multiplexing over `conn`.
    ///
    /// Streams opened by the peer arrive on the returned receiver. It
    /// yields `None` once the link is down.
    pub fn new<C: Codec>(conn: Connector, codec: C, role: MuxRole) -> (Self, mpsc::Receiver<Connector>) {
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_CAPACITY);
        let (accept_tx, accept_rx) = mpsc::channel(ACCEPT_CAPACITY);
        let cancel = CancellationToken::new();
        let shared = Arc::new(Shared {
            frames: frames_tx,
            streams: Mutex::new(HashMap::new()),
            next_stream: AtomicU32::new(role.first_stream()),
            cancel: cancel.clone(),
        });

        let id = conn.id();
        let (writer, reader) = conn.split();
        tokio::spawn(write_frames(writer, frames_rx, codec.clone(), cancel.clone()));
        tokio::spawn(read_frames(reader, Arc::clone(&shared), codec, accept_tx));
        debug!(conn_id = %id, ?role, "multiplexer started");

        let mux = Self {
            shared,
            _guard: Arc::new(cancel.drop_guard()),
        };
        (mux, accept_rx)
    }

    /// Opens a new stream to the peer.
    pub async fn open(&self) -> Result<Connector, RouteError> {
        if self.is_closed() {
            return Err(RouteError::MuxClosed);
        }
        let id = self.shared.next_stream.fetch_add(2, Ordering::Relaxed);
        let user = self.shared.attach(id);
        self.shared
            .frames
            .send(MuxFrame {
                stream: id,
                body: FrameBody::Open,
            })
            .await
            .map_err(|_| RouteError::MuxClosed)?;
        trace!(stream = id, "stream opened");
        Ok(user)
    }

    /// Tears the link down. Every stream's user end reports closure.
    pub fn close(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Resolves once the link is down.
    pub async fn closed(&self) {
        self.shared.cancel.cancelled().await
    }

    /// Number of live streams.
    pub fn stream_count(&self) -> usize {
        self.shared.streams().len()
    }
}

/// Hands queued data frames to one stream's user at the user's pace.
///
/// Ends once the stream's entry is gone and the queue is drained, which
/// lets the user read what arrived before a `Close`.
async fn pump_inbound(id: u32, mut queued: mpsc::UnboundedReceiver<Vec<u8>>, to_user: ConnectorWriter) {
    while let Some(data) = queued.recv().await {
        if to_user.send(data).await.is_err() {
            // Released by the user; its outbound pump reports the close.
            trace!(stream = id, "dropping data for released stream");
            return;
        }
    }
}

/// Wraps messages from one stream's user into data frames.
async fn pump_outbound(
    shared: Arc<Shared>,
    id: u32,
    mut from_user: ConnectorReader,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            // Closed by the peer or the whole link went down.
            _ = cancel.cancelled() => return,
            msg = from_user.recv() => msg,
        };
        let frame = match msg {
            Ok(data) => MuxFrame {
                stream: id,
                body: FrameBody::Data(data),
            },
            Err(_) => {
                shared.streams().remove(&id);
                let _ = shared
                    .frames
                    .send(MuxFrame {
                        stream: id,
                        body: FrameBody::Close,
                    })
                    .await;
                trace!(stream = id, "stream released");
                return;
            }
        };
        if shared.frames.send(frame).await.is_err() {
            shared.streams().remove(&id);
            return;
        }
    }
}

async fn write_frames<C: Codec>(
    writer: ConnectorWriter,
    mut frames: mpsc::Receiver<MuxFrame>,
    codec: C,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        let bytes = match codec.encode(&frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(stream = frame.stream, error = %e, "dropping unencodable frame");
                continue;
            }
        };
        if writer.send(bytes).await.is_err() {
            break;
        }
    }
    cancel.cancel();
}

async fn read_frames<C: Codec>(
    mut reader: ConnectorReader,
    shared: Arc<Shared>,
    codec: C,
    accept: mpsc::Sender<Connector>,
) {
    let cancel = shared.cancel.clone();
    loop {
        let bytes = tokio::select! {
            _ = cancel.cancelled() => break,
            bytes = reader.recv() => match bytes {
                Ok(bytes) => bytes,
                Err(_) => break,
            },
        };
        let frame: MuxFrame = match codec.decode(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "malformed frame, closing multiplexer");
                break;
            }
        };
        match frame.body {
            FrameBody::Open => {
                // Dropping a refused stream's user end sends its Close.
                let user = shared.attach(frame.stream);
                if let Err(e) = accept.try_send(user) {
                    match e {
                        mpsc::error::TrySendError::Full(_) => {
                            warn!(stream = frame.stream, "accept backlog full, refusing stream")
                        }
                        mpsc::error::TrySendError::Closed(_) => {
                            trace!(stream = frame.stream, "incoming stream not accepted")
                        }
                    }
                }
            }
            FrameBody::Data(data) => {
                let streams = shared.streams();
                match streams.get(&frame.stream) {
                    Some(entry) => {
                        if entry.inbound.send(data).is_err() {
                            trace!(stream = frame.stream, "data for released stream");
                        }
                    }
                    None => trace!(stream = frame.stream, "data for unknown stream"),
                }
            }
            FrameBody::Close => {
                if let Some(entry) = shared.streams().remove(&frame.stream) {
                    entry.cancel.cancel();
                }
            }
        }
    }
    cancel.cancel();
    shared.streams().clear();
    debug!("multiplexer stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use meshcall_protocol::JsonCodec;
    use tokio::time::timeout;

    use super::*;

    fn linked() -> ((Mux, mpsc::Receiver<Connector>), (Mux, mpsc::Receiver<Connector>)) {
        let (a, b) = Connector::pair();
        (
            Mux::new(a, JsonCodec, MuxRole::Client),
            Mux::new(b, JsonCodec, MuxRole::Server),
        )
    }

    #[tokio::test]
    async fn test_open_delivers_stream_to_peer() {
        let ((client, _client_in), (_server, mut server_in)) = linked();

        let mut mine = client.open().await.unwrap();
        mine.send(b"hello".to_vec()).await.unwrap();
        let mut theirs = server_in.recv().await.unwrap();

        assert_eq!(theirs.recv().await.unwrap(), b"hello");
        theirs.send(b"back".to_vec()).await.unwrap();
        assert_eq!(mine.recv().await.unwrap(), b"back");
    }

    #[tokio::test]
    async fn test_streams_are_independent() {
        let ((client, _client_in), (_server, mut server_in)) = linked();

        let first = client.open().await.unwrap();
        let second = client.open().await.unwrap();
        second.send(b"two".to_vec()).await.unwrap();
        first.send(b"one".to_vec()).await.unwrap();

        let mut s1 = server_in.recv().await.unwrap();
        let mut s2 = server_in.recv().await.unwrap();
        assert_eq!(s1.recv().await.unwrap(), b"one");
        assert_eq!(s2.recv().await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_unread_stream_does_not_stall_others() {
        let ((client, _client_in), (_server, mut server_in)) = linked();
        let quiet = client.open().await.unwrap();
        for i in 0..200u8 {
            quiet.send(vec![i]).await.unwrap();
        }

        let busy = client.open().await.unwrap();
        busy.send(b"hello".to_vec()).await.unwrap();
        let mut unread = server_in.recv().await.unwrap();
        let mut second = timeout(Duration::from_secs(2), server_in.recv())
            .await
            .expect("second stream never opened")
            .unwrap();

        let got = timeout(Duration::from_secs(2), second.recv()).await;
        assert_eq!(got.expect("second stream stalled").unwrap(), b"hello");
        for i in 0..200u8 {
            assert_eq!(unread.recv().await.unwrap(), vec![i]);
        }
    }

    #[tokio::test]
    async fn test_both_sides_can_open() {
        let ((client, mut client_in), (server, mut server_in)) = linked();

        let _from_client = client.open().await.unwrap();
        let from_server = server.open().await.unwrap();
        from_server.send(b"pushed".to_vec()).await.unwrap();

        assert!(server_in.recv().await.is_some());
        let mut pushed = client_in.recv().await.unwrap();
        assert_eq!(pushed.recv().await.unwrap(), b"pushed");
    }

    #[tokio::test]
    async fn test_release_closes_peer_stream() {
        let ((client, _client_in), (_server, mut server_in)) = linked();

        let mine = client.open().await.unwrap();
        let mut theirs = server_in.recv().await.unwrap();
        drop(mine);

        assert!(theirs.recv().await.is_err());
    }

    #[tokio::test]
    async fn test_close_ends_every_stream_on_both_sides() {
        let ((client, _client_in), (server, mut server_in)) = linked();
        let mut mine = client.open().await.unwrap();
        let mut theirs = server_in.recv().await.unwrap();

        client.close();

        assert!(mine.recv().await.is_err());
        assert!(theirs.recv().await.is_err());
        server.closed().await;
        assert!(client.open().await.is_err());
    }

    #[tokio::test]
    async fn test_dropping_last_handle_tears_down_link() {
        let ((client, _client_in), (server, _server_in)) = linked();

        drop(client);

        server.closed().await;
        assert!(server.is_closed());
    }
}
