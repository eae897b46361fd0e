use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::runtime::Handle;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use crate::error::SessionError;
use crate::radio::{Device, RfcommStream, Socket};

const FRAME_QUEUE: usize = 64;

type SharedReader = Arc<Mutex<Option<BufReader<ReadHalf<Box<dyn RfcommStream>>>>>>;

pub(crate) struct ConnectionInner {
    remote: Device,
    reader: SharedReader,
    writer: Mutex<Option<WriteHalf<Box<dyn RfcommStream>>>>,
    closed: CancellationToken,
    io: Handle,
    delimiters: Arc<[u8]>,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

/// A connected socket with byte and line views.
///
/// Clones share the socket. The socket is released by [`close`](Self::close)
/// or when the last clone is dropped.
#[derive(Clone)]
pub struct DuplexConnection {
    inner: Arc<ConnectionInner>,
}

impl fmt::Debug for DuplexConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuplexConnection")
            .field("remote", self.inner.remote.address())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl DuplexConnection {
    pub(crate) fn new(socket: Socket, io: Handle, read_buffer: usize, delimiters: &[u8]) -> Self {
        let (remote, stream) = socket.into_parts();
        let (read, write) = tokio::io::split(stream);
        debug!(remote = %remote.address(), "connection opened");

        Self {
            inner: Arc::new(ConnectionInner {
                remote,
                reader: Arc::new(Mutex::new(Some(BufReader::with_capacity(read_buffer, read)))),
                writer: Mutex::new(Some(write)),
                closed: CancellationToken::new(),
                io,
                delimiters: Arc::from(delimiters),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ConnectionInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ConnectionInner> {
        Arc::downgrade(&self.inner)
    }

    #[must_use]
    pub fn remote_device(&self) -> &Device {
        &self.inner.remote
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Yields received bytes in arrival order.
    ///
    /// The stream ends on local close or peer EOF, and ends after a single
    /// error item on any other read failure. Byte and line views read from
    /// the same buffer; while one is active, others wait for it to drop.
    #[must_use]
    pub fn observe_bytes(&self) -> ReadStream<u8> {
        self.observe(ByteDecoder)
    }

    /// Yields received text split on the configured delimiter bytes.
    ///
    /// Empty lines are skipped and invalid UTF-8 is replaced. A trailing
    /// fragment without a delimiter is dropped at EOF.
    #[must_use]
    pub fn observe_lines(&self) -> ReadStream<String> {
        self.observe(LineDecoder::new(Arc::clone(&self.inner.delimiters)))
    }

    fn observe<D: FrameDecoder>(&self, decoder: D) -> ReadStream<D::Frame> {
        let (frames, receiver) = mpsc::channel(FRAME_QUEUE);
        if !self.is_closed() {
            self.inner.io.spawn(read_pump(
                Arc::clone(&self.inner.reader),
                self.inner.closed.clone(),
                decoder,
                frames,
            ));
        }
        ReadStream {
            inner: ReceiverStream::new(receiver),
        }
    }

    /// Writes `text` and flushes.
    ///
    /// Waits only until the bytes are handed to the OS socket buffer, never
    /// for the peer to read or acknowledge them.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::IoFailure`] if the connection is closed or the
    /// peer has gone away.
    pub async fn send(&self, text: &str) -> Result<(), SessionError> {
        self.send_bytes(text.as_bytes()).await
    }

    /// Writes `bytes` and flushes, with the same completion point as
    /// [`DuplexConnection::send`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::IoFailure`] if the connection is closed or the
    /// peer has gone away.
    #[instrument(skip(self, bytes), level = "trace", fields(len = bytes.len()))]
    pub async fn send_bytes(&self, bytes: &[u8]) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::connection_closed());
        }
        let mut writer = self.inner.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(SessionError::connection_closed());
        };

        tokio::select! {
            biased;
            () = self.inner.closed.cancelled() => Err(SessionError::connection_closed()),
            written = async {
                writer.write_all(bytes).await?;
                writer.flush().await
            } => written.map_err(SessionError::from),
        }
    }

    /// Closes both directions. Active views end normally. Later calls do
    /// nothing.
    #[instrument(skip(self), level = "debug", fields(remote = %self.inner.remote.address()))]
    pub async fn close(&self) {
        self.inner.closed.cancel();
        drop(self.inner.reader.lock().await.take());

        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(error) = writer.shutdown().await {
                debug!(%error, "socket did not shut down cleanly");
            }
            debug!("connection closed");
        }
    }
}

/// Received items of one connection view.
///
/// Read failures arrive as a single `Err` item before the stream ends.
pub struct ReadStream<T> {
    inner: ReceiverStream<Result<T, SessionError>>,
}

impl<T> fmt::Debug for ReadStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadStream").finish_non_exhaustive()
    }
}

impl<T> Stream for ReadStream<T> {
    type Item = Result<T, SessionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

trait FrameDecoder: Send + 'static {
    type Frame: Send + 'static;

    fn decode(&mut self, chunk: &[u8], frames: &mut Vec<Self::Frame>);
}

struct ByteDecoder;

impl FrameDecoder for ByteDecoder {
    type Frame = u8;

    fn decode(&mut self, chunk: &[u8], frames: &mut Vec<u8>) {
        frames.extend_from_slice(chunk);
    }
}

struct LineDecoder {
    delimiters: Arc<[u8]>,
    pending: Vec<u8>,
}

impl LineDecoder {
    fn new(delimiters: Arc<[u8]>) -> Self {
        Self {
            delimiters,
            pending: Vec::new(),
        }
    }
}

impl FrameDecoder for LineDecoder {
    type Frame = String;

    fn decode(&mut self, chunk: &[u8], frames: &mut Vec<String>) {
        for byte in chunk {
            if !self.delimiters.contains(byte) {
                self.pending.push(*byte);
            } else if !self.pending.is_empty() {
                frames.push(String::from_utf8_lossy(&self.pending).into_owned());
                self.pending.clear();
            }
        }
    }
}

async fn read_pump<D: FrameDecoder>(
    shared: SharedReader,
    closed: CancellationToken,
    mut decoder: D,
    frames: mpsc::Sender<Result<D::Frame, SessionError>>,
) {
    let mut reader = tokio::select! {
        biased;
        () = closed.cancelled() => return,
        () = frames.closed() => return,
        reader = shared.lock() => reader,
    };
    let Some(stream) = reader.as_mut() else {
        return;
    };

    let mut decoded = Vec::new();
    loop {
        let read = tokio::select! {
            biased;
            () = closed.cancelled() => return,
            () = frames.closed() => return,
            read = stream.fill_buf() => read.map(<[u8]>::to_vec),
        };

        let chunk = match read {
            Ok(chunk) if chunk.is_empty() => {
                trace!("peer closed the connection");
                return;
            }
            Ok(chunk) => chunk,
            Err(error) => {
                debug!(%error, "socket read failed");
                tokio::select! {
                    biased;
                    () = closed.cancelled() => {}
                    _ = frames.send(Err(SessionError::IoFailure(error))) => {}
                }
                return;
            }
        };
        stream.consume(chunk.len());

        decoder.decode(&chunk, &mut decoded);
        for frame in decoded.drain(..) {
            let delivered = tokio::select! {
                biased;
                () = closed.cancelled() => return,
                sent = frames.send(Ok(frame)) => sent.is_ok(),
            };
            if !delivered {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_stream::StreamExt;

    use super::*;
    use crate::radio::{Address, SPP_UUID};

    fn connection() -> (DuplexConnection, tokio::io::DuplexStream) {
        let (local, peer) = tokio::io::duplex(256);
        let address: Address = "AA:BB:CC:DD:EE:01".parse().expect("test address should parse");
        let socket = Socket::new(Device::new(address), SPP_UUID, local);
        let connection = DuplexConnection::new(socket, Handle::current(), 16, b"\r\n");
        (connection, peer)
    }

    #[rstest]
    #[case(vec!["hello\r\nworld\n"], vec!["hello", "world"])]
    #[case(vec!["hel", "lo\n"], vec!["hello"])]
    #[case(vec!["\r\n\r\nhi\r\n"], vec!["hi"])]
    #[case(vec!["tail without end"], vec![])]
    fn line_decoder_splits_on_any_delimiter(
        #[case] chunks: Vec<&str>,
        #[case] expected: Vec<&str>,
    ) {
        let mut decoder = LineDecoder::new(Arc::from(&b"\r\n"[..]));
        let mut frames = Vec::new();
        for chunk in chunks {
            decoder.decode(chunk.as_bytes(), &mut frames);
        }
        assert_eq!(expected, frames);
    }

    #[test]
    fn line_decoder_replaces_invalid_utf8() {
        let mut decoder = LineDecoder::new(Arc::from(&b"\n"[..]));
        let mut frames = Vec::new();
        decoder.decode(b"caf\xff\n", &mut frames);
        assert_eq!(vec!["caf\u{fffd}".to_string()], frames);
    }

    #[tokio::test]
    async fn bytes_arrive_in_order() {
        let (connection, mut peer) = connection();
        let mut bytes = connection.observe_bytes();

        peer.write_all(b"abc").await.expect("peer should write");
        drop(peer);

        let received: Vec<u8> = bytes
            .collect::<Result<Vec<_>, _>>()
            .await
            .expect("stream should end normally");
        assert_eq!(b"abc".to_vec(), received);
    }

    #[tokio::test]
    async fn send_writes_through_to_the_peer() {
        let (connection, mut peer) = connection();

        connection.send("ping").await.expect("send should succeed");
        let mut received = [0_u8; 4];
        peer.read_exact(&mut received)
            .await
            .expect("peer should read");

        assert_eq!(b"ping", &received);
    }

    #[tokio::test]
    async fn close_ends_views_and_rejects_sends() {
        let (connection, _peer) = connection();
        let mut lines = connection.observe_lines();

        connection.close().await;
        connection.close().await;

        assert!(connection.is_closed());
        assert_matches!(lines.next().await, None);
        assert_matches!(
            connection.send("late").await,
            Err(SessionError::IoFailure(_))
        );
        assert_matches!(connection.observe_bytes().next().await, None);
    }

    #[tokio::test]
    async fn peer_hangup_fails_sends() {
        let (connection, peer) = connection();
        drop(peer);

        assert_matches!(
            connection.send("anyone there").await,
            Err(SessionError::IoFailure(_))
        );
    }
}
