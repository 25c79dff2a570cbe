//! Protocol Multiplexer
//!
//! Serves the HTTP API and the gRPC ingestion service from one TCP listener.
//!
//! Each accepted connection is classified from its first bytes. A connection
//! goes to the RPC server only when it opens with the HTTP/2 prior-knowledge
//! preface and its first request carries a gRPC `content-type`; everything
//! else, plain HTTP/2 (h2c) included, goes to the HTTP server. Bytes read
//! during classification are replayed by [`RewindStream`], so neither server
//! knows the other exists.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use futures_util::Stream;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tonic::transport::server::{Connected, TcpConnectInfo};

/// Client connection preface of HTTP/2 (RFC 9113, section 3.4)
pub const HTTP2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// `content-type` prefix of every gRPC request
const GRPC_CONTENT_TYPE: &[u8] = b"application/grpc";

/// Bytes read while waiting for the first request's headers before the
/// connection is handed to the HTTP server unclassified
const MAX_CLASSIFY_BYTES: usize = 64 * 1024;

const FRAME_HEADER_LEN: usize = 9;
const FRAME_HEADERS: u8 = 0x1;
const FRAME_CONTINUATION: u8 = 0x9;
const FLAG_END_HEADERS: u8 = 0x4;
const FLAG_PADDED: u8 = 0x8;
const FLAG_PRIORITY: u8 = 0x20;

/// Protocol a connection was routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Rpc,
    Http,
}

/// Classify a connection from the bytes read so far.
///
/// Returns `None` while more input is needed: the bytes are a strict prefix
/// of the HTTP/2 preface, or the first request's header block is not
/// complete yet.
pub fn classify(initial: &[u8]) -> Option<Protocol> {
    let compared = initial.len().min(HTTP2_PREFACE.len());
    if initial[..compared] != HTTP2_PREFACE[..compared] {
        return Some(Protocol::Http);
    }
    if initial.len() < HTTP2_PREFACE.len() {
        return None;
    }

    match first_header_block(&initial[HTTP2_PREFACE.len()..]) {
        HeaderBlock::Complete(block) if is_grpc_request(&block) => Some(Protocol::Rpc),
        HeaderBlock::Complete(_) | HeaderBlock::Malformed => Some(Protocol::Http),
        HeaderBlock::Incomplete if initial.len() >= MAX_CLASSIFY_BYTES => Some(Protocol::Http),
        HeaderBlock::Incomplete => None,
    }
}

enum HeaderBlock {
    Complete(Vec<u8>),
    Incomplete,
    Malformed,
}

/// Collect the HPACK block of the first HEADERS frame (and its CONTINUATION
/// frames) from the frames following the preface.
fn first_header_block(mut frames: &[u8]) -> HeaderBlock {
    let mut block: Option<Vec<u8>> = None;

    loop {
        if frames.len() < FRAME_HEADER_LEN {
            return HeaderBlock::Incomplete;
        }
        let len = u32::from_be_bytes([0, frames[0], frames[1], frames[2]]) as usize;
        let kind = frames[3];
        let flags = frames[4];
        let Some(payload) = frames.get(FRAME_HEADER_LEN..FRAME_HEADER_LEN + len) else {
            return HeaderBlock::Incomplete;
        };
        frames = &frames[FRAME_HEADER_LEN + len..];

        let fragment = match (kind, block.is_some()) {
            (FRAME_HEADERS, false) => match header_fragment(payload, flags) {
                Some(fragment) => fragment,
                None => return HeaderBlock::Malformed,
            },
            (FRAME_CONTINUATION, true) => payload,
            // Only CONTINUATION may follow an unfinished header block.
            (FRAME_CONTINUATION, false) | (_, true) => return HeaderBlock::Malformed,
            // SETTINGS, WINDOW_UPDATE and the like precede the first request.
            _ => continue,
        };

        let buffer = block.get_or_insert_with(Vec::new);
        buffer.extend_from_slice(fragment);
        if flags & FLAG_END_HEADERS != 0 {
            return HeaderBlock::Complete(std::mem::take(buffer));
        }
    }
}

/// Strip padding and priority fields from a HEADERS frame payload
fn header_fragment(payload: &[u8], flags: u8) -> Option<&[u8]> {
    let mut fragment = payload;
    let mut padding = 0;
    if flags & FLAG_PADDED != 0 {
        let (&pad_len, rest) = fragment.split_first()?;
        padding = pad_len as usize;
        fragment = rest;
    }
    if flags & FLAG_PRIORITY != 0 {
        fragment = fragment.get(5..)?;
    }
    fragment.get(..fragment.len().checked_sub(padding)?)
}

/// The first header block of a connection never references dynamic table
/// entries from earlier blocks, so a fresh decoder is enough.
fn is_grpc_request(block: &[u8]) -> bool {
    match hpack::Decoder::new().decode(block) {
        Ok(headers) => headers.iter().any(|(name, value)| {
            name.as_slice() == b"content-type" && value.starts_with(GRPC_CONTENT_TYPE)
        }),
        Err(e) => {
            tracing::debug!("Undecodable HTTP/2 request headers: {:?}", e);
            false
        }
    }
}

/// Multiplexer configuration
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// How long a new connection may take to send enough bytes to classify;
    /// for HTTP/2 that is everything up to its first request's headers
    pub classify_timeout: Duration,

    /// Classified connections waiting for each server's accept loop
    pub pending_connections: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            classify_timeout: Duration::from_secs(5),
            pending_connections: 128,
        }
    }
}

type Accepted = (RewindStream, SocketAddr);

/// Owner of the shared listening socket
pub struct Multiplexer {
    listener: TcpListener,
    config: MuxConfig,
}

impl Multiplexer {
    pub fn new(listener: TcpListener, config: MuxConfig) -> Self {
        Self { listener, config }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Start the accept loop and return the per-protocol accept queues
    ///
    /// The loop stops once both queues have been dropped.
    pub fn split(self) -> io::Result<(HttpListener, RpcIncoming, JoinHandle<()>)> {
        let local_addr = self.listener.local_addr()?;
        let capacity = self.config.pending_connections.max(1);
        let (http_tx, http_rx) = mpsc::channel(capacity);
        let (rpc_tx, rpc_rx) = mpsc::channel(capacity);

        let task = tokio::spawn(accept_loop(self.listener, self.config, http_tx, rpc_tx));

        Ok((
            HttpListener {
                queue: http_rx,
                local_addr,
            },
            RpcIncoming { queue: rpc_rx },
            task,
        ))
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: MuxConfig,
    http_tx: mpsc::Sender<Accepted>,
    rpc_tx: mpsc::Sender<Accepted>,
) {
    loop {
        let (stream, remote_addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    // Usually resource exhaustion; back off instead of spinning.
                    tracing::warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
            },
            _ = closed(&http_tx, &rpc_tx) => break,
        };

        tokio::spawn(route_connection(
            stream,
            remote_addr,
            config.classify_timeout,
            http_tx.clone(),
            rpc_tx.clone(),
        ));
    }

    tracing::info!("Multiplexer accept loop stopped");
}

async fn closed(http_tx: &mpsc::Sender<Accepted>, rpc_tx: &mpsc::Sender<Accepted>) {
    tokio::join!(http_tx.closed(), rpc_tx.closed());
}

async fn route_connection(
    mut stream: TcpStream,
    remote_addr: SocketAddr,
    classify_timeout: Duration,
    http_tx: mpsc::Sender<Accepted>,
    rpc_tx: mpsc::Sender<Accepted>,
) {
    let (protocol, initial) =
        match tokio::time::timeout(classify_timeout, read_initial(&mut stream)).await {
            Ok(Ok(classified)) => classified,
            Ok(Err(e)) => {
                tracing::debug!(%remote_addr, "Dropping unclassified connection: {}", e);
                return;
            }
            Err(_) => {
                tracing::debug!(%remote_addr, "Dropping connection: classification timed out");
                return;
            }
        };

    tracing::trace!(%remote_addr, ?protocol, "Connection classified");

    let queue = match protocol {
        Protocol::Rpc => &rpc_tx,
        Protocol::Http => &http_tx,
    };
    let connection = RewindStream::new(initial.freeze(), stream);
    if queue.send((connection, remote_addr)).await.is_err() {
        tracing::debug!(%remote_addr, ?protocol, "Dropping connection: server stopped");
    }
}

async fn read_initial(stream: &mut TcpStream) -> io::Result<(Protocol, BytesMut)> {
    let mut initial = BytesMut::with_capacity(HTTP2_PREFACE.len());
    loop {
        if let Some(protocol) = classify(&initial) {
            return Ok((protocol, initial));
        }
        if stream.read_buf(&mut initial).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before its protocol was identified",
            ));
        }
    }
}

/// A TCP connection that replays the bytes consumed during classification
#[derive(Debug)]
pub struct RewindStream {
    initial: Bytes,
    inner: TcpStream,
}

impl RewindStream {
    pub fn new(initial: Bytes, inner: TcpStream) -> Self {
        Self { initial, inner }
    }
}

impl AsyncRead for RewindStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.initial.has_remaining() {
            let n = this.initial.len().min(buf.remaining());
            buf.put_slice(&this.initial[..n]);
            this.initial.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for RewindStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl Connected for RewindStream {
    type ConnectInfo = TcpConnectInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        self.inner.connect_info()
    }
}

/// HTTP accept queue, usable with [`axum::serve`]
pub struct HttpListener {
    queue: mpsc::Receiver<Accepted>,
    local_addr: SocketAddr,
}

impl axum::serve::Listener for HttpListener {
    type Io = RewindStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.queue.recv().await {
            Some(accepted) => accepted,
            // The multiplexer is gone; no connection will ever arrive.
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

/// RPC accept queue, usable with
/// [`tonic::transport::server::Router::serve_with_incoming`]
pub struct RpcIncoming {
    queue: mpsc::Receiver<Accepted>,
}

impl Stream for RpcIncoming {
    type Item = io::Result<RewindStream>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut()
            .queue
            .poll_recv(cx)
            .map(|accepted| accepted.map(|(stream, _)| Ok(stream)))
    }
}
