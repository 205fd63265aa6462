//! Client-side transport: TCP and in-memory
//!
//! Mirrors the server's framing (1 type byte, 4-byte LE length, JSON body).
//! The [`Connector`] trait is the dial seam the connection manager retries
//! through; tests plug in scripted in-memory peers.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};

use shared::wire::{ClientFrame, FrameType, ServerFrame};

use crate::error::{ClientError, ClientResult};

/// One raw frame on the wire
pub type RawFrame = (FrameType, Vec<u8>);

// ========== Transport Trait ==========

#[async_trait]
pub trait Transport: Send + Sync {
    async fn read_frame(&self) -> ClientResult<RawFrame>;
    async fn write_frame(&self, frame_type: FrameType, body: &[u8]) -> ClientResult<()>;
    async fn close(&self) -> ClientResult<()>;
}

/// Read the next server frame, upgrading legacy event bodies
pub async fn read_server_frame(transport: &dyn Transport) -> ClientResult<ServerFrame> {
    let (frame_type, body) = transport.read_frame().await?;
    ServerFrame::from_parts(frame_type, &body)
        .map_err(|e| ClientError::Protocol(e.to_string()))
}

/// Write a client frame
pub async fn write_client_frame(transport: &dyn Transport, frame: &ClientFrame) -> ClientResult<()> {
    let body = frame
        .to_body()
        .map_err(|e| ClientError::Protocol(e.to_string()))?;
    transport.write_frame(frame.frame_type(), &body).await
}

// ========== Connector (dial seam) ==========

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> ClientResult<Arc<dyn Transport>>;
}

/// Dials the hub over TCP
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> ClientResult<Arc<dyn Transport>> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| ClientError::Connection(format!("TCP connect failed: {}", e)))?;
        Ok(Arc::new(TcpTransport::from_stream(stream)))
    }
}

// ========== TCP Transport ==========

/// TCP transport implementation
#[derive(Debug)]
pub struct TcpTransport {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
}

impl TcpTransport {
    pub fn from_stream(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read_frame(&self) -> ClientResult<RawFrame> {
        let mut reader = self.reader.lock().await;
        read_from_stream(&mut *reader).await
    }

    async fn write_frame(&self, frame_type: FrameType, body: &[u8]) -> ClientResult<()> {
        let mut writer = self.writer.lock().await;
        write_to_stream(&mut *writer, frame_type, body).await
    }

    async fn close(&self) -> ClientResult<()> {
        let mut writer = self.writer.lock().await;
        writer
            .shutdown()
            .await
            .map_err(|e| ClientError::Connection(format!("Shutdown failed: {}", e)))?;
        Ok(())
    }
}

async fn read_from_stream<R: AsyncReadExt + Unpin>(reader: &mut R) -> ClientResult<RawFrame> {
    let mut type_buf = [0u8; 1];
    reader
        .read_exact(&mut type_buf)
        .await
        .map_err(|e| ClientError::Connection(format!("Read type failed: {}", e)))?;

    let frame_type = FrameType::try_from(type_buf[0])
        .map_err(|_| ClientError::Protocol("Invalid frame type".into()))?;

    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| ClientError::Connection(format!("Read len failed: {}", e)))?;

    let len = u32::from_le_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| ClientError::Connection(format!("Read body failed: {}", e)))?;

    Ok((frame_type, body))
}

async fn write_to_stream<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    frame_type: FrameType,
    body: &[u8],
) -> ClientResult<()> {
    let mut data = Vec::with_capacity(5 + body.len());
    data.push(frame_type as u8);
    data.extend_from_slice(&(body.len() as u32).to_le_bytes());
    data.extend_from_slice(body);

    writer
        .write_all(&data)
        .await
        .map_err(|e| ClientError::Connection(format!("Write failed: {}", e)))?;
    Ok(())
}

// ========== Memory Transport (tests, embedded) ==========

/// In-process transport; [`memory_duplex`] builds a linked pair
#[derive(Debug)]
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<RawFrame>,
    rx: Mutex<mpsc::UnboundedReceiver<RawFrame>>,
}

/// Create a linked transport pair (client end, peer end)
pub fn memory_duplex() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            tx: a_tx,
            rx: Mutex::new(b_rx),
        },
        MemoryTransport {
            tx: b_tx,
            rx: Mutex::new(a_rx),
        },
    )
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn read_frame(&self) -> ClientResult<RawFrame> {
        let mut rx = self.rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| ClientError::Connection("Peer closed".into()))
    }

    async fn write_frame(&self, frame_type: FrameType, body: &[u8]) -> ClientResult<()> {
        self.tx
            .send((frame_type, body.to_vec()))
            .map_err(|_| ClientError::Connection("Peer closed".into()))
    }

    async fn close(&self) -> ClientResult<()> {
        Ok(())
    }
}
