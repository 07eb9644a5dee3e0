// TCP transport: framed message helpers and the per-connection accept loop.
use anyhow::{Context, Result, anyhow};
use bytes::{Bytes, BytesMut};
use sluice_wire::{ClientMessage, Frame, FrameHeader, ServerMessage};
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::config::GatewayConfig;
use crate::driver::{Collaborators, run_session};

// Low-level frame reader with a max payload cap. `None` only when the stream ends
// on a frame boundary; a stream cut inside a frame is an error.
pub async fn read_frame_limited_into<R>(
    reader: &mut R,
    max_payload_bytes: usize,
    scratch: &mut BytesMut,
) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut header_bytes = [0u8; FrameHeader::LEN];
    loop {
        match reader.read(&mut header_bytes[..1]).await {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err).context("read frame header"),
        }
    }
    reader
        .read_exact(&mut header_bytes[1..])
        .await
        .context("read frame header")?;

    let header = FrameHeader::decode(Bytes::copy_from_slice(&header_bytes))
        .context("decode frame header")?;
    let length = usize::try_from(header.length).context("frame length")?;
    if length > max_payload_bytes {
        return Err(anyhow!(
            "frame length {length} exceeds max_payload_bytes {max_payload_bytes}"
        ));
    }
    scratch.clear();
    scratch.resize(length, 0u8);
    reader
        .read_exact(&mut scratch[..])
        .await
        .context("read frame payload")?;
    Ok(Some(Frame {
        header,
        payload: scratch.split().freeze(),
    }))
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(&frame.encode())
        .await
        .context("write frame")?;
    writer.flush().await.context("flush frame")
}

pub async fn read_client_message<R>(
    reader: &mut R,
    max_frame_bytes: usize,
    scratch: &mut BytesMut,
) -> Result<Option<ClientMessage>>
where
    R: AsyncRead + Unpin,
{
    let Some(frame) = read_frame_limited_into(reader, max_frame_bytes, scratch).await? else {
        return Ok(None);
    };
    ClientMessage::decode(frame)
        .map(Some)
        .context("decode client message")
}

pub async fn write_server_message<W>(writer: &mut W, message: &ServerMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = message.encode().context("encode server message")?;
    write_frame(writer, &frame).await
}

// Producer-side helpers, used by tools and tests speaking to the gateway.
pub async fn write_client_message<W>(writer: &mut W, message: &ClientMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = message.encode().context("encode client message")?;
    write_frame(writer, &frame).await
}

pub async fn read_server_message<R>(
    reader: &mut R,
    max_frame_bytes: usize,
) -> Result<Option<ServerMessage>>
where
    R: AsyncRead + Unpin,
{
    let mut scratch = BytesMut::new();
    let Some(frame) = read_frame_limited_into(reader, max_frame_bytes, &mut scratch).await? else {
        return Ok(None);
    };
    ServerMessage::decode(frame)
        .map(Some)
        .context("decode server message")
}

/// Accept loop: each TCP connection runs one write session.
pub async fn serve(
    listener: TcpListener,
    config: Arc<GatewayConfig>,
    collaborators: Collaborators,
) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await.context("accept connection")?;
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(error = %err, %peer, "set_nodelay failed");
        }
        let config = Arc::clone(&config);
        let collaborators = collaborators.clone();
        tokio::spawn(async move {
            let (reader, writer) = stream.into_split();
            match run_session(
                reader,
                writer,
                peer.to_string(),
                config.session.clone(),
                config.max_frame_bytes,
                collaborators,
            )
            .await
            {
                Ok(reason) => {
                    tracing::debug!(%peer, code = %reason.code, "connection finished")
                }
                Err(err) => tracing::warn!(error = %err, %peer, "write session connection failed"),
            }
        });
    }
}
