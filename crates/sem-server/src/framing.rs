//! Async framing of transactions over a byte stream.
//!
//! The pure encoders and decoders live in `sem_core::protocol::codec`; this
//! module drives them over `AsyncRead`/`AsyncWrite` with exact-length reads.
//! A clean EOF before the first header byte is a normal disconnect
//! (`Ok(None)`); any other short read is a [`FrameError`].

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use sem_core::protocol::codec::{
    decode_request_header, decode_response, encode_request, encode_response, request_from_parts,
    ProtocolError,
};
use sem_core::protocol::frame::{RequestFrame, ResponseFrame, ResponseLayout, REQUEST_HEADER_SIZE};

/// Error reading or writing a frame.  Always fatal for the connection.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The peer closed the stream part-way through a frame.
    #[error("connection closed mid-frame while reading {part}")]
    Truncated { part: &'static str },

    /// The header violated the framing contract.
    #[error("invalid frame: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Reads one request frame.
///
/// Returns `Ok(None)` when the peer disconnects cleanly between frames.
///
/// # Errors
///
/// [`FrameError::Truncated`] on a partial frame, [`FrameError::Protocol`] on
/// an invalid header, [`FrameError::Io`] for other socket failures.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<RequestFrame>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; REQUEST_HEADER_SIZE];

    // First byte separately so a disconnect between frames is not an error.
    if reader.read(&mut header[..1]).await? == 0 {
        return Ok(None);
    }
    read_exact(reader, &mut header[1..], "request header").await?;

    let header = decode_request_header(&header)?;
    let mut body = vec![0u8; header.body_len()];
    read_exact(reader, &mut body, "request body").await?;

    Ok(Some(request_from_parts(&header, &body)))
}

/// Writes one response frame in `layout` and flushes it.
pub async fn write_response<W>(
    writer: &mut W,
    response: &ResponseFrame,
    layout: ResponseLayout,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_response(response, layout)).await?;
    writer.flush().await?;
    Ok(())
}

/// Client side: writes one request frame.
pub async fn write_request<W>(writer: &mut W, request: &RequestFrame) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_request(request)?).await?;
    writer.flush().await?;
    Ok(())
}

/// Client side: reads one response frame in `layout`.
pub async fn read_response<R>(
    reader: &mut R,
    layout: ResponseLayout,
) -> Result<ResponseFrame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(64);
    let mut chunk = [0u8; 512];
    loop {
        match decode_response(&buf, layout) {
            Ok((frame, _)) => return Ok(frame),
            Err(ProtocolError::InsufficientData { needed, .. }) => {
                let want = (needed - buf.len()).min(chunk.len());
                read_exact(reader, &mut chunk[..want], "response").await?;
                buf.extend_from_slice(&chunk[..want]);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn read_exact<R>(reader: &mut R, buf: &mut [u8], part: &'static str) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FrameError::Truncated { part }),
        Err(e) => Err(e.into()),
    }
}
