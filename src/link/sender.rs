//! Chunked sender.

use super::frame::{FrameBuf, FRAME_DATA_CAPACITY};
use super::{LinkError, LinkOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

/// Send `payload` as a run of frames.
///
/// The whole transfer is bounded by `options.timeout`. An empty payload
/// still produces one (empty) frame so the peer sees a complete message.
pub async fn send<W>(writer: &mut W, payload: &[u8], options: &LinkOptions) -> Result<(), LinkError>
where
    W: AsyncWrite + Unpin,
{
    let total =
        u32::try_from(payload.len()).map_err(|_| LinkError::PayloadTooLarge(payload.len()))?;
    let deadline = Instant::now() + options.timeout;
    let mut frame = FrameBuf::new();
    let mut sent = 0usize;
    let mut frames = 0u32;

    loop {
        let end = payload.len().min(sent + FRAME_DATA_CAPACITY);
        let header = frame.encode(total, &payload[sent..end])?;

        write_frame(writer, &frame, deadline, options).await?;

        // Advance by payload bytes placed in the frame, not by bytes written.
        sent += header.current_length as usize;
        frames += 1;
        trace!(sent, total, chunk = header.current_length, "Frame sent");

        if sent >= payload.len() {
            break;
        }
    }

    match timeout_at(deadline, writer.flush()).await {
        Err(_) => return Err(LinkError::TimedOut(options.timeout)),
        Ok(Err(e)) => return Err(LinkError::WriteFailed(e)),
        Ok(Ok(())) => {}
    }

    debug!(total, frames, "Message sent");
    Ok(())
}

/// Write one whole frame, tolerating short and zero-byte writes.
async fn write_frame<W>(
    writer: &mut W,
    frame: &FrameBuf,
    deadline: Instant,
    options: &LinkOptions,
) -> Result<(), LinkError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = frame.as_bytes();
    let mut written = 0;

    while written < bytes.len() {
        if Instant::now() >= deadline {
            return Err(LinkError::TimedOut(options.timeout));
        }

        match timeout_at(deadline, writer.write(&bytes[written..])).await {
            Err(_) => return Err(LinkError::TimedOut(options.timeout)),
            Ok(Err(e)) => return Err(LinkError::WriteFailed(e)),
            Ok(Ok(0)) => {
                warn!(written, "Socket write returned zero bytes, retrying");
                tokio::task::yield_now().await;
            }
            Ok(Ok(n)) => written += n,
        }
    }

    Ok(())
}
