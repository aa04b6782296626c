//! Chunked receiver.

use super::frame::{FrameBuf, FrameError, FRAME_SIZE};
use super::{LinkError, LinkOptions, Termination, SENTINEL};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, trace, warn};

/// Upper bound on the up-front reservation for a declared message size.
const MAX_PREALLOCATION: usize = 1024 * 1024;

/// Read frames until a complete message has been reassembled.
///
/// With [`Termination::Length`] the payload comes back byte for byte; use
/// [`unseal`](super::unseal) to drop a response trailer. With
/// [`Termination::Sentinel`] the payload is cut before the first sentinel.
pub async fn receive<R>(reader: &mut R, options: &LinkOptions) -> Result<Bytes, LinkError>
where
    R: AsyncRead + Unpin,
{
    let deadline = Instant::now() + options.timeout;
    let mut frame = FrameBuf::new();
    let mut payload = BytesMut::new();
    let mut total: Option<u32> = None;
    let mut empty_reads = 0u32;
    let sentinel = SENTINEL.as_bytes();

    loop {
        read_frame(reader, &mut frame, deadline, options, &mut empty_reads).await?;
        let header = frame.header()?;

        let expected = match total {
            None => {
                payload.reserve((header.total_length as usize).min(MAX_PREALLOCATION));
                header.total_length
            }
            Some(expected) if expected != header.total_length => {
                return Err(FrameError::TotalLengthChanged {
                    expected,
                    found: header.total_length,
                }
                .into());
            }
            Some(expected) => expected,
        };
        total = Some(expected);

        // A sentinel may straddle two frames.
        let scan_from = payload.len().saturating_sub(sentinel.len() - 1);
        payload.extend_from_slice(frame.chunk(&header));
        trace!(received = payload.len(), total = expected, "Frame received");

        if payload.len() > expected as usize {
            return Err(FrameError::Overrun {
                total: expected,
                received: payload.len(),
            }
            .into());
        }

        if options.termination == Termination::Sentinel {
            if let Some(pos) = find(&payload[scan_from..], sentinel) {
                payload.truncate(scan_from + pos);
                debug!(len = payload.len(), total = expected, "Message ended at sentinel");
                return Ok(payload.freeze());
            }
        }

        if payload.len() == expected as usize {
            debug!(len = payload.len(), total = expected, "Message received");
            return Ok(payload.freeze());
        }
    }
}

/// Fill `frame` with exactly one frame from the socket.
async fn read_frame<R>(
    reader: &mut R,
    frame: &mut FrameBuf,
    deadline: Instant,
    options: &LinkOptions,
    empty_reads: &mut u32,
) -> Result<(), LinkError>
where
    R: AsyncRead + Unpin,
{
    let buf = frame.as_mut_bytes();
    let mut filled = 0;

    while filled < FRAME_SIZE {
        if Instant::now() >= deadline {
            return Err(LinkError::TimedOut(options.timeout));
        }

        let n = match timeout_at(deadline, reader.read(&mut buf[filled..])).await {
            Err(_) => return Err(LinkError::TimedOut(options.timeout)),
            Ok(Err(e)) => return Err(LinkError::ReadFailed(e)),
            Ok(Ok(n)) => n,
        };

        if n == 0 {
            *empty_reads += 1;
            if *empty_reads >= options.max_zero_reads {
                return Err(LinkError::ConnectionClosed {
                    empty_reads: *empty_reads,
                });
            }
            warn!(empty_reads = *empty_reads, filled, "Socket read returned zero bytes, retrying");
            sleep_until(deadline.min(Instant::now() + options.zero_read_backoff)).await;
            continue;
        }

        *empty_reads = 0;
        filled += n;
    }

    Ok(())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::frame::FRAME_DATA_CAPACITY;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::ReadBuf;

    fn frame_bytes(total: u32, chunk: &[u8]) -> Vec<u8> {
        let mut frame = FrameBuf::new();
        frame.encode(total, chunk).unwrap();
        frame.as_bytes().to_vec()
    }

    fn quick() -> LinkOptions {
        LinkOptions {
            timeout: Duration::from_secs(5),
            zero_read_backoff: Duration::from_millis(1),
            ..LinkOptions::default()
        }
    }

    /// Reader that returns a few empty reads before serving its data.
    struct StutteringReader {
        empty_reads: usize,
        data: Vec<u8>,
        pos: usize,
    }

    impl AsyncRead for StutteringReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.empty_reads > 0 {
                self.empty_reads -= 1;
                return Poll::Ready(Ok(()));
            }
            let n = buf.remaining().min(self.data.len() - self.pos);
            let start = self.pos;
            buf.put_slice(&self.data[start..start + n]);
            self.pos += n;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_single_frame() {
        let mut mock = tokio_test::io::Builder::new()
            .read(&frame_bytes(5, b"hello"))
            .build();

        let payload = receive(&mut mock, &quick()).await.unwrap();
        assert_eq!(&payload[..], b"hello");
    }

    #[tokio::test]
    async fn test_partial_reads_are_reassembled() {
        let frame = frame_bytes(11, b"hello world");
        let mut mock = tokio_test::io::Builder::new()
            .read(&frame[..3])
            .read(&frame[3..600])
            .read(&frame[600..])
            .build();

        let payload = receive(&mut mock, &quick()).await.unwrap();
        assert_eq!(&payload[..], b"hello world");
    }

    #[tokio::test]
    async fn test_multi_frame_message() {
        let body: Vec<u8> = (0..2 * FRAME_DATA_CAPACITY + 5).map(|i| (i % 251) as u8).collect();
        let total = body.len() as u32;
        let mut mock = tokio_test::io::Builder::new()
            .read(&frame_bytes(total, &body[..FRAME_DATA_CAPACITY]))
            .read(&frame_bytes(total, &body[FRAME_DATA_CAPACITY..2 * FRAME_DATA_CAPACITY]))
            .read(&frame_bytes(total, &body[2 * FRAME_DATA_CAPACITY..]))
            .build();

        let payload = receive(&mut mock, &quick()).await.unwrap();
        assert_eq!(&payload[..], &body[..]);
    }

    #[tokio::test]
    async fn test_trailing_sentinel_is_payload() {
        let text = b"echo AssistDataEnds";
        let mut mock = tokio_test::io::Builder::new()
            .read(&frame_bytes(text.len() as u32, text))
            .build();

        let payload = receive(&mut mock, &quick()).await.unwrap();
        assert_eq!(&payload[..], &text[..]);
    }

    #[tokio::test]
    async fn test_early_sentinel_kept_with_length_termination() {
        let text = b"before AssistDataEnds after";
        let mut mock = tokio_test::io::Builder::new()
            .read(&frame_bytes(text.len() as u32, text))
            .build();

        let payload = receive(&mut mock, &quick()).await.unwrap();
        assert_eq!(&payload[..], &text[..]);
    }

    #[tokio::test]
    async fn test_early_sentinel_truncates_with_sentinel_termination() {
        // Known fragility of content based termination.
        let text = b"before AssistDataEnds after";
        let mut mock = tokio_test::io::Builder::new()
            .read(&frame_bytes(text.len() as u32, text))
            .build();
        let options = LinkOptions {
            termination: Termination::Sentinel,
            ..quick()
        };

        let payload = receive(&mut mock, &options).await.unwrap();
        assert_eq!(&payload[..], b"before ");
    }

    #[tokio::test]
    async fn test_sentinel_split_across_frames() {
        let mut body = vec![b'a'; FRAME_DATA_CAPACITY - 4];
        body.extend_from_slice(b"AssistDataEnds");
        let total = body.len() as u32;
        let mut mock = tokio_test::io::Builder::new()
            .read(&frame_bytes(total, &body[..FRAME_DATA_CAPACITY]))
            .read(&frame_bytes(total, &body[FRAME_DATA_CAPACITY..]))
            .build();
        let options = LinkOptions {
            termination: Termination::Sentinel,
            ..quick()
        };

        let payload = receive(&mut mock, &options).await.unwrap();
        assert_eq!(payload.len(), FRAME_DATA_CAPACITY - 4);
    }

    #[tokio::test]
    async fn test_empty_message() {
        let mut mock = tokio_test::io::Builder::new()
            .read(&frame_bytes(0, b""))
            .build();

        let payload = receive(&mut mock, &quick()).await.unwrap();
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn test_empty_reads_then_data() {
        let mut reader = StutteringReader {
            empty_reads: 3,
            data: frame_bytes(4, b"data"),
            pos: 0,
        };

        let payload = receive(&mut reader, &quick()).await.unwrap();
        assert_eq!(&payload[..], b"data");
    }

    #[tokio::test]
    async fn test_closed_peer_gives_up_after_five_empty_reads() {
        let mut mock = tokio_test::io::Builder::new().build();

        match receive(&mut mock, &quick()).await {
            Err(LinkError::ConnectionClosed { empty_reads }) => assert_eq!(empty_reads, 5),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_error() {
        let mut mock = tokio_test::io::Builder::new()
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        match receive(&mut mock, &quick()).await {
            Err(LinkError::ReadFailed(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_total_length_must_not_change() {
        let mut mock = tokio_test::io::Builder::new()
            .read(&frame_bytes(10, b"12345"))
            .read(&frame_bytes(12, b"67890"))
            .build();

        match receive(&mut mock, &quick()).await {
            Err(LinkError::Frame(FrameError::TotalLengthChanged { expected, found })) => {
                assert_eq!((expected, found), (10, 12));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_overrun_is_rejected() {
        let mut mock = tokio_test::io::Builder::new()
            .read(&frame_bytes(3, b"too long"))
            .build();

        assert!(matches!(
            receive(&mut mock, &quick()).await,
            Err(LinkError::Frame(FrameError::Overrun { total: 3, .. }))
        ));
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let (mut near, _far) = tokio::io::duplex(64);
        let options = LinkOptions {
            timeout: Duration::from_millis(100),
            ..quick()
        };

        assert!(matches!(
            receive(&mut near, &options).await,
            Err(LinkError::TimedOut(_))
        ));
    }
}
