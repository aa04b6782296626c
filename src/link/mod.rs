//! Framed message transport between the DUT client and the assist board.
//!
//! A logical message (request or response) travels as a run of fixed-size
//! frames, see [`frame`]. [`send`] splits a payload into frames and writes
//! them under a wall-clock deadline; [`receive`] reads frames back and
//! reassembles the payload.
//!
//! Responses carry the [`SENTINEL`] trailer. How the receiver decides that a
//! message is complete is selected with [`Termination`].

pub mod frame;
mod receiver;
mod sender;
mod session;

pub use receiver::receive;
pub use sender::send;
pub use session::{Session, SessionState};

use crate::error::ErrorCode;
use frame::FrameError;
use serde::Deserialize;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Literal token closing every response payload.
pub const SENTINEL: &str = "AssistDataEnds";

/// Wall-clock bound for one send or receive.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Pause between retries after an empty read.
pub const DEFAULT_ZERO_READ_BACKOFF: Duration = Duration::from_secs(2);

/// Consecutive empty reads tolerated before giving up on the peer.
pub const DEFAULT_MAX_ZERO_READS: u32 = 5;

/// How the receiver detects the end of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Termination {
    /// Complete once `total_length` bytes arrived. The payload is returned whole.
    #[default]
    #[serde(alias = "declared_length")]
    Length,
    /// Complete at the first sentinel, or at `total_length` bytes if none shows up.
    Sentinel,
}

/// Tuning for one send/receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOptions {
    pub timeout: Duration,
    pub zero_read_backoff: Duration,
    pub max_zero_reads: u32,
    pub termination: Termination,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            zero_read_backoff: DEFAULT_ZERO_READ_BACKOFF,
            max_zero_reads: DEFAULT_MAX_ZERO_READS,
            termination: Termination::default(),
        }
    }
}

/// Transport and protocol failures of one transfer.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("socket write failed: {0}")]
    WriteFailed(#[source] io::Error),

    #[error("socket read failed: {0}")]
    ReadFailed(#[source] io::Error),

    #[error("peer closed the connection ({empty_reads} consecutive empty reads)")]
    ConnectionClosed { empty_reads: u32 },

    #[error("transfer timed out after {0:?}")]
    TimedOut(Duration),

    #[error("protocol error: {0}")]
    Frame(#[from] FrameError),

    #[error("payload of {0} bytes does not fit the frame length field")]
    PayloadTooLarge(usize),
}

impl LinkError {
    /// Result code for a failure while sending.
    pub fn write_code(&self) -> ErrorCode {
        match self {
            LinkError::WriteFailed(_) => ErrorCode::WriteFail1,
            _ => ErrorCode::WriteFail2,
        }
    }

    /// Result code for a failure while receiving.
    pub fn read_code(&self) -> ErrorCode {
        ErrorCode::ReadSocketFail
    }
}

/// Append the sentinel to a response text.
///
/// A separating space is added unless the text already ends in whitespace.
pub fn seal(mut text: String) -> String {
    if !text.is_empty() && !text.ends_with(char::is_whitespace) {
        text.push(' ');
    }
    text.push_str(SENTINEL);
    text
}

/// Strip the sentinel closing a response, along with whitespace after it.
///
/// Payloads without a trailing sentinel are returned unchanged.
pub fn unseal(payload: &[u8]) -> &[u8] {
    let end = payload
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);

    match payload[..end].strip_suffix(SENTINEL.as_bytes()) {
        Some(text) => text,
        None => payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal() {
        assert_eq!(
            seal("Assist : Health check is OK.".to_string()),
            "Assist : Health check is OK. AssistDataEnds"
        );
        assert_eq!(seal("hello\n".to_string()), "hello\nAssistDataEnds");
        assert_eq!(seal(String::new()), "AssistDataEnds");
    }

    #[test]
    fn test_unseal() {
        assert_eq!(unseal(b"logs\nAssistDataEnds"), b"logs\n");
        assert_eq!(unseal(b"ok. AssistDataEnds\n"), b"ok. ");
        assert_eq!(unseal(b"AssistDataEnds"), b"");
        assert_eq!(unseal(b"no trailer"), b"no trailer");
        assert_eq!(unseal(b""), b"");
    }

    #[test]
    fn test_error_codes() {
        let broken = LinkError::WriteFailed(io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(broken.write_code(), ErrorCode::WriteFail1);
        assert_eq!(
            LinkError::TimedOut(Duration::from_secs(1)).write_code(),
            ErrorCode::WriteFail2
        );
        assert_eq!(
            LinkError::ConnectionClosed { empty_reads: 5 }.read_code(),
            ErrorCode::ReadSocketFail
        );
    }

    async fn round_trip(payload: Vec<u8>, options: LinkOptions) -> Vec<u8> {
        let (mut near, mut far) = tokio::io::duplex(FRAME_PIPE_SIZE);

        let sender = tokio::spawn(async move { send(&mut near, &payload, &options).await });
        let received = receive(&mut far, &options).await.unwrap();

        // Sentinel termination can stop before the last frame; closing our end
        // releases a sender still blocked on it.
        drop(far);
        let _ = sender.await.unwrap();

        received.to_vec()
    }

    const FRAME_PIPE_SIZE: usize = 4096;

    #[tokio::test]
    async fn test_round_trip_sizes() {
        let capacity = frame::FRAME_DATA_CAPACITY;

        for len in [0, 1, capacity - 1, capacity, capacity + 1, 3 * capacity + 17] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 199) as u8).collect();
            let received = round_trip(payload.clone(), LinkOptions::default()).await;
            assert_eq!(received, payload, "payload of {} bytes", len);
        }
    }

    #[tokio::test]
    async fn test_round_trip_sealed_response() {
        let response = seal("hello\n".to_string()).into_bytes();
        let received = round_trip(response.clone(), LinkOptions::default()).await;
        assert_eq!(received, response);
        assert_eq!(unseal(&received), b"hello\n");
    }

    #[tokio::test]
    async fn test_round_trip_payload_ending_with_sentinel() {
        let request = b"echo AssistDataEnds".to_vec();
        let received = round_trip(request.clone(), LinkOptions::default()).await;
        assert_eq!(received, request);
    }

    #[tokio::test]
    async fn test_round_trip_with_early_sentinel() {
        let mut payload = b"prefix AssistDataEnds middle ".to_vec();
        payload.extend(std::iter::repeat(b'z').take(frame::FRAME_DATA_CAPACITY));

        let received = round_trip(payload.clone(), LinkOptions::default()).await;
        assert_eq!(received, payload);

        // Content based termination cuts the message at the first sentinel.
        let legacy = LinkOptions {
            termination: Termination::Sentinel,
            ..LinkOptions::default()
        };
        let received = round_trip(payload, legacy).await;
        assert_eq!(received, b"prefix ");
    }

    #[test]
    fn test_termination_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            termination: Termination,
        }

        let w: Wrapper = toml::from_str(r#"termination = "sentinel""#).unwrap();
        assert_eq!(w.termination, Termination::Sentinel);
        let w: Wrapper = toml::from_str(r#"termination = "length""#).unwrap();
        assert_eq!(w.termination, Termination::Length);
    }
}
