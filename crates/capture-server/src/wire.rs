//! Length-prefixed framing on the capture socket.
//!
//! Every frame is a 4-byte little-endian length followed by that many bytes.
//! A zero length is a terminator, not an empty payload.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use tickcap_common::error::TickcapError;

/// What a single read produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Frame(Vec<u8>),
    /// Zero-length frame.
    Terminator,
    /// The peer closed before a length prefix was complete.
    Eof,
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Connection closed mid-frame: received {received} of {expected} bytes")]
    ClosedMidFrame { expected: u32, received: usize },

    #[error("Read timed out after {secs:.1}s")]
    Timeout { secs: f64 },

    #[error("Payload of {len} bytes exceeds the 4-byte length prefix")]
    PayloadTooLarge { len: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<WireError> for TickcapError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::PayloadTooLarge { .. } => TickcapError::protocol(err.to_string()),
            other => TickcapError::transport(other.to_string()),
        }
    }
}

async fn with_timeout<F, T>(timeout: Option<Duration>, fut: F) -> Result<T, WireError>
where
    F: std::future::Future<Output = std::io::Result<T>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(WireError::Timeout {
                secs: limit.as_secs_f64(),
            }),
        },
        None => Ok(fut.await?),
    }
}

/// Read until `buf` is full or the peer closes. Returns bytes read.
async fn read_fully<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Read one frame. `timeout` bounds the length read and the payload read
/// separately.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    timeout: Option<Duration>,
) -> Result<ReadOutcome, WireError> {
    let mut len_buf = [0u8; 4];
    let got = with_timeout(timeout, read_fully(reader, &mut len_buf)).await?;
    if got < len_buf.len() {
        return Ok(ReadOutcome::Eof);
    }

    let len = u32::from_le_bytes(len_buf);
    if len == 0 {
        return Ok(ReadOutcome::Terminator);
    }

    // Grow as bytes arrive rather than trusting the prefix for allocation.
    let mut payload = Vec::new();
    let received = with_timeout(
        timeout,
        (&mut *reader).take(u64::from(len)).read_to_end(&mut payload),
    )
    .await?;
    if received < len as usize {
        return Err(WireError::ClosedMidFrame {
            expected: len,
            received,
        });
    }
    Ok(ReadOutcome::Frame(payload))
}

/// Write one frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), WireError> {
    let len = u32::try_from(payload.len()).map_err(|_| WireError::PayloadTooLarge {
        len: payload.len(),
    })?;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(payload).await?;
    Ok(())
}

/// Write a zero-length terminator.
pub async fn write_terminator<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<(), WireError> {
    writer.write_all(&0u32.to_le_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_zero_length_is_terminator() {
        let mut input: &[u8] = &[0, 0, 0, 0];
        let outcome = read_frame(&mut input, None).await.unwrap();
        assert_eq!(outcome, ReadOutcome::Terminator);
    }

    #[tokio::test]
    async fn test_partial_length_is_eof() {
        let mut empty: &[u8] = &[];
        assert_eq!(read_frame(&mut empty, None).await.unwrap(), ReadOutcome::Eof);

        let mut partial: &[u8] = &[5, 0];
        assert_eq!(read_frame(&mut partial, None).await.unwrap(), ReadOutcome::Eof);
    }

    #[tokio::test]
    async fn test_short_payload_is_closed_mid_frame() {
        let mut input: &[u8] = &[10, 0, 0, 0, b'a', b'b', b'c'];
        match read_frame(&mut input, None).await.unwrap_err() {
            WireError::ClosedMidFrame { expected, received } => {
                assert_eq!(expected, 10);
                assert_eq!(received, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_read_times_out() {
        let (_client, mut server) = tokio::io::duplex(64);
        let err = read_frame(&mut server, Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::Timeout { .. }));
        assert!(TickcapError::from(err).is_connection_scoped());
    }

    #[tokio::test]
    async fn test_frames_then_terminator() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"{\"episode\": 3}").await.unwrap();
        write_frame(&mut buf, b"tick").await.unwrap();
        write_terminator(&mut buf).await.unwrap();

        let mut input: &[u8] = &buf;
        assert_eq!(
            read_frame(&mut input, None).await.unwrap(),
            ReadOutcome::Frame(b"{\"episode\": 3}".to_vec())
        );
        assert_eq!(
            read_frame(&mut input, None).await.unwrap(),
            ReadOutcome::Frame(b"tick".to_vec())
        );
        assert_eq!(read_frame(&mut input, None).await.unwrap(), ReadOutcome::Terminator);
        assert_eq!(read_frame(&mut input, None).await.unwrap(), ReadOutcome::Eof);
    }

    proptest! {
        #[test]
        fn prop_frame_round_trip(payload in proptest::collection::vec(any::<u8>(), 1..4096)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let outcome = rt.block_on(async {
                let mut buf = Vec::new();
                write_frame(&mut buf, &payload).await.unwrap();
                prop_assert_eq!(buf.len(), payload.len() + 4);
                let mut input: &[u8] = &buf;
                Ok(read_frame(&mut input, None).await.unwrap())
            })?;
            prop_assert_eq!(outcome, ReadOutcome::Frame(payload));
        }
    }
}
