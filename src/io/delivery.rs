//! Per-message delivery state machine
//!
//! ```text
//! Queued -> Sending{1} -> Acknowledged
//!                      -> Failed{1} -> Sending{2} -> ... -> Failed{max_retries + 1}
//! ```
//!
//! A message is acknowledged once all of its bytes are written and flushed
//! within the send timeout. A failed attempt resumes at the byte offset
//! already written, so a retry never duplicates or skips bytes of the frame.

use crate::error::{Result, TrackingError};
use crate::io::retry::RetryPolicy;
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Delivery state of one outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Queued,
    Sending { attempt: u32 },
    Acknowledged,
    Failed { attempt: u32 },
}

/// Encoded message on its way to one client
#[derive(Debug)]
pub struct PendingMessage {
    bytes: Bytes,
    written: usize,
    state: DeliveryState,
}

impl PendingMessage {
    pub fn new(bytes: Bytes) -> Self {
        Self {
            bytes,
            written: 0,
            state: DeliveryState::Queued,
        }
    }

    pub fn state(&self) -> DeliveryState {
        self.state
    }

    /// Bytes already accepted by the writer
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Drive the message to `Acknowledged` or exhaust the retry budget
    ///
    /// Returns the number of attempts used.
    ///
    /// # Errors
    ///
    /// [`TrackingError::DeliveryFailure`] once attempt `max_retries + 1`
    /// has failed. The state is then `Failed { attempt: max_retries + 1 }`.
    pub async fn deliver<W>(&mut self, writer: &mut W, policy: &RetryPolicy, send_timeout: Duration) -> Result<u32>
    where
        W: AsyncWrite + Unpin,
    {
        let max_attempts = policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.state = DeliveryState::Sending { attempt };

            let outcome = tokio::time::timeout(send_timeout, self.write_remaining(writer)).await;
            match outcome {
                Ok(Ok(())) => {
                    self.state = DeliveryState::Acknowledged;
                    trace!(attempt, bytes = self.bytes.len(), "Message acknowledged");
                    return Ok(attempt);
                }
                Ok(Err(e)) => {
                    debug!(attempt, written = self.written, error = %e, "Write attempt failed");
                }
                Err(_) => {
                    debug!(attempt, written = self.written, "Write attempt timed out");
                }
            }

            self.state = DeliveryState::Failed { attempt };
            if attempt >= max_attempts {
                return Err(TrackingError::DeliveryFailure { attempts: attempt });
            }

            let delay = policy.delay_for_retry(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    async fn write_remaining<W>(&mut self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        while self.written < self.bytes.len() {
            let n = writer.write(&self.bytes[self.written..]).await?;
            if n == 0 {
                return Err(std::io::ErrorKind::WriteZero.into());
            }
            self.written += n;
        }
        writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Writer that fails a fixed number of times, optionally accepting a
    /// few bytes per call
    struct FlakyWriter {
        failures_left: u32,
        attempts: u32,
        chunk: usize,
        received: Vec<u8>,
    }

    impl FlakyWriter {
        fn new(failures: u32, chunk: usize) -> Self {
            Self {
                failures_left: failures,
                attempts: 0,
                chunk,
                received: Vec::new(),
            }
        }
    }

    impl AsyncWrite for FlakyWriter {
        fn poll_write(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
            self.attempts += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                // Accept part of the frame before failing
                if self.chunk > 0 && self.attempts % 2 == 1 {
                    let n = self.chunk.min(buf.len());
                    self.received.extend_from_slice(&buf[..n]);
                    return Poll::Ready(Ok(n));
                }
                return Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()));
            }
            self.received.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Writer that never makes progress
    struct StuckWriter;

    impl AsyncWrite for StuckWriter {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<std::io::Result<usize>> {
            Poll::Pending
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Pending
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Pending
        }
    }

    fn frame() -> Bytes {
        Bytes::from((0..100u8).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn test_first_attempt_succeeds() {
        let mut writer = tokio_test::io::Builder::new().write(&frame()).build();
        let mut msg = PendingMessage::new(frame());
        assert_eq!(msg.state(), DeliveryState::Queued);

        let attempts = msg
            .deliver(&mut writer, &RetryPolicy::immediate(10), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(attempts, 1);
        assert_eq!(msg.state(), DeliveryState::Acknowledged);
        assert_eq!(msg.written(), msg.len());
    }

    #[tokio::test]
    async fn test_exhausted_on_eleventh_failure() {
        let mut writer = FlakyWriter::new(u32::MAX, 0);
        let mut msg = PendingMessage::new(frame());

        let result = msg
            .deliver(&mut writer, &RetryPolicy::immediate(10), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(TrackingError::DeliveryFailure { attempts: 11 })));
        assert_eq!(writer.attempts, 11);
        assert_eq!(msg.state(), DeliveryState::Failed { attempt: 11 });
    }

    #[tokio::test]
    async fn test_success_on_last_allowed_attempt() {
        let mut writer = FlakyWriter::new(10, 0);
        let mut msg = PendingMessage::new(frame());

        let attempts = msg
            .deliver(&mut writer, &RetryPolicy::immediate(10), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(attempts, 11);
        assert_eq!(msg.state(), DeliveryState::Acknowledged);
    }

    #[tokio::test]
    async fn test_retry_resumes_at_offset() {
        let mut writer = FlakyWriter::new(4, 7);
        let mut msg = PendingMessage::new(frame());

        msg.deliver(&mut writer, &RetryPolicy::immediate(10), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(writer.received, frame().to_vec());
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_attempt() {
        let mut msg = PendingMessage::new(frame());
        let result = msg
            .deliver(&mut StuckWriter, &RetryPolicy::immediate(2), Duration::from_millis(5))
            .await;
        assert!(matches!(result, Err(TrackingError::DeliveryFailure { attempts: 3 })));
    }

    #[tokio::test]
    async fn test_backoff_between_attempts() {
        let policy = RetryPolicy {
            max_retries: 2,
            retry_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(1),
        };
        let mut writer = FlakyWriter::new(2, 0);
        let mut msg = PendingMessage::new(frame());

        let started = std::time::Instant::now();
        msg.deliver(&mut writer, &policy, Duration::from_secs(1)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
