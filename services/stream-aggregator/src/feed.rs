//! Feed connection
//!
//! Connects to the feed source over TCP and forwards `\n`-terminated lines
//! into the pipeline channel. The channel is bounded, so a slow trigger
//! loop pushes back on the socket rather than buffering without limit.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::FeedError;
use crate::metrics::PipelineMetrics;

/// Longest feed line accepted, excluding the terminator. Longer lines are
/// skipped up to the next `\n` and counted as rejected.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// How the line pump ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Peer closed the connection.
    Closed { lines: u64 },
    /// Read failed mid-stream.
    Failed { lines: u64, error: String },
    /// The pipeline stopped receiving.
    Abandoned { lines: u64 },
}

/// Client side of the point-to-point feed connection.
pub struct FeedClient {
    addr: String,
    stream: TcpStream,
}

impl FeedClient {
    /// Connect to the feed source. Failure is fatal for the service.
    pub async fn connect(addr: &str) -> Result<Self, FeedError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| FeedError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        info!(addr, "Connected to feed source");
        Ok(Self {
            addr: addr.to_string(),
            stream,
        })
    }

    /// Forward lines until the connection ends.
    pub async fn pump(
        self,
        sender: mpsc::Sender<String>,
        metrics: Arc<PipelineMetrics>,
    ) -> FeedOutcome {
        let outcome = pump_lines(self.stream, sender, metrics).await;
        match &outcome {
            FeedOutcome::Closed { lines } => {
                info!(addr = %self.addr, lines, "Feed source closed the connection");
            }
            FeedOutcome::Failed { lines, error } => {
                warn!(addr = %self.addr, lines, error = %error, "Feed connection lost");
            }
            FeedOutcome::Abandoned { lines } => {
                debug!(addr = %self.addr, lines, "Pipeline stopped receiving feed lines");
            }
        }
        outcome
    }
}

/// Read `\n`-terminated lines from `reader` into `sender`.
///
/// Bytes are decoded lossily; a mangled line simply fails validation
/// downstream. A trailing line without a terminator is still forwarded.
/// Lines over `MAX_LINE_BYTES` are dropped without being buffered whole.
pub async fn pump_lines<R: AsyncRead + Unpin>(
    reader: R,
    sender: mpsc::Sender<String>,
    metrics: Arc<PipelineMetrics>,
) -> FeedOutcome {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut lines = 0u64;
    // room for a full line plus its terminator
    let limit = MAX_LINE_BYTES as u64 + 1;

    loop {
        buf.clear();
        let read = (&mut reader).take(limit).read_until(b'\n', &mut buf).await;
        match read {
            Ok(0) => return FeedOutcome::Closed { lines },
            Ok(n) if n > MAX_LINE_BYTES && buf.last() != Some(&b'\n') => {
                lines += 1;
                metrics.record_line_received();
                metrics.record_oversized_line();
                debug!(prefix_bytes = n, "Discarding oversized feed line");
                if let Err(e) = skip_line(&mut reader).await {
                    return FeedOutcome::Failed {
                        lines,
                        error: e.to_string(),
                    };
                }
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                lines += 1;
                metrics.record_line_received();
                if sender.send(line).await.is_err() {
                    return FeedOutcome::Abandoned { lines };
                }
            }
            Err(e) => {
                return FeedOutcome::Failed {
                    lines,
                    error: e.to_string(),
                }
            }
        }
    }
}

/// Consume input up to and including the next `\n`, or to end of stream.
async fn skip_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<()> {
    loop {
        let (consumed, found) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            }
        };
        reader.consume(consumed);
        if found {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_pump_lines_forwards_each_line() {
        let input: &[u8] = b"1;10,00;15/03/2024;10:30;A;PIX\r\n2;5,00;15/03/2024;11:00;B;TED\nlast-no-newline";
        let (tx, mut rx) = mpsc::channel(16);
        let metrics = Arc::new(PipelineMetrics::new());

        let outcome = pump_lines(input, tx, metrics.clone()).await;
        assert_eq!(outcome, FeedOutcome::Closed { lines: 3 });
        assert_eq!(metrics.lines_received.load(Ordering::Relaxed), 3);

        assert_eq!(rx.recv().await.unwrap(), "1;10,00;15/03/2024;10:30;A;PIX");
        assert_eq!(rx.recv().await.unwrap(), "2;5,00;15/03/2024;11:00;B;TED");
        assert_eq!(rx.recv().await.unwrap(), "last-no-newline");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_pump_lines_drops_oversized_line() {
        let mut input = vec![b'x'; MAX_LINE_BYTES * 3];
        input.extend_from_slice(b"\n1;10,00;15/03/2024;10:30;A;PIX\n");
        let exact = vec![b'y'; MAX_LINE_BYTES];
        input.extend_from_slice(&exact);
        input.push(b'\n');
        input.extend(vec![b'z'; MAX_LINE_BYTES + 1]);

        let (tx, mut rx) = mpsc::channel(16);
        let metrics = Arc::new(PipelineMetrics::new());
        let outcome = pump_lines(input.as_slice(), tx, metrics.clone()).await;

        assert_eq!(outcome, FeedOutcome::Closed { lines: 4 });
        assert_eq!(rx.recv().await.unwrap(), "1;10,00;15/03/2024;10:30;A;PIX");
        assert_eq!(rx.recv().await.unwrap().len(), MAX_LINE_BYTES);
        assert!(rx.recv().await.is_none());

        let exported = metrics.export();
        assert_eq!(exported["lines_received"], 4);
        assert_eq!(exported["records_rejected.line_too_long"], 2);
    }

    #[tokio::test]
    async fn test_pump_lines_stops_when_receiver_dropped() {
        let input: &[u8] = b"a\nb\nc\n";
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let outcome = pump_lines(input, tx, Arc::new(PipelineMetrics::new())).await;
        assert_eq!(outcome, FeedOutcome::Abandoned { lines: 1 });
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_error() {
        // bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = FeedClient::connect(&addr).await.err().unwrap();
        let FeedError::Connect { addr: reported, .. } = err;
        assert_eq!(reported, addr);
    }

    #[tokio::test]
    async fn test_client_reads_from_tcp_feed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"1;1234,56;15/03/2024;10:30;BankA;PIX\n")
                .await
                .unwrap();
            // dropping the socket closes the feed
        });

        let client = FeedClient::connect(&addr).await.unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let outcome = client.pump(tx, Arc::new(PipelineMetrics::new())).await;
        server.await.unwrap();

        assert_eq!(outcome, FeedOutcome::Closed { lines: 1 });
        assert_eq!(
            rx.recv().await.unwrap(),
            "1;1234,56;15/03/2024;10:30;BankA;PIX"
        );
    }
}
