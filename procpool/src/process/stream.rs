//! Fan-out output streams.
//!
//! Each of a process's output pipes is drained by one pump task from the
//! moment the process is spawned, so a process never stalls on output
//! nobody reads. Every decoded chunk is handed to each attached
//! [`OutputStream`] through that consumer's own unbounded queue: a slow
//! consumer holds back nobody and misses nothing.
//!
//! Chunks read while no consumer is attached go to a bounded backlog. The
//! backlog is replayed to every consumer that attaches before the next
//! chunk is delivered live, then forgotten.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{ready, Context, Poll};

use futures::Stream;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{PoolError, Result};

/// Bytes requested from the pipe per read.
const READ_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone)]
enum OutputEvent {
    Chunk(Arc<str>),
    Failed { kind: io::ErrorKind, message: Arc<str> },
}

#[derive(Debug, Default)]
struct Consumers {
    queues: Vec<mpsc::UnboundedSender<OutputEvent>>,
    backlog: VecDeque<Arc<str>>,
    ended: bool,
}

/// One output pipe shared by all of its consumers.
#[derive(Debug)]
pub(crate) struct OutputChannel {
    name: &'static str,
    backlog_capacity: usize,
    consumers: Mutex<Consumers>,
}

impl OutputChannel {
    pub(crate) fn new(name: &'static str, backlog_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            name,
            backlog_capacity,
            consumers: Mutex::new(Consumers::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Consumers> {
        self.consumers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a new consumer.
    ///
    /// It first receives the backlog, then everything read from now on. A
    /// consumer attached after the pipe closed sees only the backlog.
    pub(crate) fn subscribe(&self) -> OutputStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut consumers = self.lock();

        for chunk in &consumers.backlog {
            // `rx` is alive, so this cannot fail.
            let _ = tx.send(OutputEvent::Chunk(chunk.clone()));
        }
        if !consumers.ended {
            consumers.queues.push(tx);
        }

        OutputStream {
            channel: self.name,
            inner: Some(UnboundedReceiverStream::new(rx)),
        }
    }

    fn publish(&self, chunk: Arc<str>) {
        let mut consumers = self.lock();

        // A failed send means that consumer was dropped.
        consumers
            .queues
            .retain(|tx| tx.send(OutputEvent::Chunk(chunk.clone())).is_ok());

        if consumers.queues.is_empty() {
            if self.backlog_capacity == 0 {
                return;
            }
            if consumers.backlog.len() == self.backlog_capacity {
                consumers.backlog.pop_front();
            }
            consumers.backlog.push_back(chunk);
        } else {
            consumers.backlog.clear();
        }
    }

    fn fail(&self, error: &io::Error) {
        let event = OutputEvent::Failed {
            kind: error.kind(),
            message: Arc::from(error.to_string()),
        };
        for tx in &self.lock().queues {
            let _ = tx.send(event.clone());
        }
    }

    /// Drop every queue so attached streams end.
    fn finish(&self) {
        let mut consumers = self.lock();
        consumers.ended = true;
        consumers.queues.clear();
    }

    #[cfg(test)]
    fn attached(&self) -> usize {
        let mut consumers = self.lock();
        consumers.queues.retain(|tx| !tx.is_closed());
        consumers.queues.len()
    }
}

/// Spawn the task that drains `reader` into `channel`.
///
/// The task stops at end-of-stream, on a read error, or when `cancel` fires.
pub(crate) fn start_pump<R>(
    channel: Arc<OutputChannel>,
    reader: Option<R>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(reader) = reader else {
        channel.finish();
        return;
    };

    tokio::spawn(async move {
        tokio::select! {
            () = pump(&channel, reader) => {}
            () = cancel.cancelled() => {
                debug!(channel = channel.name, "Output pump cancelled");
            }
        }
        channel.finish();
    });
}

async fn pump<R: AsyncRead + Unpin>(channel: &OutputChannel, mut reader: R) {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!(channel = channel.name, "Output reached end of stream");
                return;
            }
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]);
                channel.publish(Arc::from(text.as_ref()));
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                debug!(channel = channel.name, error = %e, "Output read failed");
                channel.fail(&e);
                return;
            }
        }
    }
}

/// A consumer's view of one output pipe.
///
/// Yields text chunks as they are read, ends at end-of-stream and ends
/// after yielding one error if the pipe fails. Dropping the stream
/// detaches it from the pipe.
#[derive(Debug)]
pub struct OutputStream {
    channel: &'static str,
    inner: Option<UnboundedReceiverStream<OutputEvent>>,
}

impl OutputStream {
    /// Which pipe this stream reads (`"stdout"` or `"stderr"`).
    pub const fn channel(&self) -> &'static str {
        self.channel
    }

    /// Collect every remaining chunk into one string.
    pub async fn read_to_string(mut self) -> Result<String> {
        use futures::StreamExt;

        let mut out = String::new();
        while let Some(chunk) = self.next().await {
            out.push_str(&chunk?);
        }
        Ok(out)
    }
}

impl Stream for OutputStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(inner) = self.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match ready!(Pin::new(inner).poll_next(cx)) {
            Some(OutputEvent::Chunk(text)) => Poll::Ready(Some(Ok(text.to_string()))),
            Some(OutputEvent::Failed { kind, message }) => {
                self.inner = None;
                Poll::Ready(Some(Err(PoolError::Stream {
                    source: io::Error::new(kind, message.to_string()),
                })))
            }
            None => {
                self.inner = None;
                Poll::Ready(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe gone")))
        }
    }

    async fn until_ended(channel: &OutputChannel) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !channel.lock().ended {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn unread_pipe_is_drained() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let channel = OutputChannel::new("stdout", 4);
        start_pump(channel.clone(), Some(reader), CancellationToken::new());

        // Far more than the duplex buffer; only completes if the pump reads.
        let payload = vec![b'x'; 64 * 1024];
        tokio::time::timeout(Duration::from_secs(5), writer.write_all(&payload))
            .await
            .unwrap()
            .unwrap();
        drop(writer);
        until_ended(&channel).await;

        assert!(channel.lock().backlog.len() <= 4);
    }

    #[tokio::test]
    async fn backlog_replays_to_early_consumers() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let channel = OutputChannel::new("stdout", 16);
        start_pump(channel.clone(), Some(reader), CancellationToken::new());

        writer.write_all(b"early").await.unwrap();
        drop(writer);
        until_ended(&channel).await;

        let first = channel.subscribe();
        let second = channel.subscribe();
        assert_eq!(first.read_to_string().await.unwrap(), "early");
        assert_eq!(second.read_to_string().await.unwrap(), "early");
    }

    #[test]
    fn backlog_forgets_oldest_chunks() {
        let channel = OutputChannel::new("stdout", 2);
        for chunk in ["a", "b", "c"] {
            channel.publish(Arc::from(chunk));
        }
        channel.finish();

        let text = futures::executor::block_on(channel.subscribe().read_to_string()).unwrap();
        assert_eq!(text, "bc");
    }

    #[test]
    fn zero_backlog_forgets_everything() {
        let channel = OutputChannel::new("stdout", 0);
        channel.publish(Arc::from("lost"));
        channel.finish();

        let text = futures::executor::block_on(channel.subscribe().read_to_string()).unwrap();
        assert_eq!(text, "");
    }

    #[test]
    fn late_consumer_starts_at_attach_point() {
        let channel = OutputChannel::new("stdout", 8);
        let early = channel.subscribe();
        channel.publish(Arc::from("one "));
        let late = channel.subscribe();
        channel.publish(Arc::from("two"));
        channel.finish();

        let (early, late) = futures::executor::block_on(async {
            (early.read_to_string().await, late.read_to_string().await)
        });
        assert_eq!(early.unwrap(), "one two");
        assert_eq!(late.unwrap(), "two");
    }

    #[tokio::test]
    async fn every_consumer_sees_full_output() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let channel = OutputChannel::new("stdout", 0);
        let first = channel.subscribe();
        let second = channel.subscribe();
        start_pump(channel.clone(), Some(reader), CancellationToken::new());

        tokio::spawn(async move {
            for i in 1..=20 {
                writer.write_all(format!("{i}\n").as_bytes()).await.unwrap();
            }
        });

        let (a, b) = tokio::join!(first.read_to_string(), second.read_to_string());
        let expected: String = (1..=20).map(|i| format!("{i}\n")).collect();
        assert_eq!(a.unwrap(), expected);
        assert_eq!(b.unwrap(), expected);
    }

    #[tokio::test]
    async fn slow_consumer_misses_nothing() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let channel = OutputChannel::new("stdout", 1);
        let fast = channel.subscribe();
        let mut slow = channel.subscribe();
        start_pump(channel.clone(), Some(reader), CancellationToken::new());

        let expected: String = (1..=500).map(|i| format!("{i}\n")).collect();
        let payload = expected.clone();
        tokio::spawn(async move {
            for line in payload.split_inclusive('\n') {
                writer.write_all(line.as_bytes()).await.unwrap();
            }
        });

        // The fast consumer finishes before the slow one reads anything.
        assert_eq!(fast.read_to_string().await.unwrap(), expected);

        let mut seen = String::new();
        while let Some(chunk) = slow.next().await {
            seen.push_str(&chunk.unwrap());
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn read_error_ends_stream_with_error() {
        let channel = OutputChannel::new("stderr", 4);
        let mut stream = channel.subscribe();
        start_pump(channel.clone(), Some(FailingReader), CancellationToken::new());

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, PoolError::Stream { ref source } if source.kind() == io::ErrorKind::BrokenPipe));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn subscribing_after_empty_close_yields_nothing() {
        let (writer, reader) = tokio::io::duplex(8);
        drop(writer);
        let channel = OutputChannel::new("stdout", 4);
        start_pump(channel.clone(), Some(reader), CancellationToken::new());
        until_ended(&channel).await;

        assert_eq!(channel.subscribe().read_to_string().await.unwrap(), "");
        assert!(channel.subscribe().next().await.is_none());
    }

    #[tokio::test]
    async fn cancel_stops_pump() {
        let (_writer, reader) = tokio::io::duplex(8);
        let channel = OutputChannel::new("stdout", 4);
        let cancel = CancellationToken::new();
        let mut stream = channel.subscribe();
        start_pump(channel.clone(), Some(reader), cancel.clone());

        cancel.cancel();
        until_ended(&channel).await;
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn dropped_consumer_detaches() {
        let (_writer, reader) = tokio::io::duplex(8);
        let channel = OutputChannel::new("stdout", 4);
        start_pump(channel.clone(), Some(reader), CancellationToken::new());

        let stream = channel.subscribe();
        assert_eq!(channel.attached(), 1);
        drop(stream);
        assert_eq!(channel.attached(), 0);
    }
}
