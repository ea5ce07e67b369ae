//! Dedicated writer task for a channel's outbound frames.
//!
//! Callers, handler tasks and the dispatch loop all hand fully encoded
//! frames to one task via an mpsc channel. That task is the only code
//! touching the socket's write half, so frames go out whole and in the
//! order they were queued, and the bounded channel passes socket
//! backpressure back to senders.
//!
//! # Architecture
//!
//! ```text
//! call()      ─┐
//! Handler 1   ─┼─► mpsc::Sender<Bytes> ─► Writer Task ─► socket
//! Handler N   ─┘
//! ```

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, RpcError};
use crate::shutdown::Shutdown;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default maximum frames written in a single vectored write.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 64;

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Frames that may be queued before senders wait.
    pub channel_capacity: usize,
    /// Maximum frames per vectored write.
    pub max_batch_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

/// Handle for queueing frames on the writer task.
///
/// This is cheaply cloneable and can be shared across handler tasks.
#[derive(Clone)]
pub struct WriterHandle {
    /// Channel sender for frames.
    tx: mpsc::Sender<Bytes>,
    /// Frames queued but not yet written.
    pending: Arc<AtomicUsize>,
}

impl WriterHandle {
    /// Queue one encoded frame.
    ///
    /// Waits while the queue is full. Fails with
    /// [`RpcError::ChannelClosed`] once the writer task has stopped.
    ///
    /// Cancel safe: a frame is either queued whole or not at all.
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        let permit = self
            .tx
            .reserve()
            .await
            .map_err(|_| RpcError::ChannelClosed)?;

        self.pending.fetch_add(1, Ordering::AcqRel);
        permit.send(frame);
        Ok(())
    }

    /// Frames queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task stops when every handle is dropped or `shutdown` triggers,
/// and shuts down the write half on the way out. A write error triggers
/// `shutdown` so the rest of the channel notices.
pub(crate) fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
    shutdown: Shutdown,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
    };

    let task = tokio::spawn(async move {
        let result = writer_loop(rx, writer, pending, config.max_batch_size.max(1), &shutdown).await;
        if let Err(e) = &result {
            tracing::error!("Writer task error: {}", e);
        }
        shutdown.trigger();
        result
    });

    (handle, task)
}

/// Main writer loop - receives frames and writes them in batches.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<Bytes>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
    max_batch_size: usize,
    shutdown: &Shutdown,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(max_batch_size);

    loop {
        let first = tokio::select! {
            frame = rx.recv() => frame,
            _ = shutdown.wait() => None,
        };

        let Some(first) = first else {
            // Closing: stop accepting, flush what is already queued
            rx.close();
            while let Ok(frame) = rx.try_recv() {
                batch.push(frame);
            }
            let flushed = batch.len();
            write_batch(&mut writer, &batch).await?;
            pending.fetch_sub(flushed, Ordering::Release);
            let _ = writer.shutdown().await;
            return Ok(());
        };

        // Collect additional ready frames (non-blocking)
        batch.push(first);
        while batch.len() < max_batch_size {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        write_batch(&mut writer, &batch).await?;
        pending.fetch_sub(batch_size, Ordering::Release);
        batch.clear();
    }
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(Bytes::len).sum();
    if total_size == 0 {
        return Ok(());
    }

    let mut total_written = 0;
    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data not yet written.
fn build_remaining_slices(batch: &[Bytes], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for frame in batch {
        let end = offset + frame.len();
        if skip_bytes < end && !frame.is_empty() {
            let start_in_frame = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame[start_in_frame..]));
        }
        offset = end;
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.max_batch_size, DEFAULT_MAX_BATCH_SIZE);
    }

    #[tokio::test]
    async fn test_writer_handle_send() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default(), Shutdown::new());

        handle
            .send(Bytes::from_static(b"\x00\x00\x00\x05hello"))
            .await
            .unwrap();

        let mut buf = [0u8; 9];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"\x00\x00\x00\x05hello");
    }

    #[tokio::test]
    async fn test_frames_keep_queue_order() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default(), Shutdown::new());

        for i in 0..10u8 {
            handle.send(Bytes::from(vec![i; 3])).await.unwrap();
        }

        let mut buf = [0u8; 30];
        server.read_exact(&mut buf).await.unwrap();
        for (i, chunk) in buf.chunks(3).enumerate() {
            assert_eq!(chunk, &[i as u8; 3]);
        }
    }

    #[tokio::test]
    async fn test_pending_count_drains() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default(), Shutdown::new());

        handle.send(Bytes::from_static(b"abc")).await.unwrap();
        let mut buf = [0u8; 3];
        server.read_exact(&mut buf).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while handle.pending_count() != 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_send_queues_nothing() {
        let (client, mut server) = duplex(8);
        let config = WriterConfig {
            channel_capacity: 1,
            ..WriterConfig::default()
        };
        let (handle, _task) = spawn_writer_task(client, config, Shutdown::new());

        // First frame is taken by the task and stalls on the full pipe
        handle.send(Bytes::from(vec![1u8; 12])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        // Second frame fills the queue
        handle.send(Bytes::from(vec![2u8; 4])).await.unwrap();

        let stalled = tokio::time::timeout(
            Duration::from_millis(50),
            handle.send(Bytes::from(vec![3u8; 4])),
        )
        .await;
        assert!(stalled.is_err());
        assert_eq!(handle.pending_count(), 2);

        let mut buf = [0u8; 16];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..12], &[1u8; 12]);
        assert_eq!(&buf[12..], &[2u8; 4]);

        while handle.pending_count() != 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_shutdown_flushes_and_closes() {
        let (client, mut server) = duplex(4096);
        let shutdown = Shutdown::new();
        let (handle, task) = spawn_writer_task(client, WriterConfig::default(), shutdown.clone());

        handle.send(Bytes::from_static(b"last")).await.unwrap();
        shutdown.trigger();
        task.await.unwrap().unwrap();

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"last");

        assert!(matches!(
            handle.send(Bytes::from_static(b"late")).await,
            Err(RpcError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_writer_stops_when_handles_dropped() {
        let (client, _server) = duplex(4096);
        let shutdown = Shutdown::new();
        let (handle, task) = spawn_writer_task(client, WriterConfig::default(), shutdown.clone());

        drop(handle);

        assert!(task.await.unwrap().is_ok());
        assert!(shutdown.is_triggered());
    }

    #[test]
    fn test_build_remaining_slices() {
        let batch = vec![Bytes::from_static(b"abcd"), Bytes::from_static(b"efgh")];

        assert_eq!(build_remaining_slices(&batch, 0).len(), 2);

        let slices = build_remaining_slices(&batch, 2);
        assert_eq!(slices.len(), 2);
        assert_eq!(&*slices[0], b"cd");

        let slices = build_remaining_slices(&batch, 5);
        assert_eq!(slices.len(), 1);
        assert_eq!(&*slices[0], b"fgh");
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<Bytes> = (0..5).map(|_| Bytes::from_static(b"abc")).collect();

        write_batch(&mut buf, &batch).await.unwrap();

        assert_eq!(buf.into_inner(), b"abcabcabcabcabc".to_vec());
    }
}
