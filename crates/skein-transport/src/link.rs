//! One TCP link
//!
//! The mesh writes synchronously, so [`TcpLink`] only hands frames to a
//! writer task and keeps count of the bytes still in flight. That count is
//! the link's send buffer: once it is full, writes report backpressure
//! until the writer task catches up and emits `Sent`.
//!
//! Three tasks serve each link:
//!
//! - writer: appends the newline and writes frames in order
//! - reader: splits the stream on newlines into `Received` events
//! - poller: emits `Poll` so a stalled queue is retried

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::{BufMut, Bytes, BytesMut};
use skein_core::{LinkError, LinkFault, LinkHandle, LinkTransport, TransportEvent};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace, warn};

use crate::config::TcpConfig;

/// Frame delimiter on the wire
pub const FRAME_DELIMITER: u8 = b'\n';

/// Map an I/O failure to the fault reported to the mesh
pub fn classify(err: &io::Error) -> LinkFault {
    match err.kind() {
        io::ErrorKind::ConnectionReset => LinkFault::Reset,
        io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe => LinkFault::Aborted,
        _ => LinkFault::Other(err.to_string()),
    }
}

/// Mesh-facing end of a TCP link
#[derive(Debug)]
pub struct TcpLink {
    handle: LinkHandle,
    frames: mpsc::UnboundedSender<Bytes>,
    inflight: Arc<AtomicUsize>,
    send_buffer: usize,
    closed: Arc<AtomicBool>,
    shutdown: broadcast::Sender<()>,
}

impl TcpLink {
    pub fn handle(&self) -> LinkHandle {
        self.handle
    }
}

impl LinkTransport for TcpLink {
    fn send_capacity(&self) -> usize {
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }
        self.send_buffer
            .saturating_sub(self.inflight.load(Ordering::Acquire))
            .saturating_sub(1)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), LinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LinkError::Closed);
        }
        if data.len() > self.send_capacity() {
            return Err(LinkError::WouldBlock);
        }

        let mut frame = BytesMut::with_capacity(data.len() + 1);
        frame.put_slice(data);
        frame.put_u8(FRAME_DELIMITER);
        let frame = frame.freeze();

        self.inflight.fetch_add(frame.len(), Ordering::AcqRel);
        if self.frames.send(frame).is_err() {
            self.closed.store(true, Ordering::Release);
            return Err(LinkError::Closed);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), LinkError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(handle = %self.handle, "Closing TCP link");
        let _ = self.shutdown.send(());
        Ok(())
    }
}

/// Wire up the tasks for a connected stream and return its link
pub(crate) fn spawn_link(
    handle: LinkHandle,
    read_half: OwnedReadHalf,
    write_half: OwnedWriteHalf,
    config: &TcpConfig,
    events: mpsc::Sender<TransportEvent>,
    transport_shutdown: &broadcast::Sender<()>,
) -> TcpLink {
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let (shutdown, _) = broadcast::channel(1);
    let inflight = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicBool::new(false));

    tokio::spawn(write_loop(
        handle,
        write_half,
        frames_rx,
        Arc::clone(&inflight),
        events.clone(),
        shutdown.subscribe(),
        transport_shutdown.subscribe(),
    ));
    tokio::spawn(read_loop(
        handle,
        read_half,
        config.max_frame,
        events.clone(),
        shutdown.subscribe(),
        transport_shutdown.subscribe(),
    ));
    tokio::spawn(poll_loop(
        handle,
        config.poll_interval(),
        events,
        shutdown.subscribe(),
        transport_shutdown.subscribe(),
    ));

    TcpLink {
        handle,
        frames: frames_tx,
        inflight,
        send_buffer: config.send_buffer,
        closed,
        shutdown,
    }
}

/// Resolves when the transport is shut down
///
/// Dropping every transport handle without calling `shutdown` leaves
/// existing links running, so a closed channel never resolves.
async fn transport_stopped(rx: &mut broadcast::Receiver<()>) {
    match rx.recv().await {
        Ok(()) | Err(RecvError::Lagged(_)) => {}
        Err(RecvError::Closed) => std::future::pending().await,
    }
}

async fn write_loop(
    handle: LinkHandle,
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<Bytes>,
    inflight: Arc<AtomicUsize>,
    events: mpsc::Sender<TransportEvent>,
    mut shutdown: broadcast::Receiver<()>,
    mut transport_shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = transport_stopped(&mut transport_shutdown) => break,
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    break;
                };
                let len = frame.len();
                let result = writer.write_all(&frame).await;
                inflight.fetch_sub(len, Ordering::AcqRel);

                match result {
                    Ok(()) => {
                        trace!(%handle, len, "Frame written");
                        if events.send(TransportEvent::Sent { handle }).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(%handle, error = %e, "TCP write failed");
                        let fault = classify(&e);
                        let _ = events.send(TransportEvent::Fault { handle, fault }).await;
                        break;
                    }
                }
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!(%handle, error = %e, "TCP shutdown failed");
    }
}

async fn read_loop(
    handle: LinkHandle,
    read_half: OwnedReadHalf,
    max_frame: usize,
    events: mpsc::Sender<TransportEvent>,
    mut shutdown: broadcast::Receiver<()>,
    mut transport_shutdown: broadcast::Receiver<()>,
) {
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::with_capacity(1024);
    let limit = max_frame as u64 + 1;

    loop {
        buf.clear();
        let mut frame_reader = (&mut reader).take(limit);
        let read = tokio::select! {
            _ = shutdown.recv() => return,
            _ = transport_stopped(&mut transport_shutdown) => return,
            read = frame_reader.read_until(FRAME_DELIMITER, &mut buf) => read,
        };

        let event = match read {
            Ok(0) => {
                debug!(%handle, "Peer closed TCP link");
                let _ = events
                    .send(TransportEvent::Received {
                        handle,
                        fragments: Vec::new(),
                    })
                    .await;
                return;
            }
            Ok(_) if buf.last() != Some(&FRAME_DELIMITER) && buf.len() > max_frame => {
                warn!(%handle, max_frame, "Inbound frame too large, dropping link");
                let _ = events
                    .send(TransportEvent::Fault {
                        handle,
                        fault: LinkFault::Aborted,
                    })
                    .await;
                return;
            }
            Ok(_) => {
                if buf.last() == Some(&FRAME_DELIMITER) {
                    buf.pop();
                }
                if buf.is_empty() {
                    continue;
                }
                TransportEvent::Received {
                    handle,
                    fragments: vec![Bytes::copy_from_slice(&buf)],
                }
            }
            Err(e) => {
                warn!(%handle, error = %e, "TCP read failed");
                let fault = classify(&e);
                let _ = events.send(TransportEvent::Fault { handle, fault }).await;
                return;
            }
        };

        if events.send(event).await.is_err() {
            return;
        }
    }
}

async fn poll_loop(
    handle: LinkHandle,
    interval: std::time::Duration,
    events: mpsc::Sender<TransportEvent>,
    mut shutdown: broadcast::Receiver<()>,
    mut transport_shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = transport_stopped(&mut transport_shutdown) => return,
            _ = ticker.tick() => {
                if events.send(TransportEvent::Poll { handle }).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert_eq!(classify(&reset), LinkFault::Reset);
        let pipe = io::Error::from(io::ErrorKind::BrokenPipe);
        assert_eq!(classify(&pipe), LinkFault::Aborted);
        let other = io::Error::other("odd");
        assert!(matches!(classify(&other), LinkFault::Other(_)));
    }
}
