//! Listening and connecting
//!
//! [`TcpTransport`] turns accepted and dialed TCP streams into
//! [`TransportEvent::Opened`] events carrying a [`TcpLink`]. Everything a
//! link reports afterwards arrives on the same event channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use skein_core::{LinkHandle, LinkRole, TransportEvent};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::TcpConfig;
use crate::error::{TransportError, TransportResult};
use crate::link::spawn_link;

/// TCP implementation of the mesh transport contract
#[derive(Debug, Clone)]
pub struct TcpTransport {
    config: Arc<TcpConfig>,
    events: mpsc::Sender<TransportEvent>,
    next_handle: Arc<AtomicU64>,
    shutdown: broadcast::Sender<()>,
}

impl TcpTransport {
    /// Create a transport and the channel its events arrive on
    pub fn new(config: TcpConfig) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events, rx) = mpsc::channel(config.event_buffer);
        let (shutdown, _) = broadcast::channel(1);
        (
            Self {
                config: Arc::new(config),
                events,
                next_handle: Arc::new(AtomicU64::new(1)),
                shutdown,
            },
            rx,
        )
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    /// Accept links on `addr` until shutdown, returning the bound address
    pub async fn listen(&self, addr: SocketAddr) -> TransportResult<SocketAddr> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local = listener.local_addr()?;
        info!(%local, "Listening for mesh links");

        let transport = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!(%local, "Listener shutting down");
                        break;
                    }
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, remote)) => {
                                debug!(%remote, "Accepted mesh link");
                                if let Err(e) = transport.attach(stream, LinkRole::Acceptor).await {
                                    warn!(%remote, error = %e, "Failed to attach accepted link");
                                    if matches!(e, TransportError::Stopped) {
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                warn!(%local, error = %e, "Accept failed");
                            }
                        }
                    }
                }
            }
        });

        Ok(local)
    }

    /// Dial a peer and open a link to it
    pub async fn connect(&self, addr: SocketAddr) -> TransportResult<LinkHandle> {
        debug!(%addr, "Connecting to mesh peer");
        let stream = timeout(self.config.connect_timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout(addr))?
            .map_err(|source| TransportError::Connect { addr, source })?;
        info!(%addr, "Connected to mesh peer");
        self.attach(stream, LinkRole::Initiator).await
    }

    async fn attach(&self, stream: TcpStream, role: LinkRole) -> TransportResult<LinkHandle> {
        stream.set_nodelay(true)?;
        let handle = LinkHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let (read_half, write_half) = stream.into_split();

        let link = spawn_link(
            handle,
            read_half,
            write_half,
            &self.config,
            self.events.clone(),
            &self.shutdown,
        );
        self.events
            .send(TransportEvent::Opened {
                handle,
                role,
                link: Box::new(link),
            })
            .await
            .map_err(|_| TransportError::Stopped)?;
        Ok(handle)
    }

    /// Stop listeners and every link task
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}
