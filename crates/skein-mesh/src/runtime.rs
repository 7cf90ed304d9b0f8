//! Tokio reactor around a [`MeshNode`]
//!
//! One task owns the node and multiplexes three sources in a `select!`
//! loop: transport events, application commands sent through a
//! [`MeshHandle`], and a periodic tick that runs due timers. The node
//! itself never sees concurrency.

use std::time::Instant;

use skein_core::{NodeId, SendError, TransportEvent};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::node::MeshNode;

/// Buffered commands per runtime
const COMMAND_BUFFER: usize = 64;

/// Errors returned through a [`MeshHandle`]
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Mesh runtime stopped")]
    Stopped,

    #[error(transparent)]
    Send(#[from] SendError),
}

#[derive(Debug)]
enum MeshCommand {
    SendSingle {
        dest: NodeId,
        msg: String,
        reply: oneshot::Sender<Result<(), SendError>>,
    },
    Broadcast {
        msg: String,
        reply: oneshot::Sender<Result<usize, SendError>>,
    },
    NodeList {
        reply: oneshot::Sender<Vec<NodeId>>,
    },
    Stability {
        reply: oneshot::Sender<u32>,
    },
    Shutdown,
}

/// Cloneable handle for talking to a running node
#[derive(Debug, Clone)]
pub struct MeshHandle {
    local_id: NodeId,
    commands: mpsc::Sender<MeshCommand>,
}

impl MeshHandle {
    /// Id of the node behind this handle
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> MeshCommand,
    ) -> Result<T, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| RuntimeError::Stopped)?;
        rx.await.map_err(|_| RuntimeError::Stopped)
    }

    /// Send a message to one node
    pub async fn send_single(&self, dest: NodeId, msg: impl Into<String>) -> Result<(), RuntimeError> {
        let msg = msg.into();
        self.request(|reply| MeshCommand::SendSingle { dest, msg, reply })
            .await??;
        Ok(())
    }

    /// Send a message to every node, returning the number of neighbors
    /// it was queued for
    pub async fn broadcast(&self, msg: impl Into<String>) -> Result<usize, RuntimeError> {
        let msg = msg.into();
        Ok(self
            .request(|reply| MeshCommand::Broadcast { msg, reply })
            .await??)
    }

    /// Every node currently reachable
    pub async fn node_list(&self) -> Result<Vec<NodeId>, RuntimeError> {
        self.request(|reply| MeshCommand::NodeList { reply }).await
    }

    /// Current stability score
    pub async fn stability(&self) -> Result<u32, RuntimeError> {
        self.request(|reply| MeshCommand::Stability { reply }).await
    }

    /// Ask the runtime to stop after the current pass
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.commands
            .send(MeshCommand::Shutdown)
            .await
            .map_err(|_| RuntimeError::Stopped)
    }
}

/// Event loop owning one node
pub struct MeshRuntime {
    node: MeshNode,
    events: mpsc::Receiver<TransportEvent>,
    commands: mpsc::Receiver<MeshCommand>,
}

impl MeshRuntime {
    /// Wrap a node fed by a transport's event channel
    pub fn new(node: MeshNode, events: mpsc::Receiver<TransportEvent>) -> (Self, MeshHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = MeshHandle {
            local_id: node.local_id(),
            commands: tx,
        };
        (
            Self {
                node,
                events,
                commands: rx,
            },
            handle,
        )
    }

    /// Run on a new task; the task yields the node back when it stops
    pub fn spawn(
        node: MeshNode,
        events: mpsc::Receiver<TransportEvent>,
    ) -> (MeshHandle, JoinHandle<MeshNode>) {
        let (runtime, handle) = Self::new(node, events);
        (handle, tokio::spawn(runtime.run()))
    }

    /// Run until shutdown is requested or the transport goes away
    pub async fn run(mut self) -> MeshNode {
        let mut ticker = tokio::time::interval(self.node.config().tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut commands_open = true;

        info!(node = %self.node.local_id(), "Mesh runtime started");

        // Events first, so a command sees every event delivered before it
        loop {
            tokio::select! {
                biased;

                event = self.events.recv() => {
                    match event {
                        Some(event) => {
                            let outcome = self.node.handle_event(event, now());
                            debug!(?outcome, "Transport event handled");
                        }
                        None => {
                            info!(node = %self.node.local_id(), "Transport gone, stopping mesh runtime");
                            break;
                        }
                    }
                }
                command = self.commands.recv(), if commands_open => {
                    match command {
                        Some(MeshCommand::Shutdown) => {
                            info!(node = %self.node.local_id(), "Mesh runtime shutting down");
                            break;
                        }
                        Some(command) => self.handle_command(command),
                        None => {
                            debug!("All mesh handles dropped");
                            commands_open = false;
                        }
                    }
                }
                _ = ticker.tick() => self.node.tick(now()),
            }
        }

        self.node
    }

    fn handle_command(&mut self, command: MeshCommand) {
        // A dropped reply receiver only means the caller stopped waiting
        match command {
            MeshCommand::SendSingle { dest, msg, reply } => {
                let _ = reply.send(self.node.send_single(dest, msg));
            }
            MeshCommand::Broadcast { msg, reply } => {
                let _ = reply.send(self.node.send_broadcast(msg));
            }
            MeshCommand::NodeList { reply } => {
                let _ = reply.send(self.node.node_list());
            }
            MeshCommand::Stability { reply } => {
                let _ = reply.send(self.node.stability());
            }
            MeshCommand::Shutdown => {}
        }
    }
}

/// Reactor clock; follows tokio's clock so paused-time tests work
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}
