//! Transport contract
//!
//! The routing core never talks to sockets directly. A transport
//! implementation hands it:
//!
//! - a [`LinkTransport`] per physical link, owned by exactly one connection,
//! - a stream of [`TransportEvent`]s tagged with the link's [`LinkHandle`].
//!
//! ## Implementations
//!
//! - [`MockLink`](crate::MockLink): In-memory link for testing (in this crate)
//! - `TcpTransport`: tokio TCP links (in the skein-transport crate)

use std::fmt::{self, Display};

use bytes::Bytes;

use crate::error::LinkError;

/// Opaque identity of one transport link
///
/// Handles are allocated by the transport and never reused while the link
/// is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkHandle(pub u64);

impl Display for LinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Which side opened the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkRole {
    /// We opened the link (station side)
    Initiator,
    /// The peer opened the link (access-point side)
    Acceptor,
}

impl Display for LinkRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkRole::Initiator => write!(f, "initiator"),
            LinkRole::Acceptor => write!(f, "acceptor"),
        }
    }
}

/// Abrupt failures reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkFault {
    /// Peer reset the link
    Reset,
    /// Link was aborted locally or by the stack
    Aborted,
    /// Any other error; informational only
    Other(String),
}

impl LinkFault {
    /// Whether the link is gone and the connection must close
    pub fn is_fatal(&self) -> bool {
        matches!(self, LinkFault::Reset | LinkFault::Aborted)
    }
}

/// One physical link as seen by the connection that owns it
///
/// All methods are non-blocking. Writes that do not fit the current send
/// buffer fail with [`LinkError::WouldBlock`]; the transport later emits
/// [`TransportEvent::Sent`] or [`TransportEvent::Poll`] so the owner can
/// retry.
pub trait LinkTransport: Send {
    /// Bytes the link can accept right now
    fn send_capacity(&self) -> usize;

    /// Queue bytes for transmission
    fn write(&mut self, data: &[u8]) -> Result<(), LinkError>;

    /// Push queued bytes onto the wire
    fn flush(&mut self) -> Result<(), LinkError> {
        Ok(())
    }

    /// Tell the transport that `len` received bytes were consumed
    fn acknowledge(&mut self, _len: usize) {}

    /// Release the link. Called at most once per link.
    fn close(&mut self) -> Result<(), LinkError>;
}

/// Events a transport reports to the routing core
pub enum TransportEvent {
    /// A new link is up
    Opened {
        handle: LinkHandle,
        role: LinkRole,
        link: Box<dyn LinkTransport>,
    },
    /// Bytes arrived, possibly split into fragments
    ///
    /// An empty fragment list (or only empty fragments) signals that the
    /// peer closed the link gracefully.
    Received {
        handle: LinkHandle,
        fragments: Vec<Bytes>,
    },
    /// Previously written bytes left the send buffer
    Sent { handle: LinkHandle },
    /// Periodic idle tick for the link
    Poll { handle: LinkHandle },
    /// The link failed
    Fault { handle: LinkHandle, fault: LinkFault },
}

impl TransportEvent {
    /// The link this event is about
    pub fn handle(&self) -> LinkHandle {
        match self {
            TransportEvent::Opened { handle, .. }
            | TransportEvent::Received { handle, .. }
            | TransportEvent::Sent { handle }
            | TransportEvent::Poll { handle }
            | TransportEvent::Fault { handle, .. } => *handle,
        }
    }
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::Opened { handle, role, .. } => f
                .debug_struct("Opened")
                .field("handle", handle)
                .field("role", role)
                .finish_non_exhaustive(),
            TransportEvent::Received { handle, fragments } => f
                .debug_struct("Received")
                .field("handle", handle)
                .field("bytes", &fragments.iter().map(Bytes::len).sum::<usize>())
                .finish(),
            TransportEvent::Sent { handle } => {
                f.debug_struct("Sent").field("handle", handle).finish()
            }
            TransportEvent::Poll { handle } => {
                f.debug_struct("Poll").field("handle", handle).finish()
            }
            TransportEvent::Fault { handle, fault } => f
                .debug_struct("Fault")
                .field("handle", handle)
                .field("fault", fault)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_fatality() {
        assert!(LinkFault::Reset.is_fatal());
        assert!(LinkFault::Aborted.is_fatal());
        assert!(!LinkFault::Other("timeout".into()).is_fatal());
    }

    #[test]
    fn test_event_handle() {
        let event = TransportEvent::Received {
            handle: LinkHandle(9),
            fragments: vec![Bytes::from_static(b"ab"), Bytes::from_static(b"c")],
        };
        assert_eq!(event.handle(), LinkHandle(9));
        assert!(format!("{:?}", event).contains("bytes: 3"));
        assert_eq!(LinkHandle(9).to_string(), "link#9");
    }
}
