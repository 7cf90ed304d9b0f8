//! Mock link implementation for testing
//!
//! Provides an in-memory [`LinkTransport`] so connection and routing logic
//! can be exercised without sockets.
//!
//! ## Usage
//!
//! ```
//! use skein_core::{LinkTransport, MockLink};
//!
//! let (mut link, tap) = MockLink::new(1024);
//!
//! link.write(br#"{"type":9,"from":1,"dest":2,"msg":"hi"}"#).unwrap();
//! assert_eq!(tap.written().len(), 1);
//!
//! // Simulate a full send buffer
//! tap.set_capacity(0);
//! assert_eq!(link.send_capacity(), 0);
//! ```

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::LinkError;
use crate::transport::LinkTransport;

#[derive(Debug, Default)]
struct MockLinkState {
    capacity: usize,
    written: Vec<Bytes>,
    fail_next: Option<LinkError>,
    flushes: usize,
    acknowledged: usize,
    close_calls: usize,
}

/// In-memory link
///
/// Written bytes consume send capacity, like a real send buffer; the test
/// restores it through [`MockLinkTap::set_capacity`].
#[derive(Debug)]
pub struct MockLink {
    state: Arc<Mutex<MockLinkState>>,
}

/// Test-side view of a [`MockLink`]
#[derive(Debug, Clone)]
pub struct MockLinkTap {
    state: Arc<Mutex<MockLinkState>>,
}

impl MockLink {
    /// Create a link with `capacity` bytes of send buffer
    pub fn new(capacity: usize) -> (Self, MockLinkTap) {
        let state = Arc::new(Mutex::new(MockLinkState {
            capacity,
            ..Default::default()
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockLinkTap { state },
        )
    }
}

impl LinkTransport for MockLink {
    fn send_capacity(&self) -> usize {
        self.state.lock().capacity
    }

    fn write(&mut self, data: &[u8]) -> Result<(), LinkError> {
        let mut state = self.state.lock();
        if state.close_calls > 0 {
            return Err(LinkError::Closed);
        }
        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }
        if data.len() > state.capacity {
            return Err(LinkError::WouldBlock);
        }
        state.capacity -= data.len();
        state.written.push(Bytes::copy_from_slice(data));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), LinkError> {
        self.state.lock().flushes += 1;
        Ok(())
    }

    fn acknowledge(&mut self, len: usize) {
        self.state.lock().acknowledged += len;
    }

    fn close(&mut self) -> Result<(), LinkError> {
        self.state.lock().close_calls += 1;
        Ok(())
    }
}

impl MockLinkTap {
    /// Everything written so far
    pub fn written(&self) -> Vec<Bytes> {
        self.state.lock().written.clone()
    }

    /// Drain and return everything written so far
    pub fn take_written(&self) -> Vec<Bytes> {
        std::mem::take(&mut self.state.lock().written)
    }

    /// Everything written so far, as UTF-8 strings
    pub fn written_strings(&self) -> Vec<String> {
        self.written()
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }

    /// Set the advertised send capacity
    pub fn set_capacity(&self, capacity: usize) {
        self.state.lock().capacity = capacity;
    }

    /// Make the next write fail with `err`
    pub fn fail_next_write(&self, err: LinkError) {
        self.state.lock().fail_next = Some(err);
    }

    /// Number of flush calls
    pub fn flushes(&self) -> usize {
        self.state.lock().flushes
    }

    /// Total bytes acknowledged by the reader
    pub fn acknowledged(&self) -> usize {
        self.state.lock().acknowledged
    }

    /// Number of times the link was closed
    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }
}
