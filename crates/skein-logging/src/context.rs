//! Node context for multi-node logging
//!
//! Several mesh nodes can share one process (tests, local simulations). A
//! [`NodeContextGuard`] records which node the current thread is working
//! for, so [`NodeContextLayer`](crate::layers::NodeContextLayer) can stamp
//! it onto every span opened in that scope.

use std::cell::RefCell;

use uuid::Uuid;

/// Node context stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContextData {
    /// Mesh id of the node
    pub node_id: u32,
    /// Unique id for this node session
    pub instance_id: Uuid,
}

thread_local! {
    static NODE_CONTEXT: RefCell<Option<NodeContextData>> = const { RefCell::new(None) };
}

/// RAII guard for node context
///
/// Creating the guard sets the context for the current thread; dropping it
/// restores whatever was set before.
///
/// ```
/// use skein_logging::NodeContextGuard;
///
/// let _guard = NodeContextGuard::new(42);
/// assert_eq!(NodeContextGuard::current_node_id(), Some(42));
/// ```
#[derive(Debug)]
pub struct NodeContextGuard {
    previous: Option<NodeContextData>,
}

impl NodeContextGuard {
    /// Enter the context of `node_id` with a fresh instance id
    pub fn new(node_id: u32) -> Self {
        Self::with_instance_id(node_id, Uuid::new_v4())
    }

    /// Enter the context of `node_id` keeping a known instance id
    pub fn with_instance_id(node_id: u32, instance_id: Uuid) -> Self {
        let context = NodeContextData {
            node_id,
            instance_id,
        };
        let previous = NODE_CONTEXT.with(|ctx| ctx.borrow_mut().replace(context));
        Self { previous }
    }

    /// The active context, if any
    pub fn current() -> Option<NodeContextData> {
        NODE_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    pub fn current_node_id() -> Option<u32> {
        Self::current().map(|ctx| ctx.node_id)
    }

    pub fn current_instance_id() -> Option<Uuid> {
        Self::current().map(|ctx| ctx.instance_id)
    }
}

impl Drop for NodeContextGuard {
    fn drop(&mut self) {
        NODE_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// Run a block inside a node context
///
/// ```
/// use skein_logging::with_node_context;
///
/// let id = with_node_context!(7, {
///     skein_logging::NodeContextGuard::current_node_id()
/// });
/// assert_eq!(id, Some(7));
/// ```
#[macro_export]
macro_rules! with_node_context {
    ($node_id:expr, $body:block) => {{
        let _guard = $crate::context::NodeContextGuard::new($node_id);
        $body
    }};
}
