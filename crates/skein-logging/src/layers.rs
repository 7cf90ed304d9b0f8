//! Custom tracing layers

use tracing::{Subscriber, span};
use tracing_subscriber::{
    layer::{Context, Layer},
    registry::{LookupSpan, SpanRef},
};

use crate::context::{NodeContextData, NodeContextGuard};

/// Layer that attaches node context to spans
///
/// A span opened while a [`NodeContextGuard`] is active carries that
/// guard's context. Otherwise it inherits the context of its parent span,
/// so work spawned from a node's span stays attributed to the node.
#[derive(Debug, Default)]
pub struct NodeContextLayer;

impl NodeContextLayer {
    pub fn new() -> Self {
        Self
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct NodeContextExtension {
    pub data: NodeContextData,
}

/// Node context recorded on `span`, if any
pub fn node_context<'a, S>(span: &SpanRef<'a, S>) -> Option<NodeContextData>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    span.extensions()
        .get::<NodeContextExtension>()
        .map(|ext| ext.data.clone())
}

impl<S> Layer<S> for NodeContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let data = NodeContextGuard::current()
            .or_else(|| span.parent().and_then(|parent| node_context(&parent)));
        if let Some(data) = data {
            span.extensions_mut().insert(NodeContextExtension { data });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::Registry;
    use tracing_subscriber::layer::SubscriberExt;

    fn context_of(id: &span::Id) -> Option<u32> {
        tracing::dispatcher::get_default(|dispatch| {
            let registry = dispatch.downcast_ref::<Registry>().unwrap();
            let span = registry.span(id).unwrap();
            node_context(&span).map(|data| data.node_id)
        })
    }

    #[test]
    fn test_span_carries_active_context() {
        let subscriber = Registry::default().with(NodeContextLayer::new());
        tracing::subscriber::with_default(subscriber, || {
            let bare = tracing::info_span!("bare");
            assert_eq!(context_of(&bare.id().unwrap()), None);

            let _guard = NodeContextGuard::new(7);
            let span = tracing::info_span!("work");
            assert_eq!(context_of(&span.id().unwrap()), Some(7));
        });
    }

    #[test]
    fn test_child_span_inherits_context() {
        let subscriber = Registry::default().with(NodeContextLayer::new());
        tracing::subscriber::with_default(subscriber, || {
            let parent = {
                let _guard = NodeContextGuard::new(3);
                tracing::info_span!("node")
            };
            assert!(NodeContextGuard::current().is_none());

            let child = parent.in_scope(|| tracing::info_span!("task"));
            assert_eq!(context_of(&child.id().unwrap()), Some(3));
        });
    }
}
