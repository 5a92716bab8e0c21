//! Custom tracing layers

use tracing::{Subscriber, span};
use tracing_subscriber::{
    layer::{Context, Layer},
    registry::LookupSpan,
};

use crate::context::{NodeContextData, NodeContextGuard};

/// Layer that tags new spans with the active node context
///
/// When a [`NodeContextGuard`] is active on the thread that opens a span,
/// the span carries a [`NodeContextExtension`]. Otherwise the span inherits
/// its parent's, so work spawned onto runtime worker threads keeps the
/// context of the span it was spawned under.
pub struct NodeContextLayer;

impl NodeContextLayer {
    /// Create a new node context layer
    pub fn new() -> Self {
        Self
    }
}

impl Default for NodeContextLayer {
    fn default() -> Self {
        Self::new()
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct NodeContextExtension {
    pub data: NodeContextData,
}

impl<S> Layer<S> for NodeContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };

        let data = NodeContextGuard::current().or_else(|| {
            let parent = span.parent()?;
            parent
                .extensions()
                .get::<NodeContextExtension>()
                .map(|ext| ext.data.clone())
        });
        if let Some(data) = data {
            span.extensions_mut().insert(NodeContextExtension { data });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridmesh_core::NodeId;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tracing_subscriber::{Registry, layer::SubscriberExt};

    /// Records the node id found on each new span
    struct SpanRecorder(Arc<Mutex<Vec<Option<String>>>>);

    impl<S> Layer<S> for SpanRecorder
    where
        S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    {
        fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
            let node = ctx.span(id).and_then(|span| {
                span.extensions()
                    .get::<NodeContextExtension>()
                    .map(|ext| ext.data.node_id.clone())
            });
            self.0.lock().push(node);
        }
    }

    #[test]
    fn test_spans_carry_node_context() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let subscriber = Registry::default()
            .with(NodeContextLayer::new())
            .with(SpanRecorder(seen.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let _untagged = tracing::info_span!("before").entered();
            let _guard = NodeContextGuard::new(&NodeId::parse("n1").unwrap(), false);
            let _tagged = tracing::info_span!("after").entered();
        });

        assert_eq!(*seen.lock(), vec![None, Some("n1".to_string())]);
    }

    #[test]
    fn test_child_span_on_other_thread_inherits_context() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatch = tracing::Dispatch::new(
            Registry::default()
                .with(NodeContextLayer::new())
                .with(SpanRecorder(seen.clone())),
        );

        let parent = tracing::dispatcher::with_default(&dispatch, || {
            let _guard = NodeContextGuard::new(&NodeId::parse("gw").unwrap(), true);
            tracing::info_span!("node")
        });

        let worker_dispatch = dispatch.clone();
        std::thread::spawn(move || {
            tracing::dispatcher::with_default(&worker_dispatch, || {
                assert!(NodeContextGuard::current().is_none());
                let _child = tracing::info_span!(parent: &parent, "task").entered();
                let _orphan = tracing::info_span!(parent: None, "orphan").entered();
            });
        })
        .join()
        .unwrap();

        assert_eq!(
            *seen.lock(),
            vec![Some("gw".to_string()), Some("gw".to_string()), None]
        );
    }
}
