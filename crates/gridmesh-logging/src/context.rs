//! Node context for log entries
//!
//! Several nodes can share one process (tests, local demos). A
//! [`NodeContextGuard`] records which node the current thread is working for
//! so that [`NodeContextLayer`](crate::layers::NodeContextLayer) can tag the
//! spans it opens.

use std::cell::RefCell;

use gridmesh_core::NodeId;
use uuid::Uuid;

/// Node context stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContextData {
    /// The node's identity
    pub node_id: String,
    /// Whether the node is a backend gateway
    pub gateway: bool,
    /// Unique ID for this run of the node
    pub instance_id: Uuid,
}

thread_local! {
    static NODE_CONTEXT: RefCell<Option<NodeContextData>> = const { RefCell::new(None) };
}

/// RAII guard for node context
///
/// Sets the node context for the current thread and restores the previous
/// one on drop.
///
/// # Example
///
/// ```ignore
/// let _guard = NodeContextGuard::new(node.identity(), node.is_gateway());
/// tracing::info!("Starting bridge");
/// ```
pub struct NodeContextGuard {
    previous: Option<NodeContextData>,
}

impl NodeContextGuard {
    /// Set the context for `node_id` with a fresh instance ID
    pub fn new(node_id: &NodeId, gateway: bool) -> Self {
        Self::with_instance_id(node_id, gateway, Uuid::new_v4())
    }

    /// Set the context with a specific instance ID
    pub fn with_instance_id(node_id: &NodeId, gateway: bool, instance_id: Uuid) -> Self {
        let next = NodeContextData {
            node_id: node_id.as_str().to_string(),
            gateway,
            instance_id,
        };
        let previous = NODE_CONTEXT.with(|ctx| ctx.borrow_mut().replace(next));
        Self { previous }
    }

    /// The current node context, if any
    pub fn current() -> Option<NodeContextData> {
        NODE_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    /// The current node ID, if set
    pub fn current_node_id() -> Option<String> {
        Self::current().map(|ctx| ctx.node_id)
    }
}

impl Drop for NodeContextGuard {
    fn drop(&mut self) {
        NODE_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_id(s: &str) -> NodeId {
        NodeId::parse(s).unwrap()
    }

    #[test]
    fn test_guard_sets_and_clears() {
        assert!(NodeContextGuard::current().is_none());
        {
            let _guard = NodeContextGuard::new(&make_id("n1"), true);
            let ctx = NodeContextGuard::current().unwrap();
            assert_eq!(ctx.node_id, "n1");
            assert!(ctx.gateway);
        }
        assert!(NodeContextGuard::current().is_none());
    }

    #[test]
    fn test_nested_contexts() {
        let _outer = NodeContextGuard::new(&make_id("n1"), false);
        {
            let _inner = NodeContextGuard::new(&make_id("n2"), false);
            assert_eq!(NodeContextGuard::current_node_id(), Some("n2".to_string()));
        }
        assert_eq!(NodeContextGuard::current_node_id(), Some("n1".to_string()));
    }

    #[test]
    fn test_context_is_per_thread() {
        let _guard = NodeContextGuard::new(&make_id("n1"), false);
        let other = std::thread::spawn(NodeContextGuard::current).join().unwrap();
        assert!(other.is_none());
    }

    #[test]
    fn test_with_instance_id() {
        let instance_id = Uuid::new_v4();
        let _guard = NodeContextGuard::with_instance_id(&make_id("n1"), false, instance_id);
        assert_eq!(NodeContextGuard::current().unwrap().instance_id, instance_id);
    }
}
