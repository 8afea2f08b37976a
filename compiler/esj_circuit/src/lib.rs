//! Sea-of-nodes IR graph.
//!
//! The graph builder produces one [`Graph`] per method. Every node carries
//! an [`Op`] and three ordered input lists (state, depend, value), plus an
//! optional frame-state snapshot and profile hint.

mod graph;
mod node;

pub use graph::{Graph, GraphError, InputKind};
pub use node::{ConstValue, Node, NodeId, Op, TypeHint};
