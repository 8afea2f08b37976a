//! The node arena.
//!
//! A [`Graph`] owns every node of one compilation unit. Nodes are never
//! removed; consumers address them by [`NodeId`]. Control and effect
//! ordering is expressed through state and depend inputs, data flow through
//! value inputs.
//!
//! Each graph is created and mutated by exactly one builder, so the arena
//! needs no synchronization. Graphs are `Send` and can be handed to another
//! thread once built.

use std::fmt;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::node::{ConstValue, Node, NodeId, Op, TypeHint};

/// Which input list of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    State,
    Depend,
    Value,
    FrameState,
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InputKind::State => "state",
            InputKind::Depend => "depend",
            InputKind::Value => "value",
            InputKind::FrameState => "frame-state",
        })
    }
}

/// Structural defect found by [`Graph::verify`].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("{kind} input {index} of {node} was never wired")]
    Unwired {
        node: NodeId,
        kind: InputKind,
        index: usize,
    },
    #[error("{node} refers to {input}, which is not in the graph")]
    Dangling { node: NodeId, input: NodeId },
    #[error("selector {node} is not controlled by a merge or loop begin")]
    SelectorWithoutJoin { node: NodeId },
    #[error("selector {node} has {found} inputs but its join has {expected}")]
    SelectorArity {
        node: NodeId,
        expected: usize,
        found: usize,
    },
}

#[derive(Clone, Debug)]
pub struct Graph {
    nodes: Vec<Node>,
    constants: FxHashMap<ConstValue, NodeId>,
    optimized_out: Option<NodeId>,
    state_entry: NodeId,
    depend_entry: NodeId,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// An empty graph holding only the state and depend entries.
    pub fn new() -> Self {
        let mut graph = Graph {
            nodes: Vec::new(),
            constants: FxHashMap::default(),
            optimized_out: None,
            state_entry: NodeId::NONE,
            depend_entry: NodeId::NONE,
        };
        graph.state_entry = graph.add(Node::new(Op::StateEntry));
        graph.depend_entry = graph.add(Node::new(Op::DependEntry));
        graph
    }

    #[inline]
    pub fn state_entry(&self) -> NodeId {
        self.state_entry
    }

    #[inline]
    pub fn depend_entry(&self) -> NodeId {
        self.depend_entry
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "node count is bounded by method size times a small factor"
    )]
    pub fn add(&mut self, node: Node) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Add a node from its operation and input lists.
    pub fn add_node(
        &mut self,
        op: Op,
        state: &[NodeId],
        depend: &[NodeId],
        value: &[NodeId],
    ) -> NodeId {
        self.add(
            Node::new(op)
                .with_state(state)
                .with_depend(depend)
                .with_values(value),
        )
    }

    /// The unique node for `value`.
    pub fn constant(&mut self, value: ConstValue) -> NodeId {
        if let Some(&id) = self.constants.get(&value) {
            return id;
        }
        let id = self.add(Node::new(Op::Constant(value)));
        self.constants.insert(value, id);
        id
    }

    /// The shared placeholder for dead frame-state slots.
    pub fn optimized_out(&mut self) -> NodeId {
        if let Some(id) = self.optimized_out {
            return id;
        }
        let id = self.add(Node::new(Op::OptimizedOut));
        self.optimized_out = Some(id);
        id
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[inline]
    pub fn op(&self, id: NodeId) -> Op {
        self.nodes[id.index()].op
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "node count fits in u32, see `add`"
    )]
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeId::new(i as u32), node))
    }

    /// Number of nodes whose operation satisfies `pred`.
    pub fn count(&self, pred: impl Fn(Op) -> bool) -> usize {
        self.nodes.iter().filter(|n| pred(n.op)).count()
    }

    // ── Rewiring ────────────────────────────────────────────────────

    pub fn set_state_input(&mut self, id: NodeId, index: usize, input: NodeId) {
        self.nodes[id.index()].state_inputs[index] = input;
    }

    pub fn set_depend_input(&mut self, id: NodeId, index: usize, input: NodeId) {
        self.nodes[id.index()].depend_inputs[index] = input;
    }

    pub fn set_value_input(&mut self, id: NodeId, index: usize, input: NodeId) {
        self.nodes[id.index()].value_inputs[index] = input;
    }

    pub fn set_frame_state(&mut self, id: NodeId, frame_state: NodeId) {
        self.nodes[id.index()].frame_state = Some(frame_state);
    }

    pub fn set_hint(&mut self, id: NodeId, hint: TypeHint) {
        self.nodes[id.index()].hint = Some(hint);
    }

    // ── Verification ────────────────────────────────────────────────

    /// Check that every input is wired and every selector matches the
    /// arity of its join.
    pub fn verify(&self) -> Result<(), GraphError> {
        for (id, node) in self.iter() {
            let lists = [
                (InputKind::State, node.state_inputs.as_slice()),
                (InputKind::Depend, node.depend_inputs.as_slice()),
                (InputKind::Value, node.value_inputs.as_slice()),
                (InputKind::FrameState, node.frame_state.as_slice()),
            ];
            for (kind, inputs) in lists {
                for (index, &input) in inputs.iter().enumerate() {
                    if input.is_none() {
                        return Err(GraphError::Unwired {
                            node: id,
                            kind,
                            index,
                        });
                    }
                    if input.index() >= self.nodes.len() {
                        return Err(GraphError::Dangling { node: id, input });
                    }
                }
            }

            if node.op.is_selector() {
                let join = match node.state_inputs.as_slice() {
                    [join] if self.op(*join).is_control_join() => *join,
                    _ => return Err(GraphError::SelectorWithoutJoin { node: id }),
                };
                let expected = self.node(join).state_inputs.len();
                let found = if node.op == Op::ValueSelector {
                    node.value_inputs.len()
                } else {
                    node.depend_inputs.len()
                };
                if found != expected {
                    return Err(GraphError::SelectorArity {
                        node: id,
                        expected,
                        found,
                    });
                }
            }
        }
        tracing::debug!(nodes = self.nodes.len(), "graph verified");
        Ok(())
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, tag: &str, ids: &[NodeId]) -> fmt::Result {
            if ids.is_empty() {
                return Ok(());
            }
            write!(f, " {tag}[")?;
            for (i, id) in ids.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{id}")?;
            }
            f.write_str("]")
        }

        for (id, node) in self.iter() {
            write!(f, "{:>6} = {}", id.to_string(), node.op)?;
            list(f, "s", &node.state_inputs)?;
            list(f, "d", &node.depend_inputs)?;
            list(f, "v", &node.value_inputs)?;
            if let Some(fs) = node.frame_state {
                write!(f, " fs={fs}")?;
            }
            if let Some(hint) = node.hint {
                write!(f, " hint={hint:?}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
