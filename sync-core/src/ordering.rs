//! Move-to-front conversation ordering.
//!
//! Conversations form a singly-linked chain from the most recently active
//! (head, no incoming edge) to the least recently active (tail, no outgoing
//! edge). Each node stores its `next` (next-older) neighbour; the head and
//! tail are kept as explicit anchors so every operation touches a constant
//! number of rows.
//!
//! This module only *plans* changes. [`plan_promote`] and [`plan_append`]
//! turn the neighbourhood of a node into a list of [`OrderingOp`]s; the
//! persistent store (in sync-client) and [`MemoryOrdering`] both apply the
//! same ops, so the splice logic is tested once, without I/O.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use thiserror::Error;

/// Which of the two independent orderings is meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderingInstance {
    /// Reacts to any observed activity, including unconfirmed sends.
    Local,
    /// Reacts only to server-confirmed message events.
    Remote,
}

impl OrderingInstance {
    /// Stable text form, used as a storage key.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderingInstance::Local => "local",
            OrderingInstance::Remote => "remote",
        }
    }
}

/// Everything the planner needs to know about one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbourhood<C> {
    /// Current head of the chain.
    pub head: Option<C>,
    /// Current tail of the chain.
    pub tail: Option<C>,
    /// Whether the node is already part of the chain.
    pub present: bool,
    /// Node whose `next` is this node.
    pub predecessor: Option<C>,
    /// This node's `next`.
    pub successor: Option<C>,
}

impl<C> Neighbourhood<C> {
    /// Neighbourhood of a node that is not in the chain yet.
    pub fn absent(head: Option<C>, tail: Option<C>) -> Self {
        Self {
            head,
            tail,
            present: false,
            predecessor: None,
            successor: None,
        }
    }
}

/// A single mutation of the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderingOp<C> {
    /// Set (or insert) `node` with the given next-older neighbour.
    SetNext {
        /// Node to write.
        node: C,
        /// Its next-older neighbour, `None` for the tail.
        next: Option<C>,
    },
    /// Record `C` as the most recent conversation.
    SetHead(C),
    /// Record `C` as the oldest conversation.
    SetTail(C),
}

/// Errors for a chain that no longer satisfies its shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderingError {
    /// A non-head node has no incoming edge.
    #[error("node {node} is in the chain but nothing points to it")]
    Detached {
        /// Debug form of the node.
        node: String,
    },
    /// A traversal from the head revisited a node.
    #[error("cycle detected at {node}")]
    Cycle {
        /// Debug form of the node.
        node: String,
    },
    /// A traversal from the head did not reach every node.
    #[error("traversal reached {reached} of {total} nodes")]
    Orphaned {
        /// Nodes reached from the head.
        reached: usize,
        /// Nodes in the chain.
        total: usize,
    },
    /// The recorded tail is not the last node of the traversal.
    #[error("recorded tail does not end the chain")]
    TailMismatch,
}

/// Plan moving `id` to the head.
///
/// - already head: nothing to do
/// - first appearance: `id -> old head`, `id` becomes head (and tail if empty)
/// - otherwise: splice `id` out (its predecessor inherits its successor, and
///   becomes tail if `id` was the tail), then `id -> old head`
pub fn plan_promote<C: Copy + Eq + Debug>(
    id: C,
    n: &Neighbourhood<C>,
) -> Result<Vec<OrderingOp<C>>, OrderingError> {
    if n.head == Some(id) {
        return Ok(Vec::new());
    }

    if !n.present {
        let mut ops = vec![
            OrderingOp::SetNext {
                node: id,
                next: n.head,
            },
            OrderingOp::SetHead(id),
        ];
        if n.tail.is_none() {
            ops.push(OrderingOp::SetTail(id));
        }
        return Ok(ops);
    }

    let predecessor = n.predecessor.ok_or_else(|| OrderingError::Detached {
        node: format!("{id:?}"),
    })?;

    let mut ops = vec![OrderingOp::SetNext {
        node: predecessor,
        next: n.successor,
    }];
    if n.successor.is_none() {
        ops.push(OrderingOp::SetTail(predecessor));
    }
    ops.push(OrderingOp::SetNext {
        node: id,
        next: n.head,
    });
    ops.push(OrderingOp::SetHead(id));
    Ok(ops)
}

/// Plan threading `id` after the current tail (an older conversation
/// discovered through list expansion). Nodes already present stay put.
pub fn plan_append<C: Copy + Eq>(id: C, n: &Neighbourhood<C>) -> Vec<OrderingOp<C>> {
    if n.present {
        return Vec::new();
    }
    match n.tail {
        Some(tail) => vec![
            OrderingOp::SetNext {
                node: tail,
                next: Some(id),
            },
            OrderingOp::SetNext {
                node: id,
                next: None,
            },
            OrderingOp::SetTail(id),
        ],
        None => vec![
            OrderingOp::SetNext {
                node: id,
                next: None,
            },
            OrderingOp::SetHead(id),
            OrderingOp::SetTail(id),
        ],
    }
}

/// In-memory ordering that applies planned ops.
///
/// Used for tests and as the reference shape the persistent store must
/// match.
#[derive(Debug, Clone)]
pub struct MemoryOrdering<C> {
    next: HashMap<C, Option<C>>,
    prev: HashMap<C, C>,
    head: Option<C>,
    tail: Option<C>,
}

impl<C: Copy + Eq + Hash + Debug> MemoryOrdering<C> {
    /// Create an empty ordering.
    pub fn new() -> Self {
        Self {
            next: HashMap::new(),
            prev: HashMap::new(),
            head: None,
            tail: None,
        }
    }

    /// Most recent conversation.
    pub fn head(&self) -> Option<C> {
        self.head
    }

    /// Oldest conversation.
    pub fn tail(&self) -> Option<C> {
        self.tail
    }

    /// Number of conversations in the chain.
    pub fn len(&self) -> usize {
        self.next.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.next.is_empty()
    }

    /// Collect the neighbourhood of `id`.
    pub fn neighbourhood(&self, id: C) -> Neighbourhood<C> {
        match self.next.get(&id) {
            Some(successor) => Neighbourhood {
                head: self.head,
                tail: self.tail,
                present: true,
                predecessor: self.prev.get(&id).copied(),
                successor: *successor,
            },
            None => Neighbourhood::absent(self.head, self.tail),
        }
    }

    /// Apply planned ops.
    pub fn apply(&mut self, ops: &[OrderingOp<C>]) {
        for op in ops {
            match *op {
                OrderingOp::SetNext { node, next } => {
                    if let Some(Some(old)) = self.next.insert(node, next) {
                        if self.prev.get(&old) == Some(&node) {
                            self.prev.remove(&old);
                        }
                    }
                    if let Some(next) = next {
                        self.prev.insert(next, node);
                    }
                }
                OrderingOp::SetHead(node) => {
                    self.head = Some(node);
                    self.prev.remove(&node);
                }
                OrderingOp::SetTail(node) => self.tail = Some(node),
            }
        }
    }

    /// Move `id` to the head.
    pub fn promote(&mut self, id: C) -> Result<(), OrderingError> {
        let ops = plan_promote(id, &self.neighbourhood(id))?;
        self.apply(&ops);
        Ok(())
    }

    /// Thread `id` after the tail.
    pub fn append_tail(&mut self, id: C) {
        let ops = plan_append(id, &self.neighbourhood(id));
        self.apply(&ops);
    }

    /// `anchor` followed by up to `count` next-older conversations.
    pub fn list(&self, anchor: C, count: usize) -> Vec<C> {
        if !self.next.contains_key(&anchor) {
            return Vec::new();
        }
        let mut out = vec![anchor];
        let mut current = anchor;
        while out.len() <= count {
            match self.next.get(&current).copied().flatten() {
                Some(next) => {
                    out.push(next);
                    current = next;
                }
                None => break,
            }
        }
        out
    }

    /// Full traversal from the head, checking the chain shape on the way.
    pub fn traverse(&self) -> Result<Vec<C>, OrderingError> {
        let mut seen = Vec::with_capacity(self.next.len());
        let mut current = self.head;
        while let Some(node) = current {
            if seen.contains(&node) {
                return Err(OrderingError::Cycle {
                    node: format!("{node:?}"),
                });
            }
            seen.push(node);
            current = self.next.get(&node).copied().flatten();
        }
        if seen.len() != self.next.len() {
            return Err(OrderingError::Orphaned {
                reached: seen.len(),
                total: self.next.len(),
            });
        }
        if seen.last().copied() != self.tail {
            return Err(OrderingError::TailMismatch);
        }
        Ok(seen)
    }
}

impl<C: Copy + Eq + Hash + Debug> Default for MemoryOrdering<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tiny deterministic generator so the sequence tests need no extra crate.
    fn lcg(seed: &mut u64) -> u64 {
        *seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        *seed >> 33
    }

    #[test]
    fn first_promote_sets_head_and_tail() {
        let mut ordering = MemoryOrdering::new();
        ordering.promote(1u32).unwrap();

        assert_eq!(ordering.head(), Some(1));
        assert_eq!(ordering.tail(), Some(1));
        assert_eq!(ordering.traverse().unwrap(), vec![1]);
    }

    #[test]
    fn promote_new_node_links_to_previous_head() {
        let mut ordering = MemoryOrdering::new();
        ordering.promote(1u32).unwrap();
        ordering.promote(2).unwrap();

        assert_eq!(ordering.head(), Some(2));
        assert_eq!(ordering.tail(), Some(1));
        assert_eq!(ordering.traverse().unwrap(), vec![2, 1]);
    }

    #[test]
    fn promote_head_is_noop() {
        let mut n = Neighbourhood::absent(Some(7u32), Some(3));
        n.present = true;
        assert!(plan_promote(7, &n).unwrap().is_empty());
    }

    #[test]
    fn promote_older_conversation_moves_it_first() {
        // A (older) and B (newer); activity on A brings it back to the front
        let (a, b) = (1u32, 2u32);
        let mut ordering = MemoryOrdering::new();
        ordering.promote(a).unwrap();
        ordering.promote(b).unwrap();

        ordering.promote(a).unwrap();

        assert_eq!(ordering.head(), Some(a));
        assert_eq!(ordering.traverse().unwrap(), vec![a, b]);
        assert_eq!(ordering.tail(), Some(b));
    }

    #[test]
    fn promote_middle_node_splices() {
        let mut ordering = MemoryOrdering::new();
        for id in [1u32, 2, 3, 4] {
            ordering.promote(id).unwrap();
        }
        // 4 -> 3 -> 2 -> 1
        ordering.promote(2).unwrap();

        assert_eq!(ordering.traverse().unwrap(), vec![2, 4, 3, 1]);
    }

    #[test]
    fn promote_tail_moves_tail_to_predecessor() {
        let mut ordering = MemoryOrdering::new();
        for id in [1u32, 2, 3] {
            ordering.promote(id).unwrap();
        }
        ordering.promote(1).unwrap();

        assert_eq!(ordering.tail(), Some(2));
        assert_eq!(ordering.traverse().unwrap(), vec![1, 3, 2]);
    }

    #[test]
    fn plan_for_detached_node_is_an_error() {
        let n = Neighbourhood {
            head: Some(1u32),
            tail: Some(3),
            present: true,
            predecessor: None,
            successor: Some(3),
        };
        assert!(matches!(
            plan_promote(2, &n),
            Err(OrderingError::Detached { .. })
        ));
    }

    #[test]
    fn append_threads_after_tail() {
        let mut ordering = MemoryOrdering::new();
        ordering.promote(1u32).unwrap();
        ordering.append_tail(2);
        ordering.append_tail(3);

        assert_eq!(ordering.head(), Some(1));
        assert_eq!(ordering.tail(), Some(3));
        assert_eq!(ordering.traverse().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn append_into_empty_sets_both_anchors() {
        let mut ordering = MemoryOrdering::new();
        ordering.append_tail(9u32);
        assert_eq!(ordering.head(), Some(9));
        assert_eq!(ordering.tail(), Some(9));
    }

    #[test]
    fn append_existing_node_is_noop() {
        let mut ordering = MemoryOrdering::new();
        ordering.promote(1u32).unwrap();
        ordering.promote(2).unwrap();
        ordering.append_tail(2);
        assert_eq!(ordering.traverse().unwrap(), vec![2, 1]);
    }

    #[test]
    fn list_walks_from_anchor() {
        let mut ordering = MemoryOrdering::new();
        for id in 1u32..=6 {
            ordering.promote(id).unwrap();
        }
        // 6 5 4 3 2 1
        assert_eq!(ordering.list(5, 2), vec![5, 4, 3]);
        assert_eq!(ordering.list(2, 10), vec![2, 1]);
        assert!(ordering.list(42, 3).is_empty());
    }

    #[test]
    fn head_is_last_promoted_and_traversal_is_complete() {
        let mut seed = 0x5eed_u64;
        let mut ordering = MemoryOrdering::new();
        let mut inserted = std::collections::HashSet::new();

        for _ in 0..500 {
            let id = (lcg(&mut seed) % 40) as u32;
            ordering.promote(id).unwrap();
            inserted.insert(id);

            assert_eq!(ordering.head(), Some(id));
            let order = ordering.traverse().unwrap();
            assert_eq!(order.len(), inserted.len());
            assert!(order.iter().all(|n| inserted.contains(n)));
        }
    }

    #[test]
    fn mixed_promote_and_append_keep_one_chain() {
        let mut seed = 42_u64;
        let mut ordering = MemoryOrdering::new();

        for step in 0..300 {
            let id = (lcg(&mut seed) % 25) as u32;
            if step % 3 == 0 {
                ordering.append_tail(id);
            } else {
                ordering.promote(id).unwrap();
            }
            ordering.traverse().unwrap();
        }
    }

    #[test]
    fn instance_names_are_distinct() {
        assert_ne!(
            OrderingInstance::Local.as_str(),
            OrderingInstance::Remote.as_str()
        );
    }
}
