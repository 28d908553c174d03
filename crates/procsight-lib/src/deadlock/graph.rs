//! Wait-for graph construction from lock events
//!
//! Folds the ordered lock event stream down to a live holder/waiter map.
//! The graph reflects only the current wait state, not history: an edge
//! `A -> B` means thread A is blocked right now on a lock held by thread B.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::models::{LockAction, LockEvent, ThreadNode, WaitEdge};

/// Mutable holder/waiter state, updated on every lock event.
///
/// Lives behind a single mutex in the session so concurrent event
/// deliveries serialize; analysis always works on a [`WaitForGraph`]
/// snapshot and never observes a partial update.
#[derive(Debug, Default)]
pub struct WaitGraphBuilder {
    /// lock id -> thread currently holding it
    holders: HashMap<String, u64>,
    /// thread id -> lock id it is currently waiting on
    waiting: HashMap<u64, String>,
    /// Every distinct lock id seen this session, monotone.
    locks_seen: HashSet<String>,
    events_recorded: u64,
}

impl WaitGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one lock event to the live state.
    ///
    /// Events referencing unknown locks or threads fold in as no-ops rather
    /// than errors: a release of a lock nobody holds, or a timeout for a
    /// thread that was not waiting, leaves the state unchanged.
    pub fn record_event(&mut self, event: &LockEvent) {
        self.locks_seen.insert(event.lock_id.clone());
        self.events_recorded += 1;

        match event.action {
            LockAction::Acquire => {
                self.holders.insert(event.lock_id.clone(), event.thread_id);
                // The thread is no longer blocked, whatever it was waiting on.
                self.waiting.remove(&event.thread_id);
            }
            LockAction::Release => {
                match self.holders.get(&event.lock_id) {
                    Some(&holder) if holder == event.thread_id => {
                        self.holders.remove(&event.lock_id);
                    }
                    Some(&holder) => {
                        debug!(
                            lock_id = %event.lock_id,
                            thread_id = event.thread_id,
                            holder = holder,
                            "Release from non-holding thread ignored"
                        );
                    }
                    None => {
                        debug!(
                            lock_id = %event.lock_id,
                            thread_id = event.thread_id,
                            "Release of unheld lock ignored"
                        );
                    }
                }
            }
            LockAction::WaitStart => {
                // Recorded even if the lock is currently free; the edge
                // materializes at snapshot time once some thread acquires it.
                self.waiting.insert(event.thread_id, event.lock_id.clone());
            }
            LockAction::WaitTimeout => {
                if self.waiting.get(&event.thread_id) == Some(&event.lock_id) {
                    self.waiting.remove(&event.thread_id);
                }
            }
        }
    }

    /// True once at least one lock event has been recorded; selects the
    /// graph-backed analysis path over the thread-census heuristic.
    pub fn has_events(&self) -> bool {
        self.events_recorded > 0
    }

    /// Count of distinct lock identifiers ever seen this session.
    pub fn locks_tracked(&self) -> usize {
        self.locks_seen.len()
    }

    /// Immutable snapshot of the current wait state.
    pub fn snapshot(&self) -> WaitForGraph {
        let mut nodes = BTreeSet::new();
        let mut edges = Vec::new();

        for &holder in self.holders.values() {
            nodes.insert(holder);
        }
        for (&waiter, lock_id) in &self.waiting {
            nodes.insert(waiter);
            if let Some(&holder) = self.holders.get(lock_id) {
                if holder != waiter {
                    edges.push((waiter, holder));
                }
            }
        }
        edges.sort_unstable();
        edges.dedup();

        WaitForGraph::new(nodes, edges)
    }
}

/// An immutable wait-for graph: threads as nodes, "waits for lock held by"
/// as directed edges.
#[derive(Debug, Clone)]
pub struct WaitForGraph {
    nodes: BTreeSet<u64>,
    edges: Vec<(u64, u64)>,
    adjacency: HashMap<u64, Vec<u64>>,
}

impl WaitForGraph {
    fn new(nodes: BTreeSet<u64>, edges: Vec<(u64, u64)>) -> Self {
        let mut adjacency: HashMap<u64, Vec<u64>> = HashMap::new();
        for &(source, target) in &edges {
            adjacency.entry(source).or_default().push(target);
        }
        Self {
            nodes,
            edges,
            adjacency,
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = u64> + '_ {
        self.nodes.iter().copied()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn successors(&self, node: u64) -> &[u64] {
        self.adjacency.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Thread descriptors for graph rendering, ordered by id.
    pub fn render_nodes(&self) -> Vec<ThreadNode> {
        self.nodes
            .iter()
            .map(|id| ThreadNode {
                id: id.to_string(),
                name: format!("Thread {id}"),
                node_type: "thread".to_string(),
            })
            .collect()
    }

    /// Wait-for edges for graph rendering, in deterministic order.
    pub fn render_edges(&self) -> Vec<WaitEdge> {
        self.edges
            .iter()
            .map(|(source, target)| WaitEdge {
                source: source.to_string(),
                target: target.to_string(),
                edge_type: "wait-for".to_string(),
            })
            .collect()
    }
}
