//! Cycle detection over wait-for graph snapshots
//!
//! A depth-first search from every unvisited node, with an explicit stack
//! instead of recursion so pathological inputs cannot overflow. Any edge
//! back into a node on the active path closes a cycle. Wait-for graphs are
//! bounded by thread count, so this direct search is sufficient; no
//! strongly-connected-component machinery is needed.

use std::collections::HashSet;

use super::WaitForGraph;
use crate::models::Cycle;

/// Find all circular waits in the graph.
///
/// Cycles are deduplicated by canonical rotation: the same circular wait
/// discovered from different starting nodes reports once, rotated to begin
/// at its minimum thread id. An empty graph yields an empty list.
pub fn detect_cycles(graph: &WaitForGraph) -> Vec<Cycle> {
    let mut cycles = Vec::new();
    let mut reported: HashSet<Cycle> = HashSet::new();
    let mut visited: HashSet<u64> = HashSet::new();

    for start in graph.nodes() {
        if visited.contains(&start) {
            continue;
        }

        // (node, index of the next successor to explore)
        let mut stack: Vec<(u64, usize)> = vec![(start, 0)];
        let mut path: Vec<u64> = vec![start];
        let mut on_path: HashSet<u64> = HashSet::from([start]);
        visited.insert(start);

        while let Some(&(node, next_idx)) = stack.last() {
            let successors = graph.successors(node);
            if next_idx < successors.len() {
                stack.last_mut().unwrap().1 += 1;
                let next = successors[next_idx];

                if on_path.contains(&next) {
                    // Back-edge: the path slice from `next` to the top is a
                    // closed walk.
                    let pos = path.iter().position(|&n| n == next).unwrap();
                    let cycle = canonicalize(&path[pos..]);
                    if reported.insert(cycle.clone()) {
                        cycles.push(cycle);
                    }
                } else if !visited.contains(&next) {
                    visited.insert(next);
                    stack.push((next, 0));
                    path.push(next);
                    on_path.insert(next);
                }
            } else {
                stack.pop();
                if let Some(done) = path.pop() {
                    on_path.remove(&done);
                }
            }
        }
    }

    cycles
}

/// Rotate a closed walk to start at its minimum node id.
fn canonicalize(walk: &[u64]) -> Cycle {
    let min_pos = walk
        .iter()
        .enumerate()
        .min_by_key(|(_, &node)| node)
        .map(|(pos, _)| pos)
        .unwrap_or(0);
    walk[min_pos..]
        .iter()
        .chain(walk[..min_pos].iter())
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deadlock::WaitGraphBuilder;
    use crate::models::{LockAction, LockEvent};

    fn event(thread_id: u64, lock_id: &str, action: LockAction) -> LockEvent {
        LockEvent {
            thread_id,
            lock_id: lock_id.to_string(),
            action,
            timestamp: 0.0,
        }
    }

    fn two_thread_deadlock() -> WaitGraphBuilder {
        let mut builder = WaitGraphBuilder::new();
        builder.record_event(&event(1, "a", LockAction::Acquire));
        builder.record_event(&event(2, "b", LockAction::Acquire));
        builder.record_event(&event(1, "b", LockAction::WaitStart));
        builder.record_event(&event(2, "a", LockAction::WaitStart));
        builder
    }

    #[test]
    fn test_empty_graph_has_no_cycles() {
        let graph = WaitGraphBuilder::new().snapshot();
        assert!(detect_cycles(&graph).is_empty());
    }

    #[test]
    fn test_two_thread_cycle_found_once() {
        let graph = two_thread_deadlock().snapshot();
        let cycles = detect_cycles(&graph);

        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0], vec![1, 2]);
    }

    #[test]
    fn test_chain_is_acyclic() {
        let mut builder = WaitGraphBuilder::new();
        builder.record_event(&event(2, "a", LockAction::Acquire));
        builder.record_event(&event(3, "b", LockAction::Acquire));
        builder.record_event(&event(1, "a", LockAction::WaitStart));
        builder.record_event(&event(2, "b", LockAction::WaitStart));

        let graph = builder.snapshot();
        assert_eq!(graph.edge_count(), 2);
        assert!(detect_cycles(&graph).is_empty());
    }

    #[test]
    fn test_three_thread_cycle_canonical_rotation() {
        let mut builder = WaitGraphBuilder::new();
        builder.record_event(&event(5, "a", LockAction::Acquire));
        builder.record_event(&event(3, "b", LockAction::Acquire));
        builder.record_event(&event(9, "c", LockAction::Acquire));
        // 5 waits on b (held by 3), 3 waits on c (held by 9), 9 waits on a (held by 5).
        builder.record_event(&event(5, "b", LockAction::WaitStart));
        builder.record_event(&event(3, "c", LockAction::WaitStart));
        builder.record_event(&event(9, "a", LockAction::WaitStart));

        let cycles = detect_cycles(&builder.snapshot());
        assert_eq!(cycles.len(), 1);
        // Rotated to begin at the minimum thread id.
        assert_eq!(cycles[0], vec![3, 9, 5]);
    }

    #[test]
    fn test_cycle_plus_dangling_waiter() {
        let mut builder = two_thread_deadlock();
        // Thread 7 waits on a lock inside the cycle but is not part of it.
        builder.record_event(&event(7, "a", LockAction::WaitStart));

        let cycles = detect_cycles(&builder.snapshot());
        assert_eq!(cycles.len(), 1);
        assert!(!cycles[0].contains(&7));
    }

    #[test]
    fn test_detection_is_idempotent() {
        let builder = two_thread_deadlock();
        let first = detect_cycles(&builder.snapshot());
        let second = detect_cycles(&builder.snapshot());
        assert_eq!(first, second);
    }
}
