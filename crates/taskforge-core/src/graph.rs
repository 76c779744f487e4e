//! Dependency graph: a DAG of task→task edges, mutated atomically under a
//! single graph-wide lock.

use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct DependencyNode {
    pub task_id: u64,
    pub dependencies: HashSet<u64>,
    pub dependents: HashSet<u64>,
    pub completed: bool,
    pub failed: bool,
    pub completion_time: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl DependencyNode {
    fn new(task_id: u64) -> Self {
        Self {
            task_id,
            dependencies: HashSet::new(),
            dependents: HashSet::new(),
            completed: false,
            failed: false,
            completion_time: None,
            failure_reason: None,
        }
    }

    fn resolved(&self) -> bool {
        self.completed && !self.failed
    }
}

/// Manages task dependencies and resolution. All operations are atomic
/// under a single internal mutex — see §5 of the design for why a single
/// lock is sufficient here (the graph is only ever touched from the main
/// event loop, never concurrently from background workers).
pub struct DependencyGraph {
    inner: Mutex<std::collections::HashMap<u64, DependencyNode>>,
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Idempotent: creates an empty node if one doesn't already exist.
    pub async fn add_task(&self, task_id: u64) {
        let mut nodes = self.inner.lock().await;
        nodes.entry(task_id).or_insert_with(|| DependencyNode::new(task_id));
    }

    /// "from depends on to". Rejects (returning `false`) if it would close a
    /// cycle, leaving the graph byte-for-byte unchanged.
    pub async fn add_edge(&self, from: u64, to: u64) -> bool {
        let mut nodes = self.inner.lock().await;
        nodes.entry(from).or_insert_with(|| DependencyNode::new(from));
        nodes.entry(to).or_insert_with(|| DependencyNode::new(to));

        if nodes[&from].dependencies.contains(&to) {
            return true; // already present — idempotent no-op
        }

        if Self::would_cycle(&nodes, from, to) {
            return false;
        }

        nodes.get_mut(&from).unwrap().dependencies.insert(to);
        nodes.get_mut(&to).unwrap().dependents.insert(from);
        true
    }

    /// DFS from `to` over outgoing (`dependencies`) edges looking for `from`.
    fn would_cycle(
        nodes: &std::collections::HashMap<u64, DependencyNode>,
        from: u64,
        to: u64,
    ) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![to];

        while let Some(current) = stack.pop() {
            if current == from {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(node) = nodes.get(&current) {
                stack.extend(node.dependencies.iter().copied());
            }
        }
        false
    }

    /// Marks `task_id` completed; returns the set of dependents whose
    /// remaining dependencies are now all resolved. Idempotent: a second
    /// call is a no-op returning an empty set.
    pub async fn mark_completed(&self, task_id: u64) -> Vec<u64> {
        let mut nodes = self.inner.lock().await;
        let Some(node) = nodes.get(&task_id) else {
            return Vec::new();
        };
        if node.completed {
            return Vec::new();
        }
        let dependents: Vec<u64> = node.dependents.iter().copied().collect();

        if let Some(node) = nodes.get_mut(&task_id) {
            node.completed = true;
            node.completion_time = Some(Utc::now());
        }

        let mut ready = Vec::new();
        for dep_id in dependents {
            if Self::all_resolved(&nodes, dep_id) {
                ready.push(dep_id);
            }
        }
        ready
    }

    /// Marks `task_id` failed; returns the set of direct dependents
    /// (blocked). Idempotent.
    pub async fn mark_failed(&self, task_id: u64, reason: impl Into<String>) -> Vec<u64> {
        let mut nodes = self.inner.lock().await;
        let Some(node) = nodes.get(&task_id) else {
            return Vec::new();
        };
        if node.failed {
            return Vec::new();
        }
        let blocked: Vec<u64> = node.dependents.iter().copied().collect();

        if let Some(node) = nodes.get_mut(&task_id) {
            node.failed = true;
            node.failure_reason = Some(reason.into());
        }
        blocked
    }

    pub async fn all_dependencies_resolved(&self, task_id: u64) -> bool {
        let nodes = self.inner.lock().await;
        Self::all_resolved(&nodes, task_id)
    }

    fn all_resolved(
        nodes: &std::collections::HashMap<u64, DependencyNode>,
        task_id: u64,
    ) -> bool {
        let Some(node) = nodes.get(&task_id) else {
            return true;
        };
        node.dependencies.iter().all(|dep_id| {
            nodes.get(dep_id).map(|d| d.resolved()).unwrap_or(false)
        })
    }

    /// Levels from a Kahn topological sort. Used only by diagnostics/tests.
    pub async fn execution_order(&self) -> Vec<Vec<u64>> {
        let nodes = self.inner.lock().await;
        let mut in_degree: std::collections::HashMap<u64, usize> = nodes
            .iter()
            .map(|(id, n)| (*id, n.dependencies.len()))
            .collect();

        let mut queue: VecDeque<u64> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut levels = Vec::new();
        while !queue.is_empty() {
            let mut level: Vec<u64> = queue.drain(..).collect();
            level.sort_unstable();
            let mut next = VecDeque::new();
            for task_id in &level {
                if let Some(node) = nodes.get(task_id) {
                    for dependent in &node.dependents {
                        let deg = in_degree.get_mut(dependent).unwrap();
                        *deg -= 1;
                        if *deg == 0 {
                            next.push_back(*dependent);
                        }
                    }
                }
            }
            levels.push(level);
            queue = next;
        }
        levels
    }

    pub async fn node(&self, task_id: u64) -> Option<DependencyNode> {
        self.inner.lock().await.get(&task_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_edge_rejects_cycles() {
        let g = DependencyGraph::new();
        assert!(g.add_edge(1, 2).await);
        assert!(!g.add_edge(2, 1).await);
        let node1 = g.node(1).await.unwrap();
        assert_eq!(node1.dependencies.len(), 1);
    }

    #[tokio::test]
    async fn add_edge_is_idempotent() {
        let g = DependencyGraph::new();
        assert!(g.add_edge(1, 2).await);
        assert!(g.add_edge(1, 2).await);
        let node1 = g.node(1).await.unwrap();
        assert_eq!(node1.dependencies.len(), 1);
    }

    #[tokio::test]
    async fn mark_completed_unblocks_dependent() {
        let g = DependencyGraph::new();
        g.add_edge(1, 2).await;
        g.add_edge(1, 3).await;
        assert!(!g.all_dependencies_resolved(1).await);

        let ready = g.mark_completed(2).await;
        assert!(ready.is_empty(), "1 still depends on 3");

        let ready = g.mark_completed(3).await;
        assert_eq!(ready, vec![1]);
        assert!(g.all_dependencies_resolved(1).await);
    }

    #[tokio::test]
    async fn mark_completed_is_idempotent() {
        let g = DependencyGraph::new();
        g.add_edge(1, 2).await;
        let ready = g.mark_completed(2).await;
        assert_eq!(ready, vec![1]);
        let ready_again = g.mark_completed(2).await;
        assert!(ready_again.is_empty());
    }

    #[tokio::test]
    async fn mark_failed_returns_blocked_dependents() {
        let g = DependencyGraph::new();
        g.add_edge(1, 2).await;
        let blocked = g.mark_failed(2, "boom").await;
        assert_eq!(blocked, vec![1]);
        assert!(!g.all_dependencies_resolved(1).await);
    }

    #[tokio::test]
    async fn execution_order_levels_leaves_first() {
        let g = DependencyGraph::new();
        g.add_edge(3, 1).await;
        g.add_edge(3, 2).await;
        g.add_edge(1, 2).await;
        let levels = g.execution_order().await;
        assert_eq!(levels[0], vec![2]);
        assert_eq!(levels[1], vec![1]);
        assert_eq!(levels[2], vec![3]);
    }
}
