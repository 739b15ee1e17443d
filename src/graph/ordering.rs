use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::algo::is_cyclic_directed;
use petgraph::graphmap::DiGraphMap;

use super::dependency_graph::Dependency;
use crate::task::TaskId;
use crate::tree::TaskTree;

/// Precedence between tasks as the scheduler sees it.
///
/// Edges come from three sources:
/// - every explicit dependency `p -> s`;
/// - `p -> d` for each descendant `d` of a summary successor `s`, so
///   children wait for their ancestor's predecessors;
/// - `child -> parent`, so a summary is placed after its children.
#[derive(Debug, Clone)]
pub struct OrderingGraph {
    graph: DiGraphMap<TaskId, ()>,
    ranks: HashMap<TaskId, usize>,
}

impl OrderingGraph {
    pub fn build<I>(tree: &TaskTree, dependencies: I) -> Self
    where
        I: IntoIterator<Item = Dependency>,
    {
        let mut graph = DiGraphMap::new();
        let mut ranks = HashMap::new();
        for (rank, &id) in tree.order().iter().enumerate() {
            if id == TaskId::ROOT {
                continue;
            }
            graph.add_node(id);
            ranks.insert(id, rank);
            if let Some(parent) = tree.parent(id).filter(|p| *p != TaskId::ROOT) {
                graph.add_edge(id, parent, ());
            }
        }
        for dep in dependencies {
            if !graph.contains_node(dep.predecessor) || !graph.contains_node(dep.successor) {
                continue;
            }
            graph.add_edge(dep.predecessor, dep.successor, ());
            for descendant in tree.descendants(dep.successor) {
                graph.add_edge(dep.predecessor, descendant, ());
            }
        }
        Self { graph, ranks }
    }

    pub fn is_cyclic(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.graph.contains_node(id)
    }

    /// `seeds` plus everything reachable from them.
    pub fn downstream(&self, seeds: impl IntoIterator<Item = TaskId>) -> HashSet<TaskId> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<TaskId> = seeds
            .into_iter()
            .filter(|id| self.graph.contains_node(*id))
            .collect();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            queue.extend(
                self.graph
                    .neighbors_directed(id, Direction::Outgoing)
                    .filter(|next| !seen.contains(next)),
            );
        }
        seen
    }

    /// Kahn's algorithm over the subgraph induced by `subset`.
    ///
    /// Ties are broken by pre-order rank, so the result is stable across
    /// runs. Returns `None` if the subgraph contains a cycle.
    pub fn topological_order(&self, subset: &HashSet<TaskId>) -> Option<Vec<TaskId>> {
        let mut indegree: HashMap<TaskId, usize> = subset
            .iter()
            .filter(|id| self.graph.contains_node(**id))
            .map(|&id| {
                let count = self
                    .graph
                    .neighbors_directed(id, Direction::Incoming)
                    .filter(|pred| subset.contains(pred))
                    .count();
                (id, count)
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<(usize, TaskId)>> = indegree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(&id, _)| Reverse((self.rank(id), id)))
            .collect();

        let mut order = Vec::with_capacity(indegree.len());
        while let Some(Reverse((_, id))) = ready.pop() {
            order.push(id);
            for next in self.graph.neighbors_directed(id, Direction::Outgoing) {
                if let Some(count) = indegree.get_mut(&next) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(Reverse((self.rank(next), next)));
                    }
                }
            }
        }

        (order.len() == indegree.len()).then_some(order)
    }

    /// Topological order over every task.
    pub fn full_order(&self) -> Option<Vec<TaskId>> {
        let all: HashSet<TaskId> = self.graph.nodes().collect();
        self.topological_order(&all)
    }

    fn rank(&self, id: TaskId) -> usize {
        self.ranks.get(&id).copied().unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    #[test]
    fn ties_follow_tree_order() {
        let mut tree = TaskTree::new();
        let a = tree.insert(TaskId::ROOT, None, Task::new("a", 0)).unwrap();
        let b = tree.insert(TaskId::ROOT, None, Task::new("b", 0)).unwrap();
        let c = tree.insert(TaskId::ROOT, Some(0), Task::new("c", 0)).unwrap();

        let ordering = OrderingGraph::build(&tree, [Dependency::finish_to_start(b, c)]);
        assert_eq!(ordering.full_order(), Some(vec![a, b, c]));
    }

    #[test]
    fn summaries_follow_children_and_children_follow_summary_predecessors() {
        let mut tree = TaskTree::new();
        let p = tree.insert(TaskId::ROOT, None, Task::new("p", 0)).unwrap();
        let s = tree.insert(TaskId::ROOT, None, Task::new("s", 0)).unwrap();
        let s1 = tree.insert(s, None, Task::new("s1", 0)).unwrap();
        let s2 = tree.insert(s, None, Task::new("s2", 0)).unwrap();

        let ordering = OrderingGraph::build(&tree, [Dependency::finish_to_start(p, s)]);
        let order = ordering.full_order().unwrap();
        let pos = |id| order.iter().position(|x| *x == id).unwrap();
        assert!(pos(p) < pos(s1));
        assert!(pos(s1) < pos(s));
        assert!(pos(s2) < pos(s));

        let downstream = ordering.downstream([p]);
        assert!(downstream.contains(&s1) && downstream.contains(&s));
    }
}
