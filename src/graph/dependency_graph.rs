use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use super::ordering::OrderingGraph;
use crate::error::{DependencyError, StructuralError};
use crate::task::TaskId;
use crate::tree::TaskTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    #[default]
    FinishToStart,
    StartToStart,
    FinishToFinish,
    StartToFinish,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::FinishToStart => "fs",
            RelationKind::StartToStart => "ss",
            RelationKind::FinishToFinish => "ff",
            RelationKind::StartToFinish => "sf",
        }
    }

    /// Whether the relation reads the predecessor's start (rather than finish).
    pub fn from_predecessor_start(&self) -> bool {
        matches!(self, RelationKind::StartToStart | RelationKind::StartToFinish)
    }

    /// Whether the relation constrains the successor's finish (rather than start).
    pub fn constrains_successor_finish(&self) -> bool {
        matches!(self, RelationKind::FinishToFinish | RelationKind::StartToFinish)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fs" | "finish_to_start" => Ok(RelationKind::FinishToStart),
            "ss" | "start_to_start" => Ok(RelationKind::StartToStart),
            "ff" | "finish_to_finish" => Ok(RelationKind::FinishToFinish),
            "sf" | "start_to_finish" => Ok(RelationKind::StartToFinish),
            other => Err(format!("unknown relation '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub predecessor: TaskId,
    pub successor: TaskId,
    #[serde(default)]
    pub relation: RelationKind,
    /// Working seconds; negative values are leads.
    #[serde(default)]
    pub lag: i64,
}

impl Dependency {
    pub fn new(predecessor: TaskId, successor: TaskId, relation: RelationKind, lag: i64) -> Self {
        Self {
            predecessor,
            successor,
            relation,
            lag,
        }
    }

    pub fn finish_to_start(predecessor: TaskId, successor: TaskId) -> Self {
        Self::new(predecessor, successor, RelationKind::FinishToStart, 0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: StableDiGraph<TaskId, Dependency>,
    id_to_index: HashMap<TaskId, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn node_for(&mut self, id: TaskId) -> NodeIndex {
        if let Some(&ix) = self.id_to_index.get(&id) {
            return ix;
        }
        let ix = self.graph.add_node(id);
        self.id_to_index.insert(id, ix);
        ix
    }

    /// Checks a prospective edge against the tree and the existing edges.
    pub fn validate_new(&self, tree: &TaskTree, dependency: &Dependency) -> Result<(), StructuralError> {
        let Dependency {
            predecessor: pred,
            successor: succ,
            ..
        } = *dependency;
        for id in [pred, succ] {
            if id == TaskId::ROOT {
                return Err(StructuralError::RootImmutable);
            }
            tree.task(id)?;
        }
        if pred == succ {
            return Err(DependencyError::SelfLink(pred).into());
        }
        if tree.is_ancestor(pred, succ) || tree.is_ancestor(succ, pred) {
            return Err(DependencyError::AncestorLink { pred, succ }.into());
        }
        if self.dependency(pred, succ).is_some() {
            return Err(DependencyError::Duplicate { pred, succ }.into());
        }
        let ordering = OrderingGraph::build(tree, self.edges().chain(std::iter::once(*dependency)));
        if ordering.is_cyclic() {
            return Err(DependencyError::Cyclic { pred, succ }.into());
        }
        Ok(())
    }

    /// Adds an edge after checking it keeps the ordering graph acyclic.
    pub fn add_dependency(
        &mut self,
        tree: &TaskTree,
        dependency: Dependency,
    ) -> Result<(), StructuralError> {
        self.validate_new(tree, &dependency)?;
        self.insert_unchecked(dependency);
        Ok(())
    }

    /// Inserts an edge without validation; loaders re-check the whole graph.
    pub(crate) fn insert_unchecked(&mut self, dependency: Dependency) {
        let u = self.node_for(dependency.predecessor);
        let v = self.node_for(dependency.successor);
        self.graph.add_edge(u, v, dependency);
    }

    pub fn remove_dependency(
        &mut self,
        pred: TaskId,
        succ: TaskId,
    ) -> Result<Dependency, DependencyError> {
        let not_found = || DependencyError::NotFound { pred, succ };
        let (Some(&u), Some(&v)) = (self.id_to_index.get(&pred), self.id_to_index.get(&succ))
        else {
            return Err(not_found());
        };
        let edge = self.graph.find_edge(u, v).ok_or_else(not_found)?;
        self.graph.remove_edge(edge).ok_or_else(not_found)
    }

    pub fn dependency(&self, pred: TaskId, succ: TaskId) -> Option<&Dependency> {
        let u = *self.id_to_index.get(&pred)?;
        let v = *self.id_to_index.get(&succ)?;
        let edge = self.graph.find_edge(u, v)?;
        self.graph.edge_weight(edge)
    }

    fn directed(&self, id: TaskId, direction: Direction) -> Vec<&Dependency> {
        let Some(&ix) = self.id_to_index.get(&id) else {
            return Vec::new();
        };
        let mut deps: Vec<&Dependency> = self
            .graph
            .edges_directed(ix, direction)
            .map(|edge| edge.weight())
            .collect();
        deps.sort_by_key(|dep| (dep.predecessor, dep.successor));
        deps
    }

    /// Edges ending at `id`.
    pub fn predecessors(&self, id: TaskId) -> Vec<&Dependency> {
        self.directed(id, Direction::Incoming)
    }

    /// Edges starting at `id`.
    pub fn successors(&self, id: TaskId) -> Vec<&Dependency> {
        self.directed(id, Direction::Outgoing)
    }

    /// All edges ordered by (predecessor, successor).
    pub fn edges(&self) -> impl Iterator<Item = Dependency> + '_ {
        let mut deps: Vec<Dependency> = self.graph.edge_weights().copied().collect();
        deps.sort_by_key(|dep| (dep.predecessor, dep.successor));
        deps.into_iter()
    }

    /// Drops every edge touching one of `ids`; returns what was removed.
    pub fn remove_task_edges(&mut self, ids: &[TaskId]) -> Vec<Dependency> {
        let mut removed = Vec::new();
        for id in ids {
            if let Some(ix) = self.id_to_index.remove(id) {
                let edges: Vec<_> = self
                    .graph
                    .edges_directed(ix, Direction::Incoming)
                    .chain(self.graph.edges_directed(ix, Direction::Outgoing))
                    .map(|edge| edge.id())
                    .collect();
                for edge in edges {
                    if let Some(dep) = self.graph.remove_edge(edge) {
                        removed.push(dep);
                    }
                }
                self.graph.remove_node(ix);
            }
        }
        removed.sort_by_key(|dep| (dep.predecessor, dep.successor));
        removed
    }

    /// First edge that would become invalid if the tree looked like `tree`.
    pub fn first_conflict(&self, tree: &TaskTree) -> Option<Dependency> {
        if let Some(dep) = self.edges().find(|dep| {
            tree.is_ancestor(dep.predecessor, dep.successor)
                || tree.is_ancestor(dep.successor, dep.predecessor)
        }) {
            return Some(dep);
        }
        let ordering = OrderingGraph::build(tree, self.edges());
        if ordering.is_cyclic() {
            return self.edges().next();
        }
        None
    }

    /// Every edge references a task present in `tree`.
    pub fn check_against(&self, tree: &TaskTree) -> Result<(), StructuralError> {
        for dep in self.edges() {
            if !tree.contains(dep.predecessor) || !tree.contains(dep.successor) {
                return Err(StructuralError::DanglingDependency {
                    pred: dep.predecessor,
                    succ: dep.successor,
                });
            }
        }
        if let Some(dep) = self.first_conflict(tree) {
            return Err(DependencyError::Cyclic {
                pred: dep.predecessor,
                succ: dep.successor,
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    fn chain() -> (TaskTree, TaskId, TaskId, TaskId) {
        let mut tree = TaskTree::new();
        let a = tree.insert(TaskId::ROOT, None, Task::new("a", 0)).unwrap();
        let b = tree.insert(TaskId::ROOT, None, Task::new("b", 0)).unwrap();
        let c = tree.insert(TaskId::ROOT, None, Task::new("c", 0)).unwrap();
        (tree, a, b, c)
    }

    #[test]
    fn rejects_cycle_and_keeps_graph() {
        let (tree, a, b, c) = chain();
        let mut graph = DependencyGraph::new();
        graph.add_dependency(&tree, Dependency::finish_to_start(a, b)).unwrap();
        graph.add_dependency(&tree, Dependency::finish_to_start(b, c)).unwrap();

        let err = graph
            .add_dependency(&tree, Dependency::finish_to_start(c, a))
            .unwrap_err();
        assert_eq!(
            err,
            StructuralError::Dependency(DependencyError::Cyclic { pred: c, succ: a })
        );
        assert_eq!(graph.len(), 2);
        assert!(graph.dependency(c, a).is_none());
    }

    #[test]
    fn rejects_duplicates_self_links_and_ancestors() {
        let (mut tree, a, b, _) = chain();
        let a1 = tree.insert(a, None, Task::new("a1", 0)).unwrap();
        let mut graph = DependencyGraph::new();
        graph.add_dependency(&tree, Dependency::finish_to_start(a, b)).unwrap();

        assert!(matches!(
            graph.add_dependency(
                &tree,
                Dependency::new(a, b, RelationKind::StartToStart, 0)
            ),
            Err(StructuralError::Dependency(DependencyError::Duplicate { .. }))
        ));
        assert!(matches!(
            graph.add_dependency(&tree, Dependency::finish_to_start(b, b)),
            Err(StructuralError::Dependency(DependencyError::SelfLink(_)))
        ));
        assert!(matches!(
            graph.add_dependency(&tree, Dependency::finish_to_start(a1, a)),
            Err(StructuralError::Dependency(DependencyError::AncestorLink { .. }))
        ));
        assert!(matches!(
            graph.add_dependency(&tree, Dependency::finish_to_start(a, TaskId(99))),
            Err(StructuralError::UnknownTask(TaskId(99)))
        ));
    }

    #[test]
    fn cycle_through_summary_children_is_detected() {
        let (mut tree, a, b, _) = chain();
        let a1 = tree.insert(a, None, Task::new("a1", 0)).unwrap();
        let mut graph = DependencyGraph::new();
        graph.add_dependency(&tree, Dependency::finish_to_start(a1, b)).unwrap();
        // b -> a forces a1 after b, which already follows a1.
        assert!(matches!(
            graph.add_dependency(&tree, Dependency::finish_to_start(b, a)),
            Err(StructuralError::Dependency(DependencyError::Cyclic { .. }))
        ));
    }

    #[test]
    fn remove_task_edges_drops_both_directions() {
        let (tree, a, b, c) = chain();
        let mut graph = DependencyGraph::new();
        graph.add_dependency(&tree, Dependency::finish_to_start(a, b)).unwrap();
        graph.add_dependency(&tree, Dependency::finish_to_start(b, c)).unwrap();
        let removed = graph.remove_task_edges(&[b]);
        assert_eq!(removed.len(), 2);
        assert!(graph.is_empty());
        assert_eq!(
            graph.remove_dependency(a, b),
            Err(DependencyError::NotFound { pred: a, succ: b })
        );
    }

    #[test]
    fn removing_a_missing_edge_between_known_tasks_fails() {
        let (tree, a, b, c) = chain();
        let mut graph = DependencyGraph::new();
        graph.add_dependency(&tree, Dependency::finish_to_start(a, b)).unwrap();
        graph.add_dependency(&tree, Dependency::finish_to_start(b, c)).unwrap();

        assert_eq!(
            graph.remove_dependency(c, a),
            Err(DependencyError::NotFound { pred: c, succ: a })
        );
        assert_eq!(
            graph.remove_dependency(a, b),
            Ok(Dependency::finish_to_start(a, b))
        );
        assert_eq!(
            graph.remove_dependency(a, b),
            Err(DependencyError::NotFound { pred: a, succ: b })
        );
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn relation_parses_short_names() {
        assert_eq!("SS".parse::<RelationKind>(), Ok(RelationKind::StartToStart));
        assert!("xx".parse::<RelationKind>().is_err());
    }
}
