//! Dependency graph and scheduling order.
//!
//! - [`dependency_graph`] stores the explicit predecessor/successor edges.
//! - [`ordering`] overlays those edges with tree containment and produces the
//!   deterministic topological order the scheduler walks.

pub mod dependency_graph;
pub mod ordering;

pub use dependency_graph::{Dependency, DependencyGraph, RelationKind};
pub use ordering::OrderingGraph;
