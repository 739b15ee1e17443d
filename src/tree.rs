//! Task node store.
//!
//! Tasks live in an arena of slots addressed through an id index. Parent and
//! child links are ids, never references, so the tree can be restructured
//! without aliasing. A flat pre-order ordering is kept alongside and gives
//! every task a rank used to break scheduling ties deterministically.

use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};

use crate::error::{EngineResult, MoveError, StructuralError, ValidationError};
use crate::task::{ScheduleState, Task, TaskId};
use crate::task_validation;

#[derive(Debug, Clone)]
struct Node {
    task: Task,
    parent: Option<TaskId>,
    children: Vec<TaskId>,
}

/// A task with its position in the tree, as handed over by loaders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task: Task,
    pub parent: TaskId,
    pub position: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RebuildStats {
    pub indexed: usize,
    pub pruned: usize,
}

#[derive(Debug, Clone)]
pub struct TaskTree {
    slots: Vec<Option<Node>>,
    index: HashMap<TaskId, usize>,
    order: Vec<TaskId>,
    rank: HashMap<TaskId, usize>,
    next_id: u32,
}

impl Default for TaskTree {
    fn default() -> Self {
        Self::new()
    }
}

fn root_task() -> Task {
    let mut root = Task::new("root", 0);
    root.id = TaskId::ROOT;
    root.state = ScheduleState::Clean;
    root
}

impl TaskTree {
    pub fn new() -> Self {
        let mut tree = Self {
            slots: vec![Some(Node {
                task: root_task(),
                parent: None,
                children: Vec::new(),
            })],
            index: HashMap::new(),
            order: Vec::new(),
            rank: HashMap::new(),
            next_id: 1,
        };
        tree.rebuild();
        tree
    }

    /// Builds a whole tree at once, e.g. after loading a project.
    ///
    /// Records may come in any order; siblings are sorted by `position`.
    pub fn from_records<I>(records: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = TaskRecord>,
    {
        let records: Vec<TaskRecord> = records.into_iter().collect();
        task_validation::validate_task_collection(records.iter().map(|r| &r.task))?;

        let mut tree = Self::new();
        let mut placed: Vec<(TaskId, usize, TaskId)> = Vec::with_capacity(records.len());
        for record in records {
            let id = record.task.id;
            if id == TaskId::ROOT {
                return Err(ValidationError::DuplicateId(id).into());
            }
            placed.push((record.parent, record.position, id));
            tree.slots.push(Some(Node {
                task: record.task,
                parent: Some(record.parent),
                children: Vec::new(),
            }));
            tree.index.insert(id, tree.slots.len() - 1);
            tree.next_id = tree.next_id.max(id.0 + 1);
        }

        placed.sort_by_key(|(parent, position, _)| (*parent, *position));
        for (parent, _, child) in placed {
            let node = tree
                .node_mut(parent)
                .ok_or(StructuralError::UnknownTask(parent))?;
            node.children.push(child);
        }

        let loaded: Vec<TaskId> = tree.index.keys().copied().collect();
        let stats = tree.rebuild();
        if stats.indexed != loaded.len() {
            // Unreachable records sit on a parent cycle.
            let orphan = loaded
                .into_iter()
                .find(|id| !tree.index.contains_key(id))
                .unwrap_or(TaskId::ROOT);
            return Err(MoveError::WouldCreateCycle {
                task: orphan,
                new_parent: orphan,
            }
            .into());
        }
        Ok(tree)
    }

    /// Every non-root task with its parent and sibling position, in pre-order.
    pub fn records(&self) -> Vec<TaskRecord> {
        self.order
            .iter()
            .filter(|id| **id != TaskId::ROOT)
            .filter_map(|id| {
                let node = self.node(*id)?;
                let parent = node.parent?;
                let position = self.children(parent).iter().position(|c| c == id)?;
                Some(TaskRecord {
                    task: node.task.clone(),
                    parent,
                    position,
                })
            })
            .collect()
    }

    pub fn root(&self) -> TaskId {
        TaskId::ROOT
    }

    /// Number of tasks, not counting the root.
    pub fn len(&self) -> usize {
        self.index.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.index.contains_key(&id)
    }

    fn node(&self, id: TaskId) -> Option<&Node> {
        self.index
            .get(&id)
            .and_then(|slot| self.slots.get(*slot))
            .and_then(|slot| slot.as_ref())
    }

    fn node_mut(&mut self, id: TaskId) -> Option<&mut Node> {
        let slot = *self.index.get(&id)?;
        self.slots.get_mut(slot).and_then(|slot| slot.as_mut())
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.node(id).map(|node| &node.task)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.node_mut(id).map(|node| &mut node.task)
    }

    pub fn task(&self, id: TaskId) -> Result<&Task, StructuralError> {
        self.get(id).ok_or(StructuralError::UnknownTask(id))
    }

    pub fn parent(&self, id: TaskId) -> Option<TaskId> {
        self.node(id).and_then(|node| node.parent)
    }

    pub fn children(&self, id: TaskId) -> &[TaskId] {
        self.node(id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_children(&self, id: TaskId) -> bool {
        !self.children(id).is_empty()
    }

    /// Ancestors from the parent upwards, excluding the synthetic root.
    pub fn ancestors(&self, id: TaskId) -> Vec<TaskId> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(parent) = current {
            if parent == TaskId::ROOT {
                break;
            }
            out.push(parent);
            current = self.parent(parent);
        }
        out
    }

    /// Strict descendants in pre-order.
    pub fn descendants(&self, id: TaskId) -> Vec<TaskId> {
        let mut out = Vec::new();
        let mut stack: Vec<TaskId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// `true` when `ancestor` lies strictly above `id`.
    pub fn is_ancestor(&self, ancestor: TaskId, id: TaskId) -> bool {
        let mut current = self.parent(id);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.parent(parent);
        }
        false
    }

    pub fn depth(&self, id: TaskId) -> usize {
        let mut depth = 0;
        let mut current = self.parent(id);
        while let Some(parent) = current {
            depth += 1;
            current = self.parent(parent);
        }
        depth
    }

    /// Flat pre-order of the whole tree, root first.
    pub fn order(&self) -> &[TaskId] {
        &self.order
    }

    pub fn rank(&self, id: TaskId) -> Option<usize> {
        self.rank.get(&id).copied()
    }

    /// Non-root tasks in pre-order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.order
            .iter()
            .skip(1)
            .filter_map(|id| self.get(*id))
    }

    pub fn insert(
        &mut self,
        parent: TaskId,
        position: Option<usize>,
        mut task: Task,
    ) -> EngineResult<TaskId> {
        let len = self
            .node(parent)
            .map(|node| node.children.len())
            .ok_or(StructuralError::UnknownTask(parent))?;
        let position = position.unwrap_or(len);
        if position > len {
            return Err(StructuralError::PositionOutOfRange {
                parent,
                position,
                len,
            }
            .into());
        }

        let id = TaskId(self.next_id);
        task.id = id;
        task_validation::validate_task(&task)?;
        self.next_id += 1;

        self.slots.push(Some(Node {
            task,
            parent: Some(parent),
            children: Vec::new(),
        }));
        self.index.insert(id, self.slots.len() - 1);
        if let Some(node) = self.node_mut(parent) {
            node.children.insert(position, id);
        }
        self.reorder();
        Ok(id)
    }

    /// Removes a task with its whole subtree; returns the removed ids in pre-order.
    pub fn remove(&mut self, id: TaskId) -> Result<Vec<TaskId>, StructuralError> {
        if id == TaskId::ROOT {
            return Err(StructuralError::RootImmutable);
        }
        let parent = self
            .node(id)
            .ok_or(StructuralError::UnknownTask(id))?
            .parent;

        let mut removed = vec![id];
        removed.extend(self.descendants(id));

        if let Some(parent) = parent.and_then(|p| self.node_mut(p)) {
            parent.children.retain(|child| *child != id);
        }
        for gone in &removed {
            if let Some(slot) = self.index.remove(gone) {
                self.slots[slot] = None;
            }
        }
        self.reorder();
        Ok(removed)
    }

    /// Validates a move without applying it.
    pub fn check_move(
        &self,
        id: TaskId,
        new_parent: TaskId,
        sibling: Option<TaskId>,
    ) -> Result<(), StructuralError> {
        if id == TaskId::ROOT {
            return Err(StructuralError::RootImmutable);
        }
        self.task(id)?;
        self.task(new_parent)?;
        if new_parent == id || self.is_ancestor(id, new_parent) {
            return Err(MoveError::WouldCreateCycle {
                task: id,
                new_parent,
            }
            .into());
        }
        if let Some(sibling) = sibling {
            if sibling == id || self.parent(sibling) != Some(new_parent) {
                return Err(MoveError::InvalidPosition {
                    sibling,
                    parent: new_parent,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Moves `id` under `new_parent`, next to `sibling`.
    ///
    /// Without a sibling the task becomes the first child when `before` is
    /// set and the last child otherwise.
    pub fn move_task(
        &mut self,
        id: TaskId,
        new_parent: TaskId,
        sibling: Option<TaskId>,
        before: bool,
    ) -> Result<(), StructuralError> {
        self.check_move(id, new_parent, sibling)?;

        if let Some(old_parent) = self.parent(id).and_then(|p| self.node_mut(p)) {
            old_parent.children.retain(|child| *child != id);
        }
        if let Some(node) = self.node_mut(id) {
            node.parent = Some(new_parent);
        }
        if let Some(parent) = self.node_mut(new_parent) {
            let position = match sibling {
                Some(sibling) => {
                    let at = parent
                        .children
                        .iter()
                        .position(|child| *child == sibling)
                        .unwrap_or(parent.children.len());
                    if before { at } else { at + 1 }
                }
                None if before => 0,
                None => parent.children.len(),
            };
            parent.children.insert(position, id);
        }
        self.reorder();
        Ok(())
    }

    /// Deterministic pre-order walk starting at `start`.
    ///
    /// The walk borrows the tree immutably, so a visitor can never mutate the
    /// structure it is walking. Returning `ControlFlow::Break` stops the walk.
    pub fn traverse<F>(&self, start: TaskId, mut visit: F) -> ControlFlow<()>
    where
        F: FnMut(&Task, usize) -> ControlFlow<()>,
    {
        let mut stack = vec![(start, 0)];
        while let Some((id, depth)) = stack.pop() {
            let Some(node) = self.node(id) else {
                continue;
            };
            visit(&node.task, depth)?;
            stack.extend(node.children.iter().rev().map(|child| (*child, depth + 1)));
        }
        ControlFlow::Continue(())
    }

    /// Recomputes the id index and flat ordering from the tree structure alone.
    ///
    /// Slots no longer reachable from the root are dropped.
    pub fn rebuild(&mut self) -> RebuildStats {
        let mut by_id: HashMap<TaskId, usize> = HashMap::new();
        for (slot, node) in self.slots.iter().enumerate() {
            if let Some(node) = node {
                by_id.insert(node.task.id, slot);
            }
        }

        let mut index = HashMap::with_capacity(by_id.len());
        let mut seen = HashSet::new();
        let mut stack = vec![TaskId::ROOT];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(&slot) = by_id.get(&id) else {
                continue;
            };
            index.insert(id, slot);
            if let Some(node) = self.slots[slot].as_ref() {
                stack.extend(node.children.iter().rev().copied());
            }
        }

        let mut pruned = 0;
        for (id, slot) in by_id {
            if !index.contains_key(&id) {
                self.slots[slot] = None;
                pruned += 1;
            }
        }
        for slot in self.slots.iter_mut().flatten() {
            slot.children.retain(|child| index.contains_key(child));
        }

        self.index = index;
        self.reorder();
        RebuildStats {
            indexed: self.index.len(),
            pruned,
        }
    }

    fn reorder(&mut self) {
        let mut order = Vec::with_capacity(self.index.len());
        let mut stack = vec![TaskId::ROOT];
        while let Some(id) = stack.pop() {
            let Some(node) = self.node(id) else {
                continue;
            };
            order.push(id);
            stack.extend(node.children.iter().rev().copied());
        }
        self.rank = order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        self.order = order;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with(names: &[&str]) -> (TaskTree, Vec<TaskId>) {
        let mut tree = TaskTree::new();
        let ids = names
            .iter()
            .map(|name| tree.insert(TaskId::ROOT, None, Task::new(*name, 0)).unwrap())
            .collect();
        (tree, ids)
    }

    #[test]
    fn insert_respects_position() {
        let (mut tree, ids) = tree_with(&["a", "b"]);
        let first = tree.insert(TaskId::ROOT, Some(0), Task::new("first", 0)).unwrap();
        assert_eq!(tree.children(TaskId::ROOT), &[first, ids[0], ids[1]]);
        assert!(matches!(
            tree.insert(TaskId::ROOT, Some(9), Task::new("late", 0)),
            Err(crate::error::EngineError::Structural(
                StructuralError::PositionOutOfRange { .. }
            ))
        ));
    }

    #[test]
    fn move_before_and_after_sibling() {
        let (mut tree, ids) = tree_with(&["a", "b", "c"]);
        tree.move_task(ids[2], TaskId::ROOT, Some(ids[0]), true).unwrap();
        assert_eq!(tree.children(TaskId::ROOT), &[ids[2], ids[0], ids[1]]);
        tree.move_task(ids[2], TaskId::ROOT, Some(ids[1]), false).unwrap();
        assert_eq!(tree.children(TaskId::ROOT), &[ids[0], ids[1], ids[2]]);
        tree.move_task(ids[1], ids[0], None, false).unwrap();
        assert_eq!(tree.children(ids[0]), &[ids[1]]);
        assert_eq!(tree.order(), &[TaskId::ROOT, ids[0], ids[1], ids[2]]);
    }

    #[test]
    fn move_under_descendant_is_rejected() {
        let (mut tree, ids) = tree_with(&["a"]);
        let child = tree.insert(ids[0], None, Task::new("child", 0)).unwrap();
        let grandchild = tree.insert(child, None, Task::new("grandchild", 0)).unwrap();
        let before = tree.records();

        let err = tree.move_task(ids[0], grandchild, None, false).unwrap_err();
        assert_eq!(
            err,
            StructuralError::Move(MoveError::WouldCreateCycle {
                task: ids[0],
                new_parent: grandchild
            })
        );
        assert_eq!(
            tree.move_task(ids[0], ids[0], None, false).unwrap_err(),
            StructuralError::Move(MoveError::WouldCreateCycle {
                task: ids[0],
                new_parent: ids[0]
            })
        );
        assert_eq!(tree.records(), before);
    }

    #[test]
    fn move_with_foreign_sibling_is_invalid_position() {
        let (mut tree, ids) = tree_with(&["a", "b"]);
        let nested = tree.insert(ids[0], None, Task::new("nested", 0)).unwrap();
        let err = tree
            .move_task(ids[1], TaskId::ROOT, Some(nested), true)
            .unwrap_err();
        assert_eq!(
            err,
            StructuralError::Move(MoveError::InvalidPosition {
                sibling: nested,
                parent: TaskId::ROOT
            })
        );
    }

    #[test]
    fn remove_cascades_and_rebuild_is_noop() {
        let (mut tree, ids) = tree_with(&["summary", "other"]);
        let child = tree.insert(ids[0], None, Task::new("child", 0)).unwrap();
        let leaf = tree.insert(child, None, Task::new("leaf", 0)).unwrap();

        let removed = tree.remove(ids[0]).unwrap();
        assert_eq!(removed, vec![ids[0], child, leaf]);
        assert!(!tree.contains(leaf));
        assert_eq!(tree.len(), 1);

        let order = tree.order().to_vec();
        let stats = tree.rebuild();
        assert_eq!(stats.pruned, 0);
        assert_eq!(stats.indexed, 2);
        assert_eq!(tree.order(), order.as_slice());
        assert_eq!(tree.rebuild(), stats);
    }

    #[test]
    fn traverse_is_preorder_and_restartable() {
        let (mut tree, ids) = tree_with(&["a", "b"]);
        let a1 = tree.insert(ids[0], None, Task::new("a1", 0)).unwrap();
        let mut seen = Vec::new();
        let _ = tree.traverse(TaskId::ROOT, |task, depth| {
            seen.push((task.id, depth));
            ControlFlow::Continue(())
        });
        assert_eq!(
            seen,
            vec![(TaskId::ROOT, 0), (ids[0], 1), (a1, 2), (ids[1], 1)]
        );

        let mut first_two = Vec::new();
        let flow = tree.traverse(TaskId::ROOT, |task, _| {
            first_two.push(task.id);
            if first_two.len() == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert!(flow.is_break());
        assert_eq!(first_two, vec![TaskId::ROOT, ids[0]]);
    }

    #[test]
    fn from_records_rejects_parent_cycles() {
        let mut a = Task::new("a", 0);
        a.id = TaskId(1);
        let mut b = Task::new("b", 0);
        b.id = TaskId(2);
        let records = vec![
            TaskRecord {
                task: a,
                parent: TaskId(2),
                position: 0,
            },
            TaskRecord {
                task: b,
                parent: TaskId(1),
                position: 0,
            },
        ];
        assert!(TaskTree::from_records(records).is_err());
    }

    #[test]
    fn records_round_trip() {
        let (mut tree, ids) = tree_with(&["a", "b"]);
        tree.insert(ids[1], None, Task::new("b1", 0)).unwrap();
        let rebuilt = TaskTree::from_records(tree.records()).unwrap();
        assert_eq!(rebuilt.order(), tree.order());
        let next = TaskTree::from_records(tree.records())
            .unwrap()
            .insert(TaskId::ROOT, None, Task::new("c", 0))
            .unwrap();
        assert_eq!(next, TaskId(4));
    }
}
