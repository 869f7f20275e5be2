//! Dependency graph building and topological ordering over task nodes.
//!
//! Edges live on the nodes as parent ids. Everything here derives views from
//! that single edge list: the child map used for ordering, the parent and
//! child sets of one task, and the stable topological order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use weft_core::error::{Result, WeftError};

use crate::node::TaskNode;

/// Task id → ids of the tasks that depend on it, in task-list order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskGraph {
    ids: Vec<String>,
    children: HashMap<String, Vec<String>>,
}

impl TaskGraph {
    /// Build a graph from ids and `(parent, child)` edges.
    ///
    /// Ids that appear only in edges are appended after `ids`.
    pub fn from_edges<I>(ids: Vec<String>, edges: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut graph = Self {
            children: ids.iter().map(|id| (id.clone(), Vec::new())).collect(),
            ids,
        };
        for (parent, child) in edges {
            graph.ensure(&parent);
            graph.ensure(&child);
            graph.add_edge(&parent, child);
        }
        graph
    }

    /// All task ids, in task-list order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn children(&self, id: &str) -> &[String] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.children.values().map(Vec::len).sum()
    }

    fn ensure(&mut self, id: &str) {
        if !self.children.contains_key(id) {
            self.ids.push(id.to_string());
            self.children.insert(id.to_string(), Vec::new());
        }
    }

    fn add_edge(&mut self, parent: &str, child: String) {
        if let Some(children) = self.children.get_mut(parent) {
            if !children.contains(&child) {
                children.push(child);
            }
        }
    }
}

/// True if `child` depends on `parent`, either through the child's parent
/// list or through a not-yet-resolved declaration on the parent.
fn is_edge(parent: &TaskNode, child: &TaskNode) -> bool {
    child.parent_ids().iter().any(|p| p == parent.id())
        || parent.declared_child_ids().iter().any(|c| c == child.id())
}

/// Validate referential integrity and fold child declarations into the
/// children's parent lists.
///
/// Nothing is modified when a reference dangles. Calling this repeatedly
/// yields the same relationships as calling it once.
pub fn resolve_relationships(tasks: &mut [TaskNode]) -> Result<()> {
    let index: HashMap<String, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id().to_string(), i))
        .collect();

    for task in tasks.iter() {
        let referenced = task.parent_ids().iter().chain(task.declared_child_ids());
        for id in referenced {
            if !index.contains_key(id) {
                return Err(WeftError::DanglingReference {
                    task_id: task.id().to_string(),
                    missing_id: id.clone(),
                });
            }
        }
    }

    for i in 0..tasks.len() {
        let declared = tasks[i].take_declared_child_ids();
        if declared.is_empty() {
            continue;
        }
        let parent_id = tasks[i].id().to_string();
        for child_id in declared {
            tasks[index[&child_id]].add_parent(parent_id.clone());
        }
    }

    Ok(())
}

/// Child map over the live task list.
pub fn to_graph(tasks: &[TaskNode]) -> TaskGraph {
    let ids: Vec<String> = tasks.iter().map(|t| t.id().to_string()).collect();
    let edges = tasks.iter().flat_map(|parent| {
        tasks
            .iter()
            .filter(move |child| is_edge(parent, child))
            .map(move |child| (parent.id().to_string(), child.id().to_string()))
    });
    TaskGraph::from_edges(ids, edges)
}

/// Tasks the given task depends on, in task-list order.
pub fn parents_of<'a>(tasks: &'a [TaskNode], id: &str) -> Vec<&'a TaskNode> {
    let Some(node) = tasks.iter().find(|t| t.id() == id) else {
        return Vec::new();
    };
    tasks.iter().filter(|p| is_edge(p, node)).collect()
}

/// Tasks that depend on the given task, in task-list order.
pub fn children_of<'a>(tasks: &'a [TaskNode], id: &str) -> Vec<&'a TaskNode> {
    let Some(node) = tasks.iter().find(|t| t.id() == id) else {
        return Vec::new();
    };
    tasks.iter().filter(|c| is_edge(node, c)).collect()
}

/// Topological order of every task id in the graph.
///
/// Kahn's algorithm with a min-heap on task-list position: whenever several
/// tasks are ready, the one listed first goes first. Fails with
/// [`WeftError::Cycle`] naming the tasks that could not be ordered.
pub fn order_tasks(graph: &TaskGraph) -> Result<Vec<String>> {
    let position: HashMap<&str, usize> = graph
        .ids()
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; graph.len()];
    for id in graph.ids() {
        for child in graph.children(id) {
            if let Some(&c) = position.get(child.as_str()) {
                in_degree[c] += 1;
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(graph.len());
    while let Some(Reverse(i)) = ready.pop() {
        let id = &graph.ids()[i];
        order.push(id.clone());
        for child in graph.children(id) {
            if let Some(&c) = position.get(child.as_str()) {
                in_degree[c] -= 1;
                if in_degree[c] == 0 {
                    ready.push(Reverse(c));
                }
            }
        }
    }

    if order.len() < graph.len() {
        let ordered: HashSet<&str> = order.iter().map(String::as_str).collect();
        let task_ids = graph
            .ids()
            .iter()
            .filter(|id| !ordered.contains(id.as_str()))
            .cloned()
            .collect();
        return Err(WeftError::Cycle { task_ids });
    }

    Ok(order)
}
