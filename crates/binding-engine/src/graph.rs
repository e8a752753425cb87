//! Bidirectional dependency index
//!
//! Nodes are top-level properties (`input1.value`). Each node owns a set of
//! dependency paths, which may point deeper (`table1.data.0.name`) or at a
//! whole entity. The reverse index is bucketed by the dependency's entity
//! and top-level property so `dependents_of` only inspects candidates that
//! can overlap.

use std::collections::{HashMap, HashSet};

use crate::types::PropertyPath;

/// dependency entity -> dependency root property -> dependent nodes
type ReverseIndex = HashMap<String, HashMap<String, HashSet<PropertyPath>>>;

/// Dependency graph between properties
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// dependent node -> the paths it reads
    dependencies: HashMap<PropertyPath, HashSet<PropertyPath>>,
    /// reverse edges, see [`ReverseIndex`]
    dependents: ReverseIndex,
}

impl DependencyGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the complete outgoing edge set of `dependent`
    ///
    /// Reverse edges that are no longer present are removed; an empty set
    /// removes the node from the graph.
    pub fn set_dependencies(&mut self, dependent: &PropertyPath, deps: HashSet<PropertyPath>) {
        // Buckets shared with a surviving sibling path are re-filled below
        if let Some(old) = self.dependencies.remove(dependent) {
            for dep in old.difference(&deps) {
                self.unlink(dep, dependent);
            }
        }
        for dep in &deps {
            self.dependents
                .entry(dep.entity.clone())
                .or_default()
                .entry(dep.root().to_string())
                .or_default()
                .insert(dependent.clone());
        }
        if !deps.is_empty() {
            self.dependencies.insert(dependent.clone(), deps);
        }
    }

    /// Paths that `dependent` reads
    pub fn dependencies_of(&self, dependent: &PropertyPath) -> Option<&HashSet<PropertyPath>> {
        self.dependencies.get(dependent)
    }

    /// Direct dependents of `path` (one hop)
    ///
    /// A node is a dependent when any of its dependency paths overlaps
    /// `path`: a change to `b.value` affects readers of `b.value.x`, of
    /// `b.value`, and of the whole entity `b`.
    pub fn dependents_of(&self, path: &PropertyPath) -> HashSet<PropertyPath> {
        let Some(by_root) = self.dependents.get(&path.entity) else {
            return HashSet::new();
        };
        let candidates: Box<dyn Iterator<Item = &HashSet<PropertyPath>>> = if path.is_whole_entity() {
            Box::new(by_root.values())
        } else {
            Box::new(
                [by_root.get(path.root()), by_root.get("")]
                    .into_iter()
                    .flatten(),
            )
        };
        candidates
            .flatten()
            .filter(|node| {
                self.dependencies
                    .get(*node)
                    .is_some_and(|deps| deps.iter().any(|dep| dep.overlaps(path)))
            })
            .cloned()
            .collect()
    }

    /// Remove a node and its outgoing edges
    pub fn remove_node(&mut self, dependent: &PropertyPath) {
        self.set_dependencies(dependent, HashSet::new());
    }

    /// Remove every edge touching `entity`
    ///
    /// Returns the surviving dependents (on other entities) that lost at
    /// least one edge.
    pub fn remove_entity(&mut self, entity: &str) -> HashSet<PropertyPath> {
        let owned: Vec<PropertyPath> = self
            .dependencies
            .keys()
            .filter(|node| node.entity == entity)
            .cloned()
            .collect();
        for node in &owned {
            self.remove_node(node);
        }

        let mut affected = HashSet::new();
        if let Some(by_root) = self.dependents.remove(entity) {
            for node in by_root.into_values().flatten() {
                if let Some(deps) = self.dependencies.get_mut(&node) {
                    deps.retain(|dep| dep.entity != entity);
                    if deps.is_empty() {
                        self.dependencies.remove(&node);
                    }
                }
                affected.insert(node);
            }
        }
        affected
    }

    /// Number of nodes with at least one dependency
    pub fn node_count(&self) -> usize {
        self.dependencies.len()
    }

    /// Total number of edges
    pub fn edge_count(&self) -> usize {
        self.dependencies.values().map(HashSet::len).sum()
    }

    /// Whether both index directions agree and no empty buckets remain
    pub fn is_consistent(&self) -> bool {
        let forward_ok = self.dependencies.iter().all(|(node, deps)| {
            !deps.is_empty()
                && deps.iter().all(|dep| {
                    self.dependents
                        .get(&dep.entity)
                        .and_then(|by_root| by_root.get(dep.root()))
                        .is_some_and(|nodes| nodes.contains(node))
                })
        });
        let reverse_ok = self.dependents.iter().all(|(entity, by_root)| {
            !by_root.is_empty()
                && by_root.iter().all(|(root, nodes)| {
                    !nodes.is_empty()
                        && nodes.iter().all(|node| {
                            self.dependencies.get(node).is_some_and(|deps| {
                                deps.iter().any(|d| &d.entity == entity && d.root() == root)
                            })
                        })
                })
        });
        forward_ok && reverse_ok
    }

    fn unlink(&mut self, dep: &PropertyPath, dependent: &PropertyPath) {
        let Some(by_root) = self.dependents.get_mut(&dep.entity) else {
            return;
        };
        let root = dep.root();
        if let Some(nodes) = by_root.get_mut(root) {
            nodes.remove(dependent);
            if nodes.is_empty() {
                by_root.remove(root);
            }
        }
        if by_root.is_empty() {
            self.dependents.remove(&dep.entity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(entity: &str, path: &str) -> PropertyPath {
        PropertyPath::new(entity, path)
    }

    fn set(paths: &[PropertyPath]) -> HashSet<PropertyPath> {
        paths.iter().cloned().collect()
    }

    #[test]
    fn test_set_and_query() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(&path("a", "text"), set(&[path("b", "value")]));

        assert_eq!(graph.dependents_of(&path("b", "value")), set(&[path("a", "text")]));
        assert!(graph.dependents_of(&path("b", "other")).is_empty());
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_replace_drops_stale_edges() {
        let mut graph = DependencyGraph::new();
        let a = path("a", "text");
        graph.set_dependencies(&a, set(&[path("b", "value"), path("c", "value")]));
        graph.set_dependencies(&a, set(&[path("c", "value")]));

        assert!(graph.dependents_of(&path("b", "value")).is_empty());
        assert_eq!(graph.dependents_of(&path("c", "value")), set(&[a.clone()]));
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.is_consistent());

        graph.set_dependencies(&a, HashSet::new());
        assert_eq!(graph.node_count(), 0);
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_replace_keeps_sibling_path_under_same_root() {
        let mut graph = DependencyGraph::new();
        let a = path("a", "text");
        graph.set_dependencies(&a, set(&[path("t", "data.x"), path("t", "data.y")]));
        graph.set_dependencies(&a, set(&[path("t", "data.y")]));

        assert_eq!(graph.dependents_of(&path("t", "data")), set(&[a]));
        assert!(graph.dependents_of(&path("t", "data.x")).is_empty());
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_overlapping_paths() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(&path("a", "text"), set(&[path("t", "data.rows")]));
        graph.set_dependencies(&path("b", "text"), set(&[path("t", "")]));

        assert_eq!(
            graph.dependents_of(&path("t", "data")),
            set(&[path("a", "text"), path("b", "text")])
        );
        assert_eq!(graph.dependents_of(&path("t", "selected")), set(&[path("b", "text")]));
        assert_eq!(
            graph.dependents_of(&PropertyPath::whole("t")),
            set(&[path("a", "text"), path("b", "text")])
        );
    }

    #[test]
    fn test_remove_entity_prunes_both_directions() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(&path("d", "text"), set(&[path("c", "value"), path("e", "value")]));
        graph.set_dependencies(&path("c", "label"), set(&[path("e", "value")]));

        let affected = graph.remove_entity("c");
        assert_eq!(affected, set(&[path("d", "text")]));
        assert!(graph.dependents_of(&path("c", "value")).is_empty());
        assert_eq!(graph.dependents_of(&path("e", "value")), set(&[path("d", "text")]));
        assert_eq!(graph.dependencies_of(&path("d", "text")), Some(&set(&[path("e", "value")])));
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_self_edge() {
        let mut graph = DependencyGraph::new();
        let a = path("a", "text");
        graph.set_dependencies(&a, set(&[a.clone()]));
        assert_eq!(graph.dependents_of(&a), set(&[a.clone()]));
        assert!(graph.is_consistent());
    }
}
