//! Dependency graph and scheduler.
//!
//! Nodes are source identities (qualified names). An edge `parent -> child`
//! means the parent's group must run first; edges come from foreign keys
//! and from generation dependencies. Groups are produced in topological
//! order with ties broken by registration order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::TransferProperties;
use crate::core::{ForeignKeyResolver, PathRef};
use crate::error::{Result, TransferError};
use crate::pipeline::{TransferGroup, TransferUnit};

/// Directed acyclic graph over source keys.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    keys: Vec<String>,
    index: HashMap<String, usize>,
    /// children[i] = nodes that must come after node i.
    children: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node (idempotent). Returns its index, which is also its
    /// registration rank.
    pub fn add_node(&mut self, key: &str) -> usize {
        if let Some(&i) = self.index.get(key) {
            return i;
        }
        let i = self.keys.len();
        self.keys.push(key.to_string());
        self.index.insert(key.to_string(), i);
        self.children.push(Vec::new());
        i
    }

    /// `parent` must be ordered before `child`.
    pub fn add_edge(&mut self, parent: &str, child: &str) {
        let p = self.add_node(parent);
        let c = self.add_node(child);
        if p != c && !self.children[p].contains(&c) {
            self.children[p].push(c);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Kahn's algorithm, always releasing the earliest-registered ready
    /// node first. A cycle is reported with the keys along it.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let n = self.keys.len();
        let mut in_degree = vec![0usize; n];
        for children in &self.children {
            for &c in children {
                in_degree[c] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, d)| *d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for &c in &self.children[i] {
                in_degree[c] -= 1;
                if in_degree[c] == 0 {
                    ready.push(Reverse(c));
                }
            }
        }

        if order.len() < n {
            let placed: HashSet<usize> = order.iter().copied().collect();
            return Err(TransferError::DependencyCycle(self.find_cycle(&placed)));
        }

        Ok(order.into_iter().map(|i| self.keys[i].clone()).collect())
    }

    /// Walk unplaced nodes until one repeats. Every unplaced node lies on or
    /// behind a cycle, and each has an unplaced predecessor.
    fn find_cycle(&self, placed: &HashSet<usize>) -> Vec<String> {
        let mut parents: Vec<Vec<usize>> = vec![Vec::new(); self.keys.len()];
        for (p, children) in self.children.iter().enumerate() {
            for &c in children {
                parents[c].push(p);
            }
        }

        let Some(start) = (0..self.keys.len()).find(|i| !placed.contains(i)) else {
            return Vec::new();
        };

        let mut path = vec![start];
        let mut seen: HashMap<usize, usize> = HashMap::from([(start, 0)]);
        let mut current = start;
        loop {
            let Some(&next) = parents[current].iter().find(|&&p| !placed.contains(&p)) else {
                return Vec::new();
            };
            if let Some(&at) = seen.get(&next) {
                // path walks child -> parent; report parent -> child,
                // starting from the earliest-registered node.
                let mut ring: Vec<usize> = path[at..].iter().rev().copied().collect();
                let lead = ring
                    .iter()
                    .enumerate()
                    .min_by_key(|&(_, i)| *i)
                    .map(|(pos, _)| pos)
                    .unwrap_or(0);
                ring.rotate_left(lead);
                ring.push(ring[0]);
                return ring.into_iter().map(|i| self.keys[i].clone()).collect();
            }
            seen.insert(next, path.len());
            path.push(next);
            current = next;
        }
    }
}

/// Order and group registered units.
///
/// With a resolver, foreign-key parents not registered by the caller are
/// discovered (transitively) and given units of their own, targeting the
/// sibling of the first registered target named after the parent.
pub async fn schedule(
    units: Vec<TransferUnit>,
    resolver: Option<&dyn ForeignKeyResolver>,
    properties: Arc<TransferProperties>,
) -> Result<Vec<TransferGroup>> {
    if units.is_empty() {
        debug!("Nothing registered, no groups scheduled");
        return Ok(Vec::new());
    }

    let mut graph = DependencyGraph::new();
    let mut by_key: HashMap<String, Vec<TransferUnit>> = HashMap::new();
    for unit in units {
        graph.add_node(&unit.source_key());
        by_key.entry(unit.source_key()).or_default().push(unit);
    }

    if let Some(resolver) = resolver {
        expand_foreign_keys(&mut graph, &mut by_key, resolver, &properties).await?;
    }

    // Generation dependencies order the leading source first.
    for members in by_key.values() {
        for unit in members {
            if let Some(dep) = unit.source.generation_dependency() {
                if graph.contains(&dep) {
                    graph.add_edge(&dep, &unit.source_key());
                }
            }
        }
    }

    let order = graph.topological_order()?;

    let mut groups: Vec<TransferGroup> = Vec::new();
    let mut group_of: HashMap<String, usize> = HashMap::new();
    for key in &order {
        let Some(members) = by_key.remove(key) else {
            continue;
        };
        for unit in members {
            let folded = unit
                .source
                .generation_dependency()
                .and_then(|dep| match group_of.get(&dep) {
                    Some(&g) => Some(g),
                    None => {
                        warn!(
                            "{}: generation dependency {} is not scheduled, running alone",
                            key, dep
                        );
                        None
                    }
                });
            let g = match folded {
                Some(g) => {
                    groups[g].units.push(unit);
                    g
                }
                None => {
                    groups.push(TransferGroup::single(unit));
                    groups.len() - 1
                }
            };
            group_of.insert(key.clone(), g);
        }
    }

    info!(
        "Scheduled {} groups ({} dependent) over {} sources",
        groups.len(),
        groups.iter().filter(|g| g.is_dependent()).count(),
        order.len()
    );
    Ok(groups)
}

async fn expand_foreign_keys(
    graph: &mut DependencyGraph,
    by_key: &mut HashMap<String, Vec<TransferUnit>>,
    resolver: &dyn ForeignKeyResolver,
    properties: &Arc<TransferProperties>,
) -> Result<()> {
    let mut ordered_sources: Vec<(usize, PathRef)> = by_key
        .values()
        .map(|units| {
            let source = units[0].source.clone();
            (graph.add_node(&source.qualified_name()), source)
        })
        .collect();
    ordered_sources.sort_by_key(|(rank, _)| *rank);
    let anchor = ordered_sources
        .first()
        .and_then(|(_, source)| by_key.get(&source.qualified_name()))
        .map(|units| units[0].target.clone())
        .ok_or_else(|| TransferError::Config("no target to anchor discovered sources".into()))?;

    let mut frontier: Vec<PathRef> = ordered_sources.into_iter().map(|(_, s)| s).collect();
    while !frontier.is_empty() {
        let edges = resolver.foreign_key_edges(&frontier).await?;
        let mut discovered = Vec::new();

        for edge in edges {
            let parent_key = edge.parent.qualified_name();
            let child_key = edge.child.qualified_name();
            if !graph.contains(&parent_key) {
                let target = anchor.resolve_child(edge.parent.name())?;
                info!(
                    "Discovered {} (referenced by {}), loading into {}",
                    parent_key,
                    child_key,
                    target.qualified_name()
                );
                let unit =
                    TransferUnit::new(edge.parent.clone(), target, properties.clone()).discovered();
                by_key.entry(parent_key.clone()).or_default().push(unit);
                discovered.push(edge.parent.clone());
            }
            graph.add_edge(&parent_key, &child_key);
        }

        frontier = discovered;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{CoupledGenerator, MemoryStore};

    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for n in nodes {
            g.add_node(n);
        }
        for (p, c) in edges {
            g.add_edge(p, c);
        }
        g
    }

    #[test]
    fn test_parent_before_child_regardless_of_registration() {
        let g = graph(&["b", "a"], &[("a", "b")]);
        assert_eq!(g.topological_order().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_ties_follow_registration_order() {
        let g = graph(&["c", "a", "b", "d"], &[("a", "d")]);
        assert_eq!(g.topological_order().unwrap(), vec!["c", "a", "b", "d"]);

        // "x" is released by "p" but registered before "q".
        let g = graph(&["p", "q", "x"], &[("p", "x")]);
        assert_eq!(g.topological_order().unwrap(), vec!["p", "q", "x"]);
        let g = graph(&["x", "q", "p"], &[("p", "x")]);
        assert_eq!(g.topological_order().unwrap(), vec!["q", "p", "x"]);
    }

    #[test]
    fn test_cycle_is_named() {
        let g = graph(&["a", "b", "c", "free"], &[("a", "b"), ("b", "c"), ("c", "a")]);
        match g.topological_order() {
            Err(TransferError::DependencyCycle(cycle)) => {
                assert_eq!(cycle, vec!["a", "b", "c", "a"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    fn units(store: &MemoryStore, target: &MemoryStore, names: &[&str]) -> Vec<TransferUnit> {
        let props = Arc::new(TransferProperties::default());
        names
            .iter()
            .map(|n| TransferUnit::new(store.path(n), target.path(n), props.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_empty_input_schedules_nothing() {
        let groups = schedule(Vec::new(), None, Arc::default()).await.unwrap();
        assert!(groups.is_empty());
    }

    #[tokio::test]
    async fn test_foreign_keys_order_and_discover() {
        let src = MemoryStore::new("src");
        let dst = MemoryStore::new("dst");
        src.add_foreign_key("lines", "orders");
        src.add_foreign_key("orders", "customers");

        let groups = schedule(
            units(&src, &dst, &["lines", "orders"]),
            Some(&src),
            Arc::default(),
        )
        .await
        .unwrap();

        let keys: Vec<String> = groups.iter().map(|g| g.units[0].source_key()).collect();
        assert_eq!(keys, vec!["src.customers", "src.orders", "src.lines"]);
        let discovered = &groups[0].units[0];
        assert!(discovered.discovered);
        assert_eq!(discovered.target.qualified_name(), "dst.customers");
    }

    #[tokio::test]
    async fn test_foreign_key_cycle_is_fatal() {
        let src = MemoryStore::new("src");
        let dst = MemoryStore::new("dst");
        src.add_foreign_key("a", "b");
        src.add_foreign_key("b", "a");

        let err = schedule(units(&src, &dst, &["a", "b"]), Some(&src), Arc::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::DependencyCycle(_)));
    }

    #[tokio::test]
    async fn test_generation_dependency_folds_into_group() {
        let gen = CoupledGenerator::new("gen", &[("a", 1), ("b", 1)]);
        let dst = MemoryStore::new("dst");
        let plain = MemoryStore::new("src");
        let props = Arc::new(TransferProperties::default());
        let paths = gen.paths();

        // Registered out of order, with an independent unit in between.
        let units = vec![
            TransferUnit::new(paths[1].clone(), dst.path("b"), props.clone()),
            TransferUnit::new(plain.path("t"), dst.path("t"), props.clone()),
            TransferUnit::new(paths[0].clone(), dst.path("a"), props),
        ];
        let groups = schedule(units, None, Arc::default()).await.unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].source_keys(), vec!["src.t"]);
        assert_eq!(groups[1].source_keys(), vec!["gen.a", "gen.b"]);
        assert!(groups[1].is_dependent());
    }
}
