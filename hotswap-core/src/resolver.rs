//! Dependency resolution: stable topological ordering and cycle detection

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use crate::error::ResolveError;

/// Mapping from plugin name to the names it depends on.
///
/// Nodes remember insertion order, which is used to break ties when ordering
/// so the same input always yields the same registration order.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<String>,
    edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, or replace the dependencies of an existing one
    pub fn add_node<I, S>(&mut self, name: impl Into<String>, dependencies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let mut deps: Vec<String> = Vec::new();
        for dep in dependencies {
            let dep = dep.into();
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }

        if !self.edges.contains_key(&name) {
            self.nodes.push(name.clone());
        }
        self.edges.insert(name, deps);
    }

    /// Node names in insertion order
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    /// Declared dependencies of `name`, including ones that are not nodes
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Order nodes so every dependency precedes its dependents.
    ///
    /// Dependencies that are not nodes of the graph are ignored here; callers
    /// report them separately as missing.
    pub fn topological_order(&self) -> Result<Vec<String>, ResolveError> {
        let mut in_degree: HashMap<&str, usize> = HashMap::with_capacity(self.nodes.len());
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for node in &self.nodes {
            let known = self
                .dependencies(node)
                .iter()
                .filter(|dep| self.contains(dep))
                .inspect(|dep| dependents.entry(dep.as_str()).or_default().push(node.as_str()))
                .count();
            in_degree.insert(node.as_str(), known);
        }

        let mut queue: VecDeque<&str> = self
            .nodes
            .iter()
            .map(String::as_str)
            .filter(|node| in_degree.get(node) == Some(&0))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(node) = queue.pop_front() {
            order.push(node.to_string());
            for dependent in dependents.get(node).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*dependent);
                    }
                }
            }
        }

        if order.len() < self.nodes.len() {
            let cycle = self.find_cycle().unwrap_or_else(|| {
                // Name whatever could not be ordered
                let sorted: HashSet<&String> = order.iter().collect();
                self.nodes
                    .iter()
                    .filter(|n| !sorted.contains(n))
                    .cloned()
                    .collect()
            });
            return Err(ResolveError::CycleDetected { cycle });
        }

        Ok(order)
    }

    /// Find one dependency cycle, listing its nodes in edge order
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visiting: HashSet<&str> = HashSet::new();
        let mut visited: HashSet<&str> = HashSet::new();

        for node in &self.nodes {
            if visited.contains(node.as_str()) {
                continue;
            }
            let mut path = Vec::new();
            if let Some(cycle) = self.cycle_from(node, &mut visiting, &mut visited, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn cycle_from<'a>(
        &'a self,
        node: &'a str,
        visiting: &mut HashSet<&'a str>,
        visited: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visiting.insert(node);
        path.push(node);

        for dep in self.dependencies(node) {
            let dep = dep.as_str();
            if !self.contains(dep) {
                continue;
            }
            if visiting.contains(dep) {
                let start = path.iter().position(|p| *p == dep).unwrap_or(0);
                return Some(path[start..].iter().map(|s| s.to_string()).collect());
            }
            if !visited.contains(dep)
                && let Some(cycle) = self.cycle_from(dep, visiting, visited, path)
            {
                return Some(cycle);
            }
        }

        path.pop();
        visiting.remove(node);
        visited.insert(node);
        None
    }

    /// Read-only adjacency view for introspection
    pub fn snapshot(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.edges
            .iter()
            .map(|(name, deps)| (name.clone(), deps.iter().cloned().collect()))
            .collect()
    }
}

impl<N, D, S> FromIterator<(N, D)> for DependencyGraph
where
    N: Into<String>,
    D: IntoIterator<Item = S>,
    S: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (N, D)>>(iter: T) -> Self {
        let mut graph = DependencyGraph::new();
        for (name, deps) in iter {
            graph.add_node(name, deps);
        }
        graph
    }
}
